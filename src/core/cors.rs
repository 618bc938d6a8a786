//! Per-route CORS policy.
//!
//! [`CorsOptions`] is what callers pass at registration; it is merged with
//! the defaults and validated once into a [`CorsPolicy`] whose header values
//! are pre-rendered for the hot path.
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method, header};

use crate::core::error::EngineError;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Either every value is accepted or only the listed ones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AllowList {
    #[default]
    Any,
    Only(Vec<String>),
}

impl AllowList {
    pub fn only<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(values.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorsOptions {
    pub enabled: Option<bool>,
    pub origins: Option<AllowList>,
    pub headers_allowed: Option<AllowList>,
    pub headers_exposed: Option<Vec<String>>,
    pub methods: Option<Vec<Method>>,
    pub credentials: Option<bool>,
    pub max_age: Option<Duration>,
}

impl CorsOptions {
    /// CORS enabled with every default in place.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Self::default()
        }
    }

    pub fn origins(mut self, origins: AllowList) -> Self {
        self.origins = Some(origins);
        self
    }

    pub fn headers_allowed(mut self, headers: AllowList) -> Self {
        self.headers_allowed = Some(headers);
        self
    }

    pub fn headers_exposed<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers_exposed = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    pub fn credentials(mut self, allowed: bool) -> Self {
        self.credentials = Some(allowed);
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Merges with the defaults and validates every header value up front.
    pub fn resolve(self) -> Result<CorsPolicy, EngineError> {
        let origins = match self.origins.unwrap_or_default() {
            AllowList::Only(list) if list.iter().any(|o| o == "*") => AllowList::Any,
            AllowList::Only(list) => {
                if let Some(bad) = list.iter().find(|o| o.is_empty() || o.contains(',')) {
                    return Err(EngineError::InvalidCors(format!("invalid origin '{bad}'")));
                }
                AllowList::Only(list)
            }
            AllowList::Any => AllowList::Any,
        };

        let allow_headers = match self.headers_allowed.unwrap_or_default() {
            AllowList::Only(list) if list.iter().any(|h| h == "*") => None,
            AllowList::Only(list) => Some(render_header_list(&list)?),
            AllowList::Any => None,
        };

        let exposed = self.headers_exposed.unwrap_or_default();
        let expose_headers = if exposed.is_empty() {
            None
        } else {
            Some(render_header_list(&exposed)?)
        };

        let methods = self.methods.unwrap_or_else(|| {
            vec![
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::PATCH,
                Method::POST,
                Method::DELETE,
            ]
        });
        if methods.is_empty() {
            return Err(EngineError::InvalidCors(
                "at least one method must be allowed".to_string(),
            ));
        }
        let allow_methods = join_header_value(methods.iter().map(Method::as_str))?;

        let max_age = self.max_age.unwrap_or(DEFAULT_MAX_AGE);

        Ok(CorsPolicy {
            enabled: self.enabled.unwrap_or(true),
            origins,
            allow_headers,
            expose_headers,
            allow_methods,
            credentials: self.credentials.unwrap_or(false),
            max_age: HeaderValue::from(max_age.as_secs()),
        })
    }
}

/// A resolved CORS policy attached to a route.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    enabled: bool,
    origins: AllowList,
    /// `None` means any requested header is echoed back.
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    allow_methods: HeaderValue,
    credentials: bool,
    max_age: HeaderValue,
}

impl CorsPolicy {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        match &self.origins {
            AllowList::Any => true,
            AllowList::Only(list) => list.iter().any(|allowed| allowed == origin),
        }
    }

    /// Writes the preflight headers for a request carrying `origin`.
    pub fn apply_preflight(
        &self,
        origin: &HeaderValue,
        request_headers: &HeaderMap,
        headers: &mut HeaderMap,
    ) {
        if !self.enabled {
            return;
        }

        self.apply_origin(origin, headers);

        match &self.allow_headers {
            Some(allowed) => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
            }
            None => {
                if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS)
                {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
                }
            }
        }
        if let Some(exposed) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed.clone());
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            self.allow_methods.clone(),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        if self.credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    /// Writes the headers an actual (non-preflight) response carries.
    pub fn apply_actual(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if !self.enabled {
            return;
        }

        if let Some(origin) = origin {
            self.apply_origin(origin, headers);
        }
        if self.credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if let Some(exposed) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed.clone());
        }
    }

    fn apply_origin(&self, origin: &HeaderValue, headers: &mut HeaderMap) {
        let allowed = origin
            .to_str()
            .map(|origin| self.allows_origin(origin))
            .unwrap_or(false);
        if allowed {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.append(header::VARY, HeaderValue::from_static("origin"));
        }
    }
}

fn render_header_list(names: &[String]) -> Result<HeaderValue, EngineError> {
    for name in names {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| EngineError::InvalidCors(format!("invalid header name '{name}'")))?;
    }
    join_header_value(names.iter().map(String::as_str))
}

fn join_header_value<'a>(values: impl Iterator<Item = &'a str>) -> Result<HeaderValue, EngineError> {
    let joined = values.collect::<Vec<_>>().join(", ");
    HeaderValue::from_str(&joined)
        .map_err(|e| EngineError::InvalidCors(format!("'{joined}' is not a valid header value: {e}")))
}
