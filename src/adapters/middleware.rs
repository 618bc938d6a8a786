//! Built-in middleware for dispatcher routes.
//!
//! `body` buffers the request body into the context, `json` turns that
//! buffer into a `serde_json::Value` (optionally validated), and
//! `request_timing` logs each request around the rest of the chain.
use std::{marker::PhantomData, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http::header;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{
    core::{
        chain::Next,
        context::{BODY_PROP, JSON_PROP, RequestContext},
        error::HttpError,
        request::HttpRequest,
        response::HttpResponse,
    },
    ports::{endpoint::Middleware, validator::SchemaValidator},
};

pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

const JSON_PARSE_ERROR: &str = "Can not parse JSON body!";

#[derive(Debug, Clone)]
pub struct BodyOptions {
    pub max_body_size: usize,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Buffers the request body into the `body` context prop.
///
/// A body longer than `max_body_size` is answered with 400 and the rest of
/// the chain never runs.
pub fn body(options: BodyOptions) -> Arc<dyn Middleware> {
    Arc::new(BodyMiddleware {
        max_body_size: options.max_body_size,
    })
}

pub struct BodyMiddleware {
    max_body_size: usize,
}

impl BodyMiddleware {
    fn too_large(&self) -> HttpError {
        HttpError::bad_request(format!(
            "Body length greater than {} bytes",
            self.max_body_size
        ))
    }
}

#[async_trait]
impl Middleware for BodyMiddleware {
    async fn handle(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let declared = req
            .header(header::CONTENT_LENGTH)
            .and_then(|value| value.parse::<usize>().ok());
        if declared.is_some_and(|length| length > self.max_body_size) {
            return Err(self.too_large().into());
        }

        let bytes = match req.take_body() {
            Some(body) => match Limited::new(body, self.max_body_size).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) if e.is::<LengthLimitError>() => return Err(self.too_large().into()),
                Err(e) => {
                    tracing::debug!("Failed to read request body: {}", e);
                    return Err(HttpError::bad_request("Failed to read request body").into());
                }
            },
            None => Bytes::new(),
        };

        ctx.insert_prop(BODY_PROP, bytes);
        next.run(req, res, ctx).await
    }
}

#[derive(Clone, Default)]
pub struct JsonOptions {
    pub validator: Option<Arc<dyn SchemaValidator>>,
}

impl JsonOptions {
    pub fn validator(validator: impl SchemaValidator) -> Self {
        Self {
            validator: Some(Arc::new(validator)),
        }
    }
}

/// Parses the buffered body into the `json` context prop.
///
/// Handles `application/json` and `application/x-www-form-urlencoded`; other
/// content types pass through untouched. Must run after [`body`].
pub fn json(options: JsonOptions) -> Arc<dyn Middleware> {
    Arc::new(JsonMiddleware {
        validator: options.validator,
    })
}

pub struct JsonMiddleware {
    validator: Option<Arc<dyn SchemaValidator>>,
}

impl JsonMiddleware {
    fn parse(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<Option<Value>, HttpError> {
        match content_type {
            Some("application/json") => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|_| HttpError::bad_request(JSON_PARSE_ERROR)),
            Some("application/x-www-form-urlencoded") => {
                let mut fields = Map::new();
                for (key, value) in url::form_urlencoded::parse(bytes) {
                    fields.insert(key.into_owned(), Value::String(value.into_owned()));
                }
                Ok(Some(Value::Object(fields)))
            }
            _ => Ok(None),
        }
    }

    fn validate(&self, value: Option<&Value>) -> Result<Option<Value>, HttpError> {
        match &self.validator {
            Some(validator) => validator
                .validate(value)
                .map(|validated| Some(validated).filter(|v| !v.is_null()))
                .map_err(HttpError::bad_request),
            None => Ok(value.cloned()),
        }
    }
}

#[async_trait]
impl Middleware for JsonMiddleware {
    async fn handle(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let body = ctx.body().cloned().unwrap_or_default();

        let parsed = if body.is_empty() {
            self.validate(None)?
        } else {
            match self.parse(req.content_type(), &body)? {
                Some(value) => self.validate(Some(&value))?,
                None => None,
            }
        };

        if let Some(value) = parsed {
            ctx.insert_prop(JSON_PROP, value);
        }
        next.run(req, res, ctx).await
    }
}

/// A [`SchemaValidator`] backed by a serde type.
///
/// The body must deserialize into `T`; it is then re-serialized, so fields
/// `T` does not declare are dropped.
pub struct Schema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Schema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Schema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SchemaValidator for Schema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn validate(&self, value: Option<&Value>) -> Result<Value, String> {
        let input = value.cloned().unwrap_or(Value::Null);
        let typed: T = serde_json::from_value(input).map_err(|e| e.to_string())?;
        serde_json::to_value(&typed).map_err(|e| e.to_string())
    }
}

/// Logs the start and end of each request, including latency.
pub fn request_timing() -> Arc<dyn Middleware> {
    Arc::new(RequestTiming)
}

pub struct RequestTiming;

#[async_trait]
impl Middleware for RequestTiming {
    async fn handle(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.path().to_string();

        tracing::debug!("Started processing {} {}", method, path);
        let result = next.run(req, res, ctx).await;

        match &result {
            Ok(()) => tracing::info!(
                "Completed {} {} - {} in {:?}",
                method,
                path,
                res.status(),
                start.elapsed()
            ),
            Err(e) => tracing::info!(
                "Completed {} {} with error in {:?}: {}",
                method,
                path,
                start.elapsed(),
                e
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use http::{Request, StatusCode};
    use serde::Deserialize;
    use url::Url;

    use super::*;
    use crate::{core::invoker::invoke, ports::endpoint::Handler};

    struct Capture;

    #[async_trait]
    impl Handler for Capture {
        async fn call(
            &self,
            _req: &mut HttpRequest,
            res: &mut HttpResponse,
            ctx: &mut RequestContext,
        ) -> Result<()> {
            let summary = serde_json::json!({
                "body_len": ctx.body().map(Bytes::len),
                "json": ctx.json(),
            });
            res.set_json(&summary)?;
            Ok(())
        }
    }

    async fn run(
        middlewares: Vec<Arc<dyn Middleware>>,
        content_type: Option<&str>,
        payload: &'static str,
    ) -> (StatusCode, String) {
        let mut builder = Request::builder().method("POST").uri("/submit");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let mut req = HttpRequest::from_request(builder.body(Body::from(payload)).unwrap());
        let mut res = HttpResponse::new();
        let mut ctx =
            RequestContext::new(Url::parse("http://localhost/submit").unwrap(), HashMap::new());

        invoke(&middlewares, &Capture, &mut req, &mut res, &mut ctx).await;

        let response = res.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_body_within_limit() {
        let chain = vec![body(BodyOptions { max_body_size: 10 })];
        let (status, text) = run(chain, None, "0123456789").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""body_len":10"#), "{text}");
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let chain = vec![body(BodyOptions { max_body_size: 10 })];
        let (status, text) = run(chain, None, "0123456789A").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Body length greater than 10 bytes");
    }

    #[tokio::test]
    async fn test_json_body_is_parsed() {
        let chain = vec![body(BodyOptions::default()), json(JsonOptions::default())];
        let (status, text) = run(chain, Some("application/json"), r#"{"a":[1,2]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""json":{"a":[1,2]}"#), "{text}");
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let chain = vec![body(BodyOptions::default()), json(JsonOptions::default())];
        let (status, text) = run(chain, Some("application/json; charset=utf-8"), "{oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, JSON_PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_form_body_last_value_wins() {
        let chain = vec![body(BodyOptions::default()), json(JsonOptions::default())];
        let (status, text) = run(
            chain,
            Some("application/x-www-form-urlencoded"),
            "name=shell&tag=a&tag=b%20c",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""name":"shell""#), "{text}");
        assert!(text.contains(r#""tag":"b c""#), "{text}");
    }

    #[tokio::test]
    async fn test_other_content_type_leaves_json_unset() {
        let chain = vec![body(BodyOptions::default()), json(JsonOptions::default())];
        let (status, text) = run(chain, Some("text/plain"), "hello").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""json":null"#), "{text}");
    }

    #[derive(Deserialize, Serialize)]
    struct NewUser {
        name: String,
        age: u8,
    }

    #[tokio::test]
    async fn test_schema_strips_unknown_fields() {
        let chain = vec![
            body(BodyOptions::default()),
            json(JsonOptions::validator(Schema::<NewUser>::new())),
        ];
        let (status, text) = run(
            chain,
            Some("application/json"),
            r#"{"name":"ada","age":36,"admin":true}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""name":"ada""#), "{text}");
        assert!(!text.contains("admin"), "{text}");
    }

    #[tokio::test]
    async fn test_schema_failure_is_bad_request() {
        let chain = vec![
            body(BodyOptions::default()),
            json(JsonOptions::validator(Schema::<NewUser>::new())),
        ];
        let (status, text) = run(chain, Some("application/json"), r#"{"name":"ada"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("age"), "{text}");
    }

    #[tokio::test]
    async fn test_empty_body_runs_validator() {
        let chain = vec![
            body(BodyOptions::default()),
            json(JsonOptions::validator(Schema::<NewUser>::new())),
        ];
        let (status, _) = run(chain, Some("application/json"), "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let chain = vec![
            body(BodyOptions::default()),
            json(JsonOptions::validator(Schema::<Option<NewUser>>::new())),
        ];
        let (status, text) = run(chain, Some("application/json"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains(r#""json":null"#), "{text}");
    }

    #[tokio::test]
    async fn test_request_timing_passes_through() {
        let chain = vec![request_timing()];
        let (status, _) = run(chain, None, "").await;
        assert_eq!(status, StatusCode::OK);
    }
}
