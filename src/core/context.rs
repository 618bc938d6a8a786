use std::{any::Any, collections::HashMap};

use axum::body::Body;
use bytes::Bytes;
use http::{Response, header, request::Parts};
use serde_json::Value;
use tokio::sync::oneshot;
use url::Url;

use crate::core::sse::SseSession;

/// Context key under which the `body` middleware stores the raw bytes.
pub const BODY_PROP: &str = "body";
/// Context key under which the `json` middleware stores the parsed value.
pub const JSON_PROP: &str = "json";

type Prop = Box<dyn Any + Send + Sync>;

/// Per-request state shared by the middleware chain and the handler.
pub struct RequestContext {
    url: Url,
    params: HashMap<String, String>,
    props: HashMap<String, Prop>,
    sse: Option<SseSession>,
    stream_head: Option<oneshot::Sender<Response<Body>>>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("url", &self.url.as_str())
            .field("params", &self.params)
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field("sse", &self.sse.is_some())
            .field("stream_head", &self.stream_head.is_some())
            .finish()
    }
}

impl RequestContext {
    pub fn new(url: Url, params: HashMap<String, String>) -> Self {
        Self {
            url,
            params,
            props: HashMap::new(),
            sse: None,
            stream_head: None,
        }
    }

    /// Rebuilds the absolute request URL from the `Host` header and the URI.
    pub fn url_from_parts(parts: &Parts, secure: bool) -> Result<Url, url::ParseError> {
        let scheme = if secure { "https" } else { "http" };
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let host = parts
            .uri
            .authority()
            .map(|authority| authority.as_str())
            .or_else(|| {
                parts
                    .headers
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
            })
            .unwrap_or("localhost");

        Url::parse(&format!("{scheme}://{host}{path_and_query}"))
            .or_else(|_| Url::parse(&format!("{scheme}://localhost{path_and_query}")))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// A decoded path parameter bound by the route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// First value of a query string parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn insert_prop<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.props.insert(key.into(), Box::new(value));
    }

    /// Typed access to a middleware property; `None` when absent or of another type.
    pub fn prop<T: Any>(&self, key: &str) -> Option<&T> {
        self.props.get(key).and_then(|prop| prop.downcast_ref())
    }

    pub fn prop_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.props.get_mut(key).and_then(|prop| prop.downcast_mut())
    }

    pub fn remove_prop<T: Any>(&mut self, key: &str) -> Option<T> {
        let prop = self.props.remove(key)?;
        match prop.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(prop) => {
                self.props.insert(key.to_string(), prop);
                None
            }
        }
    }

    pub fn has_prop(&self, key: &str) -> bool {
        self.props.contains_key(key)
    }

    /// Raw request body, present once the `body` middleware has run.
    pub fn body(&self) -> Option<&Bytes> {
        self.prop(BODY_PROP)
    }

    /// Parsed request body, present once the `json` middleware has run.
    pub fn json(&self) -> Option<&Value> {
        self.prop(JSON_PROP)
    }

    pub fn sse(&self) -> Option<&SseSession> {
        self.sse.as_ref()
    }

    /// Moves the SSE session out so it can outlive the handler call.
    pub fn take_sse(&mut self) -> Option<SseSession> {
        self.sse.take()
    }

    pub(crate) fn set_sse(&mut self, session: SseSession) {
        self.sse = Some(session);
    }

    /// Where a streaming response is sent as soon as it is ready, ahead of
    /// the rest of the chain.
    pub(crate) fn set_stream_head(&mut self, head: oneshot::Sender<Response<Body>>) {
        self.stream_head = Some(head);
    }

    pub(crate) fn take_stream_head(&mut self) -> Option<oneshot::Sender<Response<Body>>> {
        self.stream_head.take()
    }
}
