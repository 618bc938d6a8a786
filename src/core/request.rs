use axum::body::Body;
use http::{Extensions, HeaderMap, Method, Request, Uri, Version, header, request::Parts};

/// The inbound half of a dispatched request.
///
/// Head fields are read-only; the body can be taken exactly once, normally by
/// the `body` middleware.
#[derive(Debug)]
pub struct HttpRequest {
    parts: Parts,
    body: Option<Body>,
}

impl HttpRequest {
    pub fn from_request(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, body)
    }

    pub fn from_parts(parts: Parts, body: Body) -> Self {
        Self {
            parts,
            body: Some(body),
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    /// Returns a header value when it is present and valid visible ASCII.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// The media type of the body without parameters, e.g. `application/json`.
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
            .and_then(|value| value.split(';').next())
            .map(str::trim)
    }

    /// Takes the body stream, leaving `None` behind for later callers.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_strips_parameters() {
        let request = Request::builder()
            .uri("/submit")
            .header("content-type", "application/json; charset=utf-8")
            .body(Body::empty())
            .unwrap();
        let request = HttpRequest::from_request(request);
        assert_eq!(request.content_type(), Some("application/json"));
    }

    #[test]
    fn test_body_is_taken_once() {
        let request = Request::builder()
            .uri("/submit")
            .body(Body::from("payload"))
            .unwrap();
        let mut request = HttpRequest::from_request(request);
        assert!(request.take_body().is_some());
        assert!(request.take_body().is_none());
        assert!(!request.has_body());
    }
}
