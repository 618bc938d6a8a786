use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header};
use serde::Serialize;

/// The outbound half of a dispatched request.
///
/// Handlers either write status, headers and body bytes directly, or set one
/// of the declarative fields (`json`, `html`, `text`) which are serialized
/// once the chain completes. When several declarative fields are set the
/// first of json, html, text wins and replaces any bytes written directly.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    json: Option<Bytes>,
    html: Option<String>,
    text: Option<String>,
    stream: Option<Body>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            json: None,
            html: None,
            text: None,
            stream: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends raw bytes to the directly written body.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> &mut Self {
        self.body.extend_from_slice(chunk.as_ref());
        self
    }

    /// Bytes written so far through [`HttpResponse::write`].
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes `value` right away; the result is sent as `application/json`.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.json = Some(Bytes::from(serde_json::to_vec(value)?));
        Ok(())
    }

    pub fn set_html(&mut self, html: impl Into<String>) -> &mut Self {
        self.html = Some(html.into());
        self
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into());
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Drops everything that would have been sent as the body. Headers stay.
    pub(crate) fn clear_body(&mut self) {
        self.body.clear();
        self.json = None;
        self.html = None;
        self.text = None;
        self.stream = None;
    }

    pub(crate) fn start_stream(&mut self, body: Body) {
        self.stream = Some(body);
    }

    /// Splits off the streaming body together with the current status and
    /// headers. Later changes to this response are not sent.
    pub(crate) fn take_stream_response(&mut self) -> Option<Response<Body>> {
        let stream = self.stream.take()?;
        let mut response = Response::new(stream);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        Some(response)
    }

    pub fn into_response(self) -> Response<Body> {
        let Self {
            status,
            mut headers,
            body,
            json,
            html,
            text,
            stream,
        } = self;

        if let Some(stream) = stream {
            let mut response = Response::new(stream);
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            return response;
        }

        let (content_type, payload) = if let Some(json) = json {
            (Some("application/json"), json)
        } else if let Some(html) = html {
            (Some("text/html; charset=utf-8"), Bytes::from(html))
        } else if let Some(text) = text {
            (Some("text/plain; charset=utf-8"), Bytes::from(text))
        } else {
            (None, body.freeze())
        };

        if let Some(content_type) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if allows_body(status) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(payload.len()));
        }

        let mut response = Response::new(Body::from(payload));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
