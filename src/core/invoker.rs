use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use eyre::Result;
use futures_util::FutureExt;
use http::{StatusCode, header};

use crate::{
    core::{
        chain::Next,
        context::RequestContext,
        error::HttpError,
        request::HttpRequest,
        response::HttpResponse,
        sse::{self, SseOptions},
    },
    ports::endpoint::{Handler, Middleware},
};

const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// The terminal step of every route chain.
///
/// For SSE routes it switches the response to an event stream and places
/// the session in the context before calling the user's handler. When the
/// dispatcher waits on the context's stream head, the response is handed
/// over right away so frames reach the client while the handler runs.
#[derive(Clone)]
pub struct RouteEndpoint {
    handler: Arc<dyn Handler>,
    sse: Option<SseOptions>,
}

impl RouteEndpoint {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler, sse: None }
    }

    pub fn with_sse(mut self, options: SseOptions) -> Self {
        self.sse = Some(options);
        self
    }

    pub fn is_sse(&self) -> bool {
        self.sse.is_some()
    }
}

#[async_trait]
impl Handler for RouteEndpoint {
    async fn call(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        if let Some(options) = &self.sse {
            let last_event_id = req.header("last-event-id").map(str::to_string);
            let session = sse::attach(res, options, last_event_id, req.version());
            ctx.set_sse(session);

            if let Some(head) = ctx.take_stream_head() {
                if let Some(response) = res.take_stream_response() {
                    if head.send(response).is_err() {
                        tracing::debug!("Client left before the event stream started");
                    }
                }
            }
        }
        self.handler.call(req, res, ctx).await
    }
}

/// Runs a route's middleware chain and endpoint, translating failures into
/// the response.
///
/// An [`HttpError`] sets its status and message verbatim. Anything else,
/// panics included, is logged and answered with a bare 500.
pub async fn invoke(
    middlewares: &[Arc<dyn Middleware>],
    endpoint: &dyn Handler,
    req: &mut HttpRequest,
    res: &mut HttpResponse,
    ctx: &mut RequestContext,
) {
    let path = req.path().to_string();
    let outcome = AssertUnwindSafe(Next::new(middlewares, endpoint).run(req, res, ctx))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(report)) => match report.downcast_ref::<HttpError>() {
            Some(http_error) => {
                tracing::debug!(
                    path = %path,
                    status = http_error.status.as_u16(),
                    "Request rejected: {}",
                    http_error.message
                );
                write_error(res, http_error.status, &http_error.message);
            }
            None => {
                tracing::error!(path = %path, "Unhandled error while serving request: {:?}", report);
                write_error(res, StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
            }
        },
        Err(panic) => {
            tracing::error!(
                path = %path,
                "Panic while serving request: {}",
                panic_message(panic.as_ref())
            );
            write_error(res, StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
        }
    }
}

fn write_error(res: &mut HttpResponse, status: StatusCode, message: &str) {
    res.clear_body();
    res.headers_mut().remove(header::CONTENT_TYPE);
    res.set_status(status);
    res.write(message);
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use http::Request;
    use url::Url;

    use super::*;

    struct Failing(fn() -> Result<()>);

    #[async_trait]
    impl Handler for Failing {
        async fn call(
            &self,
            _req: &mut HttpRequest,
            res: &mut HttpResponse,
            _ctx: &mut RequestContext,
        ) -> Result<()> {
            res.write("partial output");
            (self.0)()
        }
    }

    async fn run(handler: Failing) -> HttpResponse {
        let mut req = HttpRequest::from_request(
            Request::builder().uri("/boom").body(Body::empty()).unwrap(),
        );
        let mut res = HttpResponse::new();
        let mut ctx = RequestContext::new(Url::parse("http://localhost/boom").unwrap(), HashMap::new());
        invoke(&[], &handler, &mut req, &mut res, &mut ctx).await;
        res
    }

    #[tokio::test]
    async fn test_domain_error_is_sent_verbatim() {
        let res = run(Failing(|| Err(HttpError::bad_request("bad input").into()))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body(), b"bad input");
    }

    #[tokio::test]
    async fn test_unknown_error_is_hidden() {
        let res = run(Failing(|| Err(eyre::eyre!("secret connection string")))).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), INTERNAL_ERROR_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let res = run(Failing(|| panic!("handler bug"))).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), INTERNAL_ERROR_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_success_keeps_handler_output() {
        let res = run(Failing(|| Ok(()))).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), b"partial output");
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let fixed: Box<dyn Any + Send> = Box::new("fixed");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(fixed.as_ref()), "fixed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
