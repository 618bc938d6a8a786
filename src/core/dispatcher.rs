use std::{sync::Arc, time::Instant};

use axum::{Router, body::Body};
use http::{HeaderMap, Method, Request, Response, StatusCode, header};
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        context::RequestContext,
        cors::CorsOptions,
        error::EngineError,
        healthcheck::{HealthRegistry, HealthcheckEndpoint},
        invoker::invoke,
        request::HttpRequest,
        response::HttpResponse,
        route_table::{Route, RouteMatch, RouteTable},
        sse::SseOptions,
    },
    ports::{
        endpoint::{Handler, Middleware},
        health_probe::HealthProbe,
    },
    tracing_setup::create_request_span,
};

/// Where the reserved healthcheck route lives and what it answers.
#[derive(Debug, Clone)]
pub struct HealthcheckSettings {
    pub path: String,
    pub good: StatusCode,
    pub bad: StatusCode,
}

impl Default for HealthcheckSettings {
    fn default() -> Self {
        Self {
            path: "/healthcheck".to_string(),
            good: StatusCode::OK,
            bad: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Registration options for [`Dispatcher::endpoint`].
#[derive(Clone)]
pub struct EndpointOptions {
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub use_default_middlewares: bool,
    pub cors: Option<CorsOptions>,
    pub sse: Option<SseOptions>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
            use_default_middlewares: true,
            cors: None,
            sse: None,
        }
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn without_default_middlewares(mut self) -> Self {
        self.use_default_middlewares = false;
        self
    }

    pub fn cors(mut self, cors: CorsOptions) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn sse(mut self, sse: SseOptions) -> Self {
        self.sse = Some(sse);
        self
    }
}

/// The request-dispatch engine: route table, default middleware and
/// healthcheck registry for one server.
pub struct Dispatcher {
    table: RouteTable,
    defaults: Vec<Arc<dyn Middleware>>,
    health: Arc<HealthRegistry>,
    secure: bool,
}

impl Dispatcher {
    /// Creates the engine with its healthcheck route already in place, ahead
    /// of every user route and without default middleware.
    pub fn new(
        health: HealthcheckSettings,
        defaults: Vec<Arc<dyn Middleware>>,
    ) -> Result<Self, EngineError> {
        let registry = Arc::new(HealthRegistry::new());
        let endpoint = HealthcheckEndpoint::new(registry.clone(), health.good, health.bad);

        let mut table = RouteTable::new();
        table.register(Route::new(Method::GET, &health.path, Arc::new(endpoint))?);

        Ok(Self {
            table,
            defaults,
            health: registry,
            secure: false,
        })
    }

    /// Marks the engine as served over TLS, which only affects the scheme of
    /// [`RequestContext::url`].
    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn endpoint(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        let EndpointOptions {
            middlewares,
            use_default_middlewares,
            cors,
            sse,
        } = options;

        let mut chain = if use_default_middlewares {
            self.defaults.clone()
        } else {
            Vec::new()
        };
        chain.extend(middlewares);

        let mut route = Route::new(method, pattern, handler)?.with_middlewares(chain);
        if let Some(cors) = cors {
            route = route.with_cors(cors.resolve()?);
        }
        if let Some(sse) = sse {
            route = route.with_sse(sse);
        }

        crate::startup!(
            "Added {} endpoint for {} ({} middleware{}{})",
            route.method(),
            route.pattern(),
            route.middlewares().len(),
            if route.cors().is_some() { ", cors" } else { "" },
            if route.is_sse() { ", sse" } else { "" },
        );
        self.table.register(route);
        Ok(self)
    }

    pub fn healthcheck(&self, probe: Arc<dyn HealthProbe>) {
        self.health.register(probe);
    }

    pub fn health_registry(&self) -> Arc<HealthRegistry> {
        self.health.clone()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.table
    }

    /// Dispatches one request inside its own request span.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let request_id = Uuid::new_v4().to_string();
        let span = create_request_span(
            request.method().as_str(),
            request.uri().path(),
            &request_id,
        );
        let started = Instant::now();

        let response = self.route(request).instrument(span.clone()).await;

        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", started.elapsed().as_millis() as u64);
        response
    }

    async fn route(&self, request: Request<Body>) -> Response<Body> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let Some(RouteMatch { route, params }) = self.table.resolve(&method, &path) else {
            if method == Method::OPTIONS {
                return self.preflight(request.headers(), &path);
            }
            return status_only(StatusCode::NOT_FOUND);
        };

        let (parts, body) = request.into_parts();
        let url = match RequestContext::url_from_parts(&parts, self.secure) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Rejecting request with unusable URL: {}", e);
                return status_only(StatusCode::BAD_REQUEST);
            }
        };

        let mut req = HttpRequest::from_parts(parts, body);
        let mut res = HttpResponse::new();
        let mut ctx = RequestContext::new(url, params);

        if let Some(cors) = route.cors() {
            cors.apply_actual(req.headers().get(header::ORIGIN), res.headers_mut());
        }

        if route.is_sse() {
            return serve_stream(route, req, res, ctx).await;
        }

        invoke(
            route.middlewares(),
            route.endpoint(),
            &mut req,
            &mut res,
            &mut ctx,
        )
        .await;

        res.into_response()
    }

    fn preflight(&self, headers: &HeaderMap, path: &str) -> Response<Body> {
        let origin = headers.get(header::ORIGIN);
        let requested = headers
            .get(header::ACCESS_CONTROL_REQUEST_METHOD)
            .and_then(|value| Method::from_bytes(value.as_bytes()).ok());

        let (Some(origin), Some(requested)) = (origin, requested) else {
            return status_only(StatusCode::BAD_REQUEST);
        };
        let Some(matched) = self.table.resolve(&requested, path) else {
            return status_only(StatusCode::NOT_FOUND);
        };

        let mut res = HttpResponse::new();
        res.set_status(StatusCode::NO_CONTENT);
        if let Some(cors) = matched.route.cors() {
            cors.apply_preflight(origin, headers, res.headers_mut());
        }
        res.into_response()
    }

    /// Wraps the engine into an axum router that sends every request here.
    pub fn into_router(self) -> Router {
        let dispatcher = Arc::new(self);
        Router::new().fallback(move |request: Request<Body>| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(request).await }
        })
    }
}

/// Runs an SSE route's chain on its own task and answers as soon as the
/// event stream is attached. A chain that fails before that point answers
/// with its regular response. After-hooks of middleware cannot change a
/// stream that has already started.
async fn serve_stream(
    route: &Route,
    mut req: HttpRequest,
    mut res: HttpResponse,
    mut ctx: RequestContext,
) -> Response<Body> {
    let (head_tx, head_rx) = oneshot::channel();
    ctx.set_stream_head(head_tx);

    let middlewares = route.middlewares().to_vec();
    let endpoint = route.endpoint().clone();
    tokio::spawn(
        async move {
            invoke(&middlewares, &endpoint, &mut req, &mut res, &mut ctx).await;
            if let Some(head) = ctx.take_stream_head() {
                let _ = head.send(res.into_response());
            }
        }
        .instrument(tracing::Span::current()),
    );

    match head_rx.await {
        Ok(response) => response,
        Err(_) => {
            tracing::error!("SSE route task ended without a response");
            status_only(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut res = HttpResponse::new();
    res.set_status(status);
    res.into_response()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use eyre::Result;

    use super::*;

    struct Ok200;

    #[async_trait]
    impl Handler for Ok200 {
        async fn call(
            &self,
            _req: &mut HttpRequest,
            res: &mut HttpResponse,
            ctx: &mut RequestContext,
        ) -> Result<()> {
            res.set_text(format!("id={}", ctx.param("id").unwrap_or("-")));
            Ok(())
        }
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck_is_registered_first() {
        let dispatcher = Dispatcher::new(HealthcheckSettings::default(), Vec::new()).unwrap();
        let first = &dispatcher.routes().routes(&Method::GET)[0];
        assert_eq!(first.pattern(), "/healthcheck");
        assert!(first.middlewares().is_empty());

        let response = dispatcher
            .dispatch(request(Method::GET, "/healthcheck"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method_are_not_found() {
        let mut dispatcher = Dispatcher::new(HealthcheckSettings::default(), Vec::new()).unwrap();
        dispatcher
            .endpoint(Method::GET, "/users/:id", Arc::new(Ok200), EndpointOptions::new())
            .unwrap();

        let response = dispatcher.dispatch(request(Method::GET, "/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = dispatcher.dispatch(request(Method::DELETE, "/users/1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = dispatcher.dispatch(request(Method::GET, "/users/1")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_options_without_headers_is_bad_request() {
        let dispatcher = Dispatcher::new(HealthcheckSettings::default(), Vec::new()).unwrap();
        let response = dispatcher
            .dispatch(request(Method::OPTIONS, "/healthcheck"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_registration_is_an_error() {
        let mut dispatcher = Dispatcher::new(HealthcheckSettings::default(), Vec::new()).unwrap();
        assert!(
            dispatcher
                .endpoint(Method::TRACE, "/x", Arc::new(Ok200), EndpointOptions::new())
                .is_err()
        );
        assert!(
            dispatcher
                .endpoint(Method::GET, "x", Arc::new(Ok200), EndpointOptions::new())
                .is_err()
        );
        assert!(
            Dispatcher::new(
                HealthcheckSettings {
                    path: "health".to_string(),
                    ..HealthcheckSettings::default()
                },
                Vec::new()
            )
            .is_err()
        );
    }
}
