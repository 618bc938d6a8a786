use std::{collections::HashMap, sync::Arc};

use http::Method;

use crate::{
    core::{
        cors::CorsPolicy, error::EngineError, invoker::RouteEndpoint, path_matcher::PathPattern,
        sse::SseOptions,
    },
    ports::endpoint::{Handler, Middleware},
};

/// Methods a route may be registered for.
pub const SUPPORTED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// A registered endpoint. Immutable once inserted into a [`RouteTable`].
pub struct Route {
    method: Method,
    pattern: PathPattern,
    endpoint: RouteEndpoint,
    middlewares: Vec<Arc<dyn Middleware>>,
    cors: Option<CorsPolicy>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("middlewares", &self.middlewares.len())
            .field("cors", &self.cors.is_some())
            .field("sse", &self.endpoint.is_sse())
            .finish()
    }
}

impl Route {
    pub fn new(method: Method, pattern: &str, handler: Arc<dyn Handler>) -> Result<Self, EngineError> {
        if !SUPPORTED_METHODS.contains(&method) {
            return Err(EngineError::UnsupportedMethod(method));
        }
        Ok(Self {
            method,
            pattern: PathPattern::compile(pattern)?,
            endpoint: RouteEndpoint::new(handler),
            middlewares: Vec::new(),
            cors: None,
        })
    }

    pub fn with_middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares;
        self
    }

    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn with_sse(mut self, options: SseOptions) -> Self {
        self.endpoint = self.endpoint.with_sse(options);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    pub fn cors(&self) -> Option<&CorsPolicy> {
        self.cors.as_ref()
    }

    pub fn endpoint(&self) -> &RouteEndpoint {
        &self.endpoint
    }

    pub fn is_sse(&self) -> bool {
        self.endpoint.is_sse()
    }
}

/// A resolved route together with its decoded path parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
}

/// Per-method route lists, searched in registration order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route; an equal method and pattern registered earlier keeps
    /// precedence.
    pub fn register(&mut self, route: Route) {
        tracing::debug!(method = %route.method, pattern = route.pattern(), "Registered route");
        self.routes
            .entry(route.method.clone())
            .or_default()
            .push(route);
    }

    /// First route for `method` whose pattern matches `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.get(method)?.iter().find_map(|route| {
            route
                .pattern
                .matches(path)
                .map(|params| RouteMatch { route, params })
        })
    }

    pub fn routes(&self, method: &Method) -> &[Route] {
        self.routes.get(method).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use eyre::Result;

    use super::*;
    use crate::core::{context::RequestContext, request::HttpRequest, response::HttpResponse};

    struct Named(&'static str);

    #[async_trait]
    impl Handler for Named {
        async fn call(
            &self,
            _req: &mut HttpRequest,
            res: &mut HttpResponse,
            _ctx: &mut RequestContext,
        ) -> Result<()> {
            res.set_text(self.0);
            Ok(())
        }
    }

    fn route(method: Method, pattern: &str) -> Route {
        Route::new(method, pattern, Arc::new(Named("h"))).unwrap()
    }

    #[test]
    fn test_first_registered_route_wins() {
        let mut table = RouteTable::new();
        table.register(route(Method::GET, "/items/:id"));
        table.register(route(Method::GET, "/items/special"));

        let matched = table.resolve(&Method::GET, "/items/special").unwrap();
        assert_eq!(matched.route.pattern(), "/items/:id");
        assert_eq!(matched.params["id"], "special");
    }

    #[test]
    fn test_duplicates_are_additive() {
        let mut table = RouteTable::new();
        table.register(route(Method::GET, "/a"));
        table.register(route(Method::GET, "/a"));
        assert_eq!(table.routes(&Method::GET).len(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_methods_are_separate() {
        let mut table = RouteTable::new();
        table.register(route(Method::POST, "/a"));
        assert!(table.resolve(&Method::GET, "/a").is_none());
        assert!(table.resolve(&Method::POST, "/a").is_some());
        assert!(table.resolve(&Method::HEAD, "/a").is_none());
        assert!(table.routes(&Method::PUT).is_empty());
    }

    #[test]
    fn test_unsupported_method_is_rejected() {
        let err = Route::new(Method::HEAD, "/a", Arc::new(Named("h"))).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedMethod(m) if m == Method::HEAD));
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let err = Route::new(Method::GET, "/a/:", Arc::new(Named("h"))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }
}
