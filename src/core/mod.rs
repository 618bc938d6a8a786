pub mod chain;
pub mod context;
pub mod cors;
pub mod dispatcher;
pub mod error;
pub mod healthcheck;
pub mod invoker;
pub mod path_matcher;
pub mod request;
pub mod response;
pub mod route_table;
pub mod sse;

pub use chain::Next;
pub use context::RequestContext;
pub use cors::{AllowList, CorsOptions, CorsPolicy};
pub use dispatcher::{Dispatcher, EndpointOptions, HealthcheckSettings};
pub use error::{EngineError, HttpError};
pub use healthcheck::HealthRegistry;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use route_table::{Route, RouteTable};
pub use sse::{SendOptions, SseError, SseOptions, SseSession};
