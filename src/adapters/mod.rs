pub mod functions;
pub mod http_server;
pub mod middleware;

pub use functions::{handler_fn, middleware_fn, probe_fn, sync_handler};
pub use http_server::{HttpServer, ServerHandle};
pub use middleware::{BodyOptions, JsonOptions, Schema, body, json, request_timing};
