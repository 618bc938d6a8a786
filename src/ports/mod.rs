pub mod endpoint;
pub mod health_probe;
pub mod plugin;
pub mod validator;

pub use endpoint::{Handler, Middleware};
pub use health_probe::HealthProbe;
pub use plugin::Plugin;
pub use validator::SchemaValidator;
