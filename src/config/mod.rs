pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigError, ConfigOptions, ConfigResolver, load_http_config, load_log_config};
pub use models::*;
pub use validation::{HttpConfigValidator, ValidationError, ValidationResult};
