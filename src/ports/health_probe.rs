use async_trait::async_trait;
use eyre::Result;

/// HealthProbe defines the port for one component of the aggregate healthcheck
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Returns `Ok(true)` when the component is healthy. An error counts as
    /// unhealthy and is logged by the caller.
    async fn check(&self) -> Result<bool>;
}
