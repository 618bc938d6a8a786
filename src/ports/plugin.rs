use async_trait::async_trait;
use eyre::Result;

/// Plugin defines the port for components whose shutdown the shell sequences
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once during exit, in reverse registration order.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
