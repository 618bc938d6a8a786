use async_trait::async_trait;
use eyre::Result;

use crate::core::{
    chain::Next, context::RequestContext, request::HttpRequest, response::HttpResponse,
};

/// Handler defines the port for the terminal step of a route
///
/// Returning an [`HttpError`](crate::core::error::HttpError) inside the
/// `eyre::Report` sends its status and message to the client verbatim; any
/// other error becomes a logged 500.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
    ) -> Result<()>;
}

/// Middleware defines the port for one link of a route's chain
///
/// Call `next.run(req, res, ctx)` to continue down the chain; returning
/// without calling it halts the request with whatever `res` holds.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()>;
}
