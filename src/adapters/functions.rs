//! Closure adapters for the endpoint, middleware and probe ports.
//!
//! Async closures that borrow the request need to box their future:
//!
//! ```ignore
//! let hello = handler_fn(|_req, res, ctx| {
//!     Box::pin(async move {
//!         res.set_text(format!("hello {}", ctx.param("name").unwrap_or("world")));
//!         Ok(())
//!     })
//! });
//! ```
use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use eyre::Result;
use futures_util::future::BoxFuture;

use crate::{
    core::{
        chain::Next, context::RequestContext, request::HttpRequest, response::HttpResponse,
    },
    ports::{
        endpoint::{Handler, Middleware},
        health_probe::HealthProbe,
    },
};

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(
            &'a mut HttpRequest,
            &'a mut HttpResponse,
            &'a mut RequestContext,
        ) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    async fn call(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        (self.0)(req, res, ctx).await
    }
}

pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(
            &'a mut HttpRequest,
            &'a mut HttpResponse,
            &'a mut RequestContext,
        ) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

struct SyncHandler<F>(F);

#[async_trait]
impl<F> Handler for SyncHandler<F>
where
    F: Fn(&mut HttpRequest, &mut HttpResponse, &mut RequestContext) -> Result<()>
        + Send
        + Sync
        + 'static,
{
    async fn call(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        (self.0)(req, res, ctx)
    }
}

/// Wraps a handler that never awaits.
pub fn sync_handler<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&mut HttpRequest, &mut HttpResponse, &mut RequestContext) -> Result<()>
        + Send
        + Sync
        + 'static,
{
    Arc::new(SyncHandler(f))
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(
            &'a mut HttpRequest,
            &'a mut HttpResponse,
            &'a mut RequestContext,
            Next<'a>,
        ) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        (self.0)(req, res, ctx, next).await
    }
}

pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: for<'a> Fn(
            &'a mut HttpRequest,
            &'a mut HttpResponse,
            &'a mut RequestContext,
            Next<'a>,
        ) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnMiddleware(f))
}

struct FnProbe<F>(F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn check(&self) -> Result<bool> {
        (self.0)().await
    }
}

pub fn probe_fn<F, Fut>(f: F) -> Arc<dyn HealthProbe>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(FnProbe(f))
}
