use std::sync::Arc;

use eyre::Result;

use crate::{
    core::{context::RequestContext, request::HttpRequest, response::HttpResponse},
    ports::endpoint::{Handler, Middleware},
};

/// The continuation handed to each middleware.
///
/// Holds the not-yet-run tail of the chain plus the terminal endpoint.
/// Consumed by [`Next::run`], so a middleware can continue at most once.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Handler) -> Self {
        Self {
            middlewares,
            endpoint,
        }
    }

    /// Number of middleware still ahead of the endpoint.
    pub fn remaining(&self) -> usize {
        self.middlewares.len()
    }

    pub async fn run(
        self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
        ctx: &mut RequestContext,
    ) -> Result<()> {
        match self.middlewares.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    middlewares: rest,
                    endpoint: self.endpoint,
                };
                current.handle(req, res, ctx, next).await
            }
            None => self.endpoint.call(req, res, ctx).await,
        }
    }
}
