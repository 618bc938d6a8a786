//! appsh - an application shell for small HTTP services.
//!
//! appsh bundles the pieces most services rewrite every time: a request
//! dispatch engine, a configuration resolver and a process lifecycle owner.
//!
//! # Features
//! - Path patterns with `:name` parameters and `*rest` wildcards, first
//!   registered route wins
//! - Continuation-style middleware chains with built-in body, JSON and
//!   request timing middleware
//! - Per-route CORS with automatic preflight handling
//! - Server-sent events with retry hints and heartbeats
//! - A healthcheck route backed by pluggable probes
//! - Configuration from command line flags, environment and `.env` files
//! - Ordered shutdown of servers, hooks and plugins on SIGINT/SIGTERM
//!
//! # Quick Example
//! ```no_run
//! use appsh::{
//!     EndpointOptions, Shell,
//!     adapters::sync_handler,
//!     config::{HttpConfig, ShellConfig},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut shell = Shell::new(ShellConfig::new("hello", "1.0.0"))?;
//!
//! let mut server = shell.http_server(&HttpConfig::default())?;
//! server.get(
//!     "/hello/:name",
//!     sync_handler(|_req, res, ctx| {
//!         res.set_text(format!("hello {}", ctx.param("name").unwrap_or("world")));
//!         Ok(())
//!     }),
//!     EndpointOptions::new(),
//! )?;
//! shell.serve(server).await?;
//!
//! std::process::exit(shell.run().await);
//! # }
//! ```
//!
//! # Architecture
//! Traits live in `ports`, the engine in `core` and the pieces that touch
//! sockets or closures in `adapters`. Prefer the re-exports below.
//!
//! # Error Handling
//! Handlers and middleware return `eyre::Result<()>`. Returning an
//! [`HttpError`] answers with its status and message; any other error is
//! logged and answered with a plain 500.
pub mod adapters;
pub mod config;
pub mod core;
pub mod ports;
pub mod shell;
pub mod tracing_setup;
pub mod utils;

#[doc(hidden)]
pub use tracing;

pub use crate::{
    adapters::{HttpServer, ServerHandle},
    core::{
        CorsOptions, Dispatcher, EndpointOptions, HttpError, HttpRequest, HttpResponse, Next,
        RequestContext, SendOptions, SseOptions, SseSession,
    },
    ports::{Handler, HealthProbe, Middleware, Plugin, SchemaValidator},
    shell::Shell,
    utils::GracefulShutdown,
};
