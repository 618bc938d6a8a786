//! Process lifecycle: logging setup, managed servers, plugins and an
//! ordered exit.
use std::{future::Future, net::SocketAddr, str::FromStr, sync::Arc};

use eyre::Result;
use futures_util::future::BoxFuture;

use crate::{
    adapters::http_server::{HttpServer, ServerHandle},
    config::{
        ConfigError, ConfigResolver,
        loader::{APP_ENV, load_log_config},
        models::{HttpConfig, ShellConfig},
    },
    ports::{endpoint::Middleware, plugin::Plugin},
    tracing_setup::{LogLevel, init_logging, set_log_level},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason},
};

type ExitHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

pub struct Shell {
    config: ShellConfig,
    resolver: ConfigResolver,
    servers: Vec<ServerHandle>,
    plugins: Vec<Arc<dyn Plugin>>,
    stop: Option<ExitHook>,
    finally: Option<ExitHook>,
    shutdown: Arc<GracefulShutdown>,
}

impl Shell {
    /// Sets up logging from the process arguments and environment.
    pub fn new(config: ShellConfig) -> Result<Self> {
        Self::with_resolver(config, ConfigResolver::from_env()?)
    }

    pub fn with_resolver(config: ShellConfig, resolver: ConfigResolver) -> Result<Self> {
        let log = load_log_config(&resolver, &config.log)?;
        init_logging(&log)?;

        crate::startup!("{} v{} starting", config.app_name, config.app_version);
        crate::startup!("Using {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let app_env = resolver.get_string(APP_ENV, Some("development"))?;
        crate::startup!("Running in {} mode", app_env);

        let shutdown = Arc::new(GracefulShutdown::new());
        if config.catch_panics {
            crate::startup!("Catching panics (exit on panic: {})", config.exit_on_panic);
            install_panic_hook(shutdown.clone(), config.exit_on_panic);
        }

        Ok(Self {
            config,
            resolver,
            servers: Vec::new(),
            plugins: Vec::new(),
            stop: None,
            finally: None,
            shutdown,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn get_string(&self, key: &str, default: Option<&str>) -> Result<String, ConfigError> {
        self.resolver.get_string(key, default)
    }

    pub fn get_bool(&self, key: &str, default: Option<bool>) -> Result<bool, ConfigError> {
        self.resolver.get_bool(key, default)
    }

    pub fn get_number<T>(&self, key: &str, default: Option<T>) -> Result<T, ConfigError>
    where
        T: FromStr + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        self.resolver.get_number(key, default)
    }

    /// Changes the verbosity of the running logger.
    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        set_log_level(level)
    }

    /// A server configured from this shell's resolver, with `base` supplying
    /// the defaults.
    pub fn http_server(&self, base: &HttpConfig) -> Result<HttpServer> {
        self.http_server_with(base, Vec::new())
    }

    pub fn http_server_with(
        &self,
        base: &HttpConfig,
        default_middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Result<HttpServer> {
        HttpServer::new(&self.resolver, base, default_middlewares)
    }

    /// Starts `server` and stops it again on exit.
    pub async fn serve(&mut self, server: HttpServer) -> Result<SocketAddr> {
        let handle = server.start().await?;
        let addr = handle.local_addr();
        self.manage(handle);
        Ok(addr)
    }

    pub fn manage(&mut self, handle: ServerHandle) {
        self.servers.push(handle);
    }

    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        crate::startup!("Added plugin {} v{}", plugin.name(), plugin.version());
        self.plugins.push(plugin);
    }

    /// The application's own stop step. Runs once during exit, right after
    /// the servers stop.
    pub fn on_stop<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stop = Some(Box::new(move || Box::pin(hook())));
    }

    /// Runs once during exit, after the application stop step and before the
    /// plugins.
    pub fn finally<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.finally = Some(Box::new(move || Box::pin(hook())));
    }

    /// Lets code outside the shell end [`Shell::run`].
    pub fn shutdown_handle(&self) -> Arc<GracefulShutdown> {
        self.shutdown.clone()
    }

    /// Waits for SIGINT, SIGTERM or a triggered shutdown, then exits.
    ///
    /// The exit code is 1 when signal handling fails or the shutdown was
    /// triggered with [`ShutdownReason::Failure`], 0 otherwise.
    pub async fn run(self) -> i32 {
        crate::startup!("Started {}", self.config.app_name);
        let code = match self.shutdown.run_signal_handler().await {
            Ok(()) if self.shutdown.reason() == Some(ShutdownReason::Failure) => 1,
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("Signal handling failed: {:?}", e);
                1
            }
        };
        self.exit(code).await
    }

    /// Exits after an unrecoverable error.
    pub async fn shutdown_error(self, code: i32) -> i32 {
        tracing::error!("Unrecoverable error, shutting down now");
        self.exit(code).await
    }

    /// Stops the servers, runs the application stop step and the finally
    /// hook, then stops the plugins in reverse order. Failures are logged and
    /// do not interrupt the sequence.
    pub async fn exit(mut self, code: i32) -> i32 {
        crate::shutdown!("Exiting with code {}", code);

        for server in self.servers.drain(..) {
            if let Err(e) = server.stop().await {
                tracing::error!("Error stopping HTTP server: {:?}", e);
            }
        }

        crate::shutdown!("Stopping the application");
        if let Some(hook) = self.stop.take() {
            if let Err(e) = hook().await {
                tracing::error!("Application stop failed: {:?}", e);
            }
        }
        crate::shutdown!("Stopped!");

        if let Some(hook) = self.finally.take() {
            crate::shutdown!("Running finally hook");
            if let Err(e) = hook().await {
                tracing::error!("Finally hook failed: {:?}", e);
            }
        }

        for plugin in self.plugins.iter().rev() {
            crate::shutdown!("Stopping plugin {}", plugin.name());
            if let Err(e) = plugin.stop().await {
                tracing::error!("Error stopping plugin {}: {:?}", plugin.name(), e);
            }
        }

        crate::shutdown!("So long and thanks for all the fish!");
        code
    }
}

/// Routes panics to the shell's logger. The hook sees every panic, including
/// ones a request handler recovers from.
fn install_panic_hook(shutdown: Arc<GracefulShutdown>, exit_on_panic: bool) {
    std::panic::set_hook(Box::new(move |info| {
        report_panic(&shutdown, &info.to_string(), exit_on_panic);
    }));
}

fn report_panic(shutdown: &GracefulShutdown, message: &str, exit_on_panic: bool) {
    tracing::error!("Caught unhandled panic: {}", message);
    if exit_on_panic {
        tracing::error!("Shutting down because of unhandled panic");
        shutdown.trigger(ShutdownReason::Failure);
    }
}
