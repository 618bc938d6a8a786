//! The listening side of the engine: binds a socket, optionally wraps it in
//! TLS and serves a [`Dispatcher`] through `axum::serve`.
use std::{fs::File, io::BufReader, net::SocketAddr, sync::Arc, time::Duration};

use axum::serve::{Listener, ListenerExt};
use eyre::{Result, WrapErr, eyre};
use futures_util::StreamExt;
use http::Method;
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use tls_listener::TlsListener;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{
        ConfigResolver, HttpConfigValidator,
        loader::{
            HTTP_HEALTHCHECK_BAD_RES, HTTP_HEALTHCHECK_GOOD_RES, load_http_config, status_code,
        },
        models::HttpConfig,
    },
    core::{
        dispatcher::{Dispatcher, EndpointOptions, HealthcheckSettings},
        error::EngineError,
    },
    ports::{
        endpoint::{Handler, Middleware},
        health_probe::HealthProbe,
    },
};

/// Adapts a stream of accepted connections to axum's [`Listener`].
struct AxumListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for AxumListener<S>
where
    S: futures_util::Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) => tracing::debug!("TLS accept error: {}", e),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// One HTTP(S) server: its resolved settings plus the routes it serves.
///
/// Everything that can be misconfigured (bind address, healthcheck,
/// certificates) is checked in the constructor, before anything listens.
pub struct HttpServer {
    config: HttpConfig,
    dispatcher: Dispatcher,
    tls: Option<Arc<ServerConfig>>,
}

impl HttpServer {
    /// Resolves the `HTTP_*` keys over `base` and builds the server.
    pub fn new(
        resolver: &ConfigResolver,
        base: &HttpConfig,
        default_middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Result<Self> {
        let config = load_http_config(resolver, base)?;
        Self::from_config(config, default_middlewares)
    }

    /// Builds the server from an already-resolved configuration.
    pub fn from_config(
        config: HttpConfig,
        default_middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Result<Self> {
        HttpConfigValidator::validate(&config)?;

        let health = HealthcheckSettings {
            path: config.healthcheck_path.clone(),
            good: status_code(HTTP_HEALTHCHECK_GOOD_RES, config.healthcheck_good_res)?,
            bad: status_code(HTTP_HEALTHCHECK_BAD_RES, config.healthcheck_bad_res)?,
        };
        let mut dispatcher = Dispatcher::new(health, default_middlewares)?;

        let tls = if config.enable_https {
            dispatcher.set_secure(true);
            Some(Arc::new(load_tls_config(&config)?))
        } else {
            None
        };

        Ok(Self {
            config,
            dispatcher,
            tls,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn endpoint(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        self.dispatcher.endpoint(method, pattern, handler, options)?;
        Ok(self)
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        self.endpoint(Method::GET, pattern, handler, options)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        self.endpoint(Method::POST, pattern, handler, options)
    }

    pub fn put(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        self.endpoint(Method::PUT, pattern, handler, options)
    }

    pub fn patch(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        self.endpoint(Method::PATCH, pattern, handler, options)
    }

    pub fn delete(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        options: EndpointOptions,
    ) -> Result<&mut Self, EngineError> {
        self.endpoint(Method::DELETE, pattern, handler, options)
    }

    pub fn healthcheck(&self, probe: Arc<dyn HealthProbe>) {
        self.dispatcher.healthcheck(probe);
    }

    /// Binds the socket and starts serving in a background task.
    pub async fn start(self) -> Result<ServerHandle> {
        let Self {
            config,
            dispatcher,
            tls,
        } = self;

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .wrap_err_with(|| format!("Failed to bind to {address}"))?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to get local addr")?;

        let router = dispatcher.into_router();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone().cancelled_owned();

        let join = match tls {
            Some(tls) => {
                crate::startup!("Listening on https://{}", local_addr);
                let acceptor = tokio_rustls::TlsAcceptor::from(tls);
                let listener = AxumListener {
                    stream: TlsListener::new(acceptor, listener),
                    local_addr,
                }
                .tap_io(|tls| {
                    if let Err(e) = tls.get_ref().0.set_nodelay(true) {
                        tracing::trace!("Failed to set TCP_NODELAY: {}", e);
                    }
                });
                tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                })
            }
            None => {
                crate::startup!("Listening on http://{}", local_addr);
                let listener = listener.tap_io(|tcp| {
                    if let Err(e) = tcp.set_nodelay(true) {
                        tracing::trace!("Failed to set TCP_NODELAY: {}", e);
                    }
                });
                tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                })
            }
        };

        Ok(ServerHandle {
            local_addr,
            cancel,
            join,
            drain_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        })
    }
}

/// Handle to a running server, returned by [`HttpServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    join: JoinHandle<std::io::Result<()>>,
    drain_timeout: Duration,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stops accepting connections and waits for in-flight requests to
    /// finish, for at most the configured shutdown timeout.
    pub async fn stop(mut self) -> Result<()> {
        crate::shutdown!("Stopping HTTP server on {}", self.local_addr);
        self.cancel.cancel();

        match tokio::time::timeout(self.drain_timeout, &mut self.join).await {
            Ok(Ok(result)) => result.wrap_err("HTTP server failed"),
            Ok(Err(e)) => Err(eyre!("HTTP server task failed: {e}")),
            Err(_) => {
                tracing::warn!(
                    "HTTP server on {} did not drain within {:?}, aborting",
                    self.local_addr,
                    self.drain_timeout
                );
                self.join.abort();
                Ok(())
            }
        }
    }
}

/// Loads the PEM certificate chain and PKCS#8 key named in `config`.
fn load_tls_config(config: &HttpConfig) -> Result<ServerConfig> {
    let (Some(key_path), Some(cert_path)) = (&config.key_file, &config.cert_file) else {
        return Err(eyre!("HTTPS is enabled but the key or cert file is not set"));
    };

    install_crypto_provider();

    let cert_file = &mut BufReader::new(
        File::open(cert_path).wrap_err_with(|| format!("Failed to open cert file {cert_path}"))?,
    );
    let key_file = &mut BufReader::new(
        File::open(key_path).wrap_err_with(|| format!("Failed to open key file {key_path}"))?,
    );

    let cert_chain = certs(cert_file)
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("Failed to parse cert file")?;
    if cert_chain.is_empty() {
        return Err(eyre!("No certificates found in {cert_path}"));
    }
    let key = pkcs8_private_keys(key_file)
        .next()
        .transpose()
        .wrap_err("Failed to parse key file")?
        .ok_or_else(|| eyre!("No PKCS#8 private key found in key file"))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .wrap_err("Invalid certificate or key")
}

fn install_crypto_provider() {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if rustls::crypto::CryptoProvider::install_default(provider).is_err() {
        tracing::debug!("A rustls crypto provider is already installed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn local() -> HttpConfig {
        HttpConfig::builder().network_port(0).build()
    }

    #[test]
    fn test_invalid_config_fails_before_listening() {
        let config = HttpConfig {
            network_interface: "not-an-ip".to_string(),
            ..local()
        };
        let err = HttpServer::from_config(config, Vec::new())
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("not-an-ip"), "{err}");
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let mut server = HttpServer::from_config(local(), Vec::new()).unwrap();
        let handler = crate::adapters::functions::sync_handler(|_, _, _| Ok(()));
        assert!(
            server
                .get("/files/*rest/more", handler, EndpointOptions::new())
                .is_err()
        );
    }

    #[test]
    fn test_garbage_certificate_is_config_error() {
        let mut key = NamedTempFile::new().unwrap();
        let mut cert = NamedTempFile::new().unwrap();
        writeln!(key, "not a key").unwrap();
        writeln!(cert, "not a cert").unwrap();

        let config = HttpConfig::builder()
            .network_port(0)
            .https(
                key.path().to_string_lossy(),
                cert.path().to_string_lossy(),
            )
            .build();
        assert!(HttpServer::from_config(config, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = HttpServer::from_config(local(), Vec::new()).unwrap();
        let handle = server.start().await.unwrap();

        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.is_running());
        handle.stop().await.unwrap();
    }
}
