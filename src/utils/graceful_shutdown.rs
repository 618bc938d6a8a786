use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Why the process is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code, e.g. by an admin endpoint
    Requested,
    /// Triggered after an unrecoverable error such as a caught panic
    Failure,
}

/// Listens for termination signals and fans the first one out to subscribers.
///
/// Only the first signal or trigger counts; later ones are ignored.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    reason: OnceLock<ShutdownReason>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            reason: OnceLock::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// What started the shutdown, once it has started
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Start shutdown from code instead of a signal
    pub fn trigger_shutdown(&self) {
        self.initiate_shutdown(ShutdownReason::Requested);
    }

    /// Start shutdown from code with an explicit reason
    pub fn trigger(&self, reason: ShutdownReason) {
        self.initiate_shutdown(reason);
    }

    /// Wait for SIGINT or SIGTERM and broadcast it.
    ///
    /// Returns early, without waiting for a signal, once shutdown was
    /// triggered some other way.
    pub async fn run_signal_handler(&self) -> Result<()> {
        let mut token = self.shutdown_token();
        if token.is_shutdown_initiated() {
            return Ok(());
        }
        let terminate = terminate_signal()?;

        tracing::debug!("Signal handler started, listening for SIGINT and SIGTERM");
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                crate::shutdown!("Received SIGINT, shutting down");
                self.initiate_shutdown(ShutdownReason::Interrupt);
            }
            _ = terminate => {
                crate::shutdown!("Received SIGTERM, shutting down");
                self.initiate_shutdown(ShutdownReason::Terminate);
            }
            _ = token.wait_for_shutdown() => {}
        }
        Ok(())
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            self.shutdown_initiated.store(true, Ordering::Release);
            tracing::debug!("Processing shutdown signal: {:?}", reason);
            // No receivers is fine; late subscribers check the flag.
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// A token that can be moved into tasks that need to stop on shutdown
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn terminate_signal() -> Result<impl std::future::Future<Output = ()>> {
    use eyre::WrapErr;
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    Ok(async move {
        sigterm.recv().await;
    })
}

#[cfg(not(unix))]
fn terminate_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(std::future::pending::<()>())
}

pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Non-blocking check
    pub fn try_shutdown(&mut self) -> Option<ShutdownReason> {
        match self.receiver.try_recv() {
            Ok(reason) => Some(reason),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(_) => Some(ShutdownReason::Requested),
        }
    }

    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        if let Some(reason) = self.try_shutdown() {
            return reason;
        }
        if self.is_shutdown_initiated() {
            return ShutdownReason::Requested;
        }
        self.receiver
            .recv()
            .await
            .unwrap_or(ShutdownReason::Requested)
    }
}
