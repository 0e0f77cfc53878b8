//! Single-threaded runtime for supervising node processes

use rendezvous_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tracing::info;

/// Shutdown flag receiver; the flag never goes back to `false`
pub type ShutdownReceiver = watch::Receiver<bool>;

/// Cloneable handle that cancels launches from another thread.
///
/// The request is sticky: launches started after it was made are cancelled
/// before they spawn anything.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask every running and future launch to kill and reap its node processes
    pub fn shutdown(&self) {
        if !self.tx.send_replace(true) {
            info!("Launch shutdown requested");
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownReceiver {
        self.tx.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once shutdown was requested, immediately if it already was
pub async fn shutdown_requested(rx: &mut ShutdownReceiver) {
    if rx.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Owns the current-thread Tokio runtime used to spawn and join node processes
pub struct LaunchRuntime {
    /// Tokio runtime
    runtime: Option<Runtime>,

    /// Shared shutdown flag
    shutdown: ShutdownHandle,

    /// How long to wait for tasks on drop
    shutdown_grace: Duration,
}

impl LaunchRuntime {
    /// Create a new launch runtime with its own shutdown handle
    pub fn new(shutdown_grace: Duration) -> Result<Self> {
        Self::with_shutdown(shutdown_grace, ShutdownHandle::new())
    }

    /// Create a launch runtime cancelled through an existing handle
    pub fn with_shutdown(shutdown_grace: Duration, shutdown: ShutdownHandle) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to build Tokio runtime: {}", e),
            })?;

        Ok(Self {
            runtime: Some(runtime),
            shutdown,
            shutdown_grace,
        })
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or_else(|| Error::Internal {
            message: "launch runtime already shut down".to_string(),
        })
    }

    /// Handle for cancelling launches from outside the runtime
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> ShutdownReceiver {
        self.shutdown.subscribe()
    }

    /// Block on a future until completion
    pub fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output> {
        Ok(self.runtime()?.block_on(future))
    }
}

impl Drop for LaunchRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.shutdown_grace);
        }
    }
}
