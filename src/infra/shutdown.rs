//! Cooperative shutdown for background workers.
//!
//! The VDF append workers, the anchor drain worker and the sweeper all run
//! until the shared signal fires; the server initiates it on SIGTERM/Ctrl+C
//! and the HTTP listener drains through axum's graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::Notify;
use tracing::info;

/// Cloneable shutdown signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is initiated.
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Owns the shutdown state; hands out signals to workers.
pub struct ShutdownCoordinator {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            shutdown: self.shutdown.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Initiate shutdown; idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Initiating graceful shutdown");
        self.notify.notify_waiters();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Run a task until it finishes or the signal fires.
pub fn spawn_until_shutdown<F>(signal: ShutdownSignal, task: F) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = signal.wait() => {
                info!("Task stopped due to shutdown signal");
            }
            _ = task => {}
        }
    })
}
