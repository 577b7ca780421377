//! Scrawl relay server
//!
//! Keeps the ordered history of stroke events for one shared drawing board
//! and relays every message to every connected client, the sender included.
//!
//! ## Protocol
//!
//! Text frames carrying JSON:
//! ```json
//! { "type": "draw", "action": "start", "x": 10, "y": 10, "color": "#000000", "lineWidth": 5 }
//! { "type": "clear" }
//! { "type": "init", "history": [ ... ] }
//! ```
//! `init` is sent by the server only, once, as the first message on a new
//! connection.

pub mod config;
pub mod history;
pub mod relay;
pub mod routes;
pub mod storage;

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use config::{Args, HistoryBackend, RelayConfig};
pub use history::EventLog;
pub use relay::{Relay, RelayError, RelayHandle, RelayStats};
pub use storage::{FileStorage, HistoryStorage, MemoryStorage, StorageError};

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound relay server.
pub struct Server {
    listener: TcpListener,
    relay: RelayHandle,
    relay_task: JoinHandle<()>,
    config: RelayConfig,
}

impl Server {
    /// Load the history, start the relay and bind the listener.
    pub async fn bind(config: RelayConfig) -> Result<Self, ServerError> {
        let storage = config.open_storage()?;
        let log = EventLog::open(storage, config.save_debounce);
        let (relay, relay_task) = Relay::new(log).spawn();
        let listener = TcpListener::bind(config.addr).await?;
        Ok(Self {
            listener,
            relay,
            relay_task,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn relay(&self) -> RelayHandle {
        self.relay.clone()
    }

    /// Serve until `shutdown` resolves, then stop the relay and save the
    /// history.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!("Scrawl relay server listening on {}", addr);
        info!("WebSocket endpoint: ws://{}/ws", addr);
        match &self.config.history {
            HistoryBackend::File(path) => info!(path = %path.display(), "Persisting history"),
            HistoryBackend::Memory => info!("History is in memory only"),
        }

        let app = routes::router(self.relay.clone(), self.config.public_dir.clone());
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Err(e) = self.relay.shutdown().await {
            warn!(error = %e, "Relay already stopped");
        }
        let _ = self.relay_task.await;
        Ok(())
    }

    /// Serve until the process is interrupted.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
    }
}
