//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::history::DEFAULT_SAVE_DEBOUNCE;
use crate::storage::{FileStorage, HistoryStorage, MemoryStorage, StorageResult};

/// Default file holding the persisted drawing history.
pub const DEFAULT_HISTORY_FILE: &str = "drawing-history.json";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;

/// Command line arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "scrawl-server", version, about = "Shared drawing board relay")]
pub struct Args {
    /// Port to listen on
    #[arg(long, short, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// File the drawing history is saved to
    #[arg(long, env = "SCRAWL_HISTORY_FILE", default_value = DEFAULT_HISTORY_FILE)]
    pub history_file: PathBuf,

    /// Quiet period after the last stroke before the history is saved
    #[arg(long, default_value_t = DEFAULT_SAVE_DEBOUNCE.as_millis() as u64)]
    pub save_debounce_ms: u64,

    /// Serve static client assets from this directory
    #[arg(long)]
    pub public_dir: Option<PathBuf>,

    /// Keep the history in memory only
    #[arg(long)]
    pub ephemeral: bool,
}

/// Where the relay keeps its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryBackend {
    File(PathBuf),
    Memory,
}

/// Resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    pub history: HistoryBackend,
    pub save_debounce: Duration,
    pub public_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            history: HistoryBackend::File(PathBuf::from(DEFAULT_HISTORY_FILE)),
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            public_dir: None,
        }
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        let history = if args.ephemeral {
            HistoryBackend::Memory
        } else {
            HistoryBackend::File(args.history_file)
        };
        Self {
            addr: SocketAddr::new(args.host, args.port),
            history,
            save_debounce: Duration::from_millis(args.save_debounce_ms),
            public_dir: args.public_dir,
        }
    }
}

impl RelayConfig {
    /// Open the configured storage backend.
    pub fn open_storage(&self) -> StorageResult<Arc<dyn HistoryStorage>> {
        Ok(match &self.history {
            HistoryBackend::File(path) => Arc::new(FileStorage::new(path.clone())?),
            HistoryBackend::Memory => Arc::new(MemoryStorage::new()),
        })
    }
}
