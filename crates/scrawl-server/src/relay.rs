//! The broadcast relay.
//!
//! One actor task owns the event log and the set of open connections and
//! handles every command in arrival order. Because appending an event and
//! fanning it out happen inside one step of that task, every connection sees
//! `draw` and `clear` messages in the same total order.
//!
//! ```text
//! socket A ──┐                       ┌──► outbox A ──► socket A
//!            ├──► RelayCommand ──► Relay ──► outbox B ──► socket B
//! socket B ──┘        (mpsc)        │
//!                                   └──► EventLog ──(debounced)──► storage
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use scrawl_core::{ClientMessage, ServerMessage, StrokeEvent};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::history::EventLog;

/// Identifies one client connection.
pub type ConnectionId = Uuid;

/// Sending half of a connection's outgoing queue. Frames are shared between
/// all recipients of a broadcast.
pub type Outbox = mpsc::UnboundedSender<Arc<str>>;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay is not running")]
    Closed,
}

/// Relay statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Open connections.
    pub connections: usize,
    /// Events in the log.
    pub events: usize,
}

enum RelayCommand {
    Connect { id: ConnectionId, outbox: Outbox },
    Ingest { id: ConnectionId, text: String },
    Disconnect { id: ConnectionId },
    Snapshot { reply: oneshot::Sender<Vec<StrokeEvent>> },
    Stats { reply: oneshot::Sender<RelayStats> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable handle used by connection tasks to talk to the relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl std::fmt::Debug for RelayCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayCommand::Connect { id, .. } => write!(f, "Connect({id})"),
            RelayCommand::Ingest { id, text } => write!(f, "Ingest({id}, {} bytes)", text.len()),
            RelayCommand::Disconnect { id } => write!(f, "Disconnect({id})"),
            RelayCommand::Snapshot { .. } => f.write_str("Snapshot"),
            RelayCommand::Stats { .. } => f.write_str("Stats"),
            RelayCommand::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl RelayHandle {
    fn send(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).map_err(|_| RelayError::Closed)
    }

    /// Open a connection. The relay queues the `init` message on `outbox`
    /// before anything else can reach it.
    pub fn connect(&self, outbox: Outbox) -> Result<ConnectionId, RelayError> {
        let id = Uuid::new_v4();
        self.send(RelayCommand::Connect { id, outbox })?;
        Ok(id)
    }

    /// Hand a received text frame to the relay.
    pub fn ingest(&self, id: ConnectionId, text: String) -> Result<(), RelayError> {
        self.send(RelayCommand::Ingest { id, text })
    }

    /// Close a connection.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), RelayError> {
        self.send(RelayCommand::Disconnect { id })
    }

    /// Copy of the current history.
    pub async fn snapshot(&self) -> Result<Vec<StrokeEvent>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Snapshot { reply })?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply })?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    /// Stop the relay after flushing the log to storage.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Shutdown { reply })?;
        rx.await.map_err(|_| RelayError::Closed)
    }
}

/// The relay actor: sole owner of the event log and the fan-out set.
pub struct Relay {
    log: EventLog,
    connections: HashMap<ConnectionId, Outbox>,
}

impl Relay {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            connections: HashMap::new(),
        }
    }

    /// Run the relay on its own task.
    pub fn spawn(self) -> (RelayHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (RelayHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RelayCommand>) {
        info!(events = self.log.len(), "Relay started");
        while let Some(cmd) = rx.recv().await {
            debug!(?cmd, "Relay command");
            match cmd {
                RelayCommand::Connect { id, outbox } => self.open(id, outbox),
                RelayCommand::Ingest { id, text } => self.ingest(id, text),
                RelayCommand::Disconnect { id } => self.close(id),
                RelayCommand::Snapshot { reply } => {
                    let _ = reply.send(self.log.snapshot());
                }
                RelayCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                RelayCommand::Shutdown { reply } => {
                    self.shutdown();
                    let _ = reply.send(());
                    return;
                }
            }
        }
        // Every handle is gone.
        self.shutdown();
    }

    fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.connections.len(),
            events: self.log.len(),
        }
    }

    /// Send the history to a new connection, then add it to the fan-out set.
    fn open(&mut self, id: ConnectionId, outbox: Outbox) {
        let history = self.log.snapshot();
        let count = history.len();
        let init = match (ServerMessage::Init { history }).to_json() {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                error!(%id, error = %e, "Failed to encode init message");
                return;
            }
        };
        if outbox.send(init).is_err() {
            debug!(%id, "Connection closed before init was queued");
            return;
        }
        self.connections.insert(id, outbox);
        info!(%id, history = count, connections = self.connections.len(), "Client connected");
    }

    fn ingest(&mut self, id: ConnectionId, text: String) {
        if !self.connections.contains_key(&id) {
            debug!(%id, "Ignoring message from a closed connection");
            return;
        }
        match ClientMessage::parse(&text) {
            Ok(ClientMessage::Draw(event)) => {
                debug!(%id, action = ?event.action, erase = event.is_erase(), "Stroke event");
                self.log.append(event);
                self.broadcast(text);
            }
            Ok(ClientMessage::Clear) => {
                self.log.clear();
                info!(%id, "Drawing cleared");
                self.broadcast(text);
            }
            Err(e) => debug!(%id, error = %e, "Ignoring malformed message"),
        }
    }

    /// Send the original frame text to every open connection, the sender
    /// included. Connections whose outbox is gone are dropped from the set.
    fn broadcast(&mut self, text: String) {
        let frame = Arc::<str>::from(text);
        self.connections.retain(|id, outbox| {
            let open = outbox.send(Arc::clone(&frame)).is_ok();
            if !open {
                debug!(%id, "Pruning closed connection during broadcast");
            }
            open
        });
    }

    fn close(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            info!(%id, connections = self.connections.len(), "Client disconnected");
        }
    }

    fn shutdown(&mut self) {
        self.connections.clear();
        match self.log.flush() {
            Ok(()) => info!(events = self.log.len(), "Relay stopped, history saved"),
            Err(e) => warn!(error = %e, "Relay stopped, final history save failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    const DRAW_START: &str = r##"{"type":"draw","action":"start","x":10,"y":10,"color":"#000","lineWidth":5}"##;
    const DRAW_MOVE: &str = r##"{"type":"draw","action":"draw","x":20,"y":20,"color":"#000","lineWidth":5}"##;
    const DRAW_END: &str = r##"{"type":"draw","action":"end","x":20,"y":20,"color":"#000","lineWidth":5}"##;
    const CLEAR: &str = r#"{"type":"clear"}"#;

    fn spawn_relay() -> (RelayHandle, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let log = EventLog::open(storage.clone(), Duration::from_millis(20));
        let (handle, _task) = Relay::new(log).spawn();
        (handle, storage)
    }

    fn connect(relay: &RelayHandle) -> (ConnectionId, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = relay.connect(tx).unwrap();
        (id, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Arc<str>>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("outbox closed")
            .to_string()
    }

    fn history_of(init: &str) -> Vec<StrokeEvent> {
        match ServerMessage::parse(init).unwrap() {
            ServerMessage::Init { history } => history,
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_init_is_first_message() {
        let (relay, _) = spawn_relay();
        let (_, mut rx) = connect(&relay);
        assert_eq!(next(&mut rx).await, r#"{"type":"init","history":[]}"#);
    }

    #[tokio::test]
    async fn test_echo_is_byte_for_byte() {
        let (relay, _) = spawn_relay();
        let (id, mut rx) = connect(&relay);
        next(&mut rx).await;

        let spaced = r##"{ "type" : "draw", "action":"start", "x":1.50, "y":2, "color":"#000", "lineWidth":"5" }"##;
        relay.ingest(id, spaced.to_string()).unwrap();
        assert_eq!(next(&mut rx).await, spaced);
    }

    #[tokio::test]
    async fn test_existing_client_sees_gesture_in_order_without_init() {
        let (relay, _) = spawn_relay();
        let (a, mut rx_a) = connect(&relay);
        let (_b, mut rx_b) = connect(&relay);
        next(&mut rx_a).await;
        next(&mut rx_b).await;

        for msg in [DRAW_START, DRAW_MOVE, DRAW_END] {
            relay.ingest(a, msg.to_string()).unwrap();
        }

        for expected in [DRAW_START, DRAW_MOVE, DRAW_END] {
            assert_eq!(next(&mut rx_b).await, expected);
            assert_eq!(next(&mut rx_a).await, expected);
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_joiner_gets_full_history() {
        let (relay, _) = spawn_relay();
        let (a, mut rx_a) = connect(&relay);
        next(&mut rx_a).await;
        for msg in [DRAW_START, DRAW_MOVE, DRAW_END] {
            relay.ingest(a, msg.to_string()).unwrap();
        }

        let (_, mut rx_c) = connect(&relay);
        let history = history_of(&next(&mut rx_c).await);
        let expected: Vec<StrokeEvent> = [DRAW_START, DRAW_MOVE, DRAW_END]
            .iter()
            .map(|m| match ClientMessage::parse(m).unwrap() {
                ClientMessage::Draw(event) => event,
                ClientMessage::Clear => unreachable!(),
            })
            .collect();
        assert_eq!(history, expected);
    }

    #[tokio::test]
    async fn test_clear_empties_history_for_newcomers() {
        let (relay, storage) = spawn_relay();
        let (a, mut rx_a) = connect(&relay);
        next(&mut rx_a).await;
        relay.ingest(a, DRAW_START.to_string()).unwrap();
        relay.ingest(a, CLEAR.to_string()).unwrap();
        relay.ingest(a, DRAW_MOVE.to_string()).unwrap();

        let (_, mut rx_c) = connect(&relay);
        let history = history_of(&next(&mut rx_c).await);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].x, 20.0);

        relay.ingest(a, CLEAR.to_string()).unwrap();
        assert_eq!(relay.stats().await.unwrap().events, 0);
        assert_eq!(storage.saved().unwrap(), Vec::new());

        let (_, mut rx_d) = connect(&relay);
        assert!(history_of(&next(&mut rx_d).await).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let (relay, _) = spawn_relay();
        let (a, mut rx_a) = connect(&relay);
        next(&mut rx_a).await;

        for bad in ["", "nope", r#"{"type":"init","history":[]}"#, r#"{"type":"draw"}"#] {
            relay.ingest(a, bad.to_string()).unwrap();
        }
        relay.ingest(a, DRAW_START.to_string()).unwrap();

        assert_eq!(next(&mut rx_a).await, DRAW_START);
        assert_eq!(relay.stats().await.unwrap(), RelayStats { connections: 1, events: 1 });
    }

    #[tokio::test]
    async fn test_closed_outbox_is_pruned() {
        let (relay, _) = spawn_relay();
        let (a, mut rx_a) = connect(&relay);
        let (_b, rx_b) = connect(&relay);
        next(&mut rx_a).await;
        drop(rx_b);

        relay.ingest(a, DRAW_START.to_string()).unwrap();
        assert_eq!(next(&mut rx_a).await, DRAW_START);
        assert_eq!(relay.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_disconnected_client_is_ignored() {
        let (relay, _) = spawn_relay();
        let (a, mut rx_a) = connect(&relay);
        next(&mut rx_a).await;
        relay.disconnect(a).unwrap();
        relay.ingest(a, DRAW_START.to_string()).unwrap();

        assert_eq!(relay.stats().await.unwrap(), RelayStats { connections: 0, events: 0 });
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let storage = Arc::new(MemoryStorage::new());
        let log = EventLog::open(storage.clone(), Duration::from_secs(60));
        let (relay, task) = Relay::new(log).spawn();
        let (a, mut rx_a) = connect(&relay);
        next(&mut rx_a).await;
        relay.ingest(a, DRAW_START.to_string()).unwrap();

        relay.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(storage.saved().unwrap().len(), 1);
        assert!(matches!(relay.stats().await, Err(RelayError::Closed)));
    }
}
