use crate::chat::UserId;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque handle for one open socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lines a connection may have queued before it is dropped as too slow.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Queued,
    Full,
    Closed,
}

/// A registered socket. Payloads go into `outbox`; the socket's writer task
/// drains it, so per-connection order is the order of `send` calls.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub id: ConnectionId,
    pub participant: UserId,
    outbox: mpsc::Sender<String>,
}

impl LiveConnection {
    pub fn new(participant: UserId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbox, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::new(),
            participant,
            outbox,
        };
        (connection, rx)
    }

    fn send(&self, payload: String) -> SendOutcome {
        match self.outbox.try_send(payload) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Full,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

/// Connections that currently receive broadcasts.
///
/// Built once at startup and shared through the app state.
#[derive(Debug)]
pub struct ConnectionRegistry {
    outbox_capacity: usize,
    connections: Mutex<HashMap<ConnectionId, LiveConnection>>,
}

impl ConnectionRegistry {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            outbox_capacity,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// A connection for `participant` sized to this registry's outbox limit.
    /// It receives nothing until it is registered.
    pub fn open(&self, participant: UserId) -> (LiveConnection, mpsc::Receiver<String>) {
        LiveConnection::new(participant, self.outbox_capacity)
    }

    /// Registering the same handle twice keeps a single entry.
    pub fn register(&self, connection: LiveConnection) {
        debug!(connection = %connection.id, user = %connection.participant, "registering connection");
        self.connections.lock().insert(connection.id, connection);
    }

    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.lock().remove(&id).is_some() {
            debug!(connection = %id, "unregistered connection");
        }
    }

    /// Deliver `payload` to every registered connection. A closed connection,
    /// or one whose outbox is full, is logged and unregistered; it never stops
    /// delivery to the rest.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut connections = self.connections.lock();
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for connection in connections.values() {
            match connection.send(payload.to_string()) {
                SendOutcome::Queued => delivered += 1,
                SendOutcome::Full => {
                    warn!(connection = %connection.id, "outbox full, dropping slow connection");
                    dropped.push(connection.id);
                }
                SendOutcome::Closed => {
                    warn!(connection = %connection.id, "broadcast to closed connection skipped");
                    dropped.push(connection.id);
                }
            }
        }
        for id in dropped {
            connections.remove(&id);
        }
        delivered
    }

    /// Deliver to a single connection, e.g. a notice meant only for the sender.
    pub fn send_to(&self, id: ConnectionId, payload: &str) -> bool {
        let mut connections = self.connections.lock();
        let outcome = match connections.get(&id) {
            Some(connection) => connection.send(payload.to_string()),
            None => return false,
        };
        if outcome != SendOutcome::Queued {
            warn!(connection = %id, ?outcome, "dropping connection that cannot take a notice");
            connections.remove(&id);
        }
        outcome == SendOutcome::Queued
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}
