use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{auth::Principal, HostwardenError, HostwardenResult};

use super::HostSnapshot;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Identifies one operator session.
pub type SessionId = Uuid;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Connected but has not presented a token yet.
    Unauthenticated,

    /// Token accepted, streaming not started yet.
    Authenticated,

    /// Receiving snapshots.
    Streaming,

    /// Gone. Nothing is sent to a closed session.
    Closed,
}

/// A message from an operator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Present a bearer token.
    Authenticate {
        /// The token issued at login.
        token: String,
    },
}

/// A message to an operator session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A fresh snapshot.
    ServerStats {
        /// The snapshot.
        data: HostSnapshot,
    },

    /// Something went wrong. Usually followed by the session being closed.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Delivers messages to one session's transport.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Sends `message`, failing if the transport is gone.
    async fn send(&self, message: ServerMessage) -> HostwardenResult<()>;
}

/// A [`SessionSink`] that feeds an unbounded channel drained by the transport.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Session id to state, principal, timer cancellation and streaming task.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

pub(crate) struct SessionEntry {
    pub(crate) state: SessionState,
    pub(crate) principal: Option<Principal>,
    pub(crate) sink: Arc<dyn SessionSink>,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: Option<JoinHandle<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ChannelSink {
    /// Creates a sink and the receiver its messages arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// The state of session `id`. Unknown ids report [`SessionState::Closed`].
    pub fn state(&self, id: &SessionId) -> SessionState {
        self.sessions
            .lock()
            .get(id)
            .map_or(SessionState::Closed, |entry| entry.state)
    }

    pub(crate) fn insert(&self, id: SessionId, entry: SessionEntry) {
        self.sessions.lock().insert(id, entry);
    }

    pub(crate) fn remove(&self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.lock().remove(id)
    }

    pub(crate) fn drain(&self) -> Vec<(SessionId, SessionEntry)> {
        self.sessions.lock().drain().collect()
    }

    /// Runs `f` on session `id` under the registry lock.
    pub(crate) fn with_entry<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut SessionEntry) -> T,
    ) -> Option<T> {
        self.sessions.lock().get_mut(id).map(f)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SessionSink for ChannelSink {
    async fn send(&self, message: ServerMessage) -> HostwardenResult<()> {
        self.sender
            .send(message)
            .map_err(|_| HostwardenError::custom(anyhow::anyhow!("session transport closed")))
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        };
        f.write_str(state)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
