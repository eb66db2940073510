use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    auth::{Authenticator, Principal},
    HostwardenError, HostwardenResult,
};

use super::{
    ServerMessage, SessionEntry, SessionId, SessionRegistry, SessionSink, SessionState,
    SnapshotSource,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Pushes host snapshots to authenticated operator sessions.
///
/// A session moves from `Unauthenticated` to `Authenticated` once it presents a valid token and
/// immediately on to `Streaming`, where its own timer samples and sends a snapshot every
/// `interval`. Closing a session cancels its timer and waits for it, so nothing is sent to a
/// session after [`Broadcaster::close`] returns. Sessions share nothing but the snapshot source.
pub struct Broadcaster {
    registry: SessionRegistry,
    source: Arc<dyn SnapshotSource>,
    authenticator: Arc<dyn Authenticator>,
    interval: Duration,
    shutdown: CancellationToken,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Broadcaster {
    /// Creates a broadcaster that samples `source` every `interval` for each streaming session.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        authenticator: Arc<dyn Authenticator>,
        interval: Duration,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            source,
            authenticator,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a new, unauthenticated session that will receive messages through `sink`.
    pub fn open_session(&self, sink: Arc<dyn SessionSink>) -> SessionId {
        let id = Uuid::new_v4();
        self.registry.insert(
            id,
            SessionEntry {
                state: SessionState::Unauthenticated,
                principal: None,
                sink,
                cancel: self.shutdown.child_token(),
                task: None,
            },
        );

        tracing::debug!(session_id = %id, "session opened");
        id
    }

    /// Checks `token` for session `id` and starts streaming to it.
    ///
    /// A rejected token closes the session after telling it why.
    pub async fn authenticate(&self, id: SessionId, token: &str) -> HostwardenResult<Principal> {
        let (state, sink) = self
            .registry
            .with_entry(&id, |entry| (entry.state, entry.sink.clone()))
            .ok_or_else(|| HostwardenError::NotFound(format!("session {id}")))?;

        if state != SessionState::Unauthenticated {
            return Err(already_authenticated(id));
        }

        let verified = if self.shutdown.is_cancelled() {
            Err(HostwardenError::Authentication(
                "server is shutting down".to_string(),
            ))
        } else {
            self.authenticator.authenticate(token).await
        };

        let principal = match verified {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "session authentication failed");
                let _ = sink
                    .send(ServerMessage::Error {
                        message: e.to_string(),
                    })
                    .await;
                self.close(id).await;
                return Err(e);
            }
        };

        let started = self.registry.with_entry(&id, |entry| {
            if entry.state != SessionState::Unauthenticated {
                return false;
            }

            entry.state = SessionState::Authenticated;
            entry.principal = Some(principal.clone());
            entry.task = Some(tokio::spawn(stream(
                id,
                entry.sink.clone(),
                self.source.clone(),
                self.interval,
                entry.cancel.clone(),
            )));
            entry.state = SessionState::Streaming;
            true
        });

        match started {
            Some(true) => {
                tracing::info!(session_id = %id, username = %principal.username, "session streaming");
                Ok(principal)
            }
            Some(false) => Err(already_authenticated(id)),
            None => Err(HostwardenError::NotFound(format!("session {id}"))),
        }
    }

    /// Closes session `id`, stopping its timer. Closing an unknown session does nothing.
    pub async fn close(&self, id: SessionId) {
        let Some(mut entry) = self.registry.remove(&id) else {
            return;
        };

        entry.cancel.cancel();
        if let Some(task) = entry.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(session_id = %id, error = %e, "session task ended abnormally");
            }
        }

        let username = entry.principal.as_ref().map(|p| p.username.as_str());
        tracing::debug!(session_id = %id, ?username, "session closed");
    }

    /// The state of session `id`.
    pub fn state(&self, id: SessionId) -> SessionState {
        self.registry.state(&id)
    }

    /// Number of sessions that are not closed.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Closes every session and refuses to authenticate new ones.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let sessions = self.registry.drain();
        let count = sessions.len();
        for (id, mut entry) in sessions {
            entry.cancel.cancel();
            if let Some(task) = entry.task.take() {
                if let Err(e) = task.await {
                    tracing::warn!(session_id = %id, error = %e, "session task ended abnormally");
                }
            }
        }

        tracing::info!(sessions = count, "broadcaster shut down");
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn already_authenticated(id: SessionId) -> HostwardenError {
    HostwardenError::InvalidInput(format!("session {id} is already authenticated"))
}

/// Samples and sends on every tick until `cancel` fires or the transport goes away.
async fn stream(
    id: SessionId,
    sink: Arc<dyn SessionSink>,
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sampled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sampled = source.sample() => sampled,
        };

        let snapshot = match sampled {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "failed to sample host, skipping tick");
                continue;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) = sink.send(ServerMessage::ServerStats { data: snapshot }).await {
            tracing::debug!(session_id = %id, error = %e, "session transport gone");
            break;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
