//! Per-session actor: the only code that touches a `SessionState`.
//!
//! Commands are handled one at a time in arrival order. Events are numbered
//! and pushed to every subscriber before the next command is read, so the
//! order a subscriber sees is the order the session produced.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use sagebrush_protocol::{
    ConnectionId, Event, EventEnvelope, Principal, SessionId, SessionPhase, SessionSnapshot,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{SessionError, SessionOp, SessionState};
use crate::persistence::{PersistenceHandle, SessionRecord};
use crate::protocol::ServerMessage;
use crate::reconciler;

const COMMAND_BUFFER: usize = 256;

/// Point-in-time view used by the idle sweeper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub subscribers: usize,
    pub sequence: u64,
    pub idle_for: Duration,
}

enum Command {
    Apply {
        principal: Principal,
        op: SessionOp,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    Subscribe {
        connection: ConnectionId,
        principal: Principal,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    Unsubscribe {
        connection: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<(u64, SessionSnapshot)>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

/// Cloneable address of a running session actor.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Spawn the actor. `sequence` is the number of the last event already emitted.
    pub fn spawn(
        state: SessionState,
        sequence: u64,
        persistence: Option<PersistenceHandle>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let id = state.id().clone();
        let actor = SessionActor {
            state,
            sequence,
            subscribers: BTreeMap::new(),
            persistence,
            last_activity: Instant::now(),
            rx,
        };
        tokio::spawn(actor.run());
        Self { id, tx }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Apply one command. Returns the sequence number after it was applied.
    pub async fn apply(&self, principal: Principal, op: SessionOp) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Apply {
            principal,
            op,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Register `outbound` for events. A `FullSnapshot` is queued on it first.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        principal: Principal,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            connection,
            principal,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn unsubscribe(&self, connection: ConnectionId) {
        let _ = self.send(Command::Unsubscribe { connection }).await;
    }

    pub async fn snapshot(&self) -> Result<(u64, SessionSnapshot), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn shutdown(&self) {
        let _ = self.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

struct Subscriber {
    principal: Principal,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

struct SessionActor {
    state: SessionState,
    sequence: u64,
    subscribers: BTreeMap<ConnectionId, Subscriber>,
    persistence: Option<PersistenceHandle>,
    last_activity: Instant,
    rx: mpsc::Receiver<Command>,
}

impl SessionActor {
    async fn run(mut self) {
        debug!(session_id = %self.state.id(), sequence = self.sequence, "session actor started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Apply {
                    principal,
                    op,
                    reply,
                } => {
                    let result = self.handle_apply(&principal, op);
                    let faulted = matches!(result, Err(SessionError::Internal(_)));
                    let _ = reply.send(result);
                    if faulted {
                        break;
                    }
                }
                Command::Subscribe {
                    connection,
                    principal,
                    outbound,
                    reply,
                } => {
                    let result = self.handle_subscribe(connection, principal, outbound);
                    let _ = reply.send(result);
                }
                Command::Unsubscribe { connection } => {
                    if let Some(sub) = self.subscribers.remove(&connection) {
                        debug!(
                            session_id = %self.state.id(),
                            connection_id = %connection,
                            principal = %sub.principal,
                            "subscriber left"
                        );
                    }
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send((self.sequence, self.state.snapshot()));
                }
                Command::Status { reply } => {
                    self.subscribers.retain(|_, s| !s.outbound.is_closed());
                    let _ = reply.send(SessionStatus {
                        phase: self.state.phase(),
                        subscribers: self.subscribers.len(),
                        sequence: self.sequence,
                        idle_for: self.last_activity.elapsed(),
                    });
                }
                Command::Shutdown => break,
            }
        }
        debug!(session_id = %self.state.id(), "session actor stopped");
    }

    fn handle_apply(&mut self, principal: &Principal, op: SessionOp) -> Result<u64, SessionError> {
        self.last_activity = Instant::now();
        let action = op.name();

        let events = match self.state.apply(principal, op) {
            Ok(events) => events,
            Err(SessionError::Internal(reason)) => {
                self.fault(&reason);
                return Err(SessionError::Internal(reason));
            }
            Err(err) => {
                debug!(
                    session_id = %self.state.id(),
                    principal = %principal,
                    action,
                    error = %err,
                    "action rejected"
                );
                return Err(err);
            }
        };

        if let Err(SessionError::Internal(reason)) = self.state.check_invariants() {
            self.fault(&reason);
            return Err(SessionError::Internal(reason));
        }

        if !events.is_empty() {
            for event in events {
                self.publish(event);
            }
            self.persist();
        }
        debug!(
            session_id = %self.state.id(),
            principal = %principal,
            action,
            sequence = self.sequence,
            "action applied"
        );
        Ok(self.sequence)
    }

    fn handle_subscribe(
        &mut self,
        connection: ConnectionId,
        principal: Principal,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<u64, SessionError> {
        self.last_activity = Instant::now();
        if self.state.phase() == SessionPhase::Ended {
            return Err(SessionError::Closed);
        }
        if !self.state.can_observe(&principal) {
            return Err(SessionError::NotAuthorized);
        }
        let envelope = reconciler::full_snapshot(&self.state, self.sequence).map_err(|err| {
            SessionError::InvalidAction(format!("snapshot encoding failed: {err}"))
        })?;
        if outbound.send(ServerMessage::Event(envelope)).is_err() {
            return Err(SessionError::Closed);
        }
        info!(
            session_id = %self.state.id(),
            connection_id = %connection,
            principal = %principal,
            sequence = self.sequence,
            "subscriber synced"
        );
        self.subscribers.insert(
            connection,
            Subscriber {
                principal,
                outbound,
            },
        );
        Ok(self.sequence)
    }

    fn publish(&mut self, event: Event) {
        self.sequence += 1;
        let envelope = EventEnvelope {
            session_id: self.state.id().clone(),
            sequence_number: self.sequence,
            event,
        };
        self.subscribers.retain(|connection, sub| {
            let delivered = sub
                .outbound
                .send(ServerMessage::Event(envelope.clone()))
                .is_ok();
            if !delivered {
                debug!(connection_id = %connection, "dropping closed subscriber");
            }
            delivered
        });
    }

    fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.save(SessionRecord {
                state: self.state.clone(),
                sequence: self.sequence,
            });
        }
    }

    /// The state can no longer be trusted: tell everyone and stop.
    fn fault(&mut self, reason: &str) {
        error!(session_id = %self.state.id(), reason, "session faulted");
        self.publish(Event::SessionFaulted {
            reason: reason.to_string(),
        });
        if let Some(persistence) = &self.persistence {
            persistence.delete(self.state.id().clone());
        }
        if !self.subscribers.is_empty() {
            warn!(
                session_id = %self.state.id(),
                subscribers = self.subscribers.len(),
                "disconnecting subscribers from faulted session"
            );
        }
        self.subscribers.clear();
    }
}
