//! Connection hub: validates inbound messages and routes them to sessions.
//!
//! The hub never touches session state. It resolves collaborator lookups
//! (sheets, dice, roles, spawn tables) up front and hands the session actor a
//! fully-specified command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sagebrush_core::{DiceRoller, MAX_STAT};
use sagebrush_protocol::{
    Action, ActionEnvelope, ConnectionId, CreateSession, ErrorCode, GridBounds, Principal, Role,
    SessionId,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::collaborators::{CharacterSheets, CollaboratorError, MapCatalog, Principals};
use crate::config::ServerConfig;
use crate::connection::{Connection, RateWindow};
use crate::protocol::{deserialize_client_message, ClientMessage, ServerMessage};
use crate::registry::{RegistryError, SessionRegistry};
use crate::session::{SessionError, SessionHandle, SessionOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("connection is bound to {bound}, not {claimed}")]
    PrincipalMismatch { bound: Principal, claimed: Principal },
    #[error("only game masters may do that")]
    NotGameMaster,
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl HubError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HubError::UnknownConnection(_) => ErrorCode::InvalidAction,
            HubError::RateLimited => ErrorCode::RateLimited,
            HubError::PrincipalMismatch { .. } | HubError::NotGameMaster => {
                ErrorCode::NotAuthorized
            }
            HubError::InvalidAction(_) | HubError::Malformed(_) => ErrorCode::InvalidAction,
            HubError::Registry(err) => err.code(),
            HubError::Session(err) => err.code(),
            HubError::Collaborator(err) => err.code(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct HubConfig {
    pub bounds: GridBounds,
    pub rate_limit_messages: u32,
    pub rate_limit_window: Duration,
}

impl From<&ServerConfig> for HubConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            bounds: config.grid,
            rate_limit_messages: config.rate_limit_messages,
            rate_limit_window: config.rate_limit_window(),
        }
    }
}

/// External services the hub consults before a command reaches a session.
#[derive(Clone)]
pub struct Collaborators {
    pub characters: Arc<dyn CharacterSheets>,
    pub principals: Arc<dyn Principals>,
    pub maps: Arc<dyn MapCatalog>,
    pub dice: Arc<dyn DiceRoller>,
}

pub struct ConnectionHub {
    registry: Arc<SessionRegistry>,
    collaborators: Collaborators,
    config: HubConfig,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_connection: AtomicU64,
}

impl ConnectionHub {
    pub fn new(
        registry: Arc<SessionRegistry>,
        collaborators: Collaborators,
        config: HubConfig,
    ) -> Self {
        Self {
            registry,
            collaborators,
            config,
            connections: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Allocate an id for a connection whose transport has no id of its own.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    pub fn open(&self, id: ConnectionId, outbound: mpsc::UnboundedSender<ServerMessage>) {
        let rate = RateWindow::new(self.config.rate_limit_messages, self.config.rate_limit_window);
        self.connections()
            .insert(id, Connection::new(id, outbound, rate));
        info!(connection_id = %id, "connection opened");
    }

    /// Forget a connection and stop its event stream. Roster membership is kept
    /// so the player can reconnect.
    pub async fn close(&self, id: ConnectionId) {
        let Some(conn) = self.connections().remove(&id) else {
            return;
        };
        if let Some(session_id) = conn.subscribed_session {
            if let Ok(handle) = self.registry.get(&session_id) {
                handle.unsubscribe(id).await;
            }
        }
        info!(connection_id = %id, principal = ?conn.principal, "connection closed");
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    /// Decode one inbound payload. Bytes that do not decode are refused back to
    /// the sender with client sequence 0, since none could be read.
    pub fn decode(&self, id: ConnectionId, data: &[u8]) -> Option<ClientMessage> {
        match deserialize_client_message(data) {
            Ok(message) => Some(message),
            Err(err) => {
                self.reject(id, 0, "UNDECODABLE", &HubError::Malformed(err.to_string()));
                None
            }
        }
    }

    /// Handle one decoded client message. Failures are reported to the sender
    /// as `Rejected`.
    pub async fn handle_message(&self, id: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Ping { timestamp } => {
                let server_timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                self.send_to(
                    id,
                    ServerMessage::Pong {
                        client_timestamp: timestamp,
                        server_timestamp,
                    },
                );
            }
            ClientMessage::CreateSession {
                client_sequence,
                principal,
                request,
            } => match self.create_session(id, &principal, &request) {
                Ok(session_id) => self.send_to(
                    id,
                    ServerMessage::SessionCreated {
                        client_sequence,
                        session_id,
                    },
                ),
                Err(err) => self.reject(id, client_sequence, "CREATE_SESSION", &err),
            },
            ClientMessage::Action(envelope) => {
                let client_sequence = envelope.client_sequence;
                let action = envelope.action.name();
                if let Err(err) = self.dispatch(id, envelope).await {
                    self.reject(id, client_sequence, action, &err);
                }
            }
        }
    }

    /// Open a session for a game master.
    pub fn create_session(
        &self,
        id: ConnectionId,
        principal: &Principal,
        request: &CreateSession,
    ) -> Result<SessionId, HubError> {
        self.admit(id, principal)?;
        let auth = self.collaborators.principals.authorize(principal)?;
        if auth.role != Role::GameMaster {
            return Err(HubError::NotGameMaster);
        }
        if request.name.trim().is_empty() {
            return Err(HubError::InvalidAction("session name is required".to_string()));
        }
        let spawn_table = request
            .map_id
            .as_deref()
            .and_then(|map| self.collaborators.maps.spawn_table(map));
        let handle = self.registry.create(auth.id, request, spawn_table)?;
        Ok(handle.id().clone())
    }

    /// Validate and route one action. Returns the session's sequence number after it.
    pub async fn dispatch(
        &self,
        id: ConnectionId,
        envelope: ActionEnvelope,
    ) -> Result<u64, HubError> {
        let ActionEnvelope {
            session_id,
            principal,
            action,
            client_sequence,
        } = envelope;
        let outbound = self.admit(id, &principal)?;
        self.collaborators.principals.authorize(&principal)?;
        self.validate(&action)?;
        let handle = self.registry.get(&session_id)?;

        debug!(
            connection_id = %id,
            session_id = %session_id,
            principal = %principal,
            action = action.name(),
            client_sequence,
            "dispatching"
        );

        let op = match action {
            Action::Connect { last_seen_sequence } => {
                return self
                    .subscribe(id, &handle, principal, outbound, last_seen_sequence)
                    .await;
            }
            Action::Leave => {
                let result = self.apply(&handle, principal, SessionOp::Leave).await;
                self.unsubscribe(id, &handle).await;
                return result;
            }
            Action::Join { character_id } => {
                let sheet = self.collaborators.characters.get_character(character_id)?;
                if sheet.owner != principal {
                    return Err(SessionError::NotAuthorized.into());
                }
                SessionOp::Join { sheet }
            }
            Action::Sprint { token_id } => SessionOp::Sprint {
                token_id,
                roll: self.collaborators.dice.roll_die(6),
            },
            Action::ChangeMap { map_id } => {
                let spawn_table = self.collaborators.maps.spawn_table(&map_id);
                SessionOp::ChangeMap {
                    map_id,
                    spawn_table,
                }
            }
            Action::Start => SessionOp::Start,
            Action::MoveToken { token_id, to } => SessionOp::MoveToken { token_id, to },
            Action::ResolveAttack {
                attacker,
                target,
                weapon,
            } => SessionOp::ResolveAttack {
                attacker,
                target,
                weapon,
            },
            Action::ResetGame => SessionOp::ResetGame,
            Action::EndTurn => SessionOp::EndTurn,
            Action::SpawnToken { token_id } => SessionOp::SpawnToken { token_id },
            Action::PlaceNpc {
                token_id,
                name,
                at,
                stats,
            } => SessionOp::PlaceNpc {
                token_id,
                name,
                at,
                stats,
            },
            Action::RemoveToken { token_id } => SessionOp::RemoveToken { token_id },
            Action::ApplyDamage { token_id, damage } => SessionOp::ApplyDamage { token_id, damage },
            Action::EndSession => SessionOp::EndSession,
        };
        self.apply(&handle, principal, op).await
    }

    async fn apply(
        &self,
        handle: &SessionHandle,
        principal: Principal,
        op: SessionOp,
    ) -> Result<u64, HubError> {
        match handle.apply(principal, op).await {
            Ok(sequence) => Ok(sequence),
            Err(SessionError::Internal(reason)) => {
                self.registry.remove(handle.id());
                self.forget_session(handle.id());
                Err(SessionError::Internal(reason).into())
            }
            Err(SessionError::Closed) => {
                self.registry.remove(handle.id());
                Err(RegistryError::NotFound(handle.id().clone()).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn subscribe(
        &self,
        id: ConnectionId,
        handle: &SessionHandle,
        principal: Principal,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        last_seen_sequence: Option<u64>,
    ) -> Result<u64, HubError> {
        let previous = self
            .connections()
            .get(&id)
            .and_then(|c| c.subscribed_session.clone());
        if let Some(previous) = previous.filter(|p| p != handle.id()) {
            if let Ok(old) = self.registry.get(&previous) {
                old.unsubscribe(id).await;
            }
        }

        let sequence = handle.subscribe(id, principal.clone(), outbound).await?;
        if let Some(conn) = self.connections().get_mut(&id) {
            conn.subscribed_session = Some(handle.id().clone());
            conn.last_seen_sequence = Some(sequence);
        }
        info!(
            connection_id = %id,
            session_id = %handle.id(),
            principal = %principal,
            last_seen_sequence = ?last_seen_sequence,
            sequence,
            "connection subscribed"
        );
        Ok(sequence)
    }

    async fn unsubscribe(&self, id: ConnectionId, handle: &SessionHandle) {
        let was_subscribed = match self.connections().get_mut(&id) {
            Some(conn) if conn.subscribed_session.as_ref() == Some(handle.id()) => {
                conn.subscribed_session = None;
                true
            }
            _ => false,
        };
        if was_subscribed {
            handle.unsubscribe(id).await;
        }
    }

    /// Rate limit, principal binding, and the connection's outbound queue.
    fn admit(
        &self,
        id: ConnectionId,
        principal: &Principal,
    ) -> Result<mpsc::UnboundedSender<ServerMessage>, HubError> {
        let mut connections = self.connections();
        let conn = connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        if !conn.check_rate_limit() {
            return Err(HubError::RateLimited);
        }
        conn.bind_principal(principal)
            .map_err(|bound| HubError::PrincipalMismatch {
                bound,
                claimed: principal.clone(),
            })?;
        Ok(conn.outbound.clone())
    }

    /// Payload checks that need no session state.
    fn validate(&self, action: &Action) -> Result<(), HubError> {
        let invalid = |msg: String| Err(HubError::InvalidAction(msg));
        match action {
            Action::MoveToken { to, .. } if !self.config.bounds.contains(*to) => {
                invalid(format!("{to} is outside the grid"))
            }
            Action::PlaceNpc { at, .. } if !self.config.bounds.contains(*at) => {
                invalid(format!("{at} is outside the grid"))
            }
            Action::PlaceNpc { token_id, name, .. }
                if token_id.as_str().trim().is_empty() || name.trim().is_empty() =>
            {
                invalid("NPC needs a token id and a name".to_string())
            }
            Action::ChangeMap { map_id } if map_id.trim().is_empty() => {
                invalid("map id is required".to_string())
            }
            Action::PlaceNpc { stats, .. }
                if stats.pace.max(stats.parry).max(stats.toughness) > MAX_STAT =>
            {
                invalid(format!("NPC stats must not exceed {MAX_STAT}"))
            }
            Action::ResolveAttack { weapon, .. } if weapon.name.trim().is_empty() => {
                invalid("weapon name is required".to_string())
            }
            _ => Ok(()),
        }
    }

    fn forget_session(&self, session_id: &SessionId) {
        for conn in self.connections().values_mut() {
            if conn.subscribed_session.as_ref() == Some(session_id) {
                conn.subscribed_session = None;
            }
        }
    }

    fn reject(&self, id: ConnectionId, client_sequence: u64, action: &str, err: &HubError) {
        warn!(
            connection_id = %id,
            client_sequence,
            action,
            code = %err.code(),
            error = %err,
            "request rejected"
        );
        self.send_to(
            id,
            ServerMessage::Rejected {
                client_sequence,
                code: err.code(),
                message: err.to_string(),
            },
        );
    }

    fn send_to(&self, id: ConnectionId, message: ServerMessage) {
        if let Some(conn) = self.connections().get(&id) {
            if !conn.send(message) {
                debug!(connection_id = %id, "outbound queue closed");
            }
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
