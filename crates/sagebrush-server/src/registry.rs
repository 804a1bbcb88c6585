//! Process-wide table of live sessions.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use sagebrush_protocol::{CreateSession, ErrorCode, GridPos, Principal, SessionId, SessionPhase};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::persistence::{PersistenceHandle, SessionRecord};
use crate::session::{SessionError, SessionHandle, SessionSettings, SessionState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("invalid session request: {0}")]
    InvalidRequest(String),
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::NotFound(_) => ErrorCode::SessionNotFound,
            RegistryError::InvalidRequest(_) => ErrorCode::InvalidAction,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    pub settings: SessionSettings,
    pub max_players_limit: u32,
    pub idle_timeout: Duration,
    pub ended_retention: Duration,
}

impl From<&ServerConfig> for RegistryConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            settings: config.session_settings(),
            max_players_limit: config.max_players_limit,
            idle_timeout: config.idle_timeout(),
            ended_retention: config.ended_retention(),
        }
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    config: RegistryConfig,
    persistence: Option<PersistenceHandle>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, persistence: Option<PersistenceHandle>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            persistence,
        }
    }

    /// Open a new WAITING session owned by `game_master`.
    pub fn create(
        &self,
        game_master: Principal,
        request: &CreateSession,
        spawn_table: Option<Vec<GridPos>>,
    ) -> Result<SessionHandle, RegistryError> {
        if request.max_players > self.config.max_players_limit {
            return Err(RegistryError::InvalidRequest(format!(
                "max_players {} exceeds the limit of {}",
                request.max_players, self.config.max_players_limit
            )));
        }
        let id = SessionId::new(Uuid::new_v4().to_string());
        let state = SessionState::new(
            id.clone(),
            game_master.clone(),
            request,
            spawn_table,
            self.config.settings,
        )
        .map_err(|err| RegistryError::InvalidRequest(err.to_string()))?;

        if let Some(persistence) = &self.persistence {
            persistence.save(SessionRecord {
                state: state.clone(),
                sequence: 0,
            });
        }
        let handle = SessionHandle::spawn(state, 0, self.persistence.clone());
        self.write().insert(id.clone(), handle.clone());
        info!(session_id = %id, game_master = %game_master, "session created");
        Ok(handle)
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionHandle, RegistryError> {
        let handle = self
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if handle.is_closed() {
            self.remove(id);
            return Err(RegistryError::NotFound(id.clone()));
        }
        Ok(handle)
    }

    /// Drop a session and its stored record. The actor stops once its last handle is gone.
    pub fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            if let Some(persistence) = &self.persistence {
                persistence.delete(id.clone());
            }
        }
        removed
    }

    /// Bring back sessions from stored records. Records that fail their
    /// consistency checks are discarded.
    pub fn restore(&self, records: Vec<SessionRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            let id = record.state.id().clone();
            if let Err(err) = record.state.check_invariants() {
                warn!(session_id = %id, error = %err, "discarding inconsistent session record");
                if let Some(persistence) = &self.persistence {
                    persistence.delete(id);
                }
                continue;
            }
            let handle =
                SessionHandle::spawn(record.state, record.sequence, self.persistence.clone());
            self.write().insert(id.clone(), handle);
            info!(session_id = %id, sequence = record.sequence, "session restored");
            restored += 1;
        }
        restored
    }

    /// Evict idle, ended-and-expired, and dead sessions. Returns the evicted ids.
    pub async fn sweep_idle(&self) -> Vec<SessionId> {
        let handles: Vec<SessionHandle> = self.read().values().cloned().collect();
        let mut evicted = Vec::new();

        for handle in handles {
            let evict = match handle.status().await {
                Err(SessionError::Closed) => true,
                Err(_) => false,
                Ok(status) => {
                    let expired_end = status.phase == SessionPhase::Ended
                        && status.idle_for >= self.config.ended_retention;
                    let abandoned =
                        status.subscribers == 0 && status.idle_for >= self.config.idle_timeout;
                    expired_end || abandoned
                }
            };
            if evict {
                handle.shutdown().await;
                self.remove(handle.id());
                info!(session_id = %handle.id(), "session evicted");
                evicted.push(handle.id().clone());
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, SessionHandle>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn config(idle: Duration) -> RegistryConfig {
        RegistryConfig {
            settings: SessionSettings::default(),
            max_players_limit: 6,
            idle_timeout: idle,
            ended_retention: idle,
        }
    }

    fn request(max_players: u32) -> CreateSession {
        CreateSession {
            name: "Deadwood".to_string(),
            description: String::new(),
            max_players,
            map_id: None,
        }
    }

    #[tokio::test]
    async fn create_get_remove() {
        let registry = SessionRegistry::new(config(Duration::from_secs(60)), None);
        let handle = assert_ok!(registry.create(Principal::from("gm"), &request(4), None));
        let id = handle.id().clone();
        assert_ok!(Uuid::parse_str(id.as_str()));
        assert_eq!(assert_ok!(registry.get(&id)).id(), &id);

        registry.remove(&id);
        assert_eq!(assert_err!(registry.get(&id)), RegistryError::NotFound(id));
    }

    #[tokio::test]
    async fn capacity_is_validated() {
        let registry = SessionRegistry::new(config(Duration::from_secs(60)), None);
        for bad in [0, 7] {
            let err = assert_err!(registry.create(Principal::from("gm"), &request(bad), None));
            assert_eq!(err.code(), ErrorCode::InvalidAction);
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_sessions() {
        let registry = SessionRegistry::new(config(Duration::from_secs(3600)), None);
        registry
            .create(Principal::from("gm"), &request(2), None)
            .unwrap();
        assert!(registry.sweep_idle().await.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions() {
        let registry = SessionRegistry::new(config(Duration::ZERO), None);
        let handle = registry
            .create(Principal::from("gm"), &request(2), None)
            .unwrap();
        let evicted = registry.sweep_idle().await;
        assert_eq!(evicted, vec![handle.id().clone()]);
        assert!(registry.is_empty());
    }
}
