//! Sagebrush session server
//!
//! Authoritative host for tabletop combat sessions: one actor per session,
//! a registry of live sessions, and a connection hub that validates and
//! routes client actions. Renet carries the messages.

pub mod channels;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod hub;
pub mod persistence;
pub mod protocol;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod transport;

pub use channels::*;
pub use collaborators::{
    Authorization, CharacterSheets, CollaboratorError, Fixtures, InMemoryCharacters,
    InMemoryMaps, InMemoryPrincipals, MapCatalog, Principals, RandomDice,
};
pub use config::ServerConfig;
pub use hub::{Collaborators, ConnectionHub, HubConfig, HubError};
pub use persistence::{PersistenceError, PersistenceHandle, SessionRecord};
pub use protocol::*;
pub use registry::{RegistryConfig, RegistryError, SessionRegistry};
pub use session::{SessionError, SessionHandle, SessionOp, SessionSettings, SessionState};
pub use transport::{ServerRunner, TransportConfig, TransportError, PROTOCOL_ID};
