//! Sagebrush wire protocol.
//!
//! Shared between the authoritative session engine and its clients:
//! - ids and grid coordinates
//! - the action envelope (client → engine)
//! - the event envelope (engine → client) and full-state snapshots
//! - failure codes
//! - MessagePack/JSON codecs
//! - `SessionMirror`, the client-side apply logic for events and snapshots

pub mod action;
pub mod error;
pub mod event;
pub mod grid;
pub mod ids;
pub mod mirror;
pub mod snapshot;
pub mod types;
pub mod wire;

pub use action::{Action, ActionEnvelope, CreateSession, NpcStats, SkillSpec, WeaponSpec};
pub use error::ErrorCode;
pub use event::{AttackOutcome, Event, EventEnvelope};
pub use grid::{GridBounds, GridPos};
pub use ids::{CharacterId, ConnectionId, Principal, SessionId, TokenId};
pub use mirror::{MirrorApply, MirrorError, SessionMirror};
pub use snapshot::{CombatantSnapshot, RosterSnapshot, SessionSnapshot, TokenSnapshot};
pub use types::{CombatStatus, Role, SessionPhase, TokenType, TurnPhase, TurnState};
