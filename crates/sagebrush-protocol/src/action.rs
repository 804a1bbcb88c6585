use serde::{Deserialize, Serialize};

use crate::{CharacterId, GridPos, Principal, SessionId, TokenId};

/// One client request, addressed to exactly one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub session_id: SessionId,
    pub principal: Principal,
    pub action: Action,
    /// Echoed back in rejections so clients can match them to requests.
    pub client_sequence: u64,
}

/// Client → engine actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Join the roster with one of the caller's characters.
    Join { character_id: CharacterId },
    Leave,
    Start,
    MoveToken { token_id: TokenId, to: GridPos },
    /// Run: movement budget becomes Pace + d6 for the rest of the turn.
    Sprint { token_id: TokenId },
    ResolveAttack {
        attacker: TokenId,
        target: TokenId,
        weapon: WeaponSpec,
    },
    ChangeMap { map_id: String },
    ResetGame,
    EndTurn,
    /// Subscribe this connection to the session's event stream.
    Connect {
        #[serde(default)]
        last_seen_sequence: Option<u64>,
    },
    /// Put an off-grid player token back on the map's spawn cell.
    SpawnToken { token_id: TokenId },
    /// GM places an NPC token.
    PlaceNpc {
        token_id: TokenId,
        name: String,
        at: GridPos,
        stats: NpcStats,
    },
    RemoveToken { token_id: TokenId },
    /// GM applies a rolled damage total to a token's Toughness.
    ApplyDamage { token_id: TokenId, damage: u32 },
    EndSession,
}

impl Action {
    /// Stable name used in logs and rejections.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Join { .. } => "JOIN",
            Action::Leave => "LEAVE",
            Action::Start => "START",
            Action::MoveToken { .. } => "MOVE_TOKEN",
            Action::Sprint { .. } => "SPRINT",
            Action::ResolveAttack { .. } => "RESOLVE_ATTACK",
            Action::ChangeMap { .. } => "CHANGE_MAP",
            Action::ResetGame => "RESET_GAME",
            Action::EndTurn => "END_TURN",
            Action::Connect { .. } => "CONNECT",
            Action::SpawnToken { .. } => "SPAWN_TOKEN",
            Action::PlaceNpc { .. } => "PLACE_NPC",
            Action::RemoveToken { .. } => "REMOVE_TOKEN",
            Action::ApplyDamage { .. } => "APPLY_DAMAGE",
            Action::EndSession => "END_SESSION",
        }
    }
}

/// Weapon as described by the client's equipment list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponSpec {
    pub name: String,
    #[serde(default)]
    pub damage: String,
    /// Range profile text such as `"12/24/48"`. Absent for melee weapons.
    #[serde(default)]
    pub range: Option<String>,
}

/// Combat statistics the GM supplies for an NPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcStats {
    pub pace: u32,
    pub parry: u32,
    pub toughness: u32,
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    /// Die notation, e.g. `"d8"` or `"1d10+1"`.
    pub die: String,
}

/// Request to open a new session. Only game masters may create sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub max_players: u32,
    #[serde(default)]
    pub map_id: Option<String>,
}
