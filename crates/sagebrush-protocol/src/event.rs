use serde::{Deserialize, Serialize};

use crate::{
    CombatStatus, CombatantSnapshot, GridPos, Principal, RosterSnapshot, SessionId,
    SessionSnapshot, TokenId, TokenSnapshot, TurnPhase,
};

/// One broadcast event, stamped with the session's sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: SessionId,
    pub sequence_number: u64,
    pub event: Event,
}

/// Engine → client events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    PlayerJoined {
        entry: RosterSnapshot,
    },
    PlayerLeft {
        principal: Principal,
        /// Tokens (and their combatants) that left the grid with the player.
        #[serde(default)]
        removed_tokens: Vec<TokenId>,
    },
    GameStarted {
        snapshot: SessionSnapshot,
    },
    TokenMoved {
        token_id: TokenId,
        from: GridPos,
        to: GridPos,
        remaining_budget: u32,
    },
    SprintUsed {
        token_id: TokenId,
        roll: u32,
        movement_budget: u32,
    },
    AttackResolved {
        outcome: AttackOutcome,
    },
    MapChanged {
        map_id: String,
        snapshot: SessionSnapshot,
    },
    GameReset {
        snapshot: SessionSnapshot,
    },
    TurnAdvanced {
        turn_number: u32,
        turn_phase: TurnPhase,
    },
    TokenPlaced {
        token: TokenSnapshot,
        combatant: CombatantSnapshot,
    },
    TokenRemoved {
        token_id: TokenId,
    },
    /// Damage was applied. A `Removed` status means the token left the grid.
    DamageApplied {
        token_id: TokenId,
        damage: u32,
        wounds_dealt: u32,
        wounds: u32,
        shaken: bool,
        status: CombatStatus,
    },
    SessionEnded {
        ended_by: Principal,
    },
    /// Authoritative state can no longer be trusted; clients should reload.
    SessionFaulted {
        reason: String,
    },
    /// Complete state, sent on (re)subscribe.
    FullSnapshot {
        snapshot: SessionSnapshot,
        /// `wire::snapshot_hash` of `snapshot`.
        checksum: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PlayerJoined { .. } => "PlayerJoined",
            Event::PlayerLeft { .. } => "PlayerLeft",
            Event::GameStarted { .. } => "GameStarted",
            Event::TokenMoved { .. } => "TokenMoved",
            Event::SprintUsed { .. } => "SprintUsed",
            Event::AttackResolved { .. } => "AttackResolved",
            Event::MapChanged { .. } => "MapChanged",
            Event::GameReset { .. } => "GameReset",
            Event::TurnAdvanced { .. } => "TurnAdvanced",
            Event::TokenPlaced { .. } => "TokenPlaced",
            Event::TokenRemoved { .. } => "TokenRemoved",
            Event::DamageApplied { .. } => "DamageApplied",
            Event::SessionEnded { .. } => "SessionEnded",
            Event::SessionFaulted { .. } => "SessionFaulted",
            Event::FullSnapshot { .. } => "FullSnapshot",
        }
    }
}

/// Target number and skill chosen for an attack. Dice are rolled elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub attacker: TokenId,
    pub target: TokenId,
    pub weapon: String,
    pub distance: u32,
    pub target_number: u32,
    pub uses_parry: bool,
    pub skill_used: String,
    /// Die notation of the selected skill (`d4-2` when unskilled).
    pub skill_die: String,
    /// Wound and range penalties combined.
    pub modifier: i32,
}
