use serde::{Deserialize, Serialize};

/// Session lifecycle. Linear: `Waiting → Active → Ended`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Waiting,
    Active,
    Ended,
}

/// Portion of the turn cycle currently being played.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnPhase {
    PlayerTurn,
    EnemyTurn,
}

impl TurnPhase {
    /// Side whose tokens act during this phase.
    pub fn acting_side(self) -> TokenType {
        match self {
            TurnPhase::PlayerTurn => TokenType::Player,
            TurnPhase::EnemyTurn => TokenType::Npc,
        }
    }
}

/// Turn counter and phase, present only while a session is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub turn_number: u32,
    pub phase: TurnPhase,
}

impl TurnState {
    pub const fn first() -> Self {
        Self {
            turn_number: 1,
            phase: TurnPhase::PlayerTurn,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    Player,
    Npc,
}

/// Lifecycle of a combatant within one encounter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombatStatus {
    /// Registered, token not yet placed.
    Pending,
    /// On the grid and taking part in turns.
    Active,
    /// Taken off the grid or defeated. Terminal.
    Removed,
}

/// Role reported by the principal service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    GameMaster,
    Player,
}
