use serde::{Deserialize, Serialize};

use crate::{
    CharacterId, CombatStatus, GridPos, Principal, SessionId, SessionPhase, TokenId, TokenType,
    TurnState,
};

/// Full session state for initial sync or reconnection.
///
/// `tokens` and `combatants` are ordered by token id; `roster` is in join order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub name: String,
    pub description: String,
    pub game_master: Principal,
    pub max_players: u32,
    pub state: SessionPhase,
    pub roster: Vec<RosterSnapshot>,
    pub current_map: Option<String>,
    pub turn: Option<TurnState>,
    pub tokens: Vec<TokenSnapshot>,
    pub combatants: Vec<CombatantSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub principal: Principal,
    pub character_id: CharacterId,
    pub character_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub token_id: TokenId,
    pub position: GridPos,
    pub owner: Principal,
    pub token_type: TokenType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantSnapshot {
    pub token_id: TokenId,
    pub name: String,
    pub owner: Principal,
    pub token_type: TokenType,
    pub status: CombatStatus,
    pub pace: u32,
    pub parry: u32,
    pub toughness: u32,
    pub wounds: u32,
    #[serde(default)]
    pub shaken: bool,
    pub movement_budget: u32,
    pub sprint_used: bool,
}

impl SessionSnapshot {
    pub fn token(&self, id: &TokenId) -> Option<&TokenSnapshot> {
        self.tokens
            .binary_search_by(|t| t.token_id.cmp(id))
            .ok()
            .map(|idx| &self.tokens[idx])
    }

    pub fn combatant(&self, id: &TokenId) -> Option<&CombatantSnapshot> {
        self.combatants
            .binary_search_by(|c| c.token_id.cmp(id))
            .ok()
            .map(|idx| &self.combatants[idx])
    }

    pub fn roster_entry(&self, principal: &Principal) -> Option<&RosterSnapshot> {
        self.roster.iter().find(|r| &r.principal == principal)
    }
}
