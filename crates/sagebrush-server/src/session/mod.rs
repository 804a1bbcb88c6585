//! One tabletop session: its state machine, turn cycle and actor task.

mod actor;
pub mod state;
mod turn;

use sagebrush_core::CharacterSheet;
use sagebrush_protocol::{Event, GridPos, NpcStats, Principal, TokenId, WeaponSpec};

pub use actor::{SessionHandle, SessionStatus};
pub use state::{RosterEntry, SessionError, SessionSettings, SessionState, TokenPosition};

/// A state-changing command with every collaborator lookup already resolved.
#[derive(Clone, Debug)]
pub enum SessionOp {
    Join { sheet: CharacterSheet },
    Leave,
    Start,
    MoveToken { token_id: TokenId, to: GridPos },
    Sprint { token_id: TokenId, roll: u32 },
    ResolveAttack {
        attacker: TokenId,
        target: TokenId,
        weapon: WeaponSpec,
    },
    ChangeMap {
        map_id: String,
        spawn_table: Option<Vec<GridPos>>,
    },
    ResetGame,
    EndTurn,
    SpawnToken { token_id: TokenId },
    PlaceNpc {
        token_id: TokenId,
        name: String,
        at: GridPos,
        stats: NpcStats,
    },
    RemoveToken { token_id: TokenId },
    ApplyDamage { token_id: TokenId, damage: u32 },
    EndSession,
}

impl SessionOp {
    pub fn name(&self) -> &'static str {
        match self {
            SessionOp::Join { .. } => "JOIN",
            SessionOp::Leave => "LEAVE",
            SessionOp::Start => "START",
            SessionOp::MoveToken { .. } => "MOVE_TOKEN",
            SessionOp::Sprint { .. } => "SPRINT",
            SessionOp::ResolveAttack { .. } => "RESOLVE_ATTACK",
            SessionOp::ChangeMap { .. } => "CHANGE_MAP",
            SessionOp::ResetGame => "RESET_GAME",
            SessionOp::EndTurn => "END_TURN",
            SessionOp::SpawnToken { .. } => "SPAWN_TOKEN",
            SessionOp::PlaceNpc { .. } => "PLACE_NPC",
            SessionOp::RemoveToken { .. } => "REMOVE_TOKEN",
            SessionOp::ApplyDamage { .. } => "APPLY_DAMAGE",
            SessionOp::EndSession => "END_SESSION",
        }
    }
}

impl SessionState {
    pub fn apply(
        &mut self,
        principal: &Principal,
        op: SessionOp,
    ) -> Result<Vec<Event>, SessionError> {
        match op {
            SessionOp::Join { sheet } => self.join(principal, sheet),
            SessionOp::Leave => self.leave(principal),
            SessionOp::Start => self.start(principal),
            SessionOp::MoveToken { token_id, to } => self.move_token(principal, &token_id, to),
            SessionOp::Sprint { token_id, roll } => self.sprint(principal, &token_id, roll),
            SessionOp::ResolveAttack {
                attacker,
                target,
                weapon,
            } => self.resolve_attack(principal, &attacker, &target, &weapon),
            SessionOp::ChangeMap {
                map_id,
                spawn_table,
            } => self.change_map(principal, map_id, spawn_table),
            SessionOp::ResetGame => self.reset_game(principal),
            SessionOp::EndTurn => self.end_turn(principal),
            SessionOp::SpawnToken { token_id } => self.spawn_token(principal, &token_id),
            SessionOp::PlaceNpc {
                token_id,
                name,
                at,
                stats,
            } => self.place_npc(principal, token_id, name, at, &stats),
            SessionOp::RemoveToken { token_id } => self.remove_token(principal, &token_id),
            SessionOp::ApplyDamage { token_id, damage } => {
                self.apply_damage(principal, &token_id, damage)
            }
            SessionOp::EndSession => self.end_session(principal),
        }
    }
}
