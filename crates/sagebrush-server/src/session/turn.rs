//! Turn cycle: players act, then the GM's side, then the next turn begins.

use sagebrush_protocol::{TurnPhase, TurnState};

/// Phase order within one turn. Extend this table to add phases.
const PHASE_ORDER: &[TurnPhase] = &[TurnPhase::PlayerTurn, TurnPhase::EnemyTurn];

/// The turn that follows `current`. Wrapping past the last phase starts a new turn.
pub fn advance(current: TurnState) -> TurnState {
    let idx = PHASE_ORDER
        .iter()
        .position(|p| *p == current.phase)
        .unwrap_or(0);
    match PHASE_ORDER.get(idx + 1) {
        Some(next) => TurnState {
            turn_number: current.turn_number,
            phase: *next,
        },
        None => TurnState {
            turn_number: current.turn_number.saturating_add(1),
            phase: PHASE_ORDER[0],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_then_enemy_then_next_turn() {
        let t1 = TurnState::first();
        let t1e = advance(t1);
        assert_eq!(t1e.turn_number, 1);
        assert_eq!(t1e.phase, TurnPhase::EnemyTurn);

        let t2 = advance(t1e);
        assert_eq!(t2.turn_number, 2);
        assert_eq!(t2.phase, TurnPhase::PlayerTurn);
    }
}
