//! Client-side replica of a session, driven purely by the event stream.
//!
//! Events are applied strictly in sequence order. Anything that arrives ahead
//! of a gap is buffered and the mirror asks for a resync; a `FullSnapshot`
//! replaces the state outright and discards buffered events it already covers.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::wire::{self, WireError};
use crate::{
    CombatStatus, Event, EventEnvelope, SessionId, SessionPhase, SessionSnapshot, TokenId,
    TurnState,
};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("event for session {got} delivered to mirror of {expected}")]
    WrongSession { expected: SessionId, got: SessionId },
    #[error("event references unknown token {0}")]
    UnknownToken(TokenId),
    #[error("snapshot checksum mismatch (expected {expected:#x}, computed {computed:#x})")]
    ChecksumMismatch { expected: u64, computed: u64 },
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// What happened to one delivered envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorApply {
    /// Applied, along with this many previously buffered events.
    Applied { drained: usize },
    /// Held until the gap before it is filled or a snapshot arrives.
    Buffered,
    /// Already covered by the current state.
    Stale,
}

#[derive(Debug, Default)]
pub struct SessionMirror {
    snapshot: Option<SessionSnapshot>,
    last_sequence: u64,
    buffered: BTreeMap<u64, EventEnvelope>,
    needs_resync: bool,
    faulted: bool,
}

impl SessionMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// True when a gap was observed and a fresh `CONNECT` should be sent.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn checksum(&self) -> Result<Option<u64>, WireError> {
        self.snapshot.as_ref().map(wire::snapshot_hash).transpose()
    }

    pub fn apply(&mut self, envelope: EventEnvelope) -> Result<MirrorApply, MirrorError> {
        if let Some(current) = &self.snapshot {
            if current.session_id != envelope.session_id {
                return Err(MirrorError::WrongSession {
                    expected: current.session_id.clone(),
                    got: envelope.session_id,
                });
            }
        }

        if let Event::FullSnapshot { snapshot, checksum } = envelope.event {
            if self.snapshot.is_some() && envelope.sequence_number < self.last_sequence {
                return Ok(MirrorApply::Stale);
            }
            let computed = wire::snapshot_hash(&snapshot)?;
            if computed != checksum {
                return Err(MirrorError::ChecksumMismatch {
                    expected: checksum,
                    computed,
                });
            }
            self.snapshot = Some(snapshot);
            self.last_sequence = envelope.sequence_number;
            self.needs_resync = false;
            let cutoff = self.last_sequence;
            self.buffered.retain(|seq, _| *seq > cutoff);
            let drained = self.drain()?;
            return Ok(MirrorApply::Applied { drained });
        }

        if self.snapshot.is_none() {
            self.buffered.insert(envelope.sequence_number, envelope);
            return Ok(MirrorApply::Buffered);
        }
        if envelope.sequence_number <= self.last_sequence {
            return Ok(MirrorApply::Stale);
        }
        if envelope.sequence_number != self.last_sequence + 1 {
            self.buffered.insert(envelope.sequence_number, envelope);
            self.needs_resync = true;
            return Ok(MirrorApply::Buffered);
        }

        self.apply_in_order(envelope)?;
        let drained = self.drain()?;
        Ok(MirrorApply::Applied { drained })
    }

    fn drain(&mut self) -> Result<usize, MirrorError> {
        let mut drained = 0;
        while let Some(next) = self.buffered.remove(&(self.last_sequence + 1)) {
            self.apply_in_order(next)?;
            drained += 1;
        }
        if self.buffered.is_empty() {
            self.needs_resync = false;
        }
        Ok(drained)
    }

    fn apply_in_order(&mut self, envelope: EventEnvelope) -> Result<(), MirrorError> {
        let Some(state) = self.snapshot.as_mut() else {
            return Ok(());
        };
        match envelope.event {
            Event::PlayerJoined { entry } => state.roster.push(entry),
            Event::PlayerLeft {
                principal,
                removed_tokens,
            } => {
                state.roster.retain(|r| r.principal != principal);
                state.tokens.retain(|t| !removed_tokens.contains(&t.token_id));
                state
                    .combatants
                    .retain(|c| !removed_tokens.contains(&c.token_id));
            }
            Event::GameStarted { snapshot }
            | Event::MapChanged { snapshot, .. }
            | Event::GameReset { snapshot } => *state = snapshot,
            Event::TokenMoved {
                token_id,
                to,
                remaining_budget,
                ..
            } => {
                let token = state
                    .tokens
                    .iter_mut()
                    .find(|t| t.token_id == token_id)
                    .ok_or_else(|| MirrorError::UnknownToken(token_id.clone()))?;
                token.position = to;
                let combatant = state
                    .combatants
                    .iter_mut()
                    .find(|c| c.token_id == token_id)
                    .ok_or(MirrorError::UnknownToken(token_id))?;
                combatant.movement_budget = remaining_budget;
            }
            Event::SprintUsed {
                token_id,
                movement_budget,
                ..
            } => {
                let combatant = state
                    .combatants
                    .iter_mut()
                    .find(|c| c.token_id == token_id)
                    .ok_or(MirrorError::UnknownToken(token_id))?;
                combatant.movement_budget = movement_budget;
                combatant.sprint_used = true;
            }
            Event::AttackResolved { .. } => {}
            Event::TurnAdvanced {
                turn_number,
                turn_phase,
            } => {
                state.turn = Some(TurnState {
                    turn_number,
                    phase: turn_phase,
                });
                let side = turn_phase.acting_side();
                for combatant in state
                    .combatants
                    .iter_mut()
                    .filter(|c| c.status == CombatStatus::Active && c.token_type == side)
                {
                    combatant.movement_budget = combatant.pace;
                    combatant.sprint_used = false;
                    combatant.shaken = false;
                }
            }
            Event::TokenPlaced { token, combatant } => {
                match state
                    .tokens
                    .binary_search_by(|t| t.token_id.cmp(&token.token_id))
                {
                    Ok(idx) => state.tokens[idx] = token,
                    Err(idx) => state.tokens.insert(idx, token),
                }
                match state
                    .combatants
                    .binary_search_by(|c| c.token_id.cmp(&combatant.token_id))
                {
                    Ok(idx) => state.combatants[idx] = combatant,
                    Err(idx) => state.combatants.insert(idx, combatant),
                }
            }
            Event::TokenRemoved { token_id } => {
                state.tokens.retain(|t| t.token_id != token_id);
                state.combatants.retain(|c| c.token_id != token_id);
            }
            Event::DamageApplied {
                token_id,
                wounds,
                shaken,
                status,
                ..
            } => {
                let combatant = state
                    .combatants
                    .iter_mut()
                    .find(|c| c.token_id == token_id)
                    .ok_or_else(|| MirrorError::UnknownToken(token_id.clone()))?;
                combatant.wounds = wounds;
                combatant.shaken = shaken;
                combatant.status = status;
                if status == CombatStatus::Removed {
                    state.tokens.retain(|t| t.token_id != token_id);
                }
            }
            Event::SessionEnded { .. } => {
                state.state = SessionPhase::Ended;
                state.turn = None;
                state.tokens.clear();
                for combatant in &mut state.combatants {
                    combatant.status = CombatStatus::Removed;
                }
            }
            Event::SessionFaulted { .. } => self.faulted = true,
            // Handled in `apply` before sequencing.
            Event::FullSnapshot { .. } => {}
        }
        self.last_sequence = envelope.sequence_number;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CharacterId, CombatantSnapshot, GridPos, Principal, RosterSnapshot, TokenSnapshot,
        TokenType, TurnPhase,
    };

    fn base() -> SessionSnapshot {
        SessionSnapshot {
            session_id: SessionId::new("s-1"),
            name: "Deadwood".to_string(),
            description: String::new(),
            game_master: Principal::from("gm"),
            max_players: 4,
            state: SessionPhase::Active,
            roster: vec![RosterSnapshot {
                principal: Principal::from("ana"),
                character_id: CharacterId(1),
                character_name: "Ana".to_string(),
            }],
            current_map: None,
            turn: Some(TurnState::first()),
            tokens: vec![TokenSnapshot {
                token_id: TokenId::from("1"),
                position: GridPos::new(0, 0),
                owner: Principal::from("ana"),
                token_type: TokenType::Player,
            }],
            combatants: vec![CombatantSnapshot {
                token_id: TokenId::from("1"),
                name: "Ana".to_string(),
                owner: Principal::from("ana"),
                token_type: TokenType::Player,
                status: CombatStatus::Active,
                pace: 6,
                parry: 5,
                toughness: 5,
                wounds: 0,
                shaken: false,
                movement_budget: 6,
                sprint_used: false,
            }],
        }
    }

    fn env(seq: u64, event: Event) -> EventEnvelope {
        EventEnvelope {
            session_id: SessionId::new("s-1"),
            sequence_number: seq,
            event,
        }
    }

    fn full(seq: u64, snapshot: SessionSnapshot) -> EventEnvelope {
        let checksum = wire::snapshot_hash(&snapshot).expect("hash");
        env(seq, Event::FullSnapshot { snapshot, checksum })
    }

    fn moved(seq: u64, x: i32, remaining: u32) -> EventEnvelope {
        env(
            seq,
            Event::TokenMoved {
                token_id: TokenId::from("1"),
                from: GridPos::new(0, 0),
                to: GridPos::new(x, 0),
                remaining_budget: remaining,
            },
        )
    }

    #[test]
    fn events_before_snapshot_are_buffered_then_filtered() {
        let mut mirror = SessionMirror::new();
        assert_eq!(mirror.apply(moved(3, 1, 5)).unwrap(), MirrorApply::Buffered);
        assert_eq!(mirror.apply(moved(5, 2, 4)).unwrap(), MirrorApply::Buffered);

        // Snapshot at 4 covers seq 3; seq 5 follows directly.
        let applied = mirror.apply(full(4, base())).unwrap();
        assert_eq!(applied, MirrorApply::Applied { drained: 1 });
        assert_eq!(mirror.last_sequence(), 5);
        let snap = mirror.snapshot().unwrap();
        assert_eq!(snap.tokens[0].position, GridPos::new(2, 0));
        assert_eq!(snap.combatants[0].movement_budget, 4);
        assert!(!mirror.needs_resync());
    }

    #[test]
    fn gap_requests_resync_and_stale_events_are_ignored() {
        let mut mirror = SessionMirror::new();
        mirror.apply(full(2, base())).unwrap();
        assert_eq!(mirror.apply(moved(2, 9, 0)).unwrap(), MirrorApply::Stale);
        assert_eq!(mirror.apply(moved(4, 3, 3)).unwrap(), MirrorApply::Buffered);
        assert!(mirror.needs_resync());

        let applied = mirror.apply(moved(3, 1, 5)).unwrap();
        assert_eq!(applied, MirrorApply::Applied { drained: 1 });
        assert!(!mirror.needs_resync());
        assert_eq!(mirror.snapshot().unwrap().tokens[0].position, GridPos::new(3, 0));
    }

    #[test]
    fn turn_advance_refreshes_only_the_acting_side() {
        let mut mirror = SessionMirror::new();
        let mut snap = base();
        snap.combatants[0].movement_budget = 1;
        snap.combatants[0].sprint_used = true;
        mirror.apply(full(0, snap)).unwrap();

        mirror
            .apply(env(
                1,
                Event::TurnAdvanced {
                    turn_number: 1,
                    turn_phase: TurnPhase::EnemyTurn,
                },
            ))
            .unwrap();
        assert_eq!(mirror.snapshot().unwrap().combatants[0].movement_budget, 1);

        mirror
            .apply(env(
                2,
                Event::TurnAdvanced {
                    turn_number: 2,
                    turn_phase: TurnPhase::PlayerTurn,
                },
            ))
            .unwrap();
        let c = &mirror.snapshot().unwrap().combatants[0];
        assert_eq!(c.movement_budget, 6);
        assert!(!c.sprint_used);
    }

    #[test]
    fn incapacitating_damage_takes_the_token_off_the_board() {
        let mut mirror = SessionMirror::new();
        mirror.apply(full(0, base())).unwrap();
        mirror
            .apply(env(
                1,
                Event::DamageApplied {
                    token_id: TokenId::from("1"),
                    damage: 4,
                    wounds_dealt: 0,
                    wounds: 0,
                    shaken: true,
                    status: CombatStatus::Active,
                },
            ))
            .unwrap();
        assert!(mirror.snapshot().unwrap().combatants[0].shaken);

        mirror
            .apply(env(
                2,
                Event::DamageApplied {
                    token_id: TokenId::from("1"),
                    damage: 14,
                    wounds_dealt: 3,
                    wounds: 3,
                    shaken: true,
                    status: CombatStatus::Removed,
                },
            ))
            .unwrap();
        let snap = mirror.snapshot().unwrap();
        assert!(snap.tokens.is_empty());
        assert_eq!(snap.combatants[0].wounds, 3);
        assert_eq!(snap.combatants[0].status, CombatStatus::Removed);
    }

    #[test]
    fn corrupted_snapshot_is_rejected() {
        let mut mirror = SessionMirror::new();
        let err = mirror
            .apply(env(
                1,
                Event::FullSnapshot {
                    snapshot: base(),
                    checksum: 0,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, MirrorError::ChecksumMismatch { .. }));
        assert!(mirror.snapshot().is_none());
    }

    #[test]
    fn session_end_clears_the_board() {
        let mut mirror = SessionMirror::new();
        mirror.apply(full(0, base())).unwrap();
        mirror
            .apply(env(
                1,
                Event::SessionEnded {
                    ended_by: Principal::from("gm"),
                },
            ))
            .unwrap();
        let snap = mirror.snapshot().unwrap();
        assert_eq!(snap.state, SessionPhase::Ended);
        assert!(snap.tokens.is_empty());
        assert_eq!(snap.combatants[0].status, CombatStatus::Removed);
    }
}
