use sagebrush_protocol::{CombatStatus, CombatantSnapshot, ErrorCode, Principal, TokenId, TokenType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::character::{CharacterSheet, Skill, DEFAULT_WOUND_THRESHOLD};
use crate::rules::{self, DamageOutcome, RulesError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("already used this turn")]
    AlreadyUsedThisTurn,
    #[error("insufficient movement: budget {budget}, cost {cost}")]
    InsufficientMovement { budget: u32, cost: u32 },
    #[error("combatant is not active")]
    NotActive,
    #[error("combatant was removed")]
    Removed,
    #[error(transparent)]
    Rules(#[from] RulesError),
}

impl CombatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CombatError::AlreadyUsedThisTurn => ErrorCode::AlreadyUsedThisTurn,
            CombatError::InsufficientMovement { .. } => ErrorCode::InsufficientMovement,
            CombatError::NotActive | CombatError::Removed => ErrorCode::InvalidTransition,
            CombatError::Rules(err) => err.code(),
        }
    }
}

/// Combat ledger for one character or NPC in one encounter.
///
/// Stats are copied in when the combatant is created and never re-read from
/// the sheet. Failed operations leave the ledger untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatState {
    pub token_id: TokenId,
    pub name: String,
    pub owner: Principal,
    pub token_type: TokenType,
    pub status: CombatStatus,
    pub pace: u32,
    pub parry: u32,
    pub toughness: u32,
    pub wounds: u32,
    /// Wounds carried in from the sheet; `reset` returns to these.
    pub starting_wounds: u32,
    pub wound_threshold: u32,
    pub shaken: bool,
    pub skills: Vec<Skill>,
    pub movement_budget: u32,
    pub sprint_used: bool,
}

impl CombatState {
    pub fn for_player(owner: Principal, sheet: &CharacterSheet) -> Self {
        Self {
            token_id: TokenId::for_character(sheet.id),
            name: sheet.name.clone(),
            owner,
            token_type: TokenType::Player,
            status: CombatStatus::Pending,
            pace: sheet.pace,
            parry: sheet.parry,
            toughness: sheet.toughness,
            wounds: sheet.wounds,
            starting_wounds: sheet.wounds,
            wound_threshold: sheet.wound_threshold,
            shaken: false,
            skills: sheet.skills.clone(),
            movement_budget: 0,
            sprint_used: false,
        }
    }

    /// NPCs enter the grid directly, so they start out active.
    pub fn npc(
        token_id: TokenId,
        name: String,
        owner: Principal,
        pace: u32,
        parry: u32,
        toughness: u32,
        skills: Vec<Skill>,
    ) -> Self {
        Self {
            token_id,
            name,
            owner,
            token_type: TokenType::Npc,
            status: CombatStatus::Active,
            pace,
            parry,
            toughness,
            wounds: 0,
            starting_wounds: 0,
            wound_threshold: DEFAULT_WOUND_THRESHOLD,
            shaken: false,
            skills,
            movement_budget: pace,
            sprint_used: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CombatStatus::Active
    }

    pub fn ensure_active(&self) -> Result<(), CombatError> {
        match self.status {
            CombatStatus::Active => Ok(()),
            CombatStatus::Pending => Err(CombatError::NotActive),
            CombatStatus::Removed => Err(CombatError::Removed),
        }
    }

    /// `PENDING → ACTIVE` with a full budget. Already-active combatants are left alone.
    pub fn activate(&mut self) -> Result<(), CombatError> {
        match self.status {
            CombatStatus::Removed => Err(CombatError::Removed),
            CombatStatus::Active => Ok(()),
            CombatStatus::Pending => {
                self.status = CombatStatus::Active;
                self.movement_budget = self.pace;
                self.sprint_used = false;
                Ok(())
            }
        }
    }

    /// Start of this combatant's side's phase. Shaken combatants recover here.
    pub fn begin_phase(&mut self) {
        if self.is_active() {
            self.movement_budget = self.pace;
            self.sprint_used = false;
            self.shaken = false;
        }
    }

    /// Pay for a move. Returns the remaining budget.
    pub fn spend(&mut self, cost: u32) -> Result<u32, CombatError> {
        self.ensure_active()?;
        if !rules::can_move(self.movement_budget, cost) {
            return Err(CombatError::InsufficientMovement {
                budget: self.movement_budget,
                cost,
            });
        }
        self.movement_budget = rules::apply_move(self.movement_budget, cost);
        Ok(self.movement_budget)
    }

    /// Run for the rest of the turn: budget becomes Pace + d6, replacing whatever was left.
    pub fn sprint(&mut self, d6: u32) -> Result<u32, CombatError> {
        self.ensure_active()?;
        if self.sprint_used {
            return Err(CombatError::AlreadyUsedThisTurn);
        }
        let total = rules::sprint_total(self.pace, d6)?;
        self.movement_budget = total;
        self.sprint_used = true;
        Ok(total)
    }

    /// Apply a damage total against Toughness. Reaching the wound threshold
    /// takes the combatant out of the fight.
    pub fn take_damage(&mut self, damage: u32) -> Result<DamageOutcome, CombatError> {
        self.ensure_active()?;
        let outcome = rules::damage_outcome(damage, self.toughness);
        self.wounds = self.wounds.saturating_add(outcome.wounds_dealt);
        self.shaken |= outcome.shaken;
        if outcome.wounds_dealt > 0 && rules::is_incapacitated(self.wounds, self.wound_threshold) {
            self.remove();
        }
        Ok(outcome)
    }

    /// Back to session-start defaults, including combatants taken out by damage.
    pub fn reset(&mut self) {
        self.status = CombatStatus::Active;
        self.wounds = self.starting_wounds;
        self.shaken = false;
        self.movement_budget = self.pace;
        self.sprint_used = false;
    }

    pub fn remove(&mut self) {
        self.status = CombatStatus::Removed;
    }

    pub fn snapshot(&self) -> CombatantSnapshot {
        CombatantSnapshot {
            token_id: self.token_id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            token_type: self.token_type,
            status: self.status,
            pace: self.pace,
            parry: self.parry,
            toughness: self.toughness,
            wounds: self.wounds,
            shaken: self.shaken,
            movement_budget: self.movement_budget,
            sprint_used: self.sprint_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Die;
    use sagebrush_protocol::CharacterId;
    use std::collections::BTreeMap;

    fn sheet() -> CharacterSheet {
        CharacterSheet {
            id: CharacterId(3),
            owner: Principal::from("ana"),
            name: "Ana".to_string(),
            pace: 6,
            parry: 5,
            toughness: 5,
            attributes: BTreeMap::new(),
            skills: vec![Skill::new("Shooting", Die::new(8))],
            wounds: 1,
            wound_threshold: 3,
        }
    }

    #[test]
    fn pending_combatants_cannot_act() {
        let mut c = CombatState::for_player(Principal::from("ana"), &sheet());
        assert_eq!(c.spend(1), Err(CombatError::NotActive));
        c.activate().unwrap();
        assert_eq!(c.movement_budget, 6);
        assert_eq!(c.spend(4), Ok(2));
    }

    #[test]
    fn failed_spend_keeps_budget() {
        let mut c = CombatState::for_player(Principal::from("ana"), &sheet());
        c.activate().unwrap();
        c.spend(4).unwrap();
        assert_eq!(
            c.spend(3),
            Err(CombatError::InsufficientMovement { budget: 2, cost: 3 })
        );
        assert_eq!(c.movement_budget, 2);
    }

    #[test]
    fn sprint_once_per_phase() {
        let mut c = CombatState::for_player(Principal::from("ana"), &sheet());
        c.activate().unwrap();
        c.spend(5).unwrap();
        assert_eq!(c.sprint(3), Ok(9));
        assert_eq!(c.sprint(3), Err(CombatError::AlreadyUsedThisTurn));
        c.begin_phase();
        assert!(!c.sprint_used);
        assert_eq!(c.sprint(6), Ok(12));
    }

    #[test]
    fn bad_roll_does_not_consume_sprint() {
        let mut c = CombatState::for_player(Principal::from("ana"), &sheet());
        c.activate().unwrap();
        assert!(matches!(c.sprint(9), Err(CombatError::Rules(_))));
        assert!(!c.sprint_used);
        assert_eq!(c.movement_budget, 6);
    }

    #[test]
    fn removed_cannot_act() {
        let mut c = CombatState::for_player(Principal::from("ana"), &sheet());
        c.activate().unwrap();
        c.remove();
        assert_eq!(c.activate(), Err(CombatError::Removed));
        assert_eq!(c.spend(0).unwrap_err().code(), ErrorCode::InvalidTransition);
        assert_eq!(c.take_damage(20), Err(CombatError::Removed));
    }

    #[test]
    fn wounds_start_from_the_sheet() {
        let c = CombatState::for_player(Principal::from("ana"), &sheet());
        assert_eq!(c.wounds, 1);
        assert_eq!(c.wound_threshold, 3);
        assert!(!c.shaken);
    }

    #[test]
    fn damage_shakes_wounds_and_incapacitates() {
        let mut c = CombatState::for_player(Principal::from("ana"), &sheet());
        c.activate().unwrap();

        assert_eq!(c.take_damage(1).unwrap().wounds_dealt, 0);
        assert!(c.shaken);
        assert_eq!(c.wounds, 1);

        c.begin_phase();
        assert!(!c.shaken);

        // Toughness 5: 9 is one raise over.
        assert_eq!(c.take_damage(9).unwrap().wounds_dealt, 2);
        assert_eq!(c.status, CombatStatus::Removed);
        assert_eq!(c.wounds, 3);

        c.reset();
        assert_eq!(c.status, CombatStatus::Active);
        assert_eq!(c.wounds, 1);
        assert!(!c.shaken);
    }

    #[test]
    fn oversized_pace_fails_the_sprint() {
        let mut c = CombatState::npc(
            TokenId::from("big"),
            "Big".to_string(),
            Principal::from("gm"),
            u32::MAX,
            5,
            5,
            Vec::new(),
        );
        assert!(matches!(c.sprint(6), Err(CombatError::Rules(_))));
        assert!(!c.sprint_used);
    }
}
