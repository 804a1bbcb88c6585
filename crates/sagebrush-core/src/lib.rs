//! Deterministic tactical rules for Sagebrush sessions.
//!
//! Everything here is pure or owned by a single session: no I/O, no locks
//! except inside [`SeededDice`].

pub mod character;
pub mod combat;
pub mod dice;
pub mod rng;
pub mod rules;

pub use character::{CharacterSheet, Skill, Weapon, DEFAULT_WOUND_THRESHOLD};
pub use combat::{CombatError, CombatState};
pub use dice::{DiceError, DiceRoller, Die, FixedDice, SeededDice};
pub use rng::GameRng;
pub use rules::{
    apply_move, attack_modifier, attack_skill_or_unskilled, can_move, check_stat, damage_outcome,
    distance, is_incapacitated, is_melee_range, movement_cost, range_band, resolve_target_number,
    select_attack_skill, sprint_total, wound_penalty, AttackInput, DamageOutcome, RangeBand,
    RangeProfile, RulesError, SkillUse, TargetNumber, MAX_STAT, RANGED_BASE_TN,
};
