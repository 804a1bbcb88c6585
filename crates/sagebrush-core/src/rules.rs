//! Pure tactical rules: distance, movement, target numbers and skill choice.

use std::str::FromStr;

use sagebrush_protocol::{ErrorCode, GridPos};
use thiserror::Error;

use crate::{Die, Skill};

/// Target number for ranged attacks beyond melee range.
pub const RANGED_BASE_TN: u32 = 4;

/// Wounds beyond this add no further penalty.
const MAX_WOUND_PENALTY: u32 = 3;

/// Damage points per extra wound once Toughness is met.
const DAMAGE_PER_WOUND: u32 = 4;

/// Largest Pace, Parry or Toughness a combatant may carry.
pub const MAX_STAT: u32 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("die roll {roll} outside 1..={sides}")]
    InvalidDieRoll { roll: u32, sides: u32 },
    #[error("invalid range profile: {0:?}")]
    InvalidRangeProfile(String),
    #[error("{stat} {value} is out of range")]
    StatOutOfRange { stat: &'static str, value: u32 },
}

impl RulesError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidAction
    }
}

/// Chebyshev distance: diagonal steps cost the same as orthogonal ones.
pub fn distance(a: GridPos, b: GridPos) -> u32 {
    let dx = (i64::from(a.x) - i64::from(b.x)).unsigned_abs();
    let dy = (i64::from(a.y) - i64::from(b.y)).unsigned_abs();
    u32::try_from(dx.max(dy)).unwrap_or(u32::MAX)
}

#[inline]
pub fn is_melee_range(distance: u32) -> bool {
    distance <= 1
}

#[inline]
pub fn movement_cost(from: GridPos, to: GridPos) -> u32 {
    distance(from, to)
}

#[inline]
pub fn can_move(budget: u32, cost: u32) -> bool {
    cost <= budget
}

#[inline]
pub fn apply_move(budget: u32, cost: u32) -> u32 {
    budget.saturating_sub(cost)
}

/// Running total: Pace plus one d6.
pub fn sprint_total(pace: u32, d6: u32) -> Result<u32, RulesError> {
    if !(1..=6).contains(&d6) {
        return Err(RulesError::InvalidDieRoll { roll: d6, sides: 6 });
    }
    pace.checked_add(d6).ok_or(RulesError::StatOutOfRange {
        stat: "pace",
        value: pace,
    })
}

/// Rejects stats no character sheet or stat block would carry.
pub fn check_stat(stat: &'static str, value: u32) -> Result<u32, RulesError> {
    if value <= MAX_STAT {
        Ok(value)
    } else {
        Err(RulesError::StatOutOfRange { stat, value })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttackInput {
    pub weapon_is_ranged: bool,
    pub distance: u32,
    pub target_parry: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetNumber {
    pub target_number: u32,
    pub uses_parry: bool,
}

/// Melee attacks, and ranged attacks fired into melee, are made against Parry.
pub fn resolve_target_number(attack: AttackInput) -> TargetNumber {
    if !attack.weapon_is_ranged || is_melee_range(attack.distance) {
        TargetNumber {
            target_number: attack.target_parry,
            uses_parry: true,
        }
    } else {
        TargetNumber {
            target_number: RANGED_BASE_TN,
            uses_parry: false,
        }
    }
}

/// Which skill names count for which kind of attack. Matched as
/// case-insensitive substrings, first hit in sheet order wins.
const ATTACK_SKILL_PATTERNS: &[(bool, &str)] = &[(true, "shooting"), (false, "fighting")];

fn attack_pattern(is_ranged: bool) -> &'static str {
    ATTACK_SKILL_PATTERNS
        .iter()
        .find(|(ranged, _)| *ranged == is_ranged)
        .map(|(_, pattern)| *pattern)
        .unwrap_or("fighting")
}

pub fn select_attack_skill(skills: &[Skill], is_ranged: bool) -> Option<&Skill> {
    let pattern = attack_pattern(is_ranged);
    skills
        .iter()
        .find(|skill| skill.name.to_lowercase().contains(pattern))
}

/// The skill an attack is rolled with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkillUse {
    pub name: String,
    pub die: Die,
    pub unskilled: bool,
}

pub fn attack_skill_or_unskilled(skills: &[Skill], is_ranged: bool) -> SkillUse {
    match select_attack_skill(skills, is_ranged) {
        Some(skill) => SkillUse {
            name: skill.name.clone(),
            die: skill.die,
            unskilled: false,
        },
        None => SkillUse {
            name: if is_ranged { "Shooting" } else { "Fighting" }.to_string(),
            die: Die::unskilled(),
            unskilled: true,
        },
    }
}

/// Short/medium/long range in grid cells, written `"12/24/48"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeProfile {
    pub short: u32,
    pub medium: u32,
    pub long: u32,
}

impl FromStr for RangeProfile {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RulesError::InvalidRangeProfile(s.to_string());
        let parts = s
            .split('/')
            .map(|p| p.trim().parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        let [short, medium, long] = parts[..] else {
            return Err(invalid());
        };
        if short == 0 || short > medium || medium > long {
            return Err(invalid());
        }
        Ok(Self {
            short,
            medium,
            long,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeBand {
    Short,
    Medium,
    Long,
    Extreme,
}

impl RangeBand {
    pub fn penalty(self) -> i32 {
        match self {
            RangeBand::Short => 0,
            RangeBand::Medium => -2,
            RangeBand::Long => -4,
            RangeBand::Extreme => -8,
        }
    }
}

pub fn range_band(profile: &RangeProfile, distance: u32) -> RangeBand {
    if distance <= profile.short {
        RangeBand::Short
    } else if distance <= profile.medium {
        RangeBand::Medium
    } else if distance <= profile.long {
        RangeBand::Long
    } else {
        RangeBand::Extreme
    }
}

pub fn wound_penalty(wounds: u32) -> i32 {
    -(wounds.min(MAX_WOUND_PENALTY) as i32)
}

/// Effect of one damage total against a Toughness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DamageOutcome {
    pub wounds_dealt: u32,
    pub shaken: bool,
}

/// Meeting Toughness deals a wound plus one more per full 4 points over it.
/// Falling short by less than 4 only shakes the target.
pub fn damage_outcome(damage: u32, toughness: u32) -> DamageOutcome {
    if damage == 0 {
        return DamageOutcome {
            wounds_dealt: 0,
            shaken: false,
        };
    }
    if damage >= toughness {
        DamageOutcome {
            wounds_dealt: (damage - toughness) / DAMAGE_PER_WOUND + 1,
            shaken: true,
        }
    } else {
        DamageOutcome {
            wounds_dealt: 0,
            shaken: damage.saturating_add(DAMAGE_PER_WOUND) >= toughness,
        }
    }
}

/// A combatant is out of the fight once wounds reach its threshold.
pub fn is_incapacitated(wounds: u32, wound_threshold: u32) -> bool {
    wounds >= wound_threshold.max(1)
}

/// Total modifier on the attack roll. Range only matters for shots outside melee.
pub fn attack_modifier(wounds: u32, range: Option<&RangeProfile>, distance: u32) -> i32 {
    let range_penalty = match range {
        Some(profile) if !is_melee_range(distance) => range_band(profile, distance).penalty(),
        _ => 0,
    };
    wound_penalty(wounds) + range_penalty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_chebyshev() {
        assert_eq!(distance(GridPos::new(0, 0), GridPos::new(3, 4)), 4);
        assert_eq!(distance(GridPos::new(2, 2), GridPos::new(1, 1)), 1);
        assert_eq!(distance(GridPos::new(5, 5), GridPos::new(5, 5)), 0);
    }

    #[test]
    fn sprint_rejects_impossible_rolls() {
        assert_eq!(sprint_total(6, 4), Ok(10));
        assert_eq!(
            sprint_total(6, 0),
            Err(RulesError::InvalidDieRoll { roll: 0, sides: 6 })
        );
        assert!(sprint_total(6, 7).is_err());
    }

    #[test]
    fn sprint_total_does_not_overflow() {
        assert_eq!(
            sprint_total(u32::MAX, 6),
            Err(RulesError::StatOutOfRange {
                stat: "pace",
                value: u32::MAX
            })
        );
        assert!(check_stat("parry", MAX_STAT).is_ok());
        assert!(check_stat("toughness", MAX_STAT + 1).is_err());
    }

    #[test]
    fn damage_against_toughness() {
        let none = damage_outcome(2, 7);
        assert_eq!((none.wounds_dealt, none.shaken), (0, false));
        let shaken = damage_outcome(4, 7);
        assert_eq!((shaken.wounds_dealt, shaken.shaken), (0, true));
        assert_eq!(damage_outcome(7, 7).wounds_dealt, 1);
        assert_eq!(damage_outcome(10, 7).wounds_dealt, 1);
        assert_eq!(damage_outcome(11, 7).wounds_dealt, 2);
        assert_eq!(damage_outcome(0, 0).wounds_dealt, 0);
        assert_eq!(damage_outcome(u32::MAX, 0).wounds_dealt, u32::MAX / 4 + 1);
    }

    #[test]
    fn incapacitation_threshold() {
        assert!(!is_incapacitated(2, 3));
        assert!(is_incapacitated(3, 3));
        assert!(is_incapacitated(1, 0));
    }

    #[test]
    fn range_profile_parsing() {
        assert_eq!(
            "12/24/48".parse::<RangeProfile>(),
            Ok(RangeProfile {
                short: 12,
                medium: 24,
                long: 48
            })
        );
        assert!("12/24".parse::<RangeProfile>().is_err());
        assert!("24/12/48".parse::<RangeProfile>().is_err());
        assert!("a/b/c".parse::<RangeProfile>().is_err());
    }

    #[test]
    fn range_bands_and_penalties() {
        let rifle: RangeProfile = "24/48/96".parse().unwrap();
        assert_eq!(range_band(&rifle, 24), RangeBand::Short);
        assert_eq!(range_band(&rifle, 25).penalty(), -2);
        assert_eq!(range_band(&rifle, 96).penalty(), -4);
        assert_eq!(range_band(&rifle, 97).penalty(), -8);
    }

    #[test]
    fn wounds_cap_at_three() {
        assert_eq!(wound_penalty(0), 0);
        assert_eq!(wound_penalty(2), -2);
        assert_eq!(wound_penalty(5), -3);
    }

    #[test]
    fn melee_range_ignores_range_penalty() {
        let pistol: RangeProfile = "12/24/48".parse().unwrap();
        assert_eq!(attack_modifier(1, Some(&pistol), 1), -1);
        assert_eq!(attack_modifier(1, Some(&pistol), 30), -5);
        assert_eq!(attack_modifier(0, None, 30), 0);
    }
}
