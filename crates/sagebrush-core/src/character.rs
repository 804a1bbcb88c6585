use std::collections::BTreeMap;

use sagebrush_protocol::{CharacterId, Principal, SkillSpec, WeaponSpec};
use serde::{Deserialize, Serialize};

use crate::dice::{DiceError, Die};
use crate::rules::{RangeProfile, RulesError};

/// Character sheet as supplied by the character service. The engine copies
/// what it needs at join time and never reads it again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub id: CharacterId,
    pub owner: Principal,
    pub name: String,
    pub pace: u32,
    pub parry: u32,
    pub toughness: u32,
    #[serde(default)]
    pub attributes: BTreeMap<String, Die>,
    #[serde(default)]
    pub skills: Vec<Skill>,
    /// Wounds the character already carries when they sit down at the table.
    #[serde(default)]
    pub wounds: u32,
    #[serde(default = "default_wound_threshold")]
    pub wound_threshold: u32,
}

/// Wounds that incapacitate a combatant unless its sheet says otherwise.
pub const DEFAULT_WOUND_THRESHOLD: u32 = 3;

fn default_wound_threshold() -> u32 {
    DEFAULT_WOUND_THRESHOLD
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub die: Die,
}

impl Skill {
    pub fn new(name: impl Into<String>, die: Die) -> Self {
        Self {
            name: name.into(),
            die,
        }
    }
}

impl TryFrom<&SkillSpec> for Skill {
    type Error = DiceError;

    fn try_from(spec: &SkillSpec) -> Result<Self, Self::Error> {
        Ok(Self::new(spec.name.clone(), spec.die.parse()?))
    }
}

/// A weapon is ranged iff it declares a range profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Weapon {
    pub name: String,
    pub damage: String,
    pub range: Option<RangeProfile>,
}

impl Weapon {
    pub fn is_ranged(&self) -> bool {
        self.range.is_some()
    }
}

impl TryFrom<&WeaponSpec> for Weapon {
    type Error = RulesError;

    fn try_from(spec: &WeaponSpec) -> Result<Self, Self::Error> {
        let range = match spec.range.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(text.parse()?),
        };
        Ok(Self {
            name: spec.name.clone(),
            damage: spec.damage.clone(),
            range,
        })
    }
}
