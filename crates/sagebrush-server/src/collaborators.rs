//! External services the engine consumes, and the in-memory versions used by
//! tests and the development server.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;
use sagebrush_core::{CharacterSheet, DiceRoller};
use sagebrush_protocol::{CharacterId, ErrorCode, GridPos, Principal, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("character {0} not found")]
    CharacterNotFound(CharacterId),
    #[error("unknown principal {0}")]
    UnknownPrincipal(Principal),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CollaboratorError::CharacterNotFound(_) | CollaboratorError::Unavailable(_) => {
                ErrorCode::CharacterUnavailable
            }
            CollaboratorError::UnknownPrincipal(_) => ErrorCode::NotAuthorized,
        }
    }
}

/// Resolved identity of a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Principal,
    pub role: Role,
}

pub trait CharacterSheets: Send + Sync {
    fn get_character(&self, id: CharacterId) -> Result<CharacterSheet, CollaboratorError>;
}

pub trait Principals: Send + Sync {
    fn authorize(&self, principal: &Principal) -> Result<Authorization, CollaboratorError>;
}

pub trait MapCatalog: Send + Sync {
    /// Spawn cells for a map, in roster order. `None` means use the default spawn row.
    fn spawn_table(&self, map_id: &str) -> Option<Vec<GridPos>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCharacters {
    sheets: HashMap<CharacterId, CharacterSheet>,
}

impl InMemoryCharacters {
    pub fn new(sheets: impl IntoIterator<Item = CharacterSheet>) -> Self {
        Self {
            sheets: sheets.into_iter().map(|s| (s.id, s)).collect(),
        }
    }
}

impl CharacterSheets for InMemoryCharacters {
    fn get_character(&self, id: CharacterId) -> Result<CharacterSheet, CollaboratorError> {
        self.sheets
            .get(&id)
            .cloned()
            .ok_or(CollaboratorError::CharacterNotFound(id))
    }
}

/// Fixed principal → role table. Unknown principals are rejected unless a
/// fallback role is configured.
#[derive(Debug, Default)]
pub struct InMemoryPrincipals {
    roles: HashMap<Principal, Role>,
    fallback: Option<Role>,
}

impl InMemoryPrincipals {
    pub fn new(roles: impl IntoIterator<Item = (Principal, Role)>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, role: Role) -> Self {
        self.fallback = Some(role);
        self
    }
}

impl Principals for InMemoryPrincipals {
    fn authorize(&self, principal: &Principal) -> Result<Authorization, CollaboratorError> {
        let role = self
            .roles
            .get(principal)
            .copied()
            .or(self.fallback)
            .ok_or_else(|| CollaboratorError::UnknownPrincipal(principal.clone()))?;
        Ok(Authorization {
            id: principal.clone(),
            role,
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMaps {
    spawns: HashMap<String, Vec<GridPos>>,
}

impl InMemoryMaps {
    pub fn new(spawns: impl IntoIterator<Item = (String, Vec<GridPos>)>) -> Self {
        Self {
            spawns: spawns.into_iter().collect(),
        }
    }
}

impl MapCatalog for InMemoryMaps {
    fn spawn_table(&self, map_id: &str) -> Option<Vec<GridPos>> {
        self.spawns.get(map_id).filter(|t| !t.is_empty()).cloned()
    }
}

/// Thread-local RNG dice for live play.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDice;

impl DiceRoller for RandomDice {
    fn roll_die(&self, sides: u32) -> u32 {
        if sides == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(1..=sides)
    }
}

/// Seed data for the built-in collaborators.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub principals: Vec<Authorization>,
    pub characters: Vec<CharacterSheet>,
    pub maps: Vec<MapFixture>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapFixture {
    pub id: String,
    #[serde(default)]
    pub spawns: Vec<GridPos>,
}

impl Fixtures {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures from {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse fixtures from {}", path.display()))
    }

    pub fn characters(&self) -> InMemoryCharacters {
        InMemoryCharacters::new(self.characters.iter().cloned())
    }

    pub fn principals(&self) -> InMemoryPrincipals {
        InMemoryPrincipals::new(self.principals.iter().map(|a| (a.id.clone(), a.role)))
    }

    pub fn maps(&self) -> InMemoryMaps {
        InMemoryMaps::new(self.maps.iter().map(|m| (m.id.clone(), m.spawns.clone())))
    }
}
