use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::GameRng;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("invalid die notation: {0:?}")]
    InvalidNotation(String),
}

/// Die expression in trait notation: `d8`, `2d6`, `d10+2`, `d4-2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Die {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl Die {
    pub const fn new(sides: u32) -> Self {
        Self {
            count: 1,
            sides,
            modifier: 0,
        }
    }

    pub const fn with_modifier(self, modifier: i32) -> Self {
        Self { modifier, ..self }
    }

    /// Untrained roll for a skill the character lacks.
    pub const fn unskilled() -> Self {
        Self::new(4).with_modifier(-2)
    }
}

impl Default for Die {
    fn default() -> Self {
        Self::new(6)
    }
}

impl FromStr for Die {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiceError::InvalidNotation(s.to_string());
        let text = s.trim().to_ascii_lowercase();
        let (count, rest) = text.split_once('d').ok_or_else(invalid)?;
        let count = if count.is_empty() {
            1
        } else {
            count.parse::<u32>().map_err(|_| invalid())?
        };

        let (sides, modifier) = match rest.find(['+', '-']) {
            Some(idx) => {
                let (sides, modifier) = rest.split_at(idx);
                let modifier = modifier
                    .strip_prefix('+')
                    .unwrap_or(modifier)
                    .parse::<i32>()
                    .map_err(|_| invalid())?;
                (sides, modifier)
            }
            None => (rest, 0),
        };
        let sides = sides.parse::<u32>().map_err(|_| invalid())?;
        if count == 0 || sides == 0 {
            return Err(invalid());
        }
        Ok(Self {
            count,
            sides,
            modifier,
        })
    }
}

impl fmt::Display for Die {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count != 1 {
            write!(f, "{}", self.count)?;
        }
        write!(f, "d{}", self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

impl TryFrom<String> for Die {
    type Error = DiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Die> for String {
    fn from(die: Die) -> Self {
        die.to_string()
    }
}

/// Source of die rolls. The session engine never rolls on its own; callers
/// roll outside the session turn and pass the result in.
pub trait DiceRoller: Send + Sync {
    /// Uniform roll in `1..=sides`.
    fn roll_die(&self, sides: u32) -> u32;
}

/// `GameRng`-backed roller, reproducible from its seed.
#[derive(Debug)]
pub struct SeededDice {
    rng: Mutex<GameRng>,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(GameRng::seed_from_u64(seed)),
        }
    }
}

impl DiceRoller for SeededDice {
    fn roll_die(&self, sides: u32) -> u32 {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.roll(sides)
    }
}

/// Replays a fixed list of rolls, then repeats the last one.
#[derive(Debug, Default)]
pub struct FixedDice {
    rolls: Mutex<VecDeque<u32>>,
    last: Mutex<u32>,
}

impl FixedDice {
    pub fn new(rolls: impl IntoIterator<Item = u32>) -> Self {
        Self {
            rolls: Mutex::new(rolls.into_iter().collect()),
            last: Mutex::new(1),
        }
    }
}

impl DiceRoller for FixedDice {
    fn roll_die(&self, _sides: u32) -> u32 {
        let mut rolls = match self.rolls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(next) = rolls.pop_front() {
            *last = next;
        }
        *last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trait_notation() {
        assert_eq!("d8".parse::<Die>().unwrap(), Die::new(8));
        assert_eq!(
            "2d6".parse::<Die>().unwrap(),
            Die {
                count: 2,
                sides: 6,
                modifier: 0
            }
        );
        assert_eq!("D10+2".parse::<Die>().unwrap(), Die::new(10).with_modifier(2));
        assert_eq!("1d4-2".parse::<Die>().unwrap(), Die::unskilled());
        assert!("sharp".parse::<Die>().is_err());
        assert!("d0".parse::<Die>().is_err());
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(Die::unskilled().to_string(), "d4-2");
        assert_eq!(Die::new(12).with_modifier(1).to_string(), "d12+1");
        assert_eq!("3d6".parse::<Die>().unwrap().to_string(), "3d6");
    }

    #[test]
    fn fixed_dice_repeat_last_roll() {
        let dice = FixedDice::new([3, 5]);
        assert_eq!(dice.roll_die(6), 3);
        assert_eq!(dice.roll_die(6), 5);
        assert_eq!(dice.roll_die(6), 5);
    }

    #[test]
    fn seeded_dice_are_reproducible() {
        let a = SeededDice::new(11);
        let b = SeededDice::new(11);
        for _ in 0..16 {
            assert_eq!(a.roll_die(6), b.roll_die(6));
        }
    }
}
