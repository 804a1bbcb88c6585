//! Authoritative state of one tabletop session.
//!
//! Every operation validates fully before touching anything, so an `Err`
//! always leaves the session exactly as it was.

use std::collections::BTreeMap;

use sagebrush_core::rules::{self, AttackInput};
use sagebrush_core::{CharacterSheet, CombatError, CombatState, Skill, Weapon};
use sagebrush_protocol::{
    AttackOutcome, CombatStatus, CreateSession, ErrorCode, Event, GridBounds, GridPos, NpcStats,
    Principal, RosterSnapshot, SessionId, SessionPhase, SessionSnapshot, TokenId, TokenSnapshot,
    TokenType, TurnState, WeaponSpec,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::turn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not authorized")]
    NotAuthorized,
    #[error("session is full")]
    SessionFull,
    #[error("already joined")]
    AlreadyJoined,
    #[error("session is not accepting players")]
    SessionNotJoinable,
    #[error("token {0} not found")]
    TokenNotFound(TokenId),
    #[error("not your turn")]
    NotYourTurn,
    #[error("insufficient movement: budget {budget}, cost {cost}")]
    InsufficientMovement { budget: u32, cost: u32 },
    #[error("already used this turn")]
    AlreadyUsedThisTurn,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("internal inconsistency: {0}")]
    Internal(String),
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotAuthorized => ErrorCode::NotAuthorized,
            SessionError::SessionFull => ErrorCode::SessionFull,
            SessionError::AlreadyJoined => ErrorCode::AlreadyJoined,
            SessionError::SessionNotJoinable => ErrorCode::SessionNotJoinable,
            SessionError::TokenNotFound(_) => ErrorCode::TokenNotFound,
            SessionError::NotYourTurn => ErrorCode::NotYourTurn,
            SessionError::InsufficientMovement { .. } => ErrorCode::InsufficientMovement,
            SessionError::AlreadyUsedThisTurn => ErrorCode::AlreadyUsedThisTurn,
            SessionError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            SessionError::InvalidAction(_) => ErrorCode::InvalidAction,
            SessionError::Internal(_) => ErrorCode::Internal,
            SessionError::Closed => ErrorCode::SessionNotFound,
        }
    }
}

impl From<CombatError> for SessionError {
    fn from(err: CombatError) -> Self {
        match err {
            CombatError::AlreadyUsedThisTurn => SessionError::AlreadyUsedThisTurn,
            CombatError::InsufficientMovement { budget, cost } => {
                SessionError::InsufficientMovement { budget, cost }
            }
            CombatError::NotActive | CombatError::Removed => {
                SessionError::InvalidTransition("combatant is not active".to_string())
            }
            CombatError::Rules(err) => SessionError::InvalidAction(err.to_string()),
        }
    }
}

/// Grid-level settings a session is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub bounds: GridBounds,
    /// First cell of the spawn row used when the map has no spawn table.
    pub default_spawn: GridPos,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            bounds: GridBounds::default(),
            default_spawn: GridPos::new(0, 0),
        }
    }
}

/// A roster member and the sheet copy fetched when they joined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub principal: Principal,
    pub sheet: CharacterSheet,
}

impl RosterEntry {
    pub fn token_id(&self) -> TokenId {
        TokenId::for_character(self.sheet.id)
    }

    fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            principal: self.principal.clone(),
            character_id: self.sheet.id,
            character_name: self.sheet.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub position: GridPos,
    pub owner: Principal,
    pub token_type: TokenType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    id: SessionId,
    name: String,
    description: String,
    game_master: Principal,
    max_players: u32,
    phase: SessionPhase,
    roster: Vec<RosterEntry>,
    current_map: Option<String>,
    spawn_table: Vec<GridPos>,
    turn: Option<TurnState>,
    tokens: BTreeMap<TokenId, TokenPosition>,
    combatants: BTreeMap<TokenId, CombatState>,
    settings: SessionSettings,
}

impl SessionState {
    pub fn new(
        id: SessionId,
        game_master: Principal,
        request: &CreateSession,
        spawn_table: Option<Vec<GridPos>>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        if request.max_players == 0 {
            return Err(SessionError::InvalidAction(
                "max_players must be at least 1".to_string(),
            ));
        }
        if request.name.trim().is_empty() {
            return Err(SessionError::InvalidAction(
                "session name is required".to_string(),
            ));
        }
        Ok(Self {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
            game_master,
            max_players: request.max_players,
            phase: SessionPhase::Waiting,
            roster: Vec::new(),
            current_map: request.map_id.clone(),
            spawn_table: usable_spawns(spawn_table, settings.bounds),
            turn: None,
            tokens: BTreeMap::new(),
            combatants: BTreeMap::new(),
            settings,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn game_master(&self) -> &Principal {
        &self.game_master
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn turn(&self) -> Option<TurnState> {
        self.turn
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn is_member(&self, principal: &Principal) -> bool {
        self.roster.iter().any(|r| &r.principal == principal)
    }

    /// Members and the GM may watch the session.
    pub fn can_observe(&self, principal: &Principal) -> bool {
        principal == &self.game_master || self.is_member(principal)
    }

    pub fn token(&self, id: &TokenId) -> Option<&TokenPosition> {
        self.tokens.get(id)
    }

    pub fn combatant(&self, id: &TokenId) -> Option<&CombatState> {
        self.combatants.get(id)
    }

    pub fn join(
        &mut self,
        principal: &Principal,
        sheet: CharacterSheet,
    ) -> Result<Vec<Event>, SessionError> {
        if self.phase != SessionPhase::Waiting {
            return Err(SessionError::SessionNotJoinable);
        }
        if self.is_member(principal) {
            return Err(SessionError::AlreadyJoined);
        }
        if self.roster.len() >= self.max_players as usize {
            return Err(SessionError::SessionFull);
        }
        if self.roster.iter().any(|r| r.sheet.id == sheet.id) {
            return Err(SessionError::InvalidAction(format!(
                "character {} is already on the roster",
                sheet.id
            )));
        }
        check_stats(sheet.pace, sheet.parry, sheet.toughness)?;

        let entry = RosterEntry {
            principal: principal.clone(),
            sheet,
        };
        let snapshot = entry.snapshot();
        self.roster.push(entry);
        Ok(vec![Event::PlayerJoined { entry: snapshot }])
    }

    /// Leaving is idempotent: a principal not on the roster produces no events,
    /// unless it is the GM abandoning a session that never started.
    pub fn leave(&mut self, principal: &Principal) -> Result<Vec<Event>, SessionError> {
        if self.phase == SessionPhase::Ended {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        if let Some(idx) = self.roster.iter().position(|r| &r.principal == principal) {
            let entry = self.roster.remove(idx);
            let token_id = entry.token_id();
            let mut removed_tokens = Vec::new();
            let had_token = self.tokens.remove(&token_id).is_some();
            if let Some(mut combatant) = self.combatants.remove(&token_id) {
                combatant.remove();
                removed_tokens.push(token_id);
            } else if had_token {
                removed_tokens.push(token_id);
            }
            events.push(Event::PlayerLeft {
                principal: principal.clone(),
                removed_tokens,
            });
        }

        if principal == &self.game_master && self.phase == SessionPhase::Waiting {
            self.finish();
            events.push(Event::SessionEnded {
                ended_by: principal.clone(),
            });
        }
        Ok(events)
    }

    pub fn start(&mut self, principal: &Principal) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        if self.phase != SessionPhase::Waiting {
            return Err(SessionError::InvalidTransition(format!(
                "cannot start a session that is {:?}",
                self.phase
            )));
        }
        if self.roster.is_empty() {
            return Err(SessionError::InvalidTransition(
                "cannot start without players".to_string(),
            ));
        }

        let mut combatants = BTreeMap::new();
        let mut tokens = BTreeMap::new();
        for (idx, entry) in self.roster.iter().enumerate() {
            let mut combatant = CombatState::for_player(entry.principal.clone(), &entry.sheet);
            combatant.activate()?;
            tokens.insert(
                combatant.token_id.clone(),
                TokenPosition {
                    position: self.spawn_cell(idx),
                    owner: entry.principal.clone(),
                    token_type: TokenType::Player,
                },
            );
            combatants.insert(combatant.token_id.clone(), combatant);
        }

        self.combatants = combatants;
        self.tokens = tokens;
        self.turn = Some(TurnState::first());
        self.phase = SessionPhase::Active;
        Ok(vec![Event::GameStarted {
            snapshot: self.snapshot(),
        }])
    }

    pub fn move_token(
        &mut self,
        principal: &Principal,
        token_id: &TokenId,
        to: GridPos,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_active()?;
        if !self.settings.bounds.contains(to) {
            return Err(SessionError::InvalidAction(format!("{to} is outside the grid")));
        }
        let from = self.check_actor(principal, token_id)?.position;
        let cost = rules::movement_cost(from, to);

        let remaining_budget = self.combatant_mut(token_id)?.spend(cost)?;
        if let Some(token) = self.tokens.get_mut(token_id) {
            token.position = to;
        }
        Ok(vec![Event::TokenMoved {
            token_id: token_id.clone(),
            from,
            to,
            remaining_budget,
        }])
    }

    /// `d6` is rolled by the caller before the command reaches the session.
    pub fn sprint(
        &mut self,
        principal: &Principal,
        token_id: &TokenId,
        d6: u32,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_active()?;
        self.check_actor(principal, token_id)?;
        let movement_budget = self.combatant_mut(token_id)?.sprint(d6)?;
        Ok(vec![Event::SprintUsed {
            token_id: token_id.clone(),
            roll: d6,
            movement_budget,
        }])
    }

    /// Works out what the attack roll needs. The roll itself happens elsewhere.
    pub fn resolve_attack(
        &self,
        principal: &Principal,
        attacker: &TokenId,
        target: &TokenId,
        weapon: &WeaponSpec,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_active()?;
        let weapon =
            Weapon::try_from(weapon).map_err(|err| SessionError::InvalidAction(err.to_string()))?;
        let from = self.check_actor(principal, attacker)?.position;
        let to = self
            .tokens
            .get(target)
            .ok_or_else(|| SessionError::TokenNotFound(target.clone()))?
            .position;
        if attacker == target {
            return Err(SessionError::InvalidAction(
                "a token cannot attack itself".to_string(),
            ));
        }

        let attacking = self.combatant_ref(attacker)?;
        let defending = self.combatant_ref(target)?;
        let distance = rules::distance(from, to);
        let tn = rules::resolve_target_number(AttackInput {
            weapon_is_ranged: weapon.is_ranged(),
            distance,
            target_parry: defending.parry,
        });
        let skill = rules::attack_skill_or_unskilled(&attacking.skills, weapon.is_ranged());
        let modifier = rules::attack_modifier(attacking.wounds, weapon.range.as_ref(), distance);

        Ok(vec![Event::AttackResolved {
            outcome: AttackOutcome {
                attacker: attacker.clone(),
                target: target.clone(),
                weapon: weapon.name,
                distance,
                target_number: tn.target_number,
                uses_parry: tn.uses_parry,
                skill_used: skill.name,
                skill_die: skill.die.to_string(),
                modifier,
            },
        }])
    }

    /// Clears the board. Player combatants stay active off-grid until respawned.
    pub fn change_map(
        &mut self,
        principal: &Principal,
        map_id: String,
        spawn_table: Option<Vec<GridPos>>,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        if self.phase == SessionPhase::Ended {
            return Err(SessionError::InvalidTransition(
                "session has ended".to_string(),
            ));
        }

        self.current_map = Some(map_id.clone());
        self.spawn_table = usable_spawns(spawn_table, self.settings.bounds);
        self.tokens.clear();
        self.combatants.retain(|_, c| c.token_type == TokenType::Player);
        Ok(vec![Event::MapChanged {
            map_id,
            snapshot: self.snapshot(),
        }])
    }

    pub fn reset_game(&mut self, principal: &Principal) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        self.require_active()?;

        self.tokens.clear();
        self.combatants.retain(|_, c| c.token_type == TokenType::Player);
        for idx in 0..self.roster.len() {
            let token_id = self.roster[idx].token_id();
            let owner = self.roster[idx].principal.clone();
            let position = self.spawn_cell(idx);
            let Some(combatant) = self.combatants.get_mut(&token_id) else {
                continue;
            };
            combatant.reset();
            if combatant.is_active() {
                self.tokens.insert(
                    token_id,
                    TokenPosition {
                        position,
                        owner,
                        token_type: TokenType::Player,
                    },
                );
            }
        }
        self.turn = Some(TurnState::first());
        Ok(vec![Event::GameReset {
            snapshot: self.snapshot(),
        }])
    }

    pub fn end_turn(&mut self, principal: &Principal) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        self.require_active()?;
        let current = self
            .turn
            .ok_or_else(|| SessionError::Internal("active session without a turn".to_string()))?;

        let next = turn::advance(current);
        let side = next.phase.acting_side();
        for combatant in self.combatants.values_mut() {
            if combatant.token_type == side {
                combatant.begin_phase();
            }
        }
        self.turn = Some(next);
        Ok(vec![Event::TurnAdvanced {
            turn_number: next.turn_number,
            turn_phase: next.phase,
        }])
    }

    /// Put an off-grid player token back on its spawn cell.
    pub fn spawn_token(
        &mut self,
        principal: &Principal,
        token_id: &TokenId,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_active()?;
        let combatant = self
            .combatants
            .get(token_id)
            .ok_or_else(|| SessionError::TokenNotFound(token_id.clone()))?;
        if combatant.token_type != TokenType::Player {
            return Err(SessionError::InvalidAction(
                "only player tokens can be respawned".to_string(),
            ));
        }
        if principal != &self.game_master && principal != &combatant.owner {
            return Err(SessionError::NotAuthorized);
        }
        if self.tokens.contains_key(token_id) {
            return Err(SessionError::InvalidAction(format!(
                "token {token_id} is already on the grid"
            )));
        }
        combatant.ensure_active()?;

        let idx = self
            .roster
            .iter()
            .position(|r| &r.token_id() == token_id)
            .unwrap_or(0);
        let token = TokenPosition {
            position: self.spawn_cell(idx),
            owner: combatant.owner.clone(),
            token_type: TokenType::Player,
        };
        let combatant = combatant.snapshot();
        self.tokens.insert(token_id.clone(), token.clone());
        Ok(vec![Event::TokenPlaced {
            token: token_snapshot(token_id, &token),
            combatant,
        }])
    }

    pub fn place_npc(
        &mut self,
        principal: &Principal,
        token_id: TokenId,
        name: String,
        at: GridPos,
        stats: &NpcStats,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        self.require_active()?;
        if !self.settings.bounds.contains(at) {
            return Err(SessionError::InvalidAction(format!("{at} is outside the grid")));
        }
        if self.tokens.contains_key(&token_id) || self.combatants.contains_key(&token_id) {
            return Err(SessionError::InvalidAction(format!(
                "token id {token_id} is already in use"
            )));
        }
        check_stats(stats.pace, stats.parry, stats.toughness)?;
        let skills = stats
            .skills
            .iter()
            .map(Skill::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SessionError::InvalidAction(err.to_string()))?;

        let combatant = CombatState::npc(
            token_id.clone(),
            name,
            self.game_master.clone(),
            stats.pace,
            stats.parry,
            stats.toughness,
            skills,
        );
        let token = TokenPosition {
            position: at,
            owner: self.game_master.clone(),
            token_type: TokenType::Npc,
        };
        let event = Event::TokenPlaced {
            token: token_snapshot(&token_id, &token),
            combatant: combatant.snapshot(),
        };
        self.tokens.insert(token_id.clone(), token);
        self.combatants.insert(token_id, combatant);
        Ok(vec![event])
    }

    pub fn remove_token(
        &mut self,
        principal: &Principal,
        token_id: &TokenId,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        self.require_active()?;
        if self.tokens.remove(token_id).is_none() {
            return Err(SessionError::TokenNotFound(token_id.clone()));
        }
        if let Some(mut combatant) = self.combatants.remove(token_id) {
            combatant.remove();
        }
        Ok(vec![Event::TokenRemoved {
            token_id: token_id.clone(),
        }])
    }

    /// The GM rolls damage at the table; this applies the total to Toughness.
    pub fn apply_damage(
        &mut self,
        principal: &Principal,
        token_id: &TokenId,
        damage: u32,
    ) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        self.require_active()?;
        if !self.tokens.contains_key(token_id) {
            return Err(SessionError::TokenNotFound(token_id.clone()));
        }
        let combatant = self.combatant_mut(token_id)?;
        let outcome = combatant.take_damage(damage)?;
        let event = Event::DamageApplied {
            token_id: token_id.clone(),
            damage,
            wounds_dealt: outcome.wounds_dealt,
            wounds: combatant.wounds,
            shaken: combatant.shaken,
            status: combatant.status,
        };
        if combatant.status == CombatStatus::Removed {
            self.tokens.remove(token_id);
        }
        Ok(vec![event])
    }

    pub fn end_session(&mut self, principal: &Principal) -> Result<Vec<Event>, SessionError> {
        self.require_gm(principal)?;
        if self.phase == SessionPhase::Ended {
            return Err(SessionError::InvalidTransition(
                "session has already ended".to_string(),
            ));
        }
        self.finish();
        Ok(vec![Event::SessionEnded {
            ended_by: principal.clone(),
        }])
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            game_master: self.game_master.clone(),
            max_players: self.max_players,
            state: self.phase,
            roster: self.roster.iter().map(RosterEntry::snapshot).collect(),
            current_map: self.current_map.clone(),
            turn: self.turn,
            tokens: self
                .tokens
                .iter()
                .map(|(id, token)| token_snapshot(id, token))
                .collect(),
            combatants: self.combatants.values().map(CombatState::snapshot).collect(),
        }
    }

    /// Structural checks run after every applied command.
    pub fn check_invariants(&self) -> Result<(), SessionError> {
        let broken = |what: String| Err(SessionError::Internal(what));

        if self.roster.len() > self.max_players as usize {
            return broken(format!(
                "roster has {} players, limit is {}",
                self.roster.len(),
                self.max_players
            ));
        }
        for (id, combatant) in &self.combatants {
            if &combatant.token_id != id {
                return broken(format!(
                    "combatant {} filed under token {id}",
                    combatant.token_id
                ));
            }
        }
        for (id, token) in &self.tokens {
            match self.combatants.get(id) {
                Some(c)
                    if c.status == CombatStatus::Active && c.token_type == token.token_type => {}
                Some(_) => return broken(format!("token {id} has no active combatant")),
                None => return broken(format!("token {id} has no combatant")),
            }
        }
        match self.phase {
            SessionPhase::Waiting => {
                if !self.tokens.is_empty() || self.turn.is_some() {
                    return broken("waiting session has tokens or a turn".to_string());
                }
            }
            SessionPhase::Active => match self.turn {
                Some(turn) if turn.turn_number >= 1 => {}
                _ => return broken("active session without a valid turn".to_string()),
            },
            SessionPhase::Ended => {
                if !self.tokens.is_empty() || self.turn.is_some() {
                    return broken("ended session still has tokens or a turn".to_string());
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.phase = SessionPhase::Ended;
        self.turn = None;
        self.tokens.clear();
        for combatant in self.combatants.values_mut() {
            combatant.remove();
        }
    }

    fn require_gm(&self, principal: &Principal) -> Result<(), SessionError> {
        if principal == &self.game_master {
            Ok(())
        } else {
            Err(SessionError::NotAuthorized)
        }
    }

    fn require_active(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Active {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition(format!("session is {:?}", self.phase)))
        }
    }

    /// Token lookup, ownership and phase checks for a token about to act.
    fn check_actor(
        &self,
        principal: &Principal,
        token_id: &TokenId,
    ) -> Result<&TokenPosition, SessionError> {
        let token = self
            .tokens
            .get(token_id)
            .ok_or_else(|| SessionError::TokenNotFound(token_id.clone()))?;

        let is_gm = principal == &self.game_master;
        let may_control = match token.token_type {
            TokenType::Player => is_gm || &token.owner == principal,
            TokenType::Npc => is_gm,
        };
        if !may_control {
            return Err(SessionError::NotAuthorized);
        }

        let turn = self
            .turn
            .ok_or_else(|| SessionError::Internal("active session without a turn".to_string()))?;
        if turn.phase.acting_side() != token.token_type {
            return Err(SessionError::NotYourTurn);
        }
        Ok(token)
    }

    fn combatant_ref(&self, token_id: &TokenId) -> Result<&CombatState, SessionError> {
        self.combatants
            .get(token_id)
            .ok_or_else(|| SessionError::Internal(format!("token {token_id} has no combatant")))
    }

    fn combatant_mut(&mut self, token_id: &TokenId) -> Result<&mut CombatState, SessionError> {
        self.combatants
            .get_mut(token_id)
            .ok_or_else(|| SessionError::Internal(format!("token {token_id} has no combatant")))
    }

    fn spawn_cell(&self, idx: usize) -> GridPos {
        if !self.spawn_table.is_empty() {
            return self.spawn_table[idx % self.spawn_table.len()];
        }
        let offset = i32::try_from(idx).unwrap_or(0);
        let cell = self.settings.default_spawn.offset(offset, 0);
        if self.settings.bounds.contains(cell) {
            cell
        } else {
            self.settings.default_spawn
        }
    }
}

fn token_snapshot(id: &TokenId, token: &TokenPosition) -> TokenSnapshot {
    TokenSnapshot {
        token_id: id.clone(),
        position: token.position,
        owner: token.owner.clone(),
        token_type: token.token_type,
    }
}

fn check_stats(pace: u32, parry: u32, toughness: u32) -> Result<(), SessionError> {
    for (stat, value) in [("pace", pace), ("parry", parry), ("toughness", toughness)] {
        rules::check_stat(stat, value)
            .map_err(|err| SessionError::InvalidAction(err.to_string()))?;
    }
    Ok(())
}

fn usable_spawns(table: Option<Vec<GridPos>>, bounds: GridBounds) -> Vec<GridPos> {
    table
        .unwrap_or_default()
        .into_iter()
        .filter(|cell| bounds.contains(*cell))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagebrush_core::Die;
    use sagebrush_protocol::{CharacterId, SkillSpec, TurnPhase};

    fn gm() -> Principal {
        Principal::from("gm")
    }

    fn sheet(id: u64, owner: &str, pace: u32) -> CharacterSheet {
        CharacterSheet {
            id: CharacterId(id),
            owner: Principal::from(owner),
            name: format!("Hero {id}"),
            pace,
            parry: 5,
            toughness: 6,
            attributes: BTreeMap::new(),
            skills: vec![
                Skill::new("Fighting", Die::new(8)),
                Skill::new("Shooting", Die::new(10)),
            ],
            wounds: 0,
            wound_threshold: 3,
        }
    }

    fn session(max_players: u32) -> SessionState {
        SessionState::new(
            SessionId::new("s-1"),
            gm(),
            &CreateSession {
                name: "Deadwood".to_string(),
                description: String::new(),
                max_players,
                map_id: None,
            },
            None,
            SessionSettings::default(),
        )
        .unwrap()
    }

    fn started() -> SessionState {
        let mut s = session(4);
        s.join(&Principal::from("ana"), sheet(1, "ana", 6)).unwrap();
        s.join(&Principal::from("bo"), sheet(2, "bo", 5)).unwrap();
        s.start(&gm()).unwrap();
        s
    }

    fn bandit() -> NpcStats {
        NpcStats {
            pace: 6,
            parry: 4,
            toughness: 5,
            skills: vec![SkillSpec {
                name: "Shooting".to_string(),
                die: "d6".to_string(),
            }],
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = SessionState::new(
            SessionId::new("s"),
            gm(),
            &CreateSession {
                name: "x".to_string(),
                description: String::new(),
                max_players: 0,
                map_id: None,
            },
            None,
            SessionSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAction);
    }

    #[test]
    fn join_rules() {
        let mut s = session(1);
        s.join(&Principal::from("ana"), sheet(1, "ana", 6)).unwrap();
        assert_eq!(
            s.join(&Principal::from("ana"), sheet(3, "ana", 6)),
            Err(SessionError::AlreadyJoined)
        );
        assert_eq!(
            s.join(&Principal::from("bo"), sheet(2, "bo", 6)),
            Err(SessionError::SessionFull)
        );
        assert_eq!(s.roster().len(), 1);
    }

    #[test]
    fn start_places_every_player() {
        let s = started();
        assert_eq!(s.phase(), SessionPhase::Active);
        assert_eq!(s.turn(), Some(TurnState::first()));
        for id in ["1", "2"] {
            let c = s.combatant(&TokenId::from(id)).unwrap();
            assert_eq!(c.status, CombatStatus::Active);
            assert_eq!(c.movement_budget, c.pace);
            assert!(s.token(&TokenId::from(id)).is_some());
        }
        assert_eq!(s.token(&TokenId::from("2")).unwrap().position, GridPos::new(1, 0));
        s.check_invariants().unwrap();
    }

    #[test]
    fn only_gm_starts_and_only_once() {
        let mut s = session(2);
        s.join(&Principal::from("ana"), sheet(1, "ana", 6)).unwrap();
        assert_eq!(s.start(&Principal::from("ana")), Err(SessionError::NotAuthorized));
        s.start(&gm()).unwrap();
        assert!(matches!(s.start(&gm()), Err(SessionError::InvalidTransition(_))));
        assert_eq!(
            s.join(&Principal::from("bo"), sheet(2, "bo", 6)),
            Err(SessionError::SessionNotJoinable)
        );
    }

    #[test]
    fn empty_roster_cannot_start() {
        let mut s = session(2);
        assert!(matches!(s.start(&gm()), Err(SessionError::InvalidTransition(_))));
        assert_eq!(s.phase(), SessionPhase::Waiting);
    }

    #[test]
    fn move_checks_ownership_and_budget() {
        let mut s = started();
        let ana = Principal::from("ana");
        let token = TokenId::from("1");

        assert_eq!(
            s.move_token(&Principal::from("bo"), &token, GridPos::new(2, 2)),
            Err(SessionError::NotAuthorized)
        );
        let events = s.move_token(&ana, &token, GridPos::new(4, 0)).unwrap();
        assert!(matches!(
            events[0],
            Event::TokenMoved {
                remaining_budget: 2,
                ..
            }
        ));
        let before = s.snapshot();
        assert_eq!(
            s.move_token(&ana, &token, GridPos::new(7, 0)),
            Err(SessionError::InsufficientMovement { budget: 2, cost: 3 })
        );
        assert_eq!(s.snapshot(), before);
        assert!(matches!(
            s.move_token(&ana, &token, GridPos::new(200, 0)),
            Err(SessionError::InvalidAction(_))
        ));
    }

    #[test]
    fn phases_gate_sides() {
        let mut s = started();
        s.place_npc(
            &gm(),
            TokenId::from("bandit"),
            "Bandit".into(),
            GridPos::new(5, 5),
            &bandit(),
        )
        .unwrap();
        assert_eq!(
            s.move_token(&gm(), &TokenId::from("bandit"), GridPos::new(5, 6)),
            Err(SessionError::NotYourTurn)
        );
        assert_eq!(
            s.end_turn(&Principal::from("ana")),
            Err(SessionError::NotAuthorized)
        );
        s.end_turn(&gm()).unwrap();
        assert_eq!(
            s.move_token(&Principal::from("ana"), &TokenId::from("1"), GridPos::new(1, 1)),
            Err(SessionError::NotYourTurn)
        );
        s.move_token(&gm(), &TokenId::from("bandit"), GridPos::new(5, 6))
            .unwrap();
        s.check_invariants().unwrap();
    }

    #[test]
    fn end_turn_refreshes_the_side_that_acts_next() {
        let mut s = started();
        let ana = Principal::from("ana");
        let token = TokenId::from("1");
        s.move_token(&ana, &token, GridPos::new(3, 0)).unwrap();
        s.sprint(&ana, &token, 2).unwrap();
        assert_eq!(s.sprint(&ana, &token, 2), Err(SessionError::AlreadyUsedThisTurn));

        let events = s.end_turn(&gm()).unwrap();
        assert_eq!(
            events,
            vec![Event::TurnAdvanced {
                turn_number: 1,
                turn_phase: TurnPhase::EnemyTurn
            }]
        );
        assert!(s.combatant(&token).unwrap().sprint_used);

        s.end_turn(&gm()).unwrap();
        let c = s.combatant(&token).unwrap();
        assert_eq!(s.turn().unwrap().turn_number, 2);
        assert_eq!(c.movement_budget, 6);
        assert!(!c.sprint_used);
    }

    #[test]
    fn attack_reports_target_number_and_skill() {
        let mut s = started();
        s.place_npc(
            &gm(),
            TokenId::from("bandit"),
            "Bandit".into(),
            GridPos::new(0, 6),
            &bandit(),
        )
        .unwrap();
        let rifle = WeaponSpec {
            name: "Winchester".to_string(),
            damage: "2d8".to_string(),
            range: Some("24/48/96".to_string()),
        };
        let events = s
            .resolve_attack(
                &Principal::from("ana"),
                &TokenId::from("1"),
                &TokenId::from("bandit"),
                &rifle,
            )
            .unwrap();
        let Event::AttackResolved { outcome } = &events[0] else {
            panic!("unexpected event {events:?}");
        };
        assert_eq!(outcome.distance, 6);
        assert_eq!(outcome.target_number, 4);
        assert!(!outcome.uses_parry);
        assert_eq!(outcome.skill_used, "Shooting");
        assert_eq!(outcome.skill_die, "d10");
        assert_eq!(outcome.modifier, 0);

        let knife = WeaponSpec {
            name: "Knife".to_string(),
            damage: "Str+d4".to_string(),
            range: None,
        };
        let events = s
            .resolve_attack(
                &Principal::from("ana"),
                &TokenId::from("1"),
                &TokenId::from("bandit"),
                &knife,
            )
            .unwrap();
        let Event::AttackResolved { outcome } = &events[0] else {
            panic!("unexpected event {events:?}");
        };
        assert_eq!(outcome.target_number, 4);
        assert!(outcome.uses_parry);
        assert_eq!(outcome.skill_used, "Fighting");
    }

    #[test]
    fn map_change_clears_board_and_respawn_restores_players() {
        let mut s = started();
        s.place_npc(
            &gm(),
            TokenId::from("bandit"),
            "Bandit".into(),
            GridPos::new(3, 3),
            &bandit(),
        )
        .unwrap();
        s.change_map(
            &gm(),
            "saloon".to_string(),
            Some(vec![GridPos::new(10, 10), GridPos::new(300, 0)]),
        )
            .unwrap();
        assert!(s.snapshot().tokens.is_empty());
        assert!(s.combatant(&TokenId::from("bandit")).is_none());
        assert_eq!(s.combatant(&TokenId::from("1")).unwrap().status, CombatStatus::Active);
        s.check_invariants().unwrap();

        assert_eq!(
            s.spawn_token(&Principal::from("bo"), &TokenId::from("1")),
            Err(SessionError::NotAuthorized)
        );
        s.spawn_token(&Principal::from("ana"), &TokenId::from("1")).unwrap();
        assert_eq!(s.token(&TokenId::from("1")).unwrap().position, GridPos::new(10, 10));
        assert!(matches!(
            s.spawn_token(&Principal::from("ana"), &TokenId::from("1")),
            Err(SessionError::InvalidAction(_))
        ));
    }

    #[test]
    fn reset_returns_to_turn_one() {
        let mut s = started();
        s.move_token(&Principal::from("ana"), &TokenId::from("1"), GridPos::new(5, 5))
            .unwrap();
        s.end_turn(&gm()).unwrap();
        s.place_npc(
            &gm(),
            TokenId::from("bandit"),
            "Bandit".into(),
            GridPos::new(3, 3),
            &bandit(),
        )
        .unwrap();
        s.reset_game(&gm()).unwrap();

        assert_eq!(s.turn(), Some(TurnState::first()));
        assert!(s.combatant(&TokenId::from("bandit")).is_none());
        assert_eq!(s.token(&TokenId::from("1")).unwrap().position, GridPos::new(0, 0));
        assert_eq!(s.combatant(&TokenId::from("1")).unwrap().movement_budget, 6);
        s.check_invariants().unwrap();
    }

    #[test]
    fn npc_ids_must_be_unique() {
        let mut s = started();
        assert!(matches!(
            s.place_npc(
                &gm(),
                TokenId::from("1"),
                "Imposter".into(),
                GridPos::new(3, 3),
                &bandit()
            ),
            Err(SessionError::InvalidAction(_))
        ));
        assert_eq!(
            s.place_npc(
                &Principal::from("ana"),
                TokenId::from("x"),
                "X".into(),
                GridPos::new(3, 3),
                &bandit()
            ),
            Err(SessionError::NotAuthorized)
        );
    }

    #[test]
    fn leaving_mid_game_takes_the_token() {
        let mut s = started();
        let events = s.leave(&Principal::from("bo")).unwrap();
        assert_eq!(
            events,
            vec![Event::PlayerLeft {
                principal: Principal::from("bo"),
                removed_tokens: vec![TokenId::from("2")],
            }]
        );
        assert!(s.token(&TokenId::from("2")).is_none());
        assert!(s.leave(&Principal::from("bo")).unwrap().is_empty());
        s.check_invariants().unwrap();
    }

    #[test]
    fn gm_leaving_before_start_ends_session() {
        let mut s = session(2);
        s.join(&Principal::from("ana"), sheet(1, "ana", 6)).unwrap();
        let events = s.leave(&gm()).unwrap();
        assert_eq!(
            events,
            vec![Event::SessionEnded { ended_by: gm() }]
        );
        assert_eq!(s.phase(), SessionPhase::Ended);
        assert!(s.leave(&Principal::from("ana")).unwrap().is_empty());
    }

    #[test]
    fn end_session_is_terminal() {
        let mut s = started();
        s.end_session(&gm()).unwrap();
        assert_eq!(s.phase(), SessionPhase::Ended);
        assert!(s.snapshot().tokens.is_empty());
        assert!(s
            .snapshot()
            .combatants
            .iter()
            .all(|c| c.status == CombatStatus::Removed));
        assert!(matches!(s.end_session(&gm()), Err(SessionError::InvalidTransition(_))));
        assert!(matches!(
            s.change_map(&gm(), "m".into(), None),
            Err(SessionError::InvalidTransition(_))
        ));
        s.check_invariants().unwrap();
    }

    #[test]
    fn wounds_from_damage_penalize_later_attacks() {
        let mut s = started();
        s.place_npc(
            &gm(),
            TokenId::from("bandit"),
            "Bandit".into(),
            GridPos::new(0, 6),
            &bandit(),
        )
        .unwrap();
        let ana = TokenId::from("1");
        let events = s.apply_damage(&gm(), &ana, 6).unwrap();
        assert_eq!(
            events,
            vec![Event::DamageApplied {
                token_id: ana.clone(),
                damage: 6,
                wounds_dealt: 1,
                wounds: 1,
                shaken: true,
                status: CombatStatus::Active,
            }]
        );

        let rifle = WeaponSpec {
            name: "Winchester".to_string(),
            damage: "2d8".to_string(),
            range: Some("24/48/96".to_string()),
        };
        let events = s
            .resolve_attack(
                &Principal::from("ana"),
                &ana,
                &TokenId::from("bandit"),
                &rifle,
            )
            .unwrap();
        let Event::AttackResolved { outcome } = &events[0] else {
            panic!("unexpected event {events:?}");
        };
        assert_eq!(outcome.modifier, -1);
    }

    #[test]
    fn incapacitated_combatant_leaves_the_grid_until_reset() {
        let mut s = started();
        let bo = TokenId::from("2");
        assert_eq!(
            s.apply_damage(&Principal::from("ana"), &bo, 20),
            Err(SessionError::NotAuthorized)
        );
        s.apply_damage(&gm(), &bo, 14).unwrap();
        assert_eq!(s.combatant(&bo).unwrap().status, CombatStatus::Removed);
        assert!(s.token(&bo).is_none());
        s.check_invariants().unwrap();
        assert_eq!(
            s.apply_damage(&gm(), &bo, 6),
            Err(SessionError::TokenNotFound(bo.clone()))
        );

        s.reset_game(&gm()).unwrap();
        let c = s.combatant(&bo).unwrap();
        assert_eq!(c.status, CombatStatus::Active);
        assert_eq!(c.wounds, 0);
        assert!(s.token(&bo).is_some());
        s.check_invariants().unwrap();
    }

    #[test]
    fn sheet_wounds_carry_into_combat() {
        let mut s = session(2);
        let mut hurt = sheet(1, "ana", 6);
        hurt.wounds = 2;
        s.join(&Principal::from("ana"), hurt).unwrap();
        s.start(&gm()).unwrap();
        let c = s.combatant(&TokenId::from("1")).unwrap();
        assert_eq!(c.wounds, 2);
        assert_eq!(s.snapshot().combatants[0].wounds, 2);
    }

    #[test]
    fn out_of_range_stats_are_refused() {
        let mut s = started();
        let mut huge = bandit();
        huge.pace = u32::MAX;
        assert!(matches!(
            s.place_npc(
                &gm(),
                TokenId::from("big"),
                "Big".into(),
                GridPos::new(3, 3),
                &huge
            ),
            Err(SessionError::InvalidAction(_))
        ));
        assert!(s.combatant(&TokenId::from("big")).is_none());

        let mut fresh = session(2);
        let mut giant = sheet(1, "ana", 6);
        giant.toughness = 1_000;
        assert!(matches!(
            fresh.join(&Principal::from("ana"), giant),
            Err(SessionError::InvalidAction(_))
        ));
    }

    #[test]
    fn remove_token_drops_combatant() {
        let mut s = started();
        s.remove_token(&gm(), &TokenId::from("2")).unwrap();
        assert!(s.combatant(&TokenId::from("2")).is_none());
        assert_eq!(
            s.remove_token(&gm(), &TokenId::from("2")),
            Err(SessionError::TokenNotFound(TokenId::from("2")))
        );
    }
}
