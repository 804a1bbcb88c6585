use std::fmt;

use serde::{Deserialize, Serialize};

/// Named failure returned for a rejected action. Internal state never leaks past this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotAuthorized,
    SessionFull,
    AlreadyJoined,
    SessionNotJoinable,
    TokenNotFound,
    NotYourTurn,
    InsufficientMovement,
    AlreadyUsedThisTurn,
    SessionNotFound,
    InvalidTransition,
    /// Malformed or out-of-range payload, rejected before reaching a session.
    InvalidAction,
    /// The character service could not supply the requested sheet.
    CharacterUnavailable,
    RateLimited,
    /// The session faulted and was torn down.
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotAuthorized => "NotAuthorized",
            ErrorCode::SessionFull => "SessionFull",
            ErrorCode::AlreadyJoined => "AlreadyJoined",
            ErrorCode::SessionNotJoinable => "SessionNotJoinable",
            ErrorCode::TokenNotFound => "TokenNotFound",
            ErrorCode::NotYourTurn => "NotYourTurn",
            ErrorCode::InsufficientMovement => "InsufficientMovement",
            ErrorCode::AlreadyUsedThisTurn => "AlreadyUsedThisTurn",
            ErrorCode::SessionNotFound => "SessionNotFound",
            ErrorCode::InvalidTransition => "InvalidTransition",
            ErrorCode::InvalidAction => "InvalidAction",
            ErrorCode::CharacterUnavailable => "CharacterUnavailable",
            ErrorCode::RateLimited => "RateLimited",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
