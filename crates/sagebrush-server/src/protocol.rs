//! Transport-level messages wrapping the session action/event envelopes.

use serde::{Deserialize, Serialize};

use sagebrush_protocol::{
    ActionEnvelope, CreateSession, ErrorCode, EventEnvelope, Principal, SessionId,
};

/// Client-to-server messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One action for one session
    Action(ActionEnvelope),
    /// Open a new session (game masters only)
    CreateSession {
        client_sequence: u64,
        principal: Principal,
        request: CreateSession,
    },
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

/// Server-to-client messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sequenced session event
    Event(EventEnvelope),
    /// The request with this client sequence was not applied
    Rejected {
        client_sequence: u64,
        code: ErrorCode,
        message: String,
    },
    SessionCreated {
        client_sequence: u64,
        session_id: SessionId,
    },
    /// Pong response
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

pub fn serialize_client_message(msg: &ClientMessage) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

pub fn deserialize_client_message(data: &[u8]) -> Result<ClientMessage, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

pub fn serialize_server_message(msg: &ServerMessage) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

pub fn deserialize_server_message(data: &[u8]) -> Result<ServerMessage, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagebrush_protocol::{Action, Event, GridPos, TokenId};

    #[test]
    fn roundtrip_client_message() {
        let msg = ClientMessage::Action(ActionEnvelope {
            session_id: SessionId::new("s-1"),
            principal: Principal::from("ana"),
            action: Action::MoveToken {
                token_id: TokenId::from("1"),
                to: GridPos::new(2, 3),
            },
            client_sequence: 4,
        });
        let data = serialize_client_message(&msg).unwrap();
        assert_eq!(deserialize_client_message(&data).unwrap(), msg);
    }

    #[test]
    fn roundtrip_server_message() {
        let msg = ServerMessage::Event(EventEnvelope {
            session_id: SessionId::new("s-1"),
            sequence_number: 9,
            event: Event::TokenRemoved {
                token_id: TokenId::from("bandit"),
            },
        });
        let data = serialize_server_message(&msg).unwrap();
        assert_eq!(deserialize_server_message(&data).unwrap(), msg);

        let rejected = ServerMessage::Rejected {
            client_sequence: 3,
            code: ErrorCode::NotYourTurn,
            message: "not your turn".to_string(),
        };
        let data = serialize_server_message(&rejected).unwrap();
        assert_eq!(deserialize_server_message(&data).unwrap(), rejected);
    }
}
