//! Renet channel layout.
//!
//! Channel 0: ReliableOrdered - actions in, session events out
//! Channel 1: ReliableUnordered - rejections and session creation replies
//! Channel 2: Unreliable - ping/pong

use std::time::Duration;

use renet::ChannelConfig;

use crate::protocol::ServerMessage;

/// Channel IDs for different message types
pub mod channel_id {
    /// Actions and sequenced events; order matters
    pub const EVENTS: u8 = 0;
    /// Replies to a single request
    pub const REPLIES: u8 = 1;
    /// Ping/keepalive - can be lost
    pub const HEARTBEAT: u8 = 2;
}

const MAX_CHANNEL_MEMORY: usize = 5 * 1024 * 1024; // 5 MB

pub fn create_channel_configs() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            channel_id: channel_id::EVENTS,
            max_memory_usage_bytes: MAX_CHANNEL_MEMORY,
            send_type: renet::SendType::ReliableOrdered {
                resend_time: Duration::from_millis(300),
            },
        },
        ChannelConfig {
            channel_id: channel_id::REPLIES,
            max_memory_usage_bytes: MAX_CHANNEL_MEMORY / 2,
            send_type: renet::SendType::ReliableUnordered {
                resend_time: Duration::from_millis(300),
            },
        },
        ChannelConfig {
            channel_id: channel_id::HEARTBEAT,
            max_memory_usage_bytes: 64 * 1024,
            send_type: renet::SendType::Unreliable,
        },
    ]
}

/// Channel an outbound message travels on.
pub fn channel_for(message: &ServerMessage) -> u8 {
    match message {
        ServerMessage::Event(_) => channel_id::EVENTS,
        ServerMessage::Rejected { .. } | ServerMessage::SessionCreated { .. } => {
            channel_id::REPLIES
        }
        ServerMessage::Pong { .. } => channel_id::HEARTBEAT,
    }
}
