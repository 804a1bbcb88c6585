//! Per-connection routing state held by the hub.

use std::time::{Duration, Instant};

use sagebrush_protocol::{ConnectionId, Principal, SessionId};
use tokio::sync::mpsc;

use crate::protocol::ServerMessage;

/// Fixed-window message counter.
#[derive(Clone, Debug)]
pub struct RateWindow {
    limit: u32,
    window: Duration,
    started: Instant,
    count: u32,
}

impl RateWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            started: Instant::now(),
            count: 0,
        }
    }

    /// Count one message. False once the window's allowance is used up.
    pub fn check(&mut self, now: Instant) -> bool {
        // Reset window if expired
        if now.duration_since(self.started) >= self.window {
            self.started = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count <= self.limit
    }
}

/// One live client connection. The principal is bound by the first action
/// and may not change afterwards.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub principal: Option<Principal>,
    pub subscribed_session: Option<SessionId>,
    pub last_seen_sequence: Option<u64>,
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    rate: RateWindow,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        rate: RateWindow,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            principal: None,
            subscribed_session: None,
            last_seen_sequence: None,
            outbound,
            connected_at: now,
            last_activity: now,
            rate,
        }
    }

    pub fn check_rate_limit(&mut self) -> bool {
        let now = Instant::now();
        self.last_activity = now;
        self.rate.check(now)
    }

    /// Bind on first use; afterwards the claimed principal must match.
    pub fn bind_principal(&mut self, claimed: &Principal) -> Result<(), Principal> {
        match &self.principal {
            Some(bound) if bound != claimed => Err(bound.clone()),
            Some(_) => Ok(()),
            None => {
                self.principal = Some(claimed.clone());
                Ok(())
            }
        }
    }

    pub fn send(&self, message: ServerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_resets() {
        let mut rate = RateWindow::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(rate.check(t0));
        assert!(rate.check(t0));
        assert!(!rate.check(t0 + Duration::from_secs(1)));
        assert!(rate.check(t0 + Duration::from_secs(61)));
    }

    #[test]
    fn principal_binds_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(
            ConnectionId(1),
            tx,
            RateWindow::new(10, Duration::from_secs(1)),
        );
        conn.bind_principal(&Principal::from("ana")).unwrap();
        conn.bind_principal(&Principal::from("ana")).unwrap();
        assert_eq!(
            conn.bind_principal(&Principal::from("bo")),
            Err(Principal::from("ana"))
        );
    }
}
