use crate::protocol::{Envelope, Outbound};
use std::collections::VecDeque;
use std::time::Duration;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const HEARTBEAT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
pub struct GatewaySession {
    state: ConnectionState,
    buffer: VecDeque<Envelope>,
    handshake: Outbound,
    stopped: bool,
}

impl GatewaySession {
    pub fn new(handshake: Outbound) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            buffer: VecDeque::new(),
            handshake,
            stopped: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn begin_connect(&mut self) {
        self.stopped = false;
        self.state = ConnectionState::Connecting;
    }

    pub fn on_open(&mut self) -> VecDeque<Envelope> {
        self.state = ConnectionState::Connected;
        let mut pending: VecDeque<Envelope> = self.buffer.drain(..).collect();
        pending.push_front(Envelope::new(self.handshake.clone()));
        pending
    }

    pub fn send(&mut self, envelope: Envelope) -> Option<Envelope> {
        if self.state == ConnectionState::Connected {
            Some(envelope)
        } else {
            self.buffer.push_back(envelope);
            None
        }
    }

    // Handshakes are dropped; every open sends a fresh one.
    pub fn restore(&mut self, envelopes: impl IntoIterator<Item = Envelope>) {
        let restored: Vec<Envelope> = envelopes
            .into_iter()
            .filter(|e| !matches!(e.message, Outbound::Initialize { .. }))
            .collect();
        for envelope in restored.into_iter().rev() {
            self.buffer.push_front(envelope);
        }
    }

    pub fn on_closed(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        if self.stopped {
            None
        } else {
            Some(RECONNECT_DELAY)
        }
    }

    pub fn disconnect(&mut self) {
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionState, GatewaySession, RECONNECT_DELAY};
    use crate::protocol::{Envelope, Outbound};

    fn handshake() -> Outbound {
        Outbound::Initialize {
            token: "t".to_string(),
            broadcast: true,
            presence: true,
        }
    }

    fn seek(pos: f64) -> Envelope {
        Envelope::new(Outbound::Seek { seek: pos })
    }

    #[test]
    fn buffers_until_open_then_flushes_after_handshake() {
        let mut session = GatewaySession::new(handshake());
        assert!(session.send(seek(1.0)).is_none());
        assert!(session.send(seek(2.0)).is_none());
        assert_eq!(session.buffered(), 2);

        session.begin_connect();
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.send(seek(3.0)).is_none());

        let pending: Vec<Outbound> = session.on_open().into_iter().map(|e| e.message).collect();
        assert_eq!(
            pending,
            vec![
                handshake(),
                Outbound::Seek { seek: 1.0 },
                Outbound::Seek { seek: 2.0 },
                Outbound::Seek { seek: 3.0 },
            ]
        );
        assert_eq!(session.buffered(), 0);
        assert_eq!(session.send(seek(4.0)), Some(seek(4.0)));
    }

    #[test]
    fn restore_keeps_order_and_skips_handshake() {
        let mut session = GatewaySession::new(handshake());
        session.send(seek(9.0));
        session.restore(vec![Envelope::new(handshake()), seek(1.0), seek(2.0)]);

        let pending: Vec<Outbound> = session.on_open().into_iter().skip(1).map(|e| e.message).collect();
        assert_eq!(
            pending,
            vec![
                Outbound::Seek { seek: 1.0 },
                Outbound::Seek { seek: 2.0 },
                Outbound::Seek { seek: 9.0 },
            ]
        );
    }

    #[test]
    fn reconnects_after_close_unless_stopped() {
        let mut session = GatewaySession::new(handshake());
        session.begin_connect();
        session.on_open();
        assert_eq!(session.on_closed(), Some(RECONNECT_DELAY));
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.disconnect();
        assert!(session.is_stopped());
        assert_eq!(session.on_closed(), None);

        session.begin_connect();
        assert!(!session.is_stopped());
    }
}
