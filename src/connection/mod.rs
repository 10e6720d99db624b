//! # Connection Module
//!
//! Owns the single WebSocket connection and its lifecycle.
//!
//! ```text
//! Disconnected --start--> Connecting --transport connected + auth sent--> Authenticated
//!                             |                                               |
//!                             +--error / timeout--> Backoff <--error / drop---+
//!                                                     |
//!                     Connecting <--now >= until------+
//! ```
//!
//! Transport failures never escape this module: they schedule a retry after
//! an exponentially growing delay, forever.

pub mod backoff;

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::codec::encoder::encode_auth;
use crate::config::ForwarderConfig;
use crate::error::ForwarderError;
use crate::transport::{Transport, TransportEvent};
use self::backoff::Backoff;

/// Default time allowed for a connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Attempt in progress since the given time
    Connecting { since: Instant },
    Authenticated,
    /// Waiting to retry until the given time
    Backoff { until: Instant },
}

/// Things the forwarder needs to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake sent; telemetry may flow
    Authenticated,
    /// An authenticated connection went away
    Lost,
    /// Frame received on the authenticated connection
    Message(Vec<u8>),
}

/// Outcome of [`ConnectionManager::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame handed to the transport
    Sent,
    /// Not authenticated, or the transport refused; keep it for later
    Deferred,
}

/// Drives a [`Transport`] through connect, authenticate and reconnect
pub struct ConnectionManager<T: Transport> {
    config: ForwarderConfig,
    transport: T,
    state: ConnectionState,
    backoff: Backoff,
    connect_timeout: Duration,
    attempts: u32,
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", self.config.endpoint())
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(config: ForwarderConfig, backoff: Backoff, transport: T) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            backoff,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Connection attempts since the last successful authentication
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Leave `Disconnected` and start the first connection attempt
    ///
    /// Has no effect in any other state.
    pub fn start(&mut self, now: Instant) {
        if self.state == ConnectionState::Disconnected {
            info!("Connecting to {}", self.config.endpoint());
            self.begin_connect(now);
        }
    }

    /// Process transport events and advance connect/backoff timers
    ///
    /// Called once per scheduler tick.
    pub fn poll(&mut self, now: Instant) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();

        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connected => self.on_connected(now, &mut events),
                TransportEvent::Message(payload) => {
                    if self.is_authenticated() {
                        events.push(ConnectionEvent::Message(payload));
                    } else {
                        debug!("Dropping frame received while {:?}", self.state);
                    }
                }
                TransportEvent::Disconnected => {
                    self.on_lost(now, "connection closed", &mut events);
                }
                TransportEvent::Error(reason) => self.on_lost(now, &reason, &mut events),
            }
        }

        match self.state {
            ConnectionState::Connecting { since }
                if now.saturating_duration_since(since) >= self.connect_timeout =>
            {
                self.enter_backoff(now, "connect timed out");
            }
            ConnectionState::Backoff { until } if now >= until => {
                debug!("Backoff elapsed, reconnecting");
                self.begin_connect(now);
            }
            _ => {}
        }

        events
    }

    /// Send a frame if authenticated
    ///
    /// Never fails: outside `Authenticated` the frame is not handed to the
    /// transport and [`SendOutcome::Deferred`] tells the caller to keep it.
    /// A busy transport defers without touching the connection; any other
    /// send error drops the connection into backoff.
    pub fn send(&mut self, now: Instant, frame: &[u8]) -> SendOutcome {
        if !self.is_authenticated() {
            return SendOutcome::Deferred;
        }

        match self.transport.send(frame) {
            Ok(()) => {
                debug!("Sent frame ({} bytes)", frame.len());
                SendOutcome::Sent
            }
            Err(ForwarderError::TransportBusy) => {
                debug!("Transport busy, deferring frame ({} bytes)", frame.len());
                SendOutcome::Deferred
            }
            Err(e) => {
                self.enter_backoff(now, &e.to_string());
                SendOutcome::Deferred
            }
        }
    }

    /// Abandon the current connection and retry after backoff
    pub fn drop_connection(&mut self, now: Instant, reason: &str) {
        if matches!(
            self.state,
            ConnectionState::Connecting { .. } | ConnectionState::Authenticated
        ) {
            self.enter_backoff(now, reason);
        }
    }

    /// Close the transport and stop reconnecting
    pub fn close(&mut self) {
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        info!("Connection closed");
    }

    fn begin_connect(&mut self, now: Instant) {
        self.attempts += 1;
        self.state = ConnectionState::Connecting { since: now };
        debug!("Connection attempt {}", self.attempts);

        if let Err(e) = self.transport.connect(self.config.server_url()) {
            self.enter_backoff(now, &e.to_string());
        }
    }

    fn on_connected(&mut self, now: Instant, events: &mut Vec<ConnectionEvent>) {
        if !matches!(self.state, ConnectionState::Connecting { .. }) {
            debug!("Ignoring stale connect event while {:?}", self.state);
            return;
        }

        // Token goes out before any telemetry frame
        let auth = encode_auth(self.config.node_id(), self.config.auth_token());
        match self.transport.send(&auth) {
            Ok(()) => {
                info!(
                    "Connected to {} after {} attempt(s), authentication sent",
                    self.config.endpoint(),
                    self.attempts
                );
                self.state = ConnectionState::Authenticated;
                self.backoff.reset();
                self.attempts = 0;
                events.push(ConnectionEvent::Authenticated);
            }
            Err(e) => self.enter_backoff(now, &e.to_string()),
        }
    }

    fn on_lost(&mut self, now: Instant, reason: &str, events: &mut Vec<ConnectionEvent>) {
        match self.state {
            ConnectionState::Authenticated => {
                events.push(ConnectionEvent::Lost);
                self.enter_backoff(now, reason);
            }
            ConnectionState::Connecting { .. } => self.enter_backoff(now, reason),
            _ => debug!("Ignoring transport loss while {:?}: {}", self.state, reason),
        }
    }

    fn enter_backoff(&mut self, now: Instant, reason: &str) {
        self.transport.close();
        let delay = self.backoff.next_delay();
        self.state = ConnectionState::Backoff { until: now + delay };
        warn!("Connection failed ({}), retrying in {:?}", reason, delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mocks::MockTransport;

    const URL: &str = "ws://10.0.0.2:8080/ws/node";

    fn manager() -> (ConnectionManager<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        let config = ForwarderConfig::new(URL, "abc123", "node-1").unwrap();
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        let manager = ConnectionManager::new(config, backoff, transport.clone())
            .with_connect_timeout(Duration::from_secs(5));
        (manager, transport)
    }

    fn authenticate(manager: &mut ConnectionManager<MockTransport>, transport: &MockTransport, now: Instant) {
        manager.start(now);
        transport.push_event(TransportEvent::Connected);
        assert_eq!(manager.poll(now), vec![ConnectionEvent::Authenticated]);
    }

    #[test]
    fn test_starts_disconnected() {
        let (manager, transport) = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(transport.connects().is_empty());
    }

    #[test]
    fn test_start_begins_connecting() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        manager.start(now);
        assert_eq!(manager.state(), ConnectionState::Connecting { since: now });
        assert_eq!(transport.connects(), vec![URL.to_string()]);

        // Second start is a no-op
        manager.start(now);
        assert_eq!(transport.connects().len(), 1);
    }

    #[test]
    fn test_poll_while_disconnected_does_nothing() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        assert!(manager.poll(now + Duration::from_secs(60)).is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(transport.connects().is_empty());
    }

    #[test]
    fn test_connected_sends_auth_first() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        authenticate(&mut manager, &transport, now);

        assert!(manager.is_authenticated());
        let sent = transport.sent_text();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], r#"{"type":"auth","token":"abc123","nodeId":"node-1"}"#);
    }

    #[test]
    fn test_no_send_outside_authenticated() {
        let (mut manager, transport) = manager();
        let now = Instant::now();

        // Disconnected
        assert_eq!(manager.send(now, b"frame"), SendOutcome::Deferred);

        // Connecting
        manager.start(now);
        assert_eq!(manager.send(now, b"frame"), SendOutcome::Deferred);

        // Backoff
        transport.push_event(TransportEvent::Error("refused".to_string()));
        manager.poll(now);
        assert!(matches!(manager.state(), ConnectionState::Backoff { .. }));
        assert_eq!(manager.send(now, b"frame"), SendOutcome::Deferred);

        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_send_when_authenticated() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        authenticate(&mut manager, &transport, now);

        assert_eq!(manager.send(now, b"telemetry"), SendOutcome::Sent);
        assert_eq!(transport.sent().last().unwrap(), b"telemetry");
    }

    #[test]
    fn test_send_failure_enters_backoff() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        authenticate(&mut manager, &transport, now);

        transport.set_send_error(true);
        assert_eq!(manager.send(now, b"telemetry"), SendOutcome::Deferred);
        assert_eq!(
            manager.state(),
            ConnectionState::Backoff { until: now + Duration::from_secs(1) }
        );
        assert_eq!(transport.closes(), 1);
    }

    #[test]
    fn test_busy_transport_defers_without_dropping() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        authenticate(&mut manager, &transport, now);

        transport.set_send_busy(true);
        assert_eq!(manager.send(now, b"reply"), SendOutcome::Deferred);
        assert!(manager.is_authenticated());
        assert_eq!(transport.closes(), 0);

        transport.set_send_busy(false);
        assert_eq!(manager.send(now, b"reply"), SendOutcome::Sent);
    }

    #[test]
    fn test_auth_send_failure_enters_backoff() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        manager.start(now);
        transport.set_send_error(true);
        transport.push_event(TransportEvent::Connected);

        assert!(manager.poll(now).is_empty());
        assert!(matches!(manager.state(), ConnectionState::Backoff { .. }));
    }

    #[test]
    fn test_connect_error_enters_backoff() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        transport.set_connect_error(true);
        manager.start(now);
        assert_eq!(
            manager.state(),
            ConnectionState::Backoff { until: now + Duration::from_secs(1) }
        );
    }

    #[test]
    fn test_disconnect_reports_lost_and_backs_off() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        authenticate(&mut manager, &transport, now);

        transport.push_event(TransportEvent::Disconnected);
        let later = now + Duration::from_secs(3);
        assert_eq!(manager.poll(later), vec![ConnectionEvent::Lost]);
        assert_eq!(
            manager.state(),
            ConnectionState::Backoff { until: later + Duration::from_secs(1) }
        );
    }

    #[test]
    fn test_backoff_elapses_into_connecting() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        manager.start(now);
        transport.push_event(TransportEvent::Error("refused".to_string()));
        manager.poll(now);

        // Not yet
        manager.poll(now + Duration::from_millis(999));
        assert!(matches!(manager.state(), ConnectionState::Backoff { .. }));
        assert_eq!(transport.connects().len(), 1);

        let retry_at = now + Duration::from_secs(1);
        manager.poll(retry_at);
        assert_eq!(manager.state(), ConnectionState::Connecting { since: retry_at });
        assert_eq!(transport.connects().len(), 2);
        assert_eq!(manager.attempts(), 2);
    }

    #[test]
    fn test_consecutive_failures_grow_delay_to_cap() {
        let (mut manager, transport) = manager();
        transport.set_connect_error(true);
        let mut now = Instant::now();
        manager.start(now);

        let mut delays = Vec::new();
        for _ in 0..6 {
            let ConnectionState::Backoff { until } = manager.state() else {
                panic!("Expected Backoff, got {:?}", manager.state());
            };
            delays.push(until - now);
            now = until;
            manager.poll(now);
        }

        let secs: Vec<u64> = delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_successful_auth_resets_backoff() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        transport.set_connect_error(true);
        manager.start(now);
        manager.poll(now + Duration::from_secs(1)); // second failure: 2s

        transport.set_connect_error(false);
        let t = now + Duration::from_secs(3);
        manager.poll(t);
        transport.push_event(TransportEvent::Connected);
        assert_eq!(manager.poll(t), vec![ConnectionEvent::Authenticated]);
        assert_eq!(manager.attempts(), 0);

        transport.push_event(TransportEvent::Disconnected);
        manager.poll(t);
        assert_eq!(
            manager.state(),
            ConnectionState::Backoff { until: t + Duration::from_secs(1) }
        );
    }

    #[test]
    fn test_connect_timeout() {
        let (mut manager, _transport) = manager();
        let now = Instant::now();
        manager.start(now);

        manager.poll(now + Duration::from_secs(4));
        assert!(matches!(manager.state(), ConnectionState::Connecting { .. }));

        let timeout_at = now + Duration::from_secs(5);
        manager.poll(timeout_at);
        assert_eq!(
            manager.state(),
            ConnectionState::Backoff { until: timeout_at + Duration::from_secs(1) }
        );
    }

    #[test]
    fn test_messages_only_delivered_when_authenticated() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        manager.start(now);
        transport.push_event(TransportEvent::Message(b"early".to_vec()));
        assert!(manager.poll(now).is_empty());

        transport.push_event(TransportEvent::Connected);
        transport.push_event(TransportEvent::Message(b"hello".to_vec()));
        assert_eq!(
            manager.poll(now),
            vec![
                ConnectionEvent::Authenticated,
                ConnectionEvent::Message(b"hello".to_vec()),
            ]
        );
    }

    #[test]
    fn test_stale_connected_event_ignored() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        manager.start(now);
        manager.drop_connection(now, "test");
        // Late completion of the abandoned attempt
        transport.push_event(TransportEvent::Connected);
        assert!(manager.poll(now).is_empty());
        assert!(matches!(manager.state(), ConnectionState::Backoff { .. }));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_drop_connection_ignored_when_disconnected() {
        let (mut manager, transport) = manager();
        manager.drop_connection(Instant::now(), "test");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closes(), 0);
    }

    #[test]
    fn test_close_returns_to_disconnected() {
        let (mut manager, transport) = manager();
        let now = Instant::now();
        authenticate(&mut manager, &transport, now);
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closes(), 1);

        // No reconnect after teardown
        manager.poll(now + Duration::from_secs(600));
        assert_eq!(transport.connects().len(), 1);
    }
}
