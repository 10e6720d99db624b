//! # Forwarder Engine
//!
//! Ties telemetry, codec and connection together. The host calls
//! [`Forwarder::tick`] on every scheduler tick and routes sensor callbacks to
//! the [`TelemetrySink`] methods.
//!
//! ## Send policy
//!
//! - At most one status frame per tick, always encoding the latest snapshot,
//!   so any number of changes between ticks coalesce into one message.
//! - A status frame that could not be handed to the transport stays pending.
//!   It is encoded from the snapshot at send time, so later changes replace it.
//! - Every (re)authentication is followed by a full status frame.
//! - Delivery is fire-and-forget: the dirty flag clears once the transport
//!   accepts the frame, not when the server acknowledges it.
//!
//! A `get_battery` request asks the BLE link for a fresh reading and answers
//! once that reading arrives or the battery reply delay passes.

use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::ble::BleLink;
use crate::codec::decoder::decode;
use crate::codec::encoder::{
    encode_battery, encode_command_result, encode_rssi, encode_scan_result, encode_status,
};
use crate::codec::protocol::{ControlMessage, InboundMessage};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, SendOutcome};
use crate::telemetry::{TelemetryObserver, TelemetrySink, TelemetrySnapshot};
use crate::transport::Transport;

/// Time allowed for a requested battery reading before replying anyway
pub const DEFAULT_BATTERY_REPLY_DELAY: Duration = Duration::from_millis(1000);

/// Counters for periodic status logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Status frames accepted by the transport
    pub frames_sent: u64,
    /// Status send attempts that were deferred
    pub sends_deferred: u64,
    /// Successful authentications
    pub connections: u64,
    /// Authenticated connections that dropped
    pub connection_losses: u64,
    /// Inbound frames that did not decode
    pub inbound_ignored: u64,
}

/// Outstanding `get_battery` request
#[derive(Debug, Clone, Copy)]
struct BatteryRequest {
    requested_at: Instant,
    refreshed: bool,
}

/// Telemetry forwarding engine
pub struct Forwarder<T: Transport, L: BleLink> {
    connection: ConnectionManager<T>,
    observer: TelemetryObserver,
    ble: L,
    pending: bool,
    resync: bool,
    status_interval: Option<Duration>,
    last_status_at: Option<Instant>,
    battery_request: Option<BatteryRequest>,
    battery_reply_delay: Duration,
    stats: ForwarderStats,
}

impl<T: Transport, L: BleLink> Forwarder<T, L> {
    /// Create a forwarder around a connection manager and the host's BLE link
    ///
    /// The periodic status heartbeat is off until
    /// [`with_status_interval`](Self::with_status_interval) sets it.
    pub fn new(connection: ConnectionManager<T>, ble: L) -> Self {
        Self {
            connection,
            observer: TelemetryObserver::new(),
            ble,
            pending: false,
            resync: false,
            status_interval: None,
            last_status_at: None,
            battery_request: None,
            battery_reply_delay: DEFAULT_BATTERY_REPLY_DELAY,
            stats: ForwarderStats::default(),
        }
    }

    /// Re-send the full status at this period even without changes
    #[must_use]
    pub fn with_status_interval(mut self, interval: Option<Duration>) -> Self {
        self.status_interval = interval;
        self
    }

    /// Longest wait for a refreshed reading before answering `get_battery`
    #[must_use]
    pub fn with_battery_reply_delay(mut self, delay: Duration) -> Self {
        self.battery_reply_delay = delay;
        self
    }

    /// Begin connecting to the server
    pub fn start(&mut self, now: Instant) {
        self.connection.start(now);
    }

    /// Close the connection; no further reconnects happen
    pub fn shutdown(&mut self) {
        self.connection.close();
        self.battery_request = None;
        info!(
            "Forwarder stopped: {} frames sent, {} connections",
            self.stats.frames_sent, self.stats.connections
        );
    }

    /// Run one scheduler step
    ///
    /// Advances the connection state machine, handles inbound frames, sends
    /// at most one status frame, then answers a due battery request.
    pub fn tick(&mut self, now: Instant) {
        for event in self.connection.poll(now) {
            match event {
                ConnectionEvent::Authenticated => {
                    self.stats.connections += 1;
                    self.resync = true;
                }
                ConnectionEvent::Lost => {
                    self.stats.connection_losses += 1;
                    self.battery_request = None;
                    warn!("Server connection lost");
                }
                ConnectionEvent::Message(payload) => self.handle_inbound(now, &payload),
            }
        }

        self.flush(now);
        self.answer_battery_request(now);
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        self.observer.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    /// Whether a status frame is still waiting for the transport
    pub fn has_pending(&self) -> bool {
        self.pending
    }

    fn flush(&mut self, now: Instant) {
        if !self.connection.is_authenticated() {
            return;
        }

        let heartbeat_due = match (self.status_interval, self.last_status_at) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !(self.observer.is_dirty() || self.pending || self.resync || heartbeat_due) {
            return;
        }

        let frame = encode_status(self.connection.config().node_id(), self.observer.snapshot());

        match self.connection.send(now, &frame) {
            SendOutcome::Sent => {
                self.pending = false;
                self.observer.clear_dirty();
                self.resync = false;
                self.last_status_at = Some(now);
                self.stats.frames_sent += 1;
            }
            SendOutcome::Deferred => {
                self.pending = true;
                self.stats.sends_deferred += 1;
                debug!("Status frame deferred");
            }
        }
    }

    fn answer_battery_request(&mut self, now: Instant) {
        let Some(request) = self.battery_request else {
            return;
        };

        let waited = now.saturating_duration_since(request.requested_at);
        if !request.refreshed && waited < self.battery_reply_delay {
            return;
        }

        self.battery_request = None;
        if !request.refreshed {
            debug!("No battery reading after {:?}, replying with last value", waited);
        }
        let reply = encode_battery(self.observer.snapshot().battery_percent);
        self.reply(now, &reply);
    }

    fn handle_inbound(&mut self, now: Instant, payload: &[u8]) {
        match decode(payload) {
            InboundMessage::Control(msg) => self.handle_control(now, msg),
            InboundMessage::Unrecognized { reason } => {
                self.stats.inbound_ignored += 1;
                debug!("Ignoring inbound frame: {}", reason);
            }
        }
    }

    fn handle_control(&mut self, now: Instant, msg: ControlMessage) {
        match msg {
            ControlMessage::AuthResult { success: true } => {
                info!("Server accepted authentication");
            }
            ControlMessage::AuthResult { success: false } => {
                error!("Server rejected authentication token");
                self.connection.drop_connection(now, "authentication rejected");
            }
            ControlMessage::GetBattery => {
                self.ble.request_battery_refresh();
                // A repeated request shares the reply already scheduled
                if self.battery_request.is_none() {
                    self.battery_request = Some(BatteryRequest {
                        requested_at: now,
                        refreshed: false,
                    });
                }
            }
            ControlMessage::GetRssi => {
                let reply = encode_rssi(self.observer.snapshot().rssi_dbm);
                self.reply(now, &reply);
            }
            ControlMessage::Scan => {
                let reply = encode_scan_result(self.observer.reported_rssi());
                self.reply(now, &reply);
            }
            ControlMessage::Connect => {
                info!("Server requested BLE connect");
                self.ble.set_enabled(true);
            }
            ControlMessage::DisconnectBle => {
                info!("Server requested BLE disconnect");
                self.ble.set_enabled(false);
            }
            ControlMessage::Command { id, data } => {
                let success = self.execute_command(id, data.as_deref());
                let reply = encode_command_result(id, success);
                self.reply(now, &reply);
            }
        }
    }

    fn execute_command(&mut self, id: i64, data: Option<&str>) -> bool {
        let Some(hex_data) = data else {
            warn!("Command {} has no data", id);
            return false;
        };

        let bytes = match hex::decode(hex_data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Command {} has invalid hex data: {}", id, e);
                return false;
            }
        };

        if !self.observer.snapshot().ble_connected {
            warn!("Command {} rejected: BLE client not connected", id);
            return false;
        }

        match self.ble.write_command(&bytes) {
            Ok(()) => {
                debug!("Command {} written ({} bytes)", id, bytes.len());
                true
            }
            Err(e) => {
                warn!("Command {} failed: {}", id, e);
                false
            }
        }
    }

    /// Replies are request-scoped: dropped rather than retained when unsendable
    fn reply(&mut self, now: Instant, frame: &[u8]) {
        if self.connection.send(now, frame) == SendOutcome::Deferred {
            debug!("Reply dropped, connection unavailable");
        }
    }
}

impl<T: Transport, L: BleLink> TelemetrySink for Forwarder<T, L> {
    fn on_ble_connected(&mut self, connected: bool) {
        if self.observer.update_ble_connected(connected) {
            debug!("Telemetry changed: bleConnected");
        }
    }

    fn on_battery(&mut self, percent: f32) {
        if self.observer.update_battery(percent) {
            debug!("Telemetry changed: battery");
        }
        if !percent.is_nan() {
            if let Some(request) = self.battery_request.as_mut() {
                request.refreshed = true;
            }
        }
    }

    fn on_rssi(&mut self, dbm: f32) {
        if self.observer.update_rssi(dbm) {
            debug!("Telemetry changed: rssi");
        }
    }

    fn on_status(&mut self, status: bool) {
        if self.observer.update_status(status) {
            debug!("Telemetry changed: status");
        }
    }
}
