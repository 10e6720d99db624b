//! # Telemetry Module
//!
//! Tracks the last-known telemetry values reported by the platform.
//!
//! This module handles:
//! - Holding the current [`TelemetrySnapshot`] (latest value wins, no history)
//! - Converting raw sensor readings into wire-ready values
//! - Marking the snapshot dirty whenever any field changes
//! - The [`TelemetrySink`] entry points the host wires its callbacks to

use serde::Deserialize;

/// Last-known telemetry values
///
/// Fields hold their "zero" values until a sensor reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// BLE client link is up
    pub ble_connected: bool,
    /// Battery level, 0-100
    pub battery_percent: u8,
    /// Signal strength in dBm
    pub rssi_dbm: i32,
    /// Connectivity status flag
    pub status: bool,
}

/// Receives telemetry updates from platform callbacks
///
/// Battery and RSSI arrive as floating point sensor states; `NaN` means the
/// sensor has no reading.
pub trait TelemetrySink {
    fn on_ble_connected(&mut self, connected: bool);
    fn on_battery(&mut self, percent: f32);
    fn on_rssi(&mut self, dbm: f32);
    fn on_status(&mut self, status: bool);
}

/// A single telemetry update, as delivered by a host event source
///
/// Deserializes from one-field JSON objects such as `{"battery":82}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TelemetryUpdate {
    BleConnected(bool),
    Battery(f32),
    Rssi(f32),
    Status(bool),
}

impl TelemetryUpdate {
    /// Deliver this update to a sink
    pub fn apply<S: TelemetrySink + ?Sized>(self, sink: &mut S) {
        match self {
            TelemetryUpdate::BleConnected(connected) => sink.on_ble_connected(connected),
            TelemetryUpdate::Battery(percent) => sink.on_battery(percent),
            TelemetryUpdate::Rssi(dbm) => sink.on_rssi(dbm),
            TelemetryUpdate::Status(status) => sink.on_status(status),
        }
    }
}

/// Compares incoming values against the snapshot and tracks unsent changes
///
/// No filtering is applied: a 1 dBm RSSI change is as significant as a
/// link drop. Rate limiting belongs to the forwarder's per-tick coalescing.
#[derive(Debug, Default)]
pub struct TelemetryObserver {
    snapshot: TelemetrySnapshot,
    dirty: bool,
    rssi_reported: bool,
}

impl TelemetryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the BLE link state. Returns `true` if the snapshot changed.
    pub fn update_ble_connected(&mut self, connected: bool) -> bool {
        let changed = self.snapshot.ble_connected != connected;
        self.snapshot.ble_connected = connected;
        self.mark(changed)
    }

    /// Record a battery reading. Returns `true` if the snapshot changed.
    ///
    /// The reading is rounded and clamped to 0-100; `NaN` is ignored.
    pub fn update_battery(&mut self, percent: f32) -> bool {
        let Some(level) = battery_level(percent) else {
            return false;
        };
        let changed = self.snapshot.battery_percent != level;
        self.snapshot.battery_percent = level;
        self.mark(changed)
    }

    /// Record an RSSI reading. Returns `true` if the snapshot changed.
    ///
    /// The reading is rounded to whole dBm; `NaN` is ignored.
    pub fn update_rssi(&mut self, dbm: f32) -> bool {
        let Some(rssi) = rssi_dbm(dbm) else {
            return false;
        };
        self.rssi_reported = true;
        let changed = self.snapshot.rssi_dbm != rssi;
        self.snapshot.rssi_dbm = rssi;
        self.mark(changed)
    }

    /// Record the status flag. Returns `true` if the snapshot changed.
    pub fn update_status(&mut self, status: bool) -> bool {
        let changed = self.snapshot.status != status;
        self.snapshot.status = status;
        self.mark(changed)
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// Some field changed since the last [`clear_dirty`](Self::clear_dirty)
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// RSSI, if the sensor has ever produced a reading
    pub fn reported_rssi(&self) -> Option<i32> {
        self.rssi_reported.then_some(self.snapshot.rssi_dbm)
    }

    fn mark(&mut self, changed: bool) -> bool {
        self.dirty |= changed;
        changed
    }
}

fn battery_level(percent: f32) -> Option<u8> {
    if percent.is_nan() {
        return None;
    }
    Some(percent.round().clamp(0.0, 100.0) as u8)
}

fn rssi_dbm(dbm: f32) -> Option<i32> {
    if dbm.is_nan() {
        return None;
    }
    // `as` saturates at the i32 bounds for infinities
    Some(dbm.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_is_zeroed() {
        let observer = TelemetryObserver::new();
        assert_eq!(*observer.snapshot(), TelemetrySnapshot::default());
        assert!(!observer.is_dirty());
        assert_eq!(observer.reported_rssi(), None);
    }

    #[test]
    fn test_change_marks_dirty() {
        let mut observer = TelemetryObserver::new();
        assert!(observer.update_ble_connected(true));
        assert!(observer.is_dirty());
        assert!(observer.snapshot().ble_connected);
    }

    #[test]
    fn test_same_value_does_not_mark_dirty() {
        let mut observer = TelemetryObserver::new();
        assert!(!observer.update_status(false));
        assert!(!observer.update_battery(0.0));
        assert!(!observer.is_dirty());
    }

    #[test]
    fn test_clear_dirty() {
        let mut observer = TelemetryObserver::new();
        observer.update_status(true);
        observer.clear_dirty();
        assert!(!observer.is_dirty());
        assert!(observer.snapshot().status);
    }

    #[test]
    fn test_dirty_survives_revert() {
        // A change reverted before it was sent still warrants one frame
        let mut observer = TelemetryObserver::new();
        observer.update_status(true);
        observer.update_status(false);
        assert!(observer.is_dirty());
    }

    #[test]
    fn test_rssi_jitter_is_significant() {
        let mut observer = TelemetryObserver::new();
        observer.update_rssi(-70.0);
        observer.clear_dirty();
        assert!(observer.update_rssi(-71.0));
        assert_eq!(observer.snapshot().rssi_dbm, -71);
    }

    #[test]
    fn test_battery_rounding_and_clamping() {
        let mut observer = TelemetryObserver::new();
        observer.update_battery(81.6);
        assert_eq!(observer.snapshot().battery_percent, 82);
        observer.update_battery(140.0);
        assert_eq!(observer.snapshot().battery_percent, 100);
        observer.update_battery(-3.0);
        assert_eq!(observer.snapshot().battery_percent, 0);
    }

    #[test]
    fn test_nan_readings_are_ignored() {
        let mut observer = TelemetryObserver::new();
        observer.update_battery(50.0);
        observer.clear_dirty();
        assert!(!observer.update_battery(f32::NAN));
        assert!(!observer.update_rssi(f32::NAN));
        assert_eq!(observer.snapshot().battery_percent, 50);
        assert_eq!(observer.reported_rssi(), None);
        assert!(!observer.is_dirty());
    }

    #[test]
    fn test_zero_rssi_reading_counts_as_reported() {
        let mut observer = TelemetryObserver::new();
        assert!(!observer.update_rssi(0.0));
        assert_eq!(observer.reported_rssi(), Some(0));
    }

    #[test]
    fn test_update_deserializes_from_json() {
        let update: TelemetryUpdate = serde_json::from_str(r#"{"battery":82}"#).unwrap();
        assert_eq!(update, TelemetryUpdate::Battery(82.0));
        let update: TelemetryUpdate = serde_json::from_str(r#"{"bleConnected":true}"#).unwrap();
        assert_eq!(update, TelemetryUpdate::BleConnected(true));
        assert!(serde_json::from_str::<TelemetryUpdate>(r#"{"humidity":3}"#).is_err());
    }

    #[test]
    fn test_update_apply_reaches_sink() {
        #[derive(Default)]
        struct Recorder(Vec<String>);

        impl TelemetrySink for Recorder {
            fn on_ble_connected(&mut self, connected: bool) {
                self.0.push(format!("ble={}", connected));
            }
            fn on_battery(&mut self, percent: f32) {
                self.0.push(format!("battery={}", percent));
            }
            fn on_rssi(&mut self, dbm: f32) {
                self.0.push(format!("rssi={}", dbm));
            }
            fn on_status(&mut self, status: bool) {
                self.0.push(format!("status={}", status));
            }
        }

        let mut recorder = Recorder::default();
        TelemetryUpdate::Rssi(-60.0).apply(&mut recorder);
        TelemetryUpdate::Status(true).apply(&mut recorder);
        assert_eq!(recorder.0, vec!["rssi=-60", "status=true"]);
    }
}
