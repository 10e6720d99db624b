//! # Wire Protocol Constants and Types
//!
//! Message type tags, size bounds and the serializable message shapes.

use serde::Serialize;

/// Authentication frame type
pub const MSG_AUTH: &str = "auth";

/// Server response to authentication
pub const MSG_AUTH_RESULT: &str = "auth_result";

/// Telemetry status frame type
pub const MSG_STATUS: &str = "status";

/// Server request: write hex payload to the BLE peripheral
pub const MSG_COMMAND: &str = "command";

/// Reply to [`MSG_COMMAND`]
pub const MSG_COMMAND_RESULT: &str = "command_result";

/// Server request: report battery level
pub const MSG_GET_BATTERY: &str = "get_battery";

/// Server request: report RSSI
pub const MSG_GET_RSSI: &str = "get_rssi";

/// Server request: report known peripherals
pub const MSG_SCAN: &str = "scan";

/// Server request: enable the BLE client
pub const MSG_CONNECT: &str = "connect";

/// Server request: disable the BLE client
pub const MSG_DISCONNECT_BLE: &str = "disconnect_ble";

/// Upper bound for an encoded status frame.
///
/// Holds for every snapshot as long as the node id respects
/// [`MAX_NODE_ID_LEN`](crate::config::MAX_NODE_ID_LEN).
pub const MAX_STATUS_FRAME_SIZE: usize = 512;

/// Inbound frames above this size are rejected without parsing
pub const MAX_INBOUND_FRAME_SIZE: usize = 1024;

/// Name reported for the observed peripheral in scan results
pub const SCAN_DEVICE_NAME: &str = "peripheral";

/// Messages sent to the server
///
/// Field order is part of the wire format: the server parses by name, but
/// a fixed order keeps encoding byte-for-byte deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage<'a> {
    Auth {
        token: &'a str,
        #[serde(rename = "nodeId")]
        node_id: &'a str,
    },
    Status {
        #[serde(rename = "nodeId")]
        node_id: &'a str,
        #[serde(rename = "bleConnected")]
        ble_connected: bool,
        battery: u8,
        rssi: i32,
        status: bool,
    },
    Battery {
        level: u8,
    },
    Rssi {
        value: i32,
    },
    ScanResult {
        devices: Vec<ScanDevice<'a>>,
    },
    CommandResult {
        id: i64,
        success: bool,
    },
}

/// Entry of a scan result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanDevice<'a> {
    pub name: &'a str,
    pub rssi: i32,
}

/// Control messages understood from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Outcome of the authentication handshake
    AuthResult { success: bool },
    /// Raw bytes (hex string) to write to the peripheral
    Command { id: i64, data: Option<String> },
    GetBattery,
    GetRssi,
    Scan,
    /// Enable the BLE client
    Connect,
    /// Disable the BLE client
    DisconnectBle,
}

/// Result of decoding an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Control(ControlMessage),
    /// Malformed or unknown payload; `reason` is for diagnostics only
    Unrecognized { reason: String },
}
