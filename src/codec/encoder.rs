//! # Frame Encoder
//!
//! Encodes telemetry state and control replies into JSON text frames.

use bytes::Bytes;

use super::protocol::*;
use crate::telemetry::TelemetrySnapshot;

/// Encode a telemetry snapshot into a status frame
///
/// All four telemetry fields are always present. Encoding is a pure function of
/// its inputs, so the same snapshot always yields byte-identical output.
///
/// # Arguments
///
/// * `node_id` - Identifier distinguishing this device to the server
/// * `snapshot` - Current telemetry values
///
/// # Examples
///
/// ```
/// use ble_ws_forwarder::codec::encoder::encode_status;
/// use ble_ws_forwarder::telemetry::TelemetrySnapshot;
///
/// let frame = encode_status("node-1", &TelemetrySnapshot::default());
/// assert_eq!(
///     &frame[..],
///     br#"{"type":"status","nodeId":"node-1","bleConnected":false,"battery":0,"rssi":0,"status":false}"#
/// );
/// ```
pub fn encode_status(node_id: &str, snapshot: &TelemetrySnapshot) -> Bytes {
    to_frame(&OutboundMessage::Status {
        node_id,
        ble_connected: snapshot.ble_connected,
        battery: snapshot.battery_percent,
        rssi: snapshot.rssi_dbm,
        status: snapshot.status,
    })
}

/// Encode the authentication frame sent first on every connection
pub fn encode_auth(node_id: &str, token: &str) -> Bytes {
    to_frame(&OutboundMessage::Auth { token, node_id })
}

/// Reply to a battery request
pub fn encode_battery(level: u8) -> Bytes {
    to_frame(&OutboundMessage::Battery { level })
}

/// Reply to an RSSI request
pub fn encode_rssi(value: i32) -> Bytes {
    to_frame(&OutboundMessage::Rssi { value })
}

/// Reply to a scan request
///
/// Reports the peripheral only when an RSSI reading is known.
pub fn encode_scan_result(rssi: Option<i32>) -> Bytes {
    let devices = rssi
        .map(|rssi| ScanDevice { name: SCAN_DEVICE_NAME, rssi })
        .into_iter()
        .collect();
    to_frame(&OutboundMessage::ScanResult { devices })
}

/// Reply to a peripheral write command
pub fn encode_command_result(id: i64, success: bool) -> Bytes {
    to_frame(&OutboundMessage::CommandResult { id, success })
}

fn to_frame(msg: &OutboundMessage<'_>) -> Bytes {
    // Only strings, integers and booleans: serde_json cannot fail here.
    serde_json::to_vec(msg).map(Bytes::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_NODE_ID_LEN;

    fn as_str(frame: &Bytes) -> &str {
        std::str::from_utf8(frame).unwrap()
    }

    #[test]
    fn test_encode_status_zero_snapshot() {
        let frame = encode_status("node-1", &TelemetrySnapshot::default());
        assert_eq!(
            as_str(&frame),
            r#"{"type":"status","nodeId":"node-1","bleConnected":false,"battery":0,"rssi":0,"status":false}"#
        );
    }

    #[test]
    fn test_encode_status_values() {
        let snapshot = TelemetrySnapshot {
            ble_connected: true,
            battery_percent: 82,
            rssi_dbm: -67,
            status: true,
        };
        let frame = encode_status("esp32-ble-bridge", &snapshot);
        assert_eq!(
            as_str(&frame),
            r#"{"type":"status","nodeId":"esp32-ble-bridge","bleConnected":true,"battery":82,"rssi":-67,"status":true}"#
        );
    }

    #[test]
    fn test_encode_status_is_idempotent() {
        let snapshot = TelemetrySnapshot {
            ble_connected: true,
            battery_percent: 55,
            rssi_dbm: -80,
            status: false,
        };
        assert_eq!(encode_status("n", &snapshot), encode_status("n", &snapshot));
    }

    #[test]
    fn test_encode_status_size_is_bounded() {
        let node_id = "x".repeat(MAX_NODE_ID_LEN);
        let snapshot = TelemetrySnapshot {
            ble_connected: false,
            battery_percent: 100,
            rssi_dbm: i32::MIN,
            status: false,
        };
        let frame = encode_status(&node_id, &snapshot);
        assert!(frame.len() <= MAX_STATUS_FRAME_SIZE, "frame is {} bytes", frame.len());
    }

    #[test]
    fn test_encode_auth() {
        let frame = encode_auth("node-1", "abc123");
        assert_eq!(as_str(&frame), r#"{"type":"auth","token":"abc123","nodeId":"node-1"}"#);
    }

    #[test]
    fn test_encode_auth_escapes_token() {
        let frame = encode_auth("node-1", "a\"b");
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["token"], "a\"b");
    }

    #[test]
    fn test_encode_replies() {
        assert_eq!(as_str(&encode_battery(81)), r#"{"type":"battery","level":81}"#);
        assert_eq!(as_str(&encode_rssi(-59)), r#"{"type":"rssi","value":-59}"#);
        assert_eq!(
            as_str(&encode_command_result(7, true)),
            r#"{"type":"command_result","id":7,"success":true}"#
        );
    }

    #[test]
    fn test_encode_scan_result() {
        assert_eq!(
            as_str(&encode_scan_result(Some(-72))),
            r#"{"type":"scan_result","devices":[{"name":"peripheral","rssi":-72}]}"#
        );
        assert_eq!(
            as_str(&encode_scan_result(None)),
            r#"{"type":"scan_result","devices":[]}"#
        );
    }
}
