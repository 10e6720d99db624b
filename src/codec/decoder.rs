//! # Frame Decoder
//!
//! Best-effort decoding of server control messages. Never fails: anything that
//! cannot be understood becomes [`InboundMessage::Unrecognized`].

use serde_json::Value;

use super::protocol::*;
use crate::error::{ForwarderError, Result};

/// Decode an inbound frame
///
/// # Examples
///
/// ```
/// use ble_ws_forwarder::codec::decoder::decode;
/// use ble_ws_forwarder::codec::protocol::{ControlMessage, InboundMessage};
///
/// let msg = decode(br#"{"type":"get_rssi"}"#);
/// assert_eq!(msg, InboundMessage::Control(ControlMessage::GetRssi));
///
/// assert!(matches!(decode(b"\xff\x00"), InboundMessage::Unrecognized { .. }));
/// ```
pub fn decode(frame: &[u8]) -> InboundMessage {
    match parse_control(frame) {
        Ok(control) => InboundMessage::Control(control),
        Err(e) => InboundMessage::Unrecognized { reason: e.to_string() },
    }
}

/// Parse a control message, reporting why a frame was rejected
///
/// # Errors
///
/// Returns [`ForwarderError::MalformedInbound`] if the frame is oversized, not a
/// JSON object, has no string `type` field, or names an unknown type.
pub fn parse_control(frame: &[u8]) -> Result<ControlMessage> {
    if frame.len() > MAX_INBOUND_FRAME_SIZE {
        return Err(malformed(format!(
            "frame too large: {} bytes (max {})",
            frame.len(),
            MAX_INBOUND_FRAME_SIZE
        )));
    }

    let value: Value = serde_json::from_slice(frame)
        .map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing message type"))?;

    let control = match kind {
        MSG_AUTH_RESULT => ControlMessage::AuthResult {
            success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
        },
        MSG_COMMAND => ControlMessage::Command {
            id: value.get("id").and_then(Value::as_i64).unwrap_or(0),
            data: value.get("data").and_then(Value::as_str).map(str::to_owned),
        },
        MSG_GET_BATTERY => ControlMessage::GetBattery,
        MSG_GET_RSSI => ControlMessage::GetRssi,
        MSG_SCAN => ControlMessage::Scan,
        MSG_CONNECT => ControlMessage::Connect,
        MSG_DISCONNECT_BLE => ControlMessage::DisconnectBle,
        other => return Err(malformed(format!("unknown message type {:?}", other))),
    };

    Ok(control)
}

fn malformed(msg: impl Into<String>) -> ForwarderError {
    ForwarderError::MalformedInbound(msg.into())
}
