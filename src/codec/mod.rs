//! # Wire Codec Module
//!
//! JSON text frames exchanged with the telemetry server.
//!
//! This module handles:
//! - Authentication frame encoding (first frame of every connection)
//! - Status frame encoding from a telemetry snapshot
//! - Replies to server control requests
//! - Best-effort decoding of inbound control messages

pub mod protocol;
pub mod encoder;
pub mod decoder;
