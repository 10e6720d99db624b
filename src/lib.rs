//! # BLE WebSocket Forwarder Library
//!
//! Forward BLE peripheral telemetry to a remote server over WebSocket.
//!
//! This library provides the forwarding engine for constrained devices: it
//! keeps one authenticated WebSocket connection alive through outages,
//! observes BLE link state, battery, RSSI and status values, and sends a
//! compact JSON status frame whenever they change.

pub mod ble;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod forwarder;
pub mod telemetry;
pub mod transport;
