//! opcua-test-harness library
//!
//! This crate provides the pieces of the OPC UA test server harness:
//! - Tagged JSON message codec and newline-delimited stdio channel
//! - Server runtime trait with an external-process implementation
//! - Harness control loop driven by the parent test process
//! - Parent-side handle for spawning and stopping the harness

pub mod config;
pub mod harness;
pub mod runtime;
pub mod transport;
