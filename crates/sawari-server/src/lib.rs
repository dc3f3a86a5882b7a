//! # sawari-server
//!
//! Axum front end for the Sawari realtime presence hub: WebSocket
//! transport, configuration, and metrics around the `sawari-core`
//! engine.

pub mod config;
pub mod handlers;
pub mod metrics;
