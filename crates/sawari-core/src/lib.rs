//! # sawari-core
//!
//! The presence/session engine of the Sawari realtime hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - role-tagged records of connected drivers and students
//! - **ExpiryScheduler** - one auto-cancel timer per ride request
//! - **Engine** - applies connection events and decides what to broadcast
//! - **Gateway** - best-effort fan-out to all or single connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Engine    │────▶│   Gateway   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │
//!                        ▼       ▼
//!                ┌──────────┐ ┌─────────────────┐
//!                │ Registry │ │ ExpiryScheduler │
//!                └──────────┘ └─────────────────┘
//! ```
//!
//! All registry mutations and timer arm/disarm calls happen through the
//! [`Engine`], which the server guards with a single lock; timer firings
//! re-enter the engine through a channel and are processed as ordinary
//! serialized events.

pub mod engine;
pub mod expiry;
pub mod gateway;
pub mod registry;

pub use engine::{Engine, EngineStats};
pub use expiry::{Expired, ExpiryScheduler};
pub use gateway::Gateway;
pub use registry::{Actor, DriverRecord, DriverUpsert, Registry, StudentRecord};
