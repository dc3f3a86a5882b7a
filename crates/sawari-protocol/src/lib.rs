//! # sawari-protocol
//!
//! Wire protocol for the Sawari realtime presence hub.
//!
//! Clients and the server exchange MessagePack-encoded frames with a
//! 4-byte length prefix over a persistent bidirectional connection.
//! The frame vocabulary is split by direction:
//!
//! - [`ClientFrame`] - messages a driver or student sends to the hub
//! - [`ServerFrame`] - broadcasts and point-to-point replies from the hub
//!
//! An actor's role (driver or student) is never declared; the hub infers
//! it from the first location-bearing frame it receives.

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_from, encode, encode_into, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{ClientFrame, DriverEntry, DriverStatus, RequestEntry, ServerFrame};

/// Opaque per-connection identifier. Unique for the process lifetime,
/// never reused after disconnect.
pub type ConnectionId = String;
