//! Frame types for the Sawari protocol.
//!
//! Frames are the fundamental unit of communication between clients and
//! the hub. Each frame is serialized using MessagePack with an external
//! `type` tag so clients in any language can dispatch on it.

use crate::ConnectionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Availability of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverStatus {
    /// Accepting rides.
    Active,
    /// Connected but not accepting rides.
    OnBreak,
}

/// A driver's entry in a `drivers-update` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverEntry {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Current availability.
    pub status: DriverStatus,
    /// Hub-assigned rickshaw number, immutable for the connection lifetime.
    pub number: u32,
}

/// An actively-requesting student, as carried in `students-update`,
/// `existing-requests`, and `student-request` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Connection identifier of the requesting student.
    pub id: ConnectionId,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Absolute expiry time in epoch milliseconds.
    pub expiry: u64,
}

/// A frame sent by a client to the hub.
///
/// The first location-bearing frame fixes the connection's role: a
/// `driver-location` makes it a driver, a `student-location` or
/// `student-start-request` makes it a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Driver publishes its position and availability.
    #[serde(rename = "driver-location")]
    DriverLocation {
        lat: f64,
        lng: f64,
        status: DriverStatus,
    },

    /// Driver toggles availability without moving.
    #[serde(rename = "driver-status")]
    DriverStatus { status: DriverStatus },

    /// Student publishes its position.
    #[serde(rename = "student-location")]
    StudentLocation { lat: f64, lng: f64 },

    /// Student starts a time-bounded ride request at the given position.
    #[serde(rename = "student-start-request")]
    StartRequest { lat: f64, lng: f64 },

    /// Student cancels its ride request.
    #[serde(rename = "student-stop-request")]
    StopRequest,
}

/// A frame sent by the hub to one or all clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Rickshaw number assignment, sent once to a newly-registered driver.
    #[serde(rename = "assign-number")]
    AssignNumber { number: u32 },

    /// Full driver set, broadcast after every driver mutation.
    #[serde(rename = "drivers-update")]
    DriversUpdate {
        drivers: BTreeMap<ConnectionId, DriverEntry>,
    },

    /// Requests already in flight, sent to a newly-registered driver.
    #[serde(rename = "existing-requests")]
    ExistingRequests { requests: Vec<RequestEntry> },

    /// Reconciling snapshot of every actively-requesting student.
    #[serde(rename = "students-update")]
    StudentsUpdate { students: Vec<RequestEntry> },

    /// Discrete event: a student just started requesting.
    #[serde(rename = "student-request")]
    StudentRequest {
        id: ConnectionId,
        lat: f64,
        lng: f64,
        expiry: u64,
    },

    /// Discrete event: a student's request ended (explicit stop, expiry,
    /// or disconnect).
    #[serde(rename = "student-stop-request")]
    StudentStopRequest { id: ConnectionId },
}

impl ServerFrame {
    /// Create a `student-request` frame from a request entry.
    #[must_use]
    pub fn student_request(entry: &RequestEntry) -> Self {
        ServerFrame::StudentRequest {
            id: entry.id.clone(),
            lat: entry.lat,
            lng: entry.lng,
            expiry: entry.expiry,
        }
    }

    /// Create a `student-stop-request` frame.
    #[must_use]
    pub fn stop_request(id: impl Into<ConnectionId>) -> Self {
        ServerFrame::StudentStopRequest { id: id.into() }
    }

    /// Create a `students-update` snapshot frame.
    #[must_use]
    pub fn students_update(students: Vec<RequestEntry>) -> Self {
        ServerFrame::StudentsUpdate { students }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_tags() {
        let frame = ClientFrame::DriverLocation {
            lat: 24.86,
            lng: 67.0,
            status: DriverStatus::Active,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "driver-location");
        assert_eq!(value["status"], "active");

        let frame = ClientFrame::StopRequest;
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "student-stop-request"}));
    }

    #[test]
    fn test_driver_status_tokens() {
        assert_eq!(
            serde_json::to_value(DriverStatus::OnBreak).unwrap(),
            json!("on-break")
        );
        let status: DriverStatus = serde_json::from_value(json!("active")).unwrap();
        assert_eq!(status, DriverStatus::Active);
    }

    #[test]
    fn test_missing_coordinates_rejected() {
        // A location report without lat/lng must fail to parse rather
        // than default to zero.
        let result: Result<ClientFrame, _> =
            serde_json::from_value(json!({"type": "student-location", "lat": 1.0}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_frame_constructors() {
        let entry = RequestEntry {
            id: "conn-1".into(),
            lat: 10.0,
            lng: 20.0,
            expiry: 300_000,
        };

        let frame = ServerFrame::student_request(&entry);
        assert_eq!(
            frame,
            ServerFrame::StudentRequest {
                id: "conn-1".into(),
                lat: 10.0,
                lng: 20.0,
                expiry: 300_000,
            }
        );

        let frame = ServerFrame::stop_request("conn-1");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "student-stop-request");
        assert_eq!(value["id"], "conn-1");
    }
}
