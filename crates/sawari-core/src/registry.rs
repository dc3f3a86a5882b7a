//! Connection registry for the Sawari hub.
//!
//! Every connected actor that has sent at least one location-bearing
//! frame owns exactly one role-tagged record here, keyed by its opaque
//! connection identifier. The first frame type fixes the role for the
//! connection's lifetime; a driver id can never become a student id.

use sawari_protocol::{ConnectionId, DriverEntry, DriverStatus, RequestEntry};
use std::collections::BTreeMap;
use tracing::debug;

/// A connected driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRecord {
    /// Rickshaw number, assigned once at registration and never reused.
    pub number: u32,
    pub lat: f64,
    pub lng: f64,
    pub status: DriverStatus,
}

/// A connected student.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub lat: f64,
    pub lng: f64,
    /// Whether a ride request is active.
    pub requesting: bool,
    /// Absolute auto-cancel time in epoch milliseconds; present iff
    /// `requesting` is true.
    pub expiry: Option<u64>,
}

/// A role-tagged actor record.
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    Driver(DriverRecord),
    Student(StudentRecord),
}

/// Outcome of a driver upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverUpsert {
    /// First location report from this connection; a number was allocated.
    New { number: u32 },
    /// Existing driver, coordinates and status refreshed in place.
    Updated,
    /// The id already belongs to a student; the frame is ignored.
    WrongRole,
}

/// Mapping from connection identifier to actor record.
///
/// Backed by a `BTreeMap` so snapshots are deterministic for a given
/// registry state.
#[derive(Debug, Default)]
pub struct Registry {
    actors: BTreeMap<ConnectionId, Actor>,
    /// Monotonic rickshaw number allocator. Never decremented; numbers
    /// are not reclaimed on disconnect.
    next_number: u32,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            actors: BTreeMap::new(),
            next_number: 1,
        }
    }

    /// Create or update a driver record.
    ///
    /// A new driver gets the next rickshaw number; an existing one keeps
    /// its number and has `lat`, `lng`, and `status` refreshed.
    pub fn upsert_driver(
        &mut self,
        id: &str,
        lat: f64,
        lng: f64,
        status: DriverStatus,
    ) -> DriverUpsert {
        match self.actors.get_mut(id) {
            None => {
                let number = self.next_number;
                self.next_number += 1;
                self.actors.insert(
                    id.to_string(),
                    Actor::Driver(DriverRecord {
                        number,
                        lat,
                        lng,
                        status,
                    }),
                );
                debug!(connection = %id, number, "Registry: driver registered");
                DriverUpsert::New { number }
            }
            Some(Actor::Driver(driver)) => {
                driver.lat = lat;
                driver.lng = lng;
                driver.status = status;
                DriverUpsert::Updated
            }
            Some(Actor::Student(_)) => DriverUpsert::WrongRole,
        }
    }

    /// Update an existing driver's status.
    ///
    /// Returns `false` if the id is unknown or not a driver; a status
    /// frame carries no coordinates, so there is nothing to create.
    pub fn update_driver_status(&mut self, id: &str, status: DriverStatus) -> bool {
        if let Some(Actor::Driver(driver)) = self.actors.get_mut(id) {
            driver.status = status;
            true
        } else {
            false
        }
    }

    /// Create or update a student record, touching coordinates only.
    ///
    /// A new record starts with `requesting = false`. Returns `false` if
    /// the id belongs to a driver.
    pub fn upsert_student_location(&mut self, id: &str, lat: f64, lng: f64) -> bool {
        match self.actors.get_mut(id) {
            None => {
                self.actors.insert(
                    id.to_string(),
                    Actor::Student(StudentRecord {
                        lat,
                        lng,
                        requesting: false,
                        expiry: None,
                    }),
                );
                debug!(connection = %id, "Registry: student registered");
                true
            }
            Some(Actor::Student(student)) => {
                student.lat = lat;
                student.lng = lng;
                true
            }
            Some(Actor::Driver(_)) => false,
        }
    }

    /// Create or update a student record with an active request.
    ///
    /// Returns `false` if the id belongs to a driver.
    pub fn set_student_requesting(&mut self, id: &str, lat: f64, lng: f64, expiry: u64) -> bool {
        match self.actors.get_mut(id) {
            None => {
                self.actors.insert(
                    id.to_string(),
                    Actor::Student(StudentRecord {
                        lat,
                        lng,
                        requesting: true,
                        expiry: Some(expiry),
                    }),
                );
                true
            }
            Some(Actor::Student(student)) => {
                student.lat = lat;
                student.lng = lng;
                student.requesting = true;
                student.expiry = Some(expiry);
                true
            }
            Some(Actor::Driver(_)) => false,
        }
    }

    /// Clear a student's active request.
    ///
    /// Returns whether the student *was* requesting. Idempotent; a
    /// missing record or an already-idle student is a no-op.
    pub fn clear_student_requesting(&mut self, id: &str) -> bool {
        if let Some(Actor::Student(student)) = self.actors.get_mut(id) {
            let was_requesting = student.requesting;
            student.requesting = false;
            student.expiry = None;
            was_requesting
        } else {
            false
        }
    }

    /// Remove an actor record, returning it so the caller can branch on
    /// role. Idempotent.
    pub fn remove(&mut self, id: &str) -> Option<Actor> {
        let removed = self.actors.remove(id);
        if removed.is_some() {
            debug!(connection = %id, "Registry: actor removed");
        }
        removed
    }

    /// Get an actor record.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Actor> {
        self.actors.get(id)
    }

    /// Snapshot of every student with an active request.
    #[must_use]
    pub fn requesting_students(&self) -> Vec<RequestEntry> {
        self.actors
            .iter()
            .filter_map(|(id, actor)| match actor {
                Actor::Student(s) if s.requesting => Some(RequestEntry {
                    id: id.clone(),
                    lat: s.lat,
                    lng: s.lng,
                    expiry: s.expiry.unwrap_or_default(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of every connected driver, keyed by connection id.
    #[must_use]
    pub fn drivers(&self) -> BTreeMap<ConnectionId, DriverEntry> {
        self.actors
            .iter()
            .filter_map(|(id, actor)| match actor {
                Actor::Driver(d) => Some((
                    id.clone(),
                    DriverEntry {
                        lat: d.lat,
                        lng: d.lng,
                        status: d.status,
                        number: d.number,
                    },
                )),
                _ => None,
            })
            .collect()
    }

    /// Number of connected drivers.
    #[must_use]
    pub fn driver_count(&self) -> usize {
        self.actors
            .values()
            .filter(|a| matches!(a, Actor::Driver(_)))
            .count()
    }

    /// Number of connected students.
    #[must_use]
    pub fn student_count(&self) -> usize {
        self.actors
            .values()
            .filter(|a| matches!(a, Actor::Student(_)))
            .count()
    }

    /// Number of students with an active request.
    #[must_use]
    pub fn requesting_count(&self) -> usize {
        self.actors
            .values()
            .filter(|a| matches!(a, Actor::Student(s) if s.requesting))
            .count()
    }
}
