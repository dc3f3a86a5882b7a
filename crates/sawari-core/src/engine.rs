//! Presence engine for the Sawari hub.
//!
//! The engine is the single writer over the registry and the expiry
//! scheduler. Every transport event (frame, disconnect) and every timer
//! firing passes through it one at a time; the server enforces this by
//! holding the engine behind one `tokio::sync::Mutex`.
//!
//! Every mutation of the requesting set emits both a discrete event and
//! a full reconciling snapshot. The redundancy is deliberate: a client
//! that missed an intermediate event (it just connected, or its
//! connection lagged) converges to correct state on the next snapshot.
//! Do not collapse the pair into one.

use crate::expiry::{Expired, ExpiryScheduler};
use crate::gateway::Gateway;
use crate::registry::{Actor, DriverUpsert, Registry};
use sawari_protocol::{ClientFrame, DriverStatus, RequestEntry, ServerFrame};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default ride-request window: five minutes.
pub const DEFAULT_REQUEST_WINDOW: Duration = Duration::from_millis(300_000);

/// Current wall-clock time in epoch milliseconds.
fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Engine counters, exposed for metrics gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Connected drivers.
    pub drivers: usize,
    /// Connected students, requesting or not.
    pub students: usize,
    /// Students with an active ride request.
    pub requesting: usize,
}

/// Applies connection events to the registry and decides what to
/// broadcast.
pub struct Engine {
    registry: Registry,
    scheduler: ExpiryScheduler,
    gateway: Arc<Gateway>,
    window: Duration,
}

impl Engine {
    /// Create an engine and the channel its expiry firings arrive on.
    ///
    /// The caller must pump the returned receiver into
    /// [`Engine::expired`] on the same serialized event stream as the
    /// other handlers.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, window: Duration) -> (Self, mpsc::UnboundedReceiver<Expired>) {
        let (scheduler, rx) = ExpiryScheduler::new();
        (
            Self {
                registry: Registry::new(),
                scheduler,
                gateway,
                window,
            },
            rx,
        )
    }

    /// Dispatch a client frame.
    pub fn handle(&mut self, id: &str, frame: ClientFrame) {
        match frame {
            ClientFrame::DriverLocation { lat, lng, status } => {
                self.driver_location(id, lat, lng, status);
            }
            ClientFrame::DriverStatus { status } => self.driver_status(id, status),
            ClientFrame::StudentLocation { lat, lng } => self.student_location(id, lat, lng),
            ClientFrame::StartRequest { lat, lng } => self.start_request(id, lat, lng),
            ClientFrame::StopRequest => self.stop_request(id),
        }
    }

    /// Driver location report. Registers the driver on first sight:
    /// it gets its number, everyone gets the new driver set, and the
    /// driver gets the requests already in flight.
    pub fn driver_location(&mut self, id: &str, lat: f64, lng: f64, status: DriverStatus) {
        match self.registry.upsert_driver(id, lat, lng, status) {
            DriverUpsert::New { number } => {
                debug!(connection = %id, number, "Driver registered");
                self.gateway.send_to(id, ServerFrame::AssignNumber { number });
                self.broadcast_drivers();

                let requests = self.registry.requesting_students();
                if !requests.is_empty() {
                    self.gateway.send_to(id, ServerFrame::ExistingRequests { requests });
                }
            }
            DriverUpsert::Updated => self.broadcast_drivers(),
            DriverUpsert::WrongRole => {
                warn!(connection = %id, "Driver frame from a student connection, dropped");
            }
        }
    }

    /// Driver availability change. A status frame carries no
    /// coordinates, so an unknown driver cannot be created here.
    pub fn driver_status(&mut self, id: &str, status: DriverStatus) {
        if self.registry.update_driver_status(id, status) {
            self.broadcast_drivers();
        } else {
            debug!(connection = %id, "Status frame from unknown driver, dropped");
        }
    }

    /// Student location report. Coordinates only; an active request and
    /// its expiry are left untouched.
    pub fn student_location(&mut self, id: &str, lat: f64, lng: f64) {
        if self.registry.upsert_student_location(id, lat, lng) {
            self.broadcast_students();
        } else {
            warn!(connection = %id, "Student frame from a driver connection, dropped");
        }
    }

    /// Start (or refresh) a ride request. Re-requesting is
    /// cancel-then-start: the old timer is replaced and the window
    /// restarts from now.
    pub fn start_request(&mut self, id: &str, lat: f64, lng: f64) {
        let expiry = epoch_ms() + self.window.as_millis() as u64;
        if !self.registry.set_student_requesting(id, lat, lng, expiry) {
            warn!(connection = %id, "Ride request from a driver connection, dropped");
            return;
        }
        self.scheduler.arm(id, self.window);
        debug!(connection = %id, expiry, "Ride request started");

        self.gateway.broadcast(ServerFrame::student_request(&RequestEntry {
            id: id.to_string(),
            lat,
            lng,
            expiry,
        }));
        self.broadcast_students();
    }

    /// Explicit stop. Idempotent: stopping an already-idle student still
    /// emits the standard stop/snapshot pair, nothing more.
    pub fn stop_request(&mut self, id: &str) {
        self.scheduler.disarm(id);
        if self.registry.clear_student_requesting(id) {
            debug!(connection = %id, "Ride request stopped");
        }
        self.gateway.broadcast(ServerFrame::stop_request(id));
        self.broadcast_students();
    }

    /// Process a timer firing from the scheduler's channel.
    ///
    /// A firing that lost a race with a stop, re-request, or disconnect
    /// carries a stale generation or points at a vanished record; both
    /// cases are no-ops.
    pub fn expired(&mut self, event: Expired) {
        if !self.scheduler.take_fired(&event.id, event.generation) {
            debug!(connection = %event.id, "Stale expiry ignored");
            return;
        }
        if !self.registry.clear_student_requesting(&event.id) {
            debug!(connection = %event.id, "Expiry against a vanished request ignored");
            return;
        }
        debug!(connection = %event.id, "Ride request expired");
        self.gateway.broadcast(ServerFrame::stop_request(&event.id));
        self.broadcast_students();
    }

    /// Transport-level disconnect. The record is destroyed immediately;
    /// a requesting student gets its stop event broadcast first so every
    /// client drops the marker.
    pub fn disconnect(&mut self, id: &str) {
        match self.registry.remove(id) {
            Some(Actor::Driver(driver)) => {
                debug!(connection = %id, number = driver.number, "Driver disconnected");
                self.broadcast_drivers();
            }
            Some(Actor::Student(student)) => {
                self.scheduler.disarm(id);
                debug!(connection = %id, requesting = student.requesting, "Student disconnected");
                if student.requesting {
                    self.gateway.broadcast(ServerFrame::stop_request(id));
                }
                self.broadcast_students();
            }
            None => {}
        }
    }

    /// Engine counters for metrics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            drivers: self.registry.driver_count(),
            students: self.registry.student_count(),
            requesting: self.registry.requesting_count(),
        }
    }

    fn broadcast_drivers(&self) {
        self.gateway.broadcast(ServerFrame::DriversUpdate {
            drivers: self.registry.drivers(),
        });
    }

    fn broadcast_students(&self) {
        self.gateway
            .broadcast(ServerFrame::students_update(self.registry.requesting_students()));
    }

    #[cfg(test)]
    fn armed(&self, id: &str) -> bool {
        self.scheduler.armed(id)
    }

    #[cfg(test)]
    fn armed_count(&self) -> usize {
        self.scheduler.armed_count()
    }
}
