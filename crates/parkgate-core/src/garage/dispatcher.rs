//! Garage state dispatcher
//!
//! Consumes decoded controller frames on the reader thread, keeps the
//! cached garage status and raises notifications. State only ever changes
//! here, in response to inbound frames.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use super::events::{
    AccessRequest, ErrorKind, NotificationSinks, StateChanged, VehicleDirection, VehicleEvent,
};
use crate::protocol::{Envelope, GarageState, Message};

/// Cached view of the garage as last reported by the controller
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GarageStatus {
    pub state: GarageState,
    pub vehicle_present: bool,
    /// Receipt time of the last `SOLICITUD_ACCESO`
    pub last_request: Option<DateTime<Local>>,
}

/// The garage state machine
pub struct Dispatcher {
    status: GarageStatus,
    status_tx: Arc<watch::Sender<GarageStatus>>,
    sinks: NotificationSinks,
}

impl Dispatcher {
    /// Create a dispatcher in the initial (`DESCONOCIDO`) state, returning
    /// the watch receiver that mirrors its status
    pub fn new(sinks: NotificationSinks) -> (Self, watch::Receiver<GarageStatus>) {
        let (status_tx, status_rx) = watch::channel(GarageStatus::default());
        (Self::with_status(sinks, Arc::new(status_tx)), status_rx)
    }

    /// Create a dispatcher publishing into an existing status channel.
    /// The channel is reset to the initial status.
    pub fn with_status(
        sinks: NotificationSinks,
        status_tx: Arc<watch::Sender<GarageStatus>>,
    ) -> Self {
        status_tx.send_replace(GarageStatus::default());
        Self {
            status: GarageStatus::default(),
            status_tx,
            sinks,
        }
    }

    /// Current garage status
    pub fn status(&self) -> &GarageStatus {
        &self.status
    }

    /// Decode and dispatch one raw line; decode failures are reported, never fatal
    pub fn handle_line(&mut self, line: &str) {
        tracing::debug!("<- {}", line);
        match Envelope::decode(line) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(e) => self.sinks.error(ErrorKind::Decode, e.to_string()),
        }
    }

    /// Apply one envelope. Unknown discriminators are ignored.
    pub fn dispatch(&mut self, envelope: &Envelope) {
        let Some(message) = Message::from_envelope(envelope) else {
            tracing::debug!(
                "ignoring unknown {}={}",
                envelope.discriminator().key(),
                envelope.discriminator().value()
            );
            return;
        };
        let now = Local::now();

        match message {
            Message::SystemStart { version, name } => {
                self.sinks.log(format!(
                    "Controller started: v{} - {}",
                    version.unwrap_or_default(),
                    name.unwrap_or_default()
                ));
            }
            Message::FullStatus {
                state,
                vehicle_present,
            } => {
                if state != self.status.state {
                    let previous = self.status.state;
                    self.status.state = state;
                    self.sinks.state_changed(StateChanged {
                        previous,
                        current: state,
                        device_timestamp: None,
                        received_at: now,
                    });
                }
                self.status.vehicle_present = vehicle_present;
            }
            Message::StateChange {
                previous,
                current,
                timestamp,
            } => {
                self.status.state = current;
                self.sinks.state_changed(StateChanged {
                    previous,
                    current,
                    device_timestamp: timestamp,
                    received_at: now,
                });
            }
            Message::Diagnostic(diag) => {
                self.sinks.log(format!("VEK diagnostic: {}", diag.interpretation));
            }
            Message::SystemReset => {
                self.sinks.log("Controller reset");
                self.status.state = GarageState::Waiting;
            }
            Message::AccessRequest {
                vek_confirmed,
                timestamp,
            } => {
                self.status.last_request = Some(now);
                self.sinks.access_request(AccessRequest {
                    vek_confirmed,
                    device_timestamp: timestamp,
                    received_at: now,
                });
            }
            Message::VehicleEntry { timestamp } => {
                self.status.vehicle_present = true;
                self.vehicle_event(VehicleDirection::Entrada, timestamp, now);
            }
            Message::VehicleExit { timestamp } => {
                self.status.vehicle_present = false;
                self.vehicle_event(VehicleDirection::Salida, timestamp, now);
            }
        }

        self.publish();
    }

    fn vehicle_event(&self, direction: VehicleDirection, timestamp: i64, now: DateTime<Local>) {
        self.sinks.vehicle(VehicleEvent {
            direction,
            device_timestamp: timestamp,
            received_at: now,
        });
    }

    fn publish(&self) {
        let status = self.status.clone();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
