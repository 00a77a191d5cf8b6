//! Outbound notifications
//!
//! The dispatcher publishes on one typed channel per notification kind.
//! Sends never block (unbounded channels), so the reader thread is never
//! held up by a slow consumer; a dropped receiver just discards that kind.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::protocol::GarageState;

/// Garage state transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChanged {
    pub previous: GarageState,
    pub current: GarageState,
    /// Controller `millis()` when the sender supplied one
    pub device_timestamp: Option<i64>,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for StateChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State: {} -> {}", self.previous, self.current)
    }
}

/// Direction of a loop detector event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VehicleDirection {
    Entrada,
    Salida,
}

/// Vehicle arrived on / left the loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleEvent {
    pub direction: VehicleDirection,
    pub device_timestamp: i64,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for VehicleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vehicle {:?}: {}",
            self.direction,
            self.received_at.format("%H:%M:%S")
        )
    }
}

/// Ticket button pressed at the entry column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRequest {
    /// Whether the VEK loop sensor confirmed a vehicle at press time
    pub vek_confirmed: bool,
    pub device_timestamp: i64,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for AccessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Access request: {} (VEK: {})",
            self.received_at.format("%Y-%m-%d %H:%M:%S"),
            if self.vek_confirmed { "confirmed" } else { "not confirmed" }
        )
    }
}

/// Broad origin of an error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Port open/read/write failure
    Transport,
    /// Malformed inbound frame
    Decode,
    /// Entry workflow failure
    Workflow,
}

/// Error surfaced to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Local>,
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

/// Sending half of every notification channel
#[derive(Debug, Clone)]
pub struct NotificationSinks {
    state: UnboundedSender<StateChanged>,
    vehicle: UnboundedSender<VehicleEvent>,
    access: UnboundedSender<AccessRequest>,
    log: UnboundedSender<String>,
    error: UnboundedSender<ErrorNotice>,
}

/// Receiving half of every notification channel.
///
/// The channels are unbounded and the status timer keeps producing traffic,
/// so every receiver kept alive must be drained. Drop the ones you do not
/// consume; sends to a dropped receiver are discarded.
#[derive(Debug)]
pub struct Notifications {
    /// Garage state transitions
    pub state_changes: UnboundedReceiver<StateChanged>,
    /// Vehicle entry/exit detections
    pub vehicles: UnboundedReceiver<VehicleEvent>,
    /// Access requests for the entry workflow
    pub access_requests: UnboundedReceiver<AccessRequest>,
    /// Operator log lines
    pub log: UnboundedReceiver<String>,
    /// Error notices
    pub errors: UnboundedReceiver<ErrorNotice>,
}

/// Create a connected set of notification channels
pub fn notification_channels() -> (NotificationSinks, Notifications) {
    let (state, state_changes) = unbounded_channel();
    let (vehicle, vehicles) = unbounded_channel();
    let (access, access_requests) = unbounded_channel();
    let (log, log_rx) = unbounded_channel();
    let (error, errors) = unbounded_channel();
    (
        NotificationSinks {
            state,
            vehicle,
            access,
            log,
            error,
        },
        Notifications {
            state_changes,
            vehicles,
            access_requests,
            log: log_rx,
            errors,
        },
    )
}

impl NotificationSinks {
    /// Send a garage state transition
    pub fn state_changed(&self, event: StateChanged) {
        let _ = self.state.send(event);
    }

    /// Send a vehicle detection event
    pub fn vehicle(&self, event: VehicleEvent) {
        let _ = self.vehicle.send(event);
    }

    /// Send an access request
    pub fn access_request(&self, event: AccessRequest) {
        let _ = self.access.send(event);
    }

    /// Operator-facing log line (also traced at info level)
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        let _ = self.log.send(message);
    }

    /// Error notice (also traced at warn level)
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(?kind, "{}", message);
        let _ = self.error.send(ErrorNotice {
            kind,
            message,
            at: Local::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_deliver_in_order() {
        let (sinks, mut rx) = notification_channels();
        sinks.log("first");
        sinks.log("second");
        assert_eq!(rx.log.try_recv().unwrap(), "first");
        assert_eq!(rx.log.try_recv().unwrap(), "second");
        assert!(rx.log.try_recv().is_err());
    }

    #[test]
    fn test_undrained_channel_can_be_dropped_alone() {
        let (sinks, rx) = notification_channels();
        let Notifications { log, mut errors, .. } = rx;
        drop(log);
        for i in 0..1000 {
            sinks.log(format!("status {i}"));
        }
        sinks.error(ErrorKind::Decode, "bad frame");
        assert_eq!(errors.try_recv().unwrap().message, "bad frame");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (sinks, rx) = notification_channels();
        drop(rx);
        sinks.error(ErrorKind::Transport, "port gone");
        sinks.vehicle(VehicleEvent {
            direction: VehicleDirection::Salida,
            device_timestamp: 1,
            received_at: Local::now(),
        });
    }

    #[test]
    fn test_display_formats() {
        let change = StateChanged {
            previous: GarageState::Waiting,
            current: GarageState::Processing,
            device_timestamp: None,
            received_at: Local::now(),
        };
        assert_eq!(change.to_string(), "State: ESPERANDO -> PROCESANDO");
        let request = AccessRequest {
            vek_confirmed: true,
            device_timestamp: 5,
            received_at: Local::now(),
        };
        assert!(request.to_string().ends_with("(VEK: confirmed)"));
    }
}
