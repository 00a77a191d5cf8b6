//! Garage State Machine
//!
//! Tracks what the controller reports about the entry lane (waiting, vehicle
//! detected, processing, cooldown) and turns inbound frames into typed
//! notifications for the rest of the system.

mod dispatcher;
mod events;

pub use dispatcher::{Dispatcher, GarageStatus};
pub use events::{
    notification_channels, AccessRequest, ErrorKind, ErrorNotice, NotificationSinks,
    Notifications, StateChanged, VehicleDirection, VehicleEvent,
};
