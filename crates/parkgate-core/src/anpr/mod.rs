//! Plate Recognition (ANPR)
//!
//! Triggers the external plate-recognition appliance and collects the plate
//! it files in the record store.

mod alarm;
mod client;
mod probe;

pub use alarm::AlarmRequest;
pub use client::{AnprClient, PlateReading, PlateResult};
pub use probe::{PingProbe, ReachabilityProbe, TcpProbe};

use thiserror::Error;

use crate::store::StoreError;

/// Alarm trigger port on the appliance
pub const ALARM_PORT: u16 = 8040;

/// Alarm type code that requests a plate read
pub const ALARM_TYPE_PLATE: u32 = 40;

/// Reachability probe bound
pub const PROBE_TIMEOUT_MS: u64 = 2000;

/// Ticket plate when no camera answered
pub const NO_CAMERA: &str = "NO_CAMARA";

/// Ticket plate when the camera could not read one
pub const NO_PLATE_TICKET: &str = "NO_PATENTE";

/// Plate value the appliance stores for an unreadable plate
pub const NO_PLATE_APPLIANCE: &str = "NO_PLATE";

/// ANPR errors
#[derive(Error, Debug)]
pub enum AnprError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid alarm document: {0}")]
    InvalidAlarm(String),

    #[error("Appliance connection timed out")]
    Timeout,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
