//! # ParkGate Core Library
//!
//! Entry lane control for a parking facility.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The line-delimited JSON protocol spoken by the gate controller
//! - A session with a background reader, periodic status and VEK diagnostics
//! - The garage state machine and typed notification channels
//! - The plate recognition (ANPR) trigger client
//! - The entry workflow: plate, ticket, persistence, barrier
//!
//! ## Example
//!
//! ```rust,ignore
//! use parkgate_core::prelude::*;
//!
//! let config = GateConfig::load_or_default(GateConfig::default_path()?)?;
//! let (sinks, mut notifications) = notification_channels();
//!
//! let mut session = Connection::new(config.connection_config(), sinks.clone());
//! session.start().await?;
//!
//! let orchestrator = Arc::new(AccessOrchestrator::new(config, anpr, store, printer, barrier, sinks));
//! orchestrator.spawn_listener(notifications.access_requests);
//! ```

pub mod anpr;
pub mod barrier;
pub mod config;
pub mod demo;
pub mod garage;
pub mod orchestrator;
pub mod protocol;
pub mod store;
pub mod ticket;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::anpr::{AnprClient, PingProbe, PlateReading, PlateResult, ReachabilityProbe};
    pub use crate::barrier::{BarrierActuator, BarrierSide, SerialBarrier};
    pub use crate::config::{FileParameterStore, GateConfig};
    pub use crate::garage::{notification_channels, GarageStatus, NotificationSinks, Notifications};
    pub use crate::orchestrator::{AccessOrchestrator, AccessOutcome, TicketNumbering};
    pub use crate::protocol::{Command, Connection, ConnectionState, GarageState};
    pub use crate::store::{ParameterStore, RecordStore};
    pub use crate::ticket::{AccessRecord, TicketPrinter};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
