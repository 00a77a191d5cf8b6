//! Controller Serial Protocol
//!
//! Implements the line-delimited JSON protocol spoken by the gate controller
//! (an Arduino-class board wired to the loop detector and the VEK sensor).
//!
//! Inbound frames are `\n`-terminated JSON envelopes carrying either a `tipo`
//! (snapshot/informational) or an `evento` (transition) discriminator.
//! Outbound commands are plain uppercase tokens.

pub mod commands;
mod connection;
mod error;
pub mod framer;
pub mod message;
pub mod queue;
mod reader;
pub mod serial;
pub mod stream;

pub use commands::Command;
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::ProtocolError;
pub use framer::LineFramer;
pub use message::{DiagnosticResult, Discriminator, Envelope, GarageState, Message};
pub use queue::InboundQueue;
pub use serial::{clear_buffers, list_ports, open_port, with_port_lock, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// Default baud rate for the gate controller
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read/write timeout for the controller port in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Capacity of the inbound line queue used for diagnostic correlation
pub const INBOUND_QUEUE_CAPACITY: usize = 100;

/// Reader loop idle sleep when no bytes are pending
pub const READER_IDLE_MS: u64 = 10;

/// Upper bound on waiting for the reader thread during shutdown
pub const READER_JOIN_TIMEOUT_MS: u64 = 2000;

/// Period of the automatic `STATUS` request
pub const STATUS_INTERVAL_MS: u64 = 10_000;

/// Delay between diagnostic queue polls
pub const DIAGNOSTIC_POLL_INTERVAL_MS: u64 = 100;

/// Number of diagnostic polls before giving up (20 x 100ms = 2s)
pub const DIAGNOSTIC_POLL_ATTEMPTS: u32 = 20;
