//! Protocol commands
//!
//! Commands understood by the gate controller firmware. They are sent as
//! bare uppercase tokens terminated by `\n`; the controller does not
//! acknowledge them, any answer arrives as an ordinary inbound envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands sent to the gate controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Ask for an `ESTADO_COMPLETO` snapshot
    Status,

    /// Reset the controller state machine (answered by `SISTEMA_RESETEADO`)
    Reset,

    /// Print the firmware's command list
    Help,

    /// Ask for a `DIAGNOSTICO_VEK` report of the loop sensor
    VekDiag,
}

impl Command {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Status => "STATUS",
            Command::Reset => "RESET",
            Command::Help => "HELP",
            Command::VekDiag => "VEK_DIAG",
        }
    }

    /// Framed bytes ready to write
    pub fn encode(&self) -> String {
        encode_command(self.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame an arbitrary command: trimmed, uppercased, `\n`-terminated
pub fn encode_command(command: &str) -> String {
    let mut line = command.trim().to_uppercase();
    line.push('\n');
    line
}
