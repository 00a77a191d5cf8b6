//! Barrier relay
//!
//! The barrier is opened by writing a short command string to a relay board
//! on its own serial port. Each pulse opens the port, writes, waits for the
//! board to latch and closes it again, all under the process-wide port lock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::RelaySettings;
use crate::protocol::{clear_buffers, open_port, with_port_lock, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierSide {
    Entry,
    Exit,
}

/// Something that can open the barrier
#[async_trait]
pub trait BarrierActuator: Send + Sync {
    async fn pulse(&self, side: BarrierSide) -> Result<(), ProtocolError>;
}

/// Relay board on a serial port
pub struct SerialBarrier {
    settings: RwLock<RelaySettings>,
}

impl SerialBarrier {
    /// Relay on the port described by `settings`
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Current relay settings snapshot
    pub fn settings(&self) -> RelaySettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply new relay settings to later pulses
    pub fn reload(&self, settings: &RelaySettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings.clone();
    }
}

/// Relay command configured for `side`
pub fn relay_command(settings: &RelaySettings, side: BarrierSide) -> &str {
    match side {
        BarrierSide::Entry => settings.entry_command.as_str(),
        BarrierSide::Exit => settings.exit_command.as_str(),
    }
}

fn pulse_blocking(settings: &RelaySettings, side: BarrierSide) -> Result<(), ProtocolError> {
    let command = relay_command(settings, side);
    if command.is_empty() {
        return Err(ProtocolError::SerialError(format!(
            "no relay command configured for {:?}",
            side
        )));
    }

    with_port_lock(|| -> Result<(), ProtocolError> {
        let mut port = open_port(
            &settings.port_name,
            settings.baud_rate,
            Duration::from_millis(settings.timeout_ms),
        )?;
        tracing::debug!("relay port {} open", settings.port_name);
        clear_buffers(port.as_mut())?;
        port.write_all(command.as_bytes())?;
        port.flush()?;
        std::thread::sleep(Duration::from_millis(settings.settle_ms));
        Ok(())
    })
}

#[async_trait]
impl BarrierActuator for SerialBarrier {
    async fn pulse(&self, side: BarrierSide) -> Result<(), ProtocolError> {
        let settings = self.settings();
        let port_name = settings.port_name.clone();
        tokio::task::spawn_blocking(move || pulse_blocking(&settings, side))
            .await
            .map_err(|e| ProtocolError::SerialError(format!("relay task failed: {}", e)))??;
        tracing::info!("Barrier {:?} pulsed on {}", side, port_name);
        Ok(())
    }
}
