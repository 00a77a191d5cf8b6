//! Entry workflow
//!
//! One run per access request: read the plate, find the active register,
//! number the ticket, print it, persist it, open the barrier. Runs never
//! retry; a failed run is reported and the next request starts fresh.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::anpr::{AnprClient, AnprError};
use crate::barrier::{BarrierActuator, BarrierSide};
use crate::config::GateConfig;
use crate::garage::{AccessRequest, ErrorKind, NotificationSinks};
use crate::protocol::ProtocolError;
use crate::store::{RecordStore, StoreError};
use crate::ticket::{AccessRecord, TicketPrinter};

/// Operator message when the ticket could not be printed
pub const PRINTER_UNAVAILABLE_MESSAGE: &str =
    "IMPRESORA NO DISPONIBLE. VERIFICAR CONEXION O CONFIGURACION DE IMPRESORA.";

/// How the next ticket number is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketNumbering {
    /// Last issued + 1, read without reservation. Overlapping runs can
    /// compute the same number.
    Optimistic,
    /// Atomic claim in the record store
    #[default]
    Reserved,
}

/// Workflow errors
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("No active register")]
    NoActiveRegister,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Plate recognition error: {0}")]
    Anpr(#[from] AnprError),

    #[error("Barrier error: {0}")]
    Barrier(#[from] ProtocolError),
}

/// Result of one completed run
#[derive(Debug, Clone, PartialEq)]
pub enum AccessOutcome {
    /// Ticket printed and barrier opened
    Granted {
        record: AccessRecord,
        /// Whether the store accepted the record
        persisted: bool,
    },
    /// Nothing persisted, barrier left closed
    PrinterUnavailable { message: String },
}

/// Runs the entry workflow against its collaborators
pub struct AccessOrchestrator {
    config: RwLock<GateConfig>,
    anpr: Arc<AnprClient>,
    store: Arc<dyn RecordStore>,
    printer: Arc<dyn TicketPrinter>,
    barrier: Arc<dyn BarrierActuator>,
    sinks: NotificationSinks,
}

impl AccessOrchestrator {
    /// Wire the workflow to its collaborators
    pub fn new(
        config: GateConfig,
        anpr: Arc<AnprClient>,
        store: Arc<dyn RecordStore>,
        printer: Arc<dyn TicketPrinter>,
        barrier: Arc<dyn BarrierActuator>,
        sinks: NotificationSinks,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            anpr,
            store,
            printer,
            barrier,
            sinks,
        }
    }

    /// Current configuration snapshot
    pub fn config(&self) -> GateConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply a new snapshot to the workflow and the ANPR client. The barrier
    /// actuator owns its own settings.
    pub fn reload(&self, config: &GateConfig) {
        self.anpr.reload(&config.anpr);
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config.clone();
        tracing::info!("configuration reloaded");
    }

    /// Run one entry workflow
    pub async fn process_entry(&self) -> Result<AccessOutcome, AccessError> {
        let config = self.config();

        let plate = self.anpr.request_plate().await?;
        self.sinks.log(format!(
            "Plate: {}, incidence: {:?}",
            plate.plate(),
            plate.incidence_id
        ));

        let register = self
            .store
            .active_register()
            .await?
            .ok_or(AccessError::NoActiveRegister)?;

        let ticket_number = match config.ticket.numbering {
            TicketNumbering::Optimistic => self.store.last_ticket_number().await? + 1,
            TicketNumbering::Reserved => self.store.reserve_ticket_number().await?,
        };

        let record = AccessRecord::entry(
            ticket_number,
            plate.plate(),
            register.number,
            config.ticket.access_label.clone(),
            plate.incidence_id,
        );

        if let Err(e) = self.printer.print(&config.printer.name, &record).await {
            tracing::warn!("ticket {} not printed: {}", ticket_number, e);
            self.sinks.log(PRINTER_UNAVAILABLE_MESSAGE);
            return Ok(AccessOutcome::PrinterUnavailable {
                message: PRINTER_UNAVAILABLE_MESSAGE.to_string(),
            });
        }

        // The vehicle holds a printed ticket at this point, so a store
        // failure does not keep the barrier closed
        let persisted = match self.store.insert_access(&record).await {
            Ok(()) => true,
            Err(e) => {
                self.sinks.error(
                    ErrorKind::Workflow,
                    format!("Ticket {} not saved: {}", ticket_number, e),
                );
                false
            }
        };

        if config.relay.ticket_to_barrier_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.relay.ticket_to_barrier_delay_ms))
                .await;
        }
        self.barrier.pulse(BarrierSide::Entry).await?;

        self.sinks.log(format!(
            "ACCESS GRANTED - ticket {} ({})",
            record.ticket_number, record.plate
        ));
        Ok(AccessOutcome::Granted { record, persisted })
    }

    /// Manual barrier opening
    pub async fn open_barrier(&self, side: BarrierSide) -> Result<(), AccessError> {
        self.barrier.pulse(side).await?;
        self.sinks.log(format!("Barrier opened manually ({:?})", side));
        Ok(())
    }

    /// Run one workflow per access request, in arrival order, until the
    /// request channel closes
    pub fn spawn_listener(
        self: Arc<Self>,
        mut requests: UnboundedReceiver<AccessRequest>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                self.sinks.log(request.to_string());
                match self.process_entry().await {
                    Ok(AccessOutcome::Granted { .. }) => {}
                    Ok(AccessOutcome::PrinterUnavailable { message }) => {
                        self.sinks.error(ErrorKind::Workflow, message);
                    }
                    Err(e) => {
                        self.sinks
                            .error(ErrorKind::Workflow, format!("Entry workflow failed: {}", e));
                    }
                }
            }
            tracing::debug!("access request channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering_default_and_serde() {
        assert_eq!(TicketNumbering::default(), TicketNumbering::Reserved);
        let parsed: TicketNumbering = serde_json::from_str("\"Optimistic\"").unwrap();
        assert_eq!(parsed, TicketNumbering::Optimistic);
    }
}
