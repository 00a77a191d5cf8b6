//! Access tickets
//!
//! The access record created for every granted entry, and the printer seam
//! used to hand it to a physical ticket printer.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// VAT factor applied to ticket amounts
pub const VAT_FACTOR: f64 = 1.19;

/// Access label used when the configuration does not name one
pub const DEFAULT_ACCESS_LABEL: &str = "A1";

/// Printer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PrintError {
    #[error("Printer not available: {0}")]
    Unavailable(String),
}

/// One vehicle access (ticket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub ticket_number: u64,
    /// Fiscal receipt number, assigned at payment (0 until then)
    pub folio: u64,
    /// Plate text or one of the plate sentinels
    pub plate: String,
    pub shift_code: i64,
    pub user_code: i64,
    pub user_type_code: i64,
    pub register_number: i64,
    pub access_label: String,
    pub incidence_id: Option<i64>,
    /// Gross amount, VAT included
    pub amount: i64,
    pub quantity: u32,
    pub status: i32,
    pub entered_at: DateTime<Local>,
    pub paid_at: Option<DateTime<Local>>,
    pub exited_at: Option<DateTime<Local>>,
}

impl AccessRecord {
    /// A fresh entry record: no payment, no exit, zeroed operator codes
    pub fn entry(
        ticket_number: u64,
        plate: impl Into<String>,
        register_number: i64,
        access_label: impl Into<String>,
        incidence_id: Option<i64>,
    ) -> Self {
        Self {
            ticket_number,
            folio: 0,
            plate: plate.into(),
            shift_code: 0,
            user_code: 0,
            user_type_code: 0,
            register_number,
            access_label: access_label.into(),
            incidence_id,
            amount: 0,
            quantity: 1,
            status: 0,
            entered_at: Local::now(),
            paid_at: None,
            exited_at: None,
        }
    }

    /// Net amount: gross / 1.19, rounded to cents, then truncated
    pub fn net_amount(&self) -> i64 {
        let net = self.amount as f64 / VAT_FACTOR;
        ((net * 100.0).round() / 100.0).trunc() as i64
    }

    /// VAT share of the gross amount
    pub fn tax_amount(&self) -> i64 {
        self.amount - self.net_amount()
    }

    /// Plain text body for a ticket printer
    pub fn render_text(&self) -> Vec<String> {
        let mut lines = vec![
            format!("TICKET N {}", self.ticket_number),
            format!("PATENTE: {}", self.plate),
            format!("FECHA: {}", self.entered_at.format("%d-%m-%Y")),
            format!("HORA: {}", self.entered_at.format("%H:%M:%S")),
            format!("CAJA: {}  ACCESO: {}", self.register_number, self.access_label),
        ];
        if self.amount > 0 {
            lines.push(format!(
                "NETO: {}  IVA: {}  TOTAL: {}",
                self.net_amount(),
                self.tax_amount(),
                self.amount
            ));
        }
        lines
    }
}

/// Physical ticket printer
#[async_trait]
pub trait TicketPrinter: Send + Sync {
    /// Render and print `record` on the printer called `printer_name`
    async fn print(&self, printer_name: &str, record: &AccessRecord) -> Result<(), PrintError>;
}
