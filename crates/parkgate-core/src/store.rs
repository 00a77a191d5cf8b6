//! Collaborator stores
//!
//! Persistence lives outside this crate. The entry workflow only needs a few
//! queries (active register, ticket numbering, plate lookup) and one insert,
//! so those are expressed as object-safe async traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GateConfig;
use crate::ticket::AccessRecord;

/// Store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Ticket number {0} already issued")]
    DuplicateTicket(u64),
}

/// Cash register / point of sale issuing tickets for the lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub number: i64,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub active: bool,
}

/// Plate recognition record written by the appliance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateRecord {
    /// Incidence identifier assigned by the store
    pub id: i64,
    pub number_plate: String,
    /// Image path local to the appliance
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub camera_id: String,
}

/// Source of the configuration snapshot
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Read a complete configuration snapshot
    async fn load(&self) -> Result<GateConfig, StoreError>;
}

/// Records consumed and produced by the entry workflow
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The register currently marked active, if any
    async fn active_register(&self) -> Result<Option<Register>, StoreError>;

    /// Highest ticket number issued so far (0 when none)
    async fn last_ticket_number(&self) -> Result<u64, StoreError>;

    /// Atomically claim the next ticket number. Two concurrent callers never
    /// receive the same value.
    async fn reserve_ticket_number(&self) -> Result<u64, StoreError>;

    /// Persist an access record
    async fn insert_access(&self, record: &AccessRecord) -> Result<(), StoreError>;

    /// Most recent plate read by `camera_id`
    async fn latest_plate(&self, camera_id: &str) -> Result<Option<PlateRecord>, StoreError>;
}
