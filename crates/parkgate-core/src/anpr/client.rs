//! Plate recognition trigger client
//!
//! Fire and poll: the alarm goes out over a short-lived TCP connection, the
//! appliance writes its result to the record store, and after the configured
//! processing delay the latest plate for the entry camera is read back.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{
    AlarmRequest, AnprError, ReachabilityProbe, NO_CAMERA, NO_PLATE_APPLIANCE, NO_PLATE_TICKET,
};
use crate::config::AnprSettings;
use crate::store::RecordStore;

/// Outcome of a plate read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlateReading {
    /// Plate text as read by the appliance
    Plate(String),
    /// Appliance answered but could not read a plate
    NoPlate,
    /// Appliance unreachable or plate reading disabled
    NoCamera,
}

impl PlateReading {
    /// Text stored on the ticket (plate or sentinel)
    pub fn as_str(&self) -> &str {
        match self {
            PlateReading::Plate(plate) => plate.as_str(),
            PlateReading::NoPlate => NO_PLATE_TICKET,
            PlateReading::NoCamera => NO_CAMERA,
        }
    }
}

impl fmt::Display for PlateReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlateResult {
    pub reading: PlateReading,
    /// Incidence id assigned by the store to the plate record
    pub incidence_id: Option<i64>,
    /// Image path local to the appliance
    pub image_path: Option<String>,
}

impl PlateResult {
    /// Result used when the appliance cannot be asked
    pub fn no_camera() -> Self {
        Self {
            reading: PlateReading::NoCamera,
            incidence_id: None,
            image_path: None,
        }
    }

    /// Text stored on the ticket
    pub fn plate(&self) -> &str {
        self.reading.as_str()
    }

    /// Image path as reachable from this host through the appliance's
    /// administrative share (`D:\x` becomes `\\host\D$\x`)
    pub fn remote_image_path(&self, host: &str) -> Option<String> {
        self.image_path
            .as_deref()
            .map(|path| map_drive_path(path, host))
    }
}

fn map_drive_path(path: &str, host: &str) -> String {
    match path.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("D:\\") => {
            format!("\\\\{}\\D$\\{}", host, &path[3..])
        }
        _ => path.to_string(),
    }
}

/// Trigger client for the plate recognition appliance
pub struct AnprClient {
    settings: RwLock<AnprSettings>,
    store: Arc<dyn RecordStore>,
    probe: Arc<dyn ReachabilityProbe>,
}

impl AnprClient {
    /// Client using `store` for results and `probe` for reachability
    pub fn new(
        settings: AnprSettings,
        store: Arc<dyn RecordStore>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            store,
            probe,
        }
    }

    /// Current settings snapshot
    pub fn settings(&self) -> AnprSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply a new settings snapshot; in-flight reads keep the old one
    pub fn reload(&self, settings: &AnprSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings.clone();
        tracing::debug!("ANPR settings reloaded (host {})", settings.host);
    }

    /// Read the plate of the vehicle at the entry. Unavailability of the
    /// appliance degrades to [`PlateReading::NoCamera`]; only store failures
    /// are errors.
    pub async fn request_plate(&self) -> Result<PlateResult, AnprError> {
        let settings = self.settings();
        let probe_timeout = Duration::from_millis(settings.probe_timeout_ms);

        if !self.probe.is_reachable(&settings.host, probe_timeout).await {
            tracing::warn!("ANPR appliance {} unreachable", settings.host);
            return Ok(PlateResult::no_camera());
        }
        if !settings.cashier_message.is_empty() {
            tracing::info!("{}", settings.cashier_message);
        }
        if !settings.enabled {
            tracing::debug!("plate reading disabled");
            return Ok(PlateResult::no_camera());
        }

        if let Err(e) = self.trigger(&settings).await {
            tracing::warn!("ANPR trigger to {} failed: {}", settings.host, e);
            return Ok(PlateResult::no_camera());
        }

        tokio::time::sleep(Duration::from_millis(settings.plate_read_delay_ms)).await;

        let result = match self.store.latest_plate(&settings.entry_camera_id).await? {
            Some(record) => PlateResult {
                reading: if record.number_plate == NO_PLATE_APPLIANCE {
                    PlateReading::NoPlate
                } else {
                    PlateReading::Plate(record.number_plate)
                },
                incidence_id: Some(record.id),
                image_path: record.image_path,
            },
            None => PlateResult {
                reading: PlateReading::NoPlate,
                incidence_id: None,
                image_path: None,
            },
        };
        tracing::info!(
            "Plate: {} (incidence {:?})",
            result.plate(),
            result.incidence_id
        );
        Ok(result)
    }

    /// Send the alarm document and close; nothing is read back
    async fn trigger(&self, settings: &AnprSettings) -> Result<(), AnprError> {
        let mut request = AlarmRequest::plate_read(settings.camera_mask.clone());
        request.alarm_type = settings.alarm_type;
        let xml = request.to_xml()?;

        let connect = TcpStream::connect((settings.host.as_str(), settings.alarm_port));
        let mut stream =
            tokio::time::timeout(Duration::from_millis(settings.probe_timeout_ms), connect)
                .await
                .map_err(|_| AnprError::Timeout)??;

        stream.write_all(xml.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        tracing::debug!(
            "alarm {} sent to {}:{}",
            settings.alarm_type,
            settings.host,
            settings.alarm_port
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_text() {
        assert_eq!(PlateReading::Plate("ABCD12".into()).as_str(), "ABCD12");
        assert_eq!(PlateReading::NoPlate.as_str(), "NO_PATENTE");
        assert_eq!(PlateReading::NoCamera.to_string(), "NO_CAMARA");
    }

    #[test]
    fn test_remote_image_path() {
        let result = PlateResult {
            reading: PlateReading::NoPlate,
            incidence_id: Some(1),
            image_path: Some("D:\\anpr\\img\\001.jpg".to_string()),
        };
        assert_eq!(
            result.remote_image_path("10.0.0.5").as_deref(),
            Some("\\\\10.0.0.5\\D$\\anpr\\img\\001.jpg")
        );
        assert_eq!(map_drive_path("C:\\x.jpg", "h"), "C:\\x.jpg");
        assert_eq!(PlateResult::no_camera().remote_image_path("h"), None);
    }
}
