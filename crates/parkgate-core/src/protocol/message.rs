//! Message envelope codec
//!
//! Every controller frame is a flat JSON object with exactly one
//! discriminator: `tipo` for snapshots and informational messages, `evento`
//! for transitions. [`Envelope`] is the loosely-typed decoded form (all
//! fields are kept so nothing is lost on re-encoding); [`Message`] is the
//! typed view the dispatcher works with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// Key of the snapshot/informational discriminator
pub const TIPO_KEY: &str = "tipo";

/// Key of the transition discriminator
pub const EVENTO_KEY: &str = "evento";

/// Which discriminator an envelope carries, with its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discriminator {
    Tipo(String),
    Evento(String),
}

impl Discriminator {
    /// JSON key this discriminator is stored under
    pub fn key(&self) -> &'static str {
        match self {
            Discriminator::Tipo(_) => TIPO_KEY,
            Discriminator::Evento(_) => EVENTO_KEY,
        }
    }

    /// Discriminator value (e.g. `ESTADO_COMPLETO`)
    pub fn value(&self) -> &str {
        match self {
            Discriminator::Tipo(v) | Discriminator::Evento(v) => v,
        }
    }
}

/// A decoded controller frame
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    discriminator: Discriminator,
    fields: Map<String, Value>,
}

impl Envelope {
    /// Decode one trimmed line. Failures keep the line for diagnostics.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| ProtocolError::decode(line, e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::decode(line, "not a JSON object"));
        };

        let tipo = take_discriminator(&mut fields, TIPO_KEY, line)?;
        let evento = take_discriminator(&mut fields, EVENTO_KEY, line)?;
        let discriminator = match (tipo, evento) {
            (Some(t), None) => Discriminator::Tipo(t),
            (None, Some(e)) => Discriminator::Evento(e),
            (Some(_), Some(_)) => {
                return Err(ProtocolError::decode(line, "both 'tipo' and 'evento' present"))
            }
            (None, None) => return Err(ProtocolError::decode(line, "missing 'tipo'/'evento'")),
        };

        Ok(Self {
            discriminator,
            fields,
        })
    }

    /// Serialize back to a single JSON line (no terminator)
    pub fn encode(&self) -> String {
        let mut object = self.fields.clone();
        object.insert(
            self.discriminator.key().to_string(),
            Value::String(self.discriminator.value().to_string()),
        );
        Value::Object(object).to_string()
    }

    /// `tipo` or `evento` value of this frame
    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    /// Payload fields, without the discriminator
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Payload field by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field; numbers and booleans are rendered as text
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Boolean field; accepts `true`/`false`, `0`/`1` and their string forms
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.fields.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer field (controller `millis()` timestamps and similar)
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn take_discriminator(
    fields: &mut Map<String, Value>,
    key: &str,
    line: &str,
) -> Result<Option<String>, ProtocolError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ProtocolError::decode(
            line,
            format!("'{}' must be a string, got {}", key, other),
        )),
    }
}

/// Garage state as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GarageState {
    /// Idle, no vehicle on the loop
    #[serde(rename = "ESPERANDO")]
    Waiting,
    /// Vehicle on the loop, waiting for the ticket button
    #[serde(rename = "VEHICULO_DETECTADO")]
    VehicleDetected,
    /// Access request in progress
    #[serde(rename = "PROCESANDO")]
    Processing,
    /// Hold-off after an access
    #[serde(rename = "COOLDOWN")]
    Cooldown,
    /// No status snapshot received yet (or an unrecognised value)
    #[default]
    #[serde(rename = "DESCONOCIDO")]
    Unknown,
}

impl GarageState {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            GarageState::Waiting => "ESPERANDO",
            GarageState::VehicleDetected => "VEHICULO_DETECTADO",
            GarageState::Processing => "PROCESANDO",
            GarageState::Cooldown => "COOLDOWN",
            GarageState::Unknown => "DESCONOCIDO",
        }
    }

    /// Parse a wire value; anything unrecognised maps to `Unknown`
    pub fn from_wire(value: &str) -> Self {
        value.parse().unwrap_or(GarageState::Unknown)
    }
}

impl FromStr for GarageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ESPERANDO" => Ok(GarageState::Waiting),
            "VEHICULO_DETECTADO" => Ok(GarageState::VehicleDetected),
            "PROCESANDO" => Ok(GarageState::Processing),
            "COOLDOWN" => Ok(GarageState::Cooldown),
            "DESCONOCIDO" => Ok(GarageState::Unknown),
            other => Err(format!("unknown garage state '{}'", other)),
        }
    }
}

impl fmt::Display for GarageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VEK loop sensor diagnostic, as answered to `VEK_DIAG`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub relay1: bool,
    pub relay2: bool,
    pub interpretation: String,
    pub dip_config: String,
}

impl DiagnosticResult {
    fn from_envelope(env: &Envelope) -> Self {
        Self {
            relay1: env.get_bool("relay1").unwrap_or(false),
            relay2: env.get_bool("relay2").unwrap_or(false),
            interpretation: env.get_text("interpretacion").unwrap_or_default(),
            dip_config: env.get_text("config_dip").unwrap_or_default(),
        }
    }

    /// Parse a raw queued line; `None` unless it is a `DIAGNOSTICO_VEK` frame
    pub fn from_line(line: &str) -> Option<Self> {
        let env = Envelope::decode(line).ok()?;
        match env.discriminator() {
            Discriminator::Tipo(t) if t == "DIAGNOSTICO_VEK" => Some(Self::from_envelope(&env)),
            _ => None,
        }
    }
}

impl fmt::Display for DiagnosticResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VEK: {} (R1:{}, R2:{}, DIP:{})",
            self.interpretation, self.relay1, self.relay2, self.dip_config
        )
    }
}

/// Typed view of the envelopes the dispatcher understands
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `tipo=INICIO_SISTEMA`: controller boot banner
    SystemStart {
        version: Option<String>,
        name: Option<String>,
    },
    /// `tipo=ESTADO_COMPLETO`: full status snapshot
    FullStatus {
        state: GarageState,
        vehicle_present: bool,
    },
    /// `tipo=CAMBIO_ESTADO`: sender-authoritative transition
    StateChange {
        previous: GarageState,
        current: GarageState,
        timestamp: Option<i64>,
    },
    /// `tipo=DIAGNOSTICO_VEK`
    Diagnostic(DiagnosticResult),
    /// `tipo=SISTEMA_RESETEADO`
    SystemReset,
    /// `evento=SOLICITUD_ACCESO`: ticket button pressed
    AccessRequest { vek_confirmed: bool, timestamp: i64 },
    /// `evento=VEHICULO_ENTRADA`
    VehicleEntry { timestamp: i64 },
    /// `evento=VEHICULO_SALIDA`
    VehicleExit { timestamp: i64 },
}

impl Message {
    /// Interpret an envelope; unknown discriminator values yield `None`
    pub fn from_envelope(env: &Envelope) -> Option<Self> {
        let timestamp = || env.get_i64("timestamp").unwrap_or(0);
        let state = |key: &str| {
            env.get_text(key)
                .map(|s| GarageState::from_wire(&s))
                .unwrap_or_default()
        };

        let message = match env.discriminator() {
            Discriminator::Tipo(t) => match t.as_str() {
                "INICIO_SISTEMA" => Message::SystemStart {
                    version: env.get_text("version"),
                    name: env.get_text("nombre"),
                },
                "ESTADO_COMPLETO" => Message::FullStatus {
                    state: state("estado"),
                    vehicle_present: env.get_bool("vehiculo_presente").unwrap_or(false),
                },
                "CAMBIO_ESTADO" => Message::StateChange {
                    previous: state("estado_anterior"),
                    current: state("estado_nuevo"),
                    timestamp: env.get_i64("timestamp"),
                },
                "DIAGNOSTICO_VEK" => Message::Diagnostic(DiagnosticResult::from_envelope(env)),
                "SISTEMA_RESETEADO" => Message::SystemReset,
                _ => return None,
            },
            Discriminator::Evento(e) => match e.as_str() {
                "SOLICITUD_ACCESO" => Message::AccessRequest {
                    vek_confirmed: env.get_bool("estado_vek").unwrap_or(false),
                    timestamp: timestamp(),
                },
                "VEHICULO_ENTRADA" => Message::VehicleEntry {
                    timestamp: timestamp(),
                },
                "VEHICULO_SALIDA" => Message::VehicleExit {
                    timestamp: timestamp(),
                },
                _ => return None,
            },
        };
        Some(message)
    }
}
