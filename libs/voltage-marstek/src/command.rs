//! Command construction, encoding and raw-message parsing

use crate::constants::{DISCOVERY_REQUEST_ID, MAX_MESSAGE_BYTES};
use crate::error::{Result, ValidationError};
use crate::mode::ModeConfig;
use crate::validation::{validate_params, ValidationOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// The fixed Open API method set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "Marstek.GetDevice")]
    GetDevice,
    #[serde(rename = "Bat.GetStatus")]
    BatStatus,
    #[serde(rename = "ES.GetStatus")]
    EsStatus,
    #[serde(rename = "ES.GetMode")]
    EsMode,
    #[serde(rename = "ES.SetMode")]
    SetMode,
    #[serde(rename = "PV.GetStatus")]
    PvStatus,
    #[serde(rename = "Wifi.GetStatus")]
    WifiStatus,
    #[serde(rename = "EM.GetStatus")]
    EmStatus,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Self::GetDevice,
        Self::BatStatus,
        Self::EsStatus,
        Self::EsMode,
        Self::SetMode,
        Self::PvStatus,
        Self::WifiStatus,
        Self::EmStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetDevice => "Marstek.GetDevice",
            Self::BatStatus => "Bat.GetStatus",
            Self::EsStatus => "ES.GetStatus",
            Self::EsMode => "ES.GetMode",
            Self::SetMode => "ES.SetMode",
            Self::PvStatus => "PV.GetStatus",
            Self::WifiStatus => "Wifi.GetStatus",
            Self::EmStatus => "EM.GetStatus",
        }
    }

    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::SetMode => &["id", "config"],
            _ => &[],
        }
    }

    pub fn optional_params(&self) -> &'static [&'static str] {
        match self {
            Self::GetDevice => &["ble_mac"],
            Self::SetMode => &[],
            _ => &["id"],
        }
    }

    /// Whether the method changes device state
    pub fn is_write(&self) -> bool {
        matches!(self, Self::SetMode)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(Method::as_str).collect();
                ValidationError::new(
                    "method",
                    format!("Unknown method '{}'. Valid methods: {}", s, known.join(", ")),
                )
            })
    }
}

/// A validated request envelope
///
/// Fields are private so a `Command` can only exist after validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    id: u64,
    method: Method,
    params: Map<String, Value>,
}

impl Command {
    pub fn new(id: u64, method: Method, params: Map<String, Value>) -> Result<Self> {
        Self::with_options(id, method, params, &ValidationOptions::default())
    }

    pub fn with_options(
        id: u64,
        method: Method,
        params: Map<String, Value>,
        opts: &ValidationOptions,
    ) -> Result<Self> {
        validate_params(method, &params, opts)?;
        Ok(Self { id, method, params })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Same command under a different correlation id
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::with_capacity(3);
        obj.insert("id".to_string(), Value::from(self.id));
        obj.insert("method".to_string(), Value::from(self.method.as_str()));
        obj.insert("params".to_string(), Value::Object(self.params.clone()));
        Value::Object(obj)
    }

    /// Compact single-line JSON
    pub fn encode(&self) -> Result<String> {
        let text = serde_json::to_string(self)
            .map_err(|e| ValidationError::new("command", format!("serialization failed: {}", e)))?;
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(ValidationError::new(
                "command",
                format!(
                    "Command too large: {} bytes (max {})",
                    text.len(),
                    MAX_MESSAGE_BYTES
                ),
            ));
        }
        Ok(text)
    }

    /// Parse and validate a raw JSON message from an untrusted caller
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_options(text, &ValidationOptions::default())
    }

    pub fn parse_with_options(text: &str, opts: &ValidationOptions) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(ValidationError::new("message", "Message cannot be empty"));
        }
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(ValidationError::new(
                "message",
                format!(
                    "Message too large: {} bytes (max {})",
                    text.len(),
                    MAX_MESSAGE_BYTES
                ),
            ));
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| ValidationError::new("message", format!("Invalid JSON: {}", e)))?;
        let Value::Object(mut obj) = value else {
            return Err(ValidationError::new("message", "Message must be a JSON object"));
        };

        let id = match obj.get("id") {
            None => return Err(ValidationError::new("id", "Message missing required field 'id'")),
            Some(v) => v.as_u64().ok_or_else(|| {
                ValidationError::new("id", format!("id must be a non-negative integer (got {})", v))
            })?,
        };

        let method = match obj.get("method") {
            None => {
                return Err(ValidationError::new(
                    "method",
                    "Message missing required field 'method'",
                ))
            },
            Some(Value::String(name)) => name.parse::<Method>()?,
            Some(other) => {
                return Err(ValidationError::new(
                    "method",
                    format!("method must be a string (got {})", other),
                ))
            },
        };

        let params = match obj.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(p)) => p,
            Some(_) => return Err(ValidationError::new("params", "params must be an object")),
        };

        Self::with_options(id, method, params, opts)
    }
}

fn device_params(device_id: u8) -> Map<String, Value> {
    let mut params = Map::with_capacity(1);
    params.insert("id".to_string(), Value::from(device_id));
    params
}

// Read commands only carry a bounded `id`, so construction cannot fail.
fn read_command(id: u64, method: Method, device_id: u8) -> Command {
    Command {
        id,
        method,
        params: device_params(device_id),
    }
}

/// Discovery broadcast, always `id = 0`
pub fn discover() -> Command {
    let mut params = Map::with_capacity(1);
    params.insert("ble_mac".to_string(), Value::from("0"));
    Command {
        id: DISCOVERY_REQUEST_ID,
        method: Method::GetDevice,
        params,
    }
}

pub fn es_status(id: u64, device_id: u8) -> Command {
    read_command(id, Method::EsStatus, device_id)
}

pub fn es_mode(id: u64, device_id: u8) -> Command {
    read_command(id, Method::EsMode, device_id)
}

pub fn pv_status(id: u64, device_id: u8) -> Command {
    read_command(id, Method::PvStatus, device_id)
}

pub fn wifi_status(id: u64, device_id: u8) -> Command {
    read_command(id, Method::WifiStatus, device_id)
}

pub fn em_status(id: u64, device_id: u8) -> Command {
    read_command(id, Method::EmStatus, device_id)
}

pub fn battery_status(id: u64, device_id: u8) -> Command {
    read_command(id, Method::BatStatus, device_id)
}

/// `ES.SetMode` with a fully validated config
pub fn set_mode(id: u64, device_id: u8, config: &ModeConfig) -> Result<Command> {
    set_mode_with_options(id, device_id, config, &ValidationOptions::default())
}

pub fn set_mode_with_options(
    id: u64,
    device_id: u8,
    config: &ModeConfig,
    opts: &ValidationOptions,
) -> Result<Command> {
    let mut params = device_params(device_id);
    params.insert("config".to_string(), config.to_value());
    Command::with_options(id, Method::SetMode, params, opts)
}

/// Per-transport correlation id source
///
/// Starts at 1; id 0 is reserved for discovery.
#[derive(Debug)]
pub struct RequestIdCounter {
    next: AtomicU64,
}

impl RequestIdCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Restart numbering at 1
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for RequestIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::mode::ManualConfig;
    use serde_json::json;

    #[test]
    fn test_method_table() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert_eq!("ES.Reboot".parse::<Method>().unwrap_err().field, "method");
        assert!(Method::SetMode.is_write());
        assert!(!Method::EsStatus.is_write());
        assert_eq!(Method::SetMode.required_params(), &["id", "config"]);
    }

    #[test]
    fn test_discover_command_shape() {
        let encoded = discover().encode().unwrap();
        assert_eq!(
            encoded,
            r#"{"id":0,"method":"Marstek.GetDevice","params":{"ble_mac":"0"}}"#
        );
    }

    #[test]
    fn test_read_builders() {
        let cmd = es_status(7, 0);
        assert_eq!(cmd.id(), 7);
        assert_eq!(cmd.method(), Method::EsStatus);
        assert_eq!(cmd.to_value(), json!({"id": 7, "method": "ES.GetStatus", "params": {"id": 0}}));
        assert_eq!(battery_status(1, 3).params()["id"], 3);
    }

    #[test]
    fn test_set_mode_is_validated() {
        let ok = set_mode(5, 0, &ModeConfig::manual(ManualConfig::discharge(800))).unwrap();
        assert_eq!(ok.params()["config"]["manual_cfg"]["power"], 800);

        let too_much = ModeConfig::passive(20_000, 60);
        assert_eq!(set_mode(5, 0, &too_much).unwrap_err().field, "power");

        let backwards = ManualConfig {
            start_time: "18:00".into(),
            end_time: "06:00".into(),
            enable: true,
            ..ManualConfig::default()
        };
        assert_eq!(
            set_mode(5, 0, &ModeConfig::manual(backwards)).unwrap_err().field,
            "end_time"
        );
    }

    #[test]
    fn test_parse_recovers_method_and_params() {
        let built = set_mode(42, 1, &ModeConfig::passive(-300, 600)).unwrap();
        let parsed = Command::parse(&built.encode().unwrap()).unwrap();
        assert_eq!(parsed, built);

        let minimal = Command::parse(r#"{"id": 3, "method": "ES.GetMode"}"#).unwrap();
        assert!(minimal.params().is_empty());
    }

    #[test]
    fn test_parse_rejections() {
        let cases = [
            ("   ", "message"),
            ("not json", "message"),
            ("[1,2]", "message"),
            (r#"{"method":"ES.GetMode"}"#, "id"),
            (r#"{"id":-1,"method":"ES.GetMode"}"#, "id"),
            (r#"{"id":1.5,"method":"ES.GetMode"}"#, "id"),
            (r#"{"id":1}"#, "method"),
            (r#"{"id":1,"method":"Bogus"}"#, "method"),
            (r#"{"id":1,"method":"ES.GetMode","params":[]}"#, "params"),
            (r#"{"id":1,"method":"ES.GetMode","params":{"id":999}}"#, "id"),
        ];
        for (raw, field) in cases {
            let err = Command::parse(raw).unwrap_err();
            assert_eq!(err.field, field, "raw message: {raw}");
        }

        let huge = format!(r#"{{"id":1,"method":"ES.GetMode","pad":"{}"}}"#, "x".repeat(70_000));
        assert_eq!(Command::parse(&huge).unwrap_err().field, "message");
    }

    #[test]
    fn test_request_id_counter() {
        let ids = RequestIdCounter::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        ids.reset();
        assert_eq!(ids.next(), 1);
    }
}
