//! Parameter validation
//!
//! Devices are fragile: a malformed `ES.SetMode` can leave a battery in an odd
//! schedule state. Everything built or relayed goes through these rules first.

use crate::command::Method;
use crate::constants::{
    MAX_DEVICE_ID, MAX_PASSIVE_DURATION_SECS, MAX_POWER_W, MAX_TIME_SLOTS, MAX_WEEK_SET,
    STRICT_MIN_SCHEDULE_MINUTES, STRICT_POWER_WARN_W,
};
use crate::error::{Result, ValidationError};
use crate::mode::OperatingMode;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::warn;

/// Validation knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Log warnings for legal but risky values (high power, very short schedules)
    pub strict: bool,
}

impl ValidationOptions {
    pub fn strict() -> Self {
        Self { strict: true }
    }

    fn warn(&self, field: &str, message: String) {
        if self.strict {
            warn!("[STRICT] {} (field: {})", message, field);
        }
    }
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::disallowed_methods)] // constant pattern, covered by tests
        Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").unwrap()
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Integer in `[min, max]`; floats and strings are rejected
pub fn validate_int_range(value: &Value, field: &str, min: i64, max: i64) -> Result<i64> {
    let n = value.as_i64().ok_or_else(|| {
        ValidationError::new(
            field,
            format!("{} must be an integer (got {})", field, type_name(value)),
        )
    })?;
    if n < min || n > max {
        return Err(ValidationError::new(
            field,
            format!("{} must be between {} and {} (got {})", field, min, max, n),
        ));
    }
    Ok(n)
}

pub fn validate_device_id(value: &Value) -> Result<u8> {
    validate_int_range(value, "id", 0, MAX_DEVICE_ID).map(|n| n as u8)
}

pub fn validate_power(value: &Value, field: &str, opts: &ValidationOptions) -> Result<i64> {
    let power = validate_int_range(value, field, -MAX_POWER_W, MAX_POWER_W)?;
    if power.abs() > STRICT_POWER_WARN_W {
        opts.warn(
            field,
            format!(
                "{}={}W exceeds {}W - verify this is intended",
                field, power, STRICT_POWER_WARN_W
            ),
        );
    }
    Ok(power)
}

pub fn validate_week_set(value: &Value) -> Result<u8> {
    validate_int_range(value, "week_set", 0, MAX_WEEK_SET).map(|n| n as u8)
}

/// Strict `HH:MM` (two digits each); returns minutes since midnight
pub fn validate_time(value: &Value, field: &str) -> Result<i64> {
    let text = value.as_str().ok_or_else(|| {
        ValidationError::new(field, format!("{} must be a string", field))
    })?;
    let caps = time_pattern().captures(text).ok_or_else(|| {
        ValidationError::new(
            field,
            format!("{} must be in HH:MM format (got '{}')", field, text),
        )
    })?;
    let hours: i64 = caps[1].parse().unwrap_or(0);
    let minutes: i64 = caps[2].parse().unwrap_or(0);
    Ok(hours * 60 + minutes)
}

fn require_fields(cfg: &Map<String, Value>, fields: &[&str], field: &str) -> Result<()> {
    let mut missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|f| !cfg.contains_key(*f))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    Err(ValidationError::new(
        field,
        format!("{} missing required fields: {}", field, missing.join(", ")),
    ))
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        ValidationError::new(
            field,
            format!("{} must be an object (got {})", field, type_name(value)),
        )
    })
}

/// `manual_cfg`: every sub-field required, `enable` in {0,1}, end after start when enabled
pub fn validate_manual_config(cfg: &Map<String, Value>, opts: &ValidationOptions) -> Result<()> {
    require_fields(
        cfg,
        &["time_num", "start_time", "end_time", "week_set", "power", "enable"],
        "manual_cfg",
    )?;

    validate_int_range(&cfg["time_num"], "time_num", 0, MAX_TIME_SLOTS - 1)?;
    let start = validate_time(&cfg["start_time"], "start_time")?;
    let end = validate_time(&cfg["end_time"], "end_time")?;
    validate_week_set(&cfg["week_set"])?;
    validate_power(&cfg["power"], "power", opts)?;
    let enable = validate_int_range(&cfg["enable"], "enable", 0, 1)?;

    if enable == 1 {
        if end <= start {
            return Err(ValidationError::new(
                "end_time",
                format!(
                    "end_time ({}) must be after start_time ({})",
                    cfg["end_time"].as_str().unwrap_or_default(),
                    cfg["start_time"].as_str().unwrap_or_default()
                ),
            ));
        }
        if end - start < STRICT_MIN_SCHEDULE_MINUTES {
            opts.warn(
                "duration",
                format!(
                    "Schedule duration is only {} minutes - very short schedules may not be effective",
                    end - start
                ),
            );
        }
    }
    Ok(())
}

/// `passive_cfg`: `power` and `cd_time` required, `cd_time` within a day
pub fn validate_passive_config(cfg: &Map<String, Value>, opts: &ValidationOptions) -> Result<()> {
    require_fields(cfg, &["power", "cd_time"], "passive_cfg")?;
    validate_power(&cfg["power"], "power", opts)?;
    validate_int_range(&cfg["cd_time"], "cd_time", 0, MAX_PASSIVE_DURATION_SECS)?;
    Ok(())
}

/// The `config` object of `ES.SetMode`
pub fn validate_set_mode_config(config: &Value, opts: &ValidationOptions) -> Result<OperatingMode> {
    let cfg = as_object(config, "config")?;

    let mode_text = cfg.get("mode").and_then(Value::as_str).unwrap_or_default();
    // exact spelling on the wire; case-insensitive parsing is only for user input
    let mode = OperatingMode::ALL
        .into_iter()
        .find(|m| m.as_str() == mode_text)
        .ok_or_else(|| {
            ValidationError::new(
                "mode",
                format!(
                    "mode must be one of AI, Auto, Manual, Passive (got '{}')",
                    mode_text
                ),
            )
        })?;

    match mode {
        OperatingMode::Manual => {
            let manual = cfg.get("manual_cfg").ok_or_else(|| {
                ValidationError::new("manual_cfg", "manual_cfg is required when mode is 'Manual'")
            })?;
            validate_manual_config(as_object(manual, "manual_cfg")?, opts)?;
        },
        OperatingMode::Passive => {
            let passive = cfg.get("passive_cfg").ok_or_else(|| {
                ValidationError::new(
                    "passive_cfg",
                    "passive_cfg is required when mode is 'Passive'",
                )
            })?;
            validate_passive_config(as_object(passive, "passive_cfg")?, opts)?;
        },
        OperatingMode::Auto | OperatingMode::Ai => {},
    }
    Ok(mode)
}

/// Parameters of `method`: required present, nothing unknown, values in range
pub fn validate_params(
    method: Method,
    params: &Map<String, Value>,
    opts: &ValidationOptions,
) -> Result<()> {
    let required = method.required_params();
    let optional = method.optional_params();

    let mut missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|p| !params.contains_key(*p))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(ValidationError::new(
            "params",
            format!(
                "Missing required parameters for {}: {}",
                method,
                missing.join(", ")
            ),
        ));
    }

    let mut unknown: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|k| !required.contains(k) && !optional.contains(k))
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        let mut allowed: Vec<&str> = required.iter().chain(optional).copied().collect();
        allowed.sort_unstable();
        return Err(ValidationError::new(
            "params",
            format!(
                "Unknown parameters for {}: {}. Allowed: {}",
                method,
                unknown.join(", "),
                allowed.join(", ")
            ),
        ));
    }

    if let Some(id) = params.get("id") {
        validate_device_id(id)?;
    }

    if method == Method::SetMode {
        if let Some(config) = params.get("config") {
            validate_set_mode_config(config, opts)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn manual(overrides: Value) -> Map<String, Value> {
        let mut base = obj(json!({
            "time_num": 0, "start_time": "08:00", "end_time": "16:00",
            "week_set": 127, "power": -1500, "enable": 1
        }));
        for (k, v) in obj(overrides) {
            base.insert(k, v);
        }
        base
    }

    #[test]
    fn test_time_format() {
        assert_eq!(validate_time(&json!("00:00"), "t").unwrap(), 0);
        assert_eq!(validate_time(&json!("23:59"), "t").unwrap(), 1439);
        for bad in ["24:00", "7:30", "12:60", "12-30", "", "12:3"] {
            let err = validate_time(&json!(bad), "start_time").unwrap_err();
            assert_eq!(err.field, "start_time", "{bad} should be rejected");
        }
        assert!(validate_time(&json!(730), "t").is_err());
    }

    #[test]
    fn test_power_bounds_and_integer_only() {
        let opts = ValidationOptions::default();
        assert_eq!(validate_power(&json!(-10000), "power", &opts).unwrap(), -10000);
        assert!(validate_power(&json!(10001), "power", &opts).is_err());
        assert!(validate_power(&json!(100.5), "power", &opts).is_err());
        assert!(validate_power(&json!("100"), "power", &opts).is_err());
    }

    #[test]
    fn test_device_id_and_week_set() {
        assert_eq!(validate_device_id(&json!(255)).unwrap(), 255);
        assert_eq!(validate_device_id(&json!(256)).unwrap_err().field, "id");
        assert_eq!(validate_device_id(&json!(-1)).unwrap_err().field, "id");
        assert!(validate_week_set(&json!(127)).is_ok());
        assert_eq!(validate_week_set(&json!(128)).unwrap_err().field, "week_set");
    }

    #[test]
    fn test_manual_config_rules() {
        let opts = ValidationOptions::default();
        assert!(validate_manual_config(&manual(json!({})), &opts).is_ok());

        let mut missing = manual(json!({}));
        missing.remove("enable");
        assert_eq!(
            validate_manual_config(&missing, &opts).unwrap_err().field,
            "manual_cfg"
        );

        let err = validate_manual_config(&manual(json!({"time_num": 10})), &opts).unwrap_err();
        assert_eq!(err.field, "time_num");

        let err = validate_manual_config(&manual(json!({"enable": 2})), &opts).unwrap_err();
        assert_eq!(err.field, "enable");

        let err = validate_manual_config(
            &manual(json!({"start_time": "16:00", "end_time": "08:00"})),
            &opts,
        )
        .unwrap_err();
        assert_eq!(err.field, "end_time");

        // disabled slots may carry any ordering
        let disabled = manual(json!({"start_time": "16:00", "end_time": "08:00", "enable": 0}));
        assert!(validate_manual_config(&disabled, &opts).is_ok());
    }

    #[test]
    fn test_passive_config_rules() {
        let opts = ValidationOptions::default();
        assert!(validate_passive_config(&obj(json!({"power": 500, "cd_time": 3600})), &opts).is_ok());
        let err = validate_passive_config(&obj(json!({"power": 500})), &opts).unwrap_err();
        assert_eq!(err.field, "passive_cfg");
        let err =
            validate_passive_config(&obj(json!({"power": 500, "cd_time": 86401})), &opts).unwrap_err();
        assert_eq!(err.field, "cd_time");
    }

    #[test]
    fn test_set_mode_config() {
        let opts = ValidationOptions::default();
        assert_eq!(
            validate_set_mode_config(&json!({"mode": "Auto", "auto_cfg": {"enable": 1}}), &opts)
                .unwrap(),
            OperatingMode::Auto
        );
        assert_eq!(
            validate_set_mode_config(&json!({"mode": "auto"}), &opts).unwrap_err().field,
            "mode"
        );
        assert_eq!(
            validate_set_mode_config(&json!({"mode": "Manual"}), &opts).unwrap_err().field,
            "manual_cfg"
        );
        assert_eq!(
            validate_set_mode_config(&json!({"mode": "Passive", "passive_cfg": 3}), &opts)
                .unwrap_err()
                .field,
            "passive_cfg"
        );
        assert_eq!(
            validate_set_mode_config(&json!("Auto"), &opts).unwrap_err().field,
            "config"
        );
    }

    #[test]
    fn test_params_required_and_unknown() {
        let opts = ValidationOptions::default();
        assert!(validate_params(Method::EsStatus, &obj(json!({"id": 0})), &opts).is_ok());
        assert!(validate_params(Method::EsStatus, &Map::new(), &opts).is_ok());

        let err = validate_params(Method::SetMode, &obj(json!({"id": 0})), &opts).unwrap_err();
        assert_eq!(err.field, "params");
        assert!(err.message.contains("config"));

        let err =
            validate_params(Method::EsStatus, &obj(json!({"id": 0, "foo": 1})), &opts).unwrap_err();
        assert_eq!(err.field, "params");
        assert!(err.message.contains("foo"));
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_strict_mode_warns_without_rejecting() {
        let strict = ValidationOptions::strict();
        assert!(validate_power(&json!(4800), "power", &strict).is_ok());
        let short = manual(json!({"start_time": "08:00", "end_time": "08:03"}));
        assert!(validate_manual_config(&short, &strict).is_ok());
        assert!(logs_contain("[STRICT]"));
        assert!(logs_contain("3 minutes"));
    }
}
