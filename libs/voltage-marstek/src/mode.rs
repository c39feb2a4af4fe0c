//! Typed `ES.SetMode` configurations

use crate::error::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Operating mode as spelled by the device API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingMode {
    Auto,
    #[serde(rename = "AI")]
    Ai,
    Manual,
    Passive,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 4] = [Self::Auto, Self::Ai, Self::Manual, Self::Passive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::Ai => "AI",
            Self::Manual => "Manual",
            Self::Passive => "Passive",
        }
    }

    /// Case-insensitive match against a mode reported by the device
    pub fn matches(&self, reported: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(reported.trim())
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.matches(s))
            .ok_or_else(|| {
                ValidationError::new(
                    "mode",
                    format!("mode must be one of Auto, AI, Manual, Passive (got '{}')", s),
                )
            })
    }
}

/// Day-of-week bitmask used by manual schedules (mon=1 ... sun=64)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weekdays(u8);

impl Weekdays {
    pub const ALL: Weekdays = Weekdays(127);
    const NAMES: [&'static str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits > 127 {
            return Err(ValidationError::new(
                "week_set",
                format!("week_set must be between 0 and 127 (got {})", bits),
            ));
        }
        Ok(Self(bits))
    }

    /// Build a mask from day names such as `["mon", "wed", "sun"]`
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut bits = 0u8;
        for name in names {
            let key = name.as_ref().trim().to_ascii_lowercase();
            let short = key.get(..3).unwrap_or(key.as_str());
            let idx = Self::NAMES
                .iter()
                .position(|d| *d == short)
                .ok_or_else(|| {
                    ValidationError::new("week_set", format!("unknown weekday '{}'", name.as_ref()))
                })?;
            bits |= 1 << idx;
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        Self::from_names(&[name]).is_ok_and(|d| self.0 & d.0 != 0)
    }
}

/// One manual schedule slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualConfig {
    pub time_num: u8,
    pub start_time: String,
    pub end_time: String,
    pub week_set: Weekdays,
    /// Negative charges, positive discharges (W)
    pub power: i32,
    pub enable: bool,
}

impl Default for ManualConfig {
    /// Slot 0, all day, every day, 0 W, disabled
    fn default() -> Self {
        Self {
            time_num: 0,
            start_time: "00:00".to_string(),
            end_time: "23:59".to_string(),
            week_set: Weekdays::ALL,
            power: 0,
            enable: false,
        }
    }
}

impl ManualConfig {
    /// All-day charge at `power` watts (sign is normalized to negative)
    pub fn charge(power: i32) -> Self {
        Self {
            power: -power.saturating_abs(),
            enable: true,
            ..Self::default()
        }
    }

    /// All-day discharge at `power` watts (sign is normalized to positive)
    pub fn discharge(power: i32) -> Self {
        Self {
            power: power.saturating_abs(),
            enable: true,
            ..Self::default()
        }
    }

    /// Disabled slot with zero power
    pub fn stop() -> Self {
        Self::default()
    }

    #[allow(clippy::disallowed_methods)] // json! macro internally uses unwrap
    fn to_value(&self) -> Value {
        json!({
            "time_num": self.time_num,
            "start_time": self.start_time,
            "end_time": self.end_time,
            "week_set": self.week_set.bits(),
            "power": self.power,
            "enable": u8::from(self.enable),
        })
    }
}

/// Passive mode: hold `power` for `cd_time` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveConfig {
    pub power: i32,
    pub cd_time: u32,
}

impl Default for PassiveConfig {
    fn default() -> Self {
        Self {
            power: 0,
            cd_time: 3600,
        }
    }
}

/// Full `config` object of an `ES.SetMode` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeConfig {
    Auto,
    Ai,
    Manual(ManualConfig),
    Passive(PassiveConfig),
}

impl ModeConfig {
    pub fn auto() -> Self {
        Self::Auto
    }

    pub fn ai() -> Self {
        Self::Ai
    }

    pub fn manual(cfg: ManualConfig) -> Self {
        Self::Manual(cfg)
    }

    pub fn passive(power: i32, cd_time: u32) -> Self {
        Self::Passive(PassiveConfig { power, cd_time })
    }

    /// Default payload for switching into `mode`
    pub fn for_mode(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Auto => Self::Auto,
            OperatingMode::Ai => Self::Ai,
            OperatingMode::Manual => Self::Manual(ManualConfig::default()),
            OperatingMode::Passive => Self::Passive(PassiveConfig::default()),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        match self {
            Self::Auto => OperatingMode::Auto,
            Self::Ai => OperatingMode::Ai,
            Self::Manual(_) => OperatingMode::Manual,
            Self::Passive(_) => OperatingMode::Passive,
        }
    }

    /// Wire representation, e.g. `{"mode":"Auto","auto_cfg":{"enable":1}}`
    #[allow(clippy::disallowed_methods)] // json! macro internally uses unwrap
    pub fn to_value(&self) -> Value {
        match self {
            Self::Auto => json!({"mode": "Auto", "auto_cfg": {"enable": 1}}),
            Self::Ai => json!({"mode": "AI", "ai_cfg": {"enable": 1}}),
            Self::Manual(cfg) => json!({"mode": "Manual", "manual_cfg": cfg.to_value()}),
            Self::Passive(cfg) => json!({
                "mode": "Passive",
                "passive_cfg": {"power": cfg.power, "cd_time": cfg.cd_time},
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_is_case_insensitive() {
        assert_eq!("auto".parse::<OperatingMode>().unwrap(), OperatingMode::Auto);
        assert_eq!("ai".parse::<OperatingMode>().unwrap(), OperatingMode::Ai);
        assert_eq!(" MANUAL ".parse::<OperatingMode>().unwrap(), OperatingMode::Manual);
        let err = "Eco".parse::<OperatingMode>().unwrap_err();
        assert_eq!(err.field, "mode");
    }

    #[test]
    fn test_weekdays_from_names() {
        assert_eq!(Weekdays::from_names(&["mon"]).unwrap().bits(), 1);
        assert_eq!(Weekdays::from_names(&["Monday", "wed", "sun"]).unwrap().bits(), 1 | 4 | 64);
        let all = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
        assert_eq!(Weekdays::from_names(&all).unwrap(), Weekdays::ALL);
        assert!(Weekdays::from_names(&["xyz"]).is_err());
        assert!(Weekdays::ALL.contains("sat"));
        assert!(!Weekdays::from_bits(1).unwrap().contains("tue"));
        assert!(Weekdays::from_bits(128).is_err());
    }

    #[test]
    fn test_manual_helpers_normalize_sign() {
        assert_eq!(ManualConfig::charge(1300).power, -1300);
        assert_eq!(ManualConfig::charge(-1300).power, -1300);
        assert_eq!(ManualConfig::discharge(-800).power, 800);
        let stop = ManualConfig::stop();
        assert_eq!(stop.power, 0);
        assert!(!stop.enable);
    }

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            ModeConfig::auto().to_value(),
            json!({"mode": "Auto", "auto_cfg": {"enable": 1}})
        );
        assert_eq!(ModeConfig::ai().to_value()["mode"], "AI");

        let manual = ModeConfig::manual(ManualConfig::charge(1000)).to_value();
        assert_eq!(manual["manual_cfg"]["power"], -1000);
        assert_eq!(manual["manual_cfg"]["enable"], 1);
        assert_eq!(manual["manual_cfg"]["week_set"], 127);
        assert_eq!(manual["manual_cfg"]["end_time"], "23:59");

        let passive = ModeConfig::for_mode(OperatingMode::Passive).to_value();
        assert_eq!(passive["passive_cfg"], json!({"power": 0, "cd_time": 3600}));
    }
}
