//! Datagram classification and typed per-command results
//!
//! Parsers are lenient: a missing or malformed field becomes `None` rather than
//! failing the whole reply. Text fields reading `"unknown"` are dropped.

use crate::constants::UNKNOWN_VALUE;
use crate::status::BatteryState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// What an inbound datagram turned out to be
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Datagram<'a> {
    /// A device reply carrying a `result` object
    Reply(&'a Map<String, Value>),
    /// A device reply carrying an `error` member instead of a result
    DeviceError(&'a Value),
    /// A request reflected back by a device (`method` + `params`, no `result`)
    Echo,
    Invalid,
}

impl<'a> Datagram<'a> {
    pub fn classify(value: &'a Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Invalid;
        };
        match obj.get("result") {
            Some(Value::Object(result)) => return Self::Reply(result),
            Some(_) => return Self::Invalid,
            None => {},
        }
        if obj.contains_key("method") && obj.contains_key("params") {
            return Self::Echo;
        }
        match obj.get("error") {
            Some(err) => Self::DeviceError(err),
            None => Self::Invalid,
        }
    }

    pub fn is_echo(&self) -> bool {
        matches!(self, Self::Echo)
    }

    pub fn result(&self) -> Option<&'a Map<String, Value>> {
        match self {
            Self::Reply(result) => Some(result),
            _ => None,
        }
    }
}

/// Correlation id of a datagram, if it carries a non-negative integer one
pub fn datagram_id(value: &Value) -> Option<u64> {
    value.get("id").and_then(Value::as_u64)
}

fn is_unknown(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(UNKNOWN_VALUE)
}

pub(crate) fn num(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) if !is_unknown(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn int(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) if !is_unknown(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub(crate) fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if s.trim().is_empty() || is_unknown(s) => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `ES.GetMode`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EsModeResult {
    pub battery_soc: Option<i64>,
    /// Lowercased (`auto`, `ai`, `manual`, `passive`)
    pub device_mode: Option<String>,
    /// Grid power, not battery power
    pub ongrid_power: Option<f64>,
}

impl EsModeResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        Self {
            battery_soc: int(result, "bat_soc"),
            device_mode: text(result, "mode").map(|m| m.to_lowercase()),
            ongrid_power: num(result, "ongrid_power"),
        }
    }
}

/// `ES.GetStatus`, the authoritative source for battery power
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EsStatusResult {
    pub battery_soc: Option<i64>,
    pub battery_capacity: Option<f64>,
    pub pv_power: Option<f64>,
    pub ongrid_power: Option<f64>,
    pub offgrid_power: Option<f64>,
    /// Signed: positive discharges, negative charges
    pub battery_power: Option<f64>,
    pub battery_status: Option<BatteryState>,
    pub total_pv_energy: Option<f64>,
    pub total_grid_output_energy: Option<f64>,
    pub total_grid_input_energy: Option<f64>,
    pub total_load_energy: Option<f64>,
    /// Some firmwares include the mode here; used for write verification only
    pub mode: Option<String>,
}

impl EsStatusResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        let battery_power = num(result, "bat_power");
        Self {
            battery_soc: int(result, "bat_soc"),
            battery_capacity: num(result, "bat_cap"),
            pv_power: num(result, "pv_power"),
            ongrid_power: num(result, "ongrid_power"),
            offgrid_power: num(result, "offgrid_power"),
            battery_power,
            battery_status: battery_power.map(BatteryState::from_power),
            total_pv_energy: num(result, "total_pv_energy"),
            total_grid_output_energy: num(result, "total_grid_output_energy"),
            total_grid_input_energy: num(result, "total_grid_input_energy"),
            total_load_energy: num(result, "total_load_energy"),
            mode: text(result, "mode"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PvChannel {
    pub power: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub state: Option<i64>,
}

/// `PV.GetStatus`, channels 1-4
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvStatusResult {
    pub channels: [PvChannel; 4],
}

impl PvStatusResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        let mut channels = [PvChannel::default(); 4];
        if result.contains_key("pv_power") {
            // single-channel firmware, reported as channel 1
            let power = num(result, "pv_power");
            channels[0] = PvChannel {
                power,
                voltage: num(result, "pv_voltage"),
                current: num(result, "pv_current"),
                state: power.map(|p| i64::from(p > 0.0)),
            };
        } else {
            for (idx, channel) in channels.iter_mut().enumerate() {
                let n = idx + 1;
                *channel = PvChannel {
                    power: num(result, &format!("pv{n}_power")),
                    voltage: num(result, &format!("pv{n}_voltage")),
                    current: num(result, &format!("pv{n}_current")),
                    state: int(result, &format!("pv{n}_state")),
                };
            }
        }
        Self { channels }
    }

    /// Sum of reported channel powers, `None` when no channel reported power
    pub fn channel_power_sum(&self) -> Option<f64> {
        self.channels
            .iter()
            .filter_map(|c| c.power)
            .fold(None, |acc, p| Some(acc.unwrap_or(0.0) + p))
    }
}

/// `Wifi.GetStatus`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiStatusResult {
    pub rssi: Option<i64>,
    pub ssid: Option<String>,
    pub sta_ip: Option<String>,
    pub sta_gate: Option<String>,
    pub sta_mask: Option<String>,
    pub sta_dns: Option<String>,
}

impl WifiStatusResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        Self {
            rssi: int(result, "rssi"),
            ssid: text(result, "ssid"),
            sta_ip: text(result, "sta_ip"),
            sta_gate: text(result, "sta_gate"),
            sta_mask: text(result, "sta_mask"),
            sta_dns: text(result, "sta_dns"),
        }
    }
}

/// `EM.GetStatus` (energy meter / CT clamp)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmStatusResult {
    pub ct_state: Option<i64>,
    pub a_power: Option<f64>,
    pub b_power: Option<f64>,
    pub c_power: Option<f64>,
    pub total_power: Option<f64>,
}

impl EmStatusResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        Self {
            ct_state: int(result, "ct_state"),
            a_power: num(result, "a_power"),
            b_power: num(result, "b_power"),
            c_power: num(result, "c_power"),
            total_power: num(result, "total_power"),
        }
    }

    pub fn ct_connected(&self) -> Option<bool> {
        self.ct_state.map(|s| s == 1)
    }
}

/// `Bat.GetStatus`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatStatusResult {
    pub temperature: Option<f64>,
    pub charge_flag: Option<i64>,
    pub discharge_flag: Option<i64>,
    /// Remaining capacity (Wh)
    pub remaining_capacity: Option<f64>,
    pub rated_capacity: Option<f64>,
    pub soc: Option<i64>,
}

impl BatStatusResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        Self {
            temperature: num(result, "bat_temp"),
            charge_flag: int(result, "charg_flag"),
            discharge_flag: int(result, "dischrg_flag"),
            remaining_capacity: num(result, "bat_capacity"),
            rated_capacity: num(result, "rated_capacity"),
            soc: int(result, "soc"),
        }
    }
}

/// A device announced in reply to `Marstek.GetDevice`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub id: u64,
    pub device_type: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub wifi_name: String,
    pub ip: String,
    #[serde(default)]
    pub wifi_mac: String,
    #[serde(default)]
    pub ble_mac: String,
    /// Wi-Fi MAC, or BLE MAC when the former is absent
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub firmware: String,
}

impl DeviceInfo {
    /// Normalize a discovery `result`; `None` when it names no device at all
    ///
    /// A missing `ip` falls back to the datagram's source address.
    pub fn from_result(result: &Map<String, Value>, source: Option<IpAddr>) -> Option<Self> {
        let device = text(result, "device");
        let wifi_mac = text(result, "wifi_mac");
        let ble_mac = text(result, "ble_mac");
        let ip = text(result, "ip");

        if device.is_none() && ip.is_none() && wifi_mac.is_none() && ble_mac.is_none() {
            return None;
        }

        let ip = ip.or_else(|| source.map(|addr| addr.to_string()))?;
        let device_type = device.unwrap_or_else(|| "Unknown".to_string());
        let version = result.get("ver").and_then(Value::as_u64);
        let firmware = text(result, "ver").unwrap_or_else(|| "0".to_string());
        let wifi_mac = wifi_mac.unwrap_or_default();
        let ble_mac = ble_mac.unwrap_or_default();
        let mac = if wifi_mac.is_empty() {
            ble_mac.clone()
        } else {
            wifi_mac.clone()
        };

        Some(Self {
            id: result.get("id").and_then(Value::as_u64).unwrap_or(0),
            model: device_type.clone(),
            device_type,
            version,
            wifi_name: text(result, "wifi_name").unwrap_or_default(),
            ip,
            wifi_mac,
            ble_mac,
            mac,
            firmware,
        })
    }
}
