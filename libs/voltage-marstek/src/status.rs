//! Flat device status snapshot and the merge engine
//!
//! A cycle's typed results are overlaid in a fixed priority order, then the
//! previous snapshot fills whatever is still unknown. Known values are never
//! replaced by absent or `"unknown"` ones.

use crate::constants::{IDLE_POWER_THRESHOLD_W, UNKNOWN_VALUE};
use crate::response::{
    BatStatusResult, EmStatusResult, EsModeResult, EsStatusResult, PvStatusResult,
    WifiStatusResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Battery direction derived from the sign of battery power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryState {
    Charging,
    Discharging,
    Idle,
}

impl BatteryState {
    /// Positive discharges, negative charges, below 1 W is idle
    pub fn from_power(power: f64) -> Self {
        if power.abs() < IDLE_POWER_THRESHOLD_W {
            Self::Idle
        } else if power > 0.0 {
            Self::Discharging
        } else {
            Self::Charging
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charging => "charging",
            Self::Discharging => "discharging",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for BatteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values that may be present but carry no information
pub trait StatusValue {
    fn is_known(&self) -> bool {
        true
    }
}

impl StatusValue for String {
    fn is_known(&self) -> bool {
        !self.trim().eq_ignore_ascii_case(UNKNOWN_VALUE)
    }
}

impl StatusValue for f64 {
    fn is_known(&self) -> bool {
        self.is_finite()
    }
}

impl StatusValue for i64 {}
impl StatusValue for bool {}
impl StatusValue for BatteryState {}
impl StatusValue for DateTime<Utc> {}

macro_rules! device_status {
    ($( $(#[$meta:meta])* $field:ident : $ty:ty ),* $(,)?) => {
        /// Canonical merged status of one device
        ///
        /// Every field is optional; `None` means unknown for this cycle and
        /// is omitted from JSON.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct DeviceStatus {
            $(
                $(#[$meta])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
            /// At least one command succeeded in the cycle that produced this snapshot
            #[serde(default)]
            pub has_fresh_data: bool,
        }

        impl DeviceStatus {
            pub const FIELD_NAMES: &'static [&'static str] = &[$(stringify!($field)),*];

            /// Copy every known field of `other` over `self`
            pub fn overlay(&mut self, other: &DeviceStatus) {
                $(
                    if let Some(v) = other.$field.as_ref().filter(|v| v.is_known()) {
                        self.$field = Some(v.clone());
                    }
                )*
            }

            /// Fill fields that are absent or unknown from `previous`
            pub fn fill_missing_from(&mut self, previous: &DeviceStatus) {
                $(
                    if !self.$field.as_ref().is_some_and(|v| v.is_known()) {
                        self.$field = previous.$field.clone().filter(|v| v.is_known());
                    }
                )*
            }

            /// Number of fields with a known value
            pub fn known_field_count(&self) -> usize {
                let mut count = 0;
                $(
                    if self.$field.as_ref().is_some_and(|v| v.is_known()) {
                        count += 1;
                    }
                )*
                count
            }
        }
    };
}

device_status! {
    battery_soc: i64,
    /// Signed: positive discharges, negative charges (W)
    battery_power: f64,
    battery_status: BatteryState,
    battery_capacity: f64,
    device_mode: String,
    ongrid_power: f64,
    offgrid_power: f64,
    pv_power: f64,

    pv1_power: f64,
    pv1_voltage: f64,
    pv1_current: f64,
    pv1_state: i64,
    pv2_power: f64,
    pv2_voltage: f64,
    pv2_current: f64,
    pv2_state: i64,
    pv3_power: f64,
    pv3_voltage: f64,
    pv3_current: f64,
    pv3_state: i64,
    pv4_power: f64,
    pv4_voltage: f64,
    pv4_current: f64,
    pv4_state: i64,

    wifi_rssi: i64,
    wifi_ssid: String,
    wifi_sta_ip: String,
    wifi_sta_gate: String,
    wifi_sta_mask: String,
    wifi_sta_dns: String,

    ct_state: i64,
    ct_connected: bool,
    em_a_power: f64,
    em_b_power: f64,
    em_c_power: f64,
    em_total_power: f64,

    bat_temp: f64,
    bat_charg_flag: i64,
    bat_dischrg_flag: i64,
    bat_remaining_capacity: f64,
    bat_rated_capacity: f64,
    bat_soc_detailed: i64,

    total_pv_energy: f64,
    total_grid_output_energy: f64,
    total_grid_input_energy: f64,
    total_load_energy: f64,

    device_ip: String,
    last_update: DateTime<Utc>,
}

impl DeviceStatus {
    /// Serialize to a JSON object, omitting unknown fields
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<&EsModeResult> for DeviceStatus {
    fn from(r: &EsModeResult) -> Self {
        Self {
            battery_soc: r.battery_soc,
            device_mode: r.device_mode.clone(),
            ongrid_power: r.ongrid_power,
            ..Self::default()
        }
    }
}

impl From<&EsStatusResult> for DeviceStatus {
    fn from(r: &EsStatusResult) -> Self {
        Self {
            battery_soc: r.battery_soc,
            battery_power: r.battery_power,
            battery_status: r.battery_status,
            battery_capacity: r.battery_capacity,
            ongrid_power: r.ongrid_power,
            offgrid_power: r.offgrid_power,
            pv_power: r.pv_power,
            total_pv_energy: r.total_pv_energy,
            total_grid_output_energy: r.total_grid_output_energy,
            total_grid_input_energy: r.total_grid_input_energy,
            total_load_energy: r.total_load_energy,
            ..Self::default()
        }
    }
}

impl From<&PvStatusResult> for DeviceStatus {
    fn from(r: &PvStatusResult) -> Self {
        let [c1, c2, c3, c4] = r.channels;
        Self {
            pv1_power: c1.power,
            pv1_voltage: c1.voltage,
            pv1_current: c1.current,
            pv1_state: c1.state,
            pv2_power: c2.power,
            pv2_voltage: c2.voltage,
            pv2_current: c2.current,
            pv2_state: c2.state,
            pv3_power: c3.power,
            pv3_voltage: c3.voltage,
            pv3_current: c3.current,
            pv3_state: c3.state,
            pv4_power: c4.power,
            pv4_voltage: c4.voltage,
            pv4_current: c4.current,
            pv4_state: c4.state,
            ..Self::default()
        }
    }
}

impl From<&WifiStatusResult> for DeviceStatus {
    fn from(r: &WifiStatusResult) -> Self {
        Self {
            wifi_rssi: r.rssi,
            wifi_ssid: r.ssid.clone(),
            wifi_sta_ip: r.sta_ip.clone(),
            wifi_sta_gate: r.sta_gate.clone(),
            wifi_sta_mask: r.sta_mask.clone(),
            wifi_sta_dns: r.sta_dns.clone(),
            ..Self::default()
        }
    }
}

impl From<&EmStatusResult> for DeviceStatus {
    fn from(r: &EmStatusResult) -> Self {
        Self {
            ct_state: r.ct_state,
            ct_connected: r.ct_connected(),
            em_a_power: r.a_power,
            em_b_power: r.b_power,
            em_c_power: r.c_power,
            em_total_power: r.total_power,
            ..Self::default()
        }
    }
}

impl From<&BatStatusResult> for DeviceStatus {
    fn from(r: &BatStatusResult) -> Self {
        Self {
            bat_temp: r.temperature,
            bat_charg_flag: r.charge_flag,
            bat_dischrg_flag: r.discharge_flag,
            bat_remaining_capacity: r.remaining_capacity,
            bat_rated_capacity: r.rated_capacity,
            bat_soc_detailed: r.soc,
            ..Self::default()
        }
    }
}

/// Results of one aggregation cycle; `None` means the command failed or was skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusParts {
    pub mode: Option<EsModeResult>,
    pub core: Option<EsStatusResult>,
    pub em: Option<EmStatusResult>,
    pub pv: Option<PvStatusResult>,
    pub wifi: Option<WifiStatusResult>,
    pub bat: Option<BatStatusResult>,
}

impl StatusParts {
    pub fn succeeded(&self) -> usize {
        [
            self.mode.is_some(),
            self.core.is_some(),
            self.em.is_some(),
            self.pv.is_some(),
            self.wifi.is_some(),
            self.bat.is_some(),
        ]
        .into_iter()
        .filter(|ok| *ok)
        .count()
    }

    pub fn has_any(&self) -> bool {
        self.succeeded() > 0
    }
}

/// Merge a cycle's results over the previous snapshot
///
/// Priority, lowest to highest: PV, energy meter, Wi-Fi, battery detail,
/// mode, core status. The previous snapshot only fills what is still unknown.
pub fn merge_status(previous: Option<&DeviceStatus>, parts: &StatusParts) -> DeviceStatus {
    let mut merged = DeviceStatus::default();

    if let Some(pv) = &parts.pv {
        merged.overlay(&pv.into());
    }
    if let Some(em) = &parts.em {
        merged.overlay(&em.into());
    }
    if let Some(wifi) = &parts.wifi {
        merged.overlay(&wifi.into());
    }
    if let Some(bat) = &parts.bat {
        merged.overlay(&bat.into());
    }
    if let Some(mode) = &parts.mode {
        merged.overlay(&mode.into());
    }
    if let Some(core) = &parts.core {
        merged.overlay(&core.into());
    }

    if let Some(pv) = &parts.pv {
        reconcile_pv(&mut merged, pv);
    }

    merged.has_fresh_data = parts.has_any();
    if let Some(prev) = previous {
        merged.fill_missing_from(prev);
    }
    merged
}

// Some firmwares report pv_power = 0 from ES.GetStatus while the channels are producing.
fn reconcile_pv(merged: &mut DeviceStatus, pv: &PvStatusResult) {
    let Some(sum) = pv.channel_power_sum().filter(|s| *s > 0.0) else {
        return;
    };
    if merged.pv_power.is_some_and(|p| p != 0.0) {
        return;
    }

    merged.pv_power = Some(sum);
    if let Some(ongrid) = merged.ongrid_power {
        let battery_power = ongrid - sum;
        merged.battery_power = Some(battery_power);
        merged.battery_status = Some(BatteryState::from_power(battery_power));
    }
}
