//! Marstek Open API protocol layer
//!
//! Pure protocol logic for Marstek energy-storage devices, without any I/O.
//! The UDP transport, discovery and the relay bridge live in `essrv`.
//!
//! # Modules
//!
//! - `command`: method table, command construction, wire encoding and raw-message parsing
//! - `validation`: parameter rules applied before anything reaches a device
//! - `mode`: typed `ES.SetMode` configurations (Auto, AI, Manual, Passive)
//! - `response`: datagram classification and typed per-command results
//! - `status`: the flat `DeviceStatus` snapshot and the merge engine
//!
//! # Example
//!
//! ```
//! use voltage_marstek::{command, mode::ModeConfig, RequestIdCounter};
//!
//! let ids = RequestIdCounter::new();
//! let cmd = command::set_mode(ids.next(), 0, &ModeConfig::auto()).unwrap();
//! assert_eq!(cmd.id(), 1);
//! assert!(cmd.encode().unwrap().contains("\"auto_cfg\""));
//! ```

pub mod command;
pub mod constants;
pub mod error;
pub mod mode;
pub mod response;
pub mod status;
pub mod validation;

pub use command::{Command, Method, RequestIdCounter};
pub use error::{Result, ValidationError};
pub use mode::{ManualConfig, ModeConfig, OperatingMode, PassiveConfig, Weekdays};
pub use response::{
    BatStatusResult, Datagram, DeviceInfo, EmStatusResult, EsModeResult, EsStatusResult,
    PvChannel, PvStatusResult, WifiStatusResult,
};
pub use status::{merge_status, BatteryState, DeviceStatus, StatusParts};
pub use validation::ValidationOptions;
