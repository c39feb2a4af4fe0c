//! Protocol constants

use std::time::Duration;

/// Default UDP port of the Open API on the device
pub const DEFAULT_UDP_PORT: u16 = 30000;

/// Default wait for discovery replies
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery requests always carry this id; devices echo it back
pub const DISCOVERY_REQUEST_ID: u64 = 0;

/// Largest encoded command or raw message accepted
pub const MAX_MESSAGE_BYTES: usize = 65535;

// Parameter limits
pub const MAX_POWER_W: i64 = 10_000;
pub const MAX_DEVICE_ID: i64 = 255;
/// Schedule slots are `0..MAX_TIME_SLOTS`
pub const MAX_TIME_SLOTS: i64 = 10;
pub const MAX_WEEK_SET: i64 = 127;
pub const MAX_PASSIVE_DURATION_SECS: i64 = 86_400;

// Strict-mode warning thresholds
pub const STRICT_POWER_WARN_W: i64 = 4_500;
pub const STRICT_MIN_SCHEDULE_MINUTES: i64 = 5;

/// Battery power magnitude below which the battery counts as idle
pub const IDLE_POWER_THRESHOLD_W: f64 = 1.0;

/// Literal some firmwares send for fields they cannot read
pub const UNKNOWN_VALUE: &str = "unknown";
