//! UDP transport for the Marstek Open API
//!
//! - `udp`: shared socket, listener task and id-correlated request/response
//! - `rate_limit`: per-IP minimum send interval
//! - `cache`: replies nobody was waiting for (broadcasts, late arrivals)
//! - `stats`: per-method success/timeout counters

pub mod cache;
pub mod rate_limit;
pub mod stats;
pub mod udp;

pub use cache::{CachedResponse, ResponseCache};
pub use rate_limit::{is_broadcast_address, RateLimiter};
pub use stats::{CommandStats, RequestOutcome, StatsByMethod, StatsRegistry};
pub use udp::{TransportOptions, UdpTransport};
