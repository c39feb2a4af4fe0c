//! Polling control and the tiered poll planner
//!
//! Write commands pause background polling for their host so verification
//! reads are not interleaved with regular status cycles.

use crate::aggregator::StatusRequest;
use crate::config::PollingConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use voltage_marstek::DeviceStatus;

/// Per-host pause flags
#[derive(Debug, Default)]
pub struct PollingControl {
    paused: Mutex<HashMap<String, bool>>,
}

impl PollingControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self, host: &str) {
        self.paused.lock().insert(host.to_string(), true);
        debug!("Polling paused for {}", host);
    }

    pub fn resume(&self, host: &str) {
        self.paused.lock().insert(host.to_string(), false);
        debug!("Polling resumed for {}", host);
    }

    pub fn is_paused(&self, host: &str) -> bool {
        self.paused.lock().get(host).copied().unwrap_or(false)
    }

    /// Pause `host` until the returned guard is dropped
    pub fn pause_guard<'a>(&'a self, host: &str) -> PauseGuard<'a> {
        self.pause(host);
        PauseGuard {
            control: self,
            host: host.to_string(),
        }
    }
}

#[must_use = "polling resumes as soon as the guard is dropped"]
pub struct PauseGuard<'a> {
    control: &'a PollingControl,
    host: String,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.control.resume(&self.host);
    }
}

/// Which optional reads are due this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub medium: bool,
    pub slow: bool,
}

/// Device health as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Consecutive cycles without fresh data reached the threshold
    Unavailable,
}

/// Fast tier every cycle (mode, core, EM); PV on the medium cadence;
/// Wi-Fi and battery detail on the slow cadence
#[derive(Debug)]
pub struct TierPlanner {
    medium_every: Duration,
    slow_every: Duration,
    failure_threshold: u32,
    last_medium: Option<Instant>,
    last_slow: Option<Instant>,
    consecutive_failures: u32,
    last_status: Option<DeviceStatus>,
}

impl TierPlanner {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            medium_every: Duration::from_secs(config.medium_secs),
            slow_every: Duration::from_secs(config.slow_secs),
            failure_threshold: config.failure_threshold.max(1),
            last_medium: None,
            last_slow: None,
            consecutive_failures: 0,
            last_status: None,
        }
    }

    /// Decide the tiers for a cycle starting now and mark them as run
    pub fn plan(&mut self) -> CyclePlan {
        let now = Instant::now();
        let due = |last: Option<Instant>, every: Duration| match last {
            Some(t) => now.duration_since(t) >= every,
            None => true,
        };
        let plan = CyclePlan {
            medium: due(self.last_medium, self.medium_every),
            slow: due(self.last_slow, self.slow_every),
        };
        if plan.medium {
            self.last_medium = Some(now);
        }
        if plan.slow {
            self.last_slow = Some(now);
        }
        plan
    }

    /// Narrow a base request to the tiers due this cycle
    pub fn request_for(&self, base: &StatusRequest, plan: CyclePlan) -> StatusRequest {
        StatusRequest {
            include_pv: base.include_pv && plan.medium,
            include_wifi: base.include_wifi && plan.slow,
            include_bat: base.include_bat && plan.slow,
            ..base.clone()
        }
    }

    /// Record a cycle's merged status; returns the resulting availability
    pub fn record(&mut self, status: DeviceStatus) -> Availability {
        if status.has_fresh_data {
            if self.consecutive_failures >= self.failure_threshold {
                debug!("Device reachable again");
            }
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures == self.failure_threshold {
                warn!(
                    "No fresh data for {} consecutive cycles, marking unavailable",
                    self.consecutive_failures
                );
            }
        }
        self.last_status = Some(status);
        self.availability()
    }

    pub fn availability(&self) -> Availability {
        if self.consecutive_failures >= self.failure_threshold {
            Availability::Unavailable
        } else {
            Availability::Available
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Previous snapshot to merge the next cycle into
    pub fn last_status(&self) -> Option<&DeviceStatus> {
        self.last_status.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn planner() -> TierPlanner {
        TierPlanner::new(&PollingConfig {
            fast_secs: 15,
            medium_secs: 60,
            slow_secs: 300,
            failure_threshold: 3,
        })
    }

    #[test]
    fn test_pause_guard_resumes_on_drop() {
        let control = PollingControl::new();
        assert!(!control.is_paused("10.0.0.2"));
        {
            let _guard = control.pause_guard("10.0.0.2");
            assert!(control.is_paused("10.0.0.2"));
            assert!(!control.is_paused("10.0.0.3"));
        }
        assert!(!control.is_paused("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiers_follow_cadence() {
        let mut planner = planner();
        assert_eq!(planner.plan(), CyclePlan { medium: true, slow: true });

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(planner.plan(), CyclePlan { medium: false, slow: false });

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(planner.plan(), CyclePlan { medium: true, slow: false });

        tokio::time::advance(Duration::from_secs(240)).await;
        assert_eq!(planner.plan(), CyclePlan { medium: true, slow: true });
    }

    #[test]
    fn test_request_narrowing() {
        let planner = planner();
        let base = StatusRequest {
            include_pv: true,
            include_wifi: true,
            include_bat: false,
            ..StatusRequest::default()
        };
        let req = planner.request_for(&base, CyclePlan { medium: true, slow: false });
        assert!(req.include_pv);
        assert!(!req.include_wifi);
        assert!(!req.include_bat);
        assert_eq!(req.include_em, base.include_em);
    }

    #[test]
    fn test_unavailable_after_threshold() {
        let mut planner = planner();
        let stale = DeviceStatus::default();
        let fresh = DeviceStatus {
            has_fresh_data: true,
            ..DeviceStatus::default()
        };

        assert_eq!(planner.record(stale.clone()), Availability::Available);
        assert_eq!(planner.record(stale.clone()), Availability::Available);
        assert_eq!(planner.record(stale), Availability::Unavailable);
        assert_eq!(planner.consecutive_failures(), 3);

        assert_eq!(planner.record(fresh), Availability::Available);
        assert!(planner.last_status().unwrap().has_fresh_data);
    }
}
