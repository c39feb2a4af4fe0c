//! Per-method command statistics, kept globally and per device IP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStats {
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_timeout: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// How one request ended
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(Duration),
    Timeout,
    Failure(String),
}

impl CommandStats {
    pub fn record(&mut self, outcome: &RequestOutcome) {
        let now = Utc::now();
        self.attempts += 1;
        self.last_updated = Some(now);
        match outcome {
            RequestOutcome::Success(latency) => {
                self.successes += 1;
                self.last_success = Some(now);
                self.last_latency_ms = Some(latency.as_secs_f64() * 1000.0);
            },
            RequestOutcome::Timeout => {
                self.timeouts += 1;
                self.last_timeout = Some(now);
            },
            RequestOutcome::Failure(err) => {
                self.failures += 1;
                self.last_error = Some(err.clone());
            },
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

/// Method name -> stats; ordered for stable output
pub type StatsByMethod = BTreeMap<String, CommandStats>;

#[derive(Debug, Default)]
pub struct StatsRegistry {
    global: StatsByMethod,
    per_ip: HashMap<String, StatsByMethod>,
}

impl StatsRegistry {
    pub fn record(&mut self, method: &str, ip: &str, outcome: &RequestOutcome) {
        self.global
            .entry(method.to_string())
            .or_default()
            .record(outcome);
        self.per_ip
            .entry(ip.to_string())
            .or_default()
            .entry(method.to_string())
            .or_default()
            .record(outcome);
    }

    pub fn global(&self) -> StatsByMethod {
        self.global.clone()
    }

    pub fn for_ip(&self, ip: &str) -> StatsByMethod {
        self.per_ip.get(ip).cloned().unwrap_or_default()
    }

    pub fn forget_ips(&mut self, ips: &[String]) {
        for ip in ips {
            self.per_ip.remove(ip);
        }
    }

    pub fn clear(&mut self) {
        self.global.clear();
        self.per_ip.clear();
    }
}
