//! Confirmed mode writes
//!
//! Devices acknowledge `ES.SetMode` unreliably, so a write only counts once a
//! later status read shows its effect. Each attempt re-sends the write, polls
//! status a few times, then backs off with jitter. Polling for the host stays
//! paused for the whole run.

use crate::client::DeviceClient;
use crate::config::secs;
use crate::error::{EssrvError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use voltage_marstek::response::Datagram;
use voltage_marstek::{
    command, EsModeResult, EsStatusResult, ManualConfig, ModeConfig, OperatingMode,
};

/// Retry and verification schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierPolicy {
    pub max_attempts: u32,
    /// Write timeout per attempt; the last entry repeats when exhausted
    pub attempt_timeouts_secs: Vec<f64>,
    /// Backoff base per attempt, scaled by the attempt number
    pub backoff_secs: Vec<f64>,
    /// Upper bound of the random extra delay, per attempt number
    pub jitter_factor: f64,
    pub verify_polls: u32,
    pub poll_timeout_secs: f64,
    pub poll_interval_secs: f64,
    /// Battery power below this counts as stopped (W)
    pub stop_threshold_w: f64,
}

impl Default for VerifierPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            attempt_timeouts_secs: vec![2.4, 3.0, 3.6, 4.4, 5.2, 6.2, 7.5, 9.0],
            backoff_secs: vec![0.4, 0.6, 0.8, 1.0, 1.2, 1.4, 1.6, 1.8],
            jitter_factor: 0.30,
            verify_polls: 5,
            poll_timeout_secs: 2.4,
            poll_interval_secs: 0.45,
            stop_threshold_w: 50.0,
        }
    }
}

fn non_decreasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}

fn scheduled(values: &[f64], attempt: u32) -> f64 {
    let idx = (attempt.saturating_sub(1) as usize).min(values.len().saturating_sub(1));
    values.get(idx).copied().unwrap_or(0.0)
}

impl VerifierPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EssrvError::config("verifier.max_attempts must be positive"));
        }
        if self.verify_polls == 0 {
            return Err(EssrvError::config("verifier.verify_polls must be positive"));
        }
        if self.attempt_timeouts_secs.is_empty()
            || self.attempt_timeouts_secs.iter().any(|t| *t <= 0.0)
            || !non_decreasing(&self.attempt_timeouts_secs)
        {
            return Err(EssrvError::config(
                "verifier.attempt_timeouts_secs must be positive and non-decreasing",
            ));
        }
        if self.backoff_secs.is_empty()
            || self.backoff_secs.iter().any(|b| *b < 0.0)
            || !non_decreasing(&self.backoff_secs)
        {
            return Err(EssrvError::config(
                "verifier.backoff_secs must be non-negative and non-decreasing",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(EssrvError::config("verifier.jitter_factor must be within 0..=1"));
        }
        if self.poll_timeout_secs <= 0.0 || self.poll_interval_secs < 0.0 {
            return Err(EssrvError::config("verifier poll timings must be positive"));
        }
        if self.stop_threshold_w < 0.0 {
            return Err(EssrvError::config("verifier.stop_threshold_w must not be negative"));
        }
        Ok(())
    }

    /// Write timeout for a 1-based attempt
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        secs(scheduled(&self.attempt_timeouts_secs, attempt))
    }

    /// Deterministic part of the backoff after a 1-based attempt
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        secs(scheduled(&self.backoff_secs, attempt) * f64::from(attempt))
    }

    /// Full backoff: base plus up to `jitter_factor * attempt` seconds
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max_jitter = self.jitter_factor * f64::from(attempt);
        let jitter = if max_jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=max_jitter)
        } else {
            0.0
        };
        self.backoff_base(attempt) + secs(jitter)
    }
}

/// What a status read must show for a write to count
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpectedEffect {
    /// Manual mode, battery power negative
    Charge,
    /// Manual mode, battery power positive
    Discharge,
    /// Battery power within the stop threshold, manual mode or no mode reported
    Stop,
    Mode(OperatingMode),
}

impl ExpectedEffect {
    pub fn is_satisfied(
        &self,
        mode: Option<&str>,
        battery_power: Option<f64>,
        stop_threshold_w: f64,
    ) -> bool {
        let manual = mode.is_some_and(|m| OperatingMode::Manual.matches(m));
        match self {
            Self::Charge => manual && battery_power.is_some_and(|p| p < 0.0),
            Self::Discharge => manual && battery_power.is_some_and(|p| p > 0.0),
            Self::Stop => {
                (manual || mode.is_none())
                    && battery_power.is_some_and(|p| p.abs() < stop_threshold_w)
            },
            Self::Mode(expected) => mode.is_some_and(|m| expected.matches(m)),
        }
    }
}

impl fmt::Display for ExpectedEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => f.write_str("charge"),
            Self::Discharge => f.write_str("discharge"),
            Self::Stop => f.write_str("stop"),
            Self::Mode(mode) => write!(f, "mode {}", mode),
        }
    }
}

/// High-level write request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeAction {
    Charge(i32),
    Discharge(i32),
    Stop,
    Mode(OperatingMode),
}

impl ModeAction {
    /// Parse a CLI action name; `power` is used by charge and discharge
    pub fn parse(name: &str, power: i32) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "charge" => Ok(Self::Charge(power)),
            "discharge" => Ok(Self::Discharge(power)),
            "stop" => Ok(Self::Stop),
            other => other
                .parse::<OperatingMode>()
                .map(Self::Mode)
                .map_err(|_| {
                    EssrvError::validation(
                        "action",
                        format!(
                            "unknown action '{}' (auto, ai, manual, passive, charge, discharge, stop)",
                            name
                        ),
                    )
                }),
        }
    }

    /// Mode payload to send and the effect that confirms it
    pub fn plan(&self) -> (ModeConfig, ExpectedEffect) {
        match self {
            Self::Charge(p) => (
                ModeConfig::manual(ManualConfig::charge(*p)),
                ExpectedEffect::Charge,
            ),
            Self::Discharge(p) => (
                ModeConfig::manual(ManualConfig::discharge(*p)),
                ExpectedEffect::Discharge,
            ),
            Self::Stop => (ModeConfig::manual(ManualConfig::stop()), ExpectedEffect::Stop),
            Self::Mode(mode) => (ModeConfig::for_mode(*mode), ExpectedEffect::Mode(*mode)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    /// 1-based attempt that confirmed the write
    pub attempts: u32,
    pub mode: Option<String>,
    pub battery_power: Option<f64>,
}

/// What one verification read observed
#[derive(Debug, Default)]
struct Observation {
    mode: Option<String>,
    battery_power: Option<f64>,
}

pub struct CommandVerifier {
    client: Arc<dyn DeviceClient>,
    policy: VerifierPolicy,
    device_id: u8,
}

impl CommandVerifier {
    pub fn new(client: Arc<dyn DeviceClient>, policy: VerifierPolicy) -> Self {
        Self {
            client,
            policy,
            device_id: 0,
        }
    }

    pub fn with_device_id(mut self, device_id: u8) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn policy(&self) -> &VerifierPolicy {
        &self.policy
    }

    /// Run a [`ModeAction`] to confirmation
    pub async fn apply(&self, host: &str, port: u16, action: ModeAction) -> Result<VerifyOutcome> {
        let (config, effect) = action.plan();
        self.execute(host, port, &config, effect).await
    }

    /// Send `config` until a status read shows `effect`
    ///
    /// Fails with `Validation` before any I/O for an invalid payload and with
    /// `NotConfirmed` once every attempt is used up.
    pub async fn execute(
        &self,
        host: &str,
        port: u16,
        config: &ModeConfig,
        effect: ExpectedEffect,
    ) -> Result<VerifyOutcome> {
        // reject a bad payload before touching the device
        command::set_mode(0, self.device_id, config)?;

        let _pause = self.client.polling().pause_guard(host);
        info!("Applying {} to {}", effect, host);

        for attempt in 1..=self.policy.max_attempts {
            self.send_write(host, port, config, attempt).await?;

            if let Some(seen) = self.verify(host, port, effect).await {
                info!("{} confirmed on {} after {} attempt(s)", effect, host, attempt);
                return Ok(VerifyOutcome {
                    attempts: attempt,
                    mode: seen.mode,
                    battery_power: seen.battery_power,
                });
            }

            if attempt < self.policy.max_attempts {
                let backoff = self.policy.backoff(attempt);
                debug!(
                    "{} not yet visible on {} (attempt {}), retrying in {:?}",
                    effect, host, attempt, backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        warn!(
            "{} not confirmed on {} after {} attempts",
            effect, host, self.policy.max_attempts
        );
        Err(EssrvError::NotConfirmed {
            action: effect.to_string(),
            host: host.to_string(),
            attempts: self.policy.max_attempts,
        })
    }

    /// Send failures are logged and left to verification
    async fn send_write(
        &self,
        host: &str,
        port: u16,
        config: &ModeConfig,
        attempt: u32,
    ) -> Result<()> {
        let cmd = command::set_mode(self.client.next_request_id(), self.device_id, config)?;
        let timeout = self.policy.attempt_timeout(attempt);
        match self.client.send_command(&cmd, host, port, timeout, true).await {
            Ok(reply) => match Datagram::classify(&reply) {
                Datagram::Reply(result) => {
                    debug!("ES.SetMode attempt {} acknowledged: {:?}", attempt, result)
                },
                other => debug!("ES.SetMode attempt {} answered with {:?}", attempt, other),
            },
            Err(e) => debug!("ES.SetMode attempt {} to {} failed: {}", attempt, host, e),
        }
        Ok(())
    }

    async fn verify(&self, host: &str, port: u16, effect: ExpectedEffect) -> Option<Observation> {
        let interval = secs(self.policy.poll_interval_secs);
        for _ in 0..self.policy.verify_polls {
            tokio::time::sleep(interval).await;
            let seen = self.observe(host, port).await;
            if effect.is_satisfied(
                seen.mode.as_deref(),
                seen.battery_power,
                self.policy.stop_threshold_w,
            ) {
                return Some(seen);
            }
        }
        None
    }

    /// `ES.GetStatus`, plus `ES.GetMode` when status carries no mode
    async fn observe(&self, host: &str, port: u16) -> Observation {
        let timeout = secs(self.policy.poll_timeout_secs);
        let mut seen = Observation::default();

        let cmd = command::es_status(self.client.next_request_id(), self.device_id);
        match self.client.send_command(&cmd, host, port, timeout, true).await {
            Ok(reply) => {
                if let Some(result) = Datagram::classify(&reply).result() {
                    let status = EsStatusResult::from_result(result);
                    seen.battery_power = status.battery_power;
                    seen.mode = status.mode;
                }
            },
            Err(e) => debug!("Verification read from {} failed: {}", host, e),
        }

        if seen.mode.is_none() {
            let cmd = command::es_mode(self.client.next_request_id(), self.device_id);
            match self.client.send_command(&cmd, host, port, timeout, true).await {
                Ok(reply) => {
                    if let Some(result) = Datagram::classify(&reply).result() {
                        seen.mode = EsModeResult::from_result(result).device_mode;
                    }
                },
                Err(e) => debug!("Mode read from {} failed: {}", host, e),
            }
        }
        seen
    }
}
