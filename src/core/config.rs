//! Client configuration: environments, retry and polling policies,
//! batch limits.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::KsefError;
use crate::core::identity::Nip;

/// Target KSeF environment.
///
/// Each environment maps to a fixed base URL; [`KsefConfig::with_base_url`]
/// overrides the preset for self-hosted gateways and test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Integration environment with synthetic data.
    #[default]
    Test,
    /// Pre-production environment mirroring production behaviour.
    Demo,
    /// Production.
    Prod,
}

impl Environment {
    /// Preset base URL for this environment.
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Test => "https://ksef-test.mf.gov.pl/api",
            Environment::Demo => "https://ksef-demo.mf.gov.pl/api",
            Environment::Prod => "https://ksef.mf.gov.pl/api",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Test => "test",
            Environment::Demo => "demo",
            Environment::Prod => "prod",
        };
        f.write_str(name)
    }
}

/// Retry behaviour for remote calls that fail transiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor applied per further attempt. Must be at least 1.
    pub multiplier: f64,
    /// Upper bound on a single backoff delay, before jitter.
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1)`; the delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter)`.
    pub jitter: f64,
    /// Timeout applied to each individual attempt.
    pub attempt_timeout: Duration,
    /// Budget for the whole operation across attempts and waits.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
            attempt_timeout: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after `attempt` failed attempts (1-based).
    ///
    /// `jitter_unit` is a uniform sample in `[0, 1)`; passing `0.5`
    /// yields the unjittered delay. Kept pure so tests can pin the
    /// sample.
    pub fn backoff_delay(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let unit = jitter_unit.clamp(0.0, 1.0);
        let factor = 1.0 + self.jitter * (2.0 * unit - 1.0);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Pacing for status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Interval before the second poll.
    pub initial_interval: Duration,
    /// Upper bound on the interval between polls.
    pub max_interval: Duration,
    /// Growth factor applied per completed poll. Must be at least 1.
    pub growth: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
            growth: 1.5,
        }
    }
}

impl PollPolicy {
    /// Wait before the next poll, given how many polls completed so far.
    pub fn interval_after(&self, ticks: u32) -> Duration {
        let exp = ticks.min(64) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.growth.powi(exp);
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }
}

/// Size and count limits applied when splitting documents into batches.
///
/// The authority publishes its binding limits out of band; these
/// defaults are conservative placeholders meant to be overridden from
/// deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Largest accepted single invoice, in bytes of raw XML.
    pub max_invoice_bytes: usize,
    /// Largest accepted batch payload before encryption, in bytes.
    pub max_batch_bytes: usize,
    /// Most invoices permitted in one batch.
    pub max_batch_invoices: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_invoice_bytes: 1024 * 1024,
            max_batch_bytes: 5 * 1024 * 1024,
            max_batch_invoices: 100,
        }
    }
}

fn default_session_margin() -> Duration {
    Duration::from_secs(60)
}

/// Everything the client needs to talk to one KSeF environment on
/// behalf of one taxpayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KsefConfig {
    /// Tax identifier sessions are opened for.
    pub nip: Nip,
    /// Target environment; supplies the base URL unless overridden.
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    pub limits: BatchLimits,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub poll: PollPolicy,
    /// Sessions are renewed once less than this remains before expiry.
    #[serde(default = "default_session_margin")]
    pub session_margin: Duration,
}

impl KsefConfig {
    /// Configuration for `nip` against `environment`, with default
    /// policies and limits.
    pub fn for_environment(environment: Environment, nip: Nip) -> Self {
        Self {
            nip,
            environment,
            base_url: None,
            limits: BatchLimits::default(),
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            session_margin: default_session_margin(),
        }
    }

    /// Override the environment preset with an explicit base URL.
    ///
    /// The URL must use an `http` or `https` scheme; a trailing slash
    /// is stripped.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Result<Self, KsefError> {
        let url = url.into();
        check_url_scheme(&url)?;
        self.base_url = Some(url.trim_end_matches('/').to_owned());
        Ok(self)
    }

    /// The effective base URL: the override if set, the environment
    /// preset otherwise.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or_else(|| self.environment.base_url())
    }

    /// Reject incoherent settings before any network traffic happens.
    ///
    /// Deserialized configurations bypass the constructors, so the
    /// client runs this once on startup.
    pub fn validate(&self) -> Result<(), KsefError> {
        if let Some(url) = self.base_url.as_deref() {
            check_url_scheme(url)?;
        }
        if self.limits.max_invoice_bytes == 0 {
            return Err(KsefError::Configuration(
                "max_invoice_bytes must be positive".into(),
            ));
        }
        if self.limits.max_invoice_bytes > self.limits.max_batch_bytes {
            return Err(KsefError::Configuration(format!(
                "max_invoice_bytes ({}) exceeds max_batch_bytes ({})",
                self.limits.max_invoice_bytes, self.limits.max_batch_bytes
            )));
        }
        if self.limits.max_batch_invoices == 0 {
            return Err(KsefError::Configuration(
                "max_batch_invoices must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(KsefError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(KsefError::Configuration(
                "retry.multiplier must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(KsefError::Configuration(
                "retry.jitter must lie in [0, 1)".into(),
            ));
        }
        if self.poll.growth < 1.0 {
            return Err(KsefError::Configuration(
                "poll.growth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn check_url_scheme(url: &str) -> Result<(), KsefError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(KsefError::Configuration(format!(
            "base URL '{url}' must use http or https"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nip() -> Nip {
        Nip::parse("5260250274").unwrap()
    }

    // --- environments ---

    #[test]
    fn environment_presets() {
        assert_eq!(
            Environment::Test.base_url(),
            "https://ksef-test.mf.gov.pl/api"
        );
        assert_eq!(
            Environment::Demo.base_url(),
            "https://ksef-demo.mf.gov.pl/api"
        );
        assert_eq!(Environment::Prod.base_url(), "https://ksef.mf.gov.pl/api");
    }

    #[test]
    fn config_uses_environment_preset() {
        let cfg = KsefConfig::for_environment(Environment::Demo, nip());
        assert_eq!(cfg.base_url(), "https://ksef-demo.mf.gov.pl/api");
    }

    #[test]
    fn base_url_override_strips_trailing_slash() {
        let cfg = KsefConfig::for_environment(Environment::Test, nip())
            .with_base_url("http://localhost:8080/")
            .unwrap();
        assert_eq!(cfg.base_url(), "http://localhost:8080");
    }

    #[test]
    fn base_url_override_rejects_other_schemes() {
        let res =
            KsefConfig::for_environment(Environment::Test, nip()).with_base_url("ftp://host");
        assert!(res.is_err());
    }

    // --- retry backoff ---

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        // jitter_unit 0.5 cancels the jitter term.
        assert_eq!(policy.backoff_delay(1, 0.5), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2, 0.5), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3, 0.5), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(10, 0.5), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(100, 0.5), Duration::from_secs(8));
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        let low = policy.backoff_delay(1, 0.0);
        let high = policy.backoff_delay(1, 1.0);
        assert_eq!(low, Duration::from_millis(400));
        assert_eq!(high, Duration::from_millis(600));
    }

    // --- polling ---

    #[test]
    fn poll_interval_grows_and_caps() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval_after(0), Duration::from_secs(1));
        assert_eq!(policy.interval_after(1), Duration::from_millis(1500));
        assert_eq!(policy.interval_after(100), Duration::from_secs(15));
    }

    // --- validation ---

    #[test]
    fn default_config_validates() {
        let cfg = KsefConfig::for_environment(Environment::Test, nip());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invoice_limit_above_batch_limit_rejected() {
        let mut cfg = KsefConfig::for_environment(Environment::Test, nip());
        cfg.limits.max_invoice_bytes = cfg.limits.max_batch_bytes + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut cfg = KsefConfig::for_environment(Environment::Test, nip());
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn full_jitter_rejected() {
        let mut cfg = KsefConfig::for_environment(Environment::Test, nip());
        cfg.retry.jitter = 1.0;
        assert!(cfg.validate().is_err());
    }

    // --- serde ---

    #[test]
    fn minimal_json_config_deserializes() {
        let cfg: KsefConfig = serde_json::from_str(r#"{ "nip": "5260250274" }"#).unwrap();
        assert_eq!(cfg.environment, Environment::Test);
        assert_eq!(cfg.limits.max_batch_invoices, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn environment_deserializes_lowercase() {
        let cfg: KsefConfig =
            serde_json::from_str(r#"{ "nip": "5260250274", "environment": "prod" }"#).unwrap();
        assert_eq!(cfg.base_url(), "https://ksef.mf.gov.pl/api");
    }
}
