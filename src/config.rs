//! # Config — Immutable Run Configuration
//!
//! Every tunable of a run lives in `HarvestConfig`: quota, page size, pacing
//! delays, per-call timeouts, retry budgets, and the panel's endpoint paths.
//! The struct is built once (TOML file, then CLI overrides), validated, and
//! shared read-only through an `Arc` with each component.
//!
//! Durations are written as seconds in TOML (`range_delay = 2` or
//! `verify_cooldown = 0.5`). Every field has a default, so a config file only
//! needs the keys it changes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Desktop-class mobile browser identity the panel expects.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; V2066 Build/TP1A.220624.014) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.7499.34 Safari/537.36";

/// Endpoint paths, resolved against `HarvestConfig::base_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub signin: String,
    pub dashboard: String,
    pub ranges: String,
    pub numbers: String,
    pub request: String,
    /// Page the collection table lives on (sent as `Referer`).
    pub ranges_page: String,
    /// Page the per-range count table lives on (sent as `Referer`).
    pub numbers_page: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            login: "login".into(),
            signin: "signin".into(),
            dashboard: "agent/".into(),
            ranges: "agent/res/data_smsranges.php".into(),
            numbers: "agent/res/data_smsnumbers.php".into(),
            request: "agent/res/requestsmsnumberfinal.php".into(),
            ranges_page: "agent/SMSRanges".into(),
            numbers_page: "agent/MySMSNumbers".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarvestConfig {
    /// Service root, e.g. `http://panel.example/ints/`.
    pub base_url: String,
    pub endpoints: Endpoints,

    /// Allocation count every range should reach.
    pub target_count: u32,
    /// Ranges per enumeration page.
    pub page_size: u32,
    /// Health-check cadence, in pages.
    pub session_check_interval: u32,
    /// Log a progress line every N dispatched ranges.
    pub report_every: u32,

    #[serde(with = "duration_secs")]
    pub range_delay: Duration,
    #[serde(with = "duration_secs")]
    pub page_delay: Duration,
    #[serde(with = "duration_secs")]
    pub resume_grace: Duration,

    /// Allocation timeout is `base_timeout + (qty / 50) * timeout_per_fifty`.
    #[serde(with = "duration_secs")]
    pub base_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub timeout_per_fifty: Duration,
    #[serde(with = "duration_secs")]
    pub login_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub page_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub count_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub health_timeout: Duration,
    /// Pause between an allocation timeout and the verification read.
    #[serde(with = "duration_secs")]
    pub verify_cooldown: Duration,

    /// Largest quantity ever requested; must stay below `rejection_threshold`.
    pub quantity_cap: u32,
    pub rejection_threshold: u32,
    pub reduction_step: u32,
    pub max_allocation_attempts: u32,

    pub page_fetch_attempts: u32,
    /// Page retry `n` (from 0) waits `backoff_unit * backoff_base^n`.
    pub backoff_base: u32,
    #[serde(with = "duration_secs")]
    pub backoff_unit: Duration,

    /// Fraction of the collection that counts as "done" for progress cleanup.
    pub completion_ratio: f64,
    pub payment_term: String,
    pub over_limit_phrase: String,
    pub user_agent: String,
    pub progress_file: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            base_url: String::new(),
            endpoints: Endpoints::default(),
            target_count: 500,
            page_size: 10,
            session_check_interval: 50,
            report_every: 10,
            range_delay: Duration::from_secs(2),
            page_delay: Duration::from_secs(3),
            resume_grace: Duration::from_secs(5),
            base_timeout: Duration::from_secs(15),
            timeout_per_fifty: Duration::from_secs(5),
            login_timeout: Duration::from_secs(15),
            page_timeout: Duration::from_secs(30),
            count_timeout: Duration::from_secs(15),
            health_timeout: Duration::from_secs(10),
            verify_cooldown: Duration::from_secs(10),
            quantity_cap: 499,
            rejection_threshold: 500,
            reduction_step: 10,
            max_allocation_attempts: 5,
            page_fetch_attempts: 3,
            backoff_base: 5,
            backoff_unit: Duration::from_secs(1),
            completion_ratio: 0.95,
            payment_term: "8".into(),
            over_limit_phrase: "more then 500".into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            progress_file: PathBuf::from("rangefill_progress.json"),
        }
    }
}

impl HarvestConfig {
    /// Load from a TOML file, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(HarvestConfig::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "base_url is required (set --base-url or RANGEFILL_BASE_URL)".into(),
            ));
        }
        self.service_root()
            .map_err(|e| ConfigError::Invalid(format!("base_url: {}", e)))?;
        if self.target_count == 0 {
            return Err(ConfigError::Invalid("target_count must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".into()));
        }
        if self.quantity_cap == 0 || self.quantity_cap >= self.rejection_threshold {
            return Err(ConfigError::Invalid(format!(
                "quantity_cap must be in 1..{} (got {})",
                self.rejection_threshold, self.quantity_cap
            )));
        }
        if self.max_allocation_attempts == 0 || self.page_fetch_attempts == 0 {
            return Err(ConfigError::Invalid(
                "attempt budgets must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.completion_ratio) {
            return Err(ConfigError::Invalid(
                "completion_ratio must be within 0..=1".into(),
            ));
        }
        Ok(())
    }

    /// `base_url` as a directory URL, so relative endpoint paths join beneath it.
    pub fn service_root(&self) -> Result<Url, url::ParseError> {
        let trimmed = self.base_url.trim();
        if trimmed.ends_with('/') {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("{}/", trimmed))
        }
    }

    /// Timeout for one allocation request of `quantity` items.
    pub fn allocation_timeout(&self, quantity: u32) -> Duration {
        self.base_timeout + self.timeout_per_fifty * (quantity / 50)
    }

    /// Wait after failed page attempt `attempt` (0-based).
    pub fn page_backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.saturating_pow(attempt);
        self.backoff_unit.saturating_mul(factor)
    }
}

/// Login credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_base(base: &str) -> HarvestConfig {
        HarvestConfig {
            base_url: base.into(),
            ..HarvestConfig::default()
        }
    }

    #[test]
    fn defaults_match_panel_contract() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.target_count, 500);
        assert_eq!(cfg.quantity_cap, 499);
        assert_eq!(cfg.reduction_step, 10);
        assert_eq!(cfg.max_allocation_attempts, 5);
        assert_eq!(cfg.page_fetch_attempts, 3);
        assert_eq!(cfg.session_check_interval, 50);
        assert_eq!(cfg.payment_term, "8");
    }

    #[test]
    fn allocation_timeout_grows_per_fifty() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.allocation_timeout(49), Duration::from_secs(15));
        assert_eq!(cfg.allocation_timeout(50), Duration::from_secs(20));
        assert_eq!(cfg.allocation_timeout(499), Duration::from_secs(60));
    }

    #[test]
    fn page_backoff_is_exponential() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.page_backoff(0), Duration::from_secs(1));
        assert_eq!(cfg.page_backoff(1), Duration::from_secs(5));
        assert_eq!(cfg.page_backoff(2), Duration::from_secs(25));
    }

    #[test]
    fn service_root_gains_trailing_slash() {
        let root = with_base("http://panel.test/ints").service_root().unwrap();
        assert_eq!(root.as_str(), "http://panel.test/ints/");
        let login = root.join("login").unwrap();
        assert_eq!(login.as_str(), "http://panel.test/ints/login");
    }

    #[test]
    fn validate_requires_base_url() {
        let err = HarvestConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn validate_rejects_cap_at_threshold() {
        let mut cfg = with_base("http://panel.test/");
        cfg.quantity_cap = 500;
        assert!(cfg.validate().is_err());
        cfg.quantity_cap = 499;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let mut cfg = with_base("http://panel.test/");
        cfg.page_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rangefill.toml");
        std::fs::write(
            &path,
            r#"
base_url = "http://panel.test/ints/"
target_count = 300
range_delay = 0.5
page_delay = 1

[endpoints]
login = "auth/login"
"#,
        )
        .unwrap();

        let cfg = HarvestConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.target_count, 300);
        assert_eq!(cfg.range_delay, Duration::from_millis(500));
        assert_eq!(cfg.page_delay, Duration::from_secs(1));
        assert_eq!(cfg.endpoints.login, "auth/login");
        assert_eq!(cfg.endpoints.signin, "signin");
        assert_eq!(cfg.page_size, 10);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = HarvestConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("alice", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
