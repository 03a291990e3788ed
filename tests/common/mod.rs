//! Shared test helpers for integration tests.

#![allow(dead_code)]

use rangefill::HarvestConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Config pointed at `base_url` with every pause and backoff zeroed, so runs
/// against the mock panel finish in milliseconds.
pub fn fast_config(base_url: &str, progress_file: &Path) -> HarvestConfig {
    HarvestConfig {
        base_url: base_url.to_string(),
        range_delay: Duration::ZERO,
        page_delay: Duration::ZERO,
        resume_grace: Duration::ZERO,
        verify_cooldown: Duration::ZERO,
        backoff_unit: Duration::ZERO,
        base_timeout: Duration::from_secs(5),
        login_timeout: Duration::from_secs(5),
        page_timeout: Duration::from_secs(5),
        count_timeout: Duration::from_secs(5),
        health_timeout: Duration::from_secs(5),
        progress_file: progress_file.to_path_buf(),
        ..HarvestConfig::default()
    }
}

pub fn shared(config: HarvestConfig) -> Arc<HarvestConfig> {
    Arc::new(config)
}
