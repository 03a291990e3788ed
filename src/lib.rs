pub mod allocation;
pub mod captcha;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod harvester;
pub mod progress;
pub mod ranges;
pub mod session;

pub use config::{Credentials, HarvestConfig};
pub use harvester::{Harvester, RunSummary, Termination};

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration`, waking early if `cancel` fires.
/// Returns false when cancelled, true when the full wait elapsed.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
