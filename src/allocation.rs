//! # Allocation — Adaptive Per-Range Quota Filling
//!
//! For one range: read how many items are already allocated, compute the
//! deficit against the target, and request it in a bounded retry loop whose
//! quantity shrinks by a fixed step on every retry.
//!
//! ## Quantity Schedule
//!
//! ```text
//! needed  = min(target - existing, cap)      cap = 499 < server limit 500
//! attempt k requests needed - k * step        step = 10, k in 0..5
//! ```
//!
//! A quantity that reaches zero ends the loop as `Skipped`; the first success
//! ends it as `Success`; running out of attempts is `Failed`.
//!
//! ## Timeouts
//!
//! Large requests are slow server-side, so each request gets
//! `base + (qty / 50) * per_fifty`. A timed-out request may still have been
//! honored: after a cooldown the count is re-read, and a count at or above
//! target is a verified success.
//!
//! ## Reply Classification
//!
//! The panel answers with free text. `classify_reply` is the only place that
//! interprets it.

use crate::config::HarvestConfig;
use crate::error::PanelError;
use crate::ranges::{CountEnvelope, Range};
use crate::session::PanelSession;
use reqwest::header::{self, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How much of an unrecognized reply is kept for the log.
const REPLY_EXCERPT: usize = 150;

/// Meaning of an allocation reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationReply {
    Allocated,
    OverLimit,
    Unrecognized(String),
}

/// Case-insensitive substring classification of an allocation reply.
pub fn classify_reply(body: &str, over_limit_phrase: &str) -> AllocationReply {
    let lower = body.to_lowercase();
    if lower.contains("successfully") || lower.contains("allocated") {
        AllocationReply::Allocated
    } else if !over_limit_phrase.is_empty() && lower.contains(&over_limit_phrase.to_lowercase()) {
        AllocationReply::OverLimit
    } else {
        AllocationReply::Unrecognized(body.chars().take(REPLY_EXCERPT).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Rejected,
    TimeoutVerified,
    TimeoutUnverified,
    Error,
}

impl AttemptOutcome {
    /// Direct or verified-after-timeout success.
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Success | AttemptOutcome::TimeoutVerified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationAttempt {
    pub attempt: u32,
    pub quantity: u32,
    pub timeout: Duration,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Allocation succeeded with this quantity.
    Success { quantity: u32 },
    /// Nothing (left) to request.
    Skipped,
    /// Every attempt failed.
    Failed,
    /// The current count could not be read.
    Error,
}

impl RangeOutcome {
    /// Whether the range is safe to skip on every later run.
    pub fn marks_processed(self) -> bool {
        matches!(self, RangeOutcome::Success { .. } | RangeOutcome::Skipped)
    }
}

#[derive(Debug, Clone)]
pub struct RangeReport {
    pub outcome: RangeOutcome,
    /// Count read before any request; `None` when the read failed.
    pub existing: Option<u64>,
    pub attempts: Vec<AllocationAttempt>,
}

impl RangeReport {
    fn new(outcome: RangeOutcome, existing: Option<u64>, attempts: Vec<AllocationAttempt>) -> Self {
        RangeReport {
            outcome,
            existing,
            attempts,
        }
    }
}

/// First quantity to request, or `None` if the range is already at target.
pub fn initial_quantity(existing: u64, target: u32, cap: u32) -> Option<u32> {
    let target = u64::from(target);
    if existing >= target {
        return None;
    }
    let needed = (target - existing).min(u64::from(cap));
    u32::try_from(needed).ok().filter(|&n| n > 0)
}

/// Quantity for retry `attempt` (0-based) of a range that needed `needed`.
pub fn attempt_quantity(needed: u32, attempt: u32, step: u32) -> u32 {
    needed.saturating_sub(attempt.saturating_mul(step))
}

pub struct AllocationEngine {
    config: Arc<HarvestConfig>,
}

impl AllocationEngine {
    pub fn new(config: Arc<HarvestConfig>) -> Self {
        AllocationEngine { config }
    }

    /// Number of items currently allocated to `range_id`.
    pub async fn existing_count(
        &self,
        session: &PanelSession,
        range_id: &str,
    ) -> Result<u64, PanelError> {
        let query = [
            ("frange", range_id.to_string()),
            ("fclient", String::new()),
            ("sEcho", "1".to_string()),
            ("iDisplayStart", "0".to_string()),
            ("iDisplayLength", "1".to_string()),
            ("mDataProp_0", "0".to_string()),
            ("bSortable_0", "false".to_string()),
        ];
        let endpoints = &self.config.endpoints;
        let body = session
            .ajax_json(
                &endpoints.numbers,
                &endpoints.numbers_page,
                &query,
                self.config.count_timeout,
            )
            .await?;
        let envelope: CountEnvelope = serde_json::from_value(body)
            .map_err(|e| PanelError::Parse(format!("count reply: {}", e)))?;
        info!(range_id, existing = envelope.total, "existing allocation count");
        Ok(envelope.total)
    }

    /// Request `quantity` items for `range_id`, verifying the count on timeout.
    pub async fn request_allocation(
        &self,
        session: &PanelSession,
        range_id: &str,
        quantity: u32,
    ) -> AttemptOutcome {
        let timeout = self.config.allocation_timeout(quantity);
        let url = match session.url(&self.config.endpoints.request) {
            Ok(url) => url,
            Err(e) => {
                warn!(range_id, error = %e, "invalid allocation endpoint");
                return AttemptOutcome::Error;
            }
        };

        let mut headers = session.ajax_headers(&self.config.endpoints.ranges_page);
        if let Ok(origin) = HeaderValue::from_str(&session.root().origin().ascii_serialization()) {
            headers.insert(header::ORIGIN, origin);
        }
        let qty = quantity.to_string();
        let form = [
            ("rid", range_id),
            ("payterm", self.config.payment_term.as_str()),
            ("qty", qty.as_str()),
        ];

        info!(range_id, quantity, timeout_secs = timeout.as_secs_f64(), "sending allocation request");
        let reply: Result<String, reqwest::Error> = async {
            session
                .client()
                .post(url)
                .headers(headers)
                .form(&form)
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        }
        .await;

        match reply {
            Ok(body) => match classify_reply(&body, &self.config.over_limit_phrase) {
                AllocationReply::Allocated => {
                    info!(range_id, quantity, "allocation accepted");
                    AttemptOutcome::Success
                }
                AllocationReply::OverLimit => {
                    warn!(range_id, quantity, "allocation rejected as over the server limit");
                    AttemptOutcome::Rejected
                }
                AllocationReply::Unrecognized(excerpt) => {
                    warn!(range_id, quantity, reply = %excerpt, "allocation not confirmed");
                    AttemptOutcome::Error
                }
            },
            Err(e) if e.is_timeout() => {
                warn!(
                    range_id,
                    quantity,
                    timeout_secs = timeout.as_secs_f64(),
                    "allocation request timed out, verifying"
                );
                self.verify_after_timeout(session, range_id).await
            }
            Err(e) => {
                warn!(range_id, quantity, error = %e, "allocation request failed");
                AttemptOutcome::Error
            }
        }
    }

    async fn verify_after_timeout(&self, session: &PanelSession, range_id: &str) -> AttemptOutcome {
        tokio::time::sleep(self.config.verify_cooldown).await;
        let target = u64::from(self.config.target_count);
        match self.existing_count(session, range_id).await {
            Ok(count) if count >= target => {
                info!(range_id, count, "allocation verified despite timeout");
                AttemptOutcome::TimeoutVerified
            }
            Ok(count) => {
                info!(range_id, still_needed = target - count, "allocation not applied");
                AttemptOutcome::TimeoutUnverified
            }
            Err(e) => {
                warn!(range_id, error = %e, "verification read failed");
                AttemptOutcome::TimeoutUnverified
            }
        }
    }

    /// Fill one range up to the target.
    pub async fn process_range(&self, session: &PanelSession, range: &Range) -> RangeReport {
        let cfg = &self.config;
        info!(range = %range.name, id = %range.id, "processing range");

        let existing = match self.existing_count(session, &range.id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(id = %range.id, error = %e, "failed to read existing count");
                return RangeReport::new(RangeOutcome::Error, None, Vec::new());
            }
        };

        let Some(needed) = initial_quantity(existing, cfg.target_count, cfg.quantity_cap) else {
            info!(id = %range.id, existing, target = cfg.target_count, "already at target, skipping");
            return RangeReport::new(RangeOutcome::Skipped, Some(existing), Vec::new());
        };
        info!(id = %range.id, existing, requesting = needed, "range below target");

        let mut attempts = Vec::new();
        for attempt in 0..cfg.max_allocation_attempts {
            let quantity = attempt_quantity(needed, attempt, cfg.reduction_step);
            if attempt > 0 {
                info!(
                    id = %range.id,
                    attempt = attempt + 1,
                    of = cfg.max_allocation_attempts,
                    quantity,
                    "retrying with reduced quantity"
                );
            }
            if quantity == 0 {
                info!(id = %range.id, "reduced quantity reached zero, skipping");
                return RangeReport::new(RangeOutcome::Skipped, Some(existing), attempts);
            }

            let outcome = self.request_allocation(session, &range.id, quantity).await;
            attempts.push(AllocationAttempt {
                attempt,
                quantity,
                timeout: cfg.allocation_timeout(quantity),
                outcome,
            });
            if outcome.is_success() {
                info!(id = %range.id, quantity, "range filled");
                return RangeReport::new(RangeOutcome::Success { quantity }, Some(existing), attempts);
            }
        }

        warn!(id = %range.id, "all reduction attempts failed");
        RangeReport::new(RangeOutcome::Failed, Some(existing), attempts)
    }
}
