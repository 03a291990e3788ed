//! # Harvester — End-to-End Acquisition Loop
//!
//! Drives one run: load progress, log in, size the collection, then walk it
//! page by page, handing every unprocessed range to the allocation engine and
//! checkpointing after each one.
//!
//! ## Lifecycle
//!
//! ```text
//! load progress ─> login ─> total count ─> [resume grace] ─┐
//!                  (fatal)   (fatal)                         v
//!   ┌──────────── page loop: fetch page (3 tries) ──────────┐
//!   │   per range: skip if processed │ allocate │ checkpoint │
//!   │   every N dispatched pages: health check ─> re-login   │
//!   └────────────────────────────────────────────────────────┘
//!        │ Completed          │ SessionLost        │ Interrupted
//!        └── summary, drop progress file when ≥ completion_ratio handled
//! ```
//!
//! ## Resumption
//!
//! `last_batch_number` only advances once a page has been fully dispatched,
//! so an interrupted page is enumerated again on the next run; its finished
//! ranges are skipped from the processed-set without any network call.
//!
//! ## Cancellation
//!
//! The token is checked before every page and every range. Pacing sleeps end
//! early when it fires; a request already in flight runs to completion or
//! timeout.

use crate::allocation::{AllocationEngine, RangeOutcome};
use crate::checkpoint::{ProgressRecord, ProgressStore, RunStats};
use crate::config::{Credentials, HarvestConfig};
use crate::progress::RunProgress;
use crate::ranges::{Range, RangeEnumerator};
use crate::session::{PanelSession, SessionManager};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every page of the collection was visited.
    Completed,
    /// The cancellation token fired.
    Interrupted,
    /// The session expired and logging in again failed.
    SessionLost,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub termination: Termination,
    pub total: u64,
    pub handled: u64,
    pub last_page: u64,
    pub stats: RunStats,
    /// The progress file was deleted because the run was near complete.
    pub progress_cleared: bool,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            termination = ?self.termination,
            handled = self.handled,
            total = self.total,
            last_page = self.last_page,
            successful = self.stats.successful,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            progress_cleared = self.progress_cleared,
            "run summary"
        );
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PageFlow {
    Continue,
    Interrupted,
}

pub struct Harvester {
    config: Arc<HarvestConfig>,
    sessions: SessionManager,
    enumerator: RangeEnumerator,
    engine: AllocationEngine,
    store: ProgressStore,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(config: Arc<HarvestConfig>, credentials: Credentials, cancel: CancellationToken) -> Self {
        Harvester {
            sessions: SessionManager::new(Arc::clone(&config), credentials),
            enumerator: RangeEnumerator::new(Arc::clone(&config)),
            engine: AllocationEngine::new(Arc::clone(&config)),
            store: ProgressStore::new(config.progress_file.clone()),
            cancel,
            config,
        }
    }

    /// Run until the collection is exhausted, the session is lost, or the
    /// token is cancelled. Errors only when the initial login or the initial
    /// total-count probe fails.
    pub async fn run(&self) -> Result<RunSummary> {
        let cfg = &self.config;
        let mut record = self.store.load();

        let mut session = self.sessions.login().await.context("initial login failed")?;
        let total = self
            .enumerator
            .total_count(&session)
            .await
            .context("could not discover total range count")?;

        info!(
            total,
            resume_from_page = record.last_batch_number + 1,
            already_processed = record.processed_ranges.len(),
            "starting acquisition"
        );
        let mut progress = RunProgress::new(
            total,
            record.processed_ranges.len() as u64,
            cfg.report_every,
        );

        if record.is_resume() {
            info!(
                grace_secs = cfg.resume_grace.as_secs_f64(),
                "resuming previous run, cancel now to abort"
            );
            if !crate::pause(cfg.resume_grace, &self.cancel).await {
                return Ok(self.interrupted(&mut record, &progress));
            }
        }

        let page_size = u64::from(cfg.page_size);
        let mut page = record.last_batch_number;
        let termination = loop {
            if self.cancel.is_cancelled() {
                break Termination::Interrupted;
            }
            page += 1;
            let start = (page - 1) * page_size;
            if start >= total {
                break Termination::Completed;
            }
            info!(
                page,
                first = start + 1,
                last = (start + page_size).min(total),
                "loading page"
            );

            let fetched = self
                .enumerator
                .fetch_page_with_retry(&session, start, cfg.page_size, &self.cancel)
                .await;
            // abandoned pages move straight on; empty pages only pace
            match fetched {
                None if self.cancel.is_cancelled() => break Termination::Interrupted,
                None => {
                    warn!(page, "page abandoned after all attempts");
                    record.complete_page(page);
                    self.checkpoint(&mut record);
                    continue;
                }
                Some(p) if p.ranges.is_empty() => {
                    info!(page, "no requestable ranges on page");
                    record.complete_page(page);
                    self.checkpoint(&mut record);
                    crate::pause(cfg.page_delay, &self.cancel).await;
                    continue;
                }
                Some(p) => {
                    let flow = self
                        .process_page(&session, &p.ranges, &mut record, &mut progress)
                        .instrument(info_span!("page", page))
                        .await;
                    if flow == PageFlow::Interrupted {
                        break Termination::Interrupted;
                    }
                }
            }
            record.complete_page(page);
            self.checkpoint(&mut record);

            if cfg.session_check_interval > 0 && page % u64::from(cfg.session_check_interval) == 0 {
                info!(page, "checking session health");
                if !session.check_health().await {
                    warn!("session expired, logging in again");
                    match self.sessions.login().await {
                        Ok(fresh) => session = fresh,
                        Err(e) => {
                            error!(error = %e, "re-login failed, stopping");
                            break Termination::SessionLost;
                        }
                    }
                }
            }

            info!(
                page,
                successful = record.stats.successful,
                skipped = record.stats.skipped,
                failed = record.stats.failed,
                "page complete"
            );
            crate::pause(cfg.page_delay, &self.cancel).await;
        };

        if termination == Termination::Interrupted {
            return Ok(self.interrupted(&mut record, &progress));
        }
        Ok(self.finish(termination, &record, &progress))
    }

    async fn process_page(
        &self,
        session: &PanelSession,
        ranges: &[Range],
        record: &mut ProgressRecord,
        progress: &mut RunProgress,
    ) -> PageFlow {
        for range in ranges {
            if self.cancel.is_cancelled() {
                return PageFlow::Interrupted;
            }
            if record.is_processed(&range.id) {
                info!(range = %range.name, id = %range.id, "already processed, skipping");
                continue;
            }

            let report = self
                .engine
                .process_range(session, range)
                .instrument(info_span!("range", id = %range.id))
                .await;
            match report.outcome {
                RangeOutcome::Success { .. } => record.stats.successful += 1,
                RangeOutcome::Skipped => record.stats.skipped += 1,
                RangeOutcome::Failed | RangeOutcome::Error => record.stats.failed += 1,
            }
            if report.outcome.marks_processed() {
                record.mark_processed(&range.id);
            }
            self.checkpoint(record);

            if progress.record_dispatch() {
                progress.print_status(&record.stats);
            }
            crate::pause(self.config.range_delay, &self.cancel).await;
        }
        PageFlow::Continue
    }

    fn checkpoint(&self, record: &mut ProgressRecord) {
        if let Err(e) = self.store.save(record) {
            error!(path = %self.store.path().display(), error = %e, "failed to save progress");
        }
    }

    fn interrupted(&self, record: &mut ProgressRecord, progress: &RunProgress) -> RunSummary {
        warn!(
            handled = progress.handled(),
            total = progress.total(),
            last_page = record.last_batch_number,
            "stopped by user, saving progress"
        );
        self.checkpoint(record);
        let summary = RunSummary {
            termination: Termination::Interrupted,
            total: progress.total(),
            handled: progress.handled(),
            last_page: record.last_batch_number,
            stats: record.stats,
            progress_cleared: false,
        };
        summary.log();
        summary
    }

    fn finish(&self, termination: Termination, record: &ProgressRecord, progress: &RunProgress) -> RunSummary {
        let mut progress_cleared = false;
        if progress.near_complete(self.config.completion_ratio) {
            info!(path = %self.store.path().display(), "run nearly complete, removing progress file");
            match self.store.clear() {
                Ok(()) => progress_cleared = true,
                Err(e) => warn!(error = %e, "failed to remove progress file"),
            }
        }
        let summary = RunSummary {
            termination,
            total: progress.total(),
            handled: progress.handled(),
            last_page: record.last_batch_number,
            stats: record.stats,
            progress_cleared,
        };
        summary.log();
        summary
    }
}
