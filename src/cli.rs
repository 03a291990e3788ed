//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Assembles the
//! configuration (TOML file, then flag overrides), then runs one subcommand.

use anyhow::{Context, Result};
use rangefill::checkpoint::ProgressStore;
use rangefill::ranges::RangeEnumerator;
use rangefill::session::SessionManager;
use rangefill::{Credentials, HarvestConfig, Harvester, Termination};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Cli;

// ── Configuration ───────────────────────────────────────────────

/// Config file plus command-line overrides, not yet validated.
fn load_config(cli: &Cli) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading config {}", path.display()),
        None => "loading default config".to_string(),
    })?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(path) = &cli.progress_file {
        config.progress_file = path.clone();
    }
    if let Some(target) = cli.target {
        config.target_count = target;
    }
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    Ok(config)
}

fn session_config(cli: &Cli) -> Result<Arc<HarvestConfig>> {
    let config = load_config(cli)?;
    config.validate()?;
    Ok(Arc::new(config))
}

fn credentials(cli: &Cli) -> Result<Credentials> {
    let username = cli.username.as_deref().ok_or_else(|| {
        anyhow::anyhow!("username is required (set via --username or RANGEFILL_USERNAME)")
    })?;
    let password = cli.password.as_deref().ok_or_else(|| {
        anyhow::anyhow!("password is required (set via --password or RANGEFILL_PASSWORD)")
    })?;
    Ok(Credentials::new(username, password))
}

/// Cancel `token` on SIGINT or SIGTERM. A further SIGINT exits with 130.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = sigterm.recv() => {},
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        warn!("interrupt received, stopping after the current request (Ctrl+C again to force quit)");
        token.cancel();

        // every finished range is already on disk
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt, exiting immediately");
            std::process::exit(130);
        }
    });
}

// ── Subcommands ─────────────────────────────────────────────────

pub fn run_harvest(cli: &Cli) -> Result<()> {
    let config = session_config(cli)?;
    let credentials = credentials(cli)?;
    info!(
        base_url = %config.base_url,
        target = config.target_count,
        page_size = config.page_size,
        progress_file = %config.progress_file.display(),
        "rangefill starting"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let cancel = CancellationToken::new();
        spawn_signal_handler(cancel.clone());
        Harvester::new(config, credentials, cancel).run().await
    })?;

    match summary.termination {
        Termination::Completed => info!("all ranges visited"),
        Termination::Interrupted => info!("progress saved, rerun to resume"),
        Termination::SessionLost => warn!("session lost, rerun to resume"),
    }
    Ok(())
}

pub fn run_status(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let store = ProgressStore::new(config.progress_file);
    match store
        .try_load()
        .with_context(|| format!("reading {}", store.path().display()))?
    {
        Some(record) => {
            println!("Progress file: {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => println!("No saved progress at {}", store.path().display()),
    }
    Ok(())
}

pub fn run_reset(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let store = ProgressStore::new(config.progress_file);
    store
        .clear()
        .with_context(|| format!("removing {}", store.path().display()))?;
    println!("Cleared progress at {}", store.path().display());
    Ok(())
}

pub fn run_check(cli: &Cli) -> Result<()> {
    let config = session_config(cli)?;
    let credentials = credentials(cli)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let sessions = SessionManager::new(Arc::clone(&config), credentials);
        let session = sessions.login().await.context("login failed")?;
        if !session.check_health().await {
            anyhow::bail!("session is not authenticated after login");
        }
        let total = RangeEnumerator::new(Arc::clone(&config))
            .total_count(&session)
            .await
            .context("could not discover total range count")?;
        println!("Login OK, {} ranges available", total);
        Ok::<(), anyhow::Error>(())
    })
}
