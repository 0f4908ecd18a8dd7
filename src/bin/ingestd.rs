//! ingestd - Tuyere capture daemon
//!
//! This daemon:
//! 1. Loads the 48-slot source store
//! 2. Starts one capture loop per enabled source
//! 3. Reloads every loop when the source store changes on disk
//! 4. Logs per-source connectivity at a fixed interval
//! 5. Stops all loops and releases every connection on Ctrl-C

use anyhow::Result;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Instant, SystemTime};

use tuyere_capture::config::IngestdConfig;
use tuyere_capture::{CaptureSupervisor, SourceConfigStore, MAX_SOURCES};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = IngestdConfig::load()?;
    log::info!(
        "ingestd {} starting. sources={} slots={}",
        env!("CARGO_PKG_VERSION"),
        cfg.sources_path.display(),
        MAX_SOURCES
    );
    log::info!(
        "capture timing: frame_interval={:?} retry_delay={:?} error_backoff={:?} max_read_failures={}",
        cfg.capture.frame_interval,
        cfg.capture.retry_delay,
        cfg.capture.error_backoff,
        cfg.capture.max_read_failures
    );

    let store = SourceConfigStore::open(&cfg.sources_path)?;
    let mut last_modified = modified_at(store.path());
    let mut supervisor = CaptureSupervisor::with_default_opener(cfg.capture);
    supervisor.reload_from(&store);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    let mut last_status_log = Instant::now();
    loop {
        match rx.recv_timeout(cfg.reload_poll) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => {
                log::info!("shutdown signal received, stopping capture loops...");
                break;
            }
        }

        let modified = modified_at(&cfg.sources_path);
        if modified != last_modified {
            last_modified = modified;
            log::info!("source store changed, reloading");
            match SourceConfigStore::open(&cfg.sources_path) {
                Ok(store) => {
                    supervisor.reload_from(&store);
                }
                Err(err) => log::error!("source store reload failed: {:#}", err),
            }
        }

        if !cfg.status_interval.is_zero() && last_status_log.elapsed() >= cfg.status_interval {
            log_status(&supervisor);
            last_status_log = Instant::now();
        }
    }

    supervisor.stop_all();
    log::info!("ingestd stopped");
    Ok(())
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn log_status(supervisor: &CaptureSupervisor) {
    log::info!(
        "sources: {}/{} connected",
        supervisor.connected_count(),
        supervisor.active_count()
    );
    for status in supervisor.snapshot() {
        log::debug!(
            "source {} ({}): state={} connected={} frames={} empty_reads={}",
            status.index + 1,
            status.name,
            status.state,
            status.connected,
            status.frames_captured,
            status.consecutive_read_failures
        );
    }
}
