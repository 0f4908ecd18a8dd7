use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureTiming;
use crate::store::DEFAULT_STORE_PATH;

const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;
const DEFAULT_RELOAD_POLL_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
struct IngestdConfigFile {
    sources_path: Option<PathBuf>,
    status: Option<StatusConfigFile>,
    reload: Option<ReloadConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StatusConfigFile {
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ReloadConfigFile {
    poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    frame_interval_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    error_backoff_ms: Option<u64>,
    max_read_failures: Option<u32>,
    stop_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct IngestdConfig {
    /// Source store (48-slot JSON file).
    pub sources_path: PathBuf,
    /// How often the daemon logs per-source status. Zero disables it.
    pub status_interval: Duration,
    /// How often the daemon checks the source store for changes.
    pub reload_poll: Duration,
    pub capture: CaptureTiming,
}

impl IngestdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TUYERE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: IngestdConfigFile) -> Self {
        let defaults = CaptureTiming::default();
        let capture = file.capture.unwrap_or_default();
        let ms_or = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        Self {
            sources_path: file
                .sources_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            status_interval: Duration::from_secs(
                file.status
                    .and_then(|status| status.interval_secs)
                    .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS),
            ),
            reload_poll: Duration::from_millis(
                file.reload
                    .and_then(|reload| reload.poll_ms)
                    .unwrap_or(DEFAULT_RELOAD_POLL_MS),
            ),
            capture: CaptureTiming {
                frame_interval: ms_or(capture.frame_interval_ms, defaults.frame_interval),
                retry_delay: ms_or(capture.retry_delay_ms, defaults.retry_delay),
                error_backoff: ms_or(capture.error_backoff_ms, defaults.error_backoff),
                max_read_failures: capture
                    .max_read_failures
                    .unwrap_or(defaults.max_read_failures),
                stop_timeout: ms_or(capture.stop_timeout_ms, defaults.stop_timeout),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("TUYERE_SOURCES_PATH") {
            if !path.trim().is_empty() {
                self.sources_path = PathBuf::from(path);
            }
        }
        if let Ok(secs) = std::env::var("TUYERE_STATUS_INTERVAL_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("TUYERE_STATUS_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.status_interval = Duration::from_secs(secs);
        }
        if let Ok(ms) = std::env::var("TUYERE_RELOAD_POLL_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                anyhow!("TUYERE_RELOAD_POLL_MS must be an integer number of milliseconds")
            })?;
            self.reload_poll = Duration::from_millis(ms);
        }
        if let Ok(ms) = std::env::var("TUYERE_FRAME_INTERVAL_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                anyhow!("TUYERE_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.capture.frame_interval = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sources_path.as_os_str().is_empty() {
            return Err(anyhow!("sources_path must not be empty"));
        }
        if self.reload_poll.is_zero() {
            return Err(anyhow!("reload poll interval must be greater than zero"));
        }
        if self.capture.frame_interval.is_zero() {
            return Err(anyhow!("capture frame interval must be greater than zero"));
        }
        if self.capture.stop_timeout.is_zero() {
            return Err(anyhow!("capture stop timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// `.toml` files are parsed as TOML, everything else as JSON.
fn read_config_file(path: &Path) -> Result<IngestdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
