//! Source descriptors.
//!
//! A `SourceDescriptor` is the immutable configuration snapshot a capture loop
//! is started with. Changing a source means building a new descriptor and a new
//! loop; a running loop's descriptor is never mutated.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ingest::synthetic::SyntheticConfig;
use crate::MAX_SOURCES;

/// URL schemes accepted for network sources.
const NETWORK_SCHEMES: &[&str] = &["rtsp", "rtsps", "http", "https", "stub"];

/// Prefix for synthetic targets (tests and hardware-free demos).
pub const STUB_PREFIX: &str = "stub://";

/// Where a source's frames come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Network stream; the target is a connection URI.
    #[default]
    #[serde(rename = "rtsp")]
    Network,
    /// Locally attached capture device; the target is a device ordinal.
    Local,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Network => "rtsp",
            SourceKind::Local => "local",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rtsp" | "network" => Ok(SourceKind::Network),
            "local" | "device" => Ok(SourceKind::Local),
            other => Err(anyhow!("unknown source type '{}' (expected rtsp|local)", other)),
        }
    }
}

/// Configuration snapshot for one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub enabled: bool,
    pub kind: SourceKind,
    /// Connection URI for network sources, device ordinal for local ones.
    pub target: String,
    pub display_name: String,
}

impl SourceDescriptor {
    /// Disabled descriptor with an empty target, as returned for unconfigured slots.
    pub fn disabled(index: usize) -> Self {
        Self {
            enabled: false,
            kind: SourceKind::Network,
            target: String::new(),
            display_name: default_name(index),
        }
    }

    pub fn network(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            kind: SourceKind::Network,
            target: url.into(),
            display_name: display_name.into(),
        }
    }

    pub fn local(device: u32, display_name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            kind: SourceKind::Local,
            target: device.to_string(),
            display_name: display_name.into(),
        }
    }

    pub fn is_stub(&self) -> bool {
        self.target.starts_with(STUB_PREFIX)
    }

    /// Device ordinal of a local source.
    pub fn device_ordinal(&self) -> Result<u32> {
        self.target
            .trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("local device '{}' is not a device ordinal", self.target))
    }

    /// Reject descriptors that must never reach a capture loop.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            SourceKind::Network => {
                let target = self.target.trim();
                if target.is_empty() {
                    bail!("RTSP URL is empty");
                }
                let url = Url::parse(target)
                    .map_err(|e| anyhow!("invalid stream URL {}: {}", self.display_target(), e))?;
                if !NETWORK_SCHEMES.contains(&url.scheme()) {
                    bail!(
                        "unsupported stream scheme '{}' (expected one of {})",
                        url.scheme(),
                        NETWORK_SCHEMES.join(", ")
                    );
                }
                if self.is_stub() {
                    SyntheticConfig::parse(target)?;
                }
            }
            SourceKind::Local => {
                if self.is_stub() {
                    bail!(
                        "local source '{}' must be a device ordinal",
                        self.target
                    );
                }
                self.device_ordinal()?;
            }
        }
        Ok(())
    }

    /// Target suitable for logs: embedded passwords are replaced by `***`.
    pub fn display_target(&self) -> String {
        match self.kind {
            SourceKind::Local => self.target.clone(),
            SourceKind::Network => redact_url(&self.target),
        }
    }
}

/// Check a source index against the fixed slot count.
pub fn validate_index(index: usize) -> Result<()> {
    if index >= MAX_SOURCES {
        bail!(
            "source index {} out of range (0..{})",
            index,
            MAX_SOURCES
        );
    }
    Ok(())
}

pub(crate) fn default_name(index: usize) -> String {
    format!("Camera {}", index + 1)
}

fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.password().is_some() && url.set_password(Some("***")).is_err() {
        return "<redacted>".to_string();
    }
    url.to_string()
}
