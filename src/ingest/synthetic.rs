//! Synthetic frame source.
//!
//! Targets of the form `stub://<name>?width=W&height=H&fail_after=N` produce
//! deterministic RGB24 frames without any hardware or network:
//! - `width`/`height` default to 640x480
//! - `fail_after=N` makes every read after the Nth return empty (simulated unplug)
//! - the host `unreachable` refuses to open

use anyhow::{anyhow, bail, Result};
use url::Url;

use super::CaptureBackend;
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
/// Largest frame a stub target may request (8K UHD).
pub const MAX_WIDTH: u32 = 7680;
pub const MAX_HEIGHT: u32 = 4320;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fail_after: Option<u64>,
}

impl SyntheticConfig {
    pub fn parse(target: &str) -> Result<Self> {
        let url = Url::parse(target).map_err(|e| anyhow!("invalid stub target {}: {}", target, e))?;
        if url.scheme() != "stub" {
            bail!("not a stub target: {}", target);
        }
        let mut config = Self {
            name: url.host_str().unwrap_or_default().to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fail_after: None,
        };
        for (key, value) in url.query_pairs() {
            match &*key {
                "width" => config.width = parse_param(&key, &value)?,
                "height" => config.height = parse_param(&key, &value)?,
                "fail_after" => config.fail_after = Some(parse_param(&key, &value)?),
                other => log::debug!("stub target {}: ignoring parameter '{}'", target, other),
            }
        }
        if config.width == 0 || config.height == 0 {
            bail!("stub target {} has zero frame dimensions", target);
        }
        if config.width > MAX_WIDTH || config.height > MAX_HEIGHT {
            bail!(
                "stub target {} frame {}x{} exceeds {}x{}",
                target,
                config.width,
                config.height,
                MAX_WIDTH,
                MAX_HEIGHT
            );
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter {}={} is not a number", key, value))
}

/// Synthetic capture backend.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    released: bool,
}

impl SyntheticSource {
    pub fn open(target: &str) -> Result<Self> {
        let config = SyntheticConfig::parse(target)?;
        if config.name == "unreachable" {
            bail!("stub source {} is unreachable", target);
        }
        log::info!(
            "SyntheticSource: opened {} ({}x{})",
            config.name,
            config.width,
            config.height
        );
        Ok(Self {
            config,
            frame_count: 0,
            released: false,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Moving diagonal gradient so consecutive frames differ.
    fn generate_pixels(&self) -> Result<Vec<u8>> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = self.frame_count as usize;
        let len = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(3))
            .ok_or_else(|| anyhow!("synthetic frame size overflow"))?;
        let mut pixels = vec![0u8; len];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl CaptureBackend for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            bail!("synthetic source {} already released", self.config.name);
        }
        if let Some(limit) = self.config.fail_after {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        Ok(Some(Frame::new(
            self.generate_pixels()?,
            self.config.width,
            self.config.height,
        )))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameters() -> Result<()> {
        let cfg = SyntheticConfig::parse("stub://dock?width=32&height=16&fail_after=3")?;
        assert_eq!(cfg.name, "dock");
        assert_eq!((cfg.width, cfg.height), (32, 16));
        assert_eq!(cfg.fail_after, Some(3));
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::parse("stub://dock?width=abc").is_err());
        assert!(SyntheticConfig::parse("stub://dock?width=0").is_err());
        assert!(SyntheticConfig::parse("rtsp://dock").is_err());
    }

    #[test]
    fn rejects_oversized_frames() -> Result<()> {
        assert!(SyntheticConfig::parse("stub://x?width=100000&height=100000").is_err());
        assert!(SyntheticConfig::parse("stub://x?width=4294967295&height=4294967295").is_err());
        assert!(SyntheticConfig::parse("stub://x?width=7681&height=2").is_err());
        assert!(SyntheticSource::open("stub://x?width=2&height=4321").is_err());

        let cfg = SyntheticConfig::parse("stub://x?width=7680&height=4320")?;
        assert_eq!((cfg.width, cfg.height), (MAX_WIDTH, MAX_HEIGHT));
        Ok(())
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = SyntheticSource::open("stub://dock?width=4&height=2")?;
        let first = source.read_frame()?.expect("frame");
        let second = source.read_frame()?.expect("frame");
        assert_eq!(first.byte_len(), 4 * 2 * 3);
        assert_ne!(first, second, "consecutive frames must differ");
        assert_eq!(source.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn fail_after_returns_empty_reads() -> Result<()> {
        let mut source = SyntheticSource::open("stub://dock?width=2&height=2&fail_after=2")?;
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_none());
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn read_after_release_is_an_error() -> Result<()> {
        let mut source = SyntheticSource::open("stub://dock?width=2&height=2")?;
        source.release();
        assert!(source.read_frame().is_err());
        Ok(())
    }
}
