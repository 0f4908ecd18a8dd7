//! Capture backends.
//!
//! This module provides the connection side of a capture loop:
//! - RTSP / HTTP streams (feature: rtsp-gstreamer)
//! - Local V4L2 devices by ordinal (feature: ingest-v4l2)
//! - Synthetic `stub://` sources (always available; tests and demos)
//!
//! A `SourceOpener` turns a descriptor into an open `CaptureBackend`. The
//! capture loop owns the backend exclusively and releases it exactly once.
//!
//! Read results have three shapes:
//! - `Ok(Some(frame))`: a decoded frame
//! - `Ok(None)`: an empty read (dropped frame, stall, device gone). Counted
//!   against the consecutive-failure budget.
//! - `Err(_)`: an unexpected fault. Logged and retried after a longer pause,
//!   without touching the failure budget.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod rtsp;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;
use crate::source::{SourceDescriptor, SourceKind};

pub use rtsp::RtspSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// An open connection to one source.
///
/// Implementations hold the OS-level resource (socket, pipeline, device handle).
pub trait CaptureBackend: Send {
    /// Read one frame. See the module docs for the meaning of each result.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource. Called once, before the backend is dropped.
    fn release(&mut self);
}

/// Opens capture backends from descriptors.
///
/// Shared by every capture loop of a supervisor, so it must be `Sync`.
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureBackend>>;
}

/// Production opener: routes by target prefix and source kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureBackend>> {
        if descriptor.is_stub() {
            return Ok(Box::new(SyntheticSource::open(&descriptor.target)?));
        }
        match descriptor.kind {
            SourceKind::Network => Ok(Box::new(RtspSource::open(&descriptor.target)?)),
            SourceKind::Local => open_local(descriptor),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_local(descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureBackend>> {
    let ordinal = descriptor.device_ordinal()?;
    Ok(Box::new(V4l2Source::open(ordinal)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_local(descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureBackend>> {
    anyhow::bail!(
        "local device {} requires the ingest-v4l2 feature",
        descriptor.target
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opener_opens_stub_targets() -> Result<()> {
        let desc = SourceDescriptor::network("stub://yard?width=8&height=4", "Yard");
        let mut backend = DefaultOpener.open(&desc)?;
        let frame = backend.read_frame()?.expect("synthetic frame");
        assert_eq!((frame.width, frame.height), (8, 4));
        backend.release();
        Ok(())
    }

    #[test]
    fn default_opener_fails_on_unreachable_stub() {
        let desc = SourceDescriptor::network("stub://unreachable", "Yard");
        assert!(DefaultOpener.open(&desc).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn local_without_v4l2_feature_fails_to_open() {
        let desc = SourceDescriptor::local(0, "Desk");
        let err = DefaultOpener.open(&desc).err().expect("open must fail");
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
