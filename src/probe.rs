//! One-shot connection test.
//!
//! Opens a candidate descriptor, reads a single frame and releases the
//! connection. Used by configuration tooling; the probe never joins a
//! supervisor's pool and never publishes frames.

use crate::ingest::SourceOpener;
use crate::source::{SourceDescriptor, SourceKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub message: String,
    /// Dimensions of the frame read, when one was read.
    pub dimensions: Option<(u32, u32)>,
}

impl ProbeOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            dimensions: None,
        }
    }
}

/// Open, read one frame, release. Never panics on backend errors.
pub fn test_connection(opener: &dyn SourceOpener, descriptor: &SourceDescriptor) -> ProbeOutcome {
    if let Err(err) = descriptor.validate() {
        return ProbeOutcome::failed(err.to_string());
    }
    let not_connected = match descriptor.kind {
        SourceKind::Network => "Failed to connect to RTSP stream".to_string(),
        SourceKind::Local => format!(
            "Failed to connect to local camera device {}",
            descriptor.target
        ),
    };

    let mut backend = match opener.open(descriptor) {
        Ok(backend) => backend,
        Err(err) => {
            log::debug!(
                "probe of {} failed to open: {:#}",
                descriptor.display_target(),
                err
            );
            return ProbeOutcome::failed(not_connected);
        }
    };
    let read = backend.read_frame();
    backend.release();

    match read {
        Ok(Some(frame)) => ProbeOutcome {
            success: true,
            message: "Connection successful".to_string(),
            dimensions: Some((frame.width, frame.height)),
        },
        Ok(None) => ProbeOutcome::failed(not_connected),
        Err(err) => ProbeOutcome::failed(format!("Error testing connection: {:#}", err)),
    }
}
