//! Tuyere capture engine
//!
//! Ingests live video from up to 48 independently configured sources (network
//! streams or local capture devices) and keeps the most recent frame of each
//! available with minimal latency.
//!
//! # Architecture
//!
//! The engine holds these properties by construction:
//!
//! 1. **Isolation**: One worker thread per source, owning its own connection and
//!    buffer. No frame state is shared between sources.
//! 2. **Containment**: A failing source only ever shows up as "not connected". No
//!    error crosses from a capture loop into the supervisor or a sibling loop.
//! 3. **Bounded memory**: Each source buffers at most two queued frames plus the
//!    latest one, whatever the consumer does.
//! 4. **Non-blocking reads**: `get_frame` and `is_connected` never wait on a worker.
//! 5. **Explicit reconfiguration**: Failed and disabled sources only come back
//!    through `reload`.
//!
//! # Module Structure
//!
//! - `frame`: Frame values and the per-source `HandoffBuffer`
//! - `source`: Source descriptors and validation
//! - `store`: 48-slot source configuration store
//! - `ingest`: Capture backends (RTSP, V4L2, synthetic)
//! - `capture`: Capture loop state machine and worker handle
//! - `supervisor`: `CaptureSupervisor`, the external access point
//! - `probe`: One-shot connection test
//! - `config`: Daemon configuration

pub mod capture;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod probe;
pub mod source;
pub mod store;
pub mod supervisor;

/// Fixed number of source slots.
pub const MAX_SOURCES: usize = 48;

pub use capture::{CaptureHandle, CaptureState, CaptureTiming};
pub use frame::{Frame, HandoffBuffer, HANDOFF_CAPACITY};
pub use ingest::{CaptureBackend, DefaultOpener, SourceOpener};
pub use probe::{test_connection, ProbeOutcome};
pub use source::{SourceDescriptor, SourceKind};
pub use store::SourceConfigStore;
pub use supervisor::{CaptureSupervisor, ReloadReport, SourceStatus};
