//! Per-source capture loop.
//!
//! Each enabled source gets one worker thread that owns its backend and runs
//! the connection/read state machine:
//!
//! ```text
//! Connecting --open ok, first frame--> Connected <--frame-- Reconnecting
//!     |                                    |  empty read ->      |
//!     | open failed                        |                     | > max empty reads
//!     v                                    v                     v
//!   Failed                    Stopped (stop signal, any state)  Failed
//! ```
//!
//! - An open failure is terminal. The loop exits and is not retried.
//! - Empty reads are retried after `retry_delay` on the same connection; more
//!   than `max_read_failures` in a row releases the connection and exits.
//! - Backend errors are logged and retried after `error_backoff`. They do not
//!   count toward `max_read_failures`.
//!
//! The only state shared with other threads is `LoopStatus` (atomics) and the
//! `HandoffBuffer`. Readers never touch the backend.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::{Frame, HandoffBuffer};
use crate::ingest::{CaptureBackend, SourceOpener};
use crate::source::SourceDescriptor;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_READ_FAILURES: u32 = 5;
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Pacing and failure thresholds for a capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureTiming {
    /// Pause after each good frame (caps the loop near 30 iterations/s).
    pub frame_interval: Duration,
    /// Pause before retrying after an empty read.
    pub retry_delay: Duration,
    /// Pause after an unexpected backend error.
    pub error_backoff: Duration,
    /// Consecutive empty reads tolerated; one more and the source is lost.
    pub max_read_failures: u32,
    /// How long `stop` waits for a worker to release its backend.
    pub stop_timeout: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_read_failures: DEFAULT_MAX_READ_FAILURES,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// No loop exists for the source.
    Disabled,
    Connecting,
    Connected,
    /// Connection held, retrying after empty reads.
    Reconnecting,
    /// Open failed or the source was lost. Only a reload brings it back.
    Failed,
    Stopped,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureState::Disabled | CaptureState::Failed | CaptureState::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Disabled => "disabled",
            CaptureState::Connecting => "connecting",
            CaptureState::Connected => "connected",
            CaptureState::Reconnecting => "reconnecting",
            CaptureState::Failed => "failed",
            CaptureState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a worker publishes for readers on other threads.
#[derive(Debug)]
struct LoopStatus {
    state: Mutex<CaptureState>,
    connected: AtomicBool,
    consecutive_failures: AtomicU32,
    frames_captured: AtomicU64,
}

impl LoopStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Connecting),
            connected: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            frames_captured: AtomicU64::new(0),
        }
    }

    fn state(&self) -> CaptureState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

// ----------------------------------------------------------------------------
// Stop signalling
// ----------------------------------------------------------------------------

/// Worker side of the stop signal. The handle never sends; dropping its
/// `Sender` disconnects the channel, which every check below observes.
struct StopListener {
    rx: Receiver<()>,
}

impl StopListener {
    fn is_stopped(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `duration` unless stopped first. Returns true when stopped.
    fn sleep(&self, duration: Duration) -> bool {
        !matches!(self.rx.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }
}

/// Marks the loop disconnected however the worker exits, including a panic
/// inside a backend.
struct ExitGuard {
    status: Arc<LoopStatus>,
    index: usize,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.status.connected.store(false, Ordering::SeqCst);
        if !self.status.state().is_terminal() {
            log::error!("source {}: capture worker exited abnormally", self.index + 1);
            self.status.set_state(CaptureState::Failed);
        }
    }
}

enum LoopExit {
    Stopped,
    Lost,
}

// ----------------------------------------------------------------------------
// CaptureLoop: worker body
// ----------------------------------------------------------------------------

struct CaptureLoop {
    index: usize,
    descriptor: SourceDescriptor,
    opener: Arc<dyn SourceOpener>,
    timing: CaptureTiming,
    status: Arc<LoopStatus>,
    buffer: Arc<HandoffBuffer>,
    stop: StopListener,
}

impl CaptureLoop {
    fn run(self) {
        let n = self.index + 1;
        let _guard = ExitGuard {
            status: self.status.clone(),
            index: self.index,
        };

        log::info!(
            "source {} ({}): opening {} {}",
            n,
            self.descriptor.display_name,
            self.descriptor.kind,
            self.descriptor.display_target()
        );
        let mut backend = match self.opener.open(&self.descriptor) {
            Ok(backend) => backend,
            Err(err) => {
                log::error!("source {}: failed to open source: {:#}", n, err);
                self.status.set_state(CaptureState::Failed);
                return;
            }
        };

        let exit = self.read_loop(backend.as_mut());
        backend.release();
        drop(backend);

        self.status.connected.store(false, Ordering::SeqCst);
        match exit {
            LoopExit::Stopped => {
                self.status.set_state(CaptureState::Stopped);
                log::info!("source {}: stopped", n);
            }
            LoopExit::Lost => {
                self.status.set_state(CaptureState::Failed);
                log::info!("source {}: disconnected", n);
            }
        }
    }

    fn read_loop(&self, backend: &mut dyn CaptureBackend) -> LoopExit {
        let n = self.index + 1;
        let mut failures: u32 = 0;
        loop {
            if self.stop.is_stopped() {
                return LoopExit::Stopped;
            }
            match backend.read_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    self.status.consecutive_failures.store(0, Ordering::SeqCst);
                    self.buffer.push(frame);
                    self.status.frames_captured.fetch_add(1, Ordering::SeqCst);
                    if self.status.state() != CaptureState::Connected {
                        self.status.set_state(CaptureState::Connected);
                    }
                    if !self.status.connected.swap(true, Ordering::SeqCst) {
                        log::info!("source {}: connected", n);
                    }
                    if self.stop.sleep(self.timing.frame_interval) {
                        return LoopExit::Stopped;
                    }
                }
                Ok(None) => {
                    failures += 1;
                    self.status
                        .consecutive_failures
                        .store(failures, Ordering::SeqCst);
                    if failures > self.timing.max_read_failures {
                        log::warn!(
                            "source {}: connection lost after {} consecutive empty reads",
                            n,
                            failures
                        );
                        return LoopExit::Lost;
                    }
                    if self.status.connected.load(Ordering::SeqCst) {
                        self.status.set_state(CaptureState::Reconnecting);
                    }
                    log::debug!("source {}: empty read ({}), retrying", n, failures);
                    if self.stop.sleep(self.timing.retry_delay) {
                        return LoopExit::Stopped;
                    }
                }
                Err(err) => {
                    log::error!("source {}: error reading frame: {:#}", n, err);
                    if self.stop.sleep(self.timing.error_backoff) {
                        return LoopExit::Stopped;
                    }
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// CaptureHandle: owner side
// ----------------------------------------------------------------------------

/// Owner's handle on a running capture loop.
///
/// Dropping the handle signals the worker to stop without waiting for it.
pub struct CaptureHandle {
    index: usize,
    descriptor: SourceDescriptor,
    status: Arc<LoopStatus>,
    buffer: Arc<HandoffBuffer>,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    join: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Start a capture loop on its own thread. The open happens on that thread.
    pub fn spawn(
        index: usize,
        descriptor: SourceDescriptor,
        opener: Arc<dyn SourceOpener>,
        timing: CaptureTiming,
    ) -> Result<Self> {
        let status = Arc::new(LoopStatus::new());
        let buffer = Arc::new(HandoffBuffer::new());
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let worker = CaptureLoop {
            index,
            descriptor: descriptor.clone(),
            opener,
            timing,
            status: status.clone(),
            buffer: buffer.clone(),
            stop: StopListener { rx: stop_rx },
        };
        let join = std::thread::Builder::new()
            .name(format!("capture-{}", index + 1))
            .spawn(move || {
                // Dropped after the worker released its backend (or unwound).
                let _done = done_tx;
                worker.run();
            })
            .with_context(|| format!("spawn capture thread for source {}", index + 1))?;

        Ok(Self {
            index,
            descriptor,
            status,
            buffer,
            stop_tx: Some(stop_tx),
            done_rx,
            join: Some(join),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn is_connected(&self) -> bool {
        self.status.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CaptureState {
        self.status.state()
    }

    pub fn frames_captured(&self) -> u64 {
        self.status.frames_captured.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.status.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Freshest frame from the hand-off buffer. Never waits on the worker.
    pub fn pop_latest(&self) -> Option<Frame> {
        self.buffer.pop_latest()
    }

    pub fn buffer(&self) -> &HandoffBuffer {
        &self.buffer
    }

    /// Ask the worker to stop at its next check. Does not wait.
    pub fn signal_stop(&mut self) {
        self.stop_tx.take();
    }

    /// Wait until `deadline` for the worker to exit. Returns true once the
    /// worker has released its backend and been joined.
    pub fn wait_until(&mut self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => false,
            _ => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        log::error!("source {}: capture thread panicked", self.index + 1);
                    }
                }
                true
            }
        }
    }

    /// Signal stop and wait up to `timeout` for the worker to exit.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        self.signal_stop();
        if self.wait_until(Instant::now() + timeout) {
            Ok(())
        } else {
            Err(anyhow!(
                "source {}: capture thread did not stop within {:?}",
                self.index + 1,
                timeout
            ))
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
