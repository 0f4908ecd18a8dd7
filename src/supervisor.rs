//! Capture supervisor.
//!
//! Owns the index → capture loop map and is the only access point for frames
//! and connectivity. The map is mutated only by `reload`, `stop` and
//! `stop_all`, which take `&mut self`; callers serialize reconfiguration.
//! `get_frame` and `is_connected` take `&self` and never wait on a worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::capture::{CaptureHandle, CaptureState, CaptureTiming};
use crate::frame::Frame;
use crate::ingest::{DefaultOpener, SourceOpener};
use crate::source::{validate_index, SourceDescriptor};
use crate::store::SourceConfigStore;
use crate::MAX_SOURCES;

/// What a reload did with each descriptor it was given.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub started: Vec<usize>,
    pub disabled: Vec<usize>,
    /// Descriptors refused before reaching a capture loop, with the reason.
    pub rejected: Vec<(usize, String)>,
}

/// Point-in-time status of one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStatus {
    pub index: usize,
    pub name: String,
    pub state: CaptureState,
    pub connected: bool,
    pub frames_captured: u64,
    pub consecutive_read_failures: u32,
}

pub struct CaptureSupervisor {
    opener: Arc<dyn SourceOpener>,
    timing: CaptureTiming,
    loops: HashMap<usize, CaptureHandle>,
}

impl CaptureSupervisor {
    pub fn new(opener: Arc<dyn SourceOpener>, timing: CaptureTiming) -> Self {
        Self {
            opener,
            timing,
            loops: HashMap::with_capacity(MAX_SOURCES),
        }
    }

    /// Supervisor backed by the production backends.
    pub fn with_default_opener(timing: CaptureTiming) -> Self {
        Self::new(Arc::new(DefaultOpener), timing)
    }

    pub fn timing(&self) -> CaptureTiming {
        self.timing
    }

    /// Replace every running loop with loops for the enabled descriptors.
    ///
    /// All current loops are stopped (and their resources released, within the
    /// stop timeout) before any new loop starts. Disabled descriptors get no
    /// loop; invalid ones are rejected and logged.
    pub fn reload(&mut self, configs: &BTreeMap<usize, SourceDescriptor>) -> ReloadReport {
        self.stop_all();

        let mut report = ReloadReport::default();
        for (&index, descriptor) in configs {
            if !descriptor.enabled {
                log::debug!("source {} is disabled, not starting", index + 1);
                report.disabled.push(index);
                continue;
            }
            if let Err(err) = validate_index(index).and_then(|_| descriptor.validate()) {
                log::error!("source {}: rejected configuration: {}", index + 1, err);
                report.rejected.push((index, err.to_string()));
                continue;
            }
            match CaptureHandle::spawn(index, descriptor.clone(), self.opener.clone(), self.timing)
            {
                Ok(handle) => {
                    log::info!("started capture loop for source {}", index + 1);
                    self.loops.insert(index, handle);
                    report.started.push(index);
                }
                Err(err) => {
                    log::error!("source {}: {:#}", index + 1, err);
                    report.rejected.push((index, format!("{:#}", err)));
                }
            }
        }
        log::info!(
            "reload complete: {} started, {} disabled, {} rejected",
            report.started.len(),
            report.disabled.len(),
            report.rejected.len()
        );
        report
    }

    /// Reload from every slot of a configuration store.
    pub fn reload_from(&mut self, store: &SourceConfigStore) -> ReloadReport {
        self.reload(&store.descriptors())
    }

    /// Freshest frame of a connected source; `None` otherwise.
    pub fn get_frame(&self, index: usize) -> Option<Frame> {
        let handle = self.loops.get(&index)?;
        if !handle.is_connected() {
            return None;
        }
        handle.pop_latest()
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.loops
            .get(&index)
            .is_some_and(CaptureHandle::is_connected)
    }

    /// `Disabled` when no loop exists for the index.
    pub fn state(&self, index: usize) -> CaptureState {
        self.loops
            .get(&index)
            .map_or(CaptureState::Disabled, CaptureHandle::state)
    }

    /// Stop one loop and forget it. No-op when the index has no loop.
    pub fn stop(&mut self, index: usize) {
        let Some(handle) = self.loops.remove(&index) else {
            return;
        };
        if let Err(err) = handle.stop(self.timing.stop_timeout) {
            log::warn!("{:#}", err);
        }
        log::info!("stopped capture loop for source {}", index + 1);
    }

    /// Stop every loop. All workers are signalled first, then awaited against
    /// one shared deadline, so teardown does not scale with the source count.
    pub fn stop_all(&mut self) {
        if self.loops.is_empty() {
            return;
        }
        let mut handles: Vec<CaptureHandle> = self.loops.drain().map(|(_, h)| h).collect();
        for handle in &mut handles {
            handle.signal_stop();
        }
        let deadline = Instant::now() + self.timing.stop_timeout;
        let mut lingering = 0;
        for mut handle in handles {
            if !handle.wait_until(deadline) {
                lingering += 1;
                log::warn!(
                    "source {}: capture thread did not stop within {:?}",
                    handle.index() + 1,
                    self.timing.stop_timeout
                );
            }
        }
        if lingering == 0 {
            log::info!("stopped all capture loops");
        } else {
            log::warn!("stopped all capture loops ({} still exiting)", lingering);
        }
    }

    /// Number of loops currently owned (including ones that already exited on
    /// their own and wait for the next reload).
    pub fn active_count(&self) -> usize {
        self.loops.len()
    }

    pub fn connected_count(&self) -> usize {
        self.loops.values().filter(|h| h.is_connected()).count()
    }

    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.loops.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Status of every owned loop, ordered by index.
    pub fn snapshot(&self) -> Vec<SourceStatus> {
        self.indices()
            .into_iter()
            .filter_map(|index| self.loops.get(&index))
            .map(|handle| SourceStatus {
                index: handle.index(),
                name: handle.descriptor().display_name.clone(),
                state: handle.state(),
                connected: handle.is_connected(),
                frames_captured: handle.frames_captured(),
                consecutive_read_failures: handle.consecutive_failures(),
            })
            .collect()
    }
}

impl Drop for CaptureSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
