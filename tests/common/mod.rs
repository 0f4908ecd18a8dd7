//! Scripted capture backends for integration tests.
//!
//! Targets look like `stub://cam-<tag>`; every frame a backend produces is a
//! 1x1 image whose three bytes equal `<tag>`, so tests can tell sources apart.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tuyere_capture::{CaptureBackend, CaptureTiming, Frame, SourceDescriptor, SourceOpener};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Frame,
    Empty,
    Error,
    /// Block inside the read call, then return a frame.
    Block(Duration),
}

#[derive(Clone, Debug)]
pub struct Plan {
    pub opens: bool,
    pub steps: Vec<Step>,
    /// Repeated forever once `steps` is exhausted.
    pub then: Step,
}

impl Plan {
    pub fn healthy() -> Self {
        Self {
            opens: true,
            steps: Vec::new(),
            then: Step::Frame,
        }
    }

    pub fn unopenable() -> Self {
        Self {
            opens: false,
            ..Self::healthy()
        }
    }

    pub fn script(steps: Vec<Step>, then: Step) -> Self {
        Self {
            opens: true,
            steps,
            then,
        }
    }
}

/// Opener whose backends follow per-target plans and count live handles.
#[derive(Default)]
pub struct ScriptedOpener {
    plans: Mutex<HashMap<String, Plan>>,
    open_handles: Arc<AtomicUsize>,
    open_calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_plan(&self, target: &str, plan: Plan) {
        self.plans.lock().unwrap().insert(target.to_string(), plan);
    }

    /// Handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self, target: &str) -> usize {
        self.open_calls
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(0)
    }
}

impl SourceOpener for ScriptedOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn CaptureBackend>> {
        *self
            .open_calls
            .lock()
            .unwrap()
            .entry(descriptor.target.clone())
            .or_default() += 1;
        let plan = self
            .plans
            .lock()
            .unwrap()
            .get(&descriptor.target)
            .cloned()
            .unwrap_or_else(Plan::healthy);
        if !plan.opens {
            bail!("cannot open {}", descriptor.target);
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBackend {
            tag: tag_of(&descriptor.target),
            plan,
            cursor: 0,
            handles: self.open_handles.clone(),
            released: false,
        }))
    }
}

struct ScriptedBackend {
    tag: u8,
    plan: Plan,
    cursor: usize,
    handles: Arc<AtomicUsize>,
    released: bool,
}

impl CaptureBackend for ScriptedBackend {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let step = self
            .plan
            .steps
            .get(self.cursor)
            .copied()
            .unwrap_or(self.plan.then);
        self.cursor += 1;
        match step {
            Step::Frame => Ok(Some(Frame::new(vec![self.tag; 3], 1, 1))),
            Step::Empty => Ok(None),
            Step::Error => bail!("scripted fault"),
            Step::Block(duration) => {
                std::thread::sleep(duration);
                Ok(Some(Frame::new(vec![self.tag; 3], 1, 1)))
            }
        }
    }

    fn release(&mut self) {
        assert!(!self.released, "backend released twice");
        self.released = true;
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn target(tag: usize) -> String {
    format!("stub://cam-{}", tag)
}

fn tag_of(target: &str) -> u8 {
    target
        .rsplit('-')
        .next()
        .and_then(|tag| tag.parse::<u8>().ok())
        .unwrap_or(0)
}

pub fn fast_timing() -> CaptureTiming {
    CaptureTiming {
        frame_interval: Duration::from_millis(1),
        retry_delay: Duration::from_millis(1),
        error_backoff: Duration::from_millis(1),
        max_read_failures: 5,
        stop_timeout: Duration::from_secs(2),
    }
}

pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn enabled(tag: usize) -> SourceDescriptor {
    SourceDescriptor::network(target(tag), format!("Camera {}", tag + 1))
}
