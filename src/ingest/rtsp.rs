//! Network stream source.
//!
//! `RtspSource` decodes RTSP (and plain HTTP) streams through GStreamer into
//! packed RGB24 frames. The pipeline keeps transport buffering to a minimum:
//! - `rtspsrc latency=0` for RTSP, so the jitter buffer does not hold frames
//! - `appsink max-buffers=1 drop=true sync=false`, so a slow reader only ever
//!   sees the newest decoded frame
//!
//! Built without the `rtsp-gstreamer` feature, opening a network source fails
//! and the capture loop lands in `Failed`.

use anyhow::Result;

use super::CaptureBackend;
use crate::frame::Frame;

/// Time allowed for the pipeline to reach Playing before the open is failed.
pub const OPEN_TIMEOUT_SECS: u64 = 5;

/// Upper bound on a single blocking read.
pub const READ_TIMEOUT_MS: u64 = 500;

/// Network stream capture backend.
pub struct RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    inner: GstreamerSource,
}

impl RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    pub fn open(url: &str) -> Result<Self> {
        Ok(Self {
            inner: GstreamerSource::open(url)?,
        })
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    pub fn open(_url: &str) -> Result<Self> {
        anyhow::bail!("network streams require the rtsp-gstreamer feature")
    }

    pub fn frames_captured(&self) -> u64 {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            self.inner.frame_count
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            0
        }
    }
}

impl CaptureBackend for RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.read_frame()
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(None)
    }

    fn release(&mut self) {
        #[cfg(feature = "rtsp-gstreamer")]
        self.inner.release();
    }
}

/// Build the launch line for a stream URL.
pub fn pipeline_description(url: &str) -> String {
    let sink = "videoconvert ! video/x-raw,format=RGB ! \
                appsink name=appsink sync=false max-buffers=1 drop=true";
    let escaped = url.replace('"', "%22");
    if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
        format!(
            "rtspsrc location=\"{}\" latency=0 drop-on-latency=true ! decodebin ! {}",
            escaped, sink
        )
    } else {
        format!("uridecodebin uri=\"{}\" ! {}", escaped, sink)
    }
}

// ----------------------------------------------------------------------------
// GStreamer pipeline
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    released: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    fn open(url: &str) -> Result<Self> {
        use anyhow::{anyhow, Context};

        gstreamer::init().context("initialize gstreamer")?;

        let pipeline = gstreamer::parse::launch(&pipeline_description(url))
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        let source = Self {
            pipeline,
            appsink,
            frame_count: 0,
            released: false,
        };
        // From here on `source` owns the pipeline; dropping it on error resets it.
        source
            .pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;
        let (result, _, _) = source
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
        let change = result.map_err(|_| anyhow!("stream pipeline failed to start"))?;
        check_started(change)?;
        if let Some(err) = source.pending_error() {
            return Err(anyhow!(err));
        }
        Ok(source)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(err) = self.pending_error() {
            log::debug!("stream pipeline reported: {}", err);
            return Ok(None);
        }
        let Some(sample) = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(READ_TIMEOUT_MS))
        else {
            return Ok(None);
        };
        let frame = sample_to_frame(&sample)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("failed to stop stream pipeline: {}", err);
        }
    }

    /// Drain the bus and report the first error or end-of-stream.
    fn pending_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let mut first = None;
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            let found = match message.view() {
                MessageView::Error(err) => Some(format!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                )),
                MessageView::Eos(..) => Some("stream reached end".to_string()),
                _ => None,
            };
            if first.is_none() {
                first = found;
            }
        }
        first
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// `Async` after the bounded wait means the pipeline never prerolled.
#[cfg(feature = "rtsp-gstreamer")]
fn check_started(change: gstreamer::StateChangeSuccess) -> Result<()> {
    match change {
        gstreamer::StateChangeSuccess::Async => Err(anyhow::anyhow!(
            "stream did not start within {}s",
            OPEN_TIMEOUT_SECS
        )),
        _ => Ok(()),
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    use anyhow::Context;

    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map stream buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok(Frame::new(data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("stream buffer row is out of bounds")?,
        );
    }

    Ok(Frame::new(pixels, width, height))
}
