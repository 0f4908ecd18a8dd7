//! V4L2 local device source.
//!
//! `V4l2Source` opens `/dev/video<N>` for a device ordinal and captures frames
//! into memory-mapped buffers, converting them to packed RGB24.
//!
//! Format negotiation prefers YUYV (what nearly every UVC webcam offers) and
//! accepts RGB3. Anything else fails the open.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Duration;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::CaptureBackend;
use crate::frame::Frame;

/// Mapped buffers requested from the driver. Kept small to limit latency.
const STREAM_BUFFERS: u32 = 2;

/// Upper bound on a single blocking dequeue.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub fn device_path(ordinal: u32) -> String {
    format!("/dev/video{}", ordinal)
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

/// Local capture device backend.
pub struct V4l2Source {
    path: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl V4l2Source {
    pub fn open(ordinal: u32) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = device_path(ordinal);
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;

        let mut requested = device.format().context("read v4l2 format")?;
        requested.fourcc = v4l::FourCC::new(b"YUYV");
        let active = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set YUYV on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let format = PixelFormat::from_fourcc(&active.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} only offers unsupported format {}",
                path,
                active.fourcc
            )
        })?;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))?;
                stream.set_timeout(READ_TIMEOUT);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            path,
            active.width,
            active.height,
            format
        );
        Ok(Self {
            path,
            state: Some(state),
            format,
            width: active.width,
            height: active.height,
            frame_count: 0,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl CaptureBackend for V4l2Source {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device {} already released", self.path))?;
        let (format, width, height) = (self.format, self.width, self.height);
        // Dequeue errors (timeout, unplug) are empty reads; they count toward
        // the loop's failure budget.
        let pixels = state.with_stream_mut(|stream| match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };
                Some(normalize_to_rgb(&buf[..used], width, height, format))
            }
            Err(err) => {
                log::debug!("V4l2Source: dequeue failed: {}", err);
                None
            }
        });
        let Some(pixels) = pixels else {
            return Ok(None);
        };
        let pixels = pixels.with_context(|| format!("convert frame from {}", self.path))?;
        self.frame_count += 1;
        Ok(Some(Frame::new(pixels, width, height)))
    }

    fn release(&mut self) {
        // Dropping the stream unmaps buffers and stops streaming; dropping the
        // device closes the file descriptor.
        self.state.take();
    }
}
