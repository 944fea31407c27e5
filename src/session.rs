//! Single-buffer capture session.
//!
//! A [`CaptureSession`] drives one device through
//! `Opened -> Configured -> Streaming` with exactly one memory-mapped
//! buffer. Frames are fetched by enqueueing the buffer with
//! [`begin_loading_next_frame`](CaptureSession::begin_loading_next_frame)
//! and polling [`frame_buffer`](CaptureSession::frame_buffer) until the
//! device hands it back. Neither call blocks.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::device::V4L2Device;
use crate::traits::{
    BufferLayout, CameraDevice, CameraError, DeviceCapabilities, Dequeue, Format, FourCC,
    FrameMetadata, FrameSizeKind, NegotiatedFormat, Resolution, Result,
};

/// Index of the single buffer a session uses.
const BUFFER_INDEX: u32 = 0;

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Device released. Terminal.
    Closed,
    /// Device open and validated, no buffer yet.
    Opened,
    /// Format negotiated and buffer described, not yet streaming.
    Configured,
    /// Buffer mapped and streaming enabled.
    Streaming,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// A borrowed view of the most recently filled frame.
///
/// Valid until the next call that needs the session mutably, which the
/// borrow checker enforces.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    /// Valid YUYV bytes of the frame.
    pub data: &'a [u8],
    /// Sequence, timestamp and byte count reported by the device.
    pub metadata: &'a FrameMetadata,
}

/// Result of polling for a frame.
#[derive(Debug, Clone, Copy)]
pub enum FrameReadiness<'a> {
    /// The buffer came back filled.
    Ready(FrameView<'a>),
    /// The device has not finished filling the buffer; poll again later.
    NotReady,
}

impl<'a> FrameReadiness<'a> {
    /// The frame, if one was ready.
    pub const fn ready(self) -> Option<FrameView<'a>> {
        match self {
            Self::Ready(view) => Some(view),
            Self::NotReady => None,
        }
    }
}

/// Capture session over a [`CameraDevice`].
///
/// Dropping the session closes it.
pub struct CaptureSession<D: CameraDevice = V4L2Device> {
    device: Option<D>,
    state: CaptureState,
    format: Option<NegotiatedFormat>,
    buffers_requested: bool,
    queued: bool,
    last_frame: FrameMetadata,
}

impl CaptureSession<V4L2Device> {
    /// Open the V4L2 device at `path` and validate its capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::DeviceOpenFailed`] if the node cannot be opened
    /// and [`CameraError::UnsupportedDevice`] if it lacks single-planar
    /// capture or streaming I/O. The device is released on failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let device = V4L2Device::open(path)?;
        Self::from_device(device)
    }
}

impl<D: CameraDevice> CaptureSession<D> {
    /// Wrap an already opened device, validating its capabilities.
    pub fn from_device(device: D) -> Result<Self> {
        let caps = device.capabilities();
        if !caps.is_supported() {
            return Err(CameraError::UnsupportedDevice {
                capabilities: caps.flags,
            });
        }
        info!(
            card = %caps.card,
            driver = %caps.driver,
            bus = %caps.bus_info,
            "Opened capture device"
        );

        Ok(Self {
            device: Some(device),
            state: CaptureState::Opened,
            format: None,
            buffers_requested: false,
            queued: false,
            last_frame: FrameMetadata {
                sequence: 0,
                timestamp: std::time::Duration::ZERO,
                bytes_used: 0,
            },
        })
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Capabilities of the open device, or `None` once closed.
    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.device.as_ref().map(CameraDevice::capabilities)
    }

    /// Format negotiated by [`configure`](Self::configure).
    pub const fn negotiated_format(&self) -> Option<&NegotiatedFormat> {
        self.format.as_ref()
    }

    /// The underlying device, or `None` once closed.
    pub const fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Whether an enqueued buffer is still outstanding.
    pub const fn is_buffer_queued(&self) -> bool {
        self.queued
    }

    fn device_mut(&mut self, operation: &'static str) -> Result<&mut D> {
        let state = self.state;
        self.device
            .as_mut()
            .ok_or(CameraError::InvalidState { operation, state })
    }

    fn require_streaming(&self, operation: &'static str) -> Result<()> {
        if self.state == CaptureState::Streaming {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Fill `out` with the discrete YUYV frame sizes the device supports.
    ///
    /// `out` is zeroed first, so unused slots read as `0x0`. Stepwise and
    /// continuous descriptors are skipped. Stops when the device runs out of
    /// entries or `out` is full. Returns the number of entries written.
    pub fn enumerate_resolutions_into(&mut self, out: &mut [Resolution]) -> Result<usize> {
        let device = self.device_mut("enumerate resolutions")?;
        out.fill(Resolution::default());

        let mut count = 0;
        for index in 0..=u32::MAX {
            let Some(slot) = out.get_mut(count) else {
                break;
            };
            let Some(kind) = device.frame_size(FourCC::YUYV, index)? else {
                break;
            };
            match kind {
                FrameSizeKind::Discrete(resolution) => {
                    *slot = resolution;
                    count += 1;
                }
                FrameSizeKind::Stepwise { min, max, .. } | FrameSizeKind::Continuous { min, max } => {
                    debug!(%min, %max, "Skipping ranged frame size");
                }
            }
        }

        debug!(count, "Enumerated YUYV resolutions");
        Ok(count)
    }

    /// Enumerate up to `max_count` discrete YUYV frame sizes.
    ///
    /// The result always holds `max_count` entries; slots past the last
    /// supported size are `0x0`.
    pub fn enumerate_resolutions(&mut self, max_count: usize) -> Result<Vec<Resolution>> {
        let mut resolutions = vec![Resolution::default(); max_count];
        self.enumerate_resolutions_into(&mut resolutions)?;
        Ok(resolutions)
    }

    /// Negotiate `width`x`height` YUYV, map the single buffer and start
    /// streaming.
    ///
    /// On failure every step already taken is undone and the session is back
    /// in [`CaptureState::Opened`]. A session can only be configured once;
    /// close and reopen it to change resolution.
    pub fn configure(&mut self, width: u32, height: u32) -> Result<()> {
        match self.state {
            CaptureState::Opened => {}
            CaptureState::Configured | CaptureState::Streaming => {
                return Err(CameraError::AlreadyConfigured);
            }
            CaptureState::Closed => {
                return Err(CameraError::InvalidState {
                    operation: "configure",
                    state: self.state,
                });
            }
        }

        if let Err(err) = self
            .negotiate(width, height)
            .and_then(|()| self.start_streaming())
        {
            warn!(error = %err, width, height, "Configuration failed, rolling back");
            self.rollback();
            return Err(err);
        }
        Ok(())
    }

    /// Set the format and describe the buffer. Opened -> Configured.
    fn negotiate(&mut self, width: u32, height: u32) -> Result<()> {
        let device = self.device_mut("configure")?;

        let requested = Format::new(width, height, FourCC::YUYV);
        let actual = device.set_format(&requested)?;
        if actual.fourcc != FourCC::YUYV {
            return Err(CameraError::FormatNotSupported {
                requested: FourCC::YUYV,
                actual: actual.fourcc,
            });
        }
        if actual.width != width || actual.height != height {
            warn!(
                requested = %Resolution::new(width, height),
                actual = %Resolution::new(actual.width, actual.height),
                "Driver adjusted resolution"
            );
        }

        let granted = device.request_buffers(1)?;
        self.buffers_requested = true;
        let device = self.device_mut("configure")?;
        if granted == 0 {
            return Err(CameraError::device(
                "request buffers",
                std::io::Error::other("driver granted no buffers"),
            ));
        }
        if granted > 1 {
            debug!(granted, "Driver granted extra buffers, using only the first");
        }
        let layout = device.query_buffer(BUFFER_INDEX)?;

        self.format = Some(NegotiatedFormat {
            width: actual.width,
            height: actual.height,
            fourcc: actual.fourcc,
            stride: actual.stride.max(actual.width.saturating_mul(2)),
            buffer_length: layout.length,
            buffer_offset: layout.offset,
        });
        self.state = CaptureState::Configured;
        Ok(())
    }

    /// Map and zero the buffer, then enable streaming. Configured -> Streaming.
    fn start_streaming(&mut self) -> Result<()> {
        let layout = self
            .format
            .as_ref()
            .map(|format| BufferLayout {
                length: format.buffer_length,
                offset: format.buffer_offset,
            })
            .ok_or(CameraError::InvalidState {
                operation: "start streaming",
                state: self.state,
            })?;

        let device = self.device_mut("start streaming")?;
        device.map_buffer(layout)?;
        if let Some(buffer) = device.mapped_buffer_mut() {
            buffer.fill(0);
        }
        device.stream_on()?;

        self.state = CaptureState::Streaming;
        if let Some(format) = &self.format {
            info!(
                resolution = %Resolution::new(format.width, format.height),
                stride = format.stride,
                buffer_length = format.buffer_length,
                "Streaming started"
            );
        }
        Ok(())
    }

    /// Undo a partial configuration, returning to Opened.
    fn rollback(&mut self) {
        if let Some(device) = self.device.as_mut() {
            if self.state == CaptureState::Streaming {
                if let Err(err) = device.stream_off() {
                    warn!(error = %err, "Failed to stop streaming during rollback");
                }
            }
            if let Err(err) = device.unmap_buffer() {
                warn!(error = %err, "Failed to unmap buffer during rollback");
            }
            if self.buffers_requested {
                if let Err(err) = device.request_buffers(0) {
                    warn!(error = %err, "Failed to release buffers during rollback");
                }
            }
        }
        self.format = None;
        self.buffers_requested = false;
        self.queued = false;
        self.state = CaptureState::Opened;
    }

    /// Hand the buffer to the device so it starts filling the next frame.
    ///
    /// Returns immediately. Only one enqueue may be outstanding; it is
    /// resolved when [`frame_buffer`](Self::frame_buffer) reports a ready
    /// frame.
    pub fn begin_loading_next_frame(&mut self) -> Result<()> {
        self.require_streaming("queue the frame buffer")?;
        if self.queued {
            return Err(CameraError::BufferAlreadyQueued);
        }
        self.device_mut("queue the frame buffer")?
            .queue_buffer(BUFFER_INDEX)?;
        self.queued = true;
        Ok(())
    }

    /// Poll for the outstanding frame without blocking.
    ///
    /// [`FrameReadiness::NotReady`] leaves the enqueue outstanding so the
    /// caller can poll again. A ready frame's data is truncated to the byte
    /// count the device reported, or the whole buffer if it reported zero.
    ///
    /// A device error also resolves the enqueue, so the caller may retry with
    /// [`begin_loading_next_frame`](Self::begin_loading_next_frame) or close.
    pub fn frame_buffer(&mut self) -> Result<FrameReadiness<'_>> {
        self.require_streaming("dequeue the frame buffer")?;
        if !self.queued {
            return Err(CameraError::NoBufferQueued);
        }

        let dequeued = match self.device_mut("dequeue the frame buffer")?.dequeue_buffer() {
            Ok(dequeued) => dequeued,
            Err(err) => {
                warn!(error = %err, "Dequeue failed");
                self.queued = false;
                return Err(err);
            }
        };
        let Dequeue::Filled {
            index,
            bytes_used,
            sequence,
            timestamp,
        } = dequeued
        else {
            return Ok(FrameReadiness::NotReady);
        };
        self.queued = false;
        if index != BUFFER_INDEX {
            warn!(index, "Device returned an unexpected buffer index");
        }

        let state = self.state;
        let buffer = self
            .device
            .as_ref()
            .and_then(CameraDevice::mapped_buffer)
            .ok_or(CameraError::InvalidState {
                operation: "read the frame buffer",
                state,
            })?;
        let len = match bytes_used as usize {
            0 => buffer.len(),
            n => n.min(buffer.len()),
        };

        self.last_frame = FrameMetadata {
            sequence,
            timestamp,
            bytes_used: len,
        };
        let data = buffer.get(..len).unwrap_or(buffer);
        Ok(FrameReadiness::Ready(FrameView {
            data,
            metadata: &self.last_frame,
        }))
    }

    /// Stop streaming, unmap the buffer and release the device.
    ///
    /// Safe to call in any state and more than once. Teardown failures are
    /// logged, not returned.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            if self.state == CaptureState::Streaming {
                if let Err(err) = device.stream_off() {
                    warn!(error = %err, "Failed to stop streaming");
                }
            }
            if let Err(err) = device.unmap_buffer() {
                warn!(error = %err, "Failed to unmap frame buffer");
            }
            drop(device);
            debug!("Capture session closed");
        }
        self.format = None;
        self.buffers_requested = false;
        self.queued = false;
        self.state = CaptureState::Closed;
    }
}

impl<D: CameraDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: CameraDevice> fmt::Debug for CaptureSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("state", &self.state)
            .field("format", &self.format)
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}

/// Pick the entry with the fewest pixels, ignoring everything from the first
/// `0x0` sentinel on. Ties go to the earliest entry.
#[must_use]
pub fn smallest_resolution(resolutions: &[Resolution]) -> Option<Resolution> {
    resolutions
        .iter()
        .take_while(|resolution| !resolution.is_empty())
        .min_by_key(|resolution| resolution.area())
        .copied()
}
