//! Core traits and types for the single-buffer YUYV capture pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;


/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2; // YUYV is 2 bytes per pixel
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// A discrete frame size. `0x0` is the "no more entries" sentinel in
/// enumeration output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether this entry is the zero sentinel.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels in a frame of this size.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One frame size descriptor reported by the device for a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeKind {
    /// A single supported size.
    Discrete(Resolution),
    /// A range of sizes with a fixed step.
    Stepwise {
        /// Smallest supported size.
        min: Resolution,
        /// Largest supported size.
        max: Resolution,
        /// Step between supported sizes.
        step: Resolution,
    },
    /// Any size between `min` and `max`.
    Continuous {
        /// Smallest supported size.
        min: Resolution,
        /// Largest supported size.
        max: Resolution,
    },
}

/// Size and mmap offset of a device buffer, as reported by the buffer query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferLayout {
    /// Buffer length in bytes.
    pub length: usize,
    /// Offset to pass to the mapping primitive.
    pub offset: usize,
}

/// Format fixed for the lifetime of a configured session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Frame width in pixels, as applied by the driver.
    pub width: u32,
    /// Frame height in pixels, as applied by the driver.
    pub height: u32,
    /// Always [`FourCC::YUYV`].
    pub fourcc: FourCC,
    /// Bytes per line of the captured frame.
    pub stride: u32,
    /// Length of the single mapped buffer.
    pub buffer_length: usize,
    /// Offset the buffer was mapped at.
    pub buffer_offset: usize,
}

/// V4L2 device capability bits (`V4L2_CAP_*`), as reported for the node.
pub use v4l::capability::Flags as CapabilityFlags;

/// Bits a device must carry for this crate to drive it.
pub const REQUIRED_CAPABILITIES: CapabilityFlags = CapabilityFlags::from_bits_truncate(
    CapabilityFlags::VIDEO_CAPTURE.bits() | CapabilityFlags::STREAMING.bits(),
);

/// Device identity and capability snapshot, captured once at open time.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Raw capability bitmask.
    pub flags: CapabilityFlags,
}

// v4l's flag set has no `Default`, so this cannot be derived.
impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            driver: String::new(),
            card: String::new(),
            bus_info: String::new(),
            flags: CapabilityFlags::empty(),
        }
    }
}

impl DeviceCapabilities {
    /// Whether the device can capture single-planar video.
    pub const fn can_capture(&self) -> bool {
        self.flags.contains(CapabilityFlags::VIDEO_CAPTURE)
    }

    /// Whether the device supports streaming I/O.
    pub const fn can_stream(&self) -> bool {
        self.flags.contains(CapabilityFlags::STREAMING)
    }

    /// Whether both required bits are set.
    pub const fn is_supported(&self) -> bool {
        self.flags.contains(REQUIRED_CAPABILITIES)
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes of valid data in the frame buffer.
    pub bytes_used: usize,
}

/// Outcome of a single dequeue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeue {
    /// The device handed back a filled buffer.
    Filled {
        /// Buffer index.
        index: u32,
        /// Device-reported bytes used; 0 means the whole buffer.
        bytes_used: u32,
        /// Driver sequence counter.
        sequence: u32,
        /// Driver timestamp.
        timestamp: Duration,
    },
    /// No filled buffer is available yet.
    WouldBlock,
}

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Failed to open the device file.
    #[error("failed to open device {}: {source}", .path.display())]
    DeviceOpenFailed {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The device lacks single-planar capture or streaming I/O.
    #[error("device does not support single-planar capture with streaming I/O (capabilities {:#010x})", .capabilities.bits())]
    UnsupportedDevice {
        /// Capabilities reported by the device.
        capabilities: CapabilityFlags,
    },
    /// The driver did not accept the requested pixel format.
    #[error("format not supported: requested {requested}, device chose {actual}")]
    FormatNotSupported {
        /// Pixel format requested.
        requested: FourCC,
        /// Pixel format the driver applied.
        actual: FourCC,
    },
    /// Configure was called on a session that already has a mapped buffer.
    #[error("session is already configured; close and reopen it to change resolution")]
    AlreadyConfigured,
    /// The session is not in a state that permits the operation.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State the session was in.
        state: crate::session::CaptureState,
    },
    /// An enqueue was issued while the single buffer is still with the device.
    #[error("frame buffer is already queued")]
    BufferAlreadyQueued,
    /// A dequeue was issued with no outstanding enqueue.
    #[error("no frame buffer is queued")]
    NoBufferQueued,
    /// A device request failed.
    #[error("{operation} failed: {source}")]
    Device {
        /// Request that failed.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Mapping the frame buffer into memory failed.
    #[error("failed to map {length} byte frame buffer: {source}")]
    MapFailed {
        /// Requested mapping length.
        length: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Conversion geometry does not satisfy the converter's preconditions.
    #[error("invalid conversion geometry: {0}")]
    BadGeometry(String),
}

impl CameraError {
    /// Build a [`CameraError::Device`] from a failed request.
    pub const fn device(operation: &'static str, source: io::Error) -> Self {
        Self::Device { operation, source }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the device requests a capture session needs.
///
/// The device owns the mapped frame buffer; callers only borrow it through
/// [`mapped_buffer`](CameraDevice::mapped_buffer).
pub trait CameraDevice {
    /// Capability snapshot taken when the device was opened.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Query the frame size descriptor at `index` for `fourcc`.
    ///
    /// Returns `Ok(None)` once `index` is past the last entry.
    fn frame_size(&mut self, fourcc: FourCC, index: u32) -> Result<Option<FrameSizeKind>>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Request `count` mmap buffers. Returns the number the driver granted.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Query length and offset of buffer `index`.
    fn query_buffer(&mut self, index: u32) -> Result<BufferLayout>;

    /// Map the buffer described by `layout` read/write.
    fn map_buffer(&mut self, layout: BufferLayout) -> Result<()>;

    /// The mapped buffer, if any.
    fn mapped_buffer(&self) -> Option<&[u8]>;

    /// The mapped buffer, mutably, if any.
    fn mapped_buffer_mut(&mut self) -> Option<&mut [u8]>;

    /// Release the mapping. A no-op when nothing is mapped.
    fn unmap_buffer(&mut self) -> Result<()>;

    /// Enable streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Disable streaming, returning all buffers to userspace.
    fn stream_off(&mut self) -> Result<()>;

    /// Hand buffer `index` to the device for filling.
    fn queue_buffer(&mut self, index: u32) -> Result<()>;

    /// Take back a filled buffer without blocking.
    fn dequeue_buffer(&mut self) -> Result<Dequeue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCC::YUYV.to_string(), "YUYV");
        assert_eq!(FourCC::new(b"MJPG"), FourCC::MJPG);
    }

    #[test]
    fn test_fourcc_v4l_round_trip() {
        let fourcc: v4l::FourCC = FourCC::YUYV.into();
        assert_eq!(FourCC::from(fourcc), FourCC::YUYV);
    }

    #[test]
    fn test_format_new_computes_stride() {
        let format = Format::new(640, 480, FourCC::YUYV);
        assert_eq!(format.stride, 1280);
        assert_eq!(format.size, 1280 * 480);
    }

    #[test]
    fn test_resolution_sentinel() {
        assert!(Resolution::default().is_empty());
        assert!(Resolution::new(640, 0).is_empty());
        assert!(!Resolution::new(640, 480).is_empty());
        assert_eq!(Resolution::new(640, 480).area(), 307_200);
        assert_eq!(Resolution::new(320, 240).to_string(), "320x240");
    }

    #[test]
    fn test_required_capabilities() {
        let mut caps = DeviceCapabilities {
            flags: CapabilityFlags::VIDEO_CAPTURE,
            ..DeviceCapabilities::default()
        };
        assert!(caps.can_capture());
        assert!(!caps.can_stream());
        assert!(!caps.is_supported());

        caps.flags |= CapabilityFlags::STREAMING;
        assert!(caps.is_supported());
        assert_eq!(REQUIRED_CAPABILITIES.bits(), 0x0400_0001);
    }

    #[test]
    fn test_unsupported_device_message_shows_bits() {
        let err = CameraError::UnsupportedDevice {
            capabilities: CapabilityFlags::VIDEO_CAPTURE,
        };
        assert!(err.to_string().contains("0x00000001"));
    }
}
