//! Mock device implementation for testing without hardware.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    BufferLayout, CameraDevice, CameraError, CapabilityFlags, Dequeue, DeviceCapabilities, Format,
    FourCC, FrameSizeKind, Resolution, Result,
};

/// Shared record of the requests a [`MockDevice`] received, in order.
pub type OperationLog = Rc<RefCell<Vec<&'static str>>>;

/// How the mock reports `bytesused` for a filled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytesUsed {
    /// Report the negotiated frame size.
    FrameSize,
    /// Report zero, meaning "the whole buffer".
    Zero,
    /// Report a fixed value.
    Fixed(u32),
}

/// Mock device for testing without hardware.
///
/// Mirrors the kernel's single-buffer mmap rules closely enough to exercise
/// the capture state machine: buffers must be requested before they can be
/// queried, streaming needs buffers, and a buffer can only be queued once.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    frame_sizes: Vec<FrameSizeKind>,
    format: Format,
    forced_fourcc: Option<FourCC>,
    requested: u32,
    mapping: Option<Vec<u8>>,
    streaming: bool,
    queued: bool,
    ready_after: u32,
    polls: u32,
    bytes_used: BytesUsed,
    pattern: TestPattern,
    sequence: u32,
    failing: Vec<&'static str>,
    log: OperationLog,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                flags: CapabilityFlags::VIDEO_CAPTURE
                    | CapabilityFlags::STREAMING
                    | CapabilityFlags::READ_WRITE,
            },
            frame_sizes: vec![
                FrameSizeKind::Discrete(Resolution::new(640, 480)),
                FrameSizeKind::Discrete(Resolution::new(320, 240)),
                FrameSizeKind::Discrete(Resolution::new(1280, 720)),
            ],
            format: Format::new(640, 480, FourCC::YUYV),
            forced_fourcc: None,
            requested: 0,
            mapping: None,
            streaming: false,
            queued: false,
            ready_after: 0,
            polls: 0,
            bytes_used: BytesUsed::FrameSize,
            pattern: TestPattern::ColorBars,
            sequence: 0,
            failing: Vec::new(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Set the capability bits for this mock device.
    #[must_use]
    pub const fn with_capability_flags(mut self, flags: CapabilityFlags) -> Self {
        self.capabilities.flags = flags;
        self
    }

    /// Set the frame size descriptors reported for YUYV.
    #[must_use]
    pub fn with_frame_sizes(mut self, frame_sizes: Vec<FrameSizeKind>) -> Self {
        self.frame_sizes = frame_sizes;
        self
    }

    /// Make `set_format` answer with a different pixel format.
    #[must_use]
    pub const fn with_forced_fourcc(mut self, fourcc: FourCC) -> Self {
        self.forced_fourcc = Some(fourcc);
        self
    }

    /// Report `WouldBlock` for the first `polls` dequeues after each enqueue.
    #[must_use]
    pub const fn with_ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    /// Choose how `bytesused` is reported.
    #[must_use]
    pub const fn with_bytes_used(mut self, bytes_used: BytesUsed) -> Self {
        self.bytes_used = bytes_used;
        self
    }

    /// Set the test pattern written into the buffer on each filled dequeue.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Make the named request fail from now on.
    #[must_use]
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.failing.push(operation);
        self
    }

    /// Handle to the operation log. Stays valid after the device is dropped.
    pub fn operation_log(&self) -> OperationLog {
        Rc::clone(&self.log)
    }

    /// Whether streaming is currently enabled.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of buffers currently requested.
    pub const fn requested_buffers(&self) -> u32 {
        self.requested
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        self.log.borrow_mut().push(operation);
        if self.failing.contains(&operation) {
            return Err(CameraError::device(
                operation,
                io::Error::other("injected failure"),
            ));
        }
        Ok(())
    }

    fn rejected(operation: &'static str, errno: i32) -> CameraError {
        CameraError::device(operation, io::Error::from_raw_os_error(errno))
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.log.borrow_mut().push("close");
    }
}

impl CameraDevice for MockDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn frame_size(&mut self, fourcc: FourCC, index: u32) -> Result<Option<FrameSizeKind>> {
        self.record("frame_size")?;
        if fourcc != FourCC::YUYV {
            return Ok(None);
        }
        Ok(self.frame_sizes.get(index as usize).copied())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.record("set_format")?;
        if self.requested > 0 {
            return Err(Self::rejected("set_format", libc::EBUSY));
        }
        let fourcc = self.forced_fourcc.unwrap_or(format.fourcc);
        self.format = Format::new(format.width, format.height, fourcc);
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.record("request_buffers")?;
        if self.mapping.is_some() || self.streaming {
            return Err(Self::rejected("request_buffers", libc::EBUSY));
        }
        self.requested = count;
        Ok(count)
    }

    fn query_buffer(&mut self, index: u32) -> Result<BufferLayout> {
        self.record("query_buffer")?;
        if index >= self.requested {
            return Err(Self::rejected("query_buffer", libc::EINVAL));
        }
        Ok(BufferLayout {
            length: self.format.size as usize,
            offset: 0,
        })
    }

    fn map_buffer(&mut self, layout: BufferLayout) -> Result<()> {
        self.log.borrow_mut().push("map_buffer");
        if self.failing.contains(&"map_buffer") || self.mapping.is_some() {
            return Err(CameraError::MapFailed {
                length: layout.length,
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            });
        }
        // Filled with garbage so tests can observe the session zeroing it.
        self.mapping = Some(vec![0xEE; layout.length]);
        Ok(())
    }

    fn mapped_buffer(&self) -> Option<&[u8]> {
        self.mapping.as_deref()
    }

    fn mapped_buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.mapping.as_deref_mut()
    }

    fn unmap_buffer(&mut self) -> Result<()> {
        if self.mapping.take().is_some() {
            self.log.borrow_mut().push("unmap_buffer");
        }
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        self.record("stream_on")?;
        if self.requested == 0 {
            return Err(Self::rejected("stream_on", libc::EINVAL));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.record("stream_off")?;
        self.streaming = false;
        self.queued = false;
        self.polls = 0;
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        self.record("queue_buffer")?;
        if index >= self.requested || self.queued {
            return Err(Self::rejected("queue_buffer", libc::EINVAL));
        }
        self.queued = true;
        self.polls = 0;
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<Dequeue> {
        self.record("dequeue_buffer")?;
        if !self.streaming || !self.queued {
            return Err(Self::rejected("dequeue_buffer", libc::EINVAL));
        }
        if self.polls < self.ready_after {
            self.polls += 1;
            return Ok(Dequeue::WouldBlock);
        }

        let format = self.format.clone();
        let pattern = self.pattern;
        if let Some(buffer) = self.mapping.as_mut() {
            fill_test_frame(buffer, &format, pattern);
        }
        self.queued = false;

        let sequence = self.sequence;
        self.sequence += 1;
        let bytes_used = match self.bytes_used {
            BytesUsed::FrameSize => format.size,
            BytesUsed::Zero => 0,
            BytesUsed::Fixed(n) => n,
        };

        Ok(Dequeue::Filled {
            index: 0,
            bytes_used,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Generate a standalone YUYV frame for `format`.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.size as usize];
    fill_test_frame(&mut data, format, pattern);
    data
}

fn fill_test_frame(data: &mut [u8], format: &Format, pattern: TestPattern) {
    let stride = format.stride as usize;
    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(data, format.width, format.height, stride);
        }
        TestPattern::Gradient => {
            generate_gradient(data, format.width, format.height, stride);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(data, y, u, v);
        }
    }
}

fn put_macropixel(data: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    if let Some(macropixel) = data.get_mut(offset..offset + 4) {
        macropixel.copy_from_slice(&[y, u, y, v]);
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32, stride: usize) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height as usize {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];
            put_macropixel(data, y * stride + x as usize * 2, y_val, u_val, v_val);
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32, stride: usize) {
    for y in 0..height as usize {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            put_macropixel(data, y * stride + x as usize * 2, y_val, 128, 128);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for macropixel in data.chunks_exact_mut(4) {
        macropixel.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture());
        assert!(device.capabilities().can_stream());
    }

    #[test]
    fn test_mock_buffer_rules() {
        let mut device = MockDevice::new();
        assert!(device.query_buffer(0).is_err(), "no buffers requested yet");
        assert!(device.stream_on().is_err(), "streaming needs buffers");

        device.request_buffers(1).expect("request_buffers should succeed");
        let layout = device.query_buffer(0).expect("query_buffer should succeed");
        assert_eq!(layout.length, 640 * 480 * 2);

        device.map_buffer(layout).expect("map_buffer should succeed");
        assert!(device.map_buffer(layout).is_err(), "double map");

        device.stream_on().expect("stream_on should succeed");
        device.queue_buffer(0).expect("queue_buffer should succeed");
        assert!(device.queue_buffer(0).is_err(), "double queue");
    }

    #[test]
    fn test_mock_ready_after_polls() {
        let mut device = MockDevice::new().with_ready_after(2);
        device.request_buffers(1).expect("request_buffers should succeed");
        let layout = device.query_buffer(0).expect("query_buffer should succeed");
        device.map_buffer(layout).expect("map_buffer should succeed");
        device.stream_on().expect("stream_on should succeed");
        device.queue_buffer(0).expect("queue_buffer should succeed");

        assert_eq!(device.dequeue_buffer().ok(), Some(Dequeue::WouldBlock));
        assert_eq!(device.dequeue_buffer().ok(), Some(Dequeue::WouldBlock));
        let filled = device.dequeue_buffer().expect("dequeue should succeed");
        assert!(matches!(filled, Dequeue::Filled { sequence: 0, .. }));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        // Check frame size
        assert_eq!(data.len(), (640 * 480 * 2) as usize);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        // All Y values should be 128
        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);

        // U should be 64, V should be 192
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }
}
