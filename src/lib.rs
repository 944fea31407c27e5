//! yuyv-capture: single-buffer V4L2 capture with YUYV to RGBA conversion
//!
//! This library drives a V4L2 camera through a small capture state machine
//! with one memory-mapped buffer, and converts the packed YUYV frames it
//! produces into RGBA. The device sits behind a trait, so the state machine
//! runs against real hardware or a mock device in tests.

pub mod config;
pub mod convert;
pub mod describe;
pub mod device;
pub mod pacing;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use convert::{convert_yuyv_to_rgba, RgbaFrame};
pub use device::V4L2Device;
pub use pacing::{run_capture_loop, FramePacer, LoopControl, PacingStats};
pub use session::{smallest_resolution, CaptureSession, CaptureState, FrameReadiness, FrameView};
pub use traits::{
    CameraDevice, CameraError, DeviceCapabilities, FourCC, FrameMetadata, NegotiatedFormat,
    Resolution,
};
