//! Human-readable device reports.

use std::fmt;

use crate::traits::{CapabilityFlags, DeviceCapabilities, FourCC, FrameSizeKind};

const CAPABILITY_DESCRIPTIONS: [(CapabilityFlags, &str); 29] = [
    (CapabilityFlags::VIDEO_CAPTURE, "Single-planar video capture"),
    (CapabilityFlags::VIDEO_CAPTURE_MPLANE, "Multi-planar video capture"),
    (CapabilityFlags::VIDEO_OUTPUT, "Single-planar video output"),
    (CapabilityFlags::VIDEO_OUTPUT_MPLANE, "Multi-planar video output"),
    (CapabilityFlags::VIDEO_M2M, "Single-planar video memory-to-memory"),
    (CapabilityFlags::VIDEO_M2M_MPLANE, "Multi-planar video memory-to-memory"),
    (CapabilityFlags::VIDEO_OVERLAY, "Video overlay"),
    (CapabilityFlags::VBI_CAPTURE, "Raw VBI capture"),
    (CapabilityFlags::VBI_OUTPUT, "Raw VBI output"),
    (CapabilityFlags::SLICED_VBI_CAPTURE, "Sliced VBI capture"),
    (CapabilityFlags::SLICED_VBI_OUTPUT, "Sliced VBI output"),
    (CapabilityFlags::RDS_CAPTURE, "RDS data capture"),
    (CapabilityFlags::VIDEO_OUTPUT_OVERLAY, "Video output overlay (OSD)"),
    (CapabilityFlags::HW_FREQ_SEEK, "Hardware frequency seeking"),
    (CapabilityFlags::RDS_OUTPUT, "RDS encoder"),
    (CapabilityFlags::TUNER, "Tuner for RF-modulated video"),
    (CapabilityFlags::AUDIO, "Audio inputs or outputs"),
    (CapabilityFlags::RADIO, "Radio receiver"),
    (CapabilityFlags::MODULATOR, "Modulator for RF-modulated signals"),
    (CapabilityFlags::SDR_CAPTURE, "SDR capture"),
    (CapabilityFlags::EXT_PIX_FORMAT, "Extended pixel format fields"),
    (CapabilityFlags::SDR_OUTPUT, "SDR output"),
    (CapabilityFlags::META_CAPTURE, "Metadata capture"),
    (CapabilityFlags::META_OUTPUT, "Metadata output"),
    (CapabilityFlags::READ_WRITE, "read()/write() I/O"),
    (CapabilityFlags::ASYNC_IO, "Asynchronous I/O"),
    (CapabilityFlags::STREAMING, "Streaming I/O"),
    (CapabilityFlags::TOUCH, "Touch device"),
    (CapabilityFlags::DEVICE_CAPS, "Per-node device capabilities"),
];

/// Describe every set capability bit, in a fixed order.
///
/// Returns `["<none>"]` when no known bit is set.
pub fn describe_capabilities(flags: CapabilityFlags) -> Vec<&'static str> {
    let described: Vec<_> = CAPABILITY_DESCRIPTIONS
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, description)| *description)
        .collect();
    if described.is_empty() {
        vec!["<none>"]
    } else {
        described
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Device {} on {}, driver {}:",
            self.card, self.bus_info, self.driver
        )?;
        writeln!(f, "  Device features:")?;
        for description in describe_capabilities(self.flags) {
            writeln!(f, "    {description}")?;
        }
        Ok(())
    }
}

impl fmt::Display for FrameSizeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discrete(resolution) => write!(f, "Discrete {resolution} frames"),
            Self::Stepwise { min, max, .. } => write!(
                f,
                "Stepwise {}-{}x{}-{} frames",
                min.width, max.width, min.height, max.height
            ),
            Self::Continuous { .. } => f.write_str("Continuous frame size."),
        }
    }
}

/// A pixel format the device offers and the frame sizes it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatReport {
    /// Pixel format code.
    pub fourcc: FourCC,
    /// Driver-provided description.
    pub description: String,
    /// Whether the format is compressed.
    pub compressed: bool,
    /// Whether the format is emulated in software.
    pub emulated: bool,
    /// Supported frame sizes.
    pub frame_sizes: Vec<FrameSizeKind>,
}

impl fmt::Display for FormatReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  {}", self.description)?;
        match (self.compressed, self.emulated) {
            (true, true) => f.write_str(" (compressed, emulated)")?,
            (true, false) => f.write_str(" (compressed)")?,
            (false, true) => f.write_str(" (emulated)")?,
            (false, false) => {}
        }
        writeln!(f)?;
        for frame_size in &self.frame_sizes {
            writeln!(f, "    {frame_size}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Resolution;

    #[test]
    fn test_describe_in_fixed_order() {
        let flags = CapabilityFlags::STREAMING | CapabilityFlags::VIDEO_CAPTURE;
        assert_eq!(
            describe_capabilities(flags),
            vec!["Single-planar video capture", "Streaming I/O"]
        );
    }

    #[test]
    fn test_describe_empty() {
        assert_eq!(describe_capabilities(CapabilityFlags::empty()), vec!["<none>"]);
    }

    #[test]
    fn test_memory_to_memory_bits() {
        // V4L2_CAP_VIDEO_M2M_MPLANE = 0x4000, V4L2_CAP_VIDEO_M2M = 0x8000
        assert_eq!(
            describe_capabilities(CapabilityFlags::from_bits_truncate(0x0000_8000)),
            vec!["Single-planar video memory-to-memory"]
        );
        assert_eq!(
            describe_capabilities(CapabilityFlags::from_bits_truncate(0x0000_4000)),
            vec!["Multi-planar video memory-to-memory"]
        );
    }

    #[test]
    fn test_every_flag_described() {
        assert_eq!(
            describe_capabilities(CapabilityFlags::all()).len(),
            CAPABILITY_DESCRIPTIONS.len()
        );
    }

    #[test]
    fn test_capabilities_display() {
        let caps = DeviceCapabilities {
            driver: "vivid".to_owned(),
            card: "vivid".to_owned(),
            bus_info: "platform:vivid-000".to_owned(),
            flags: CapabilityFlags::VIDEO_CAPTURE | CapabilityFlags::STREAMING,
        };
        let text = caps.to_string();

        assert!(text.starts_with("Device vivid on platform:vivid-000, driver vivid:"));
        assert!(text.contains("    Single-planar video capture\n"));
        assert!(text.contains("    Streaming I/O\n"));
    }

    #[test]
    fn test_format_report_display() {
        let report = FormatReport {
            fourcc: FourCC::YUYV,
            description: "YUYV 4:2:2".to_owned(),
            compressed: false,
            emulated: true,
            frame_sizes: vec![
                FrameSizeKind::Discrete(Resolution::new(640, 480)),
                FrameSizeKind::Stepwise {
                    min: Resolution::new(16, 16),
                    max: Resolution::new(1920, 1080),
                    step: Resolution::new(16, 16),
                },
                FrameSizeKind::Continuous {
                    min: Resolution::new(16, 16),
                    max: Resolution::new(1920, 1080),
                },
            ],
        };

        assert_eq!(
            report.to_string(),
            "  YUYV 4:2:2 (emulated)\n    Discrete 640x480 frames\n    \
             Stepwise 16-1920x16-1080 frames\n    Continuous frame size.\n"
        );
    }
}
