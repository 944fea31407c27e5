//! V4L2 device implementation using the v4l crate.
//!
//! Capability, format and frame size queries go through the v4l crate's safe
//! API. The single-buffer streaming path (request, query, map, queue,
//! dequeue) uses its raw ioctl layer, since the safe streams cannot separate
//! enqueue from a non-blocking dequeue.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fmt;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::format::description::Flags as FormatFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_frmsizeenum, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::Device;

use crate::describe::FormatReport;
use crate::traits::{
    BufferLayout, CameraDevice, CameraError, CapabilityFlags, Dequeue, DeviceCapabilities, Format,
    FourCC, FrameSizeKind, Resolution, Result,
};

const BUF_TYPE: u32 = Type::VideoCapture as u32;
const MEMORY: u32 = Memory::Mmap as u32;

/// Issue a raw V4L2 request, naming it in the error on failure.
macro_rules! ioctl {
    ($fd:expr, $request:ident, $arg:ident) => {
        // SAFETY: `$arg` is a live local of the argument type `$request`
        // expects, exclusively borrowed for the duration of the call.
        unsafe {
            v4l2::ioctl(
                $fd,
                v4l2::vidioc::$request,
                ptr::addr_of_mut!($arg).cast::<c_void>(),
            )
        }
        .map_err(|source| CameraError::device(stringify!($request), source))
    };
}

/// A read/write shared mapping of one device buffer. Unmapped on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` points at `len` mapped bytes that stay valid until
        // `self` is dropped.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees no other view exists.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn unmap(self) -> io::Result<()> {
        let this = mem::ManuallyDrop::new(self);
        // SAFETY: the region was returned by mmap with this length and is not
        // referenced past this point.
        unsafe { v4l2::munmap(this.ptr.as_ptr().cast::<c_void>(), this.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: see `unmap`.
        if let Err(err) = unsafe { v4l2::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } {
            warn!(error = %err, "Failed to unmap frame buffer");
        }
    }
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    // Declared before `device` so the buffer is unmapped before the fd closes.
    mapping: Option<Mapping>,
    device: Device,
    path: PathBuf,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device node (e.g., `/dev/video0`) in non-blocking mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let device = Device::with_path(path).map_err(|source| CameraError::DeviceOpenFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let caps = device
            .query_caps()
            .map_err(|source| CameraError::device("VIDIOC_QUERYCAP", source))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            flags: caps.capabilities,
        };
        debug!(path = %path.display(), flags = ?capabilities.flags, "Queried device capabilities");

        Ok(Self {
            mapping: None,
            device,
            path: path.to_path_buf(),
            capabilities,
        })
    }

    /// Device node this device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every pixel format the device offers, with its frame sizes.
    pub fn formats(&self) -> Result<Vec<FormatReport>> {
        let descriptions = match self.device.enum_formats() {
            Ok(descriptions) => descriptions,
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => Vec::new(),
            Err(source) => return Err(CameraError::device("VIDIOC_ENUM_FMT", source)),
        };

        descriptions
            .into_iter()
            .map(|desc| {
                let fourcc = FourCC::from(desc.fourcc);
                Ok(FormatReport {
                    fourcc,
                    description: desc.description,
                    compressed: desc.flags.contains(FormatFlags::COMPRESSED),
                    emulated: desc.flags.contains(FormatFlags::EMULATED),
                    frame_sizes: self.query_frame_sizes(fourcc)?,
                })
            })
            .collect()
    }

    fn fd(&self) -> std::os::raw::c_int {
        self.device.handle().fd()
    }

    fn query_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSizeKind>> {
        let mut sizes = Vec::new();
        for index in 0..=u32::MAX {
            match self.enum_frame_size(fourcc, index)? {
                Some(kind) => sizes.push(kind),
                None => break,
            }
        }
        Ok(sizes)
    }

    /// One `VIDIOC_ENUM_FRAMESIZES` request. `EINVAL` ends the list; any
    /// other failure is an error.
    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> Result<Option<FrameSizeKind>> {
        // SAFETY: v4l2_frmsizeenum is a plain C struct; all-zero is valid.
        let mut desc: v4l2_frmsizeenum = unsafe { mem::zeroed() };
        desc.index = index;
        desc.pixel_format = u32::from(v4l::FourCC::from(fourcc));

        if end_of_list(ioctl!(self.fd(), VIDIOC_ENUM_FRAMESIZES, desc))?.is_none() {
            return Ok(None);
        }
        let size = FrameSizeEnum::try_from(desc).map_err(|message| {
            CameraError::device("VIDIOC_ENUM_FRAMESIZES", io::Error::other(message))
        })?;
        Ok(Some(frame_size_kind(&size)))
    }

    fn buffer_desc(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = BUF_TYPE;
        buf.memory = MEMORY;
        buf
    }
}

/// Map the `EINVAL` that terminates a V4L2 enumeration to `None`.
fn end_of_list<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CameraError::Device { source, .. }) if source.raw_os_error() == Some(libc::EINVAL) => {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn frame_size_kind(size: &FrameSizeEnum) -> FrameSizeKind {
    match size {
        FrameSizeEnum::Discrete(discrete) => {
            FrameSizeKind::Discrete(Resolution::new(discrete.width, discrete.height))
        }
        FrameSizeEnum::Stepwise(stepwise) => {
            let min = Resolution::new(stepwise.min_width, stepwise.min_height);
            let max = Resolution::new(stepwise.max_width, stepwise.max_height);
            if stepwise.step_width == 1 && stepwise.step_height == 1 {
                FrameSizeKind::Continuous { min, max }
            } else {
                FrameSizeKind::Stepwise {
                    min,
                    max,
                    step: Resolution::new(stepwise.step_width, stepwise.step_height),
                }
            }
        }
    }
}

fn timestamp(sec: libc::time_t, usec: libc::suseconds_t) -> Duration {
    // Capture timestamps are monotonic and never negative in practice.
    let secs = u64::try_from(sec).unwrap_or(0);
    let micros = u64::try_from(usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros)
}

impl fmt::Debug for V4L2Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V4L2Device")
            .field("path", &self.path)
            .field("card", &self.capabilities.card)
            .field("mapped", &self.mapping.as_ref().map(|m| m.len))
            .finish_non_exhaustive()
    }
}

impl CameraDevice for V4L2Device {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn frame_size(&mut self, fourcc: FourCC, index: u32) -> Result<Option<FrameSizeKind>> {
        self.enum_frame_size(fourcc, index)
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|source| CameraError::device("VIDIOC_G_FMT", source))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|source| CameraError::device("VIDIOC_S_FMT", source))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is valid.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = BUF_TYPE;
        req.memory = MEMORY;
        ioctl!(self.fd(), VIDIOC_REQBUFS, req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> Result<BufferLayout> {
        let mut buf = Self::buffer_desc(index);
        ioctl!(self.fd(), VIDIOC_QUERYBUF, buf)?;
        // SAFETY: for MMAP buffers the driver fills the `offset` member.
        let offset = unsafe { buf.m.offset };
        Ok(BufferLayout {
            length: buf.length as usize,
            offset: offset as usize,
        })
    }

    fn map_buffer(&mut self, layout: BufferLayout) -> Result<()> {
        if self.mapping.is_some() {
            return Err(CameraError::AlreadyConfigured);
        }
        let map_failed = |source| CameraError::MapFailed {
            length: layout.length,
            source,
        };
        let offset = libc::off_t::try_from(layout.offset)
            .map_err(|_| map_failed(io::Error::from(io::ErrorKind::InvalidInput)))?;

        // SAFETY: a fresh shared mapping chosen by the kernel; it aliases no
        // existing Rust memory.
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                layout.length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset,
            )
        }
        .map_err(map_failed)?;
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| map_failed(io::Error::other("mmap returned a null pointer")))?;

        self.mapping = Some(Mapping {
            ptr,
            len: layout.length,
        });
        Ok(())
    }

    fn mapped_buffer(&self) -> Option<&[u8]> {
        self.mapping.as_ref().map(Mapping::as_slice)
    }

    fn mapped_buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.mapping.as_mut().map(Mapping::as_mut_slice)
    }

    fn unmap_buffer(&mut self) -> Result<()> {
        let Some(mapping) = self.mapping.take() else {
            return Ok(());
        };
        let length = mapping.len;
        mapping
            .unmap()
            .map_err(|source| CameraError::MapFailed { length, source })
    }

    fn stream_on(&mut self) -> Result<()> {
        let mut buf_type = BUF_TYPE;
        ioctl!(self.fd(), VIDIOC_STREAMON, buf_type)
    }

    fn stream_off(&mut self) -> Result<()> {
        let mut buf_type = BUF_TYPE;
        ioctl!(self.fd(), VIDIOC_STREAMOFF, buf_type)
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut buf = Self::buffer_desc(index);
        ioctl!(self.fd(), VIDIOC_QBUF, buf)
    }

    fn dequeue_buffer(&mut self) -> Result<Dequeue> {
        let mut buf = Self::buffer_desc(0);
        match ioctl!(self.fd(), VIDIOC_DQBUF, buf) {
            Ok(()) => {}
            Err(CameraError::Device { source, .. })
                if source.kind() == io::ErrorKind::WouldBlock =>
            {
                return Ok(Dequeue::WouldBlock);
            }
            Err(err) => return Err(err),
        }

        Ok(Dequeue::Filled {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: timestamp(buf.timestamp.tv_sec, buf.timestamp.tv_usec),
        })
    }
}
