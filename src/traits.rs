//! Core traits and types for the kernel capture boundary.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::FourCC;

/// Device capability summary.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming I/O.
    pub can_stream: bool,
}

/// Crop rectangle in sensor coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Single-planar pixel format as exchanged with the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub bytes_per_line: u32,
    /// Total frame size in bytes.
    pub size_image: u32,
}

/// Time between two frames, as a fraction of a second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInterval {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl FrameInterval {
    /// Create a new frame interval.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Whether both terms are nonzero, i.e. the interval is a request.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }
}

/// Placement of one device buffer, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer index.
    pub index: u32,
    /// Length in bytes.
    pub length: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
}

/// A completed buffer handed back by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Buffer index.
    pub index: u32,
    /// Bytes of valid frame data.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Control description as reported by the driver, before decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawControl {
    /// Control id.
    pub id: u32,
    /// Control type code.
    pub kind: u32,
    /// Human readable name.
    pub name: String,
    /// Minimum value.
    pub minimum: i32,
    /// Maximum value.
    pub maximum: i32,
    /// Step size.
    pub step: i32,
    /// Default value.
    pub default_value: i32,
    /// Flag bitmask.
    pub flags: u32,
}

/// One menu item as reported by the driver. Both views of the item are
/// filled; which one is meaningful depends on the control type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMenuItem {
    /// Label, for menu controls.
    pub name: String,
    /// Value, for integer menu controls.
    pub value: i64,
}

/// A buffer mapped into this process. Unmapped when dropped.
pub trait MappedRegion {
    /// Mapped length in bytes.
    fn len(&self) -> usize;

    /// Whether the mapping is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the leading bytes of the mapping into `dst`.
    ///
    /// Returns the number of bytes copied, at most `dst.len()`.
    fn copy_to(&self, dst: &mut [u8]) -> usize;
}

/// The kernel capture protocol: one method per request.
///
/// Implementations retry only on signal interruption and otherwise report
/// the OS error unchanged. All requests target the single-planar video
/// capture queue with memory-mapped buffers.
pub trait VideoDriver {
    /// Mapping type produced by [`VideoDriver::map_buffer`].
    type Region: MappedRegion;

    /// `VIDIOC_QUERYCAP`.
    fn query_caps(&mut self) -> io::Result<Capabilities>;

    /// `VIDIOC_CROPCAP`, returning the default crop rectangle.
    fn crop_default(&mut self) -> io::Result<Rect>;

    /// `VIDIOC_S_CROP`.
    fn set_crop(&mut self, rect: Rect) -> io::Result<()>;

    /// `VIDIOC_G_FMT`.
    fn get_format(&mut self) -> io::Result<PixFormat>;

    /// `VIDIOC_S_FMT` with progressive field order. Stride and image size
    /// are left for the driver to compute.
    fn set_format(&mut self, format: &PixFormat) -> io::Result<()>;

    /// `VIDIOC_S_PARM`, returning the interval the driver granted.
    fn set_frame_interval(&mut self, interval: FrameInterval) -> io::Result<FrameInterval>;

    /// `VIDIOC_REQBUFS`, returning the granted count. A count of zero frees
    /// the driver-side buffers.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF`.
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    /// Map a queried buffer read/write, shared.
    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Region>;

    /// `VIDIOC_QBUF`.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// `VIDIOC_DQBUF`. Fails with [`io::ErrorKind::WouldBlock`] when no
    /// buffer is ready.
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// `VIDIOC_STREAMON`.
    fn stream_on(&mut self) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF`.
    fn stream_off(&mut self) -> io::Result<()>;

    /// `VIDIOC_QUERYCTRL`.
    fn query_control(&mut self, id: u32) -> io::Result<RawControl>;

    /// `VIDIOC_QUERYMENU`.
    fn query_menu(&mut self, id: u32, index: u32) -> io::Result<RawMenuItem>;

    /// `VIDIOC_G_CTRL`.
    fn get_control(&mut self, id: u32) -> io::Result<i32>;

    /// `VIDIOC_S_CTRL`.
    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;

    /// Close the device handle.
    fn close(&mut self) -> io::Result<()>;
}

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The device node could not be opened.
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        /// Device path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// A device request failed at the OS/driver level.
    #[error("{op} failed: {source}")]
    Ioctl {
        /// Name of the failing request.
        op: &'static str,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// A named precondition did not hold.
    #[error("device failure: {0}")]
    Failure(&'static str),
    /// No completed buffer is ready to be dequeued.
    #[error("no frame ready")]
    NotReady,
    /// A frame did not match the expected test pattern.
    #[error("validation failed: {0}")]
    Validation(String),
    /// I/O error outside the device protocol.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CameraError {
    pub(crate) fn ioctl(op: &'static str, source: io::Error) -> Self {
        Self::Ioctl { op, source }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
