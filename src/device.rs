//! V4L2 device implementation over raw ioctls from the v4l crate.
//!
//! This is the only module that touches kernel memory directly. Request
//! structs come from `v4l::v4l_sys`; every ioctl is retried on `EINTR` up
//! to [`IOCTL_ATTEMPTS`] times.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::ptr;
use std::time::Duration;

use log::warn;
use v4l::buffer::Type;
use v4l::capability::Flags as CapabilityFlags;
use v4l::format::FieldOrder;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys;

use crate::codec::FourCC;
use crate::traits::{
    BufferInfo, Capabilities, DequeuedBuffer, FrameInterval, MappedRegion, PixFormat, RawControl,
    RawMenuItem, Rect, VideoDriver,
};

/// Attempts per ioctl before an interrupted call is reported.
pub const IOCTL_ATTEMPTS: usize = 100;
/// Attempts to close the handle before giving up.
pub const CLOSE_ATTEMPTS: usize = 10;

const CAPTURE: u32 = Type::VideoCapture as u32;
const MMAP: u32 = Memory::Mmap as u32;

/// Run `op` until it stops failing with [`io::ErrorKind::Interrupted`], at
/// most `attempts` times.
pub fn retry_interrupted<T, F>(attempts: usize, mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last = io::Error::from(io::ErrorKind::Interrupted);
    for _ in 0..attempts {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => last = err,
            result => return result,
        }
    }
    Err(last)
}

/// Kernel request structs that are valid when all-zero.
trait Request: Copy {
    fn zeroed() -> Self {
        // SAFETY: implemented only for v4l2 C structs made of integers,
        // arrays and unions of those, for which all-zero bytes are valid.
        unsafe { mem::zeroed() }
    }
}

macro_rules! requests {
    ($($ty:ident),* $(,)?) => {
        $(impl Request for v4l_sys::$ty {})*
    };
}

requests!(
    v4l2_capability,
    v4l2_cropcap,
    v4l2_crop,
    v4l2_format,
    v4l2_pix_format,
    v4l2_streamparm,
    v4l2_captureparm,
    v4l2_requestbuffers,
    v4l2_buffer,
    v4l2_queryctrl,
    v4l2_querymenu,
    v4l2_control,
);

fn c_string(bytes: &[u8]) -> String {
    let text = bytes.split(|&b| b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(text).into_owned()
}

/// Convert a driver buffer offset to the `mmap` offset type, which is 32
/// bits wide on some targets.
#[allow(clippy::unnecessary_fallible_conversions)]
fn map_offset(offset: u32) -> io::Result<libc::off_t> {
    libc::off_t::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}

/// Memory-mapped V4L2 capture device.
#[derive(Debug)]
pub struct V4L2Device {
    fd: RawFd,
    open: bool,
}

impl V4L2Device {
    /// Open a device node read/write and non-blocking.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let fd = v4l2::open(path.as_ref(), libc::O_RDWR | libc::O_NONBLOCK)?;
        Ok(Self { fd, open: true })
    }

    fn xioctl<T>(&self, code: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        let fd = self.fd;
        let argp: *mut T = arg;
        retry_interrupted(IOCTL_ATTEMPTS, || {
            // SAFETY: `argp` points to the argument type `code` expects,
            // exclusively borrowed for the duration of the call.
            unsafe { v4l2::ioctl(fd, code, argp.cast::<c_void>()) }
        })
    }

    fn buffer_request(index: u32) -> v4l_sys::v4l2_buffer {
        let mut buf: v4l_sys::v4l2_buffer = Request::zeroed();
        buf.index = index;
        buf.type_ = CAPTURE;
        buf.memory = MMAP;
        buf
    }
}

impl AsRawFd for V4L2Device {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for V4L2Device {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing device failed: {err}");
        }
    }
}

/// A buffer mapped with `mmap(2)`. Unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: *mut c_void,
    len: usize,
}

impl MappedRegion for MmapRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_to(&self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.len);
        // SAFETY: `ptr` is a live mapping of `len` bytes and `dst` holds at
        // least `count` bytes; the regions cannot overlap.
        unsafe { ptr::copy_nonoverlapping(self.ptr.cast::<u8>(), dst.as_mut_ptr(), count) };
        count
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping created by `map_buffer` and
        // not unmapped elsewhere.
        if let Err(err) = unsafe { v4l2::munmap(self.ptr, self.len) } {
            warn!("munmap of {} bytes failed: {err}", self.len);
        }
    }
}

impl VideoDriver for V4L2Device {
    type Region = MmapRegion;

    fn query_caps(&mut self) -> io::Result<Capabilities> {
        let mut cap: v4l_sys::v4l2_capability = Request::zeroed();
        self.xioctl(vidioc::VIDIOC_QUERYCAP, &mut cap)?;

        let flags = CapabilityFlags::from_bits_truncate(cap.capabilities);
        Ok(Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus_info: c_string(&cap.bus_info),
            can_capture: flags.contains(CapabilityFlags::VIDEO_CAPTURE),
            can_stream: flags.contains(CapabilityFlags::STREAMING),
        })
    }

    fn crop_default(&mut self) -> io::Result<Rect> {
        let mut cropcap: v4l_sys::v4l2_cropcap = Request::zeroed();
        cropcap.type_ = CAPTURE;
        self.xioctl(vidioc::VIDIOC_CROPCAP, &mut cropcap)?;

        let rect = cropcap.defrect;
        Ok(Rect {
            left: rect.left,
            top: rect.top,
            width: rect.width,
            height: rect.height,
        })
    }

    fn set_crop(&mut self, rect: Rect) -> io::Result<()> {
        let mut crop: v4l_sys::v4l2_crop = Request::zeroed();
        crop.type_ = CAPTURE;
        crop.c = v4l_sys::v4l2_rect {
            left: rect.left,
            top: rect.top,
            width: rect.width,
            height: rect.height,
        };
        self.xioctl(vidioc::VIDIOC_S_CROP, &mut crop)
    }

    fn get_format(&mut self) -> io::Result<PixFormat> {
        let mut fmt: v4l_sys::v4l2_format = Request::zeroed();
        fmt.type_ = CAPTURE;
        self.xioctl(vidioc::VIDIOC_G_FMT, &mut fmt)?;

        // SAFETY: the driver fills `pix` for single-planar capture.
        let pix = unsafe { fmt.fmt.pix };
        Ok(PixFormat {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::decode(pix.pixelformat),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        })
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()> {
        let mut pix: v4l_sys::v4l2_pix_format = Request::zeroed();
        pix.width = format.width;
        pix.height = format.height;
        pix.pixelformat = format.fourcc.encode();
        pix.field = FieldOrder::Progressive as u32;

        let mut fmt: v4l_sys::v4l2_format = Request::zeroed();
        fmt.type_ = CAPTURE;
        fmt.fmt.pix = pix;
        self.xioctl(vidioc::VIDIOC_S_FMT, &mut fmt)
    }

    fn set_frame_interval(&mut self, interval: FrameInterval) -> io::Result<FrameInterval> {
        let mut parm: v4l_sys::v4l2_streamparm = Request::zeroed();
        parm.type_ = CAPTURE;
        let mut capture: v4l_sys::v4l2_captureparm = Request::zeroed();
        capture.timeperframe = v4l_sys::v4l2_fract {
            numerator: interval.numerator,
            denominator: interval.denominator,
        };
        parm.parm.capture = capture;
        self.xioctl(vidioc::VIDIOC_S_PARM, &mut parm)?;

        // SAFETY: the driver fills `capture` for capture stream parameters.
        let granted = unsafe { parm.parm.capture.timeperframe };
        Ok(FrameInterval::new(granted.numerator, granted.denominator))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req: v4l_sys::v4l2_requestbuffers = Request::zeroed();
        req.count = count;
        req.type_ = CAPTURE;
        req.memory = MMAP;
        self.xioctl(vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = Self::buffer_request(index);
        self.xioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;

        // SAFETY: `offset` is the active member for MMAP buffers.
        let offset = unsafe { buf.m.offset };
        Ok(BufferInfo {
            index,
            length: buf.length,
            offset,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Region> {
        let len = info.length as usize;
        let offset = map_offset(info.offset)?;
        // SAFETY: maps a driver-provided buffer of `len` bytes at the offset
        // the driver reported for it.
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset,
            )
        }?;
        Ok(MmapRegion { ptr, len })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer_request(index);
        self.xioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut buf = Self::buffer_request(0);
        self.xioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;

        let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or_default();
        let micros = u32::try_from(buf.timestamp.tv_usec).unwrap_or_default();
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, micros.saturating_mul(1000)),
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut typ = CAPTURE;
        self.xioctl(vidioc::VIDIOC_STREAMON, &mut typ)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut typ = CAPTURE;
        self.xioctl(vidioc::VIDIOC_STREAMOFF, &mut typ)
    }

    fn query_control(&mut self, id: u32) -> io::Result<RawControl> {
        let mut qctrl: v4l_sys::v4l2_queryctrl = Request::zeroed();
        qctrl.id = id;
        self.xioctl(vidioc::VIDIOC_QUERYCTRL, &mut qctrl)?;

        Ok(RawControl {
            id: qctrl.id,
            kind: qctrl.type_,
            name: c_string(&qctrl.name),
            minimum: qctrl.minimum,
            maximum: qctrl.maximum,
            step: qctrl.step,
            default_value: qctrl.default_value,
            flags: qctrl.flags,
        })
    }

    fn query_menu(&mut self, id: u32, index: u32) -> io::Result<RawMenuItem> {
        let mut qmenu: v4l_sys::v4l2_querymenu = Request::zeroed();
        qmenu.id = id;
        qmenu.index = index;
        self.xioctl(vidioc::VIDIOC_QUERYMENU, &mut qmenu)?;

        let item = qmenu.__bindgen_anon_1;
        // SAFETY: both members are plain data over the same bytes; the
        // caller picks the one matching the control type.
        let (name, value) = unsafe { (item.name, item.value) };
        Ok(RawMenuItem {
            name: c_string(&name),
            value,
        })
    }

    fn get_control(&mut self, id: u32) -> io::Result<i32> {
        let mut ctrl: v4l_sys::v4l2_control = Request::zeroed();
        ctrl.id = id;
        self.xioctl(vidioc::VIDIOC_G_CTRL, &mut ctrl)?;
        Ok(ctrl.value)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut ctrl: v4l_sys::v4l2_control = Request::zeroed();
        ctrl.id = id;
        ctrl.value = value;
        self.xioctl(vidioc::VIDIOC_S_CTRL, &mut ctrl)
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        let fd = self.fd;
        retry_interrupted(CLOSE_ATTEMPTS, || v4l2::close(fd))?;
        self.open = false;
        Ok(())
    }
}
