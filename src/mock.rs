//! Mock driver implementation for testing without hardware.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::codec::FourCC;
use crate::diagnostics::{DiagnosticSink, Severity};
use crate::traits::{
    BufferInfo, Capabilities, DequeuedBuffer, FrameInterval, MappedRegion, PixFormat, RawControl,
    RawMenuItem, Rect, VideoDriver,
};

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

type Memory = Rc<RefCell<Vec<u8>>>;

#[derive(Default)]
struct Shared {
    capabilities: Capabilities,
    format: PixFormat,
    max_size: Option<(u32, u32)>,
    interval: FrameInterval,
    grant: Option<u32>,
    buffer_length: Option<u32>,
    failing: HashSet<&'static str>,
    fail_map_at: Option<u32>,
    buffers: Vec<Memory>,
    queued: VecDeque<u32>,
    done: VecDeque<DequeuedBuffer>,
    streaming: bool,
    sequence: u32,
    mappings: usize,
    unmapped: Vec<u32>,
    controls: BTreeMap<u32, (RawControl, Vec<Option<RawMenuItem>>)>,
    values: HashMap<u32, i32>,
    calls: Vec<&'static str>,
    closes: usize,
}

impl Shared {
    fn check(&mut self, op: &'static str) -> io::Result<()> {
        self.calls.push(op);
        if self.failing.contains(op) {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }

    fn buffer_length(&self) -> u32 {
        self.buffer_length.unwrap_or(self.format.size_image)
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn yuyv_format(width: u32, height: u32, fourcc: FourCC) -> PixFormat {
    PixFormat {
        width,
        height,
        fourcc,
        bytes_per_line: width * 2,
        size_image: width * height * 2,
    }
}

/// Mock driver for testing without hardware.
///
/// Behaves like a single-planar capture driver: buffers must be unmapped
/// and freed before the format can change, dequeue never blocks, and
/// stream-off returns every buffer to the application.
pub struct MockDriver {
    shared: Rc<RefCell<Shared>>,
}

/// Test-side view of a [`MockDriver`], usable after the driver has been
/// moved into a camera.
#[derive(Clone)]
pub struct MockHandle {
    shared: Rc<RefCell<Shared>>,
}

impl MockDriver {
    /// Create a 640x480 YUYV capture device and its handle.
    #[must_use]
    pub fn new() -> (Self, MockHandle) {
        let shared = Shared {
            capabilities: Capabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: yuyv_format(640, 480, FourCC::YUYV),
            ..Shared::default()
        };
        let shared = Rc::new(RefCell::new(shared));
        (
            Self {
                shared: Rc::clone(&shared),
            },
            MockHandle { shared },
        )
    }
}

impl MockHandle {
    /// Set the capabilities reported by the device.
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.shared.borrow_mut().capabilities = capabilities;
    }

    /// Limit the frame size the device grants.
    pub fn set_max_size(&self, width: u32, height: u32) {
        self.shared.borrow_mut().max_size = Some((width, height));
    }

    /// Grant `count` buffers regardless of the request.
    pub fn grant_buffers(&self, count: u32) {
        self.shared.borrow_mut().grant = Some(count);
    }

    /// Report every buffer with the given length instead of the image size.
    pub fn set_buffer_length(&self, length: u32) {
        self.shared.borrow_mut().buffer_length = Some(length);
    }

    /// Make every request named `op` fail with `EIO`.
    pub fn fail(&self, op: &'static str) {
        self.shared.borrow_mut().failing.insert(op);
    }

    /// Stop failing requests named `op`.
    pub fn recover(&self, op: &'static str) {
        self.shared.borrow_mut().failing.remove(op);
    }

    /// Make mapping the buffer with the given index fail.
    pub fn fail_map_at(&self, index: u32) {
        self.shared.borrow_mut().fail_map_at = Some(index);
    }

    /// Register a control and its menu items; `None` items are rejected.
    pub fn add_control(&self, control: RawControl, menus: Vec<Option<RawMenuItem>>) {
        let mut shared = self.shared.borrow_mut();
        shared.values.insert(control.id, control.default_value);
        shared.controls.insert(control.id, (control, menus));
    }

    /// Complete the oldest queued buffer with a solid gray frame.
    pub fn complete_frame(&self, bytes_used: u32) -> bool {
        self.complete(TestPattern::Solid(128, 128, 128), Some(bytes_used))
    }

    /// Complete the oldest queued buffer with a full frame of `pattern`.
    pub fn complete_pattern(&self, pattern: TestPattern) -> bool {
        self.complete(pattern, None)
    }

    fn complete(&self, pattern: TestPattern, bytes_used: Option<u32>) -> bool {
        let mut shared = self.shared.borrow_mut();
        if !shared.streaming {
            return false;
        }
        let Some(index) = shared.queued.pop_front() else {
            return false;
        };
        let format = shared.format;
        if let Some(memory) = shared.buffers.get(index as usize) {
            fill_pattern(
                &mut memory.borrow_mut(),
                format.width,
                format.height,
                pattern,
            );
        }
        let sequence = shared.sequence;
        shared.sequence += 1;
        shared.done.push_back(DequeuedBuffer {
            index,
            bytes_used: bytes_used.unwrap_or(format.size_image),
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
        });
        true
    }

    /// Number of buffers currently mapped.
    pub fn live_mappings(&self) -> usize {
        let shared = self.shared.borrow();
        shared.mappings - shared.unmapped.len()
    }

    /// Number of mappings ever created.
    pub fn total_mappings(&self) -> usize {
        self.shared.borrow().mappings
    }

    /// Indices of unmapped buffers, in unmap order.
    pub fn unmapped(&self) -> Vec<u32> {
        self.shared.borrow().unmapped.clone()
    }

    /// Requests issued so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.shared.borrow().calls.clone()
    }

    /// Number of times the request `op` was issued.
    pub fn count(&self, op: &str) -> usize {
        self.shared
            .borrow()
            .calls
            .iter()
            .filter(|call| **call == op)
            .count()
    }

    /// Number of buffers currently owned by the driver.
    pub fn queued(&self) -> usize {
        let shared = self.shared.borrow();
        shared.queued.len() + shared.done.len()
    }

    /// Whether the device is streaming.
    pub fn is_streaming(&self) -> bool {
        self.shared.borrow().streaming
    }

    /// Number of driver-side buffers currently allocated.
    pub fn allocated(&self) -> usize {
        self.shared.borrow().buffers.len()
    }

    /// Current device format.
    pub fn format(&self) -> PixFormat {
        self.shared.borrow().format
    }

    /// Number of successful close calls.
    pub fn closes(&self) -> usize {
        self.shared.borrow().closes
    }
}

/// Mapping handed out by [`MockDriver`].
pub struct MockRegion {
    index: u32,
    memory: Memory,
    shared: Rc<RefCell<Shared>>,
}

impl MappedRegion for MockRegion {
    fn len(&self) -> usize {
        self.memory.borrow().len()
    }

    fn copy_to(&self, dst: &mut [u8]) -> usize {
        let memory = self.memory.borrow();
        let count = dst.len().min(memory.len());
        for (d, s) in dst.iter_mut().zip(memory.iter()).take(count) {
            *d = *s;
        }
        count
    }
}

impl Drop for MockRegion {
    fn drop(&mut self) {
        self.shared.borrow_mut().unmapped.push(self.index);
    }
}

impl VideoDriver for MockDriver {
    type Region = MockRegion;

    fn query_caps(&mut self) -> io::Result<Capabilities> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_QUERYCAP")?;
        Ok(shared.capabilities.clone())
    }

    fn crop_default(&mut self) -> io::Result<Rect> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_CROPCAP")?;
        Ok(Rect {
            left: 0,
            top: 0,
            width: shared.format.width,
            height: shared.format.height,
        })
    }

    fn set_crop(&mut self, _rect: Rect) -> io::Result<()> {
        self.shared.borrow_mut().check("VIDIOC_S_CROP")
    }

    fn get_format(&mut self) -> io::Result<PixFormat> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_G_FMT")?;
        Ok(shared.format)
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_S_FMT")?;
        if !shared.buffers.is_empty() {
            return Err(errno(libc::EBUSY));
        }
        let (width, height) = shared
            .max_size
            .map_or((format.width, format.height), |(w, h)| {
                (format.width.min(w), format.height.min(h))
            });
        shared.format = yuyv_format(width, height, format.fourcc);
        Ok(())
    }

    fn set_frame_interval(&mut self, interval: FrameInterval) -> io::Result<FrameInterval> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_S_PARM")?;
        shared.interval = interval;
        Ok(interval)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_REQBUFS")?;
        if shared.streaming {
            return Err(errno(libc::EBUSY));
        }
        if shared.mappings != shared.unmapped.len() {
            return Err(errno(libc::EBUSY));
        }
        let granted = if count == 0 {
            0
        } else {
            shared.grant.unwrap_or(count)
        };
        let length = shared.buffer_length() as usize;
        shared.buffers = (0..granted)
            .map(|_| Rc::new(RefCell::new(vec![0u8; length])))
            .collect();
        shared.queued.clear();
        shared.done.clear();
        Ok(granted)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_QUERYBUF")?;
        if index as usize >= shared.buffers.len() {
            return Err(errno(libc::EINVAL));
        }
        let length = shared.buffer_length();
        Ok(BufferInfo {
            index,
            length,
            offset: index * length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Region> {
        let mut shared = self.shared.borrow_mut();
        shared.check("mmap")?;
        if shared.fail_map_at == Some(info.index) {
            return Err(errno(libc::ENOMEM));
        }
        let memory = shared
            .buffers
            .get(info.index as usize)
            .map(Rc::clone)
            .ok_or_else(|| errno(libc::EINVAL))?;
        shared.mappings += 1;
        Ok(MockRegion {
            index: info.index,
            memory,
            shared: Rc::clone(&self.shared),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_QBUF")?;
        let owned = shared.queued.contains(&index) || shared.done.iter().any(|b| b.index == index);
        if index as usize >= shared.buffers.len() || owned {
            return Err(errno(libc::EINVAL));
        }
        shared.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_DQBUF")?;
        if !shared.streaming {
            return Err(errno(libc::EINVAL));
        }
        shared.done.pop_front().ok_or_else(|| errno(libc::EAGAIN))
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_STREAMON")?;
        if shared.buffers.is_empty() {
            return Err(errno(libc::EINVAL));
        }
        shared.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_STREAMOFF")?;
        shared.streaming = false;
        shared.queued.clear();
        shared.done.clear();
        Ok(())
    }

    fn query_control(&mut self, id: u32) -> io::Result<RawControl> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_QUERYCTRL")?;
        shared
            .controls
            .get(&id)
            .map(|(control, _)| control.clone())
            .ok_or_else(|| errno(libc::EINVAL))
    }

    fn query_menu(&mut self, id: u32, index: u32) -> io::Result<RawMenuItem> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_QUERYMENU")?;
        shared
            .controls
            .get(&id)
            .and_then(|(_, menus)| menus.get(index as usize).cloned().flatten())
            .ok_or_else(|| errno(libc::EINVAL))
    }

    fn get_control(&mut self, id: u32) -> io::Result<i32> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_G_CTRL")?;
        shared
            .values
            .get(&id)
            .copied()
            .ok_or_else(|| errno(libc::EINVAL))
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.check("VIDIOC_S_CTRL")?;
        let slot = shared
            .values
            .get_mut(&id)
            .ok_or_else(|| errno(libc::EINVAL))?;
        *slot = value;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut shared = self.shared.borrow_mut();
        shared.check("close")?;
        shared.closes += 1;
        Ok(())
    }
}

/// Sink recording every event it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<(Severity, &'static str)>>>,
}

impl RecordingSink {
    /// Events received so far.
    pub fn events(&self) -> Vec<(Severity, &'static str)> {
        self.events.borrow().clone()
    }
}

impl DiagnosticSink for RecordingSink {
    fn log(&self, severity: Severity, message: &'static str, _os_error: Option<&io::Error>) {
        self.events.borrow_mut().push((severity, message));
    }
}

/// Fill a YUYV frame with a test pattern.
pub fn fill_pattern(data: &mut [u8], width: u32, height: u32, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => generate_color_bars(data, width, height),
        TestPattern::Gradient => generate_gradient(data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(data, y, u, v),
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if let Some(macropixel) = data.get_mut(offset..offset + 4) {
                macropixel.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if let Some(macropixel) = data.get_mut(offset..offset + 4) {
                macropixel.copy_from_slice(&[y_val, 128, y_val, 128]);
            }
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
        let (mut driver, _handle) = MockDriver::new();
        let caps = driver.query_caps().expect("query_caps should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_format_negotiation() {
        let (mut driver, handle) = MockDriver::new();
        handle.set_max_size(1280, 720);

        let request = yuyv_format(1920, 1080, FourCC::YUYV);
        driver
            .set_format(&request)
            .expect("set_format should succeed");
        let actual = driver.get_format().expect("get_format should succeed");
        assert_eq!((actual.width, actual.height), (1280, 720));
        assert_eq!(actual.size_image, 1280 * 720 * 2);
    }

    #[test]
    fn test_mock_refuses_format_change_with_buffers() {
        let (mut driver, _handle) = MockDriver::new();
        driver
            .request_buffers(2)
            .expect("request_buffers should succeed");

        let err = driver
            .set_format(&yuyv_format(320, 240, FourCC::YUYV))
            .expect_err("format change should be refused");
        assert_eq!(err.raw_os_error(), Some(libc::EBUSY));
    }

    #[test]
    fn test_mock_dequeue_empty_would_block() {
        let (mut driver, _handle) = MockDriver::new();
        driver
            .request_buffers(1)
            .expect("request_buffers should succeed");
        driver.queue_buffer(0).expect("queue should succeed");
        driver.stream_on().expect("stream_on should succeed");

        let err = driver.dequeue_buffer().expect_err("queue is empty");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_color_bars_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        fill_pattern(&mut data, 640, 480, TestPattern::ColorBars);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
        // Last bar should be black (Y=16)
        assert_eq!(data[639 * 2], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        fill_pattern(&mut data, 640, 480, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let mut data = vec![0u8; 64 * 64 * 2];
        fill_pattern(&mut data, 64, 64, TestPattern::Solid(128, 64, 192));

        assert_eq!(&data[..4], &[128, 64, 128, 192]);
    }
}
