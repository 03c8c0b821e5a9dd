//! Capture device state machine.
//!
//! A [`Camera`] moves through `Opened -> Initialized -> Configured ->
//! Streaming` and back. Reconfiguring tears the current buffer generation
//! down completely (stream off, unmap, free) before the new format is
//! applied, so resolution and frame rate can change at runtime.
//!
//! Everything is non-blocking: [`Camera::capture`] fails with
//! [`CameraError::NotReady`] when no buffer has completed. Wait for
//! readiness on [`AsRawFd::as_raw_fd`] before calling it.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use log::{debug, trace};

use crate::buffers::{BufferSet, CaptureBuffer, FrameSnapshot, DEFAULT_BUFFER_COUNT};
use crate::codec::FourCC;
use crate::controls::{self, ControlDescriptor};
use crate::device::V4L2Device;
use crate::diagnostics::{DiagnosticSink, Severity, StderrSink};
use crate::traits::{CameraError, Capabilities, FrameInterval, PixFormat, Result, VideoDriver};

/// Lifecycle state of a [`Camera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CameraState {
    /// Handle open, capabilities not yet checked.
    Opened,
    /// Capabilities checked, crop reset attempted.
    Initialized,
    /// Format applied and buffers mapped.
    Configured,
    /// Buffers queued and stream on.
    Streaming,
}

/// Requested capture settings. Zero fields leave the device setting as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format; zero selects YUYV when a format is requested.
    pub format: FourCC,
    /// Frame interval; applied only when both terms are nonzero.
    pub interval: FrameInterval,
}

impl Config {
    /// Request a frame size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: FourCC([0; 4]),
            interval: FrameInterval::new(0, 0),
        }
    }

    /// Request a pixel format.
    #[must_use]
    pub const fn with_format(mut self, format: FourCC) -> Self {
        self.format = format;
        self
    }

    /// Request a frame interval of `numerator / denominator` seconds.
    #[must_use]
    pub const fn with_interval(mut self, numerator: u32, denominator: u32) -> Self {
        self.interval = FrameInterval::new(numerator, denominator);
        self
    }

    fn requests_format(&self) -> bool {
        self.width != 0 || self.height != 0 || !self.format.is_zero()
    }
}

/// A memory-mapped video capture device.
pub struct Camera<D: VideoDriver = V4L2Device> {
    driver: D,
    sink: Box<dyn DiagnosticSink>,
    state: CameraState,
    capabilities: Option<Capabilities>,
    format: Option<PixFormat>,
    interval: Option<FrameInterval>,
    buffers: Option<BufferSet<D::Region>>,
    snapshot: FrameSnapshot,
    closed: bool,
}

impl Camera<V4L2Device> {
    /// Open a device node, reporting diagnostics on standard error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_sink(path, StderrSink)
    }

    /// Open a device node with a custom diagnostics sink.
    pub fn open_with_sink<P, S>(path: P, sink: S) -> Result<Self>
    where
        P: AsRef<Path>,
        S: DiagnosticSink + 'static,
    {
        let path = path.as_ref();
        let driver = V4L2Device::open(path).map_err(|source| CameraError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("opened {}", path.display());
        Ok(Self::with_driver(driver, sink))
    }
}

impl AsRawFd for Camera<V4L2Device> {
    fn as_raw_fd(&self) -> RawFd {
        self.driver.as_raw_fd()
    }
}

impl<D: VideoDriver> Camera<D> {
    /// Wrap an already open driver.
    pub fn with_driver<S: DiagnosticSink + 'static>(driver: D, sink: S) -> Self {
        Self {
            driver,
            sink: Box::new(sink),
            state: CameraState::Opened,
            capabilities: None,
            format: None,
            interval: None,
            buffers: None,
            snapshot: FrameSnapshot::default(),
            closed: false,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> CameraState {
        self.state
    }

    /// Capabilities read during initialization.
    pub const fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Format granted by the device, read back after configuration.
    pub const fn format(&self) -> Option<&PixFormat> {
        self.format.as_ref()
    }

    /// Negotiated frame width, zero before configuration.
    pub fn width(&self) -> u32 {
        self.format.map_or(0, |format| format.width)
    }

    /// Negotiated frame height, zero before configuration.
    pub fn height(&self) -> u32 {
        self.format.map_or(0, |format| format.height)
    }

    /// Frame interval granted by the device, if one was requested.
    pub const fn frame_interval(&self) -> Option<FrameInterval> {
        self.interval
    }

    /// Number of mapped buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.as_ref().map_or(0, BufferSet::len)
    }

    /// The most recently captured frame.
    pub const fn snapshot(&self) -> &FrameSnapshot {
        &self.snapshot
    }

    /// Check capture and streaming capability and reset cropping.
    ///
    /// Missing capabilities are fatal. Cropping is best-effort: devices
    /// without crop support are accepted silently.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state >= CameraState::Initialized {
            return Ok(());
        }

        let caps = self
            .driver
            .query_caps()
            .map_err(|source| self.report(CameraError::ioctl("VIDIOC_QUERYCAP", source)))?;
        if !caps.can_capture {
            return Err(self.report(CameraError::Failure("no capture")));
        }
        if !caps.can_stream {
            return Err(self.report(CameraError::Failure("no streaming")));
        }

        if let Ok(rect) = self.driver.crop_default() {
            if let Err(err) = self.driver.set_crop(rect) {
                trace!("cropping not supported: {err}");
            }
        }

        debug!("initialized {} ({})", caps.card, caps.driver);
        self.capabilities = Some(caps);
        self.state = CameraState::Initialized;
        Ok(())
    }

    /// Apply `config` and map a fresh buffer generation.
    ///
    /// A configured or streaming device is first stopped and its buffers
    /// released. On failure the device stays in the last state it reached.
    pub fn configure(&mut self, config: &Config) -> Result<()> {
        if self.buffers.is_some() {
            if self.state == CameraState::Streaming {
                self.stop()?;
            }
            self.release_buffers();
        }
        self.initialize()?;
        self.apply(config)?;
        self.load_settings()?;
        self.prepare_buffers()
    }

    /// Queue every buffer and turn the stream on.
    ///
    /// An unconfigured device is configured with its current settings
    /// first. Buffers queued before a failure stay queued.
    pub fn start(&mut self) -> Result<()> {
        if self.state == CameraState::Streaming {
            self.sink.log(Severity::Info, "already streaming", None);
            return Ok(());
        }
        self.initialize()?;
        if self.buffers.is_none() {
            self.load_settings()?;
            self.prepare_buffers()?;
        }

        let indices: Vec<u32> = self
            .buffers
            .as_ref()
            .map(|set| set.iter().map(CaptureBuffer::index).collect())
            .unwrap_or_default();
        for index in indices {
            self.driver
                .queue_buffer(index)
                .map_err(|source| self.report(CameraError::ioctl("VIDIOC_QBUF", source)))?;
        }
        self.driver
            .stream_on()
            .map_err(|source| self.report(CameraError::ioctl("VIDIOC_STREAMON", source)))?;

        debug!("streaming {}x{}", self.width(), self.height());
        self.state = CameraState::Streaming;
        Ok(())
    }

    /// Copy the next completed frame into the snapshot and hand its buffer
    /// back to the driver.
    ///
    /// Fails with [`CameraError::NotReady`], leaving the snapshot untouched,
    /// when no buffer has completed. If the buffer cannot be queued again the
    /// snapshot is still valid but the stream has lost a buffer; treat that
    /// as fatal.
    pub fn capture(&mut self) -> Result<&FrameSnapshot> {
        if self.state != CameraState::Streaming {
            return Err(self.report(CameraError::Failure("not streaming")));
        }

        let dequeued = match self.driver.dequeue_buffer() {
            Ok(dequeued) => dequeued,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Err(CameraError::NotReady);
            }
            Err(source) => return Err(self.report(CameraError::ioctl("VIDIOC_DQBUF", source))),
        };

        let index = dequeued.index;
        let Some(buffer) = self.buffers.as_ref().and_then(|set| set.get(index)) else {
            return Err(self.report(CameraError::Failure("buffer index out of range")));
        };
        self.snapshot.fill(buffer, &dequeued);
        trace!(
            "captured frame {} ({} bytes) from buffer {}",
            dequeued.sequence,
            self.snapshot.len(),
            index
        );

        self.driver
            .queue_buffer(index)
            .map_err(|source| self.report(CameraError::ioctl("VIDIOC_QBUF", source)))?;
        Ok(&self.snapshot)
    }

    /// Turn the stream off. Buffers stay mapped.
    pub fn stop(&mut self) -> Result<()> {
        self.driver
            .stream_off()
            .map_err(|source| self.report(CameraError::ioctl("VIDIOC_STREAMOFF", source)))?;
        if self.state == CameraState::Streaming {
            debug!("stream off");
            self.state = CameraState::Configured;
        }
        Ok(())
    }

    /// Release every buffer and close the device handle.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Enumerate the device's user controls.
    pub fn controls(&mut self) -> Vec<ControlDescriptor> {
        controls::enumerate(&mut self.driver)
    }

    /// Read a control value.
    pub fn control(&mut self, id: u32) -> Result<i32> {
        controls::get(&mut self.driver, id).map_err(|err| self.report(err))
    }

    /// Write a control value.
    pub fn set_control(&mut self, id: u32, value: i32) -> Result<()> {
        controls::set(&mut self.driver, id, value).map_err(|err| self.report(err))
    }

    fn report(&self, err: CameraError) -> CameraError {
        match &err {
            CameraError::Ioctl { op, source } => self.sink.log(Severity::Error, *op, Some(source)),
            CameraError::Failure(message) => self.sink.log(Severity::Failure, *message, None),
            _ => {}
        }
        err
    }

    fn apply(&mut self, config: &Config) -> Result<()> {
        if config.requests_format() {
            let mut requested = if config.width == 0 || config.height == 0 {
                self.driver
                    .get_format()
                    .map_err(|source| self.report(CameraError::ioctl("VIDIOC_G_FMT", source)))?
            } else {
                PixFormat::default()
            };
            if config.width != 0 {
                requested.width = config.width;
            }
            if config.height != 0 {
                requested.height = config.height;
            }
            requested.fourcc = if config.format.is_zero() {
                FourCC::YUYV
            } else {
                config.format
            };
            self.driver
                .set_format(&requested)
                .map_err(|source| self.report(CameraError::ioctl("VIDIOC_S_FMT", source)))?;
        }

        if config.interval.is_set() {
            let granted = self
                .driver
                .set_frame_interval(config.interval)
                .map_err(|source| self.report(CameraError::ioctl("VIDIOC_S_PARM", source)))?;
            debug!(
                "frame interval {}/{} granted as {}/{}",
                config.interval.numerator,
                config.interval.denominator,
                granted.numerator,
                granted.denominator
            );
            self.interval = Some(granted);
        }
        Ok(())
    }

    fn load_settings(&mut self) -> Result<()> {
        let format = self
            .driver
            .get_format()
            .map_err(|source| self.report(CameraError::ioctl("VIDIOC_G_FMT", source)))?;
        debug!(
            "negotiated {}x{} {}",
            format.width, format.height, format.fourcc
        );
        self.format = Some(format);
        Ok(())
    }

    fn prepare_buffers(&mut self) -> Result<()> {
        let set = BufferSet::allocate(&mut self.driver, DEFAULT_BUFFER_COUNT)
            .map_err(|err| self.report(err))?;
        self.snapshot = FrameSnapshot::with_capacity(set.max_length());
        self.buffers = Some(set);
        self.state = CameraState::Configured;
        Ok(())
    }

    fn release_buffers(&mut self) {
        let Some(set) = self.buffers.take() else {
            return;
        };
        set.release();
        if let Err(err) = self.driver.request_buffers(0) {
            debug!("freeing driver buffers failed: {err}");
        }
        self.snapshot = FrameSnapshot::default();
        if self.state > CameraState::Initialized {
            self.state = CameraState::Initialized;
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.buffers.is_some() {
            if self.state == CameraState::Streaming {
                if let Err(err) = self.driver.stream_off() {
                    debug!("stream off during close failed: {err}");
                }
            }
            self.release_buffers();
        }
        self.closed = true;
        self.driver
            .close()
            .map_err(|source| self.report(CameraError::ioctl("close", source)))?;
        debug!("closed");
        Ok(())
    }
}

impl<D: VideoDriver> Drop for Camera<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!("close on drop failed: {err}");
        }
    }
}
