//! mmap-capture: non-blocking, memory-mapped V4L2 video capture.
//!
//! The [`Camera`] state machine drives a [`VideoDriver`] through capability
//! checks, format negotiation, buffer mapping and streaming. Captured frames
//! are copied into a private [`FrameSnapshot`] so a buffer is always handed
//! back to the driver before the caller sees the data.
//!
//! The real backend is [`V4L2Device`]; unit tests run against an in-memory
//! mock driver implementing the same trait.

pub mod buffers;
pub mod camera;
pub mod codec;
pub mod controls;
pub mod device;
pub mod diagnostics;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use buffers::{BufferSet, CaptureBuffer, FrameSnapshot};
pub use camera::{Camera, CameraState, Config};
pub use codec::{yuyv_to_rgb24, FourCC};
pub use controls::{ControlDescriptor, ControlFlags, ControlType, MenuEntry};
pub use device::V4L2Device;
pub use diagnostics::{DiagnosticSink, LogSink, Severity, StderrSink};
pub use traits::{CameraError, Capabilities, FrameInterval, PixFormat, VideoDriver};
