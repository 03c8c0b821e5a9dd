//! Memory-mapped capture buffers and the caller-visible frame snapshot.
//!
//! A [`BufferSet`] is one generation of mapped buffers. It is created whole
//! by [`BufferSet::allocate`] and dropped whole; reconfiguring the device
//! replaces the generation rather than touching individual buffers, so no
//! mapping from an earlier configuration can outlive it.

use std::time::Duration;

use log::debug;

use crate::traits::{CameraError, DequeuedBuffer, MappedRegion, Result, VideoDriver};

/// Number of buffers requested from the driver per configuration.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// One hardware-backed buffer.
#[derive(Debug)]
pub struct CaptureBuffer<R> {
    index: u32,
    length: usize,
    region: R,
}

impl<R: MappedRegion> CaptureBuffer<R> {
    /// Driver index of this buffer.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Length reported by the driver, in bytes.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// The mapping backing this buffer.
    pub const fn region(&self) -> &R {
        &self.region
    }
}

/// A full generation of mapped capture buffers.
#[derive(Debug)]
pub struct BufferSet<R> {
    buffers: Vec<CaptureBuffer<R>>,
    max_length: usize,
}

impl<R: MappedRegion> BufferSet<R> {
    /// Request `requested` buffers and map every buffer the driver grants.
    ///
    /// The granted count is authoritative. If any buffer cannot be queried
    /// or mapped, every buffer mapped so far is unmapped before the error is
    /// returned.
    pub fn allocate<D>(driver: &mut D, requested: u32) -> Result<Self>
    where
        D: VideoDriver<Region = R>,
    {
        let granted = driver
            .request_buffers(requested)
            .map_err(|source| CameraError::ioctl("VIDIOC_REQBUFS", source))?;
        if granted == 0 {
            return Err(CameraError::Failure("no buffers granted"));
        }

        let mut buffers = Vec::with_capacity(granted as usize);
        let mut max_length = 0;
        for index in 0..granted {
            let info = driver
                .query_buffer(index)
                .map_err(|source| CameraError::ioctl("VIDIOC_QUERYBUF", source))?;
            let region = driver
                .map_buffer(&info)
                .map_err(|source| CameraError::ioctl("mmap", source))?;

            let length = info.length as usize;
            max_length = max_length.max(length);
            buffers.push(CaptureBuffer {
                index,
                length,
                region,
            });
        }

        debug!("mapped {granted} of {requested} requested buffers, largest {max_length} bytes");
        Ok(Self {
            buffers,
            max_length,
        })
    }

    /// Number of mapped buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the set holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Length of the largest buffer.
    pub const fn max_length(&self) -> usize {
        self.max_length
    }

    /// Buffer with the given driver index.
    pub fn get(&self, index: u32) -> Option<&CaptureBuffer<R>> {
        self.buffers.get(index as usize)
    }

    /// Iterate over the buffers in index order.
    pub fn iter(&self) -> impl Iterator<Item = &CaptureBuffer<R>> {
        self.buffers.iter()
    }

    /// Unmap every buffer.
    pub fn release(self) {
        let count = self.buffers.len();
        drop(self);
        debug!("unmapped {count} buffers");
    }
}

/// Private copy of the most recently captured frame.
///
/// Sized to the largest buffer of the current generation. The contents are
/// valid from a successful capture until the next capture call.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    data: Vec<u8>,
    length: usize,
    sequence: u32,
    timestamp: Duration,
}

impl FrameSnapshot {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            ..Self::default()
        }
    }

    /// Valid frame bytes.
    pub fn data(&self) -> &[u8] {
        self.data.get(..self.length).unwrap_or_default()
    }

    /// Number of valid bytes.
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Whether no frame has been captured into this snapshot.
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the scratch region.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Driver sequence number of the frame.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Capture timestamp of the frame.
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Copy the valid part of a dequeued buffer. `bytes_used` is clamped to
    /// the snapshot capacity and the mapping length.
    pub(crate) fn fill<R: MappedRegion>(
        &mut self,
        buffer: &CaptureBuffer<R>,
        dequeued: &DequeuedBuffer,
    ) {
        let wanted = (dequeued.bytes_used as usize).min(self.data.len());
        let Some(dst) = self.data.get_mut(..wanted) else {
            return;
        };
        self.length = buffer.region().copy_to(dst);
        self.sequence = dequeued.sequence;
        self.timestamp = dequeued.timestamp;
    }
}
