//! Upload requests.

use std::sync::Arc;

use crate::resources::{Buffer, Image};

/// Called once an upload has completed on the GPU.
pub type UploadCallback = Box<dyn FnOnce() + Send + 'static>;

/// Stream bytes into a device buffer.
pub struct BufferStreamRequest {
    /// Destination buffer.
    pub buffer: Arc<Buffer>,
    /// Destination offset in bytes.
    pub byte_offset: u64,
    /// Source bytes.
    pub data: Vec<u8>,
    /// Block the queueing thread until the upload has completed.
    pub wait_for_upload: bool,
    /// Invoked from [`process_callbacks`](super::AsyncUploadQueue::process_callbacks)
    /// once the upload has completed, or inline when `wait_for_upload` is set.
    pub on_complete: Option<UploadCallback>,
}

impl BufferStreamRequest {
    pub fn new(buffer: Arc<Buffer>, data: Vec<u8>) -> Self {
        Self {
            buffer,
            byte_offset: 0,
            data,
            wait_for_upload: false,
            on_complete: None,
        }
    }

    pub fn with_byte_offset(mut self, byte_offset: u64) -> Self {
        self.byte_offset = byte_offset;
        self
    }

    pub fn with_wait_for_upload(mut self, wait: bool) -> Self {
        self.wait_for_upload = wait;
        self
    }

    pub fn with_on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for BufferStreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStreamRequest")
            .field("buffer", &self.buffer.label())
            .field("byte_offset", &self.byte_offset)
            .field("len", &self.data.len())
            .field("wait_for_upload", &self.wait_for_upload)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Tightly packed texels of one mip level, one entry per array layer.
#[derive(Debug, Clone, Default)]
pub struct ImageMipSlice {
    pub layers: Vec<Vec<u8>>,
}

impl ImageMipSlice {
    /// Mip slice of a single-layer image.
    pub fn single(data: Vec<u8>) -> Self {
        Self { layers: vec![data] }
    }
}

/// Expand the resident mip chain of an image.
///
/// With the image resident from mip `r`, the `n` slices fill mips
/// `[r - n, r)`, most detailed first. On completion the image is resident
/// from `r - n`.
pub struct ImageExpandRequest {
    /// Destination image.
    pub image: Arc<Image>,
    /// Mip data, most detailed first.
    pub mip_slices: Vec<ImageMipSlice>,
    /// Block the queueing thread until the upload has completed.
    pub wait_for_upload: bool,
    /// Invoked once the upload has completed.
    pub on_complete: Option<UploadCallback>,
}

impl ImageExpandRequest {
    pub fn new(image: Arc<Image>, mip_slices: Vec<ImageMipSlice>) -> Self {
        Self {
            image,
            mip_slices,
            wait_for_upload: false,
            on_complete: None,
        }
    }

    pub fn with_wait_for_upload(mut self, wait: bool) -> Self {
        self.wait_for_upload = wait;
        self
    }

    pub fn with_on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for ImageExpandRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageExpandRequest")
            .field("image", &self.image.label())
            .field("mip_slices", &self.mip_slices.len())
            .field("wait_for_upload", &self.wait_for_upload)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}
