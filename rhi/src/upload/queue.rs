//! The asynchronous upload queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::device::Device;
use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::resources::TileMappingRequest;
use crate::sync::Fence;
use crate::types::{BufferDescriptor, BufferUsage};

use super::AsyncUploadQueueDescriptor;
use super::request::{BufferStreamRequest, ImageExpandRequest, UploadCallback};
use super::worker::{UploadCommand, UploadWorker};

/// Moves CPU data into device resources on a dedicated queue and thread.
///
/// Requests are staged through a ring of
/// [`frame_count`](AsyncUploadQueueDescriptor::frame_count) staging buffers.
/// Each queued request returns a value of the queue's upload fence; the
/// request has completed on the GPU once
/// [`is_upload_finished`](Self::is_upload_finished) reports that value.
///
/// Queueing blocks while the ring is saturated: the upload thread waits for
/// an in-flight staging buffer before it takes more work, and at most
/// `frame_count` requests wait for it in between. Request data is never
/// held without bound outside the staging ring.
///
/// Completion callbacks are not run automatically: call
/// [`process_completed_callbacks`](Self::process_completed_callbacks) once
/// per frame.
///
/// # Example
///
/// ```ignore
/// let queue = AsyncUploadQueue::new(device.clone(), AsyncUploadQueueDescriptor::default())?;
/// let value = queue.queue_buffer_upload(BufferStreamRequest::new(buffer, bytes))?;
/// // ...
/// if queue.is_upload_finished(value) {
///     // the buffer holds the new data
/// }
/// ```
pub struct AsyncUploadQueue {
    device: Arc<Device>,
    descriptor: AsyncUploadQueueDescriptor,
    upload_fence: Arc<Fence>,
    sender: Mutex<Option<mpsc::SyncSender<UploadCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<VecDeque<(u64, UploadCallback)>>,
}

impl AsyncUploadQueue {
    /// Create the staging ring and start the upload thread.
    pub fn new(
        device: Arc<Device>,
        descriptor: AsyncUploadQueueDescriptor,
    ) -> Result<Self, RhiError> {
        if descriptor.frame_count == 0 || descriptor.staging_size_in_bytes == 0 {
            return Err(RhiError::InvalidParameter(format!(
                "upload queue needs at least one frame packet and a non-empty staging buffer, got {descriptor:?}"
            )));
        }

        let staging_buffers = (0..descriptor.frame_count)
            .map(|index| {
                device.create_buffer(
                    &BufferDescriptor::new(
                        descriptor.staging_size_in_bytes,
                        BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
                    )
                    .with_label(format!("AsyncUploadQueue staging {index}")),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let upload_fence = Arc::new(Fence::new(&device)?);
        let worker = UploadWorker::new(
            Arc::clone(&device),
            descriptor.queue_class,
            staging_buffers,
            Arc::clone(&upload_fence),
        )?;

        let (sender, receiver) = mpsc::sync_channel(descriptor.frame_count as usize);
        let handle = std::thread::Builder::new()
            .name("rhi-async-upload".to_string())
            .spawn(move || worker.run(receiver))
            .map_err(|e| {
                RhiError::InitializationFailed(format!("Failed to spawn upload thread: {e}"))
            })?;

        log::debug!(
            "AsyncUploadQueue: {} packets of {} bytes on the {} queue",
            descriptor.frame_count,
            descriptor.staging_size_in_bytes,
            descriptor.queue_class
        );

        Ok(Self {
            device,
            descriptor,
            upload_fence,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
            callbacks: Mutex::new(VecDeque::new()),
        })
    }

    /// Create a queue with the descriptor from the device parameters.
    pub fn from_device(device: Arc<Device>) -> Result<Self, RhiError> {
        let descriptor = device.parameters().upload_queue.clone();
        Self::new(device, descriptor)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn descriptor(&self) -> &AsyncUploadQueueDescriptor {
        &self.descriptor
    }

    /// The fence every returned value belongs to.
    pub fn upload_fence(&self) -> &Arc<Fence> {
        &self.upload_fence
    }

    /// Issue the next fence value and hand the command built from it to the
    /// upload thread. Values reach the thread in issue order. Blocks while
    /// the ring is saturated.
    fn send(
        &self,
        command: impl FnOnce(u64) -> UploadCommand,
        callback: Option<UploadCallback>,
        wait_for_upload: bool,
    ) -> Result<u64, RhiError> {
        let value = {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                return Err(RhiError::QueueShutDown);
            };
            let value = self.upload_fence.increment();
            if sender.send(command(value)).is_err() {
                log::error!("AsyncUploadQueue: upload thread is gone, releasing value {value}");
                if let Err(e) = self.upload_fence.signal_from_cpu_value(value) {
                    log::error!("AsyncUploadQueue: could not signal value {value}: {e}");
                }
                return Err(RhiError::QueueShutDown);
            }
            if !wait_for_upload && let Some(callback) = callback {
                self.callbacks.lock().push_back((value, callback));
                return Ok(value);
            }
            value
        };

        if wait_for_upload {
            self.wait_for_upload(value)?;
            if let Some(callback) = callback {
                callback();
            }
        }
        Ok(value)
    }

    /// Stream bytes into a buffer. Returns the upload fence value.
    ///
    /// Data larger than a staging buffer is split across frame packets.
    pub fn queue_buffer_upload(&self, request: BufferStreamRequest) -> Result<u64, RhiError> {
        profile_scope!("queue_buffer_upload");

        let BufferStreamRequest {
            buffer,
            byte_offset,
            data,
            wait_for_upload,
            on_complete,
        } = request;

        if data.is_empty() {
            return Err(RhiError::InvalidParameter(
                "buffer upload without data".to_string(),
            ));
        }
        if byte_offset
            .checked_add(data.len() as u64)
            .is_none_or(|end| end > buffer.size())
        {
            return Err(RhiError::InvalidParameter(format!(
                "upload of {} bytes at {byte_offset} exceeds buffer {:?} of size {}",
                data.len(),
                buffer.label(),
                buffer.size()
            )));
        }

        log::trace!(
            "AsyncUploadQueue: queue {} bytes for buffer {:?}",
            data.len(),
            buffer.label()
        );
        self.send(
            |fence_value| UploadCommand::Buffer {
                buffer,
                byte_offset,
                data,
                fence_value,
            },
            on_complete,
            wait_for_upload,
        )
    }

    /// Upload the mips below `resident_mip` described by `request`. Returns
    /// the upload fence value.
    ///
    /// The image becomes resident from `resident_mip - n` when the completion
    /// callbacks of the value are processed. Mips are split on row
    /// boundaries; a single row larger than a staging buffer is rejected.
    pub fn queue_image_upload(
        &self,
        request: ImageExpandRequest,
        resident_mip: u32,
    ) -> Result<u64, RhiError> {
        profile_scope!("queue_image_upload");

        let ImageExpandRequest {
            image,
            mip_slices,
            wait_for_upload,
            on_complete,
        } = request;
        let descriptor = image.descriptor();
        let mip_count = mip_slices.len() as u32;

        if mip_count == 0 || resident_mip > descriptor.mip_levels || mip_count > resident_mip {
            return Err(RhiError::InvalidParameter(format!(
                "cannot expand image {:?} by {mip_count} mips from resident mip {resident_mip} of {}",
                image.label(),
                descriptor.mip_levels
            )));
        }
        let first_mip = resident_mip - mip_count;

        for (mip, slice) in (first_mip..resident_mip).zip(&mip_slices) {
            let row_pitch = descriptor.mip_row_pitch(mip);
            if row_pitch > self.descriptor.staging_size_in_bytes {
                return Err(RhiError::InvalidParameter(format!(
                    "row of {row_pitch} bytes in mip {mip} exceeds the staging size {}",
                    self.descriptor.staging_size_in_bytes
                )));
            }
            if slice.layers.len() as u32 != descriptor.array_layers {
                return Err(RhiError::InvalidParameter(format!(
                    "mip {mip} has {} layers, image has {}",
                    slice.layers.len(),
                    descriptor.array_layers
                )));
            }
            let layer_size = descriptor.mip_layer_size(mip);
            if let Some(layer) = slice
                .layers
                .iter()
                .find(|layer| layer.len() as u64 != layer_size)
            {
                return Err(RhiError::InvalidParameter(format!(
                    "mip {mip} layer has {} bytes, expected {layer_size}",
                    layer.len()
                )));
            }
        }

        let resident_image = Arc::clone(&image);
        let callback: UploadCallback = Box::new(move || {
            resident_image.set_resident_mip(first_mip);
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        });

        log::trace!(
            "AsyncUploadQueue: queue mips {first_mip}..{resident_mip} of image {:?}",
            image.label()
        );
        self.send(
            |fence_value| UploadCommand::Image {
                image,
                first_mip,
                mip_slices,
                fence_value,
            },
            Some(callback),
            wait_for_upload,
        )
    }

    /// Update tile mappings of a reserved image ahead of later uploads.
    /// Returns the upload fence value.
    pub fn queue_tile_mapping(&self, request: TileMappingRequest) -> Result<u64, RhiError> {
        if !request.image.descriptor().reserved {
            return Err(RhiError::InvalidParameter(format!(
                "image {:?} is not reserved",
                request.image.label()
            )));
        }
        self.send(
            |fence_value| UploadCommand::TileMapping {
                request,
                fence_value,
            },
            None,
            false,
        )
    }

    /// Make the next submission of the upload queue wait on the GPU for
    /// `fence` to reach `value`. Uses no staging space.
    pub fn queue_wait_fence(&self, fence: Arc<Fence>, value: u64) -> Result<(), RhiError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(RhiError::QueueShutDown);
        };
        sender
            .send(UploadCommand::WaitFence { fence, value })
            .map_err(|_| RhiError::QueueShutDown)
    }

    /// Whether the upload of `fence_value` has completed.
    pub fn is_upload_finished(&self, fence_value: u64) -> bool {
        self.upload_fence.is_signaled(fence_value)
    }

    /// Block until the upload of `fence_value` has completed.
    pub fn wait_for_upload(&self, fence_value: u64) -> Result<(), RhiError> {
        self.upload_fence.wait_on_cpu_value(fence_value)
    }

    /// Run and remove every callback whose value is at or below
    /// `fence_value`.
    pub fn process_callbacks(&self, fence_value: u64) {
        let ready: Vec<UploadCallback> = {
            let mut callbacks = self.callbacks.lock();
            let count = callbacks
                .iter()
                .take_while(|(value, _)| *value <= fence_value)
                .count();
            callbacks.drain(..count).map(|(_, callback)| callback).collect()
        };
        for callback in ready {
            callback();
        }
    }

    /// Run the callbacks of every upload that has completed.
    pub fn process_completed_callbacks(&self) {
        self.process_callbacks(self.upload_fence.completed_value());
    }

    /// Number of callbacks not yet run.
    pub fn pending_callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Stop accepting requests, finish the queued ones and run their
    /// callbacks.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);

        let joined = match self.worker.lock().take() {
            Some(worker) => worker.join().is_ok(),
            None => true,
        };
        if !joined {
            log::error!("AsyncUploadQueue: upload thread panicked");
            return;
        }

        if let Err(e) = self.upload_fence.wait_on_cpu() {
            log::error!("AsyncUploadQueue: waiting for outstanding uploads failed: {e}");
        }
        self.process_callbacks(self.upload_fence.pending_value());
        log::debug!("AsyncUploadQueue: shut down");
    }
}

impl Drop for AsyncUploadQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AsyncUploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncUploadQueue")
            .field("descriptor", &self.descriptor)
            .field("upload_fence", &self.upload_fence)
            .field("pending_callbacks", &self.pending_callback_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(AsyncUploadQueue: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::parameters::{BackendType, DeviceParameters};
    use crate::resources::Buffer;
    use crate::types::{HardwareQueueClass, ImageDescriptor, ImageFormat, ImageUsage};
    use crate::upload::ImageMipSlice;

    fn device() -> Arc<Device> {
        Device::new(DeviceParameters::new().with_backend(BackendType::Dummy)).unwrap()
    }

    fn queue(device: &Arc<Device>, frame_count: u32, staging_size: u64) -> AsyncUploadQueue {
        AsyncUploadQueue::new(
            Arc::clone(device),
            AsyncUploadQueueDescriptor {
                frame_count,
                staging_size_in_bytes: staging_size,
                queue_class: HardwareQueueClass::Copy,
            },
        )
        .unwrap()
    }

    fn target_buffer(device: &Arc<Device>, size: u64) -> Arc<Buffer> {
        device
            .create_buffer(&BufferDescriptor::new(
                size,
                BufferUsage::COPY_DST | BufferUsage::MAP_READ,
            ))
            .unwrap()
    }

    #[test]
    fn test_rejects_empty_descriptor() {
        let device = device();
        let result = AsyncUploadQueue::new(
            device,
            AsyncUploadQueueDescriptor {
                frame_count: 0,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(RhiError::InvalidParameter(_))));
    }

    #[test]
    fn test_buffer_upload_round_trip() {
        let device = device();
        let queue = queue(&device, 2, 1024);
        let buffer = target_buffer(&device, 256);
        let data: Vec<u8> = (0..=255).collect();

        let value = queue
            .queue_buffer_upload(BufferStreamRequest::new(Arc::clone(&buffer), data.clone()))
            .unwrap();
        queue.wait_for_upload(value).unwrap();
        assert!(queue.is_upload_finished(value));
        assert_eq!(buffer.read(0, 256).unwrap(), data);
    }

    #[test]
    fn test_oversized_buffer_is_chunked() {
        let device = device();
        let queue = queue(&device, 2, 100);
        let buffer = target_buffer(&device, 1000);
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();

        let value = queue
            .queue_buffer_upload(
                BufferStreamRequest::new(Arc::clone(&buffer), data.clone())
                    .with_wait_for_upload(true),
            )
            .unwrap();
        assert!(queue.is_upload_finished(value));
        assert_eq!(buffer.read(0, 1000).unwrap(), data);
    }

    #[test]
    fn test_out_of_range_upload_is_rejected() {
        let device = device();
        let queue = queue(&device, 1, 64);
        let buffer = target_buffer(&device, 16);
        let result = queue.queue_buffer_upload(
            BufferStreamRequest::new(buffer, vec![0; 8]).with_byte_offset(12),
        );
        assert!(matches!(result, Err(RhiError::InvalidParameter(_))));
        assert_eq!(queue.upload_fence().pending_value(), 0);
    }

    #[test]
    fn test_callbacks_run_when_processed() {
        let device = device();
        let queue = queue(&device, 2, 256);
        let buffer = target_buffer(&device, 64);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let value = queue
            .queue_buffer_upload(
                BufferStreamRequest::new(buffer, vec![1; 64]).with_on_complete(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(queue.pending_callback_count(), 1);

        queue.wait_for_upload(value).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        queue.process_callbacks(value);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_callback_count(), 0);
    }

    #[test]
    fn test_image_expand_sets_resident_mip() {
        let device = device();
        let queue = queue(&device, 2, 64);
        let image = device
            .create_image(
                &ImageDescriptor::new_2d(8, 8, ImageFormat::Rgba8Unorm, ImageUsage::COPY_DST)
                    .with_mip_levels(4),
            )
            .unwrap();
        image.set_resident_mip(4);

        // Mips 1 (4x4) and 2 (2x2); mip 1 is 64 bytes so it fills a packet
        let mip1: Vec<u8> = (0..64).collect();
        let mip2: Vec<u8> = (100..116).collect();
        let value = queue
            .queue_image_upload(
                ImageExpandRequest::new(
                    Arc::clone(&image),
                    vec![ImageMipSlice::single(mip1.clone()), ImageMipSlice::single(mip2.clone())],
                ),
                3,
            )
            .unwrap();

        queue.wait_for_upload(value).unwrap();
        queue.process_completed_callbacks();
        assert_eq!(image.resident_mip(), 1);
        assert_eq!(image.read_subresource(1, 0).unwrap(), mip1);
        assert_eq!(image.read_subresource(2, 0).unwrap(), mip2);
    }

    #[test]
    fn test_oversized_row_is_rejected() {
        let device = device();
        let queue = queue(&device, 1, 16);
        let image = device
            .create_image(&ImageDescriptor::new_2d(
                8,
                1,
                ImageFormat::Rgba8Unorm,
                ImageUsage::COPY_DST,
            ))
            .unwrap();
        image.set_resident_mip(1);
        let result = queue.queue_image_upload(
            ImageExpandRequest::new(image, vec![ImageMipSlice::single(vec![0; 32])]),
            1,
        );
        assert!(matches!(result, Err(RhiError::InvalidParameter(_))));
    }

    #[test]
    fn test_shutdown_rejects_new_requests() {
        let device = device();
        let queue = queue(&device, 1, 64);
        let buffer = target_buffer(&device, 64);
        queue
            .queue_buffer_upload(BufferStreamRequest::new(Arc::clone(&buffer), vec![3; 64]))
            .unwrap();
        queue.shutdown();
        assert_eq!(buffer.read(0, 64).unwrap(), vec![3; 64]);
        assert_eq!(
            queue
                .queue_buffer_upload(BufferStreamRequest::new(buffer, vec![0; 4]))
                .unwrap_err(),
            RhiError::QueueShutDown
        );
    }
}
