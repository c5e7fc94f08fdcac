//! The upload thread and its ring of frame packets.

use std::sync::Arc;
use std::sync::mpsc;

use crate::backend::{QueueSubmission, TimelinePoint};
use crate::command_list::{BufferImageCopyRegion, CommandList, UploadBarrier};
use crate::device::Device;
use crate::error::RhiError;
use crate::profiling::{profile_plot, profile_scope, set_thread_name};
use crate::resources::{Buffer, Image, TileMappingRequest};
use crate::sync::Fence;
use crate::types::{CommandListLevel, HardwareQueueClass};

use super::request::ImageMipSlice;

/// Alignment of each copy source inside a staging buffer.
pub(super) const STAGING_ALIGNMENT: u64 = 16;

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Work handed from the queueing threads to the upload thread.
pub(super) enum UploadCommand {
    Buffer {
        buffer: Arc<Buffer>,
        byte_offset: u64,
        data: Vec<u8>,
        fence_value: u64,
    },
    Image {
        image: Arc<Image>,
        first_mip: u32,
        mip_slices: Vec<ImageMipSlice>,
        fence_value: u64,
    },
    TileMapping {
        request: TileMappingRequest,
        fence_value: u64,
    },
    WaitFence {
        fence: Arc<Fence>,
        value: u64,
    },
}

impl UploadCommand {
    fn fence_value(&self) -> Option<u64> {
        match self {
            Self::Buffer { fence_value, .. }
            | Self::Image { fence_value, .. }
            | Self::TileMapping { fence_value, .. } => Some(*fence_value),
            Self::WaitFence { .. } => None,
        }
    }
}

/// One slot of the staging ring.
struct FramePacket {
    staging: Arc<Buffer>,
    fence: Fence,
    fence_value: u64,
    command_list: Option<CommandList>,
    data_offset: u64,
}

/// State owned by the upload thread.
pub(super) struct UploadWorker {
    device: Arc<Device>,
    queue_class: HardwareQueueClass,
    staging_size: u64,
    upload_fence: Arc<Fence>,
    packets: Vec<FramePacket>,
    packet_index: usize,
    pending_waits: Vec<TimelinePoint>,
}

impl UploadWorker {
    pub(super) fn new(
        device: Arc<Device>,
        queue_class: HardwareQueueClass,
        staging_buffers: Vec<Arc<Buffer>>,
        upload_fence: Arc<Fence>,
    ) -> Result<Self, RhiError> {
        let staging_size = staging_buffers.first().map_or(0, |buffer| buffer.size());
        let packets = staging_buffers
            .into_iter()
            .map(|staging| {
                Ok(FramePacket {
                    staging,
                    fence: Fence::new(&device)?,
                    fence_value: 0,
                    command_list: None,
                    data_offset: 0,
                })
            })
            .collect::<Result<Vec<_>, RhiError>>()?;

        Ok(Self {
            device,
            queue_class,
            staging_size,
            upload_fence,
            packets,
            packet_index: 0,
            pending_waits: Vec::new(),
        })
    }

    pub(super) fn run(mut self, receiver: mpsc::Receiver<UploadCommand>) {
        set_thread_name!("rhi async upload");
        log::debug!(
            "AsyncUploadQueue: worker started with {} packets of {} bytes",
            self.packets.len(),
            self.staging_size
        );

        while let Ok(command) = receiver.recv() {
            self.process(command);
        }

        for packet in &self.packets {
            if let Err(e) = packet.fence.wait_on_cpu_value(packet.fence_value) {
                log::error!("AsyncUploadQueue: waiting for a frame packet failed: {e}");
            }
        }
        log::debug!("AsyncUploadQueue: worker stopped");
    }

    fn process(&mut self, command: UploadCommand) {
        profile_scope!("upload_process");

        let fence_value = command.fence_value();
        let result = match command {
            UploadCommand::Buffer {
                buffer,
                byte_offset,
                data,
                fence_value,
            } => self.upload_buffer(&buffer, byte_offset, &data, fence_value),
            UploadCommand::Image {
                image,
                first_mip,
                mip_slices,
                fence_value,
            } => self.upload_image(&image, first_mip, &mip_slices, fence_value),
            UploadCommand::TileMapping {
                request,
                fence_value,
            } => self.map_tiles(request, fence_value),
            UploadCommand::WaitFence { fence, value } => {
                self.pending_waits
                    .push(TimelinePoint::new(fence.timeline().clone(), value));
                Ok(())
            }
        };

        if let Err(e) = result {
            log::error!("AsyncUploadQueue: upload {fence_value:?} failed: {e}");
            self.recover(fence_value);
        }
    }

    /// Signal `fence_value` after a failed request so waiters are released.
    fn recover(&mut self, fence_value: Option<u64>) {
        let open = self.packets[self.packet_index].command_list.is_some();
        if open && self.end_frame_packet(fence_value).is_ok() {
            return;
        }
        self.packets[self.packet_index].command_list = None;

        if let Some(value) = fence_value {
            // Earlier values are signaled by the queue; keep the timeline monotonic
            let signaled = self
                .upload_fence
                .wait_on_cpu_value(value - 1)
                .and_then(|()| self.upload_fence.signal_from_cpu_value(value));
            if let Err(e) = signaled {
                log::error!("AsyncUploadQueue: could not signal upload {value}: {e}");
            }
        }
    }

    /// Claim the current ring slot, blocking until its previous submission
    /// has completed.
    fn begin_frame_packet(&mut self) -> Result<(), RhiError> {
        profile_scope!("begin_frame_packet");

        let index = self.packet_index;
        let packet = &mut self.packets[index];
        if !packet.fence.is_signaled(packet.fence_value) {
            log::trace!("AsyncUploadQueue: waiting for frame packet {index}");
            packet.fence.wait_on_cpu_value(packet.fence_value)?;
        }

        let mut command_list = self
            .device
            .create_command_list(self.queue_class, CommandListLevel::Primary)?;
        command_list.set_name(format!("AsyncUploadQueue packet {index}"));
        command_list.begin(None)?;
        packet.command_list = Some(command_list);
        packet.data_offset = 0;
        Ok(())
    }

    /// Submit the current slot and advance the ring.
    fn end_frame_packet(&mut self, signal_value: Option<u64>) -> Result<(), RhiError> {
        profile_scope!("end_frame_packet");

        let packet = &mut self.packets[self.packet_index];
        let Some(mut command_list) = packet.command_list.take() else {
            return Err(RhiError::Internal("frame packet is not open".to_string()));
        };
        command_list.end()?;

        let mut submission = QueueSubmission::new().with_command_list(command_list);
        submission.wait_points = std::mem::take(&mut self.pending_waits);
        packet.fence_value = packet.fence.increment();
        packet
            .fence
            .signal_from_gpu_value(&mut submission, packet.fence_value);
        if let Some(value) = signal_value {
            self.upload_fence.signal_from_gpu_value(&mut submission, value);
        }

        profile_plot!("upload_staged_bytes", packet.data_offset);
        log::trace!(
            "AsyncUploadQueue: submitting packet {} with {} bytes staged",
            self.packet_index,
            packet.data_offset
        );
        let index = self.packet_index;
        self.packet_index = (index + 1) % self.packets.len();

        if let Err(e) = self.device.submit(self.queue_class, submission) {
            // The slot must stay reusable
            let packet = &self.packets[index];
            if let Err(signal_error) = packet.fence.signal_from_cpu_value(packet.fence_value) {
                log::error!("AsyncUploadQueue: could not release packet {index}: {signal_error}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn rotate_frame_packet(&mut self) -> Result<(), RhiError> {
        self.end_frame_packet(None)?;
        self.begin_frame_packet()
    }

    fn staging_space(&self) -> u64 {
        self.staging_size
            .saturating_sub(self.packets[self.packet_index].data_offset)
    }

    fn staging_buffer(&self) -> Arc<Buffer> {
        Arc::clone(&self.packets[self.packet_index].staging)
    }

    /// Copy `bytes` into the current staging buffer and return their offset.
    fn stage(&mut self, bytes: &[u8]) -> Result<u64, RhiError> {
        let packet = &mut self.packets[self.packet_index];
        let offset = packet.data_offset;
        packet.staging.write(offset, bytes)?;
        packet.data_offset = align_up(offset + bytes.len() as u64, STAGING_ALIGNMENT);
        Ok(offset)
    }

    fn command_list(&mut self) -> Result<&mut CommandList, RhiError> {
        self.packets[self.packet_index]
            .command_list
            .as_mut()
            .ok_or_else(|| RhiError::Internal("frame packet is not open".to_string()))
    }

    fn upload_buffer(
        &mut self,
        buffer: &Arc<Buffer>,
        byte_offset: u64,
        data: &[u8],
        fence_value: u64,
    ) -> Result<(), RhiError> {
        profile_scope!("upload_buffer");

        self.begin_frame_packet()?;
        let mut copied = 0;
        while copied < data.len() {
            let space = self.staging_space();
            if space == 0 {
                self.rotate_frame_packet()?;
                continue;
            }
            let len = (space as usize).min(data.len() - copied);
            let staging = self.staging_buffer();
            let offset = self.stage(&data[copied..copied + len])?;
            self.command_list()?.copy_buffer(
                &staging,
                offset,
                buffer,
                byte_offset + copied as u64,
                len as u64,
            );
            copied += len;
        }
        self.end_frame_packet(Some(fence_value))
    }

    fn upload_image(
        &mut self,
        image: &Arc<Image>,
        first_mip: u32,
        mip_slices: &[ImageMipSlice],
        fence_value: u64,
    ) -> Result<(), RhiError> {
        profile_scope!("upload_image");

        let descriptor = image.descriptor().clone();
        let mips = first_mip..first_mip + mip_slices.len() as u32;

        self.begin_frame_packet()?;
        self.command_list()?
            .image_upload_barrier(image, mips.clone(), UploadBarrier::BeginTransfer);

        for (mip, slice) in mips.clone().zip(mip_slices) {
            let row_pitch = descriptor.mip_row_pitch(mip);
            let (_, height) = descriptor.mip_extent(mip);

            for (array_layer, data) in slice.layers.iter().enumerate() {
                let mut row = 0;
                while row < height {
                    let rows_fit = (self.staging_space() / row_pitch).min(u64::from(height - row));
                    if rows_fit == 0 {
                        if self.packets[self.packet_index].data_offset == 0 {
                            return Err(RhiError::InvalidParameter(format!(
                                "row of {row_pitch} bytes does not fit the staging buffer"
                            )));
                        }
                        self.rotate_frame_packet()?;
                        continue;
                    }
                    let row_count = rows_fit as u32;
                    let start = (u64::from(row) * row_pitch) as usize;
                    let end = start + (rows_fit * row_pitch) as usize;

                    let staging = self.staging_buffer();
                    let buffer_offset = self.stage(&data[start..end])?;
                    self.command_list()?.copy_buffer_to_image(
                        &staging,
                        image,
                        BufferImageCopyRegion {
                            buffer_offset,
                            mip,
                            array_layer: array_layer as u32,
                            first_row: row,
                            row_count,
                        },
                    );
                    row += row_count;
                }
            }
        }

        self.command_list()?
            .image_upload_barrier(image, mips, UploadBarrier::EndTransfer);
        self.end_frame_packet(Some(fence_value))
    }

    fn map_tiles(&mut self, request: TileMappingRequest, fence_value: u64) -> Result<(), RhiError> {
        let wait_points = std::mem::take(&mut self.pending_waits);
        let signal_points = vec![TimelinePoint::new(
            self.upload_fence.timeline().clone(),
            fence_value,
        )];
        self.device
            .update_tile_mappings(self.queue_class, request, wait_points, signal_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, STAGING_ALIGNMENT), 0);
        assert_eq!(align_up(1, STAGING_ALIGNMENT), 16);
        assert_eq!(align_up(32, STAGING_ALIGNMENT), 32);
    }
}
