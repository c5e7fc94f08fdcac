//! Vulkan command pool and buffer management.

use std::ffi::CString;
use std::ops::Range;

use ash::vk;
use ash::vk::Handle;

use crate::backend::{GpuBuffer, GpuImage};
use crate::command_list::{BufferImageCopyRegion, CommandList, InheritanceInfo, NativeCommandList, UploadBarrier};
use crate::draw::{DrawArguments, DrawItem, IndexFormat};
use crate::error::RhiError;
use crate::resources::{Buffer, Image};
use crate::types::CommandListLevel;

use super::debug;

/// Create a command pool on a queue family.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, RhiError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| RhiError::vulkan("vkCreateCommandPool", e))
}

fn native_buffer(buffer: &Buffer) -> Option<vk::Buffer> {
    match buffer.native() {
        GpuBuffer::Vulkan { buffer, .. } => Some(*buffer),
        GpuBuffer::Dummy { .. } => None,
    }
}

fn native_image(image: &Image) -> Option<vk::Image> {
    match image.native() {
        GpuImage::Vulkan { image, .. } => Some(*image),
        GpuImage::Dummy { .. } => None,
    }
}

/// A command buffer with its own pool, so lists can be recorded on any thread.
pub struct VulkanCommandList {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl VulkanCommandList {
    pub(crate) fn new(
        device: ash::Device,
        debug_utils: Option<ash::ext::debug_utils::Device>,
        queue_family_index: u32,
        level: CommandListLevel,
    ) -> Result<Self, RhiError> {
        let pool = create_command_pool(&device, queue_family_index)?;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(match level {
                CommandListLevel::Primary => vk::CommandBufferLevel::PRIMARY,
                CommandListLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
            })
            .command_buffer_count(1);

        let command_buffer = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(RhiError::vulkan("vkAllocateCommandBuffers", e));
            }
        };

        Ok(Self {
            device,
            debug_utils,
            pool,
            command_buffer,
        })
    }

    /// The native command buffer.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub(crate) fn set_name(&self, name: &str) {
        if let Some(debug_utils) = &self.debug_utils {
            debug::set_object_name(debug_utils, self.command_buffer, name);
        }
    }

    pub(crate) fn begin(
        &mut self,
        level: CommandListLevel,
        inheritance: Option<&InheritanceInfo>,
    ) -> Result<(), RhiError> {
        let inheritance_info = inheritance.map(|info| {
            vk::CommandBufferInheritanceInfo::default()
                .render_pass(vk::RenderPass::from_raw(info.render_pass))
                .subpass(info.subpass)
                .framebuffer(vk::Framebuffer::from_raw(info.framebuffer))
        });

        let mut flags = vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        if level == CommandListLevel::Secondary {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        let mut begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        if let Some(inheritance_info) = inheritance_info.as_ref() {
            begin_info = begin_info.inheritance_info(inheritance_info);
        }

        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
        }
        .map_err(|e| RhiError::vulkan("vkBeginCommandBuffer", e))
    }

    pub(crate) fn end(&mut self) -> Result<(), RhiError> {
        unsafe { self.device.end_command_buffer(self.command_buffer) }
            .map_err(|e| RhiError::vulkan("vkEndCommandBuffer", e))
    }

    pub(crate) fn begin_label(&mut self, label: &str, color: [f32; 4]) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default()
            .label_name(&name)
            .color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.command_buffer, &label) };
    }

    pub(crate) fn end_label(&mut self) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.command_buffer) };
        }
    }

    pub(crate) fn draw(&mut self, item: &DrawItem) {
        let cb = self.command_buffer;
        unsafe {
            if item.pipeline_state.0 != 0 {
                self.device.cmd_bind_pipeline(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    vk::Pipeline::from_raw(item.pipeline_state.0),
                );
            }

            let (buffers, offsets): (Vec<_>, Vec<_>) = item
                .vertex_buffers
                .iter()
                .filter_map(|view| native_buffer(&view.buffer).map(|buffer| (buffer, view.offset)))
                .unzip();
            if !buffers.is_empty() {
                self.device
                    .cmd_bind_vertex_buffers(cb, 0, &buffers, &offsets);
            }

            match item.arguments {
                DrawArguments::Linear {
                    vertex_count,
                    first_vertex,
                } => {
                    self.device
                        .cmd_draw(cb, vertex_count, item.instance_count, first_vertex, 0);
                }
                DrawArguments::Indexed {
                    index_count,
                    first_index,
                    vertex_offset,
                } => {
                    let Some(view) = &item.index_buffer else {
                        log::error!("Indexed draw item without an index buffer");
                        return;
                    };
                    let Some(buffer) = native_buffer(&view.buffer) else {
                        log::error!("Index buffer is not a Vulkan buffer");
                        return;
                    };
                    let index_type = match view.format {
                        IndexFormat::Uint16 => vk::IndexType::UINT16,
                        IndexFormat::Uint32 => vk::IndexType::UINT32,
                    };
                    self.device
                        .cmd_bind_index_buffer(cb, buffer, view.offset, index_type);
                    self.device.cmd_draw_indexed(
                        cb,
                        index_count,
                        item.instance_count,
                        first_index,
                        vertex_offset,
                        0,
                    );
                }
            }
        }
    }

    pub(crate) fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        let (Some(src_buffer), Some(dst_buffer)) = (native_buffer(src), native_buffer(dst)) else {
            log::error!("copy_buffer with non-Vulkan buffers");
            return;
        };
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(self.command_buffer, src_buffer, dst_buffer, &[region])
        };
    }

    pub(crate) fn copy_buffer_to_image(
        &mut self,
        src: &Buffer,
        dst: &Image,
        region: &BufferImageCopyRegion,
    ) {
        let (Some(src_buffer), Some(dst_image)) = (native_buffer(src), native_image(dst)) else {
            log::error!("copy_buffer_to_image with non-Vulkan resources");
            return;
        };
        let (width, _) = dst.descriptor().mip_extent(region.mip);
        let copy = vk::BufferImageCopy {
            buffer_offset: region.buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: region.mip,
                base_array_layer: region.array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D {
                x: 0,
                y: region.first_row as i32,
                z: 0,
            },
            image_extent: vk::Extent3D {
                width,
                height: region.row_count,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src_buffer,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            )
        };
    }

    pub(crate) fn image_upload_barrier(
        &mut self,
        image: &Image,
        mips: Range<u32>,
        barrier: UploadBarrier,
    ) {
        let Some(native) = native_image(image) else {
            log::error!("image_upload_barrier on a non-Vulkan image");
            return;
        };
        let (old_layout, new_layout, src_access, dst_access, src_stage, dst_stage) = match barrier
        {
            UploadBarrier::BeginTransfer => (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            UploadBarrier::EndTransfer => (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            ),
        };

        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(native)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: mips.start,
                level_count: mips.end - mips.start,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            )
        };
    }

    pub(crate) fn execute_commands(&mut self, lists: &[CommandList]) {
        let buffers: Vec<_> = lists
            .iter()
            .filter_map(|list| match list.native() {
                NativeCommandList::Vulkan(native) => Some(native.command_buffer),
                NativeCommandList::Dummy(_) => None,
            })
            .collect();
        if buffers.len() != lists.len() {
            log::error!("execute_secondary with non-Vulkan command lists");
        }
        if !buffers.is_empty() {
            unsafe {
                self.device
                    .cmd_execute_commands(self.command_buffer, &buffers)
            };
        }
    }
}

impl std::fmt::Debug for VulkanCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandList")
            .field("command_buffer", &self.command_buffer)
            .finish_non_exhaustive()
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        // Destroying the pool frees its command buffer
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}
