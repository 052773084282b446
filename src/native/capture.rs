//! A [`DeviceFns`] that records every call instead of talking to a driver.
//!
//! Used to inspect the exact native call sequence a command buffer translates
//! to (trace dumps, tests). Creation calls hand out fresh fake handles and can
//! be told to fail.

use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use super::DeviceFns;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub range: ImageRange,
}

/// Comparable copy of a `vk::ImageSubresourceRange`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageRange {
    pub aspects: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl From<vk::ImageSubresourceRange> for ImageRange {
    fn from(range: vk::ImageSubresourceRange) -> Self {
        Self {
            aspects: range.aspect_mask,
            base_mip: range.base_mip_level,
            mip_count: range.level_count,
            base_layer: range.base_array_layer,
            layer_count: range.layer_count,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Call {
    CreateRenderPass {
        handle: vk::RenderPass,
        attachments: Vec<vk::AttachmentDescription>,
        color_count: u32,
        has_resolve: bool,
        has_depth_stencil: bool,
    },
    DestroyRenderPass(vk::RenderPass),
    CreateFramebuffer {
        handle: vk::Framebuffer,
        render_pass: vk::RenderPass,
        attachments: Vec<vk::ImageView>,
        width: u32,
        height: u32,
    },
    DestroyFramebuffer(vk::Framebuffer),
    CreateDescriptorSetLayout {
        handle: vk::DescriptorSetLayout,
        bindings: Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)>,
    },
    DestroyDescriptorSetLayout(vk::DescriptorSetLayout),
    CreatePipelineLayout {
        handle: vk::PipelineLayout,
        set_layouts: Vec<vk::DescriptorSetLayout>,
    },
    DestroyPipelineLayout(vk::PipelineLayout),
    CreateBuffer {
        handle: vk::Buffer,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    },
    DestroyBuffer(vk::Buffer),
    PipelineBarrier {
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        buffers: Vec<BufferBarrier>,
        images: Vec<ImageBarrier>,
    },
    FillBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageCopy>,
    },
    ClearColorImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    ClearDepthStencilImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        /// Raw bits of each clear value. Depth-stencil values occupy the
        /// first two words.
        clear_values: Vec<[u32; 4]>,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    DrawIndexedIndirect {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    SetBlendConstants([f32; 4]),
    SetStencilReference(u32),
    SetLineWidth(f32),
    SetDepthBounds(f32, f32),
    ResetQueryPool {
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    },
    WriteTimestamp {
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    },
    CopyQueryPoolResults {
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    },
    BeginDebugLabel(String),
    EndDebugLabel,
    InsertDebugLabel(String),
}

pub struct CaptureDevice {
    calls: Mutex<Vec<Call>>,
    next_handle: AtomicU64,
    fail_creation: AtomicBool,
}

impl Default for CaptureDevice {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0x1000),
            fail_creation: AtomicBool::new(false),
        }
    }
}

impl CaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following object creation fail with
    /// `ERROR_OUT_OF_DEVICE_MEMORY` until switched back off.
    pub fn fail_object_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.lock())
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        // A panicking test thread must not hide the calls it captured.
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, call: Call) {
        self.lock().push(call);
    }

    fn create<T: Handle>(&self) -> VkResult<T> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        Ok(T::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Reads a Vulkan `(count, pointer)` array pair.
///
/// # Safety
/// `ptr` must point at `count` valid elements when `count` is non-zero.
unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if count == 0 || ptr.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

impl DeviceFns for CaptureDevice {
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        let handle = self.create()?;
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) }.to_vec();
        let subpasses = unsafe { raw_slice(info.p_subpasses, info.subpass_count) };
        let (color_count, has_resolve, has_depth_stencil) = subpasses
            .first()
            .map(|s| {
                (
                    s.color_attachment_count,
                    !s.p_resolve_attachments.is_null(),
                    !s.p_depth_stencil_attachment.is_null(),
                )
            })
            .unwrap_or_default();
        self.push(Call::CreateRenderPass {
            handle,
            attachments,
            color_count,
            has_resolve,
            has_depth_stencil,
        });
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.push(Call::DestroyRenderPass(render_pass));
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        let handle = self.create()?;
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) }.to_vec();
        self.push(Call::CreateFramebuffer {
            handle,
            render_pass: info.render_pass,
            attachments,
            width: info.width,
            height: info.height,
        });
        Ok(handle)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        let handle = self.create()?;
        let bindings = unsafe { raw_slice(info.p_bindings, info.binding_count) }
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.stage_flags))
            .collect();
        self.push(Call::CreateDescriptorSetLayout { handle, bindings });
        Ok(handle)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.push(Call::DestroyDescriptorSetLayout(layout));
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        let handle = self.create()?;
        let set_layouts =
            unsafe { raw_slice(info.p_set_layouts, info.set_layout_count) }.to_vec();
        self.push(Call::CreatePipelineLayout {
            handle,
            set_layouts,
        });
        Ok(handle)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.push(Call::DestroyPipelineLayout(layout));
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let handle = self.create()?;
        self.push(Call::CreateBuffer {
            handle,
            size,
            usage,
        });
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.push(Call::DestroyBuffer(buffer));
    }

    fn cmd_pipeline_barrier(
        &self,
        _cmd: vk::CommandBuffer,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.push(Call::PipelineBarrier {
            src_stages,
            dst_stages,
            buffers: buffer_barriers
                .iter()
                .map(|b| BufferBarrier {
                    buffer: b.buffer,
                    src_access: b.src_access_mask,
                    dst_access: b.dst_access_mask,
                })
                .collect(),
            images: image_barriers
                .iter()
                .map(|b| ImageBarrier {
                    image: b.image,
                    src_access: b.src_access_mask,
                    dst_access: b.dst_access_mask,
                    old_layout: b.old_layout,
                    new_layout: b.new_layout,
                    range: b.subresource_range.into(),
                })
                .collect(),
        });
    }

    fn cmd_fill_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        self.push(Call::FillBuffer {
            buffer,
            offset,
            size,
            data,
        });
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.push(Call::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.push(Call::CopyBufferToImage {
            src,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_image_to_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.push(Call::CopyImageToBuffer {
            src,
            src_layout,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        self.push(Call::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn cmd_clear_color_image(
        &self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        _color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        self.push(Call::ClearColorImage {
            image,
            layout,
            ranges: ranges.to_vec(),
        });
    }

    fn cmd_clear_depth_stencil_image(
        &self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        self.push(Call::ClearDepthStencilImage {
            image,
            layout,
            value: *value,
            ranges: ranges.to_vec(),
        });
    }

    fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        // Clear values are built zeroed, so all four words are initialized
        // whichever member was written.
        let clear_values = unsafe { raw_slice(info.p_clear_values, info.clear_value_count) }
            .iter()
            .map(|value| unsafe { value.color.uint32 })
            .collect();
        self.push(Call::BeginRenderPass {
            render_pass: info.render_pass,
            framebuffer: info.framebuffer,
            render_area: info.render_area,
            clear_values,
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.push(Call::EndRenderPass);
    }

    fn cmd_bind_pipeline(
        &self,
        _cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.push(Call::BindPipeline {
            bind_point,
            pipeline,
        });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.push(Call::BindDescriptorSets {
            bind_point,
            layout,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        _cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.push(Call::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.push(Call::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn cmd_draw(
        &self,
        _cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.push(Call::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn cmd_draw_indexed(
        &self,
        _cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.push(Call::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }

    fn cmd_draw_indirect(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        self.push(Call::DrawIndirect { buffer, offset });
    }

    fn cmd_draw_indexed_indirect(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        self.push(Call::DrawIndexedIndirect { buffer, offset });
    }

    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.push(Call::Dispatch { x, y, z });
    }

    fn cmd_dispatch_indirect(
        &self,
        _cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        self.push(Call::DispatchIndirect { buffer, offset });
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        self.push(Call::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        self.push(Call::SetScissor(*scissor));
    }

    fn cmd_set_blend_constants(&self, _cmd: vk::CommandBuffer, constants: &[f32; 4]) {
        self.push(Call::SetBlendConstants(*constants));
    }

    fn cmd_set_stencil_reference(&self, _cmd: vk::CommandBuffer, reference: u32) {
        self.push(Call::SetStencilReference(reference));
    }

    fn cmd_set_line_width(&self, _cmd: vk::CommandBuffer, width: f32) {
        self.push(Call::SetLineWidth(width));
    }

    fn cmd_set_depth_bounds(&self, _cmd: vk::CommandBuffer, min: f32, max: f32) {
        self.push(Call::SetDepthBounds(min, max));
    }

    fn cmd_reset_query_pool(
        &self,
        _cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        self.push(Call::ResetQueryPool {
            pool,
            first_query,
            query_count,
        });
    }

    fn cmd_write_timestamp(
        &self,
        _cmd: vk::CommandBuffer,
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    ) {
        self.push(Call::WriteTimestamp { stage, pool, query });
    }

    fn cmd_copy_query_pool_results(
        &self,
        _cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) {
        self.push(Call::CopyQueryPoolResults {
            pool,
            first_query,
            query_count,
            dst,
            dst_offset,
            stride,
            flags,
        });
    }

    fn cmd_begin_debug_label(&self, _cmd: vk::CommandBuffer, label: &str) {
        self.push(Call::BeginDebugLabel(label.to_owned()));
    }

    fn cmd_end_debug_label(&self, _cmd: vk::CommandBuffer) {
        self.push(Call::EndDebugLabel);
    }

    fn cmd_insert_debug_label(&self, _cmd: vk::CommandBuffer, label: &str) {
        self.push(Call::InsertDebugLabel(label.to_owned()));
    }
}
