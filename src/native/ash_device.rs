use std::{collections::HashMap, ffi::CString, sync::Arc, sync::Mutex};

use ash::{prelude::VkResult, vk};
use vk_mem::Alloc;

use super::DeviceFns;

/// Markers are emitted black, like every other label we record.
const LABEL_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// [`DeviceFns`] over a live `ash::Device`.
///
/// Internal buffers are allocated through `vk_mem`; the allocation is kept
/// until `destroy_buffer` is called for the same handle.
pub struct AshDevice {
    pub device: Arc<ash::Device>,
    pub debug_utils: Option<Arc<ash::ext::debug_utils::Device>>,
    allocator: Arc<vk_mem::Allocator>,
    allocations: Mutex<HashMap<vk::Buffer, vk_mem::Allocation>>,
}

impl AshDevice {
    pub fn new(
        device: Arc<ash::Device>,
        allocator: Arc<vk_mem::Allocator>,
        debug_utils: Option<Arc<ash::ext::debug_utils::Device>>,
    ) -> Self {
        Self {
            device,
            debug_utils,
            allocator,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    pub fn name_object<T>(&self, handle: T, debug_name: impl AsRef<str>) -> anyhow::Result<()>
    where
        T: vk::Handle,
    {
        let Some(debug) = &self.debug_utils else {
            return Ok(());
        };

        let cname = CString::new(debug_name.as_ref())?;

        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&cname);

        unsafe {
            debug
                .set_debug_utils_object_name(&name_info)
                .map_err(|e| anyhow::anyhow!("failed to set debug name: {:?}", e))
        }
    }

    fn label(&self, cmd: vk::CommandBuffer, label: &str, insert: bool) {
        let Some(debug) = &self.debug_utils else {
            return;
        };
        let cname = match CString::new(label) {
            Ok(c) => c,
            Err(_) => {
                log::warn!("skipping debug label with interior null byte: {label:?}");
                return;
            }
        };
        let info = vk::DebugUtilsLabelEXT::default()
            .label_name(&cname)
            .color(LABEL_COLOR);
        unsafe {
            if insert {
                debug.cmd_insert_debug_utils_label(cmd, &info);
            } else {
                debug.cmd_begin_debug_utils_label(cmd, &info);
            }
        }
    }
}

impl DeviceFns for AshDevice {
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        unsafe { self.device.create_descriptor_set_layout(info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let bci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let aci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&bci, &aci)? };
        if let Err(e) = self.name_object(buffer, "arbor internal transfer buffer") {
            log::warn!("{e:?}");
        }

        self.allocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(buffer, allocation);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let allocation = self
            .allocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&buffer);
        match allocation {
            Some(mut allocation) => unsafe {
                self.allocator.destroy_buffer(buffer, &mut allocation);
            },
            None => log::warn!("destroy_buffer: {buffer:?} was not allocated by this device"),
        }
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                buffer_barriers,
                image_barriers,
            )
        }
    }

    fn cmd_fill_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) {
        unsafe { self.device.cmd_fill_buffer(cmd, buffer, offset, size, data) }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions)
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(cmd, src, src_layout, dst, regions)
        }
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image(cmd, src, src_layout, dst, dst_layout, regions)
        }
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device
                .cmd_clear_color_image(cmd, image, layout, color, ranges)
        }
    }

    fn cmd_clear_depth_stencil_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device
                .cmd_clear_depth_stencil_image(cmd, image, layout, value, ranges)
        }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        unsafe { self.device.cmd_begin_render_pass(cmd, info, contents) }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            )
        }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets)
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type)
        }
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            )
        }
    }

    fn cmd_draw_indirect(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        unsafe { self.device.cmd_draw_indirect(cmd, buffer, offset, 1, 0) }
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        unsafe {
            self.device
                .cmd_draw_indexed_indirect(cmd, buffer, offset, 1, 0)
        }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) }
    }

    fn cmd_dispatch_indirect(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        unsafe { self.device.cmd_dispatch_indirect(cmd, buffer, offset) }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .cmd_set_viewport(cmd, 0, std::slice::from_ref(viewport))
        }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(scissor))
        }
    }

    fn cmd_set_blend_constants(&self, cmd: vk::CommandBuffer, constants: &[f32; 4]) {
        unsafe { self.device.cmd_set_blend_constants(cmd, constants) }
    }

    fn cmd_set_stencil_reference(&self, cmd: vk::CommandBuffer, reference: u32) {
        unsafe {
            self.device
                .cmd_set_stencil_reference(cmd, vk::StencilFaceFlags::FRONT_AND_BACK, reference)
        }
    }

    fn cmd_set_line_width(&self, cmd: vk::CommandBuffer, width: f32) {
        unsafe { self.device.cmd_set_line_width(cmd, width) }
    }

    fn cmd_set_depth_bounds(&self, cmd: vk::CommandBuffer, min: f32, max: f32) {
        unsafe { self.device.cmd_set_depth_bounds(cmd, min, max) }
    }

    fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        unsafe {
            self.device
                .cmd_reset_query_pool(cmd, pool, first_query, query_count)
        }
    }

    fn cmd_write_timestamp(
        &self,
        cmd: vk::CommandBuffer,
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    ) {
        unsafe { self.device.cmd_write_timestamp(cmd, stage, pool, query) }
    }

    fn cmd_copy_query_pool_results(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) {
        unsafe {
            self.device.cmd_copy_query_pool_results(
                cmd,
                pool,
                first_query,
                query_count,
                dst,
                dst_offset,
                stride,
                flags,
            )
        }
    }

    fn cmd_begin_debug_label(&self, cmd: vk::CommandBuffer, label: &str) {
        self.label(cmd, label, false);
    }

    fn cmd_end_debug_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug) = &self.debug_utils {
            unsafe { debug.cmd_end_debug_utils_label(cmd) }
        }
    }

    fn cmd_insert_debug_label(&self, cmd: vk::CommandBuffer, label: &str) {
        self.label(cmd, label, true);
    }
}
