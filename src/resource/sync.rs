use ash::vk;

use crate::{format::TextureFormat, native::DeviceFns};

use super::{BufferUsage, TextureUsage};

const SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);

pub const READ_ONLY_BUFFER_USAGES: BufferUsage = BufferUsage::MAP_READ
    .union(BufferUsage::COPY_SRC)
    .union(BufferUsage::INDEX)
    .union(BufferUsage::VERTEX)
    .union(BufferUsage::UNIFORM)
    .union(BufferUsage::INDIRECT);

pub const READ_ONLY_TEXTURE_USAGES: TextureUsage = TextureUsage::COPY_SRC
    .union(TextureUsage::SAMPLED)
    .union(TextureUsage::PRESENT);

pub fn buffer_access(usage: BufferUsage) -> vk::AccessFlags {
    let mut flags = vk::AccessFlags::empty();
    if usage.contains(BufferUsage::MAP_READ) {
        flags |= vk::AccessFlags::HOST_READ;
    }
    if usage.contains(BufferUsage::MAP_WRITE) {
        flags |= vk::AccessFlags::HOST_WRITE;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::AccessFlags::TRANSFER_READ;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::AccessFlags::INDEX_READ;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::AccessFlags::UNIFORM_READ;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    flags
}

pub fn buffer_stages(usage: BufferUsage) -> vk::PipelineStageFlags {
    let mut flags = vk::PipelineStageFlags::empty();
    if usage.intersects(BufferUsage::MAP_READ | BufferUsage::MAP_WRITE) {
        flags |= vk::PipelineStageFlags::HOST;
    }
    if usage.intersects(BufferUsage::COPY_SRC | BufferUsage::COPY_DST) {
        flags |= vk::PipelineStageFlags::TRANSFER;
    }
    if usage.intersects(BufferUsage::INDEX | BufferUsage::VERTEX) {
        flags |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if usage.intersects(BufferUsage::UNIFORM | BufferUsage::STORAGE) {
        flags |= SHADER_STAGES;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    flags
}

pub fn texture_access(usage: TextureUsage, format: TextureFormat) -> vk::AccessFlags {
    let mut flags = vk::AccessFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::AccessFlags::TRANSFER_READ;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::AccessFlags::SHADER_READ;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
    }
    if usage.contains(TextureUsage::OUTPUT_ATTACHMENT) {
        if format.has_depth_or_stencil() {
            flags |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        } else {
            flags |=
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        }
    }
    // Presentation waits on a semaphore, not on memory access.
    flags
}

pub fn texture_stages(usage: TextureUsage, format: TextureFormat) -> vk::PipelineStageFlags {
    if usage.is_empty() {
        return vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    let mut flags = vk::PipelineStageFlags::empty();
    if usage.intersects(TextureUsage::COPY_SRC | TextureUsage::COPY_DST) {
        flags |= vk::PipelineStageFlags::TRANSFER;
    }
    if usage.intersects(TextureUsage::SAMPLED | TextureUsage::STORAGE) {
        flags |= SHADER_STAGES;
    }
    if usage.contains(TextureUsage::OUTPUT_ATTACHMENT) {
        if format.has_depth_or_stencil() {
            flags |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        } else {
            flags |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        }
    }
    if usage.contains(TextureUsage::PRESENT) {
        flags |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    flags
}

pub fn texture_layout(usage: TextureUsage, format: TextureFormat) -> vk::ImageLayout {
    if usage.is_empty() {
        return vk::ImageLayout::UNDEFINED;
    }
    if usage.bits().count_ones() != 1 {
        return vk::ImageLayout::GENERAL;
    }

    match usage {
        // Copies within one texture need the same layout on both sides.
        TextureUsage::COPY_SRC => vk::ImageLayout::GENERAL,
        TextureUsage::COPY_DST => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        TextureUsage::SAMPLED => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        TextureUsage::STORAGE => vk::ImageLayout::GENERAL,
        TextureUsage::OUTPUT_ATTACHMENT if format.has_depth_or_stencil() => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
        TextureUsage::OUTPUT_ATTACHMENT => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        TextureUsage::PRESENT => vk::ImageLayout::PRESENT_SRC_KHR,
        _ => vk::ImageLayout::GENERAL,
    }
}

/// Barriers gathered for one pipeline-barrier call. Stage masks accumulate
/// across every barrier added.
#[derive(Default)]
pub struct BarrierBatch {
    pub buffers: Vec<vk::BufferMemoryBarrier<'static>>,
    pub images: Vec<vk::ImageMemoryBarrier<'static>>,
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    pub fn add_buffer(
        &mut self,
        barrier: vk::BufferMemoryBarrier<'static>,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
    ) {
        self.buffers.push(barrier);
        self.src_stages |= src_stages;
        self.dst_stages |= dst_stages;
    }

    pub fn add_image(
        &mut self,
        barrier: vk::ImageMemoryBarrier<'static>,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
    ) {
        self.images.push(barrier);
        self.src_stages |= src_stages;
        self.dst_stages |= dst_stages;
    }

    /// Records one combined barrier call if anything was gathered.
    pub fn emit(self, fns: &dyn DeviceFns, cmd: vk::CommandBuffer) -> bool {
        if self.is_empty() {
            return false;
        }
        log::trace!(
            "pipeline barrier: {} buffers, {} images, {:?} -> {:?}",
            self.buffers.len(),
            self.images.len(),
            self.src_stages,
            self.dst_stages
        );
        fns.cmd_pipeline_barrier(
            cmd,
            self.src_stages,
            self.dst_stages,
            &self.buffers,
            &self.images,
        );
        true
    }
}
