//! The recorded command stream and its translation into native commands.
//!
//! A [`CommandBuffer`] is produced and validated upstream; the [`Recorder`]
//! walks it exactly once, front to back, and drives [`DeviceFns`](crate::native::DeviceFns).

mod context;
mod copy;
mod record;

use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use crate::{
    binding::BindGroup,
    config::MAX_COLOR_ATTACHMENTS,
    format::Aspect,
    pipeline::{ComputePipeline, IndexFormat, QuerySet, RenderPipeline},
    render_pass::{LoadOp, StoreOp},
    resource::{BufferId, BufferUsage, TextureId, TextureUsage, TextureViewId},
};

pub use context::RecordingContext;
pub use record::Recorder;

/// Where a buffer side of a buffer/texture copy lives. Rows and images are
/// counted in texels, as the API specifies them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopyView {
    pub buffer: BufferId,
    pub offset: vk::DeviceSize,
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
}

/// One texture side of a copy. `origin.z` is the first array layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureCopyView {
    pub texture: TextureId,
    pub mip_level: u32,
    pub origin: vk::Offset3D,
    pub aspect: Aspect,
}

impl TextureCopyView {
    /// Copies every aspect of the texture's format.
    pub fn new(texture: TextureId, mip_level: u32) -> Self {
        Self {
            texture,
            mip_level,
            origin: vk::Offset3D::default(),
            aspect: Aspect::all(),
        }
    }

    pub fn origin(mut self, x: i32, y: i32, layer: i32) -> Self {
        self.origin = vk::Offset3D { x, y, z: layer };
        self
    }

    pub fn aspect(mut self, aspect: Aspect) -> Self {
        self.aspect = aspect;
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    pub view: TextureViewId,
    pub resolve_target: Option<TextureViewId>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: [f64; 4],
}

impl ColorAttachment {
    pub fn new(view: TextureViewId, load_op: LoadOp, store_op: StoreOp) -> Self {
        Self {
            view,
            resolve_target: None,
            load_op,
            store_op,
            clear_color: [0.0; 4],
        }
    }

    pub fn resolve_target(mut self, view: TextureViewId) -> Self {
        self.resolve_target = Some(view);
        self
    }

    pub fn clear_color(mut self, color: [f64; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DepthStencilAttachment {
    pub view: TextureViewId,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub clear_depth: f32,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub clear_stencil: u32,
}

impl DepthStencilAttachment {
    pub fn new(view: TextureViewId, load_op: LoadOp, store_op: StoreOp) -> Self {
        Self {
            view,
            depth_load_op: load_op,
            depth_store_op: store_op,
            clear_depth: 0.0,
            stencil_load_op: load_op,
            stencil_store_op: store_op,
            clear_stencil: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BeginRenderPassCmd {
    pub color_attachments: SmallVec<[ColorAttachment; MAX_COLOR_ATTACHMENTS]>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

impl BeginRenderPassCmd {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            color_attachments: SmallVec::new(),
            depth_stencil_attachment: None,
            width,
            height,
            sample_count: 1,
        }
    }

    pub fn color(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn depth_stencil(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    pub fn sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }
}

#[derive(Clone, Debug)]
pub enum Command {
    CopyBufferToBuffer {
        source: BufferId,
        source_offset: vk::DeviceSize,
        destination: BufferId,
        destination_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    CopyBufferToTexture {
        source: BufferCopyView,
        destination: TextureCopyView,
        copy_size: vk::Extent3D,
    },
    CopyTextureToBuffer {
        source: TextureCopyView,
        destination: BufferCopyView,
        copy_size: vk::Extent3D,
    },
    CopyTextureToTexture {
        source: TextureCopyView,
        destination: TextureCopyView,
        copy_size: vk::Extent3D,
    },
    BeginComputePass,
    EndComputePass,
    BeginRenderPass(Box<BeginRenderPassCmd>),
    EndRenderPass,
    SetComputePipeline(Arc<ComputePipeline>),
    SetRenderPipeline(Arc<RenderPipeline>),
    SetBindGroup {
        index: u32,
        group: Arc<BindGroup>,
        dynamic_offsets: Vec<u32>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferId,
        offset: vk::DeviceSize,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: Option<IndexFormat>,
        offset: vk::DeviceSize,
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
        buffer: BufferId,
        offset: vk::DeviceSize,
    },
    DrawIndexedIndirect {
        buffer: BufferId,
        offset: vk::DeviceSize,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: BufferId,
        offset: vk::DeviceSize,
    },
    ExecuteBundles(Vec<Arc<RenderBundle>>),
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissorRect {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetBlendColor([f32; 4]),
    SetStencilReference(u32),
    PushDebugGroup(String),
    PopDebugGroup,
    InsertDebugMarker(String),
    WriteTimestamp {
        query_set: Arc<QuerySet>,
        query_index: u32,
    },
    ResolveQuerySet {
        query_set: Arc<QuerySet>,
        first_query: u32,
        query_count: u32,
        destination: BufferId,
        destination_offset: vk::DeviceSize,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CopyBufferToBuffer { .. } => "CopyBufferToBuffer",
            Command::CopyBufferToTexture { .. } => "CopyBufferToTexture",
            Command::CopyTextureToBuffer { .. } => "CopyTextureToBuffer",
            Command::CopyTextureToTexture { .. } => "CopyTextureToTexture",
            Command::BeginComputePass => "BeginComputePass",
            Command::EndComputePass => "EndComputePass",
            Command::BeginRenderPass(_) => "BeginRenderPass",
            Command::EndRenderPass => "EndRenderPass",
            Command::SetComputePipeline(_) => "SetComputePipeline",
            Command::SetRenderPipeline(_) => "SetRenderPipeline",
            Command::SetBindGroup { .. } => "SetBindGroup",
            Command::SetVertexBuffer { .. } => "SetVertexBuffer",
            Command::SetIndexBuffer { .. } => "SetIndexBuffer",
            Command::Draw { .. } => "Draw",
            Command::DrawIndexed { .. } => "DrawIndexed",
            Command::DrawIndirect { .. } => "DrawIndirect",
            Command::DrawIndexedIndirect { .. } => "DrawIndexedIndirect",
            Command::Dispatch { .. } => "Dispatch",
            Command::DispatchIndirect { .. } => "DispatchIndirect",
            Command::ExecuteBundles(_) => "ExecuteBundles",
            Command::SetViewport { .. } => "SetViewport",
            Command::SetScissorRect { .. } => "SetScissorRect",
            Command::SetBlendColor(_) => "SetBlendColor",
            Command::SetStencilReference(_) => "SetStencilReference",
            Command::PushDebugGroup(_) => "PushDebugGroup",
            Command::PopDebugGroup => "PopDebugGroup",
            Command::InsertDebugMarker(_) => "InsertDebugMarker",
            Command::WriteTimestamp { .. } => "WriteTimestamp",
            Command::ResolveQuerySet { .. } => "ResolveQuerySet",
        }
    }
}

/// Aggregate usage of every resource touched by one pass, computed upstream
/// while encoding.
#[derive(Clone, Debug, Default)]
pub struct PassResourceUsage {
    pub buffers: Vec<(BufferId, BufferUsage)>,
    pub textures: Vec<(TextureId, TextureUsage)>,
}

impl PassResourceUsage {
    pub fn buffer(mut self, buffer: BufferId, usage: BufferUsage) -> Self {
        self.buffers.push((buffer, usage));
        self
    }

    pub fn texture(mut self, texture: TextureId, usage: TextureUsage) -> Self {
        self.textures.push((texture, usage));
        self
    }
}

/// A prevalidated sequence of draw-affecting commands replayed inside render
/// passes.
#[derive(Clone, Debug, Default)]
pub struct RenderBundle {
    pub commands: Vec<Command>,
}

impl RenderBundle {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }
}

/// A finished, validated command stream. Passes consume `pass_usages` in
/// order, one entry per render or compute pass.
#[derive(Clone, Debug, Default)]
pub struct CommandBuffer {
    pub commands: Vec<Command>,
    pub pass_usages: Vec<PassResourceUsage>,
    pub used_query_sets: Vec<Arc<QuerySet>>,
}

impl CommandBuffer {
    pub fn new(commands: Vec<Command>, pass_usages: Vec<PassResourceUsage>) -> Self {
        Self {
            commands,
            pass_usages,
            used_query_sets: Vec::new(),
        }
    }

    pub fn with_query_sets(mut self, query_sets: Vec<Arc<QuerySet>>) -> Self {
        self.used_query_sets = query_sets;
        self
    }
}
