use std::slice;

use anyhow::Context;
use ash::vk;
use smallvec::SmallVec;

use crate::{
    config::{DeviceExtensions, MAX_COLOR_ATTACHMENTS},
    format::Aspect,
    native::DeviceFns,
    pipeline::QuerySet,
    render_pass::{
        self, LoadOp, RenderPassCache, RenderPassCacheQuery, StoreOp, color_clear_value,
    },
    resource::{
        BarrierBatch, BufferId, BufferUsage, ResourceTable, SubresourceRange, TextureUsage,
    },
    tracker::{BindGroupTracker, IndexBufferTracker},
};

use super::{BeginRenderPassCmd, Command, CommandBuffer, PassResourceUsage, RecordingContext};

type CommandIter<'c> = slice::Iter<'c, Command>;

/// Size of one resolved query result.
const QUERY_RESULT_SIZE: vk::DeviceSize = std::mem::size_of::<u64>() as vk::DeviceSize;

/// Draw state shared by the inline commands of a render pass and the bundles
/// it executes.
#[derive(Default)]
struct RenderPassState {
    bind_groups: BindGroupTracker,
    index_buffer: IndexBufferTracker,
}

/// Translates validated command buffers into native commands.
///
/// A recorder borrows everything a recording touches: the native function
/// table, the resource side table whose usage and initialization state it
/// advances, and the shared render pass cache.
pub struct Recorder<'a> {
    pub(super) fns: &'a dyn DeviceFns,
    pub(super) resources: &'a mut ResourceTable,
    render_passes: &'a RenderPassCache,
    extensions: DeviceExtensions,
}

impl<'a> Recorder<'a> {
    pub fn new(
        fns: &'a dyn DeviceFns,
        resources: &'a mut ResourceTable,
        render_passes: &'a RenderPassCache,
        extensions: DeviceExtensions,
    ) -> Self {
        Self {
            fns,
            resources,
            render_passes,
            extensions,
        }
    }

    /// Records `commands` into the context's native command buffer.
    ///
    /// On error the context is poisoned: what was recorded so far stays in the
    /// native command buffer, which must not be submitted.
    pub fn record(
        &mut self,
        commands: &CommandBuffer,
        ctx: &mut RecordingContext,
    ) -> anyhow::Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracy_client::span!("record_command_buffer");

        let result = self.record_commands(commands, ctx);
        if let Err(err) = &result {
            log::warn!(
                "recording into {:?} failed, discarding it: {err:#}",
                ctx.command_buffer()
            );
            ctx.poison();
        }
        result
    }

    fn record_commands(
        &mut self,
        commands: &CommandBuffer,
        ctx: &RecordingContext,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let cmd = ctx.command_buffer();

        for query_set in &commands.used_query_sets {
            fns.cmd_reset_query_pool(cmd, query_set.handle, 0, query_set.count);
        }

        let mut next_pass = 0;
        let mut iter = commands.commands.iter();
        while let Some(command) = iter.next() {
            match command {
                Command::CopyBufferToBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => self.copy_buffer_to_buffer(
                    ctx,
                    *source,
                    *source_offset,
                    *destination,
                    *destination_offset,
                    *size,
                ),
                Command::CopyBufferToTexture {
                    source,
                    destination,
                    copy_size,
                } => self.copy_buffer_to_texture(ctx, source, destination, *copy_size)?,
                Command::CopyTextureToBuffer {
                    source,
                    destination,
                    copy_size,
                } => self.copy_texture_to_buffer(ctx, source, destination, *copy_size)?,
                Command::CopyTextureToTexture {
                    source,
                    destination,
                    copy_size,
                } => self.copy_texture_to_texture(ctx, source, destination, *copy_size)?,
                Command::BeginRenderPass(begin) => {
                    let usage = pass_usage(commands, next_pass);
                    self.prepare_resources_for_render_pass(ctx, usage)?;
                    self.record_render_pass(ctx, begin, &mut iter)
                        .with_context(|| format!("failed to record render pass {next_pass}"))?;
                    next_pass += 1;
                }
                Command::BeginComputePass => {
                    let usage = pass_usage(commands, next_pass);
                    self.prepare_resources_for_compute_pass(ctx, usage)?;
                    self.record_compute_pass(ctx, &mut iter);
                    next_pass += 1;
                }
                Command::ResolveQuerySet {
                    query_set,
                    first_query,
                    query_count,
                    destination,
                    destination_offset,
                } => self.resolve_query_set(
                    ctx,
                    query_set,
                    *first_query,
                    *query_count,
                    *destination,
                    *destination_offset,
                ),
                Command::WriteTimestamp {
                    query_set,
                    query_index,
                } => write_timestamp(fns, cmd, query_set, *query_index),
                Command::PushDebugGroup(_)
                | Command::PopDebugGroup
                | Command::InsertDebugMarker(_) => self.encode_debug_marker(cmd, command),
                other => unreachable!("{} recorded outside of a pass", other.name()),
            }
        }
        Ok(())
    }

    /// Lazily initializes everything the pass reads and moves every resource
    /// to its pass usage with one combined barrier. Attachments are left to
    /// the render pass load ops.
    fn prepare_resources_for_render_pass(
        &mut self,
        ctx: &RecordingContext,
        usage: &PassResourceUsage,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let mut batch = BarrierBatch::default();

        for &(buffer, usage) in &usage.buffers {
            let buffer = self.resources.buffer_mut(buffer);
            buffer.ensure_initialized(fns, ctx);
            buffer.transition_and_get_barrier(usage, &mut batch);
        }
        for &(texture, usage) in &usage.textures {
            let texture = self.resources.texture_mut(texture);
            let range = texture.all_subresources();
            if !usage.contains(TextureUsage::OUTPUT_ATTACHMENT) {
                texture
                    .ensure_subresource_initialized(fns, ctx, range)
                    .context("failed to initialize texture used by render pass")?;
            }
            texture.transition_and_get_barriers(usage, range, &mut batch);
        }

        batch.emit(fns, ctx.command_buffer());
        Ok(())
    }

    /// Compute passes only initialize here; their barriers are placed before
    /// each dispatch, for the bind groups it uses.
    fn prepare_resources_for_compute_pass(
        &mut self,
        ctx: &RecordingContext,
        usage: &PassResourceUsage,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        for &(buffer, _) in &usage.buffers {
            self.resources.buffer_mut(buffer).ensure_initialized(fns, ctx);
        }
        for &(texture, _) in &usage.textures {
            let texture = self.resources.texture_mut(texture);
            let range = texture.all_subresources();
            texture
                .ensure_subresource_initialized(fns, ctx, range)
                .context("failed to initialize texture used by compute pass")?;
        }
        Ok(())
    }

    /// Rewrites loads of uninitialized attachments into clears to zero and
    /// applies the initialization state the pass leaves behind.
    fn lazy_clear_render_pass_attachments(
        &mut self,
        begin: &BeginRenderPassCmd,
    ) -> BeginRenderPassCmd {
        let mut begin = begin.clone();

        for attachment in &mut begin.color_attachments {
            let view = self.resources.view(attachment.view).desc;
            let range = view.subresources();
            let texture = self.resources.texture_mut(view.texture);

            if attachment.load_op == LoadOp::Load && !texture.is_initialized(range) {
                attachment.load_op = LoadOp::Clear;
                attachment.clear_color = [0.0; 4];
            }
            texture.set_initialized(range, attachment.store_op == StoreOp::Store);

            if let Some(resolve_target) = attachment.resolve_target {
                let resolve = self.resources.view(resolve_target).desc;
                self.resources
                    .texture_mut(resolve.texture)
                    .set_initialized(resolve.subresources(), true);
            }
        }

        if let Some(attachment) = &mut begin.depth_stencil_attachment {
            let view = self.resources.view(attachment.view).desc;
            let range = view.subresources();
            let texture = self.resources.texture_mut(view.texture);

            let depth = SubresourceRange {
                aspects: Aspect::DEPTH,
                ..range
            };
            let stencil = SubresourceRange {
                aspects: Aspect::STENCIL,
                ..range
            };

            if attachment.depth_load_op == LoadOp::Load && !texture.is_initialized(depth) {
                attachment.depth_load_op = LoadOp::Clear;
                attachment.clear_depth = 0.0;
            }
            if attachment.stencil_load_op == LoadOp::Load && !texture.is_initialized(stencil) {
                attachment.stencil_load_op = LoadOp::Clear;
                attachment.clear_stencil = 0;
            }

            // Aspects the format lacks are left alone by the texture state.
            texture.set_initialized(depth, attachment.depth_store_op == StoreOp::Store);
            texture.set_initialized(stencil, attachment.stencil_store_op == StoreOp::Store);
        }

        begin
    }

    /// Gets the render pass, creates a framebuffer for this pass only and
    /// begins the pass.
    fn begin_render_pass(
        &mut self,
        ctx: &RecordingContext,
        begin: &BeginRenderPassCmd,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let mut query = RenderPassCacheQuery::new(begin.sample_count);
        let mut views: SmallVec<[vk::ImageView; 2 * MAX_COLOR_ATTACHMENTS + 1]> = SmallVec::new();
        let mut clear_values: SmallVec<[vk::ClearValue; 2 * MAX_COLOR_ATTACHMENTS + 1]> =
            SmallVec::new();

        for attachment in &begin.color_attachments {
            let view = self.resources.view(attachment.view);
            query.add_color(
                view.desc.format,
                attachment.load_op,
                attachment.resolve_target.is_some(),
            );
            views.push(view.handle);
            clear_values.push(color_clear_value(view.desc.format, attachment.clear_color));
        }
        if let Some(attachment) = &begin.depth_stencil_attachment {
            let view = self.resources.view(attachment.view);
            query.set_depth_stencil(
                view.desc.format,
                attachment.depth_load_op,
                attachment.stencil_load_op,
            );
            views.push(view.handle);
            clear_values.push(render_pass::depth_stencil_clear_value(
                attachment.clear_depth,
                attachment.clear_stencil,
            ));
        }
        for resolve_target in begin.color_attachments.iter().filter_map(|a| a.resolve_target) {
            views.push(self.resources.view(resolve_target).handle);
            // Resolve targets are never cleared, but every attachment needs a slot.
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue { float32: [0.0; 4] },
            });
        }

        let render_pass = self
            .render_passes
            .get_render_pass(fns, &query)
            .context("failed to create render pass")?;

        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(begin.width)
            .height(begin.height)
            .layers(1);
        let framebuffer = fns
            .create_framebuffer(&info)
            .context("failed to create framebuffer")?;
        ctx.deleter().framebuffer(ctx.pending_serial(), framebuffer);

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: begin.width,
                height: begin.height,
            },
        };
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        fns.cmd_begin_render_pass(ctx.command_buffer(), &info, vk::SubpassContents::INLINE);
        Ok(())
    }

    fn record_render_pass(
        &mut self,
        ctx: &RecordingContext,
        begin: &BeginRenderPassCmd,
        commands: &mut CommandIter<'_>,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let cmd = ctx.command_buffer();

        let begin = self.lazy_clear_render_pass_attachments(begin);
        self.begin_render_pass(ctx, &begin)?;
        set_default_dynamic_state(fns, cmd, begin.width, begin.height);

        let mut state = RenderPassState::default();
        for command in commands.by_ref() {
            match command {
                Command::EndRenderPass => {
                    fns.cmd_end_render_pass(cmd);
                    return Ok(());
                }
                Command::SetBlendColor(color) => fns.cmd_set_blend_constants(cmd, color),
                Command::SetStencilReference(reference) => {
                    fns.cmd_set_stencil_reference(cmd, *reference)
                }
                Command::SetViewport {
                    x,
                    y,
                    width,
                    height,
                    min_depth,
                    max_depth,
                } => {
                    // Flipped so that +Y points up in normalized device coordinates.
                    let viewport = vk::Viewport {
                        x: *x,
                        y: *y + *height,
                        width: *width,
                        height: -*height,
                        min_depth: *min_depth,
                        max_depth: *max_depth,
                    };
                    fns.cmd_set_viewport(cmd, &viewport);
                }
                Command::SetScissorRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D {
                            x: *x as i32,
                            y: *y as i32,
                        },
                        extent: vk::Extent2D {
                            width: *width,
                            height: *height,
                        },
                    };
                    fns.cmd_set_scissor(cmd, &scissor);
                }
                Command::ExecuteBundles(bundles) => {
                    for bundle in bundles {
                        for command in &bundle.commands {
                            self.encode_render_bundle_command(cmd, &mut state, command);
                        }
                    }
                }
                Command::WriteTimestamp {
                    query_set,
                    query_index,
                } => write_timestamp(fns, cmd, query_set, *query_index),
                other => self.encode_render_bundle_command(cmd, &mut state, other),
            }
        }

        panic!("command stream ended inside a render pass");
    }

    /// Commands valid both inline in a render pass and inside render bundles.
    fn encode_render_bundle_command(
        &self,
        cmd: vk::CommandBuffer,
        state: &mut RenderPassState,
        command: &Command,
    ) {
        let fns = self.fns;
        let graphics = vk::PipelineBindPoint::GRAPHICS;
        match command {
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                state.bind_groups.apply(fns, cmd, graphics);
                fns.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance);
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                state.bind_groups.apply(fns, cmd, graphics);
                state.index_buffer.apply(fns, cmd);
                fns.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *base_vertex,
                    *first_instance,
                );
            }
            Command::DrawIndirect { buffer, offset } => {
                state.bind_groups.apply(fns, cmd, graphics);
                fns.cmd_draw_indirect(cmd, self.buffer_handle(*buffer), *offset);
            }
            Command::DrawIndexedIndirect { buffer, offset } => {
                state.bind_groups.apply(fns, cmd, graphics);
                state.index_buffer.apply(fns, cmd);
                fns.cmd_draw_indexed_indirect(cmd, self.buffer_handle(*buffer), *offset);
            }
            Command::SetBindGroup {
                index,
                group,
                dynamic_offsets,
            } => state
                .bind_groups
                .on_set_bind_group(*index as usize, group.clone(), dynamic_offsets),
            Command::SetIndexBuffer {
                buffer,
                format,
                offset,
            } => state
                .index_buffer
                .on_set_index_buffer(self.buffer_handle(*buffer), *offset, *format),
            Command::SetRenderPipeline(pipeline) => {
                fns.cmd_bind_pipeline(cmd, graphics, pipeline.handle);
                state.bind_groups.on_set_pipeline(pipeline.layout.clone());
                state.index_buffer.on_set_pipeline(pipeline.index_format);
            }
            Command::SetVertexBuffer {
                slot,
                buffer,
                offset,
            } => fns.cmd_bind_vertex_buffers(cmd, *slot, &[self.buffer_handle(*buffer)], &[*offset]),
            Command::PushDebugGroup(_) | Command::PopDebugGroup | Command::InsertDebugMarker(_) => {
                self.encode_debug_marker(cmd, command)
            }
            other => unreachable!("{} is not valid inside a render pass", other.name()),
        }
    }

    fn record_compute_pass(&mut self, ctx: &RecordingContext, commands: &mut CommandIter<'_>) {
        let fns = self.fns;
        let cmd = ctx.command_buffer();
        let mut bind_groups = BindGroupTracker::default();

        for command in commands.by_ref() {
            match command {
                Command::EndComputePass => return,
                Command::Dispatch { x, y, z } => {
                    bind_groups.apply_compute(fns, cmd, self.resources);
                    fns.cmd_dispatch(cmd, *x, *y, *z);
                }
                Command::DispatchIndirect { buffer, offset } => {
                    let buffer = self.resources.buffer_mut(*buffer);
                    buffer.transition_usage_now(fns, ctx, BufferUsage::INDIRECT);
                    let handle = buffer.handle();
                    bind_groups.apply_compute(fns, cmd, self.resources);
                    fns.cmd_dispatch_indirect(cmd, handle, *offset);
                }
                Command::SetBindGroup {
                    index,
                    group,
                    dynamic_offsets,
                } => bind_groups.on_set_bind_group(*index as usize, group.clone(), dynamic_offsets),
                Command::SetComputePipeline(pipeline) => {
                    fns.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.handle);
                    bind_groups.on_set_pipeline(pipeline.layout.clone());
                }
                Command::WriteTimestamp {
                    query_set,
                    query_index,
                } => write_timestamp(fns, cmd, query_set, *query_index),
                Command::PushDebugGroup(_)
                | Command::PopDebugGroup
                | Command::InsertDebugMarker(_) => self.encode_debug_marker(cmd, command),
                other => unreachable!("{} is not valid inside a compute pass", other.name()),
            }
        }

        panic!("command stream ended inside a compute pass");
    }

    fn resolve_query_set(
        &mut self,
        ctx: &RecordingContext,
        query_set: &QuerySet,
        first_query: u32,
        query_count: u32,
        destination: BufferId,
        destination_offset: vk::DeviceSize,
    ) {
        let fns = self.fns;
        let buffer = self.resources.buffer_mut(destination);
        buffer.ensure_initialized_as_destination(
            fns,
            ctx,
            destination_offset,
            u64::from(query_count) * QUERY_RESULT_SIZE,
        );
        buffer.transition_usage_now(fns, ctx, BufferUsage::COPY_DST);
        fns.cmd_copy_query_pool_results(
            ctx.command_buffer(),
            query_set.handle,
            first_query,
            query_count,
            buffer.handle(),
            destination_offset,
            QUERY_RESULT_SIZE,
            vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
        );
    }

    fn encode_debug_marker(&self, cmd: vk::CommandBuffer, command: &Command) {
        if !self.extensions.debug_markers {
            return;
        }
        match command {
            Command::PushDebugGroup(label) => self.fns.cmd_begin_debug_label(cmd, label),
            Command::PopDebugGroup => self.fns.cmd_end_debug_label(cmd),
            Command::InsertDebugMarker(label) => self.fns.cmd_insert_debug_label(cmd, label),
            other => unreachable!("{} is not a debug marker", other.name()),
        }
    }

    fn buffer_handle(&self, buffer: BufferId) -> vk::Buffer {
        self.resources.buffer(buffer).handle()
    }
}

fn pass_usage(commands: &CommandBuffer, pass: usize) -> &PassResourceUsage {
    commands
        .pass_usages
        .get(pass)
        .unwrap_or_else(|| panic!("no resource usage recorded for pass {pass}"))
}

fn write_timestamp(fns: &dyn DeviceFns, cmd: vk::CommandBuffer, query_set: &QuerySet, index: u32) {
    fns.cmd_write_timestamp(
        cmd,
        vk::PipelineStageFlags::ALL_COMMANDS,
        query_set.handle,
        index,
    );
}

/// Dynamic state every pipeline is created with, reset at the start of each
/// render pass.
fn set_default_dynamic_state(fns: &dyn DeviceFns, cmd: vk::CommandBuffer, width: u32, height: u32) {
    fns.cmd_set_line_width(cmd, 1.0);
    fns.cmd_set_depth_bounds(cmd, 0.0, 1.0);
    fns.cmd_set_stencil_reference(cmd, 0);
    fns.cmd_set_blend_constants(cmd, &[0.0; 4]);

    let viewport = vk::Viewport {
        x: 0.0,
        y: height as f32,
        width: width as f32,
        height: -(height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    };
    fns.cmd_set_viewport(cmd, &viewport);

    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D { width, height },
    };
    fns.cmd_set_scissor(cmd, &scissor);
}
