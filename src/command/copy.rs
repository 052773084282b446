use anyhow::Context;
use ash::vk;
use smallvec::SmallVec;

use crate::{
    format::{Aspect, TexelBlockInfo},
    resource::{
        BarrierBatch, BufferDesc, BufferId, BufferState, BufferUsage, SubresourceRange,
        TextureState, TextureUsage,
    },
};

use super::{BufferCopyView, Recorder, RecordingContext, TextureCopyView};

/// How texel data is laid out in the buffer side of a copy.
#[derive(Clone, Copy, Debug)]
pub(super) struct BufferLayout {
    pub offset: vk::DeviceSize,
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
}

impl BufferCopyView {
    fn layout(&self) -> BufferLayout {
        BufferLayout {
            offset: self.offset,
            bytes_per_row: self.bytes_per_row,
            rows_per_image: self.rows_per_image,
        }
    }
}

/// Aspects of the copied texture a copy view selects.
fn copy_aspects(texture: &TextureState, view: &TextureCopyView) -> Aspect {
    view.aspect & texture.format().aspects()
}

/// The subresources a copy of `copy_size` touches. Layers are carried by the
/// depth of the copy.
pub(super) fn copy_subresources(
    texture: &TextureState,
    view: &TextureCopyView,
    copy_size: vk::Extent3D,
) -> SubresourceRange {
    SubresourceRange {
        aspects: copy_aspects(texture, view),
        base_mip: view.mip_level,
        mip_count: 1,
        base_layer: view.origin.z as u32,
        layer_count: copy_size.depth,
    }
}

/// Copy extent clamped to the virtual size of the mip. Copies of compressed
/// textures may cover the whole last block, which reaches past the virtual
/// size.
pub(super) fn texture_copy_extent(
    texture: &TextureState,
    view: &TextureCopyView,
    copy_size: vk::Extent3D,
) -> vk::Extent3D {
    let virtual_size = texture.mip_virtual_size(view.mip_level);
    let mut extent = vk::Extent3D {
        depth: 1,
        ..copy_size
    };
    if view.origin.x as u32 + copy_size.width > virtual_size.width {
        debug_assert!(texture.format().is_compressed());
        extent.width = virtual_size.width - view.origin.x as u32;
    }
    if view.origin.y as u32 + copy_size.height > virtual_size.height {
        debug_assert!(texture.format().is_compressed());
        extent.height = virtual_size.height - view.origin.y as u32;
    }
    extent
}

/// Whether a copy of `copy_size` overwrites the whole of mip `level`.
pub(super) fn is_complete_subresource_copied_to(
    texture: &TextureState,
    copy_size: vk::Extent3D,
    level: u32,
) -> bool {
    let physical = texture.mip_physical_size(level);
    copy_size.width == physical.width && copy_size.height == physical.height
}

pub(super) fn buffer_image_copy(
    buffer: BufferLayout,
    texture: &TextureState,
    view: &TextureCopyView,
    copy_size: vk::Extent3D,
) -> vk::BufferImageCopy {
    let aspects = copy_aspects(texture, view);
    let block = texture.format().block_info(aspects);
    vk::BufferImageCopy::default()
        .buffer_offset(buffer.offset)
        .buffer_row_length(buffer.bytes_per_row / block.byte_size * block.width)
        .buffer_image_height(buffer.rows_per_image)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(aspects.to_vk())
                .mip_level(view.mip_level)
                .base_array_layer(view.origin.z as u32)
                .layer_count(copy_size.depth),
        )
        .image_offset(vk::Offset3D {
            z: 0,
            ..view.origin
        })
        .image_extent(texture_copy_extent(texture, view, copy_size))
}

/// One aspect of a direct image copy. The extent is clamped to the
/// destination mip.
pub(super) fn image_copy(
    src: &TextureCopyView,
    dst_texture: &TextureState,
    dst: &TextureCopyView,
    aspect: Aspect,
    copy_size: vk::Extent3D,
) -> vk::ImageCopy {
    let subresource = |view: &TextureCopyView| {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(aspect.to_vk())
            .mip_level(view.mip_level)
            .base_array_layer(view.origin.z as u32)
            .layer_count(copy_size.depth)
    };
    vk::ImageCopy::default()
        .src_subresource(subresource(src))
        .src_offset(vk::Offset3D { z: 0, ..src.origin })
        .dst_subresource(subresource(dst))
        .dst_offset(vk::Offset3D { z: 0, ..dst.origin })
        .extent(texture_copy_extent(dst_texture, dst, copy_size))
}

/// Bytes of a buffer a buffer/texture copy reads or writes, counted from the
/// copy's offset.
pub(super) fn required_bytes_in_copy(
    block: TexelBlockInfo,
    copy_size: vk::Extent3D,
    bytes_per_row: u32,
    rows_per_image: u32,
) -> vk::DeviceSize {
    if copy_size.width == 0 || copy_size.height == 0 || copy_size.depth == 0 {
        return 0;
    }
    let width_in_blocks = u64::from(copy_size.width / block.width);
    let height_in_blocks = u64::from(copy_size.height / block.height);
    let rows_per_image_in_blocks = u64::from(rows_per_image / block.height);
    let bytes_in_last_slice =
        u64::from(bytes_per_row) * (height_in_blocks - 1) + width_in_blocks * u64::from(block.byte_size);
    u64::from(bytes_per_row) * rows_per_image_in_blocks * u64::from(copy_size.depth - 1)
        + bytes_in_last_slice
}

/// Direct image copies need one extent valid for both subresources. With
/// compressed formats the clamped extents of the two sides can differ, so
/// such copies go through a buffer instead.
pub(super) fn should_use_temporary_buffer(
    enabled: bool,
    src_texture: &TextureState,
    src: &TextureCopyView,
    dst_texture: &TextureState,
    dst: &TextureCopyView,
    copy_size: vk::Extent3D,
) -> bool {
    if !enabled || !src_texture.format().is_compressed() {
        return false;
    }
    let src_extent = texture_copy_extent(src_texture, src, copy_size);
    let dst_extent = texture_copy_extent(dst_texture, dst, copy_size);
    (src_extent.width, src_extent.height) != (dst_extent.width, dst_extent.height)
}

impl Recorder<'_> {
    pub(super) fn copy_buffer_to_buffer(
        &mut self,
        ctx: &RecordingContext,
        source: BufferId,
        source_offset: vk::DeviceSize,
        destination: BufferId,
        destination_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        let fns = self.fns;
        let (src, dst) = self.resources.buffer_pair_mut(source, destination);
        src.ensure_initialized(fns, ctx);
        dst.ensure_initialized_as_destination(fns, ctx, destination_offset, size);

        let mut batch = BarrierBatch::default();
        src.transition_and_get_barrier(BufferUsage::COPY_SRC, &mut batch);
        dst.transition_and_get_barrier(BufferUsage::COPY_DST, &mut batch);
        batch.emit(fns, ctx.command_buffer());

        let region = vk::BufferCopy {
            src_offset: source_offset,
            dst_offset: destination_offset,
            size,
        };
        fns.cmd_copy_buffer(ctx.command_buffer(), src.handle(), dst.handle(), &[region]);
    }

    pub(super) fn copy_buffer_to_texture(
        &mut self,
        ctx: &RecordingContext,
        source: &BufferCopyView,
        destination: &TextureCopyView,
        copy_size: vk::Extent3D,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let buffer = self.resources.buffer_mut(source.buffer);
        buffer.ensure_initialized(fns, ctx);
        let mut batch = BarrierBatch::default();
        buffer.transition_and_get_barrier(BufferUsage::COPY_SRC, &mut batch);
        let buffer = buffer.handle();

        let texture = self.resources.texture_mut(destination.texture);
        let range = copy_subresources(texture, destination, copy_size);
        if is_complete_subresource_copied_to(texture, copy_size, destination.mip_level) {
            texture.set_initialized(range, true);
        } else {
            texture
                .ensure_subresource_initialized(fns, ctx, range)
                .context("failed to initialize copy destination")?;
        }
        texture.transition_and_get_barriers(TextureUsage::COPY_DST, range, &mut batch);
        batch.emit(fns, ctx.command_buffer());

        let region = buffer_image_copy(source.layout(), texture, destination, copy_size);
        fns.cmd_copy_buffer_to_image(
            ctx.command_buffer(),
            buffer,
            texture.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        Ok(())
    }

    pub(super) fn copy_texture_to_buffer(
        &mut self,
        ctx: &RecordingContext,
        source: &TextureCopyView,
        destination: &BufferCopyView,
        copy_size: vk::Extent3D,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let texture = self.resources.texture_mut(source.texture);
        let range = copy_subresources(texture, source, copy_size);
        let block = texture.format().block_info(range.aspects);
        texture
            .ensure_subresource_initialized(fns, ctx, range)
            .context("failed to initialize copy source")?;
        let mut batch = BarrierBatch::default();
        texture.transition_and_get_barriers(TextureUsage::COPY_SRC, range, &mut batch);
        let region = buffer_image_copy(destination.layout(), texture, source, copy_size);
        let image = texture.handle();

        let buffer = self.resources.buffer_mut(destination.buffer);
        let written = required_bytes_in_copy(
            block,
            copy_size,
            destination.bytes_per_row,
            destination.rows_per_image,
        );
        buffer.ensure_initialized_as_destination(fns, ctx, destination.offset, written);
        buffer.transition_and_get_barrier(BufferUsage::COPY_DST, &mut batch);
        batch.emit(fns, ctx.command_buffer());

        fns.cmd_copy_image_to_buffer(
            ctx.command_buffer(),
            image,
            vk::ImageLayout::GENERAL,
            buffer.handle(),
            &[region],
        );
        Ok(())
    }

    pub(super) fn copy_texture_to_texture(
        &mut self,
        ctx: &RecordingContext,
        source: &TextureCopyView,
        destination: &TextureCopyView,
        copy_size: vk::Extent3D,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let mut batch = BarrierBatch::default();

        let src_texture = self.resources.texture_mut(source.texture);
        let src_range = copy_subresources(src_texture, source, copy_size);
        src_texture
            .ensure_subresource_initialized(fns, ctx, src_range)
            .context("failed to initialize copy source")?;

        let dst_texture = self.resources.texture_mut(destination.texture);
        let dst_range = copy_subresources(dst_texture, destination, copy_size);
        if is_complete_subresource_copied_to(dst_texture, copy_size, destination.mip_level) {
            dst_texture.set_initialized(dst_range, true);
        } else {
            dst_texture
                .ensure_subresource_initialized(fns, ctx, dst_range)
                .context("failed to initialize copy destination")?;
        }

        // Same texture on both sides is fine: the ranges are disjoint.
        self.resources
            .texture_mut(source.texture)
            .transition_and_get_barriers(TextureUsage::COPY_SRC, src_range, &mut batch);
        self.resources
            .texture_mut(destination.texture)
            .transition_and_get_barriers(TextureUsage::COPY_DST, dst_range, &mut batch);
        batch.emit(fns, ctx.command_buffer());

        let src_texture = self.resources.texture(source.texture);
        let dst_texture = self.resources.texture(destination.texture);
        if should_use_temporary_buffer(
            ctx.toggles()
                .use_temporary_buffer_in_compressed_texture_to_texture_copy,
            src_texture,
            source,
            dst_texture,
            destination,
            copy_size,
        ) {
            return self.copy_through_temporary_buffer(ctx, source, destination, copy_size);
        }

        let regions: SmallVec<[vk::ImageCopy; 3]> = src_range
            .aspects
            .singles()
            .map(|aspect| {
                image_copy(source, dst_texture, destination, aspect, copy_size)
            })
            .collect();
        fns.cmd_copy_image(
            ctx.command_buffer(),
            src_texture.handle(),
            vk::ImageLayout::GENERAL,
            dst_texture.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &regions,
        );
        Ok(())
    }

    /// Source image → tightly packed temporary buffer → destination image.
    /// Both textures are expected to be in their copy usages already.
    fn copy_through_temporary_buffer(
        &self,
        ctx: &RecordingContext,
        source: &TextureCopyView,
        destination: &TextureCopyView,
        copy_size: vk::Extent3D,
    ) -> anyhow::Result<()> {
        let fns = self.fns;
        let cmd = ctx.command_buffer();
        let src_texture = self.resources.texture(source.texture);
        let dst_texture = self.resources.texture(destination.texture);

        let block = src_texture.format().block_info(Aspect::COLOR);
        let bytes_per_row = copy_size.width / block.width * block.byte_size;
        let size = u64::from(bytes_per_row)
            * u64::from(copy_size.height / block.height)
            * u64::from(copy_size.depth);

        let handle = fns
            .create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .context("failed to create temporary buffer for texture copy")?;
        ctx.deleter().buffer(ctx.pending_serial(), handle);
        log::debug!(
            "copying {:?} of {:?} to {:?} through a {size} byte temporary buffer",
            copy_size,
            src_texture.handle(),
            dst_texture.handle()
        );

        let mut temporary = BufferState::new(
            handle,
            BufferDesc::default()
                .size(size)
                .usage(BufferUsage::COPY_SRC | BufferUsage::COPY_DST),
        );
        let staging = BufferLayout {
            offset: 0,
            bytes_per_row,
            rows_per_image: copy_size.height,
        };

        temporary.transition_usage_now(fns, ctx, BufferUsage::COPY_DST);
        let region = buffer_image_copy(staging, src_texture, source, copy_size);
        fns.cmd_copy_image_to_buffer(
            cmd,
            src_texture.handle(),
            vk::ImageLayout::GENERAL,
            handle,
            &[region],
        );

        temporary.transition_usage_now(fns, ctx, BufferUsage::COPY_SRC);
        let region = buffer_image_copy(staging, dst_texture, destination, copy_size);
        fns.cmd_copy_buffer_to_image(
            cmd,
            handle,
            dst_texture.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        Ok(())
    }
}
