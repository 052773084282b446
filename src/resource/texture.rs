use anyhow::Context;
use ash::vk;

use crate::{
    command::RecordingContext,
    format::{Aspect, ComponentType, TextureFormat},
    native::DeviceFns,
};

use super::{
    TextureId, TextureUsage,
    sync::{self, BarrierBatch, READ_ONLY_TEXTURE_USAGES},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            usage: TextureUsage::empty(),
        }
    }
}

impl TextureDesc {
    pub fn format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn size(mut self, width: u32, height: u32, array_layers: u32) -> Self {
        self.width = width;
        self.height = height;
        self.array_layers = array_layers;
        self
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// A set of mips × array layers of one texture, restricted to some aspects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceRange {
    pub aspects: Aspect,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    pub fn single(mip: u32, layer: u32, aspects: Aspect) -> Self {
        Self {
            aspects,
            base_mip: mip,
            mip_count: 1,
            base_layer: layer,
            layer_count: 1,
        }
    }

    pub fn to_vk(self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspects.to_vk(),
            base_mip_level: self.base_mip,
            level_count: self.mip_count,
            base_array_layer: self.base_layer,
            layer_count: self.layer_count,
        }
    }

    /// Every `(mip, layer)` pair in the range.
    pub fn iter(self) -> impl Iterator<Item = (u32, u32)> {
        (self.base_mip..self.base_mip + self.mip_count).flat_map(move |mip| {
            (self.base_layer..self.base_layer + self.layer_count).map(move |layer| (mip, layer))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureViewDesc {
    pub texture: TextureId,
    pub format: TextureFormat,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl TextureViewDesc {
    /// A view of mip 0, layer 0.
    pub fn new(texture: TextureId, format: TextureFormat) -> Self {
        Self {
            texture,
            format,
            base_mip: 0,
            mip_count: 1,
            base_layer: 0,
            layer_count: 1,
        }
    }

    pub fn mips(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_count = mip_count;
        self
    }

    pub fn layers(mut self, base_layer: u32, layer_count: u32) -> Self {
        self.base_layer = base_layer;
        self.layer_count = layer_count;
        self
    }

    pub fn subresources(&self) -> SubresourceRange {
        SubresourceRange {
            aspects: self.format.aspects(),
            base_mip: self.base_mip,
            mip_count: self.mip_count,
            base_layer: self.base_layer,
            layer_count: self.layer_count,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TextureView {
    pub handle: vk::ImageView,
    pub desc: TextureViewDesc,
}

/// Tracking state of one texture.
///
/// Usages are kept per mip level and array layer: depth and stencil share one
/// layout, so every barrier moves both. Initialization is kept per aspect as
/// well, since a copy can write the stencil of a subresource and leave its
/// depth untouched.
#[derive(Debug)]
pub struct TextureState {
    handle: vk::Image,
    desc: TextureDesc,
    usages: Vec<TextureUsage>,
    initialized: Vec<bool>,
}

impl TextureState {
    pub(super) fn new(handle: vk::Image, desc: TextureDesc) -> Self {
        let count = (desc.mip_levels * desc.array_layers) as usize;
        let aspect_count = desc.format.aspects().singles().count();
        Self {
            handle,
            desc,
            usages: vec![TextureUsage::empty(); count],
            initialized: vec![false; count * aspect_count],
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    fn index(&self, mip: u32, layer: u32) -> usize {
        debug_assert!(mip < self.desc.mip_levels && layer < self.desc.array_layers);
        (mip * self.desc.array_layers + layer) as usize
    }

    /// Slot of the single aspect `aspect` of subresource `(mip, layer)` in
    /// the initialization state.
    fn aspect_index(&self, mip: u32, layer: u32, aspect: Aspect) -> usize {
        let aspects = self.desc.format.aspects();
        debug_assert!(aspects.contains(aspect));
        let slot = aspects.singles().take_while(|a| *a != aspect).count();
        self.index(mip, layer) * aspects.singles().count() + slot
    }

    /// Aspects among `aspects` that subresource `(mip, layer)` has never had
    /// written.
    fn uninitialized_aspects(&self, mip: u32, layer: u32, aspects: Aspect) -> Aspect {
        (aspects & self.desc.format.aspects())
            .singles()
            .filter(|aspect| !self.initialized[self.aspect_index(mip, layer, *aspect)])
            .fold(Aspect::empty(), |acc, aspect| acc | aspect)
    }

    pub fn all_subresources(&self) -> SubresourceRange {
        SubresourceRange {
            aspects: self.desc.format.aspects(),
            base_mip: 0,
            mip_count: self.desc.mip_levels,
            base_layer: 0,
            layer_count: self.desc.array_layers,
        }
    }

    /// Size of a mip level as the API sees it.
    pub fn mip_virtual_size(&self, level: u32) -> vk::Extent3D {
        vk::Extent3D {
            width: (self.desc.width >> level).max(1),
            height: (self.desc.height >> level).max(1),
            depth: 1,
        }
    }

    /// Size of a mip level rounded up to whole texel blocks.
    pub fn mip_physical_size(&self, level: u32) -> vk::Extent3D {
        let virtual_size = self.mip_virtual_size(level);
        let block = self.desc.format.block_info(Aspect::COLOR);
        vk::Extent3D {
            width: virtual_size.width.next_multiple_of(block.width),
            height: virtual_size.height.next_multiple_of(block.height),
            depth: 1,
        }
    }

    pub fn last_usage(&self, mip: u32, layer: u32) -> TextureUsage {
        self.usages[self.index(mip, layer)]
    }

    /// Whether every aspect `range` selects is initialized in all of its
    /// subresources. Aspects the format lacks are ignored.
    pub fn is_initialized(&self, range: SubresourceRange) -> bool {
        range
            .iter()
            .all(|(mip, layer)| self.uninitialized_aspects(mip, layer, range.aspects).is_empty())
    }

    pub fn set_initialized(&mut self, range: SubresourceRange, initialized: bool) {
        let aspects = range.aspects & self.desc.format.aspects();
        for (mip, layer) in range.iter() {
            for aspect in aspects.singles() {
                let index = self.aspect_index(mip, layer, aspect);
                self.initialized[index] = initialized;
            }
        }
    }

    fn needs_barrier(last: TextureUsage, usage: TextureUsage) -> bool {
        let last_read_only = READ_ONLY_TEXTURE_USAGES.contains(last) && !last.is_empty();
        !(last == usage || (last.contains(usage) && last_read_only))
    }

    fn barrier(
        &self,
        last: TextureUsage,
        usage: TextureUsage,
        range: SubresourceRange,
    ) -> vk::ImageMemoryBarrier<'static> {
        let format = self.desc.format;
        // Depth and stencil of one subresource always move together.
        let range = SubresourceRange {
            aspects: format.aspects(),
            ..range
        };
        vk::ImageMemoryBarrier::default()
            .src_access_mask(sync::texture_access(last, format))
            .dst_access_mask(sync::texture_access(usage, format))
            .old_layout(sync::texture_layout(last, format))
            .new_layout(sync::texture_layout(usage, format))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.handle)
            .subresource_range(range.to_vk())
    }

    /// Moves every subresource in `range` to `usage`, adding the barriers
    /// needed. When the whole range shares one old usage a single barrier
    /// covers it. Returns whether any barrier was added.
    pub fn transition_and_get_barriers(
        &mut self,
        usage: TextureUsage,
        range: SubresourceRange,
        batch: &mut BarrierBatch,
    ) -> bool {
        let format = self.desc.format;
        let first = self.last_usage(range.base_mip, range.base_layer);
        let uniform = range
            .iter()
            .all(|(mip, layer)| self.last_usage(mip, layer) == first);

        let mut added = false;
        if uniform {
            if Self::needs_barrier(first, usage) {
                let barrier = self.barrier(first, usage, range);
                batch.add_image(
                    barrier,
                    sync::texture_stages(first, format),
                    sync::texture_stages(usage, format),
                );
                added = true;
            }
        } else {
            for (mip, layer) in range.iter() {
                let last = self.last_usage(mip, layer);
                if !Self::needs_barrier(last, usage) {
                    continue;
                }
                let barrier = self.barrier(last, usage, SubresourceRange::single(mip, layer, range.aspects));
                batch.add_image(
                    barrier,
                    sync::texture_stages(last, format),
                    sync::texture_stages(usage, format),
                );
                added = true;
            }
        }

        for (mip, layer) in range.iter() {
            let index = self.index(mip, layer);
            let last = self.usages[index];
            if Self::needs_barrier(last, usage) {
                self.usages[index] = usage;
            }
        }
        added
    }

    pub fn transition_usage_now(
        &mut self,
        fns: &dyn DeviceFns,
        ctx: &RecordingContext,
        usage: TextureUsage,
        range: SubresourceRange,
    ) {
        let mut batch = BarrierBatch::default();
        self.transition_and_get_barriers(usage, range, &mut batch);
        batch.emit(fns, ctx.command_buffer());
    }

    /// Clears every uninitialized subresource of `range` to zero.
    pub fn ensure_subresource_initialized(
        &mut self,
        fns: &dyn DeviceFns,
        ctx: &RecordingContext,
        range: SubresourceRange,
    ) -> anyhow::Result<()> {
        if self.is_initialized(range) {
            return Ok(());
        }
        if !ctx.toggles().lazy_clear_resource_on_first_use {
            self.set_initialized(range, true);
            return Ok(());
        }

        let uninitialized: Vec<SubresourceRange> = range
            .iter()
            .filter_map(|(mip, layer)| {
                let aspects = self.uninitialized_aspects(mip, layer, range.aspects);
                (!aspects.is_empty()).then(|| SubresourceRange::single(mip, layer, aspects))
            })
            .collect();
        log::debug!(
            "lazily clearing {} subresources of texture {:?}",
            uninitialized.len(),
            self.handle
        );

        self.transition_usage_now(fns, ctx, TextureUsage::COPY_DST, range);
        let cmd = ctx.command_buffer();
        let layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        let ranges: Vec<vk::ImageSubresourceRange> =
            uninitialized.iter().map(|r| r.to_vk()).collect();

        if self.desc.format.is_compressed() {
            self.clear_with_zeroed_buffer(fns, ctx, &uninitialized)?;
        } else if self.desc.format.has_depth_or_stencil() {
            let value = vk::ClearDepthStencilValue {
                depth: 0.0,
                stencil: 0,
            };
            fns.cmd_clear_depth_stencil_image(cmd, self.handle, layout, &value, &ranges);
        } else {
            let color = match self.desc.format.component_type() {
                ComponentType::Uint => vk::ClearColorValue { uint32: [0; 4] },
                ComponentType::Sint => vk::ClearColorValue { int32: [0; 4] },
                _ => vk::ClearColorValue { float32: [0.0; 4] },
            };
            fns.cmd_clear_color_image(cmd, self.handle, layout, &color, &ranges);
        }

        self.set_initialized(range, true);
        Ok(())
    }

    /// Compressed formats cannot be cleared directly, so copy from a zeroed
    /// buffer large enough for the biggest subresource.
    fn clear_with_zeroed_buffer(
        &self,
        fns: &dyn DeviceFns,
        ctx: &RecordingContext,
        subresources: &[SubresourceRange],
    ) -> anyhow::Result<()> {
        let block = self.desc.format.block_info(Aspect::COLOR);
        let footprint = |mip: u32| {
            let size = self.mip_physical_size(mip);
            u64::from(size.width / block.width)
                * u64::from(size.height / block.height)
                * u64::from(block.byte_size)
        };
        let Some(size) = subresources.iter().map(|r| footprint(r.base_mip)).max() else {
            return Ok(());
        };

        let buffer = fns
            .create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .context("failed to create zeroed buffer for compressed texture clear")?;
        ctx.deleter().buffer(ctx.pending_serial(), buffer);

        let cmd = ctx.command_buffer();
        fns.cmd_fill_buffer(cmd, buffer, 0, vk::WHOLE_SIZE, 0);

        let mut batch = BarrierBatch::default();
        batch.add_buffer(
            vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .size(vk::WHOLE_SIZE),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        );
        batch.emit(fns, cmd);

        let regions: Vec<vk::BufferImageCopy> = subresources
            .iter()
            .map(|r| {
                vk::BufferImageCopy::default()
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(r.base_mip)
                            .base_array_layer(r.base_layer)
                            .layer_count(1),
                    )
                    .image_extent(self.mip_virtual_size(r.base_mip))
            })
            .collect();
        fns.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            self.handle,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &regions,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::{
        config::Toggles,
        deleter::FencedDeleter,
        native::{Call, CaptureDevice},
    };

    fn texture(format: TextureFormat, layers: u32, mips: u32) -> TextureState {
        TextureState::new(
            vk::Image::from_raw(3),
            TextureDesc::default()
                .format(format)
                .size(16, 16, layers)
                .mip_levels(mips),
        )
    }

    fn context(deleter: &FencedDeleter, toggles: Toggles) -> RecordingContext {
        RecordingContext::new(vk::CommandBuffer::null(), 5, deleter.handle(), toggles)
    }

    #[test]
    fn mixed_usages_get_one_barrier_per_subresource() {
        let mut tex = texture(TextureFormat::Rgba8Unorm, 2, 1);
        let mut batch = BarrierBatch::default();
        tex.transition_and_get_barriers(
            TextureUsage::SAMPLED,
            SubresourceRange::single(0, 0, Aspect::COLOR),
            &mut batch,
        );
        assert_eq!(batch.images.len(), 1);
        assert_eq!(batch.images[0].old_layout, vk::ImageLayout::UNDEFINED);

        let mut batch = BarrierBatch::default();
        let all = tex.all_subresources();
        tex.transition_and_get_barriers(TextureUsage::COPY_DST, all, &mut batch);
        assert_eq!(batch.images.len(), 2);
        assert_eq!(tex.last_usage(0, 1), TextureUsage::COPY_DST);

        let mut batch = BarrierBatch::default();
        tex.transition_and_get_barriers(TextureUsage::COPY_DST, all, &mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn only_uninitialized_layers_are_cleared() {
        let device = CaptureDevice::new();
        let deleter = FencedDeleter::new();
        let ctx = context(&deleter, Toggles::default());

        let mut tex = texture(TextureFormat::Rgba8Unorm, 3, 1);
        tex.set_initialized(SubresourceRange::single(0, 1, Aspect::COLOR), true);
        let all = tex.all_subresources();
        tex.ensure_subresource_initialized(&device, &ctx, all).unwrap();
        assert!(tex.is_initialized(all));

        let cleared: Vec<_> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ClearColorImage { ranges, layout, .. } => Some((ranges, layout)),
                _ => None,
            })
            .collect();
        assert_eq!(cleared.len(), 1);
        let (ranges, layout) = &cleared[0];
        assert_eq!(*layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let layers: Vec<u32> = ranges.iter().map(|r| r.base_array_layer).collect();
        assert_eq!(layers, vec![0, 2]);

        device.take_calls();
        tex.ensure_subresource_initialized(&device, &ctx, all).unwrap();
        assert!(device.calls().is_empty());
    }

    #[test]
    fn compressed_textures_clear_through_a_zeroed_buffer() {
        let device = CaptureDevice::new();
        let mut deleter = FencedDeleter::new();
        let ctx = context(&deleter, Toggles::default());

        let mut tex = texture(TextureFormat::Bc1RgbaUnorm, 1, 3);
        let range = SubresourceRange {
            base_mip: 1,
            mip_count: 2,
            ..tex.all_subresources()
        };
        tex.ensure_subresource_initialized(&device, &ctx, range).unwrap();

        // Mip 1 of a 16x16 BC1 texture is 2x2 blocks of 8 bytes.
        assert_eq!(
            device.count(|c| matches!(c, Call::CreateBuffer { size: 32, .. })),
            1
        );
        assert_eq!(device.count(|c| matches!(c, Call::ClearColorImage { .. })), 0);
        assert_eq!(
            device.count(|c| matches!(c, Call::CopyBufferToImage { regions, .. } if regions.len() == 2)),
            1
        );
        assert_eq!(deleter.tick(&device, 4), 0);
        assert_eq!(deleter.tick(&device, 5), 1);
    }

    #[test]
    fn stencil_writes_leave_depth_uninitialized() {
        let device = CaptureDevice::new();
        let deleter = FencedDeleter::new();
        let ctx = context(&deleter, Toggles::default());

        let mut tex = texture(TextureFormat::Depth24PlusStencil8, 1, 1);
        let all = tex.all_subresources();
        let stencil = SubresourceRange {
            aspects: Aspect::STENCIL,
            ..all
        };
        let depth = SubresourceRange {
            aspects: Aspect::DEPTH,
            ..all
        };
        tex.set_initialized(stencil, true);
        assert!(tex.is_initialized(stencil));
        assert!(!tex.is_initialized(depth));
        assert!(!tex.is_initialized(all));

        tex.ensure_subresource_initialized(&device, &ctx, all).unwrap();
        let cleared: Vec<vk::ImageAspectFlags> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ClearDepthStencilImage { ranges, .. } => Some(ranges[0].aspect_mask),
                _ => None,
            })
            .collect();
        assert_eq!(cleared, vec![vk::ImageAspectFlags::DEPTH]);
        assert!(tex.is_initialized(all));
    }

    #[test]
    fn disabled_lazy_clear_just_marks_initialized() {
        let device = CaptureDevice::new();
        let deleter = FencedDeleter::new();
        let ctx = context(
            &deleter,
            Toggles::default().lazy_clear_resource_on_first_use(false),
        );

        let mut tex = texture(TextureFormat::Depth24PlusStencil8, 1, 1);
        let all = tex.all_subresources();
        tex.ensure_subresource_initialized(&device, &ctx, all).unwrap();
        assert!(tex.is_initialized(all));
        assert!(device.calls().is_empty());
    }
}
