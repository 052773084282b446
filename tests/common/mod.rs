#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use arbor_cmd::{
    CommandBuffer, DeviceExtensions, FencedDeleter, LayoutCache, Recorder, RecordingContext,
    RenderPassCache, ResourceTable, Toggles,
    binding::{BindGroup, BindGroupLayoutEntry, BindingResource},
    format::{Aspect, TextureFormat},
    layout::PipelineLayout,
    native::{Call, CaptureDevice},
    pipeline::{ComputePipeline, RenderPipeline},
    resource::{
        BufferDesc, BufferId, BufferUsage, TextureDesc, TextureId, TextureViewDesc, TextureViewId,
    },
};
use ash::vk::{self, Handle};

pub const PENDING_SERIAL: u64 = 7;

/// Console logging for test runs. Only the first call installs the logger.
pub fn init_logging() {
    use log4rs::{
        append::console::{ConsoleAppender, Target},
        config::{Appender, Config, Root},
    };

    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
    let Ok(config) = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(log::LevelFilter::Debug))
    else {
        return;
    };
    let _ = log4rs::init_config(config);
}

/// Everything a recording needs, wired to a capturing device.
pub struct Fixture {
    pub device: CaptureDevice,
    pub deleter: FencedDeleter,
    pub resources: ResourceTable,
    pub render_passes: RenderPassCache,
    pub layouts: LayoutCache,
    pub toggles: Toggles,
    pub extensions: DeviceExtensions,
    next_handle: u64,
}

impl Default for Fixture {
    fn default() -> Self {
        init_logging();
        Self {
            device: CaptureDevice::new(),
            deleter: FencedDeleter::new(),
            resources: ResourceTable::new(),
            render_passes: RenderPassCache::new(),
            layouts: LayoutCache::new(),
            toggles: Toggles::default(),
            extensions: DeviceExtensions::default(),
            next_handle: 1,
        }
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw handles for externally owned objects. They stay well below the
    /// ones the capture device hands out.
    pub fn handle<T: Handle>(&mut self) -> T {
        self.next_handle += 1;
        T::from_raw(self.next_handle)
    }

    pub fn buffer(&mut self, size: u64, usage: BufferUsage) -> BufferId {
        let handle = self.handle();
        self.resources
            .register_buffer(handle, BufferDesc::default().size(size).usage(usage))
    }

    pub fn texture(&mut self, desc: TextureDesc) -> TextureId {
        let handle = self.handle();
        self.resources.register_texture(handle, desc)
    }

    pub fn view(&mut self, texture: TextureId) -> TextureViewId {
        let format = self.resources.texture(texture).format();
        let handle = self.handle();
        self.resources
            .register_view(handle, TextureViewDesc::new(texture, format))
    }

    pub fn color_target(&mut self, format: TextureFormat, size: u32) -> (TextureId, TextureViewId) {
        let texture = self.texture(TextureDesc::default().format(format).size(size, size, 1));
        let view = self.view(texture);
        (texture, view)
    }

    pub fn pipeline_layout(&mut self, groups: &[&[BindGroupLayoutEntry]]) -> Arc<PipelineLayout> {
        let bind_group_layouts: Vec<_> = groups
            .iter()
            .map(|entries| {
                self.layouts
                    .get_or_create_bind_group_layout(&self.device, entries)
                    .unwrap()
            })
            .collect();
        self.layouts
            .get_or_create_pipeline_layout(&self.device, &bind_group_layouts)
            .unwrap()
    }

    pub fn bind_group(
        &mut self,
        layout: &PipelineLayout,
        group: usize,
        resources: Vec<BindingResource>,
    ) -> Arc<BindGroup> {
        let bind_group_layout = layout.bind_group_layout(group).unwrap().clone();
        let handle = self.handle();
        Arc::new(BindGroup::new(bind_group_layout, handle, resources))
    }

    pub fn render_pipeline(&mut self, layout: Arc<PipelineLayout>) -> Arc<RenderPipeline> {
        let handle = self.handle();
        Arc::new(RenderPipeline::new(handle, layout))
    }

    pub fn compute_pipeline(&mut self, layout: Arc<PipelineLayout>) -> Arc<ComputePipeline> {
        let handle = self.handle();
        Arc::new(ComputePipeline { handle, layout })
    }

    pub fn context(&self) -> RecordingContext {
        RecordingContext::new(
            vk::CommandBuffer::from_raw(0xC0),
            PENDING_SERIAL,
            self.deleter.handle(),
            self.toggles,
        )
    }

    /// Records into a fresh context and returns the native calls it produced.
    /// Calls captured before (layout creation and the like) are dropped.
    pub fn record(&mut self, commands: &CommandBuffer) -> anyhow::Result<Vec<Call>> {
        self.device.take_calls();
        let mut ctx = self.context();
        let mut recorder = Recorder::new(
            &self.device,
            &mut self.resources,
            &self.render_passes,
            self.extensions,
        );
        recorder.record(commands, &mut ctx)?;
        ctx.into_submittable()?;
        Ok(self.device.take_calls())
    }
}

pub fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|c| pred(c)).count()
}

pub fn barrier_count(calls: &[Call]) -> usize {
    count(calls, |c| matches!(c, Call::PipelineBarrier { .. }))
}

pub fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("call not found in {calls:#?}"))
}

struct SimImage {
    format: TextureFormat,
    width: u32,
    height: u32,
    array_layers: u32,
    subresources: Vec<Vec<u8>>,
}

impl SimImage {
    fn new(desc: &TextureDesc) -> Self {
        let mut image = Self {
            format: desc.format,
            width: desc.width,
            height: desc.height,
            array_layers: desc.array_layers,
            subresources: Vec::new(),
        };
        for mip in 0..desc.mip_levels {
            let (blocks_wide, blocks_high) = image.blocks(mip);
            let size = (blocks_wide * blocks_high * image.block_bytes()) as usize;
            for _ in 0..desc.array_layers {
                image.subresources.push(vec![0xAB; size]);
            }
        }
        image
    }

    fn block_bytes(&self) -> u32 {
        self.format.block_info(Aspect::COLOR).byte_size
    }

    /// Block grid of a mip; partial edge blocks count as whole ones.
    fn blocks(&self, mip: u32) -> (u32, u32) {
        let block = self.format.block_info(Aspect::COLOR);
        let width = (self.width >> mip).max(1);
        let height = (self.height >> mip).max(1);
        (width.div_ceil(block.width), height.div_ceil(block.height))
    }

    fn subresource(&mut self, mip: u32, layer: u32) -> &mut Vec<u8> {
        &mut self.subresources[(mip * self.array_layers + layer) as usize]
    }
}

/// One contiguous run of bytes moved between a buffer and an image row.
struct RowCopy {
    buffer_offset: usize,
    mip: u32,
    layer: u32,
    image_offset: usize,
    len: usize,
}

/// Replays captured transfer commands over byte arrays, following the Vulkan
/// addressing rules for buffer/image copies of block-compressed and plain
/// color formats.
#[derive(Default)]
pub struct SimulatedMemory {
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    images: HashMap<vk::Image, SimImage>,
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&mut self, handle: vk::Image, desc: &TextureDesc) {
        self.images.insert(handle, SimImage::new(desc));
    }

    pub fn write_subresource(&mut self, image: vk::Image, mip: u32, layer: u32, data: &[u8]) {
        let subresource = self.images.get_mut(&image).unwrap().subresource(mip, layer);
        assert_eq!(subresource.len(), data.len());
        subresource.copy_from_slice(data);
    }

    pub fn subresource(&mut self, image: vk::Image, mip: u32, layer: u32) -> Vec<u8> {
        self.images.get_mut(&image).unwrap().subresource(mip, layer).clone()
    }

    pub fn replay(&mut self, calls: &[Call]) {
        for call in calls {
            match call {
                Call::CreateBuffer { handle, size, .. } => {
                    self.buffers.insert(*handle, vec![0xCD; *size as usize]);
                }
                Call::FillBuffer {
                    buffer,
                    offset,
                    size,
                    data,
                } => {
                    let bytes = self.buffers.get_mut(buffer).unwrap();
                    let end = if *size == vk::WHOLE_SIZE {
                        bytes.len()
                    } else {
                        (*offset + *size) as usize
                    };
                    let pattern = data.to_le_bytes();
                    for (i, byte) in bytes[*offset as usize..end].iter_mut().enumerate() {
                        *byte = pattern[i % 4];
                    }
                }
                Call::CopyBufferToImage {
                    src, dst, regions, ..
                } => {
                    for region in regions {
                        for row in self.rows(*dst, region) {
                            let start = row.buffer_offset;
                            let data = self.buffers[src][start..start + row.len].to_vec();
                            let image = self.images.get_mut(dst).unwrap();
                            image.subresource(row.mip, row.layer)
                                [row.image_offset..row.image_offset + row.len]
                                .copy_from_slice(&data);
                        }
                    }
                }
                Call::CopyImageToBuffer {
                    src, dst, regions, ..
                } => {
                    for region in regions {
                        for row in self.rows(*src, region) {
                            let image = self.images.get_mut(src).unwrap();
                            let data = image.subresource(row.mip, row.layer)
                                [row.image_offset..row.image_offset + row.len]
                                .to_vec();
                            let start = row.buffer_offset;
                            self.buffers.get_mut(dst).unwrap()[start..start + row.len]
                                .copy_from_slice(&data);
                        }
                    }
                }
                Call::CopyImage {
                    src, dst, regions, ..
                } => {
                    for region in regions {
                        self.copy_image(*src, *dst, region);
                    }
                }
                Call::ClearColorImage { image, ranges, .. } => {
                    let image = self.images.get_mut(image).unwrap();
                    for range in ranges {
                        for mip in range.base_mip_level..range.base_mip_level + range.level_count {
                            for layer in
                                range.base_array_layer..range.base_array_layer + range.layer_count
                            {
                                image.subresource(mip, layer).fill(0);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn rows(&self, image: vk::Image, region: &vk::BufferImageCopy) -> Vec<RowCopy> {
        let image = &self.images[&image];
        let block = image.format.block_info(Aspect::COLOR);
        let extent = region.image_extent;
        let row_texels = if region.buffer_row_length == 0 {
            extent.width
        } else {
            region.buffer_row_length
        };
        let image_rows = if region.buffer_image_height == 0 {
            extent.height
        } else {
            region.buffer_image_height
        };
        let row_pitch = row_texels.div_ceil(block.width) * block.byte_size;
        let slice_pitch = row_pitch * image_rows.div_ceil(block.height);

        let mip = region.image_subresource.mip_level;
        let (image_blocks_wide, _) = image.blocks(mip);
        let blocks_wide = extent.width.div_ceil(block.width);
        let blocks_high = extent.height.div_ceil(block.height);
        let x = region.image_offset.x as u32 / block.width;
        let y = region.image_offset.y as u32 / block.height;

        let mut rows = Vec::new();
        for layer in 0..region.image_subresource.layer_count {
            for row in 0..blocks_high {
                rows.push(RowCopy {
                    buffer_offset: (region.buffer_offset
                        + u64::from(layer * slice_pitch + row * row_pitch))
                        as usize,
                    mip,
                    layer: region.image_subresource.base_array_layer + layer,
                    image_offset: (((y + row) * image_blocks_wide + x) * block.byte_size) as usize,
                    len: (blocks_wide * block.byte_size) as usize,
                });
            }
        }
        rows
    }

    fn copy_image(&mut self, src: vk::Image, dst: vk::Image, region: &vk::ImageCopy) {
        let (src_blocks_wide, format) = {
            let image = &self.images[&src];
            (image.blocks(region.src_subresource.mip_level).0, image.format)
        };
        let dst_blocks_wide = self.images[&dst].blocks(region.dst_subresource.mip_level).0;
        let block = format.block_info(Aspect::COLOR);
        let blocks_wide = region.extent.width.div_ceil(block.width);
        let blocks_high = region.extent.height.div_ceil(block.height);
        let len = (blocks_wide * block.byte_size) as usize;

        for layer in 0..region.src_subresource.layer_count {
            for row in 0..blocks_high {
                let src_row = region.src_offset.y as u32 / block.height + row;
                let src_x = region.src_offset.x as u32 / block.width;
                let start = ((src_row * src_blocks_wide + src_x) * block.byte_size) as usize;
                let data = self
                    .images
                    .get_mut(&src)
                    .unwrap()
                    .subresource(
                        region.src_subresource.mip_level,
                        region.src_subresource.base_array_layer + layer,
                    )[start..start + len]
                    .to_vec();

                let dst_row = region.dst_offset.y as u32 / block.height + row;
                let dst_x = region.dst_offset.x as u32 / block.width;
                let start = ((dst_row * dst_blocks_wide + dst_x) * block.byte_size) as usize;
                self.images
                    .get_mut(&dst)
                    .unwrap()
                    .subresource(
                        region.dst_subresource.mip_level,
                        region.dst_subresource.base_array_layer + layer,
                    )[start..start + len]
                    .copy_from_slice(&data);
            }
        }
    }
}
