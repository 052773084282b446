mod common;

use std::sync::Arc;

use arbor_cmd::{
    Recorder,
    binding::{BindGroup, BindGroupLayoutEntry, BindingResource, BindingType, ShaderStages},
    command::{Command, CommandBuffer, PassResourceUsage},
    format::TextureFormat,
    native::Call,
    pipeline::QuerySet,
    resource::{BufferId, BufferUsage, TextureDesc, TextureUsage},
};
use ash::vk::{self, Handle};

use common::{Fixture, barrier_count, count, position};

fn compute_entry(binding: u32, ty: BindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry::new(binding, ShaderStages::COMPUTE, ty)
}

fn buffer_binding(buffer: BufferId, size: u64) -> BindingResource {
    BindingResource::Buffer {
        buffer,
        offset: 0,
        size,
    }
}

fn dispatch() -> Command {
    Command::Dispatch { x: 8, y: 8, z: 1 }
}

#[test]
fn dispatch_synchronizes_its_bind_groups_once() {
    let mut fx = Fixture::new();
    let storage = fx.buffer(1024, BufferUsage::STORAGE);
    let texture = fx.texture(
        TextureDesc::default()
            .format(TextureFormat::Rgba8Unorm)
            .size(32, 32, 1),
    );
    let view = fx.view(texture);
    let layout = fx.pipeline_layout(&[&[
        compute_entry(0, BindingType::StorageBuffer),
        compute_entry(1, BindingType::SampledTexture),
    ]]);
    let group = fx.bind_group(
        &layout,
        0,
        vec![
            buffer_binding(storage, 1024),
            BindingResource::TextureView(view),
        ],
    );
    let pipeline = fx.compute_pipeline(layout);

    let calls = fx
        .record(&CommandBuffer::new(
            vec![
                Command::BeginComputePass,
                Command::SetComputePipeline(pipeline),
                Command::SetBindGroup {
                    index: 0,
                    group,
                    dynamic_offsets: Vec::new(),
                },
                dispatch(),
                dispatch(),
                Command::EndComputePass,
            ],
            vec![
                PassResourceUsage::default()
                    .buffer(storage, BufferUsage::STORAGE)
                    .texture(texture, TextureUsage::SAMPLED),
            ],
        ))
        .unwrap();

    // Both resources are lazily zeroed when the pass starts.
    let fill = position(&calls, |c| matches!(c, Call::FillBuffer { .. }));
    let clear = position(&calls, |c| matches!(c, Call::ClearColorImage { .. }));
    let bind_pipeline = position(&calls, |c| matches!(c, Call::BindPipeline { .. }));
    assert!(fill < bind_pipeline && clear < bind_pipeline);

    let dispatches: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::Dispatch { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(dispatches.len(), 2);

    let before_first = &calls[bind_pipeline..dispatches[0]];
    assert_eq!(barrier_count(before_first), 1);
    let Some(Call::PipelineBarrier {
        buffers,
        images,
        dst_stages,
        ..
    }) = before_first
        .iter()
        .find(|c| matches!(c, Call::PipelineBarrier { .. }))
    else {
        unreachable!();
    };
    assert_eq!(buffers.len(), 1);
    assert_eq!(images.len(), 1);
    assert_eq!(
        images[0].new_layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert!(dst_stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
    assert_eq!(count(before_first, |c| matches!(c, Call::BindDescriptorSets { .. })), 1);

    // Nothing changed between the two dispatches.
    assert_eq!(dispatches[1], dispatches[0] + 1);
}

#[test]
fn indirect_dispatch_waits_for_the_argument_write() {
    let mut fx = Fixture::new();
    let staging = fx.buffer(12, BufferUsage::COPY_SRC);
    fx.resources.buffer_mut(staging).set_initialized(true);
    let arguments = fx.buffer(12, BufferUsage::INDIRECT | BufferUsage::COPY_DST);
    let layout = fx.pipeline_layout(&[]);
    let pipeline = fx.compute_pipeline(layout);

    let calls = fx
        .record(&CommandBuffer::new(
            vec![
                Command::CopyBufferToBuffer {
                    source: staging,
                    source_offset: 0,
                    destination: arguments,
                    destination_offset: 0,
                    size: 12,
                },
                Command::BeginComputePass,
                Command::SetComputePipeline(pipeline),
                Command::DispatchIndirect {
                    buffer: arguments,
                    offset: 0,
                },
                Command::EndComputePass,
            ],
            vec![PassResourceUsage::default().buffer(arguments, BufferUsage::INDIRECT)],
        ))
        .unwrap();

    let handle = fx.resources.buffer(arguments).handle();
    let barrier = position(&calls, |c| {
        matches!(c, Call::PipelineBarrier { buffers, .. }
            if buffers.iter().any(|b| b.buffer == handle
                && b.src_access == vk::AccessFlags::TRANSFER_WRITE
                && b.dst_access == vk::AccessFlags::INDIRECT_COMMAND_READ))
    });
    let dispatch = position(&calls, |c| {
        matches!(c, Call::DispatchIndirect { buffer, offset: 0 } if *buffer == handle)
    });
    assert!(barrier < dispatch);
    assert_eq!(fx.resources.buffer(arguments).last_usage(), BufferUsage::INDIRECT);
}

#[test]
fn switching_layouts_rebinds_only_the_groups_that_diverge() {
    let mut fx = Fixture::new();
    let uniforms = fx.buffer(256, BufferUsage::UNIFORM);
    let storage = fx.buffer(256, BufferUsage::STORAGE);
    let first_layout = fx.pipeline_layout(&[
        &[compute_entry(0, BindingType::UniformBuffer)],
        &[compute_entry(0, BindingType::StorageBuffer)],
    ]);
    let second_layout = fx.pipeline_layout(&[
        &[compute_entry(0, BindingType::UniformBuffer)],
        &[compute_entry(0, BindingType::ReadonlyStorageBuffer)],
    ]);
    let shared = fx.bind_group(&first_layout, 0, vec![buffer_binding(uniforms, 256)]);
    let writable = fx.bind_group(&first_layout, 1, vec![buffer_binding(storage, 256)]);
    let readonly = fx.bind_group(&second_layout, 1, vec![buffer_binding(storage, 256)]);
    let first = fx.compute_pipeline(first_layout);
    let second = fx.compute_pipeline(second_layout);

    let set = |index: u32, group: &Arc<BindGroup>| Command::SetBindGroup {
        index,
        group: Arc::clone(group),
        dynamic_offsets: Vec::new(),
    };
    let calls = fx
        .record(&CommandBuffer::new(
            vec![
                Command::BeginComputePass,
                Command::SetComputePipeline(first),
                set(0, &shared),
                set(1, &writable),
                dispatch(),
                Command::SetComputePipeline(second),
                set(1, &readonly),
                dispatch(),
                Command::EndComputePass,
            ],
            vec![
                PassResourceUsage::default()
                    .buffer(uniforms, BufferUsage::UNIFORM)
                    .buffer(storage, BufferUsage::STORAGE),
            ],
        ))
        .unwrap();

    let bound: Vec<(u32, vk::DescriptorSet)> = calls
        .iter()
        .filter_map(|c| match c {
            Call::BindDescriptorSets {
                first_set, sets, ..
            } => Some((*first_set, sets[0])),
            _ => None,
        })
        .collect();
    assert_eq!(
        bound,
        vec![
            (0, shared.handle()),
            (1, writable.handle()),
            (1, readonly.handle()),
        ]
    );
}

#[test]
fn queries_are_reset_written_and_resolved() {
    let mut fx = Fixture::new();
    let query_set = Arc::new(QuerySet {
        handle: vk::QueryPool::from_raw(0x51),
        count: 4,
    });
    let results = fx.buffer(32, BufferUsage::COPY_DST);
    let partial = fx.buffer(64, BufferUsage::COPY_DST);
    let layout = fx.pipeline_layout(&[]);
    let pipeline = fx.compute_pipeline(layout);

    let resolve = |destination, destination_offset| Command::ResolveQuerySet {
        query_set: query_set.clone(),
        first_query: 0,
        query_count: 4,
        destination,
        destination_offset,
    };
    let calls = fx
        .record(
            &CommandBuffer::new(
                vec![
                    Command::WriteTimestamp {
                        query_set: query_set.clone(),
                        query_index: 0,
                    },
                    Command::BeginComputePass,
                    Command::SetComputePipeline(pipeline),
                    Command::WriteTimestamp {
                        query_set: query_set.clone(),
                        query_index: 1,
                    },
                    Command::EndComputePass,
                    resolve(results, 0),
                    resolve(partial, 32),
                ],
                vec![PassResourceUsage::default()],
            )
            .with_query_sets(vec![query_set.clone()]),
        )
        .unwrap();

    assert!(matches!(
        calls[0],
        Call::ResetQueryPool { pool, first_query: 0, query_count: 4 } if pool == query_set.handle
    ));
    let timestamps: Vec<(vk::PipelineStageFlags, u32)> = calls
        .iter()
        .filter_map(|c| match c {
            Call::WriteTimestamp { stage, query, .. } => Some((*stage, *query)),
            _ => None,
        })
        .collect();
    assert_eq!(
        timestamps,
        vec![
            (vk::PipelineStageFlags::ALL_COMMANDS, 0),
            (vk::PipelineStageFlags::ALL_COMMANDS, 1),
        ]
    );

    let resolves: Vec<(vk::Buffer, vk::DeviceSize, vk::DeviceSize, vk::QueryResultFlags)> = calls
        .iter()
        .filter_map(|c| match c {
            Call::CopyQueryPoolResults {
                dst,
                dst_offset,
                stride,
                flags,
                ..
            } => Some((*dst, *dst_offset, *stride, *flags)),
            _ => None,
        })
        .collect();
    let flags = vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT;
    let results = fx.resources.buffer(results).handle();
    let partial = fx.resources.buffer(partial).handle();
    assert_eq!(resolves, vec![(results, 0, 8, flags), (partial, 32, 8, flags)]);

    // Only the partially written buffer is zero-filled first.
    let fills: Vec<vk::Buffer> = calls
        .iter()
        .filter_map(|c| match c {
            Call::FillBuffer { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .collect();
    assert_eq!(fills, vec![partial]);
}

#[test]
fn failed_lazy_clear_poisons_the_recording() {
    let mut fx = Fixture::new();
    let texture = fx.texture(
        TextureDesc::default()
            .format(TextureFormat::Bc3RgbaUnorm)
            .size(16, 16, 1),
    );
    let commands = CommandBuffer::new(
        vec![Command::BeginComputePass, Command::EndComputePass],
        vec![PassResourceUsage::default().texture(texture, TextureUsage::SAMPLED)],
    );

    fx.device.fail_object_creation(true);
    let mut ctx = fx.context();
    let mut recorder = Recorder::new(
        &fx.device,
        &mut fx.resources,
        &fx.render_passes,
        fx.extensions,
    );
    let err = recorder.record(&commands, &mut ctx).unwrap_err();

    assert!(format!("{err:#}").contains("compute pass"));
    assert!(ctx.is_poisoned());
    assert!(ctx.into_submittable().is_err());
    let texture = fx.resources.texture(texture);
    assert!(!texture.is_initialized(texture.all_subresources()));
}

#[test]
#[should_panic(expected = "no resource usage recorded for pass 0")]
fn a_pass_without_recorded_usage_is_fatal() {
    let mut fx = Fixture::new();
    let _ = fx.record(&CommandBuffer::new(
        vec![Command::BeginComputePass, Command::EndComputePass],
        Vec::new(),
    ));
}
