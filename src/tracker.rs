//! Draw state that is applied lazily, right before a draw or dispatch.

use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use crate::{
    binding::{BindGroup, BindingResource, BindingType},
    config::MAX_BIND_GROUPS,
    layout::{GroupMask, PipelineLayout},
    native::DeviceFns,
    pipeline::IndexFormat,
    resource::{BarrierBatch, BufferUsage, ResourceTable, TextureUsage},
};

pub type DynamicOffsets = SmallVec<[u32; 4]>;

/// Tracks the bind groups set in a pass and which of them must be bound again
/// before the next draw or dispatch. A fresh tracker is used for every pass.
#[derive(Default)]
pub struct BindGroupTracker {
    bind_groups: [Option<Arc<BindGroup>>; MAX_BIND_GROUPS],
    dynamic_offsets: [DynamicOffsets; MAX_BIND_GROUPS],
    dirty_groups: GroupMask,
    groups_to_apply: GroupMask,
    pipeline_layout: Option<Arc<PipelineLayout>>,
    last_applied_layout: Option<Arc<PipelineLayout>>,
}

impl BindGroupTracker {
    pub fn on_set_bind_group(
        &mut self,
        index: usize,
        group: Arc<BindGroup>,
        dynamic_offsets: &[u32],
    ) {
        self.bind_groups[index] = Some(group);
        self.dynamic_offsets[index] = dynamic_offsets.iter().copied().collect();
        self.dirty_groups |= 1 << index;
    }

    pub fn on_set_pipeline(&mut self, layout: Arc<PipelineLayout>) {
        self.pipeline_layout = Some(layout);
    }

    /// Folds a pipeline layout change into the dirty set and returns the
    /// groups the next apply binds.
    fn before_apply(&mut self) -> GroupMask {
        let Some(layout) = &self.pipeline_layout else {
            return 0;
        };
        let changed = match &self.last_applied_layout {
            Some(last) => !Arc::ptr_eq(last, layout),
            None => true,
        };
        if changed {
            let inherited = match &self.last_applied_layout {
                Some(last) => layout.inherited_groups_mask(last),
                None => 0,
            };
            self.dirty_groups |= !inherited & layout.mask();
        }
        self.groups_to_apply = self.dirty_groups & layout.mask();
        self.groups_to_apply
    }

    fn did_apply(&mut self) {
        self.dirty_groups = 0;
        self.groups_to_apply = 0;
        self.last_applied_layout = self.pipeline_layout.clone();
    }

    /// Binds every dirty group, one native call per group. Returns the
    /// number of groups bound.
    pub fn apply(
        &mut self,
        fns: &dyn DeviceFns,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
    ) -> usize {
        let to_apply = self.before_apply();
        let mut bound = 0;
        if let Some(layout) = &self.pipeline_layout {
            for index in 0..MAX_BIND_GROUPS {
                if to_apply & (1 << index) == 0 {
                    continue;
                }
                let Some(group) = &self.bind_groups[index] else {
                    log::warn!("group {index} used by the pipeline was never set");
                    continue;
                };
                fns.cmd_bind_descriptor_sets(
                    cmd,
                    bind_point,
                    layout.handle(),
                    index as u32,
                    &[group.handle()],
                    &self.dynamic_offsets[index],
                );
                bound += 1;
            }
        }
        self.did_apply();
        bound
    }

    /// Compute variant of [`apply`](Self::apply): first transitions every
    /// resource behind the groups the pipeline uses, in one combined barrier.
    pub fn apply_compute(
        &mut self,
        fns: &dyn DeviceFns,
        cmd: vk::CommandBuffer,
        resources: &mut ResourceTable,
    ) -> usize {
        let mut batch = BarrierBatch::default();
        if let Some(layout) = &self.pipeline_layout {
            for index in 0..MAX_BIND_GROUPS {
                if layout.mask() & (1 << index) == 0 {
                    continue;
                }
                if let Some(group) = &self.bind_groups[index] {
                    transition_group_resources(group, resources, &mut batch);
                }
            }
        }
        batch.emit(fns, cmd);

        self.apply(fns, cmd, vk::PipelineBindPoint::COMPUTE)
    }
}

fn transition_group_resources(
    group: &BindGroup,
    resources: &mut ResourceTable,
    batch: &mut BarrierBatch,
) {
    for (entry, resource) in group.bindings() {
        match (*resource, entry.ty) {
            (
                BindingResource::Buffer { buffer, .. },
                BindingType::StorageBuffer | BindingType::ReadonlyStorageBuffer,
            ) => {
                resources
                    .buffer_mut(buffer)
                    .transition_and_get_barrier(BufferUsage::STORAGE, batch);
            }
            (BindingResource::Buffer { buffer, .. }, BindingType::UniformBuffer) => {
                resources
                    .buffer_mut(buffer)
                    .transition_and_get_barrier(BufferUsage::UNIFORM, batch);
            }
            (BindingResource::TextureView(view), ty) => {
                let usage = if ty.is_storage_texture() {
                    TextureUsage::STORAGE
                } else {
                    TextureUsage::SAMPLED
                };
                let view = resources.view(view).desc;
                resources.texture_mut(view.texture).transition_and_get_barriers(
                    usage,
                    view.subresources(),
                    batch,
                );
            }
            _ => {}
        }
    }
}

/// Re-issues the native index buffer bind only when the buffer or the
/// effective index format changed.
#[derive(Default)]
pub struct IndexBufferTracker {
    buffer: Option<(vk::Buffer, vk::DeviceSize)>,
    buffer_format: Option<IndexFormat>,
    pipeline_format: Option<IndexFormat>,
    last_applied: Option<IndexFormat>,
}

impl IndexBufferTracker {
    pub fn on_set_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        format: Option<IndexFormat>,
    ) {
        self.buffer = Some((buffer, offset));
        self.buffer_format = format;
        self.last_applied = None;
    }

    pub fn on_set_pipeline(&mut self, format: Option<IndexFormat>) {
        self.pipeline_format = format;
    }

    pub fn apply(&mut self, fns: &dyn DeviceFns, cmd: vk::CommandBuffer) {
        let Some((buffer, offset)) = self.buffer else {
            return;
        };
        let format = self
            .buffer_format
            .or(self.pipeline_format)
            .unwrap_or(IndexFormat::Uint32);
        if self.last_applied == Some(format) {
            return;
        }
        fns.cmd_bind_index_buffer(cmd, buffer, offset, format.to_vk());
        self.last_applied = Some(format);
    }
}
