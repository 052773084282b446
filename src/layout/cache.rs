use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use ash::vk;

use crate::{
    binding::{self, BindGroupLayout, BindGroupLayoutEntry, BindingCounts},
    config::MAX_BIND_GROUPS,
    deleter::DeleterHandle,
    error::LayoutError,
    native::DeviceFns,
};

use super::PipelineLayout;

/// Bind group layout ids per group slot; interning makes ids structural.
type PipelineLayoutKey = [Option<u64>; MAX_BIND_GROUPS];

struct CachedBindGroupLayout {
    id: u64,
    layout: Weak<BindGroupLayout>,
    counts: BindingCounts,
    handle: vk::DescriptorSetLayout,
}

struct CachedPipelineLayout {
    id: u64,
    layout: Weak<PipelineLayout>,
    handle: vk::PipelineLayout,
}

/// Content-addressed table of layouts.
///
/// Lookups hand out shared handles; the table itself only keeps weak
/// references, so a layout dies with its last user. A dead entry found by a
/// later lookup is brought back with its native object; otherwise
/// [`collect_unused`](Self::collect_unused) releases it.
#[derive(Default)]
pub struct LayoutCache {
    bind_group_layouts: HashMap<Vec<BindGroupLayoutEntry>, CachedBindGroupLayout>,
    pipeline_layouts: HashMap<PipelineLayoutKey, CachedPipelineLayout>,
    next_id: u64,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn get_or_create_bind_group_layout(
        &mut self,
        fns: &dyn DeviceFns,
        entries: &[BindGroupLayoutEntry],
    ) -> Result<Arc<BindGroupLayout>, LayoutError> {
        let counts = binding::validate_entries(entries)?;
        let mut entries = entries.to_vec();
        entries.sort_by_key(|e| e.binding);
        self.intern_bind_group_layout(fns, entries, counts)
    }

    /// Interns already validated, sorted entries.
    pub(super) fn intern_bind_group_layout(
        &mut self,
        fns: &dyn DeviceFns,
        entries: Vec<BindGroupLayoutEntry>,
        counts: BindingCounts,
    ) -> Result<Arc<BindGroupLayout>, LayoutError> {
        if let Some(cached) = self.bind_group_layouts.get_mut(&entries) {
            if let Some(layout) = cached.layout.upgrade() {
                return Ok(layout);
            }
            let layout = Arc::new(BindGroupLayout::new(
                cached.id,
                entries,
                cached.counts,
                cached.handle,
            ));
            cached.layout = Arc::downgrade(&layout);
            return Ok(layout);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|e| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(e.binding)
                    .descriptor_type(e.ty.descriptor_type(e.has_dynamic_offset))
                    .descriptor_count(1)
                    .stage_flags(e.visibility.to_vk())
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let handle = fns.create_descriptor_set_layout(&info)?;

        let id = self.allocate_id();
        log::trace!(
            "created bind group layout {id} with {} entries ({handle:?})",
            entries.len()
        );
        let layout = Arc::new(BindGroupLayout::new(id, entries.clone(), counts, handle));
        self.bind_group_layouts.insert(
            entries,
            CachedBindGroupLayout {
                id,
                layout: Arc::downgrade(&layout),
                counts,
                handle,
            },
        );
        Ok(layout)
    }

    pub fn get_or_create_pipeline_layout(
        &mut self,
        fns: &dyn DeviceFns,
        bind_group_layouts: &[Arc<BindGroupLayout>],
    ) -> Result<Arc<PipelineLayout>, LayoutError> {
        validate_pipeline_layout(bind_group_layouts.iter().map(|l| *l.binding_counts()))?;

        let mut key: PipelineLayoutKey = [None; MAX_BIND_GROUPS];
        for (slot, layout) in key.iter_mut().zip(bind_group_layouts) {
            *slot = Some(layout.id());
        }

        if let Some(cached) = self.pipeline_layouts.get_mut(&key) {
            if let Some(layout) = cached.layout.upgrade() {
                return Ok(layout);
            }
            let layout = Arc::new(PipelineLayout::new(
                cached.id,
                bind_group_layouts,
                cached.handle,
            ));
            cached.layout = Arc::downgrade(&layout);
            return Ok(layout);
        }

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            bind_group_layouts.iter().map(|l| l.handle()).collect();
        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let handle = fns.create_pipeline_layout(&info)?;

        let id = self.allocate_id();
        log::trace!(
            "created pipeline layout {id} with {} groups ({handle:?})",
            bind_group_layouts.len()
        );
        let layout = Arc::new(PipelineLayout::new(id, bind_group_layouts, handle));
        self.pipeline_layouts.insert(
            key,
            CachedPipelineLayout {
                id,
                layout: Arc::downgrade(&layout),
                handle,
            },
        );
        Ok(layout)
    }

    /// Drops dead entries and schedules their native objects for destruction
    /// once `serial` completes. Returns how many entries were released.
    pub fn collect_unused(&mut self, deleter: &DeleterHandle, serial: u64) -> usize {
        let mut released = 0;
        self.pipeline_layouts.retain(|_, cached| {
            if cached.layout.strong_count() > 0 {
                return true;
            }
            deleter.pipeline_layout(serial, cached.handle);
            released += 1;
            false
        });
        self.bind_group_layouts.retain(|_, cached| {
            if cached.layout.strong_count() > 0 {
                return true;
            }
            deleter.descriptor_set_layout(serial, cached.handle);
            released += 1;
            false
        });
        if released > 0 {
            log::debug!("released {released} unused layouts at serial {serial}");
        }
        released
    }

    pub fn bind_group_layout_count(&self) -> usize {
        self.bind_group_layouts.len()
    }

    pub fn pipeline_layout_count(&self) -> usize {
        self.pipeline_layouts.len()
    }
}

pub(super) fn validate_pipeline_layout(
    groups: impl ExactSizeIterator<Item = BindingCounts>,
) -> Result<(), LayoutError> {
    if groups.len() > MAX_BIND_GROUPS {
        return Err(LayoutError::TooManyBindGroups {
            count: groups.len(),
            max: MAX_BIND_GROUPS,
        });
    }
    let mut total = BindingCounts::default();
    for counts in groups {
        total.accumulate(&counts);
    }
    total.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binding::{BindingType, ShaderStages},
        deleter::FencedDeleter,
        native::{Call, CaptureDevice},
    };

    fn uniform(binding: u32) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry::new(binding, ShaderStages::VERTEX, BindingType::UniformBuffer)
    }

    #[test]
    fn equal_entries_share_one_layout() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let a = cache
            .get_or_create_bind_group_layout(&device, &[uniform(1), uniform(0)])
            .unwrap();
        let b = cache
            .get_or_create_bind_group_layout(&device, &[uniform(0), uniform(1)])
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            device.count(|c| matches!(c, Call::CreateDescriptorSetLayout { .. })),
            1
        );

        let p1 = cache
            .get_or_create_pipeline_layout(&device, &[a.clone()])
            .unwrap();
        let p2 = cache.get_or_create_pipeline_layout(&device, &[b]).unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(p1.groups_inherit_up_to(&p2), 1);
    }

    #[test]
    fn dead_layouts_are_released_through_the_deleter() {
        let device = CaptureDevice::new();
        let mut deleter = FencedDeleter::new();
        let mut cache = LayoutCache::new();

        let bgl = cache
            .get_or_create_bind_group_layout(&device, &[uniform(0)])
            .unwrap();
        let layout = cache.get_or_create_pipeline_layout(&device, &[bgl]).unwrap();
        assert_eq!(cache.collect_unused(&deleter.handle(), 1), 0);

        drop(layout);
        assert_eq!(cache.collect_unused(&deleter.handle(), 1), 2);
        assert_eq!(cache.pipeline_layout_count(), 0);
        assert_eq!(deleter.tick(&device, 1), 2);
        assert_eq!(
            device.count(|c| matches!(c, Call::DestroyDescriptorSetLayout(_))),
            1
        );
    }

    #[test]
    fn dead_entries_are_revived_without_native_calls() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let first = cache
            .get_or_create_bind_group_layout(&device, &[uniform(0)])
            .unwrap();
        let (id, handle) = (first.id(), first.handle());
        drop(first);

        let again = cache
            .get_or_create_bind_group_layout(&device, &[uniform(0)])
            .unwrap();
        assert_eq!((again.id(), again.handle()), (id, handle));
        assert_eq!(device.calls().len(), 1);
    }

    #[test]
    fn too_many_groups_fail_before_any_native_call() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let bgl = cache
            .get_or_create_bind_group_layout(&device, &[uniform(0)])
            .unwrap();
        device.take_calls();

        let groups = vec![bgl; MAX_BIND_GROUPS + 1];
        assert!(matches!(
            cache.get_or_create_pipeline_layout(&device, &groups),
            Err(LayoutError::TooManyBindGroups { .. })
        ));
        assert!(device.calls().is_empty());
    }
}
