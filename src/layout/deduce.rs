use std::{
    collections::{BTreeMap, btree_map},
    sync::Arc,
};

use crate::{
    binding::{self, BindGroupLayoutEntry, BindingCounts},
    config::MAX_BIND_GROUPS,
    error::LayoutError,
    native::DeviceFns,
    pipeline::{EntryPoint, StageDescriptor},
};

use super::{LayoutCache, PipelineLayout, cache::validate_pipeline_layout};

type EntryMap = BTreeMap<u32, BindGroupLayoutEntry>;

impl LayoutCache {
    /// Deduces the layout of a pipeline created without one by merging the
    /// bindings every stage reflects.
    ///
    /// All merging and validation happens before anything is interned, so an
    /// error leaves the cache untouched.
    pub fn create_default_pipeline_layout(
        &mut self,
        fns: &dyn DeviceFns,
        stages: &[StageDescriptor],
    ) -> Result<Arc<PipelineLayout>, LayoutError> {
        #[cfg(feature = "tracing")]
        let _span = tracy_client::span!("create_default_pipeline_layout");

        if stages.is_empty() {
            return Err(LayoutError::NoStages);
        }

        let entry_points = stages
            .iter()
            .map(|stage| {
                stage
                    .module
                    .entry_point(&stage.entry_point)
                    .ok_or_else(|| LayoutError::MissingEntryPoint(stage.entry_point.clone()))
            })
            .collect::<Result<Vec<&EntryPoint>, _>>()?;

        let mut groups: [EntryMap; MAX_BIND_GROUPS] = Default::default();
        for entry_point in &entry_points {
            merge_entry_point(&mut groups, entry_point)?;
        }

        // No trailing empty groups; empty groups below the last used one stay.
        let group_count = groups
            .iter()
            .rposition(|entries| !entries.is_empty())
            .map_or(0, |last| last + 1);

        let mut validated: Vec<(Vec<BindGroupLayoutEntry>, BindingCounts)> =
            Vec::with_capacity(group_count);
        for entries in groups.into_iter().take(group_count) {
            let entries: Vec<BindGroupLayoutEntry> = entries.into_values().collect();
            let counts = binding::validate_entries(&entries)?;
            validated.push((entries, counts));
        }
        validate_pipeline_layout(validated.iter().map(|(_, counts)| *counts))?;

        let mut bind_group_layouts = Vec::with_capacity(group_count);
        for (entries, counts) in validated {
            bind_group_layouts.push(self.intern_bind_group_layout(fns, entries, counts)?);
        }
        let layout = self.get_or_create_pipeline_layout(fns, &bind_group_layouts)?;

        debug_assert!(
            entry_points
                .iter()
                .all(|entry_point| is_compatible(&layout, entry_point)),
            "deduced pipeline layout does not satisfy one of its stages"
        );
        log::debug!(
            "deduced pipeline layout {} from {} stages ({} groups)",
            layout.id(),
            stages.len(),
            group_count
        );
        Ok(layout)
    }
}

fn merge_entry_point(
    groups: &mut [EntryMap; MAX_BIND_GROUPS],
    entry_point: &EntryPoint,
) -> Result<(), LayoutError> {
    for (group, bindings) in entry_point.bindings.iter().enumerate() {
        for (&binding, info) in bindings {
            let entry = BindGroupLayoutEntry::new(binding, entry_point.stage, info.ty)
                .view_dimension(info.view_dimension)
                .texture_component_type(info.texture_component_type)
                .min_buffer_binding_size(info.min_buffer_binding_size);

            match groups[group].entry(binding) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                btree_map::Entry::Occupied(mut existing) => {
                    if !existing.get_mut().merge(&entry) {
                        return Err(LayoutError::IncompatibleDuplicateBinding {
                            group: group as u32,
                            binding,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Whether every binding the entry point uses is declared by `layout` with a
/// matching type and visible to the entry point's stage.
fn is_compatible(layout: &PipelineLayout, entry_point: &EntryPoint) -> bool {
    entry_point
        .bindings
        .iter()
        .enumerate()
        .all(|(group, bindings)| {
            bindings.iter().all(|(&binding, info)| {
                layout
                    .bind_group_layout(group)
                    .and_then(|bgl| bgl.entry(binding))
                    .is_some_and(|entry| {
                        entry.ty == info.ty
                            && entry.visibility.contains(entry_point.stage)
                            && entry.min_buffer_binding_size >= info.min_buffer_binding_size
                    })
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binding::{BindingType, ShaderStages, ViewDimension},
        native::{Call, CaptureDevice},
        pipeline::{ShaderBindingInfo, ShaderModule},
    };
    use ash::vk::{self, Handle};

    fn module(name: &str, entry_point: EntryPoint) -> Arc<ShaderModule> {
        Arc::new(ShaderModule::new(vk::ShaderModule::from_raw(1)).with_entry_point(name, entry_point))
    }

    #[test]
    fn shared_bindings_merge_across_stages() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let vs = module(
            "vs",
            EntryPoint::new(ShaderStages::VERTEX).binding(
                0,
                0,
                ShaderBindingInfo::new(BindingType::UniformBuffer).min_buffer_binding_size(16),
            ),
        );
        let fs = module(
            "fs",
            EntryPoint::new(ShaderStages::FRAGMENT).binding(
                0,
                0,
                ShaderBindingInfo::new(BindingType::UniformBuffer).min_buffer_binding_size(64),
            ),
        );

        let layout = cache
            .create_default_pipeline_layout(
                &device,
                &[StageDescriptor::new(vs, "vs"), StageDescriptor::new(fs, "fs")],
            )
            .unwrap();
        let entry = *layout.bind_group_layout(0).unwrap().entry(0).unwrap();
        assert_eq!(entry.min_buffer_binding_size, 64);
        assert_eq!(entry.visibility, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert!(!entry.has_dynamic_offset);
    }

    #[test]
    fn disjoint_stage_bindings_add_up() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let vs = module(
            "vs",
            EntryPoint::new(ShaderStages::VERTEX)
                .binding(0, 0, ShaderBindingInfo::new(BindingType::UniformBuffer))
                .binding(1, 0, ShaderBindingInfo::new(BindingType::ReadonlyStorageBuffer)),
        );
        let fs = module(
            "fs",
            EntryPoint::new(ShaderStages::FRAGMENT)
                .binding(0, 1, ShaderBindingInfo::new(BindingType::Sampler))
                .binding(0, 2, ShaderBindingInfo::new(BindingType::SampledTexture))
                .binding(2, 0, ShaderBindingInfo::new(BindingType::UniformBuffer)),
        );
        let vs_count = vs.entry_point("vs").unwrap().binding_count();
        let fs_count = fs.entry_point("fs").unwrap().binding_count();

        let layout = cache
            .create_default_pipeline_layout(
                &device,
                &[StageDescriptor::new(vs, "vs"), StageDescriptor::new(fs, "fs")],
            )
            .unwrap();
        assert_eq!((vs_count, fs_count), (2, 3));
        assert_eq!(layout.total_binding_count(), vs_count + fs_count);
        assert_eq!(layout.mask(), 0b111);
    }

    #[test]
    fn empty_groups_below_the_last_used_one_are_kept() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let cs = module(
            "main",
            EntryPoint::new(ShaderStages::COMPUTE)
                .binding(2, 0, ShaderBindingInfo::new(BindingType::StorageBuffer)),
        );

        let layout = cache
            .create_default_pipeline_layout(&device, &[StageDescriptor::new(cs, "main")])
            .unwrap();
        assert_eq!(layout.mask(), 0b111);
        assert!(layout.bind_group_layout(0).unwrap().is_empty());
        assert!(Arc::ptr_eq(
            layout.bind_group_layout(0).unwrap(),
            layout.bind_group_layout(1).unwrap()
        ));
        assert!(layout.bind_group_layout(3).is_none());
    }

    #[test]
    fn incompatible_stages_create_nothing() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let vs = module(
            "vs",
            EntryPoint::new(ShaderStages::VERTEX)
                .binding(0, 1, ShaderBindingInfo::new(BindingType::SampledTexture)),
        );
        let fs = module(
            "fs",
            EntryPoint::new(ShaderStages::FRAGMENT).binding(
                0,
                1,
                ShaderBindingInfo::new(BindingType::SampledTexture)
                    .view_dimension(ViewDimension::D2Array),
            ),
        );

        let result = cache.create_default_pipeline_layout(
            &device,
            &[StageDescriptor::new(vs, "vs"), StageDescriptor::new(fs, "fs")],
        );
        assert!(matches!(
            result,
            Err(LayoutError::IncompatibleDuplicateBinding { group: 0, binding: 1 })
        ));
        assert_eq!(cache.bind_group_layout_count(), 0);
        assert_eq!(cache.pipeline_layout_count(), 0);
        assert_eq!(device.count(|_| true), 0);
    }

    #[test]
    fn over_limit_deduction_fails_without_side_effects() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let mut entry_point = EntryPoint::new(ShaderStages::COMPUTE);
        for binding in 0..3 {
            for group in 0..3 {
                entry_point = entry_point.binding(
                    group,
                    binding,
                    ShaderBindingInfo::new(BindingType::StorageBuffer),
                );
            }
        }
        let cs = module("main", entry_point);

        let result =
            cache.create_default_pipeline_layout(&device, &[StageDescriptor::new(cs, "main")]);
        assert!(matches!(
            result,
            Err(LayoutError::BindingCountExceeded { count: 9, .. })
        ));
        assert!(device.calls().iter().all(|c| !matches!(c, Call::CreateDescriptorSetLayout { .. })));
    }

    #[test]
    fn unknown_entry_point_is_reported() {
        let device = CaptureDevice::new();
        let mut cache = LayoutCache::new();
        let vs = module("vs", EntryPoint::new(ShaderStages::VERTEX));
        assert!(matches!(
            cache.create_default_pipeline_layout(&device, &[StageDescriptor::new(vs, "main")]),
            Err(LayoutError::MissingEntryPoint(name)) if name == "main"
        ));
    }
}
