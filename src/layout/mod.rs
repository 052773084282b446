//! Interned bind group layouts and pipeline layouts, including the default
//! layout deduced from shader reflection.

mod cache;
mod deduce;

use std::sync::Arc;

use ash::vk;

use crate::{binding::BindGroupLayout, config::MAX_BIND_GROUPS};

pub use cache::LayoutCache;

/// One bit per bind group index.
pub type GroupMask = u32;

#[derive(Debug)]
pub struct PipelineLayout {
    id: u64,
    bind_group_layouts: [Option<Arc<BindGroupLayout>>; MAX_BIND_GROUPS],
    mask: GroupMask,
    handle: vk::PipelineLayout,
}

impl PipelineLayout {
    pub(crate) fn new(
        id: u64,
        layouts: &[Arc<BindGroupLayout>],
        handle: vk::PipelineLayout,
    ) -> Self {
        let mut bind_group_layouts: [Option<Arc<BindGroupLayout>>; MAX_BIND_GROUPS] =
            Default::default();
        let mut mask = 0;
        for (group, layout) in layouts.iter().enumerate() {
            bind_group_layouts[group] = Some(layout.clone());
            mask |= 1 << group;
        }
        Self {
            id,
            bind_group_layouts,
            mask,
            handle,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    #[inline]
    pub fn mask(&self) -> GroupMask {
        self.mask
    }

    pub fn bind_group_layout(&self, group: usize) -> Option<&Arc<BindGroupLayout>> {
        self.bind_group_layouts.get(group).and_then(Option::as_ref)
    }

    pub fn total_binding_count(&self) -> usize {
        self.bind_group_layouts
            .iter()
            .flatten()
            .map(|bgl| bgl.entries().len())
            .sum()
    }

    /// First group index at which bindings made for `other` stop being valid
    /// for `self`: the first unused slot or the first slot whose layout object
    /// differs.
    pub fn groups_inherit_up_to(&self, other: &PipelineLayout) -> usize {
        for group in 0..MAX_BIND_GROUPS {
            if self.mask & (1 << group) == 0 {
                return group;
            }
            let same = match (&self.bind_group_layouts[group], &other.bind_group_layouts[group]) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !same {
                return group;
            }
        }
        MAX_BIND_GROUPS
    }

    pub fn inherited_groups_mask(&self, other: &PipelineLayout) -> GroupMask {
        (1 << self.groups_inherit_up_to(other)) - 1
    }
}
