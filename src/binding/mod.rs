mod counts;
mod group;

use ash::vk;
use bitflags::bitflags;

use crate::{
    error::LayoutError,
    format::ComponentType,
};

pub use counts::BindingCounts;
pub use group::{BindGroup, BindingResource};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u8 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

impl ShaderStages {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        let mut flags = vk::ShaderStageFlags::empty();
        if self.contains(ShaderStages::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if self.contains(ShaderStages::FRAGMENT) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        if self.contains(ShaderStages::COMPUTE) {
            flags |= vk::ShaderStageFlags::COMPUTE;
        }
        flags
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer,
    ReadonlyStorageBuffer,
    Sampler,
    ComparisonSampler,
    SampledTexture,
    MultisampledTexture,
    ReadonlyStorageTexture,
    WriteonlyStorageTexture,
}

impl BindingType {
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            BindingType::UniformBuffer
                | BindingType::StorageBuffer
                | BindingType::ReadonlyStorageBuffer
        )
    }

    pub fn is_storage_texture(self) -> bool {
        matches!(
            self,
            BindingType::ReadonlyStorageTexture | BindingType::WriteonlyStorageTexture
        )
    }

    pub fn descriptor_type(self, has_dynamic_offset: bool) -> vk::DescriptorType {
        match self {
            BindingType::UniformBuffer if has_dynamic_offset => {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            }
            BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingType::StorageBuffer | BindingType::ReadonlyStorageBuffer
                if has_dynamic_offset =>
            {
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            }
            BindingType::StorageBuffer | BindingType::ReadonlyStorageBuffer => {
                vk::DescriptorType::STORAGE_BUFFER
            }
            BindingType::Sampler | BindingType::ComparisonSampler => vk::DescriptorType::SAMPLER,
            BindingType::SampledTexture | BindingType::MultisampledTexture => {
                vk::DescriptorType::SAMPLED_IMAGE
            }
            BindingType::ReadonlyStorageTexture | BindingType::WriteonlyStorageTexture => {
                vk::DescriptorType::STORAGE_IMAGE
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    D1,
    #[default]
    D2,
    D2Array,
    Cube,
    CubeArray,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub ty: BindingType,
    pub has_dynamic_offset: bool,
    pub view_dimension: ViewDimension,
    pub texture_component_type: ComponentType,
    pub min_buffer_binding_size: u64,
}

impl BindGroupLayoutEntry {
    pub fn new(binding: u32, visibility: ShaderStages, ty: BindingType) -> Self {
        Self {
            binding,
            visibility,
            ty,
            has_dynamic_offset: false,
            view_dimension: ViewDimension::D2,
            texture_component_type: ComponentType::Float,
            min_buffer_binding_size: 0,
        }
    }

    pub fn dynamic_offset(mut self, has_dynamic_offset: bool) -> Self {
        self.has_dynamic_offset = has_dynamic_offset;
        self
    }

    pub fn view_dimension(mut self, view_dimension: ViewDimension) -> Self {
        self.view_dimension = view_dimension;
        self
    }

    pub fn texture_component_type(mut self, component_type: ComponentType) -> Self {
        self.texture_component_type = component_type;
        self
    }

    pub fn min_buffer_binding_size(mut self, size: u64) -> Self {
        self.min_buffer_binding_size = size;
        self
    }

    /// Whether two entries for the same slot can be folded into one.
    /// Visibility and minimum binding size are merged, not compared.
    pub fn is_mergeable_with(&self, other: &Self) -> bool {
        self.binding == other.binding
            && self.ty == other.ty
            && self.has_dynamic_offset == other.has_dynamic_offset
            && self.view_dimension == other.view_dimension
            && self.texture_component_type == other.texture_component_type
    }

    pub fn merge(&mut self, other: &Self) -> bool {
        if !self.is_mergeable_with(other) {
            return false;
        }
        self.min_buffer_binding_size = self.min_buffer_binding_size.max(other.min_buffer_binding_size);
        self.visibility |= other.visibility;
        true
    }

    fn validate(&self) -> Result<(), LayoutError> {
        if self.has_dynamic_offset && !self.ty.is_buffer() {
            return Err(LayoutError::DynamicOffsetOnNonBuffer {
                binding: self.binding,
                ty: self.ty,
            });
        }

        let writable = matches!(
            self.ty,
            BindingType::StorageBuffer | BindingType::WriteonlyStorageTexture
        );
        if writable && self.visibility.contains(ShaderStages::VERTEX) {
            return Err(LayoutError::InvalidVisibility {
                binding: self.binding,
                ty: self.ty,
                stages: self.visibility,
            });
        }
        Ok(())
    }
}

/// Checks a bind group layout's entries on their own, before it is interned.
pub fn validate_entries(entries: &[BindGroupLayoutEntry]) -> Result<BindingCounts, LayoutError> {
    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    let mut counts = BindingCounts::default();
    for entry in entries {
        if !seen.insert(entry.binding) {
            return Err(LayoutError::DuplicateBindingNumber(entry.binding));
        }
        entry.validate()?;
        counts.add(entry);
    }
    counts.validate()?;
    Ok(counts)
}

/// An interned bind group layout. Created through
/// [`LayoutCache`](crate::layout::LayoutCache) only.
#[derive(Debug)]
pub struct BindGroupLayout {
    id: u64,
    entries: Vec<BindGroupLayoutEntry>,
    counts: BindingCounts,
    handle: vk::DescriptorSetLayout,
}

impl BindGroupLayout {
    pub(crate) fn new(
        id: u64,
        entries: Vec<BindGroupLayoutEntry>,
        counts: BindingCounts,
        handle: vk::DescriptorSetLayout,
    ) -> Self {
        Self {
            id,
            entries,
            counts,
            handle,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Entries sorted by binding number.
    #[inline]
    pub fn entries(&self) -> &[BindGroupLayoutEntry] {
        &self.entries
    }

    pub fn entry(&self, binding: u32) -> Option<&BindGroupLayoutEntry> {
        self.entries
            .binary_search_by_key(&binding, |e| e.binding)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn binding_counts(&self) -> &BindingCounts {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_takes_max_size_and_or_visibility() {
        let mut a = BindGroupLayoutEntry::new(0, ShaderStages::VERTEX, BindingType::UniformBuffer)
            .min_buffer_binding_size(16);
        let b = BindGroupLayoutEntry::new(0, ShaderStages::FRAGMENT, BindingType::UniformBuffer)
            .min_buffer_binding_size(64);
        assert!(a.merge(&b));
        assert_eq!(a.min_buffer_binding_size, 64);
        assert_eq!(a.visibility, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    }

    #[test]
    fn merge_rejects_different_view_dimension() {
        let mut a = BindGroupLayoutEntry::new(1, ShaderStages::FRAGMENT, BindingType::SampledTexture);
        let b = BindGroupLayoutEntry::new(1, ShaderStages::COMPUTE, BindingType::SampledTexture)
            .view_dimension(ViewDimension::Cube);
        let before = a;
        assert!(!a.merge(&b));
        assert_eq!(a, before);
    }

    #[test]
    fn writable_storage_is_not_vertex_visible() {
        let entries = [BindGroupLayoutEntry::new(
            0,
            ShaderStages::VERTEX,
            BindingType::StorageBuffer,
        )];
        assert!(matches!(
            validate_entries(&entries),
            Err(LayoutError::InvalidVisibility { binding: 0, .. })
        ));

        let entries = [
            BindGroupLayoutEntry::new(0, ShaderStages::FRAGMENT, BindingType::Sampler)
                .dynamic_offset(true),
        ];
        assert!(matches!(
            validate_entries(&entries),
            Err(LayoutError::DynamicOffsetOnNonBuffer { .. })
        ));
    }

    #[test]
    fn duplicate_binding_numbers_are_rejected() {
        let entries = [
            BindGroupLayoutEntry::new(2, ShaderStages::FRAGMENT, BindingType::Sampler),
            BindGroupLayoutEntry::new(2, ShaderStages::FRAGMENT, BindingType::SampledTexture),
        ];
        assert!(matches!(
            validate_entries(&entries),
            Err(LayoutError::DuplicateBindingNumber(2))
        ));
    }
}
