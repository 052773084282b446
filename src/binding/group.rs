use std::sync::Arc;

use ash::vk;

use crate::resource::{BufferId, TextureViewId};

use super::{BindGroupLayout, BindGroupLayoutEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingResource {
    Buffer {
        buffer: BufferId,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    TextureView(TextureViewId),
    Sampler(vk::Sampler),
}

/// A descriptor set written against one layout, plus what each binding points
/// at so the recorder can synchronize the resources behind it.
#[derive(Debug)]
pub struct BindGroup {
    layout: Arc<BindGroupLayout>,
    handle: vk::DescriptorSet,
    resources: Vec<BindingResource>,
}

impl BindGroup {
    /// `resources` are given in the order of the layout's entries.
    pub fn new(
        layout: Arc<BindGroupLayout>,
        handle: vk::DescriptorSet,
        resources: Vec<BindingResource>,
    ) -> Self {
        assert_eq!(
            layout.entries().len(),
            resources.len(),
            "bind group must provide one resource per layout entry"
        );
        Self {
            layout,
            handle,
            resources,
        }
    }

    #[inline]
    pub fn layout(&self) -> &Arc<BindGroupLayout> {
        &self.layout
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&BindGroupLayoutEntry, &BindingResource)> {
        self.layout.entries().iter().zip(self.resources.iter())
    }
}
