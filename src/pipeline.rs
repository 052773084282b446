//! Pipelines and the shader metadata default layouts are deduced from.
//!
//! Compiling shaders and creating the native pipelines happens elsewhere; these
//! types only carry the handles plus what the recorder needs to know about them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use ash::vk;

use crate::{
    binding::{BindingType, ShaderStages, ViewDimension},
    config::MAX_BIND_GROUPS,
    format::ComponentType,
    layout::PipelineLayout,
};

/// A binding as reflected from a shader entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderBindingInfo {
    pub ty: BindingType,
    pub view_dimension: ViewDimension,
    pub texture_component_type: ComponentType,
    pub min_buffer_binding_size: u64,
}

impl ShaderBindingInfo {
    pub fn new(ty: BindingType) -> Self {
        Self {
            ty,
            view_dimension: ViewDimension::D2,
            texture_component_type: ComponentType::Float,
            min_buffer_binding_size: 0,
        }
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
}

pub type GroupBindings = BTreeMap<u32, ShaderBindingInfo>;

#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub stage: ShaderStages,
    pub bindings: [GroupBindings; MAX_BIND_GROUPS],
}

impl EntryPoint {
    pub fn new(stage: ShaderStages) -> Self {
        debug_assert_eq!(stage.bits().count_ones(), 1, "entry points have one stage");
        Self {
            stage,
            bindings: Default::default(),
        }
    }

    pub fn binding(mut self, group: usize, binding: u32, info: ShaderBindingInfo) -> Self {
        self.bindings[group].insert(binding, info);
        self
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.iter().map(BTreeMap::len).sum()
    }
}

#[derive(Debug)]
pub struct ShaderModule {
    handle: vk::ShaderModule,
    entry_points: HashMap<String, EntryPoint>,
}

impl ShaderModule {
    pub fn new(handle: vk::ShaderModule) -> Self {
        Self {
            handle,
            entry_points: HashMap::new(),
        }
    }

    pub fn with_entry_point(mut self, name: impl Into<String>, entry_point: EntryPoint) -> Self {
        self.entry_points.insert(name.into(), entry_point);
        self
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.get(name)
    }
}

#[derive(Clone, Debug)]
pub struct StageDescriptor {
    pub module: Arc<ShaderModule>,
    pub entry_point: String,
}

impl StageDescriptor {
    pub fn new(module: Arc<ShaderModule>, entry_point: impl Into<String>) -> Self {
        Self {
            module,
            entry_point: entry_point.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        }
    }
}

#[derive(Debug)]
pub struct RenderPipeline {
    pub handle: vk::Pipeline,
    pub layout: Arc<PipelineLayout>,
    /// Index format used when `SetIndexBuffer` leaves it unspecified.
    pub index_format: Option<IndexFormat>,
}

impl RenderPipeline {
    pub fn new(handle: vk::Pipeline, layout: Arc<PipelineLayout>) -> Self {
        Self {
            handle,
            layout,
            index_format: None,
        }
    }

    pub fn index_format(mut self, index_format: IndexFormat) -> Self {
        self.index_format = Some(index_format);
        self
    }
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub handle: vk::Pipeline,
    pub layout: Arc<PipelineLayout>,
}

#[derive(Debug)]
pub struct QuerySet {
    pub handle: vk::QueryPool,
    pub count: u32,
}
