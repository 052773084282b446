use ash::vk;

use crate::binding::{BindingType, ShaderStages};

/// Errors raised while building bind-group or pipeline layouts.
///
/// Every variant is raised before any object is interned, so a failed
/// deduction leaves the layout cache untouched.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error(
        "duplicate binding (group {group}, binding {binding}) in default pipeline layout \
         initialization not compatible with previous declaration"
    )]
    IncompatibleDuplicateBinding { group: u32, binding: u32 },

    #[error("binding {0} declared more than once in bind group layout")]
    DuplicateBindingNumber(u32),

    #[error("binding {binding} of type {ty:?} cannot have a dynamic offset")]
    DynamicOffsetOnNonBuffer { binding: u32, ty: BindingType },

    #[error("binding {binding} of type {ty:?} cannot be visible to stages {stages:?}")]
    InvalidVisibility {
        binding: u32,
        ty: BindingType,
        stages: ShaderStages,
    },

    #[error("too many bind group layouts: {count} (max {max})")]
    TooManyBindGroups { count: usize, max: usize },

    #[error("too many {what} ({count}, max {max})")]
    BindingCountExceeded {
        what: &'static str,
        count: u32,
        max: u32,
    },

    #[error("entry point {0:?} not found in shader module")]
    MissingEntryPoint(String),

    #[error("default pipeline layout requires at least one stage")]
    NoStages,

    #[error("native layout creation failed: {0}")]
    Device(#[from] vk::Result),
}
