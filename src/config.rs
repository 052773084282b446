pub const MAX_BIND_GROUPS: usize = 4;
pub const MAX_COLOR_ATTACHMENTS: usize = 8;
pub const MAX_VERTEX_BUFFERS: u32 = 16;

pub const MAX_DYNAMIC_UNIFORM_BUFFERS_PER_PIPELINE_LAYOUT: u32 = 8;
pub const MAX_DYNAMIC_STORAGE_BUFFERS_PER_PIPELINE_LAYOUT: u32 = 4;
pub const MAX_DYNAMIC_BUFFERS_PER_PIPELINE_LAYOUT: usize = (MAX_DYNAMIC_UNIFORM_BUFFERS_PER_PIPELINE_LAYOUT
    + MAX_DYNAMIC_STORAGE_BUFFERS_PER_PIPELINE_LAYOUT)
    as usize;

pub const MAX_SAMPLED_TEXTURES_PER_SHADER_STAGE: u32 = 16;
pub const MAX_SAMPLERS_PER_SHADER_STAGE: u32 = 16;
pub const MAX_STORAGE_BUFFERS_PER_SHADER_STAGE: u32 = 6;
pub const MAX_STORAGE_TEXTURES_PER_SHADER_STAGE: u32 = 4;
pub const MAX_UNIFORM_BUFFERS_PER_SHADER_STAGE: u32 = 12;

/// Behavior switches for the recorder. Both default to on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Toggles {
    pub lazy_clear_resource_on_first_use: bool,
    pub use_temporary_buffer_in_compressed_texture_to_texture_copy: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            lazy_clear_resource_on_first_use: true,
            use_temporary_buffer_in_compressed_texture_to_texture_copy: true,
        }
    }
}

impl Toggles {
    pub fn lazy_clear_resource_on_first_use(mut self, enabled: bool) -> Self {
        self.lazy_clear_resource_on_first_use = enabled;
        self
    }

    pub fn use_temporary_buffer_in_compressed_texture_to_texture_copy(
        mut self,
        enabled: bool,
    ) -> Self {
        self.use_temporary_buffer_in_compressed_texture_to_texture_copy = enabled;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceExtensions {
    pub debug_markers: bool,
}

impl DeviceExtensions {
    pub fn debug_markers(mut self, enabled: bool) -> Self {
        self.debug_markers = enabled;
        self
    }
}
