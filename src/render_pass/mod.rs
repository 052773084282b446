mod cache;

use ash::vk;

use crate::format::{ComponentType, TextureFormat};

pub use cache::{RenderPassCache, RenderPassCacheQuery};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Clear,
    Load,
}

impl LoadOp {
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        }
    }
}

/// What happens to an attachment's contents at the end of a pass. `Clear`
/// discards them, leaving the subresource uninitialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    Clear,
}

/// Reinterprets an API clear color for an attachment of `format`: integer
/// formats get the numeric value converted, not the float bits.
pub fn color_clear_value(format: TextureFormat, color: [f64; 4]) -> vk::ClearValue {
    let color = match format.component_type() {
        ComponentType::Uint => vk::ClearColorValue {
            uint32: color.map(|c| c as u32),
        },
        ComponentType::Sint => vk::ClearColorValue {
            int32: color.map(|c| c as i32),
        },
        ComponentType::Float | ComponentType::DepthComparison => vk::ClearColorValue {
            float32: color.map(|c| c as f32),
        },
    };
    vk::ClearValue { color }
}

/// Starts from a zeroed value so the words past the depth-stencil pair are
/// initialized too.
pub fn depth_stencil_clear_value(depth: f32, stencil: u32) -> vk::ClearValue {
    let mut value = vk::ClearValue::default();
    value.depth_stencil = vk::ClearDepthStencilValue { depth, stencil };
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_clear_colors_are_converted_not_bitcast() {
        let value = color_clear_value(TextureFormat::Rgba8Uint, [1.0, 2.0, 3.0, 255.0]);
        assert_eq!(unsafe { value.color.uint32 }, [1, 2, 3, 255]);

        let value = color_clear_value(TextureFormat::R32Sint, [-4.0, 0.0, 0.0, 0.0]);
        assert_eq!(unsafe { value.color.int32 }[0], -4);

        let value = color_clear_value(TextureFormat::Rgba8Unorm, [0.5, 0.0, 0.0, 1.0]);
        assert_eq!(unsafe { value.color.float32 }, [0.5, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn depth_stencil_clear_values_are_zero_padded() {
        let value = depth_stencil_clear_value(1.0, 7);
        assert_eq!(unsafe { value.color.uint32 }, [1.0f32.to_bits(), 7, 0, 0]);
    }
}
