use ash::vk;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Aspect: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

impl Aspect {
    pub fn to_vk(self) -> vk::ImageAspectFlags {
        let mut flags = vk::ImageAspectFlags::empty();
        if self.contains(Aspect::COLOR) {
            flags |= vk::ImageAspectFlags::COLOR;
        }
        if self.contains(Aspect::DEPTH) {
            flags |= vk::ImageAspectFlags::DEPTH;
        }
        if self.contains(Aspect::STENCIL) {
            flags |= vk::ImageAspectFlags::STENCIL;
        }
        flags
    }

    /// Iterates the single-aspect masks contained in `self`.
    pub fn singles(self) -> impl Iterator<Item = Aspect> {
        [Aspect::COLOR, Aspect::DEPTH, Aspect::STENCIL]
            .into_iter()
            .filter(move |a| self.contains(*a))
    }
}

/// How the texel values of a format are interpreted, which decides how clear
/// colors are reinterpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Float,
    Uint,
    Sint,
    DepthComparison,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    R8Uint,
    R8Sint,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R32Float,
    R32Uint,
    R32Sint,
    Rgba16Float,
    Rgba32Float,
    Rgba32Uint,
    Rgba32Sint,
    Depth32Float,
    Depth24Plus,
    Depth24PlusStencil8,
    Bc1RgbaUnorm,
    Bc3RgbaUnorm,
    Bc7RgbaUnorm,
}

/// Size and footprint of one texel block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexelBlockInfo {
    pub byte_size: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureFormat {
    pub fn to_vk(self) -> vk::Format {
        match self {
            TextureFormat::R8Unorm => vk::Format::R8_UNORM,
            TextureFormat::R8Uint => vk::Format::R8_UINT,
            TextureFormat::R8Sint => vk::Format::R8_SINT,
            TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
            TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
            TextureFormat::Rgba8Uint => vk::Format::R8G8B8A8_UINT,
            TextureFormat::Rgba8Sint => vk::Format::R8G8B8A8_SINT,
            TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
            TextureFormat::R32Float => vk::Format::R32_SFLOAT,
            TextureFormat::R32Uint => vk::Format::R32_UINT,
            TextureFormat::R32Sint => vk::Format::R32_SINT,
            TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            TextureFormat::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
            TextureFormat::Rgba32Sint => vk::Format::R32G32B32A32_SINT,
            TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
            TextureFormat::Depth24Plus => vk::Format::D32_SFLOAT,
            TextureFormat::Depth24PlusStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
            TextureFormat::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
            TextureFormat::Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
            TextureFormat::Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
        }
    }

    pub fn aspects(self) -> Aspect {
        match self {
            TextureFormat::Depth32Float | TextureFormat::Depth24Plus => Aspect::DEPTH,
            TextureFormat::Depth24PlusStencil8 => Aspect::DEPTH | Aspect::STENCIL,
            _ => Aspect::COLOR,
        }
    }

    pub fn has_depth_or_stencil(self) -> bool {
        self.aspects().intersects(Aspect::DEPTH | Aspect::STENCIL)
    }

    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            TextureFormat::Bc1RgbaUnorm | TextureFormat::Bc3RgbaUnorm | TextureFormat::Bc7RgbaUnorm
        )
    }

    pub fn component_type(self) -> ComponentType {
        match self {
            TextureFormat::R8Uint
            | TextureFormat::Rgba8Uint
            | TextureFormat::R32Uint
            | TextureFormat::Rgba32Uint => ComponentType::Uint,
            TextureFormat::R8Sint
            | TextureFormat::Rgba8Sint
            | TextureFormat::R32Sint
            | TextureFormat::Rgba32Sint => ComponentType::Sint,
            TextureFormat::Depth32Float
            | TextureFormat::Depth24Plus
            | TextureFormat::Depth24PlusStencil8 => ComponentType::DepthComparison,
            _ => ComponentType::Float,
        }
    }

    /// Block layout of the given aspect. Stencil is always one byte per texel.
    pub fn block_info(self, aspect: Aspect) -> TexelBlockInfo {
        let texel = |byte_size| TexelBlockInfo {
            byte_size,
            width: 1,
            height: 1,
        };
        if aspect == Aspect::STENCIL {
            return texel(1);
        }
        match self {
            TextureFormat::R8Unorm | TextureFormat::R8Uint | TextureFormat::R8Sint => texel(1),
            TextureFormat::Rg8Unorm => texel(2),
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Rgba8Uint
            | TextureFormat::Rgba8Sint
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::R32Float
            | TextureFormat::R32Uint
            | TextureFormat::R32Sint
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Plus
            | TextureFormat::Depth24PlusStencil8 => texel(4),
            TextureFormat::Rgba16Float => texel(8),
            TextureFormat::Rgba32Float | TextureFormat::Rgba32Uint | TextureFormat::Rgba32Sint => {
                texel(16)
            }
            TextureFormat::Bc1RgbaUnorm => TexelBlockInfo {
                byte_size: 8,
                width: 4,
                height: 4,
            },
            TextureFormat::Bc3RgbaUnorm | TextureFormat::Bc7RgbaUnorm => TexelBlockInfo {
                byte_size: 16,
                width: 4,
                height: 4,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_stencil_formats_report_both_aspects() {
        let aspects = TextureFormat::Depth24PlusStencil8.aspects();
        assert_eq!(aspects, Aspect::DEPTH | Aspect::STENCIL);
        assert_eq!(aspects.singles().count(), 2);
        assert_eq!(
            aspects.to_vk(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn compressed_blocks_are_four_by_four() {
        let info = TextureFormat::Bc1RgbaUnorm.block_info(Aspect::COLOR);
        assert_eq!((info.width, info.height, info.byte_size), (4, 4, 8));
        assert!(TextureFormat::Bc1RgbaUnorm.is_compressed());
        assert!(!TextureFormat::Rgba8Unorm.is_compressed());
    }
}
