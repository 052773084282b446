//! Side table of per-resource tracking state.
//!
//! Buffers, textures and views are created and destroyed by their owner; the
//! table only learns about their native handles and descriptors and keeps the
//! state the recorder mutates (last usage, lazy-initialization state).

mod buffer;
pub mod sync;
mod texture;

use ash::vk;
use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};

pub use buffer::{BufferDesc, BufferState};
pub use sync::BarrierBatch;
pub use texture::{SubresourceRange, TextureDesc, TextureState, TextureView, TextureViewDesc};

new_key_type! { pub struct BufferId; }
new_key_type! { pub struct TextureId; }
new_key_type! { pub struct TextureViewId; }

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const STORAGE = 1 << 7;
        const INDIRECT = 1 << 8;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const OUTPUT_ATTACHMENT = 1 << 4;
        const PRESENT = 1 << 5;
    }
}

#[derive(Default)]
pub struct ResourceTable {
    buffers: SlotMap<BufferId, BufferState>,
    textures: SlotMap<TextureId, TextureState>,
    views: SlotMap<TextureViewId, TextureView>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_buffer(&mut self, handle: vk::Buffer, desc: BufferDesc) -> BufferId {
        let id = self.buffers.insert(BufferState::new(handle, desc));
        log::trace!("registered buffer {id:?} ({handle:?}, {} bytes)", desc.size);
        id
    }

    pub fn register_texture(&mut self, handle: vk::Image, desc: TextureDesc) -> TextureId {
        let id = self.textures.insert(TextureState::new(handle, desc));
        log::trace!("registered texture {id:?} ({handle:?}, {:?})", desc.format);
        id
    }

    /// Registers a view of an already registered texture.
    pub fn register_view(&mut self, handle: vk::ImageView, desc: TextureViewDesc) -> TextureViewId {
        assert!(
            self.textures.contains_key(desc.texture),
            "view registered for unknown texture {:?}",
            desc.texture
        );
        self.views.insert(TextureView { handle, desc })
    }

    pub fn unregister_buffer(&mut self, id: BufferId) -> Option<BufferState> {
        self.buffers.remove(id)
    }

    /// Drops the texture and every view that was registered for it.
    pub fn unregister_texture(&mut self, id: TextureId) -> Option<TextureState> {
        self.views.retain(|_, view| view.desc.texture != id);
        self.textures.remove(id)
    }

    pub fn unregister_view(&mut self, id: TextureViewId) -> Option<TextureView> {
        self.views.remove(id)
    }

    #[inline]
    pub fn buffer(&self, id: BufferId) -> &BufferState {
        self.buffers.get(id).expect("invalid BufferId")
    }

    #[inline]
    pub fn buffer_mut(&mut self, id: BufferId) -> &mut BufferState {
        self.buffers.get_mut(id).expect("invalid BufferId")
    }

    #[inline]
    pub fn texture(&self, id: TextureId) -> &TextureState {
        self.textures.get(id).expect("invalid TextureId")
    }

    #[inline]
    pub fn texture_mut(&mut self, id: TextureId) -> &mut TextureState {
        self.textures.get_mut(id).expect("invalid TextureId")
    }

    #[inline]
    pub fn view(&self, id: TextureViewId) -> &TextureView {
        self.views.get(id).expect("invalid TextureViewId")
    }

    /// Two distinct buffers, for copies between them.
    pub fn buffer_pair_mut(
        &mut self,
        a: BufferId,
        b: BufferId,
    ) -> (&mut BufferState, &mut BufferState) {
        let [a, b] = self
            .buffers
            .get_disjoint_mut([a, b])
            .expect("buffer pair must be two distinct live buffers");
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::format::TextureFormat;

    #[test]
    fn unregistering_a_texture_drops_its_views() {
        let mut table = ResourceTable::new();
        let texture = table.register_texture(
            vk::Image::from_raw(1),
            TextureDesc::default()
                .format(TextureFormat::Rgba8Unorm)
                .size(4, 4, 1),
        );
        let view = table.register_view(
            vk::ImageView::from_raw(2),
            TextureViewDesc::new(texture, TextureFormat::Rgba8Unorm),
        );
        assert_eq!(table.view(view).desc.texture, texture);

        assert!(table.unregister_texture(texture).is_some());
        assert!(table.unregister_view(view).is_none());
    }
}
