use std::{collections::HashMap, sync::Mutex};

use ash::{prelude::VkResult, vk};
use smallvec::SmallVec;

use crate::{config::MAX_COLOR_ATTACHMENTS, format::TextureFormat, native::DeviceFns};

use super::LoadOp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ColorKey {
    format: TextureFormat,
    load_op: LoadOp,
    has_resolve_target: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct DepthStencilKey {
    format: TextureFormat,
    depth_load_op: LoadOp,
    stencil_load_op: LoadOp,
}

/// Everything about a render pass that decides its native object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderPassCacheQuery {
    colors: SmallVec<[ColorKey; MAX_COLOR_ATTACHMENTS]>,
    depth_stencil: Option<DepthStencilKey>,
    sample_count: u32,
}

impl RenderPassCacheQuery {
    pub fn new(sample_count: u32) -> Self {
        Self {
            colors: SmallVec::new(),
            depth_stencil: None,
            sample_count,
        }
    }

    pub fn add_color(&mut self, format: TextureFormat, load_op: LoadOp, has_resolve_target: bool) {
        debug_assert!(self.colors.len() < MAX_COLOR_ATTACHMENTS);
        self.colors.push(ColorKey {
            format,
            load_op,
            has_resolve_target,
        });
    }

    pub fn set_depth_stencil(
        &mut self,
        format: TextureFormat,
        depth_load_op: LoadOp,
        stencil_load_op: LoadOp,
    ) {
        self.depth_stencil = Some(DepthStencilKey {
            format,
            depth_load_op,
            stencil_load_op,
        });
    }

    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.depth_stencil.is_some()
    }

    pub fn resolve_count(&self) -> usize {
        self.colors.iter().filter(|c| c.has_resolve_target).count()
    }
}

/// Native render passes interned by [`RenderPassCacheQuery`]. Entries live
/// until [`destroy`](Self::destroy); the cache can be shared between threads.
#[derive(Default)]
pub struct RenderPassCache {
    cache: Mutex<HashMap<RenderPassCacheQuery, vk::RenderPass>>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_render_pass(
        &self,
        fns: &dyn DeviceFns,
        query: &RenderPassCacheQuery,
    ) -> VkResult<vk::RenderPass> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(render_pass) = cache.get(query) {
            return Ok(*render_pass);
        }

        let render_pass = create_render_pass(fns, query)?;
        log::trace!(
            "render pass cache miss: created {render_pass:?} ({} colors, depth {}, {}x samples)",
            query.color_count(),
            query.has_depth_stencil(),
            query.sample_count
        );
        cache.insert(query.clone(), render_pass);
        Ok(render_pass)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroys every cached render pass. Only valid once the device is idle.
    pub fn destroy(&self, fns: &dyn DeviceFns) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        for (_, render_pass) in cache.drain() {
            fns.destroy_render_pass(render_pass);
        }
    }
}

/// Attachments are laid out colors first, then depth-stencil, then resolve
/// targets in color order.
fn create_render_pass(
    fns: &dyn DeviceFns,
    query: &RenderPassCacheQuery,
) -> VkResult<vk::RenderPass> {
    let samples = vk::SampleCountFlags::from_raw(query.sample_count);
    let mut attachments: SmallVec<[vk::AttachmentDescription; 2 * MAX_COLOR_ATTACHMENTS + 1]> =
        SmallVec::new();
    let mut color_refs: SmallVec<[vk::AttachmentReference; MAX_COLOR_ATTACHMENTS]> =
        SmallVec::new();

    for color in &query.colors {
        color_refs.push(
            vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
        attachments.push(
            vk::AttachmentDescription::default()
                .format(color.format.to_vk())
                .samples(samples)
                .load_op(color.load_op.to_vk())
                .store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
    }

    let depth_ref = query.depth_stencil.map(|ds| {
        let reference = vk::AttachmentReference::default()
            .attachment(attachments.len() as u32)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        attachments.push(
            vk::AttachmentDescription::default()
                .format(ds.format.to_vk())
                .samples(samples)
                .load_op(ds.depth_load_op.to_vk())
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(ds.stencil_load_op.to_vk())
                .stencil_store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        reference
    });

    let mut resolve_refs: SmallVec<[vk::AttachmentReference; MAX_COLOR_ATTACHMENTS]> =
        SmallVec::new();
    for color in &query.colors {
        if !color.has_resolve_target {
            resolve_refs.push(
                vk::AttachmentReference::default()
                    .attachment(vk::ATTACHMENT_UNUSED)
                    .layout(vk::ImageLayout::UNDEFINED),
            );
            continue;
        }
        resolve_refs.push(
            vk::AttachmentReference::default()
                .attachment(attachments.len() as u32)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
        attachments.push(
            vk::AttachmentDescription::default()
                .format(color.format.to_vk())
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
    }

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if query.resolve_count() > 0 {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    if let Some(depth_ref) = &depth_ref {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass));
    fns.create_render_pass(&info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{Call, CaptureDevice};

    fn query(load_op: LoadOp, resolve: bool) -> RenderPassCacheQuery {
        let mut query = RenderPassCacheQuery::new(if resolve { 4 } else { 1 });
        query.add_color(TextureFormat::Rgba8Unorm, load_op, resolve);
        query
    }

    #[test]
    fn identical_queries_share_one_render_pass() {
        let device = CaptureDevice::new();
        let cache = RenderPassCache::new();
        let a = cache.get_render_pass(&device, &query(LoadOp::Clear, false)).unwrap();
        let b = cache.get_render_pass(&device, &query(LoadOp::Clear, false)).unwrap();
        let c = cache.get_render_pass(&device, &query(LoadOp::Load, false)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            device.count(|c| matches!(c, Call::CreateRenderPass { .. })),
            2
        );
    }

    #[test]
    fn resolve_targets_follow_depth_stencil() {
        let device = CaptureDevice::new();
        let cache = RenderPassCache::new();
        let mut q = query(LoadOp::Clear, true);
        q.set_depth_stencil(TextureFormat::Depth24PlusStencil8, LoadOp::Load, LoadOp::Clear);
        cache.get_render_pass(&device, &q).unwrap();

        let calls = device.calls();
        let [Call::CreateRenderPass { attachments, color_count, has_resolve, has_depth_stencil, .. }] =
            &calls[..]
        else {
            panic!("expected one render pass creation, got {calls:?}");
        };
        assert_eq!(attachments.len(), 3);
        assert_eq!(*color_count, 1);
        assert!(*has_resolve && *has_depth_stencil);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT_S8_UINT);
        assert_eq!(attachments[1].stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let device = CaptureDevice::new();
        let cache = RenderPassCache::new();
        device.fail_object_creation(true);
        assert!(cache.get_render_pass(&device, &query(LoadOp::Clear, false)).is_err());
        assert!(cache.is_empty());

        device.fail_object_creation(false);
        assert!(cache.get_render_pass(&device, &query(LoadOp::Clear, false)).is_ok());
    }
}
