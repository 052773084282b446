use ash::vk;

use crate::{command::RecordingContext, native::DeviceFns};

use super::{
    BufferUsage,
    sync::{self, BarrierBatch, READ_ONLY_BUFFER_USAGES},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn size(mut self, size: vk::DeviceSize) -> Self {
        self.size = size;
        self
    }

    pub fn usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }
}

#[derive(Debug)]
pub struct BufferState {
    handle: vk::Buffer,
    desc: BufferDesc,
    last_usage: BufferUsage,
    initialized: bool,
}

impl BufferState {
    pub(crate) fn new(handle: vk::Buffer, desc: BufferDesc) -> Self {
        Self {
            handle,
            desc,
            last_usage: BufferUsage::empty(),
            initialized: false,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    #[inline]
    pub fn last_usage(&self) -> BufferUsage {
        self.last_usage
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Updates the tracked usage and adds the barrier needed to get there, if any.
    /// Returns whether a barrier was added.
    pub fn transition_and_get_barrier(
        &mut self,
        usage: BufferUsage,
        batch: &mut BarrierBatch,
    ) -> bool {
        let last = self.last_usage;
        let last_includes_target = last.contains(usage);
        let last_read_only = READ_ONLY_BUFFER_USAGES.contains(last);
        // Same-usage transitions never barrier, writable ones included: two
        // storage passes in a row are not ordered against each other.
        if last == usage || (last_includes_target && last_read_only) {
            return false;
        }

        self.last_usage = usage;

        // Nothing to wait on before the first use.
        if last.is_empty() {
            return false;
        }

        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(sync::buffer_access(last))
            .dst_access_mask(sync::buffer_access(usage))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.handle)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        batch.add_buffer(
            barrier,
            sync::buffer_stages(last),
            sync::buffer_stages(usage),
        );
        true
    }

    pub fn transition_usage_now(
        &mut self,
        fns: &dyn DeviceFns,
        ctx: &RecordingContext,
        usage: BufferUsage,
    ) {
        let mut batch = BarrierBatch::default();
        self.transition_and_get_barrier(usage, &mut batch);
        batch.emit(fns, ctx.command_buffer());
    }

    /// Zero-fills the whole buffer if it was never written.
    pub fn ensure_initialized(&mut self, fns: &dyn DeviceFns, ctx: &RecordingContext) {
        if self.initialized {
            return;
        }
        if !ctx.toggles().lazy_clear_resource_on_first_use {
            self.initialized = true;
            return;
        }

        log::debug!("lazily zero-filling buffer {:?}", self.handle);
        self.transition_usage_now(fns, ctx, BufferUsage::COPY_DST);
        fns.cmd_fill_buffer(ctx.command_buffer(), self.handle, 0, vk::WHOLE_SIZE, 0);
        self.initialized = true;
    }

    /// Like [`ensure_initialized`](Self::ensure_initialized) for a buffer about
    /// to be written at `offset..offset + size`. A write covering the whole
    /// buffer makes the fill unnecessary.
    pub fn ensure_initialized_as_destination(
        &mut self,
        fns: &dyn DeviceFns,
        ctx: &RecordingContext,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        if self.initialized {
            return;
        }
        if offset == 0 && size == self.desc.size {
            self.initialized = true;
        } else {
            self.ensure_initialized(fns, ctx);
        }
    }
}
