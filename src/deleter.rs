//! Fence-gated reclamation of native objects that in-flight command buffers may
//! still reference.
//!
//! Recorders push `(serial, destructor)` pairs through a [`DeleterHandle`]; the
//! owner of the queue drains them with [`FencedDeleter::tick`] once it knows the
//! GPU has finished every submission up to some serial.

use std::collections::VecDeque;

use ash::vk;
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::native::DeviceFns;

pub type Destructor = Box<dyn FnOnce(&dyn DeviceFns) + Send>;

struct PendingDeletion {
    serial: u64,
    destructor: Destructor,
}

#[derive(Clone)]
pub struct DeleterHandle {
    tx: Sender<PendingDeletion>,
}

impl DeleterHandle {
    pub fn delete_when_unused(
        &self,
        serial: u64,
        destructor: impl FnOnce(&dyn DeviceFns) + Send + 'static,
    ) {
        let pending = PendingDeletion {
            serial,
            destructor: Box::new(destructor),
        };
        if self.tx.send(pending).is_err() {
            log::warn!("fenced deleter is gone; leaking object scheduled for serial {serial}");
        }
    }

    pub fn framebuffer(&self, serial: u64, framebuffer: vk::Framebuffer) {
        self.delete_when_unused(serial, move |d| d.destroy_framebuffer(framebuffer));
    }

    pub fn buffer(&self, serial: u64, buffer: vk::Buffer) {
        self.delete_when_unused(serial, move |d| d.destroy_buffer(buffer));
    }

    pub fn render_pass(&self, serial: u64, render_pass: vk::RenderPass) {
        self.delete_when_unused(serial, move |d| d.destroy_render_pass(render_pass));
    }

    pub fn pipeline_layout(&self, serial: u64, layout: vk::PipelineLayout) {
        self.delete_when_unused(serial, move |d| d.destroy_pipeline_layout(layout));
    }

    pub fn descriptor_set_layout(&self, serial: u64, layout: vk::DescriptorSetLayout) {
        self.delete_when_unused(serial, move |d| d.destroy_descriptor_set_layout(layout));
    }
}

pub struct FencedDeleter {
    tx: Sender<PendingDeletion>,
    rx: Receiver<PendingDeletion>,
    pending: VecDeque<PendingDeletion>,
}

impl Default for FencedDeleter {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            pending: VecDeque::new(),
        }
    }
}

impl FencedDeleter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> DeleterHandle {
        DeleterHandle {
            tx: self.tx.clone(),
        }
    }

    /// Runs the destructor of every object whose serial has completed and
    /// returns how many ran.
    pub fn tick(&mut self, device: &dyn DeviceFns, completed_serial: u64) -> usize {
        self.pending.extend(self.rx.try_iter());

        let mut ran = 0;
        let mut still_pending = VecDeque::with_capacity(self.pending.len());
        for deletion in self.pending.drain(..) {
            if deletion.serial <= completed_serial {
                (deletion.destructor)(device);
                ran += 1;
            } else {
                still_pending.push_back(deletion);
            }
        }
        self.pending = still_pending;

        if ran > 0 {
            log::trace!("fenced deleter released {ran} objects up to serial {completed_serial}");
        }
        ran
    }

    /// Releases everything regardless of serial. Only valid once the device is idle.
    pub fn flush(&mut self, device: &dyn DeviceFns) -> usize {
        self.tick(device, u64::MAX)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len() + self.rx.len()
    }
}

impl Drop for FencedDeleter {
    fn drop(&mut self) {
        let leaked = self.pending_count();
        if leaked > 0 {
            log::warn!("fenced deleter dropped with {leaked} objects still pending");
        }
    }
}
