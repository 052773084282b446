use ash::vk;

use crate::{config::Toggles, deleter::DeleterHandle};

/// The native command buffer a recording writes into, along with what the
/// recording needs to schedule deferred deletions.
///
/// A context that saw a recording error is poisoned: its command buffer holds a
/// partial recording and is never handed out for submission.
pub struct RecordingContext {
    command_buffer: vk::CommandBuffer,
    pending_serial: u64,
    deleter: DeleterHandle,
    toggles: Toggles,
    poisoned: bool,
}

impl RecordingContext {
    pub fn new(
        command_buffer: vk::CommandBuffer,
        pending_serial: u64,
        deleter: DeleterHandle,
        toggles: Toggles,
    ) -> Self {
        Self {
            command_buffer,
            pending_serial,
            deleter,
            toggles,
            poisoned: false,
        }
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Serial of the submission this command buffer will be part of.
    #[inline]
    pub fn pending_serial(&self) -> u64 {
        self.pending_serial
    }

    #[inline]
    pub fn deleter(&self) -> &DeleterHandle {
        &self.deleter
    }

    #[inline]
    pub fn toggles(&self) -> &Toggles {
        &self.toggles
    }

    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn into_submittable(self) -> anyhow::Result<vk::CommandBuffer> {
        if self.poisoned {
            anyhow::bail!(
                "command buffer {:?} holds a partial recording and cannot be submitted",
                self.command_buffer
            );
        }
        Ok(self.command_buffer)
    }
}
