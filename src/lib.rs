//! Translation of recorded, pre-validated WebGPU-style command streams into
//! native Vulkan command buffers.
//!
//! The crate never owns the resources it records against. Buffers, textures and
//! views are registered in a [`resource::ResourceTable`] side table that carries
//! the tracking state (current usage, lazy-initialization state), and all native
//! calls go through the injected [`native::DeviceFns`] function table.

pub mod binding;
pub mod command;
pub mod config;
pub mod deleter;
pub mod error;
pub mod format;
pub mod layout;
pub mod native;
pub mod pipeline;
pub mod render_pass;
pub mod resource;
pub mod tracker;

pub use command::{CommandBuffer, Recorder, RecordingContext};
pub use config::{DeviceExtensions, Toggles};
pub use deleter::{DeleterHandle, FencedDeleter};
pub use error::LayoutError;
pub use layout::LayoutCache;
pub use native::DeviceFns;
pub use render_pass::RenderPassCache;
pub use resource::ResourceTable;
