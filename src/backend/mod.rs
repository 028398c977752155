// Backend module - Vulkan bring-up and teardown
//
// Design: pure selection/negotiation logic over snapshots, one trait seam
// (`GraphicsApi`) for every native call, and an ash implementation of it.

pub mod api;
pub mod context;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod mock;

pub use api::GraphicsApi;
pub use context::{teardown, BuildStage, ContextBuilder, ContextSettings, GraphicsContext};
pub use shader::{ShaderBytecode, ShaderCompiler, ShaderStage};
pub use vulkan::VulkanApi;
