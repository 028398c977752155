// Graphics API seam
//
// Every native call made during bring-up and teardown goes through this
// trait. Handles are plain `ash::vk` handles; the implementation owns the
// function tables (instance/device loaders) behind them.

use ash::prelude::VkResult;
use ash::vk;

use super::device::{PhysicalDeviceCandidate, ResolvedQueueFamilies};
use super::shader::ShaderBytecode;
use super::swapchain::SwapchainConfig;
use crate::error::Result;
use crate::window::WindowTarget;

/// Instance creation parameters
#[derive(Debug, Clone, Default)]
pub struct InstanceDesc {
    pub app_name: String,
    pub engine_name: String,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
}

/// Logical device creation parameters
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub queue_families: Vec<u32>,
    pub extensions: Vec<String>,
    pub geometry_shader: bool,
}

/// Swapchain creation parameters
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub config: SwapchainConfig,
    pub queue_families: ResolvedQueueFamilies,
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub vertex: &'a ShaderBytecode,
    pub fragment: &'a ShaderBytecode,
}

/// Native calls used by the context builder and teardown sequencer
pub trait GraphicsApi {
    fn available_layers(&mut self) -> VkResult<Vec<String>>;
    fn available_instance_extensions(&mut self) -> VkResult<Vec<String>>;
    /// Instance extensions the window system needs for presentation
    fn surface_extensions(&mut self, window: &dyn WindowTarget) -> Result<Vec<String>>;

    fn create_instance(&mut self, desc: &InstanceDesc) -> VkResult<vk::Instance>;
    fn destroy_instance(&mut self, instance: vk::Instance);

    fn create_debug_messenger(&mut self, instance: vk::Instance) -> VkResult<vk::DebugUtilsMessengerEXT>;
    fn destroy_debug_messenger(&mut self, instance: vk::Instance, messenger: vk::DebugUtilsMessengerEXT);

    fn create_surface(&mut self, instance: vk::Instance, window: &dyn WindowTarget) -> Result<vk::SurfaceKHR>;
    fn destroy_surface(&mut self, instance: vk::Instance, surface: vk::SurfaceKHR);

    /// Snapshot every physical device, including support for `surface`
    fn enumerate_physical_devices(
        &mut self,
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<PhysicalDeviceCandidate>>;

    fn create_device(&mut self, physical_device: vk::PhysicalDevice, desc: &DeviceDesc) -> VkResult<vk::Device>;
    fn destroy_device(&mut self, device: vk::Device);
    fn device_queue(&mut self, device: vk::Device, family: u32) -> vk::Queue;
    fn device_wait_idle(&mut self, device: vk::Device) -> VkResult<()>;

    fn create_swapchain(&mut self, device: vk::Device, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR);

    fn create_image_view(&mut self, device: vk::Device, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&mut self, device: vk::Device, view: vk::ImageView);

    fn create_render_pass(&mut self, device: vk::Device, format: vk::Format) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&mut self, device: vk::Device, render_pass: vk::RenderPass);

    fn create_pipeline_layout(&mut self, device: vk::Device) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, device: vk::Device, layout: vk::PipelineLayout);

    fn create_graphics_pipeline(&mut self, device: vk::Device, desc: &GraphicsPipelineDesc<'_>) -> VkResult<vk::Pipeline>;
    fn create_compute_pipeline(
        &mut self,
        device: vk::Device,
        layout: vk::PipelineLayout,
        shader: &ShaderBytecode,
    ) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&mut self, device: vk::Device, pipeline: vk::Pipeline);

    fn create_framebuffer(
        &mut self,
        device: vk::Device,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, device: vk::Device, framebuffer: vk::Framebuffer);

    fn create_command_pool(&mut self, device: vk::Device, queue_family: u32) -> VkResult<vk::CommandPool>;
    fn allocate_command_buffers(
        &mut self,
        device: vk::Device,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    /// Also frees every command buffer allocated from `pool`
    fn destroy_command_pool(&mut self, device: vk::Device, pool: vk::CommandPool);
}
