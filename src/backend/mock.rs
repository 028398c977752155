// Recording GraphicsApi for unit tests (no GPU required)
//
// Hands out fake sequential handles, records every create/destroy call, and
// can be told to fail on the n-th creation of a given resource kind.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use std::collections::HashMap;

use super::api::{DeviceDesc, GraphicsApi, GraphicsPipelineDesc, InstanceDesc, SwapchainDesc};
use super::device::{PhysicalDeviceCandidate, QueueFamilySnapshot};
use super::shader::{ShaderBytecode, ShaderStage};
use super::swapchain::{SwapchainSupport, PREFERRED_FORMAT, UNDEFINED_EXTENT};
use crate::error::{GfxError, Result};
use crate::window::WindowTarget;

pub const SURFACE_EXTENSIONS: [&str; 2] = ["VK_KHR_surface", "VK_KHR_xlib_surface"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageView,
    RenderPass,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    CommandPool,
    /// Failure points only: queried or allocated, never destroyed directly
    SwapchainImages,
    CommandBuffers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Create(Resource, u64),
    Destroy(Resource, u64),
    AllocateCommandBuffers(u32),
    WaitIdle,
}

/// Window stand-in with no native handles
pub struct MockWindow {
    pub size: vk::Extent2D,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: vk::Extent2D { width, height },
        }
    }
}

impl HasWindowHandle for MockWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasDisplayHandle for MockWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl WindowTarget for MockWindow {
    fn framebuffer_size(&self) -> vk::Extent2D {
        self.size
    }
}

pub struct MockApi {
    pub calls: Vec<Call>,
    pub candidates: Vec<PhysicalDeviceCandidate>,
    pub layers: Vec<String>,
    pub instance_extensions: Vec<String>,
    pub swapchain_image_count: usize,
    /// Fail the n-th (0-based) creation of this resource kind
    pub fail_on: Option<(Resource, usize)>,
    pub instance_desc: Option<InstanceDesc>,
    pub device_desc: Option<DeviceDesc>,
    pub swapchain_desc: Option<SwapchainDesc>,
    attempts: HashMap<Resource, usize>,
    next_handle: u64,
}

impl Default for MockApi {
    fn default() -> Self {
        let mut instance_extensions: Vec<String> =
            SURFACE_EXTENSIONS.iter().map(|s| s.to_string()).collect();
        instance_extensions.push("VK_EXT_debug_utils".to_string());

        Self {
            calls: Vec::new(),
            candidates: vec![discrete_gpu("Mock GPU")],
            layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            instance_extensions,
            swapchain_image_count: 3,
            fail_on: None,
            instance_desc: None,
            device_desc: None,
            swapchain_desc: None,
            attempts: HashMap::new(),
            next_handle: 0,
        }
    }
}

impl MockApi {
    pub fn failing_on(resource: Resource) -> Self {
        Self::failing_on_nth(resource, 0)
    }

    pub fn failing_on_nth(resource: Resource, index: usize) -> Self {
        Self::default().fail_at(resource, index)
    }

    pub fn fail_at(mut self, resource: Resource, index: usize) -> Self {
        self.fail_on = Some((resource, index));
        self
    }

    pub fn with_layers(mut self, layers: &[&str]) -> Self {
        self.layers = layers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_instance_extensions(mut self, extensions: &[&str]) -> Self {
        self.instance_extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<PhysicalDeviceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn creates(&self) -> Vec<(Resource, u64)> {
        self.calls
            .iter()
            .filter_map(|call| match *call {
                Call::Create(kind, raw) => Some((kind, raw)),
                _ => None,
            })
            .collect()
    }

    pub fn destroys(&self) -> Vec<(Resource, u64)> {
        self.calls
            .iter()
            .filter_map(|call| match *call {
                Call::Destroy(kind, raw) => Some((kind, raw)),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed_kinds(&self) -> Vec<Resource> {
        self.destroys().into_iter().map(|(kind, _)| kind).collect()
    }

    pub fn count_created(&self, kind: Resource) -> usize {
        self.creates().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Count one attempt at `kind` and fail it if it is the injected one
    fn attempt(&mut self, kind: Resource) -> VkResult<()> {
        let nth = self.attempts.entry(kind).or_insert(0);
        let index = *nth;
        *nth += 1;

        if self.fail_on == Some((kind, index)) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        Ok(())
    }

    fn create(&mut self, kind: Resource) -> VkResult<u64> {
        self.attempt(kind)?;

        self.next_handle += 1;
        let raw = self.next_handle;
        self.calls.push(Call::Create(kind, raw));
        Ok(raw)
    }

    fn destroy<H: Handle>(&mut self, kind: Resource, handle: H) {
        self.calls.push(Call::Destroy(kind, handle.as_raw()));
    }
}

/// A discrete GPU with one family doing everything
pub fn discrete_gpu(name: &str) -> PhysicalDeviceCandidate {
    PhysicalDeviceCandidate {
        handle: vk::PhysicalDevice::from_raw(0xD15C),
        name: name.to_string(),
        device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
        api_version: vk::API_VERSION_1_3,
        max_image_dimension_2d: 16384,
        geometry_shader: true,
        extensions: vec!["VK_KHR_swapchain".to_string()],
        queue_families: vec![QueueFamilySnapshot {
            flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            queue_count: 16,
            present_supported: true,
        }],
        swapchain_support: Some(SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: UNDEFINED_EXTENT,
                    height: UNDEFINED_EXTENT,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                ..Default::default()
            },
            formats: vec![PREFERRED_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }),
    }
}

pub fn shader(stage: ShaderStage, name: &str) -> ShaderBytecode {
    ShaderBytecode {
        stage,
        name: name.to_string(),
        words: vec![0x0723_0203, 0x0001_0000],
    }
}

pub fn triangle_shaders() -> Vec<ShaderBytecode> {
    vec![
        shader(ShaderStage::Vertex, "triangle"),
        shader(ShaderStage::Fragment, "triangle"),
    ]
}

impl GraphicsApi for MockApi {
    fn available_layers(&mut self) -> VkResult<Vec<String>> {
        Ok(self.layers.clone())
    }

    fn available_instance_extensions(&mut self) -> VkResult<Vec<String>> {
        Ok(self.instance_extensions.clone())
    }

    fn surface_extensions(&mut self, _window: &dyn WindowTarget) -> Result<Vec<String>> {
        Ok(SURFACE_EXTENSIONS.iter().map(|s| s.to_string()).collect())
    }

    fn create_instance(&mut self, desc: &InstanceDesc) -> VkResult<vk::Instance> {
        self.instance_desc = Some(desc.clone());
        self.create(Resource::Instance).map(vk::Instance::from_raw)
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        self.destroy(Resource::Instance, instance);
    }

    fn create_debug_messenger(&mut self, _instance: vk::Instance) -> VkResult<vk::DebugUtilsMessengerEXT> {
        self.create(Resource::DebugMessenger)
            .map(vk::DebugUtilsMessengerEXT::from_raw)
    }

    fn destroy_debug_messenger(&mut self, _instance: vk::Instance, messenger: vk::DebugUtilsMessengerEXT) {
        self.destroy(Resource::DebugMessenger, messenger);
    }

    fn create_surface(&mut self, _instance: vk::Instance, _window: &dyn WindowTarget) -> Result<vk::SurfaceKHR> {
        self.create(Resource::Surface)
            .map(vk::SurfaceKHR::from_raw)
            .map_err(|e| GfxError::SurfaceCreationFailed(e.to_string()))
    }

    fn destroy_surface(&mut self, _instance: vk::Instance, surface: vk::SurfaceKHR) {
        self.destroy(Resource::Surface, surface);
    }

    fn enumerate_physical_devices(
        &mut self,
        _instance: vk::Instance,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<PhysicalDeviceCandidate>> {
        Ok(self.candidates.clone())
    }

    fn create_device(&mut self, _physical_device: vk::PhysicalDevice, desc: &DeviceDesc) -> VkResult<vk::Device> {
        self.device_desc = Some(desc.clone());
        self.create(Resource::Device).map(vk::Device::from_raw)
    }

    fn destroy_device(&mut self, device: vk::Device) {
        self.destroy(Resource::Device, device);
    }

    fn device_queue(&mut self, _device: vk::Device, family: u32) -> vk::Queue {
        vk::Queue::from_raw(0x1000 + u64::from(family))
    }

    fn device_wait_idle(&mut self, _device: vk::Device) -> VkResult<()> {
        self.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&mut self, _device: vk::Device, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        self.swapchain_desc = Some(*desc);
        self.create(Resource::Swapchain).map(vk::SwapchainKHR::from_raw)
    }

    fn swapchain_images(&mut self, _device: vk::Device, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.attempt(Resource::SwapchainImages)?;
        Ok((0..self.swapchain_image_count)
            .map(|i| vk::Image::from_raw(0x2000 + i as u64))
            .collect())
    }

    fn destroy_swapchain(&mut self, _device: vk::Device, swapchain: vk::SwapchainKHR) {
        self.destroy(Resource::Swapchain, swapchain);
    }

    fn create_image_view(&mut self, _device: vk::Device, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        self.create(Resource::ImageView).map(vk::ImageView::from_raw)
    }

    fn destroy_image_view(&mut self, _device: vk::Device, view: vk::ImageView) {
        self.destroy(Resource::ImageView, view);
    }

    fn create_render_pass(&mut self, _device: vk::Device, _format: vk::Format) -> VkResult<vk::RenderPass> {
        self.create(Resource::RenderPass).map(vk::RenderPass::from_raw)
    }

    fn destroy_render_pass(&mut self, _device: vk::Device, render_pass: vk::RenderPass) {
        self.destroy(Resource::RenderPass, render_pass);
    }

    fn create_pipeline_layout(&mut self, _device: vk::Device) -> VkResult<vk::PipelineLayout> {
        self.create(Resource::PipelineLayout).map(vk::PipelineLayout::from_raw)
    }

    fn destroy_pipeline_layout(&mut self, _device: vk::Device, layout: vk::PipelineLayout) {
        self.destroy(Resource::PipelineLayout, layout);
    }

    fn create_graphics_pipeline(&mut self, _device: vk::Device, _desc: &GraphicsPipelineDesc<'_>) -> VkResult<vk::Pipeline> {
        self.create(Resource::Pipeline).map(vk::Pipeline::from_raw)
    }

    fn create_compute_pipeline(
        &mut self,
        _device: vk::Device,
        _layout: vk::PipelineLayout,
        _shader: &ShaderBytecode,
    ) -> VkResult<vk::Pipeline> {
        self.create(Resource::Pipeline).map(vk::Pipeline::from_raw)
    }

    fn destroy_pipeline(&mut self, _device: vk::Device, pipeline: vk::Pipeline) {
        self.destroy(Resource::Pipeline, pipeline);
    }

    fn create_framebuffer(
        &mut self,
        _device: vk::Device,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        self.create(Resource::Framebuffer).map(vk::Framebuffer::from_raw)
    }

    fn destroy_framebuffer(&mut self, _device: vk::Device, framebuffer: vk::Framebuffer) {
        self.destroy(Resource::Framebuffer, framebuffer);
    }

    fn create_command_pool(&mut self, _device: vk::Device, _queue_family: u32) -> VkResult<vk::CommandPool> {
        self.create(Resource::CommandPool).map(vk::CommandPool::from_raw)
    }

    fn allocate_command_buffers(
        &mut self,
        _device: vk::Device,
        _pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.attempt(Resource::CommandBuffers)?;
        self.calls.push(Call::AllocateCommandBuffers(count));
        Ok((0..count)
            .map(|i| vk::CommandBuffer::from_raw(0x3000 + u64::from(i)))
            .collect())
    }

    fn destroy_command_pool(&mut self, _device: vk::Device, pool: vk::CommandPool) {
        self.destroy(Resource::CommandPool, pool);
    }
}
