// Graphics context bring-up and teardown
//
// Construction walks a fixed, linear sequence of stages. Each stage records
// its handles on the context as soon as they exist, so a failure part-way
// through leaves a context that `teardown` can still destroy safely.
//
// Teardown mirrors construction exactly: the last handle created is the
// first one destroyed.

use ash::vk;
use std::collections::HashSet;

use super::api::{DeviceDesc, GraphicsApi, GraphicsPipelineDesc, InstanceDesc, SwapchainDesc};
use super::device::{select_physical_device, DeviceRequirements, ResolvedQueueFamilies};
use super::shader::{ShaderBytecode, ShaderStage};
use super::swapchain::{negotiate, SwapchainConfig, SwapchainSupport};
use crate::config::Config;
use crate::error::{BuildError, GfxError, Result};
use crate::window::WindowTarget;

/// Instance extension needed for the debug messenger
pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";

/// Bring-up stages, in the only order they can be reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildStage {
    #[default]
    Uninitialized,
    InstanceCreated,
    DebugMessengerAttached,
    SurfaceCreated,
    PhysicalDeviceSelected,
    LogicalDeviceCreated,
    SwapchainCreated,
    ImageViewsCreated,
    RenderPassCreated,
    PipelineCreated,
    FramebuffersCreated,
    CommandPoolCreated,
    CommandBufferAllocated,
    Ready,
}

/// The physical device chosen for this context (not owned)
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: ResolvedQueueFamilies,
    pub swapchain_support: SwapchainSupport,
}

/// Every handle acquired during bring-up
#[derive(Debug, Default)]
pub struct GraphicsContext {
    stage: BuildStage,
    pub instance: Option<vk::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub surface: Option<vk::SurfaceKHR>,
    pub physical_device: Option<SelectedDevice>,
    pub device: Option<vk::Device>,
    /// May be the same queue as `present_queue`
    pub graphics_queue: Option<vk::Queue>,
    pub present_queue: Option<vk::Queue>,
    pub swapchain: Option<vk::SwapchainKHR>,
    pub swapchain_config: Option<SwapchainConfig>,
    /// Owned by the swapchain, never destroyed directly
    pub swapchain_images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: Option<vk::RenderPass>,
    pub pipeline_layout: Option<vk::PipelineLayout>,
    pub pipelines: Vec<vk::Pipeline>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_pool: Option<vk::CommandPool>,
    /// Freed together with `command_pool`
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl GraphicsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last stage successfully reached
    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    pub fn is_ready(&self) -> bool {
        self.stage == BuildStage::Ready
    }
}

/// Everything the builder needs from configuration
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub app_name: String,
    pub engine_name: String,
    pub validation: bool,
    pub validation_layers: Vec<String>,
    pub instance_extensions: Vec<String>,
    pub device_requirements: DeviceRequirements,
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl ContextSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_name: config.app.name.clone(),
            engine_name: config.app.engine_name.clone(),
            validation: config.validation_enabled(),
            validation_layers: config.debug.validation_layers.clone(),
            instance_extensions: config.graphics.instance_extensions.clone(),
            device_requirements: DeviceRequirements {
                geometry_shader: config.graphics.require_geometry_shader,
                extensions: config.graphics.device_extensions.clone(),
            },
            preferred_present_mode: config.present_mode(),
        }
    }
}

/// Drives the bring-up sequence against a `GraphicsApi`
pub struct ContextBuilder<'a> {
    settings: &'a ContextSettings,
    shaders: &'a [ShaderBytecode],
}

impl<'a> ContextBuilder<'a> {
    pub fn new(settings: &'a ContextSettings, shaders: &'a [ShaderBytecode]) -> Self {
        Self { settings, shaders }
    }

    /// Bring `ctx` from `Uninitialized` to `Ready`.
    ///
    /// On failure the handles created so far stay on `ctx`; pass it to
    /// [`teardown`] before dropping it or building again.
    ///
    /// A context that is not `Uninitialized` is refused without any native
    /// call: the error carries the stage the context is already at and
    /// `ApiCallFailed(ERROR_INITIALIZATION_FAILED)`, and `ctx` is untouched.
    pub fn build<A: GraphicsApi>(
        &self,
        api: &mut A,
        window: &dyn WindowTarget,
        ctx: &mut GraphicsContext,
    ) -> Result<(), BuildError> {
        if ctx.stage != BuildStage::Uninitialized {
            log::error!("Context is at {:?}; tear it down before rebuilding", ctx.stage);
            return Err(BuildError::new(ctx.stage, vk::Result::ERROR_INITIALIZATION_FAILED));
        }

        log::info!("Initializing Vulkan...");

        transition(ctx, BuildStage::InstanceCreated, |ctx| {
            self.create_instance(api, window, ctx)
        })?;
        if self.settings.validation {
            transition(ctx, BuildStage::DebugMessengerAttached, |ctx| {
                Self::attach_debug_messenger(api, ctx)
            })?;
        }
        transition(ctx, BuildStage::SurfaceCreated, |ctx| {
            Self::create_surface(api, window, ctx)
        })?;
        transition(ctx, BuildStage::PhysicalDeviceSelected, |ctx| {
            self.select_physical_device(api, ctx)
        })?;
        transition(ctx, BuildStage::LogicalDeviceCreated, |ctx| {
            self.create_logical_device(api, ctx)
        })?;
        transition(ctx, BuildStage::SwapchainCreated, |ctx| {
            self.create_swapchain(api, window, ctx)
        })?;
        transition(ctx, BuildStage::ImageViewsCreated, |ctx| {
            Self::create_image_views(api, ctx)
        })?;
        transition(ctx, BuildStage::RenderPassCreated, |ctx| {
            Self::create_render_pass(api, ctx)
        })?;
        transition(ctx, BuildStage::PipelineCreated, |ctx| {
            self.create_pipelines(api, ctx)
        })?;
        transition(ctx, BuildStage::FramebuffersCreated, |ctx| {
            Self::create_framebuffers(api, ctx)
        })?;
        transition(ctx, BuildStage::CommandPoolCreated, |ctx| {
            Self::create_command_pool(api, ctx)
        })?;
        transition(ctx, BuildStage::CommandBufferAllocated, |ctx| {
            Self::allocate_command_buffers(api, ctx)
        })?;
        ctx.stage = BuildStage::Ready;

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    fn create_instance<A: GraphicsApi>(
        &self,
        api: &mut A,
        window: &dyn WindowTarget,
        ctx: &mut GraphicsContext,
    ) -> Result<()> {
        let layers = if self.settings.validation {
            let available = api.available_layers()?;
            ensure_available("validation layer", &self.settings.validation_layers, &available)?;
            self.settings.validation_layers.clone()
        } else {
            Vec::new()
        };

        let mut extensions = self.settings.instance_extensions.clone();
        extensions.extend(api.surface_extensions(window)?);
        if self.settings.validation {
            extensions.push(DEBUG_UTILS_EXTENSION.to_string());
        }
        dedup_in_order(&mut extensions);

        let available = api.available_instance_extensions()?;
        ensure_available("instance extension", &extensions, &available)?;

        let desc = InstanceDesc {
            app_name: self.settings.app_name.clone(),
            engine_name: self.settings.engine_name.clone(),
            layers,
            extensions,
        };
        ctx.instance = Some(api.create_instance(&desc)?);
        Ok(())
    }

    fn attach_debug_messenger<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let instance = require(ctx.instance)?;
        ctx.debug_messenger = Some(api.create_debug_messenger(instance)?);
        Ok(())
    }

    fn create_surface<A: GraphicsApi>(
        api: &mut A,
        window: &dyn WindowTarget,
        ctx: &mut GraphicsContext,
    ) -> Result<()> {
        let instance = require(ctx.instance)?;
        ctx.surface = Some(api.create_surface(instance, window)?);
        Ok(())
    }

    fn select_physical_device<A: GraphicsApi>(&self, api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let instance = require(ctx.instance)?;
        let surface = require(ctx.surface)?;

        let candidates = api.enumerate_physical_devices(instance, surface)?;
        log::info!("Found {} physical device(s)", candidates.len());

        let (candidate, queue_families) =
            select_physical_device(&candidates, &self.settings.device_requirements)?;

        log::info!("Selected GPU: {} ({:?})", candidate.name, candidate.device_type);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(candidate.api_version),
            vk::api_version_minor(candidate.api_version),
            vk::api_version_patch(candidate.api_version)
        );
        log::debug!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        ctx.physical_device = Some(SelectedDevice {
            handle: candidate.handle,
            name: candidate.name.clone(),
            queue_families,
            // Always queried against a surface at this point
            swapchain_support: candidate.swapchain_support.clone().unwrap_or_default(),
        });
        Ok(())
    }

    fn create_logical_device<A: GraphicsApi>(&self, api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let selected = ctx.physical_device.as_ref().ok_or(GfxError::NoSuitableDevice)?;
        let families = selected.queue_families;

        let desc = DeviceDesc {
            queue_families: families.unique(),
            extensions: self.settings.device_requirements.extensions.clone(),
            geometry_shader: self.settings.device_requirements.geometry_shader,
        };
        let device = api.create_device(selected.handle, &desc)?;
        ctx.device = Some(device);

        ctx.graphics_queue = Some(api.device_queue(device, families.graphics));
        ctx.present_queue = Some(api.device_queue(device, families.present));
        Ok(())
    }

    fn create_swapchain<A: GraphicsApi>(
        &self,
        api: &mut A,
        window: &dyn WindowTarget,
        ctx: &mut GraphicsContext,
    ) -> Result<()> {
        let device = require(ctx.device)?;
        let surface = require(ctx.surface)?;
        let selected = ctx.physical_device.as_ref().ok_or(GfxError::NoSuitableDevice)?;

        let framebuffer_size = window.framebuffer_size();
        let config = negotiate(
            &selected.swapchain_support,
            framebuffer_size,
            self.settings.preferred_present_mode,
        )
        .ok_or(GfxError::NoSuitableDevice)?;

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.present_mode,
            config.image_count
        );

        let desc = SwapchainDesc {
            surface,
            config,
            queue_families: selected.queue_families,
        };
        let swapchain = api.create_swapchain(device, &desc)?;
        ctx.swapchain = Some(swapchain);
        ctx.swapchain_config = Some(config);
        ctx.swapchain_images = api.swapchain_images(device, swapchain)?;

        log::info!("Created swapchain with {} images", ctx.swapchain_images.len());
        Ok(())
    }

    fn create_image_views<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let device = require(ctx.device)?;
        let format = swapchain_config(ctx)?.format.format;

        for i in 0..ctx.swapchain_images.len() {
            let view = api.create_image_view(device, ctx.swapchain_images[i], format)?;
            ctx.image_views.push(view);
        }
        Ok(())
    }

    fn create_render_pass<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let device = require(ctx.device)?;
        let format = swapchain_config(ctx)?.format.format;
        ctx.render_pass = Some(api.create_render_pass(device, format)?);
        Ok(())
    }

    fn create_pipelines<A: GraphicsApi>(&self, api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let device = require(ctx.device)?;
        let render_pass = require(ctx.render_pass)?;
        let extent = swapchain_config(ctx)?.extent;

        let vertex = self.shader(ShaderStage::Vertex)?;
        let fragment = self.shader(ShaderStage::Fragment)?;

        let layout = api.create_pipeline_layout(device)?;
        ctx.pipeline_layout = Some(layout);

        let desc = GraphicsPipelineDesc {
            render_pass,
            layout,
            extent,
            vertex,
            fragment,
        };
        ctx.pipelines.push(api.create_graphics_pipeline(device, &desc)?);

        for compute in self.shaders.iter().filter(|s| s.stage == ShaderStage::Compute) {
            log::debug!("Creating compute pipeline for {}", compute.name);
            ctx.pipelines.push(api.create_compute_pipeline(device, layout, compute)?);
        }

        log::info!("Created {} pipeline(s)", ctx.pipelines.len());
        Ok(())
    }

    fn create_framebuffers<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let device = require(ctx.device)?;
        let render_pass = require(ctx.render_pass)?;
        let extent = swapchain_config(ctx)?.extent;

        for i in 0..ctx.image_views.len() {
            let framebuffer = api.create_framebuffer(device, render_pass, ctx.image_views[i], extent)?;
            ctx.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn create_command_pool<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let device = require(ctx.device)?;
        let family = ctx
            .physical_device
            .as_ref()
            .ok_or(GfxError::NoSuitableDevice)?
            .queue_families
            .graphics;
        ctx.command_pool = Some(api.create_command_pool(device, family)?);
        Ok(())
    }

    fn allocate_command_buffers<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) -> Result<()> {
        let device = require(ctx.device)?;
        let pool = require(ctx.command_pool)?;
        let count = ctx.framebuffers.len() as u32;
        ctx.command_buffers = api.allocate_command_buffers(device, pool, count)?;
        log::info!("Allocated {} command buffers", ctx.command_buffers.len());
        Ok(())
    }

    fn shader(&self, stage: ShaderStage) -> Result<&'a ShaderBytecode> {
        self.shaders
            .iter()
            .find(|s| s.stage == stage)
            .ok_or_else(|| GfxError::ShaderCompilationFailed {
                path: Default::default(),
                reason: format!("no {:?} shader in the shader set", stage),
            })
    }
}

/// Destroy every handle on `ctx` in reverse creation order.
///
/// Unset handles are skipped and every destroyed handle is cleared, so this
/// is safe on a partially built context and safe to call twice.
pub fn teardown<A: GraphicsApi>(api: &mut A, ctx: &mut GraphicsContext) {
    if ctx.stage == BuildStage::Uninitialized && ctx.instance.is_none() {
        return;
    }
    log::info!("Cleaning up Vulkan resources (reached {:?})...", ctx.stage);

    if let Some(device) = ctx.device {
        if let Err(e) = api.device_wait_idle(device) {
            log::warn!("device_wait_idle failed during teardown: {}", e);
        }

        if let Some(pool) = ctx.command_pool.take() {
            log::debug!("Destroying command pool ({} buffers)", ctx.command_buffers.len());
            api.destroy_command_pool(device, pool);
        }
        ctx.command_buffers.clear();

        for framebuffer in ctx.framebuffers.drain(..).rev() {
            api.destroy_framebuffer(device, framebuffer);
        }
        for pipeline in ctx.pipelines.drain(..).rev() {
            api.destroy_pipeline(device, pipeline);
        }
        if let Some(layout) = ctx.pipeline_layout.take() {
            api.destroy_pipeline_layout(device, layout);
        }
        if let Some(render_pass) = ctx.render_pass.take() {
            log::debug!("Destroying render pass");
            api.destroy_render_pass(device, render_pass);
        }
        for view in ctx.image_views.drain(..).rev() {
            api.destroy_image_view(device, view);
        }
        if let Some(swapchain) = ctx.swapchain.take() {
            log::debug!("Destroying swapchain");
            api.destroy_swapchain(device, swapchain);
        }
        ctx.swapchain_images.clear();
        ctx.swapchain_config = None;

        log::debug!("Destroying logical device");
        api.destroy_device(device);
    }
    ctx.device = None;
    ctx.graphics_queue = None;
    ctx.present_queue = None;
    ctx.physical_device = None;

    if let Some(instance) = ctx.instance {
        if let Some(surface) = ctx.surface.take() {
            log::debug!("Destroying surface");
            api.destroy_surface(instance, surface);
        }
        if let Some(messenger) = ctx.debug_messenger.take() {
            log::debug!("Destroying debug messenger");
            api.destroy_debug_messenger(instance, messenger);
        }
        log::debug!("Destroying instance");
        api.destroy_instance(instance);
    }
    ctx.instance = None;
    ctx.stage = BuildStage::Uninitialized;

    log::info!("Cleanup complete");
}

/// Run one stage; on success the context advances to `stage`
fn transition<F>(ctx: &mut GraphicsContext, stage: BuildStage, step: F) -> Result<(), BuildError>
where
    F: FnOnce(&mut GraphicsContext) -> Result<()>,
{
    log::debug!("{:?} -> {:?}", ctx.stage, stage);
    match step(ctx) {
        Ok(()) => {
            ctx.stage = stage;
            Ok(())
        }
        Err(source) => {
            log::error!("Stage {:?} failed: {}", stage, source);
            Err(BuildError { stage, source })
        }
    }
}

/// Fail with the first required name missing from `available`
fn ensure_available(kind: &'static str, required: &[String], available: &[String]) -> Result<()> {
    let available: HashSet<&str> = available.iter().map(String::as_str).collect();
    match required.iter().find(|name| !available.contains(name.as_str())) {
        Some(name) => Err(GfxError::ExtensionOrLayerUnavailable {
            kind,
            name: name.clone(),
        }),
        None => Ok(()),
    }
}

fn dedup_in_order(names: &mut Vec<String>) {
    let mut seen = HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}

/// An earlier stage's handle; missing means the sequence was bypassed
fn require<T>(handle: Option<T>) -> Result<T> {
    handle.ok_or(GfxError::ApiCallFailed(vk::Result::ERROR_INITIALIZATION_FAILED))
}

fn swapchain_config(ctx: &GraphicsContext) -> Result<SwapchainConfig> {
    require(ctx.swapchain_config)
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
