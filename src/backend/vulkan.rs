// Vulkan backend - ash implementation of GraphicsApi
//
// Responsibilities:
// - Own the loader, instance and device function tables
// - Snapshot physical devices (properties, features, queues, surface support)
// - Translate descriptor structs into create-info chains
//
// Handles cross the trait boundary as raw `vk` handles; the function tables
// stay here. Nothing is destroyed on drop: teardown is explicit.

use ash::prelude::VkResult;
use ash::vk;
use ash::Entry;
use std::ffi::{c_char, CStr, CString};

use super::api::{DeviceDesc, GraphicsApi, GraphicsPipelineDesc, InstanceDesc, SwapchainDesc};
use super::device::{PhysicalDeviceCandidate, QueueFamilySnapshot};
use super::pipeline;
use super::shader::ShaderBytecode;
use super::swapchain::SwapchainSupport;
use crate::error::{GfxError, Result};
use crate::window::WindowTarget;

struct InstanceFns {
    instance: ash::Instance,
    surface: ash::khr::surface::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
}

struct DeviceFns {
    device: ash::Device,
    swapchain: ash::khr::swapchain::Device,
}

/// `GraphicsApi` backed by the system Vulkan loader
pub struct VulkanApi {
    entry: Entry,
    instance: Option<InstanceFns>,
    device: Option<DeviceFns>,
}

impl VulkanApi {
    /// Load the Vulkan library
    pub fn new() -> std::result::Result<Self, ash::LoadingError> {
        let entry = unsafe { Entry::load() }?;
        Ok(Self {
            entry,
            instance: None,
            device: None,
        })
    }

    fn instance_fns(&self, handle: vk::Instance) -> VkResult<&InstanceFns> {
        match &self.instance {
            Some(fns) if fns.instance.handle() == handle => Ok(fns),
            _ => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
        }
    }

    fn device_fns(&self, handle: vk::Device) -> VkResult<&DeviceFns> {
        match &self.device {
            Some(fns) if fns.device.handle() == handle => Ok(fns),
            _ => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
        }
    }

    /// Run `f` against the loaded device, or warn that `what` leaked
    fn with_device(&self, handle: vk::Device, what: &str, f: impl FnOnce(&DeviceFns)) {
        match self.device_fns(handle) {
            Ok(fns) => f(fns),
            Err(_) => log::warn!("Cannot destroy {}: device {:?} is not loaded", what, handle),
        }
    }

    fn snapshot_device(
        fns: &InstanceFns,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<PhysicalDeviceCandidate> {
        let instance = &fns.instance;
        let (properties, features, extensions, families) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_features(physical_device),
                instance.enumerate_device_extension_properties(physical_device)?,
                instance.get_physical_device_queue_family_properties(physical_device),
            )
        };

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let extensions = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        let mut queue_families = Vec::with_capacity(families.len());
        for (index, family) in (0u32..).zip(&families) {
            let present_supported = unsafe {
                fns.surface
                    .get_physical_device_surface_support(physical_device, index, surface)?
            };
            queue_families.push(QueueFamilySnapshot {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present_supported,
            });
        }

        let swapchain_support = unsafe {
            SwapchainSupport {
                capabilities: fns
                    .surface
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: fns
                    .surface
                    .get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: fns
                    .surface
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            }
        };

        Ok(PhysicalDeviceCandidate {
            handle: physical_device,
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            geometry_shader: features.geometry_shader == vk::TRUE,
            extensions,
            queue_families,
            swapchain_support: Some(swapchain_support),
        })
    }
}

impl GraphicsApi for VulkanApi {
    fn available_layers(&mut self) -> VkResult<Vec<String>> {
        let layers = unsafe { self.entry.enumerate_instance_layer_properties()? };
        Ok(layers
            .iter()
            .filter_map(|layer| layer.layer_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn available_instance_extensions(&mut self) -> VkResult<Vec<String>> {
        let extensions = unsafe { self.entry.enumerate_instance_extension_properties(None)? };
        Ok(extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn surface_extensions(&mut self, window: &dyn WindowTarget) -> Result<Vec<String>> {
        let display = window
            .display_handle()
            .map_err(|e| GfxError::SurfaceCreationFailed(format!("no display handle: {}", e)))?;
        let names = ash_window::enumerate_required_extensions(display.as_raw())?;

        // Static, nul-terminated names owned by ash-window
        Ok(names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            .collect())
    }

    fn create_instance(&mut self, desc: &InstanceDesc) -> VkResult<vk::Instance> {
        let app_name = to_cstring(&desc.app_name)?;
        let engine_name = to_cstring(&desc.engine_name)?;
        let layers = to_cstrings(&desc.layers)?;
        let extensions = to_cstrings(&desc.extensions)?;
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|s| s.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|s| s.as_ptr()).collect();

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        let surface = ash::khr::surface::Instance::new(&self.entry, &instance);
        let handle = instance.handle();
        log::debug!("Created instance {:?}", handle);

        self.instance = Some(InstanceFns {
            instance,
            surface,
            debug_utils: None,
        });
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        match self.instance.take() {
            Some(fns) if fns.instance.handle() == instance => unsafe {
                fns.instance.destroy_instance(None);
            },
            other => {
                log::warn!("Cannot destroy instance {:?}: not loaded", instance);
                self.instance = other;
            }
        }
    }

    fn create_debug_messenger(&mut self, instance: vk::Instance) -> VkResult<vk::DebugUtilsMessengerEXT> {
        let entry = &self.entry;
        let fns = match &mut self.instance {
            Some(fns) if fns.instance.handle() == instance => fns,
            _ => return Err(vk::Result::ERROR_INITIALIZATION_FAILED),
        };
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &fns.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        fns.debug_utils = Some(debug_utils);
        Ok(messenger)
    }

    fn destroy_debug_messenger(&mut self, instance: vk::Instance, messenger: vk::DebugUtilsMessengerEXT) {
        match self.instance_fns(instance).map(|fns| fns.debug_utils.as_ref()) {
            Ok(Some(debug_utils)) => unsafe {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            },
            _ => log::warn!("Cannot destroy debug messenger: debug utils not loaded"),
        }
    }

    fn create_surface(&mut self, instance: vk::Instance, window: &dyn WindowTarget) -> Result<vk::SurfaceKHR> {
        let fns = self.instance_fns(instance)?;
        let display = window
            .display_handle()
            .map_err(|e| GfxError::SurfaceCreationFailed(format!("no display handle: {}", e)))?;
        let handle = window
            .window_handle()
            .map_err(|e| GfxError::SurfaceCreationFailed(format!("no window handle: {}", e)))?;

        unsafe {
            ash_window::create_surface(&self.entry, &fns.instance, display.as_raw(), handle.as_raw(), None)
        }
        .map_err(|e| GfxError::SurfaceCreationFailed(e.to_string()))
    }

    fn destroy_surface(&mut self, instance: vk::Instance, surface: vk::SurfaceKHR) {
        match self.instance_fns(instance) {
            Ok(fns) => unsafe { fns.surface.destroy_surface(surface, None) },
            Err(_) => log::warn!("Cannot destroy surface: instance not loaded"),
        }
    }

    fn enumerate_physical_devices(
        &mut self,
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<PhysicalDeviceCandidate>> {
        let fns = self.instance_fns(instance)?;
        let devices = unsafe { fns.instance.enumerate_physical_devices()? };

        devices
            .into_iter()
            .map(|physical_device| Self::snapshot_device(fns, physical_device, surface))
            .collect()
    }

    fn create_device(&mut self, physical_device: vk::PhysicalDevice, desc: &DeviceDesc) -> VkResult<vk::Device> {
        let fns = self
            .instance
            .as_ref()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = desc
            .queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions = to_cstrings(&desc.extensions)?;
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|s| s.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default().geometry_shader(desc.geometry_shader);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let device = unsafe { fns.instance.create_device(physical_device, &create_info, None)? };
        let swapchain = ash::khr::swapchain::Device::new(&fns.instance, &device);
        let handle = device.handle();
        log::debug!("Created logical device {:?}", handle);

        self.device = Some(DeviceFns { device, swapchain });
        Ok(handle)
    }

    fn destroy_device(&mut self, device: vk::Device) {
        match self.device.take() {
            Some(fns) if fns.device.handle() == device => unsafe {
                fns.device.destroy_device(None);
            },
            other => {
                log::warn!("Cannot destroy device {:?}: not loaded", device);
                self.device = other;
            }
        }
    }

    fn device_queue(&mut self, device: vk::Device, family: u32) -> vk::Queue {
        match self.device_fns(device) {
            Ok(fns) => unsafe { fns.device.get_device_queue(family, 0) },
            Err(_) => vk::Queue::null(),
        }
    }

    fn device_wait_idle(&mut self, device: vk::Device) -> VkResult<()> {
        let fns = self.device_fns(device)?;
        unsafe { fns.device.device_wait_idle() }
    }

    fn create_swapchain(&mut self, device: vk::Device, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let fns = self.device_fns(device)?;
        let config = &desc.config;
        let families = desc.queue_families.unique();
        let sharing_mode = desc.queue_families.sharing_mode();

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);
        if sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&families);
        }

        unsafe { fns.swapchain.create_swapchain(&create_info, None) }
    }

    fn swapchain_images(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let fns = self.device_fns(device)?;
        unsafe { fns.swapchain.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) {
        self.with_device(device, "swapchain", |fns| unsafe {
            fns.swapchain.destroy_swapchain(swapchain, None);
        });
    }

    fn create_image_view(&mut self, device: vk::Device, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let fns = self.device_fns(device)?;
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { fns.device.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&mut self, device: vk::Device, view: vk::ImageView) {
        self.with_device(device, "image view", |fns| unsafe {
            fns.device.destroy_image_view(view, None);
        });
    }

    fn create_render_pass(&mut self, device: vk::Device, format: vk::Format) -> VkResult<vk::RenderPass> {
        pipeline::create_render_pass(&self.device_fns(device)?.device, format)
    }

    fn destroy_render_pass(&mut self, device: vk::Device, render_pass: vk::RenderPass) {
        self.with_device(device, "render pass", |fns| unsafe {
            fns.device.destroy_render_pass(render_pass, None);
        });
    }

    fn create_pipeline_layout(&mut self, device: vk::Device) -> VkResult<vk::PipelineLayout> {
        pipeline::create_pipeline_layout(&self.device_fns(device)?.device)
    }

    fn destroy_pipeline_layout(&mut self, device: vk::Device, layout: vk::PipelineLayout) {
        self.with_device(device, "pipeline layout", |fns| unsafe {
            fns.device.destroy_pipeline_layout(layout, None);
        });
    }

    fn create_graphics_pipeline(&mut self, device: vk::Device, desc: &GraphicsPipelineDesc<'_>) -> VkResult<vk::Pipeline> {
        pipeline::create_graphics_pipeline(
            &self.device_fns(device)?.device,
            desc.render_pass,
            desc.layout,
            desc.extent,
            desc.vertex,
            desc.fragment,
        )
    }

    fn create_compute_pipeline(
        &mut self,
        device: vk::Device,
        layout: vk::PipelineLayout,
        shader: &ShaderBytecode,
    ) -> VkResult<vk::Pipeline> {
        pipeline::create_compute_pipeline(&self.device_fns(device)?.device, layout, shader)
    }

    fn destroy_pipeline(&mut self, device: vk::Device, pipeline: vk::Pipeline) {
        self.with_device(device, "pipeline", |fns| unsafe {
            fns.device.destroy_pipeline(pipeline, None);
        });
    }

    fn create_framebuffer(
        &mut self,
        device: vk::Device,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let fns = self.device_fns(device)?;
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { fns.device.create_framebuffer(&create_info, None) }
    }

    fn destroy_framebuffer(&mut self, device: vk::Device, framebuffer: vk::Framebuffer) {
        self.with_device(device, "framebuffer", |fns| unsafe {
            fns.device.destroy_framebuffer(framebuffer, None);
        });
    }

    fn create_command_pool(&mut self, device: vk::Device, queue_family: u32) -> VkResult<vk::CommandPool> {
        let fns = self.device_fns(device)?;
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        unsafe { fns.device.create_command_pool(&create_info, None) }
    }

    fn allocate_command_buffers(
        &mut self,
        device: vk::Device,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let fns = self.device_fns(device)?;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { fns.device.allocate_command_buffers(&allocate_info) }
    }

    fn destroy_command_pool(&mut self, device: vk::Device, pool: vk::CommandPool) {
        self.with_device(device, "command pool", |fns| unsafe {
            fns.device.destroy_command_pool(pool, None);
        });
    }
}

fn to_cstring(name: &str) -> VkResult<CString> {
    CString::new(name).map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)
}

fn to_cstrings(names: &[String]) -> VkResult<Vec<CString>> {
    names.iter().map(|name| to_cstring(name)).collect()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[Vulkan] {}", message),
        _ => log::debug!("[Vulkan] {}", message),
    }

    vk::FALSE
}
