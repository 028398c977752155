// Swapchain negotiation
//
// Picks the image format, present mode, extent and image count from what the
// surface reports. Pure: no device calls, so the rules are unit tested.

use ash::vk;

/// Sentinel width meaning "the surface lets the swapchain decide"
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// What a device + surface pair supports
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Negotiate a swapchain configuration.
///
/// Returns `None` only when the surface reports no formats at all, which
/// device selection already rules out.
pub fn negotiate(
    support: &SwapchainSupport,
    framebuffer_size: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
) -> Option<SwapchainConfig> {
    let caps = &support.capabilities;

    Some(SwapchainConfig {
        format: choose_format(&support.formats)?,
        present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
        extent: choose_extent(caps, framebuffer_size),
        image_count: choose_image_count(caps),
        pre_transform: caps.current_transform,
    })
}

/// Prefer BGRA8 sRGB, otherwise whatever the surface listed first
pub fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is always supported, so it is the fallback
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        return caps.current_extent;
    }

    // Not `clamp`: drivers may report max < min (e.g. a minimized window),
    // in which case the maximum wins
    vk::Extent2D {
        width: framebuffer_size
            .width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: framebuffer_size
            .height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// One more than the minimum; a zero maximum means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}
