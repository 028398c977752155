// Window collaborator
//
// The core only needs two things from a window: native handles to build a
// presentation surface from, and the framebuffer size in pixels.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Anything a presentation surface can be created for
pub trait WindowTarget: HasDisplayHandle + HasWindowHandle {
    /// Current framebuffer size in physical pixels
    fn framebuffer_size(&self) -> vk::Extent2D;
}

impl WindowTarget for winit::window::Window {
    fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
