// =============================================================================
// NANO-GFX - Vulkan graphics context bring-up
// =============================================================================
//
// Opens a window, compiles the configured shaders, brings the graphics
// context up to Ready and keeps it alive until the window closes.
//
// LIFECYCLE:
// 1. Load nano.toml, initialise logging, report how the config loaded
// 2. resumed: create window, compile shaders, build context
// 3. CloseRequested / Escape: tear the context down, exit
//
// Nothing is drawn; per-frame work is empty.
// =============================================================================

use anyhow::{Context, Result};
use nano_gfx::backend::{teardown, ContextBuilder, ContextSettings, GraphicsContext, ShaderCompiler, VulkanApi};
use nano_gfx::config::Config;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, source) = Config::load();

    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
    source.report();
    log::debug!("Config: {:?}", config);
    log::info!("Starting {} ({})", config.app.name, config.app.engine_name);
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode preference: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Drop tears the context down before the window is released.
struct App {
    config: Config,
    ctx: GraphicsContext,
    api: Option<VulkanApi>,
    window: Option<Window>,
    /// Bring-up error, reported as the process result
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            ctx: GraphicsContext::new(),
            api: None,
            window: None,
            failure: None,
        }
    }

    fn bring_up(&mut self, window: &Window) -> Result<()> {
        let shaders = ShaderCompiler::from_config(&self.config.shaders)
            .compile_all(&self.config.shaders.sources)
            .context("Failed to compile shaders")?;
        log::info!("Loaded {} shader(s)", shaders.len());

        let mut api = VulkanApi::new().context("Failed to load Vulkan library. Is Vulkan installed?")?;
        let settings = ContextSettings::from_config(&self.config);
        let result = ContextBuilder::new(&settings, &shaders).build(&mut api, window, &mut self.ctx);

        // Keep the loader even on failure: teardown needs it
        self.api = Some(api);
        result?;
        Ok(())
    }

    /// Safe to call more than once
    fn shutdown(&mut self) {
        if let Some(api) = self.api.as_mut() {
            teardown(api, &mut self.ctx);
        }
        self.api = None;
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.failure = Some(anyhow::Error::new(e).context("Failed to create window"));
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.bring_up(&window) {
            log::error!("Failed to initialize Vulkan: {:#}", e);
            self.shutdown();
            self.failure = Some(e);
            event_loop.exit();
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
