//! Presentation targets
//!
//! The renderer does not own the OS event loop. It only needs three things from a
//! window: the instance extensions its surface requires, a way to create the
//! surface, and the current framebuffer size. [`SurfaceSource`] captures that.

use ash::{vk, Entry, Instance};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::config::{WindowMode, WindowSettings};

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// A windowing call failed after creation
    #[error("GLFW error: {0}")]
    GlfwError(String),

    /// Surface creation returned a Vulkan error
    #[error("Surface creation failed: {0:?}")]
    Surface(vk::Result),
}

/// Result alias for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Anything the renderer can present into
pub trait SurfaceSource {
    /// Instance extensions required to create a surface for this window
    fn required_instance_extensions(&self) -> WindowResult<Vec<CString>>;

    /// Create a surface on `instance`
    fn create_surface(&mut self, entry: &Entry, instance: &Instance) -> WindowResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window configured for Vulkan (no client API)
    pub fn new(settings: &WindowSettings) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));
        if settings.mode == WindowMode::Borderless {
            glfw.window_hint(glfw::WindowHint::Decorated(false));
        }

        let created = glfw.with_primary_monitor(|glfw, monitor| {
            let mode = match (settings.mode, monitor) {
                (WindowMode::Fullscreen, Some(monitor)) => glfw::WindowMode::FullScreen(monitor),
                _ => glfw::WindowMode::Windowed,
            };
            glfw.create_window(settings.width, settings.height, &settings.title, mode)
        });
        let (mut window, events) = created.ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_focus_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Process pending OS events
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Block until at least one event arrives
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Drain the events received since the last call
    pub fn flush_events(&self) -> glfw::FlushedMessages<'_, (f64, glfw::WindowEvent)> {
        glfw::flush_messages(&self.events)
    }

    /// Seconds since GLFW was initialized
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }
}

impl SurfaceSource for Window {
    fn required_instance_extensions(&self) -> WindowResult<Vec<CString>> {
        let names = self
            .glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Vulkan is not supported by GLFW".to_string()))?;

        names
            .into_iter()
            .map(|name| CString::new(name).map_err(|e| WindowError::GlfwError(e.to_string())))
            .collect()
    }

    fn create_surface(&mut self, _entry: &Entry, instance: &Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::Surface(result))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0).unsigned_abs(), height.max(0).unsigned_abs())
    }
}

/// Adapter for any window exposing raw platform handles (winit, SDL, ...)
pub struct RawWindowSurface<'a, W> {
    window: &'a W,
    size: (u32, u32),
}

impl<'a, W> RawWindowSurface<'a, W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    /// Wrap `window`, reporting `size` as its framebuffer size
    pub fn new(window: &'a W, size: (u32, u32)) -> Self {
        Self { window, size }
    }

    /// Update the size after the windowing layer reports a resize
    pub fn set_size(&mut self, size: (u32, u32)) {
        self.size = size;
    }
}

impl<W> SurfaceSource for RawWindowSurface<'_, W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    fn required_instance_extensions(&self) -> WindowResult<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map_err(WindowError::Surface)?;

        // SAFETY: ash-window returns pointers to static, NUL-terminated extension names
        Ok(names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) }.to_owned())
            .collect())
    }

    fn create_surface(&mut self, entry: &Entry, instance: &Instance) -> WindowResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }
        .map_err(WindowError::Surface)
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }
}
