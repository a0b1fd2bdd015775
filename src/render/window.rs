//! Window management using winit

use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowId, WindowAttributes},
};

use crate::core::error::Error;

/// How often the event loop wakes to poll the handler
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Window configuration
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "ATW".to_string(),
            width: 1280,
            height: 640,
        }
    }
}

/// What the window drives. Rendering happens elsewhere (the warp thread
/// owns the surface), so the handler only reacts to window events.
pub trait WindowHandler {
    /// The window exists; set up whatever presents into it
    fn window_ready(&mut self, window: Arc<WinitWindow>) -> Result<(), Error>;

    fn resized(&mut self, _width: u32, _height: u32) {}

    /// A key went down. Return false to close the window.
    fn key_pressed(&mut self, key: KeyCode) -> bool;

    /// Called periodically. Return false to close the window.
    fn keep_running(&mut self) -> bool;

    /// The event loop is about to exit
    fn closing(&mut self);
}

struct App<H: WindowHandler> {
    config: WindowConfig,
    window: Option<Arc<WinitWindow>>,
    handler: H,
    error: Option<Error>,
    closed: bool,
}

impl<H: WindowHandler> App<H> {
    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if !self.closed {
            self.closed = true;
            self.handler.closing();
        }
        event_loop.exit();
    }
}

impl<H: WindowHandler> ApplicationHandler for App<H> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window_attributes = WindowAttributes::default()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        match event_loop.create_window(window_attributes) {
            Ok(window) => {
                let window = Arc::new(window);
                if let Err(e) = self.handler.window_ready(window.clone()) {
                    log::error!("Failed to start in window: {}", e);
                    self.error = Some(e);
                    self.exit(event_loop);
                    return;
                }
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.error = Some(Error::Window(e.to_string()));
                self.exit(event_loop);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Window close requested");
                self.exit(event_loop);
            }
            WindowEvent::Resized(size) => {
                self.handler.resized(size.width, size.height);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if !self.handler.key_pressed(key) {
                    self.exit(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.closed {
            return;
        }
        if self.window.is_some() && !self.handler.keep_running() {
            self.exit(event_loop);
            return;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + POLL_INTERVAL));
    }
}

/// Create the window and run the event loop until the handler stops it
pub fn run<H: WindowHandler>(config: WindowConfig, handler: H) -> Result<H, Error> {
    let event_loop = EventLoop::new()
        .map_err(|e| Error::Window(format!("Failed to create event loop: {}", e)))?;

    event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + POLL_INTERVAL));

    let mut app = App {
        config,
        window: None,
        handler,
        error: None,
        closed: false,
    };

    event_loop
        .run_app(&mut app)
        .map_err(|e| Error::Window(format!("Event loop error: {}", e)))?;

    if !app.closed {
        app.handler.closing();
    }
    match app.error {
        Some(e) => Err(e),
        None => Ok(app.handler),
    }
}
