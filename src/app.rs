use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::error::RendererError;
use crate::renderer::Renderer;
use crate::settings::RenderSettings;
use crate::time::FrameTimer;

/// Whatever submits draw calls and lights each frame. The renderer owns no
/// scene state; the driver rebuilds its frame from scratch every tick.
pub trait SceneDriver {
    fn setup(&mut self, renderer: &mut Renderer);

    /// Records one frame between `begin_frame` and `end_frame`.
    fn render(&mut self, renderer: &mut Renderer, dt: f32, time: f32) -> Result<(), RendererError>;

    fn key_pressed(&mut self, _key: &Key, _renderer: &mut Renderer) {}
}

pub struct App<S: SceneDriver> {
    settings: RenderSettings,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    scene: S,
    timer: FrameTimer,
}

impl<S: SceneDriver> App<S> {
    pub fn new(settings: RenderSettings, scene: S) -> Self {
        Self {
            settings,
            renderer: None,
            window: None,
            window_id: None,
            scene,
            timer: FrameTimer::new(),
        }
    }
}

impl<S: SceneDriver> ApplicationHandler for App<S> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let resolution = &self.settings.resolution;
        let attributes = Window::default_attributes()
            .with_title("wgpu frame graph")
            .with_inner_size(PhysicalSize::new(resolution.width, resolution.height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        let mut renderer =
            match pollster::block_on(Renderer::new_windowed(window.clone(), self.settings.clone())) {
                Ok(renderer) => renderer,
                Err(err) => {
                    log::error!("Failed to create renderer: {err}");
                    event_loop.exit();
                    return;
                }
            };
        self.scene.setup(&mut renderer);

        self.window_id = Some(window.id());
        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = renderer.resize(size.width, size.height) {
                    log::error!("Resize failed: {err}");
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(w) = &self.window {
                    let size = w.inner_size();
                    if let Err(err) = renderer.resize(size.width, size.height) {
                        log::error!("Resize failed: {err}");
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let dt = self.timer.tick();
                let time = self.timer.elapsed();
                if let Err(err) = self.scene.render(renderer, dt, time) {
                    log::error!("Frame failed: {err}");
                }

                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.scene.key_pressed(&logical_key, renderer);
            }
            _ => {}
        }
    }
}
