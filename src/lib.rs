pub mod app;
pub mod asset;
pub mod error;
pub mod math;
pub mod renderer;
pub mod settings;
pub mod time;

pub use app::{App, SceneDriver};
pub use error::{RendererError, RendererResult};
pub use renderer::Renderer;
pub use settings::RenderSettings;

use winit::event_loop::EventLoop;

/// Installs the `env_logger` backend at `Info`, overridable through
/// `RUST_LOG`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

pub fn run<S: SceneDriver>(scene: S) -> Result<(), winit::error::EventLoopError> {
    init_logging();

    let settings = RenderSettings::load();
    log::info!("Starting wgpu frame-graph renderer");

    let event_loop = EventLoop::new()?;
    let mut app = App::new(settings, scene);

    let result = event_loop.run_app(&mut app);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    log::info!("Application shutdown complete");

    result
}
