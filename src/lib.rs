pub mod app;
pub mod error;
pub mod physics;
pub mod renderer;
pub mod scene;
pub mod settings;

use app::App;
use settings::PipelineSettings;
use winit::event_loop::EventLoop;

pub use error::{PhysicsError, RenderError, Result};

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub fn run() -> std::result::Result<(), winit::error::EventLoopError> {
    init_logging();

    log::info!("Starting deferred viewer");

    let event_loop = EventLoop::new()?;
    let mut app = App::new(PipelineSettings::load());

    let result = event_loop.run_app(&mut app);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    log::info!("Application shutdown complete");

    result
}
