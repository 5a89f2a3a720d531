//! Dragons demo
//!
//! Renders a dragon, a monkey head and a ground plane lit by a moving,
//! shadow-casting light, with a skybox behind them.
//!
//! Reads `dragons.toml` (or the path given as the first argument) when it
//! exists and falls back to defaults otherwise.

mod app;
mod assets;
mod camera;
mod window;

use scene_renderer::config::Config;
use scene_renderer::foundation::logging;

use app::{AppConfig, DragonsApp};

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "dragons.toml".to_string());
    let config = match AppConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            logging::init_with_level("info");
            log::error!("Failed to load {config_path}: {e}");
            std::process::exit(1);
        }
    };

    logging::init_with_level(&config.log_level);
    log::info!("Starting dragons demo");

    if let Err(e) = DragonsApp::new(config).and_then(|mut app| app.run()) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
