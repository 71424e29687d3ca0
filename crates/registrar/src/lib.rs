pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use config::{get_settings, setup_logger, Settings};
pub use startup::{app, build_app, Application};
