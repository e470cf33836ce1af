pub mod app;
pub mod config;

pub use app::{parse_command, Command, Shell};
pub use config::{load_settings, save_settings, settings_path, ShellSettings};
