pub mod api;
pub mod app_config;
mod handlers;
pub mod settings;
pub mod state;
