// FractalDB Engine - Core module structure
pub mod adapter;
pub mod config;
pub mod database;
pub mod docstore;
pub mod logging;

pub use config::Config;
pub use database::Database;
