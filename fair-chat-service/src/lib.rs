pub mod config;
pub mod models;
pub mod page;
pub mod service;

pub use config::ServiceConfig;
pub use service::{AppState, build_router, create_app};
