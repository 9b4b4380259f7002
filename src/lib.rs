pub mod access;
pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod signing;
pub mod validation;

pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use error::{MarketError, Result};
