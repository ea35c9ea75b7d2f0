pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;

pub use config::Config;
pub use coordinator::PredictionCoordinator;
pub use error::{BackendError, Error, Result};
