//! HTTP surface: prediction, model upload, stats and static pages

pub mod error;
pub mod routes;
pub mod server;
pub mod telemetry;
pub mod upload;

pub use error::ApiError;
pub use server::{ApiServer, AppState};
