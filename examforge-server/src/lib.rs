//! HTTP front for the ExamForge data layer.

pub mod config;
pub mod logging;
pub mod routes;
pub mod shutdown;
pub mod telemetry;

pub use config::Config;
pub use routes::{router, AppState};
