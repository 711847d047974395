pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod management;
pub mod metrics;
pub mod models;
pub mod publish;
pub mod query;
pub mod store;

pub use error::{Result, TelemetryError};
