pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod query;

pub use error::{GatewayError, Result};
pub use gateway::MetricsGateway;
