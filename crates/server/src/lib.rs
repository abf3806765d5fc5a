//! Process wiring of sinkbridge: configuration, telemetry, backend
//! selection and the lifecycle of the cleanup operators.

pub mod app;
pub mod config;
pub mod error;
pub mod state_factory;
pub mod telemetry;

pub use app::App;
pub use config::SinkbridgeConfig;
pub use error::ServerError;
