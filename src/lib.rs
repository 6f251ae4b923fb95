pub mod errors;
pub mod garage_config;
pub mod telemetry;
pub mod workshop;
