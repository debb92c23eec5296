//! Runtime glue: configuration, fatal error capture, and telemetry.

pub mod config;
pub mod fatal;
pub mod telemetry;
