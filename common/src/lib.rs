// Common library shared by the archiver binary and the integration tests

pub mod archiver;
pub mod bootstrap;
pub mod config;
pub mod dates;
pub mod errors;
pub mod models;
pub mod progress;
pub mod remote;
pub mod retention;
pub mod telemetry;
pub mod transfer;
