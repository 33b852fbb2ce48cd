//! pairlink core library: config and the device/controller relay,
//! shared by the CLI.

pub mod config;
pub mod relay;
