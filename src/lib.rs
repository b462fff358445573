//! Reservoir fill-level and drought-risk monitoring for İzmir's supply
//! reservoirs, built from reservoir and weather feeds.

pub mod config;
pub mod errors;
mod helpers;
pub mod models;
pub mod services;
pub mod table;

pub use config::Settings;
pub use services::pipeline::{Pipeline, RunOutput, RunRequest};
