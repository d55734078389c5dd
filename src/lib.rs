pub mod admin;
pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod model;
pub mod telemetry;
