//! This crate provides a usage forecast server. It runs pluggable forecasting algorithms against
//! historical water usage data held in a PostgreSQL database, selected by municipality and
//! optionally by consumer group.
//!
//! Algorithms are executables (typically Python or R scripts) in a configured directory, each
//! with an optional YAML metadata file describing it. The server lists them, pulls the usage data
//! a forecast needs, hands that data to the algorithm through temporary exchange files and returns
//! the algorithm's result to the caller verbatim.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime. Algorithm processes are run and
//!   timed out with [tokio::process].
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON and YAML data.
//! * [SQLx](sqlx) provides asynchronous access to PostgreSQL.

pub mod app;
pub mod app_state;
pub mod cli;
pub mod error;
pub mod exchange;
pub mod forecast;
pub mod invoker;
pub mod metrics;
pub mod models;
pub mod planner;
pub mod registry;
pub mod resource_manager;
pub mod server;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod upload;
