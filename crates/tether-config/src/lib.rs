//! # tether-config
//!
//! Configuration for the Tether engine, loaded from `tether.toml` with
//! environment-variable overrides and validation.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::TetherConfig;
