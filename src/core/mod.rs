pub mod chain;
pub mod config;
pub mod error;
pub mod model;
pub mod plan;
