//! CLI support module
//!
//! Configuration file handling and logging setup for the agent binary.

pub mod config;
pub mod logging;
