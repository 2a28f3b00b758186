//! # cc_app
//!
//! Configuration, logging and process wiring for services built on the
//! `cc_*` concurrency control crates.

pub mod cli;
pub mod config_loader;
pub mod dispatcher;
pub mod shutdown_handler;
pub mod tracing_setup;
