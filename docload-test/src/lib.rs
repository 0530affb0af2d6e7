//! Test utilities for the `docload` load generator.
//!
//! This crate provides an in-process mock document store to run load tests against, and a
//! logger for tests. See the modules for all available utilities.

pub mod server;
pub mod tracing;
