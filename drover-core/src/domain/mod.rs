//! Core domain types
//!
//! This module contains the core domain structures used across Drover crates.
//! These types represent the durable contract (records, results, log entries)
//! and the declarative job metadata shared between the registry, the runner
//! and the HTTP surfaces.

pub mod file;
pub mod job;
pub mod log;
pub mod network;
pub mod result;
pub mod schedule;
pub mod variable;
