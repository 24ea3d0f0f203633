//! Data Transfer Objects
//!
//! This module contains DTOs exchanged between the Drover service, its HTTP
//! client and the CLI. DTOs are lightweight views of domain entities shaped
//! for the wire.

pub mod job;
pub mod result;
pub mod schedule;
