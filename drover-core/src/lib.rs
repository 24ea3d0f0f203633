//! Drover Core
//!
//! Core types and abstractions for the Drover job framework.
//!
//! This crate contains:
//! - Domain types: Core business entities (JobRecord, JobResult, JobLogEntry, etc.)
//! - DTOs: Data transfer objects for the HTTP API, client and CLI

pub mod domain;
pub mod dto;
