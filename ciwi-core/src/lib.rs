//! ciwi Core
//!
//! Core types and abstractions for the ciwi CI system.
//!
//! This crate contains:
//! - Domain types: Core business entities (JobExecution, Project, Agent, etc.)
//! - DTOs: Data transfer objects for the `/api/v1` surface
//! - Capability matching shared by the scheduler and its diagnostics
//! - Version parsing, output trimming/redaction and the agent control queue

pub mod capability;
pub mod control;
pub mod domain;
pub mod dto;
pub mod output;
pub mod version;

/// API prefix shared by server and clients
pub const API_PREFIX: &str = "/api/v1";
