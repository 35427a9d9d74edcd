//! Core domain types
//!
//! This module contains the core domain structures used across ciwi services.
//! These types represent the fundamental business entities and are shared between
//! the server (for persistence) and the agent (for execution).

pub mod agent;
pub mod artifact;
pub mod job;
pub mod metadata;
pub mod project;
pub mod test_report;
