//! Data Transfer Objects for the `/api/v1` surface
//!
//! This module contains DTOs used for communication between the ciwi server
//! and its agents and clients. DTOs are lightweight representations of
//! domain entities optimized for network transfer.

pub mod agent;
pub mod artifact;
pub mod job;
pub mod project;
pub mod state;
