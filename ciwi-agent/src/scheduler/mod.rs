//! Scheduler layer for the agent
//!
//! This layer heartbeats the server, leases jobs and coordinates their
//! execution. It also holds control directives until the agent is idle.

pub mod poller;

pub use poller::JobPoller;
