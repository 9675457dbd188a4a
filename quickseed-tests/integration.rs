//! Integration tests for Quickseed
//!
//! These tests drive the HTTP router, session controller and simulated swarm
//! together, in process, with piece availability controlled by hand.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/range_streaming.rs"]
mod range_streaming;

#[path = "integration/readiness_flow.rs"]
mod readiness_flow;

#[path = "integration/session_switching.rs"]
mod session_switching;
