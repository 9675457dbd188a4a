//! End-to-end tests for Quickseed
//!
//! These tests bind a real listener and talk to it over HTTP, covering the
//! server lifecycle and client disconnects.

mod streaming_workflow;
