//! End-to-end tests for handover.
//!
//! A real catalog server runs on an ephemeral port against a temporary
//! storage directory; nodes and updaters talk to it over HTTP.

mod harness;
mod integration_tests;

pub use harness::TestHarness;
