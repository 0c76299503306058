//! Shared test utilities for faxrelay integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with a temp watch directory
//! - Scripted fakes for the recognition transport, converter and notifier

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
