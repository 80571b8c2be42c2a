//! Shared test utilities for esindex integration tests.
//!
//! This module provides:
//! - `FakeMailApi` and `FakeDecryptor` standing in for the server and crypto
//! - `TestHarness` wiring a coordinator to a temp-dir database
//! - Builders for test mailboxes

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::*;
