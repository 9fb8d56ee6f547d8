//! E2E test harness for gatecheck.
//!
//! This module contains test infrastructure with intentionally unused builders,
//! variants, and methods that will be used as more e2e scenarios are written.

#![allow(dead_code)]

pub mod assertions;
pub mod case;
pub mod workspace;

// Re-export commonly used types
pub use assertions::Assertion;
pub use case::Case;
pub use workspace::{fixture_dir, TestWorkspace};
