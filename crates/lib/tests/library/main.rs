//! End-to-end tests of the engine through the public API.

mod common;
mod engine_tests;
mod insights_tests;
mod reconcile_tests;
