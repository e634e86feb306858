//! Shared helpers for passage integration tests.

pub mod helpers;

pub use helpers::harness::TestHarness;
pub use helpers::scripted_backend::ScriptedBackend;
pub use helpers::wait_utils::wait_for;
