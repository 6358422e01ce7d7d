//! In-memory backend for development and tests.
//!
//! State lives in the process only; every account is gone after a restart.

mod backend;

pub use backend::{DummyBackend, DummyConfig, Message, DUMMY_API_VERSION};
