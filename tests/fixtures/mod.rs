//! Test Fixtures Module
//!
//! Shared fakes for the integration tests:
//! - Audio fixtures (programmatically generated)
//! - A scriptable in-memory backend
//! - Fake microphone and speaker devices

// Not every test binary uses every fixture
#![allow(dead_code)]

pub mod audio_fixtures;
pub mod backend;
pub mod devices;

pub use audio_fixtures::*;
pub use backend::*;
pub use devices::*;
