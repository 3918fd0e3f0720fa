//! Mock upstream servers.

// Not every test binary uses every mock
#![allow(dead_code)]

pub mod gemini_live_mock;

pub use gemini_live_mock::*;
