//! Utilities shared by the tandem relay binaries and their tests.

pub mod logger;
pub mod time;
