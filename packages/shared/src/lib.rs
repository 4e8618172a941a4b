//! Utilities shared by the Kaigi server binary and its tests.

pub mod logger;
pub mod time;
