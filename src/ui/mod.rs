//! # User Interface
//!
//! Colored terminal output and machine-readable progress lines.

pub mod log;

pub use log::{debug, error, header, info, progress, success, warn, Log};
