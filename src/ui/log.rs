//! # Logging System
//!
//! Colored terminal output on stderr with info, success, warning, error, and
//! debug levels. A process-wide atomic level keeps the pipeline worker
//! threads free of any logger state.

use colored::*;
use std::sync::atomic::{AtomicU8, Ordering};

const LEVEL_QUIET: u8 = 0;
const LEVEL_NORMAL: u8 = 1;
const LEVEL_VERBOSE: u8 = 2;

static LEVEL: AtomicU8 = AtomicU8::new(LEVEL_NORMAL);

pub struct Log;

impl Log {
	pub fn set_verbose(enabled: bool) {
		if enabled {
			LEVEL.store(LEVEL_VERBOSE, Ordering::Relaxed);
		}
	}

	pub fn set_quiet(enabled: bool) {
		if enabled {
			LEVEL.store(LEVEL_QUIET, Ordering::Relaxed);
		}
	}

	pub fn is_verbose() -> bool {
		LEVEL.load(Ordering::Relaxed) >= LEVEL_VERBOSE
	}

	pub fn is_quiet() -> bool {
		LEVEL.load(Ordering::Relaxed) == LEVEL_QUIET
	}
}

pub fn info(msg: &str) {
	if !Log::is_quiet() {
		eprintln!("{} {}", "ℹ".bright_blue().bold(), msg.bright_white());
	}
}

pub fn success(msg: &str) {
	if !Log::is_quiet() {
		eprintln!("{} {}", "✓".bright_green().bold(), msg.bright_white());
	}
}

pub fn warn(msg: &str) {
	if !Log::is_quiet() {
		eprintln!("{} {}", "⚠".bright_yellow().bold(), msg.bright_white());
	}
}

pub fn error(msg: &str) {
	eprintln!("{} {}", "✗".bright_red().bold(), msg.bright_white());
}

pub fn debug(msg: &str) {
	if Log::is_verbose() {
		eprintln!("{} {}", "⚙".bright_black().bold(), msg.dimmed());
	}
}

pub fn header(text: &str) {
	if !Log::is_quiet() {
		eprintln!("\n{}", text.bright_blue().bold());
	}
}

/// Machine-readable progress line for UI consumption. Always emitted,
/// regardless of verbosity level.
pub fn progress(fraction: f32) {
	eprintln!("PROGRESS: {}", fraction);
}
