//! # Commands
//!
//! One module per subcommand; each wires CLI arguments into the drivers.

pub mod extract;
pub mod matching;
pub mod retrieve;
pub mod train;
