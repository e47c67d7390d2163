//! Subcommand implementations

pub mod config;
pub mod doctor;
pub mod simulate;
pub mod tree;
pub mod watch;
