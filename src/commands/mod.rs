//! Command handlers behind the CLI subcommands
//!
//! Each handler takes the loaded configuration and an open pool, does its
//! work through the library modules and returns a serializable result. The
//! binary only parses arguments and prints.

pub mod load;
pub mod strava;
