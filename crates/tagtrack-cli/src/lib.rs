//! Command-line front end for tagtrack.
//!
//! `main.rs` parses arguments, builds a [`CliContext`] through
//! [`bootstrap`] and hands it to one of the [`handlers`].

// Used by the binary only
use dotenvy as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliConfig, CliContext, bootstrap};
pub use commands::{Commands, RunArgs};
pub use error::CliError;
pub use parser::Cli;
