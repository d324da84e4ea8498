//! Command handlers.
//!
//! Each handler takes the composed [`CliContext`](crate::CliContext), does
//! its work through the training manager and formats the result.

pub mod backends;
pub mod steps;
pub mod train;
