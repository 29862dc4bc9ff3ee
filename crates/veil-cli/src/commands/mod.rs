//! CLI command implementations for Veil.

pub mod check;
pub mod explain;
