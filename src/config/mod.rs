//! # Configuration Module
//!
//! Centralizes all numeric configuration for the engine. Constants are
//! grouped by functional area; interdependencies are documented and enforced
//! through compile-time assertions in [`constants`].

pub mod constants;
pub use constants::*;
