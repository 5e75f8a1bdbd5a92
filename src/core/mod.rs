//! Core types shared by every layer.
//!
//! This module contains:
//! - Protocol constants and defaults
//! - Error types
//! - Identifiers and clocks
//! - The transport contract
//! - Session configuration

mod clock;
mod config;
pub mod constants;
mod error;
mod ids;
mod traits;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use traits::*;
