//! netweave - Sync Layer
//!
//! Implements:
//! - Explicitly declared sync fields (name, getter, setter)
//! - Per-component change detection on a fixed interval
//! - Diff broadcast and diff application
//! - Force-broadcast of full snapshots

mod engine;
mod field;
mod update;

pub use engine::*;
pub use field::*;
pub use update::*;
