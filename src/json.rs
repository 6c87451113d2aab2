//! Incremental JSON utilities for inspecting tool arguments mid-stream.

pub mod partial;
pub mod repair;

// Re-export for convenience
pub use partial::{parse_partial_json, ParseState, PartialJson};
pub use repair::repair_json;
