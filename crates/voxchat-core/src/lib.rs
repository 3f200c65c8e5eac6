//! voxchat-core — Pure types and text processing.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod bench;
pub mod gpu;
pub mod prompt;
pub mod text_prep;
pub mod types;
pub mod wav;
