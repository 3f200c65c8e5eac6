//! voxchat-lib — conversational speech server.
//!
//! Engine clients, the device gate, streaming pipelines, model
//! initialization, and the HTTP API. Depends on voxchat-core for pure types
//! and text processing.

pub mod clients;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod gate;
pub mod init;
pub mod pipeline;
pub mod server;
pub mod state;

#[cfg(test)]
mod testing;

// Re-export voxchat-core for convenience
pub use voxchat_core;
