//! Engine seams — the speech and text engines are black boxes behind traits.
//!
//! Production uses the HTTP clients in [`crate::clients`]; tests inject
//! doubles. Both engines share one compute device, so callers must hold a
//! [`crate::gate::DeviceGate`] permit for the lifetime of a returned stream.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

use voxchat_core::types::{SynthesisParams, TextParams, Voice};

/// Raw PCM chunks, in playback order.
pub type AudioStream = BoxStream<'static, Result<Bytes, EngineError>>;

/// Incremental text deltas, in generation order.
pub type TextStream = BoxStream<'static, Result<String, EngineError>>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Request(String),
    #[error("engine returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("engine stream failed: {0}")]
    Stream(String),
    #[error("invalid engine response: {0}")]
    Decode(String),
    #[error("invalid engine configuration: {0}")]
    Config(String),
    #[error("device gate closed")]
    GateClosed,
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Request(err.to_string())
    }
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Start synthesizing `text`. The returned stream yields raw PCM.
    async fn synthesize(
        &self,
        text: &str,
        voice: Voice,
        params: &SynthesisParams,
    ) -> Result<AudioStream, EngineError>;
}

#[async_trait]
pub trait TextEngine: Send + Sync {
    /// Start completing `prompt`. The returned stream yields text deltas.
    async fn complete(&self, prompt: &str, params: &TextParams) -> Result<TextStream, EngineError>;
}

/// Handles to both engines, shared by every request.
#[derive(Clone)]
pub struct Engines {
    pub speech: Arc<dyn SpeechEngine>,
    pub text: Arc<dyn TextEngine>,
}
