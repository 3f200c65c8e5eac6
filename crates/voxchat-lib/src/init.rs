//! Model initialization — connect both engines once at startup.

use std::sync::Arc;

use tracing::{error, info, warn};

use voxchat_core::types::{validate_memory_fraction, ServerConfig, MEMORY_BUDGET};

use crate::clients::{HttpSpeechEngine, HttpTextEngine};
use crate::engine::{EngineError, Engines};

/// Outcome of startup initialization. Never changes once recorded.
#[derive(Clone)]
pub enum ModelStatus {
    Ready(Engines),
    Failed(String),
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready(_))
    }
}

/// Connect the speech and text engines described by `config`.
///
/// Any failure is recorded rather than returned: the HTTP listener keeps
/// running so `/health` can report it. Nothing is retried.
pub async fn initialize(config: &ServerConfig) -> ModelStatus {
    info!("Starting model initialization...");
    match connect(config).await {
        Ok(engines) => {
            info!("Models loaded successfully");
            ModelStatus::Ready(engines)
        }
        Err(e) => {
            error!("Failed to load models: {e}");
            ModelStatus::Failed(e.to_string())
        }
    }
}

async fn connect(config: &ServerConfig) -> Result<Engines, EngineError> {
    validate_memory_fraction("tts", config.tts.gpu_memory_utilization).map_err(EngineError::Config)?;
    validate_memory_fraction("llm", config.llm.gpu_memory_utilization).map_err(EngineError::Config)?;
    if config.exceeds_memory_budget() {
        warn!(
            "tts + llm gpu memory utilization = {:.2} exceeds {MEMORY_BUDGET}; engines may fail to allocate",
            config.memory_claim()
        );
    }

    info!("Loading TTS model: {}", config.tts.model_name);
    info!(
        "TTS max model length: {}, gpu memory utilization: {}, decoder device: {}",
        config.tts.max_model_len, config.tts.gpu_memory_utilization, config.snac_device
    );
    let speech = HttpSpeechEngine::new(&config.tts, &config.snac_device)?;
    speech.probe().await?;

    info!("Loading LLM model: {}", config.llm.model_name);
    info!(
        "LLM max model length: {}, gpu memory utilization: {}",
        config.llm.max_model_len, config.llm.gpu_memory_utilization
    );
    let text = HttpTextEngine::new(&config.llm)?;
    text.probe().await?;

    Ok(Engines {
        speech: Arc::new(speech),
        text: Arc::new(text),
    })
}
