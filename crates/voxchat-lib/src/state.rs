//! Application state — configuration, engine status, and the device gate.
//!
//! Built once at startup and injected into the router. The model status is
//! recorded exactly once, when initialization finishes; until then every
//! engine-backed endpoint answers 503.

use std::sync::{Arc, OnceLock};

use voxchat_core::types::ServerConfig;

use crate::engine::Engines;
use crate::error::ApiError;
use crate::gate::DeviceGate;
use crate::init::ModelStatus;
use crate::pipeline::Pipeline;

const NOT_LOADED: &str = "Model not loaded";
const STILL_LOADING: &str = "models are still loading";

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Shared>,
}

struct Shared {
    config: ServerConfig,
    models: OnceLock<ModelStatus>,
    gate: DeviceGate,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                models: OnceLock::new(),
                gate: DeviceGate::new(),
            }),
        }
    }

    /// State whose initialization has already finished.
    pub fn with_models(config: ServerConfig, status: ModelStatus) -> Self {
        let state = Self::new(config);
        let _ = state.set_models(status);
        state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Record the initialization outcome. Fails if one is already recorded.
    pub fn set_models(&self, status: ModelStatus) -> Result<(), ModelStatus> {
        self.inner.models.set(status)
    }

    /// `None` while initialization is still running.
    pub fn models(&self) -> Option<&ModelStatus> {
        self.inner.models.get()
    }

    /// Why the engines cannot be used, if they cannot.
    pub fn unavailable_reason(&self) -> Option<String> {
        match self.models() {
            None => Some(STILL_LOADING.to_string()),
            Some(ModelStatus::Failed(e)) => Some(e.clone()),
            Some(ModelStatus::Ready(_)) => None,
        }
    }

    pub fn engines(&self) -> Result<&Engines, ApiError> {
        match self.models() {
            Some(ModelStatus::Ready(engines)) => Ok(engines),
            Some(ModelStatus::Failed(e)) => Err(ApiError::unavailable(NOT_LOADED, Some(e.clone()))),
            None => Err(ApiError::unavailable(NOT_LOADED, Some(STILL_LOADING.to_string()))),
        }
    }

    /// A pipeline over the loaded engines, or 503.
    pub fn pipeline(&self) -> Result<Pipeline, ApiError> {
        let engines = self.engines()?.clone();
        Ok(Pipeline::new(engines, self.inner.gate.clone()))
    }
}
