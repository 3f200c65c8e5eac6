//! Shared types for the voxchat server and its clients.
//!
//! Kept free of tokio and axum so the CLI and downstream consumers can depend
//! on them without pulling in the server stack.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── Voices ────────────────────────────────────────────────────────────────

/// Speaker voices understood by the speech engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Tara,
    Zoe,
    Zac,
    Jess,
    Leo,
    Mia,
    Julia,
    Leah,
}

impl Voice {
    /// Every voice, in the order `/voices` reports them.
    pub const ALL: [Voice; 8] = [
        Voice::Tara,
        Voice::Zoe,
        Voice::Zac,
        Voice::Jess,
        Voice::Leo,
        Voice::Mia,
        Voice::Julia,
        Voice::Leah,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Voice::Tara => "tara",
            Voice::Zoe => "zoe",
            Voice::Zac => "zac",
            Voice::Jess => "jess",
            Voice::Leo => "leo",
            Voice::Mia => "mia",
            Voice::Julia => "julia",
            Voice::Leah => "leah",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|v| v.as_str()).collect()
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "invalid voice '{}'; valid voices: {}",
                    s,
                    Self::names().join(", ")
                )
            })
    }
}

// ─── Conversation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message of a conversation, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─── Sampling parameters ───────────────────────────────────────────────────

/// Token id the speech engine emits at the end of an utterance.
pub const END_OF_AUDIO_TOKEN: u32 = 128_258;

/// Sampling knobs forwarded verbatim to the speech engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub repetition_penalty: f32,
    pub stop_token_ids: Vec<u32>,
}

impl Default for SynthesisParams {
    /// Defaults for the `/tts` endpoint when the caller omits a field.
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.9,
            max_tokens: 2000,
            repetition_penalty: 1.1,
            stop_token_ids: vec![END_OF_AUDIO_TOKEN],
        }
    }
}

impl SynthesisParams {
    /// Fixed parameters used for every sentence of a `/chat` reply.
    pub fn for_chat() -> Self {
        Self {
            max_tokens: 1000,
            ..Self::default()
        }
    }
}

/// Sampling knobs for the text engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for TextParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 256,
        }
    }
}

// ─── Configuration ─────────────────────────────────────────────────────────

/// Above this combined device-memory fraction the two engines are likely to
/// fail allocation once decoder and runtime overhead are added.
pub const MEMORY_BUDGET: f32 = 0.95;

/// Connection and sizing settings for one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub model_name: String,
    pub max_model_len: u32,
    pub gpu_memory_utilization: f32,
    pub url: String,
}

/// Complete server configuration, normally filled from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tts: EngineSettings,
    pub llm: EngineSettings,
    pub snac_device: String,
    pub llm_max_tokens: u32,
    pub system_prompt: String,
    pub web_ui_path: String,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
Answer in a few short, natural sentences without lists, markdown, or emoji.";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            tts: EngineSettings {
                model_name: "canopylabs/orpheus-tts-0.1-finetune-prod".into(),
                max_model_len: 2048,
                gpu_memory_utilization: 0.5,
                url: "http://127.0.0.1:8001".into(),
            },
            llm: EngineSettings {
                model_name: "meta-llama/Llama-3.2-3B-Instruct".into(),
                max_model_len: 4096,
                gpu_memory_utilization: 0.35,
                url: "http://127.0.0.1:8002".into(),
            },
            snac_device: "cuda".into(),
            llm_max_tokens: 256,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            web_ui_path: "web_ui.html".into(),
        }
    }
}

impl ServerConfig {
    /// Text-engine sampling parameters for `/chat`.
    pub fn text_params(&self) -> TextParams {
        TextParams {
            max_tokens: self.llm_max_tokens,
            ..TextParams::default()
        }
    }

    /// Combined device-memory fraction claimed by both engines.
    pub fn memory_claim(&self) -> f32 {
        self.tts.gpu_memory_utilization + self.llm.gpu_memory_utilization
    }

    pub fn exceeds_memory_budget(&self) -> bool {
        self.memory_claim() > MEMORY_BUDGET
    }
}

/// Validate a device-memory fraction: must lie in `(0, 1]`.
pub fn validate_memory_fraction(name: &str, fraction: f32) -> Result<(), String> {
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(format!(
            "invalid {name} gpu memory utilization {fraction}; expected a fraction in (0, 1]"
        ))
    }
}
