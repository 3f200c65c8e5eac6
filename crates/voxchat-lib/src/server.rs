//! HTTP API for the voxchat server.
//!
//! Audio endpoints stream `audio/wav`: a 44-byte header with zero size
//! fields, then raw PCM as the speech engine produces it. Validation and
//! readiness errors are JSON; once streaming starts, failures only end the
//! stream early.

use std::any::Any;
use std::convert::Infallible;
use std::str::FromStr;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use voxchat_core::prompt::build_prompt;
use voxchat_core::types::{SynthesisParams, Turn, Voice};
use voxchat_core::wav::{BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

use crate::error::ApiError;
use crate::pipeline::Pipeline;
use crate::state::AppState;

const AUDIO_CONTENT_TYPE: &str = "audio/wav";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

const FEATURES: [&str; 3] = ["tts_streaming", "conversational_chat", "text_streaming"];

/// Build the axum router over a shared [`AppState`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/voices", get(voices))
        .route("/tts", get(tts_query).post(tts_json))
        .route("/chat", post(chat))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request types ────────────────────────────────────────────────────────

/// A number sent either as a JSON number or as a string (`?temperature=0.4`).
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberOrText::Number(n)) => n.to_string(),
        Some(NumberOrText::Text(s)) => s.trim().to_string(),
    };
    raw.parse()
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("invalid number '{raw}'")))
}

#[derive(Debug, Default, Deserialize)]
struct TtsRequest {
    prompt: Option<String>,
    voice: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    temperature: Option<f32>,
    #[serde(default, deserialize_with = "lenient")]
    top_p: Option<f32>,
    #[serde(default, deserialize_with = "lenient")]
    max_tokens: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    repetition_penalty: Option<f32>,
}

impl TtsRequest {
    fn params(&self) -> SynthesisParams {
        let defaults = SynthesisParams::default();
        SynthesisParams {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            repetition_penalty: self.repetition_penalty.unwrap_or(defaults.repetition_penalty),
            stop_token_ids: defaults.stop_token_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
    voice: Option<String>,
    #[serde(default)]
    history: Vec<Turn>,
    #[serde(default)]
    stream_text: bool,
}

fn parse_voice(voice: Option<&str>) -> Result<Voice, ApiError> {
    match voice.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(Voice::default()),
        Some(name) => name.parse().map_err(ApiError::bad_request),
    }
}

/// Trimmed value of a required text field, or `None` if absent or blank.
fn required(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|s| !s.is_empty())
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

// ─── Handlers ─────────────────────────────────────────────────────────────

async fn index(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(&state.config().web_ui_path).await {
        Ok(html) => Html(html).into_response(),
        Err(_) => Json(json!({
            "service": "voxchat conversational TTS streaming API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "/tts": "Generate speech from text (GET ?prompt=text&voice=name, or POST JSON)",
                "/chat": "Conversational reply as speech (POST JSON {message, voice, history, stream_text})",
                "/health": "Health check",
                "/models": "Loaded model metadata",
                "/voices": "List available voices",
            },
            "models_loaded": state.unavailable_reason().is_none(),
            "note": format!("Web UI not found at '{}'", state.config().web_ui_path),
        }))
        .into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let config = state.config();
    match state.unavailable_reason() {
        None => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "models": {
                    "tts": config.tts.model_name,
                    "llm": config.llm.model_name,
                },
                "features": FEATURES,
                "timestamp": timestamp,
            })),
        )
            .into_response(),
        Some(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "error": error,
                "timestamp": timestamp,
            })),
        )
            .into_response(),
    }
}

async fn models(State(state): State<AppState>) -> Json<Value> {
    let config = state.config();
    Json(json!({
        "tts": {
            "name": config.tts.model_name,
            "max_model_len": config.tts.max_model_len,
            "gpu_memory_utilization": config.tts.gpu_memory_utilization,
            "decoder_device": config.snac_device,
            "sample_rate": SAMPLE_RATE,
            "bits_per_sample": BITS_PER_SAMPLE,
            "channels": CHANNELS,
            "voices": Voice::names(),
        },
        "llm": {
            "name": config.llm.model_name,
            "max_model_len": config.llm.max_model_len,
            "gpu_memory_utilization": config.llm.gpu_memory_utilization,
            "max_tokens": config.llm_max_tokens,
        },
        "gpu_memory_utilization_total": config.memory_claim(),
    }))
}

async fn voices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engines()?;
    Ok(Json(json!({
        "voices": Voice::names(),
        "default": Voice::default(),
    })))
}

async fn tts_query(
    State(state): State<AppState>,
    query: Result<Query<TtsRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let pipeline = state.pipeline()?;
    let Query(req) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    start_tts(pipeline, req)
}

async fn tts_json(
    State(state): State<AppState>,
    body: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let pipeline = state.pipeline()?;
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    start_tts(pipeline, req)
}

fn start_tts(pipeline: Pipeline, req: TtsRequest) -> Result<Response, ApiError> {
    let prompt = required(req.prompt.as_deref())
        .ok_or_else(|| ApiError::bad_request("No prompt provided"))?;
    let voice = parse_voice(req.voice.as_deref())?;
    let params = req.params();

    info!("Generating speech for prompt: {}... (voice: {voice})", preview(prompt));

    let rx = pipeline.speak(prompt.to_string(), voice, params);
    Ok(stream_response(rx, AUDIO_CONTENT_TYPE))
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let pipeline = state.pipeline()?;
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let message = required(req.message.as_deref())
        .ok_or_else(|| ApiError::bad_request("No message provided"))?;
    let voice = parse_voice(req.voice.as_deref())?;

    let config = state.config();
    let prompt = build_prompt(&config.system_prompt, &req.history, message);

    info!(
        "Chat request: {}... ({} history turns, voice: {voice}, stream_text: {})",
        preview(message),
        req.history.len(),
        req.stream_text
    );

    let response = if req.stream_text {
        stream_response(pipeline.chat_text(prompt, config.text_params()), TEXT_CONTENT_TYPE)
    } else {
        stream_response(
            pipeline.chat_audio(prompt, voice, config.text_params()),
            AUDIO_CONTENT_TYPE,
        )
    };
    Ok(response)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("handler panicked: {detail}");
    ApiError::internal("Internal server error").into_response()
}

fn stream_response(rx: mpsc::Receiver<Bytes>, content_type: &'static str) -> Response {
    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
