//! HTTP clients for the external engines.
//!
//! ```text
//! speech: POST {TTS_ENGINE_URL}/v1/audio/speech   → chunked raw PCM
//! text:   POST {LLM_ENGINE_URL}/v1/completions    → SSE, `data: {choices:[{text}]}` … `data: [DONE]`
//! ```
//!
//! Both expose `GET /health` for the startup readiness probe.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use voxchat_core::types::{EngineSettings, SynthesisParams, TextParams, Voice};

use crate::engine::{AudioStream, EngineError, SpeechEngine, TextEngine, TextStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn build_client() -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))
}

fn base_url(settings: &EngineSettings) -> Result<String, EngineError> {
    let url = settings.url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(EngineError::Config(format!(
            "engine url '{}' must start with http:// or https://",
            settings.url
        )))
    }
}

async fn probe(client: &reqwest::Client, base: &str) -> Result<(), EngineError> {
    let resp = client
        .get(format!("{base}/health"))
        .timeout(PROBE_TIMEOUT)
        .send()
        .await?;
    ensure_success(resp).await.map(drop)
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(EngineError::Status { status, body })
}

// ─── Speech engine ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: Voice,
    response_format: &'static str,
    stream: bool,
    #[serde(flatten)]
    params: &'a SynthesisParams,
    decoder_device: &'a str,
}

/// Client for an OpenAI-style streaming speech endpoint.
pub struct HttpSpeechEngine {
    client: reqwest::Client,
    base: String,
    model: String,
    device: String,
}

impl HttpSpeechEngine {
    /// `device` is the decoder placement hint forwarded with each request.
    pub fn new(settings: &EngineSettings, device: &str) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client()?,
            base: base_url(settings)?,
            model: settings.model_name.clone(),
            device: device.to_string(),
        })
    }

    pub async fn probe(&self) -> Result<(), EngineError> {
        probe(&self.client, &self.base).await
    }
}

#[async_trait]
impl SpeechEngine for HttpSpeechEngine {
    async fn synthesize(
        &self,
        text: &str,
        voice: Voice,
        params: &SynthesisParams,
    ) -> Result<AudioStream, EngineError> {
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            response_format: "pcm",
            stream: true,
            params,
            decoder_device: &self.device,
        };

        debug!("speech: POST {} chars (voice {voice})", text.len());

        let resp = self
            .client
            .post(format!("{}/v1/audio/speech", self.base))
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        let audio = resp
            .bytes_stream()
            .filter(|chunk| std::future::ready(!matches!(chunk, Ok(c) if c.is_empty())))
            .map(|chunk| chunk.map_err(|e| EngineError::Stream(e.to_string())));
        Ok(audio.boxed())
    }
}

// ─── Text engine ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(flatten)]
    params: &'a TextParams,
}

/// Client for an OpenAI-compatible streaming completions endpoint.
pub struct HttpTextEngine {
    client: reqwest::Client,
    base: String,
    model: String,
}

impl HttpTextEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client()?,
            base: base_url(settings)?,
            model: settings.model_name.clone(),
        })
    }

    pub async fn probe(&self) -> Result<(), EngineError> {
        probe(&self.client, &self.base).await
    }
}

#[async_trait]
impl TextEngine for HttpTextEngine {
    async fn complete(&self, prompt: &str, params: &TextParams) -> Result<TextStream, EngineError> {
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            stream: true,
            params,
        };

        debug!("text: POST prompt of {} chars", prompt.len());

        let resp = self
            .client
            .post(format!("{}/v1/completions", self.base))
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        Ok(completion_deltas(resp.bytes_stream().boxed()))
    }
}

/// One server-sent event relevant to completions.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Line-oriented SSE decoder. Only `data:` fields matter here; comments,
/// `event:` and blank separator lines are skipped.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(Self::parse_line(&line));
        }
        events
    }

    /// Flush a final line that arrived without a trailing newline.
    fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        Self::parse_line(&line)
    }

    fn parse_line(line: &[u8]) -> Option<SseEvent> {
        let line = String::from_utf8_lossy(line);
        let payload = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim_start();
        if payload == "[DONE]" {
            Some(SseEvent::Done)
        } else if payload.is_empty() {
            None
        } else {
            Some(SseEvent::Data(payload.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

fn decode_completion(payload: &str) -> Result<String, EngineError> {
    let chunk: CompletionChunk =
        serde_json::from_str(payload).map_err(|e| EngineError::Decode(format!("{e}: {payload}")))?;
    if let Some(err) = chunk.error {
        return Err(EngineError::Stream(err.to_string()));
    }
    Ok(chunk.choices.into_iter().next().map(|c| c.text).unwrap_or_default())
}

struct DeltaState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    queued: VecDeque<Result<String, EngineError>>,
    finished: bool,
}

impl DeltaState {
    /// Queue decoded deltas; returns `false` once the stream is over.
    fn absorb(&mut self, event: SseEvent) -> bool {
        match event {
            SseEvent::Done => false,
            SseEvent::Data(payload) => match decode_completion(&payload) {
                Ok(text) => {
                    if !text.is_empty() {
                        self.queued.push_back(Ok(text));
                    }
                    true
                }
                Err(e) => {
                    self.queued.push_back(Err(e));
                    false
                }
            },
        }
    }
}

fn completion_deltas(body: BoxStream<'static, reqwest::Result<Bytes>>) -> TextStream {
    let state = DeltaState {
        body,
        decoder: SseDecoder::default(),
        queued: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queued.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    for event in st.decoder.push(&chunk) {
                        if !st.absorb(event) {
                            st.finished = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.queued.push_back(Err(EngineError::Stream(e.to_string())));
                    st.finished = true;
                }
                None => {
                    if let Some(event) = st.decoder.finish() {
                        st.absorb(event);
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}
