//! Engine doubles that record their calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use voxchat_core::types::{SynthesisParams, TextParams, Voice};

use crate::engine::{AudioStream, EngineError, SpeechEngine, TextEngine, TextStream};

const STEP: Duration = Duration::from_millis(2);

/// Tracks how many engine streams are alive at once.
#[derive(Clone, Default)]
pub struct Monitor {
    active: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
    entries: Arc<AtomicUsize>,
}

impl Monitor {
    fn enter(&self) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(self.clone())
    }

    pub fn max_active(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Monitor);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MockSpeech {
    chunks: Vec<Vec<u8>>,
    calls: Arc<Mutex<Vec<(String, Voice)>>>,
    params: Arc<Mutex<Vec<SynthesisParams>>>,
    monitor: Option<Monitor>,
}

impl MockSpeech {
    /// Every call yields `chunks`, in order.
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            calls: Arc::default(),
            params: Arc::default(),
            monitor: None,
        }
    }

    /// Delay each chunk and report stream lifetimes to `monitor`.
    pub fn slow(mut self, monitor: &Monitor) -> Self {
        self.monitor = Some(monitor.clone());
        self
    }

    pub fn calls(&self) -> Vec<(String, Voice)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn params(&self) -> Vec<SynthesisParams> {
        self.params.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for MockSpeech {
    async fn synthesize(
        &self,
        text: &str,
        voice: Voice,
        params: &SynthesisParams,
    ) -> Result<AudioStream, EngineError> {
        self.calls.lock().unwrap().push((text.to_string(), voice));
        self.params.lock().unwrap().push(params.clone());

        let slow = self.monitor.is_some();
        let guard = self.monitor.as_ref().map(Monitor::enter);
        let audio = stream::iter(self.chunks.clone())
            .then(move |chunk| async move {
                if slow {
                    tokio::time::sleep(STEP).await;
                }
                Ok(Bytes::from(chunk))
            })
            .map(move |item| {
                let _ = &guard;
                item
            });
        Ok(audio.boxed())
    }
}

#[derive(Clone)]
pub struct MockText {
    deltas: Vec<String>,
    fail: bool,
    prompts: Arc<Mutex<Vec<String>>>,
    monitor: Option<Monitor>,
}

impl MockText {
    /// Every call yields `deltas`, in order.
    pub fn new(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            fail: false,
            prompts: Arc::default(),
            monitor: None,
        }
    }

    /// Yields one delta, then a stream error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&["partial"])
        }
    }

    pub fn slow(mut self, monitor: &Monitor) -> Self {
        self.monitor = Some(monitor.clone());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextEngine for MockText {
    async fn complete(&self, prompt: &str, _params: &TextParams) -> Result<TextStream, EngineError> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let mut items: Vec<Result<String, EngineError>> =
            self.deltas.iter().cloned().map(Ok).collect();
        if self.fail {
            items.push(Err(EngineError::Stream("mock failure".into())));
        }

        let slow = self.monitor.is_some();
        let guard = self.monitor.as_ref().map(Monitor::enter);
        let deltas = stream::iter(items)
            .then(move |item| async move {
                if slow {
                    tokio::time::sleep(STEP).await;
                }
                item
            })
            .map(move |item| {
                let _ = &guard;
                item
            });
        Ok(deltas.boxed())
    }
}

/// Collect everything a pipeline sends until it closes the channel.
pub async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(chunk) = rx.recv().await {
        body.extend_from_slice(&chunk);
    }
    body
}
