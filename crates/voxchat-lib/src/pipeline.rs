//! Streaming pipelines — engine output → bounded channel → HTTP body.
//!
//! ```text
//! speak:      header → [gate] TTS(text) chunks
//! chat audio: header → [gate] LLM to completion (buffered) → split sentences
//!                    → for each sentence: [gate] TTS(sentence) chunks
//! chat text:  [gate] LLM deltas as they arrive
//! ```
//!
//! Each request gets its own producer task feeding a channel of
//! `CHANNEL_CAPACITY` chunks; the response body drains the receiver. When the
//! client disconnects the receiver is dropped, the next send fails and the
//! producer stops, dropping the engine stream with it.
//!
//! A client that stays connected but stops reading is treated the same way
//! once a send has waited `SEND_TIMEOUT`, so a stalled consumer cannot keep
//! the device gate.
//!
//! Once the first byte is sent there is no way to report an error to the
//! client, so failures are logged and the stream simply ends early.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, error, info, info_span, warn, Instrument};

use voxchat_core::text_prep::split_sentences;
use voxchat_core::types::{SynthesisParams, TextParams, Voice};
use voxchat_core::wav::default_streaming_header;

use crate::engine::{EngineError, Engines};
use crate::gate::DeviceGate;

/// Chunks buffered between an engine and a slow client.
const CHANNEL_CAPACITY: usize = 32;

/// Longest a producer waits for channel capacity before giving up.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Progress of an audio `/chat` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Idle,
    AwaitingLlm,
    LlmComplete,
    EmittingTts(usize),
    Done,
    Errored,
}

impl fmt::Display for ChatPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatPhase::Idle => f.write_str("idle"),
            ChatPhase::AwaitingLlm => f.write_str("awaiting-llm"),
            ChatPhase::LlmComplete => f.write_str("llm-complete"),
            ChatPhase::EmittingTts(i) => write!(f, "emitting-tts({i})"),
            ChatPhase::Done => f.write_str("done"),
            ChatPhase::Errored => f.write_str("errored"),
        }
    }
}

/// Why a producer stopped before finishing.
#[derive(Debug)]
enum Halt {
    Engine(EngineError),
    Disconnected,
    Stalled,
}

impl From<EngineError> for Halt {
    fn from(err: EngineError) -> Self {
        Halt::Engine(err)
    }
}

async fn send(tx: &mpsc::Sender<Bytes>, chunk: Bytes, limit: Duration) -> Result<(), Halt> {
    tx.send_timeout(chunk, limit).await.map_err(|e| match e {
        SendTimeoutError::Closed(_) => Halt::Disconnected,
        SendTimeoutError::Timeout(_) => Halt::Stalled,
    })
}

/// Cloneable handle for starting streams against the shared engines.
#[derive(Clone)]
pub struct Pipeline {
    engines: Engines,
    gate: DeviceGate,
    send_timeout: Duration,
}

impl Pipeline {
    pub fn new(engines: Engines, gate: DeviceGate) -> Self {
        Self {
            engines,
            gate,
            send_timeout: SEND_TIMEOUT,
        }
    }

    /// Override how long a send may wait on a client that is not reading.
    pub fn with_send_timeout(mut self, limit: Duration) -> Self {
        self.send_timeout = limit;
        self
    }

    /// Stream a WAV header followed by the synthesized audio for `text`.
    pub fn speak(&self, text: String, voice: Voice, params: SynthesisParams) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = self.clone();
        let span = info_span!("tts", %voice);

        tokio::spawn(
            async move {
                let started = Instant::now();
                let result = async {
                    let header = Bytes::copy_from_slice(&default_streaming_header());
                    send(&tx, header, this.send_timeout).await?;
                    this.synthesize_into(&tx, &text, voice, &params).await
                }
                .await;

                match result {
                    Ok(chunks) => info!(
                        "Generated {chunks} chunks in {:.2}s",
                        started.elapsed().as_secs_f64()
                    ),
                    Err(Halt::Disconnected) => debug!("client disconnected, stopping synthesis"),
                    Err(Halt::Stalled) => warn!("client stopped reading, abandoning synthesis"),
                    Err(Halt::Engine(e)) => error!("Error during audio generation: {e}"),
                }
            }
            .instrument(span),
        );

        rx
    }

    /// Stream a WAV header, then audio for each sentence of the text engine's
    /// reply to `prompt`. The reply is generated to completion before any
    /// synthesis starts.
    pub fn chat_audio(
        &self,
        prompt: String,
        voice: Voice,
        text_params: TextParams,
    ) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = self.clone();
        let span = info_span!("chat", %voice);

        tokio::spawn(
            async move {
                let started = Instant::now();
                let mut phase = ChatPhase::Idle;
                let result = this
                    .run_chat_audio(&tx, &prompt, voice, &text_params, &mut phase)
                    .await;

                match result {
                    Ok(chunks) => {
                        advance(&mut phase, ChatPhase::Done);
                        info!(
                            "Chat reply streamed: {chunks} chunks in {:.2}s",
                            started.elapsed().as_secs_f64()
                        );
                    }
                    Err(Halt::Disconnected) => {
                        debug!("client disconnected during {phase}, stopping");
                    }
                    Err(Halt::Stalled) => {
                        warn!("client stopped reading during {phase}, abandoning reply");
                    }
                    Err(Halt::Engine(e)) => {
                        error!("Error during chat generation ({phase}): {e}");
                        advance(&mut phase, ChatPhase::Errored);
                    }
                }
            }
            .instrument(span),
        );

        rx
    }

    /// Stream the text engine's reply to `prompt` as UTF-8 text deltas.
    /// The speech engine is not involved.
    pub fn chat_text(&self, prompt: String, text_params: TextParams) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = self.clone();

        tokio::spawn(
            async move {
                let result = async {
                    let _permit = this.gate.acquire().await?;
                    let mut deltas = this.engines.text.complete(&prompt, &text_params).await?;
                    let mut sent = 0usize;
                    while let Some(delta) = deltas.next().await {
                        let delta = delta?;
                        if delta.is_empty() {
                            continue;
                        }
                        sent += delta.len();
                        send(&tx, Bytes::from(delta), this.send_timeout).await?;
                    }
                    Ok::<_, Halt>(sent)
                }
                .await;

                match result {
                    Ok(bytes) => info!("Text reply streamed: {bytes} bytes"),
                    Err(Halt::Disconnected) => debug!("client disconnected, stopping text stream"),
                    Err(Halt::Stalled) => warn!("client stopped reading, abandoning text stream"),
                    Err(Halt::Engine(e)) => error!("Error during text streaming: {e}"),
                }
            }
            .instrument(info_span!("chat_text")),
        );

        rx
    }

    async fn run_chat_audio(
        &self,
        tx: &mpsc::Sender<Bytes>,
        prompt: &str,
        voice: Voice,
        text_params: &TextParams,
        phase: &mut ChatPhase,
    ) -> Result<usize, Halt> {
        let header = Bytes::copy_from_slice(&default_streaming_header());
        send(tx, header, self.send_timeout).await?;

        advance(phase, ChatPhase::AwaitingLlm);
        let reply = self.generate_reply(prompt, text_params).await?;
        advance(phase, ChatPhase::LlmComplete);

        let sentences = split_sentences(&reply);
        info!(
            "LLM reply: {} chars, {} sentences",
            reply.len(),
            sentences.len()
        );

        let params = SynthesisParams::for_chat();
        let mut chunks = 0;
        for (i, sentence) in sentences.iter().enumerate() {
            advance(phase, ChatPhase::EmittingTts(i));
            chunks += self.synthesize_into(tx, sentence, voice, &params).await?;
        }
        Ok(chunks)
    }

    /// Drive the text engine to completion, holding the device throughout.
    async fn generate_reply(&self, prompt: &str, params: &TextParams) -> Result<String, EngineError> {
        let _permit = self.gate.acquire().await?;
        let mut deltas = self.engines.text.complete(prompt, params).await?;
        let mut reply = String::new();
        while let Some(delta) = deltas.next().await {
            reply.push_str(&delta?);
        }
        Ok(reply)
    }

    /// Forward every chunk the speech engine produces for `text`, in order.
    /// Returns the number of chunks sent.
    async fn synthesize_into(
        &self,
        tx: &mpsc::Sender<Bytes>,
        text: &str,
        voice: Voice,
        params: &SynthesisParams,
    ) -> Result<usize, Halt> {
        let _permit = self.gate.acquire().await?;
        let mut audio = self.engines.speech.synthesize(text, voice, params).await?;
        let mut count = 0;
        while let Some(chunk) = audio.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            send(tx, chunk, self.send_timeout).await?;
            count += 1;
        }
        debug!("synthesized {} chars into {count} chunks", text.len());
        Ok(count)
    }
}

fn advance(phase: &mut ChatPhase, next: ChatPhase) {
    debug!("chat phase {phase} -> {next}");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, MockSpeech, MockText, Monitor};
    use voxchat_core::wav::HEADER_LEN;

    fn pipeline(speech: &MockSpeech, text: &MockText) -> Pipeline {
        Pipeline::new(
            Engines {
                speech: std::sync::Arc::new(speech.clone()),
                text: std::sync::Arc::new(text.clone()),
            },
            DeviceGate::new(),
        )
    }

    #[tokio::test]
    async fn speak_sends_header_then_chunks() {
        let speech = MockSpeech::new(vec![b"ab".to_vec(), b"cd".to_vec()]);
        let text = MockText::new(&[]);
        let body = drain(pipeline(&speech, &text).speak(
            "Hello.".into(),
            Voice::Leo,
            SynthesisParams::default(),
        ))
        .await;

        assert_eq!(&body[..HEADER_LEN], &default_streaming_header());
        assert_eq!(&body[HEADER_LEN..], b"abcd");
        assert_eq!(speech.calls(), vec![("Hello.".to_string(), Voice::Leo)]);
        assert_eq!(speech.params()[0].max_tokens, 2000);
    }

    #[tokio::test]
    async fn chat_audio_synthesizes_each_sentence_in_order() {
        let speech = MockSpeech::new(vec![b"x".to_vec()]);
        let text = MockText::new(&["Dr. Smith went ", "home. He was", " tired! Bye"]);
        let body = drain(pipeline(&speech, &text).chat_audio(
            "prompt".into(),
            Voice::Mia,
            TextParams::default(),
        ))
        .await;

        assert_eq!(text.prompts(), vec!["prompt".to_string()]);
        let sentences: Vec<String> = speech.calls().into_iter().map(|(s, _)| s).collect();
        assert_eq!(sentences, vec!["Dr. Smith went home.", "He was tired!", "Bye"]);
        assert!(speech.params().iter().all(|p| p.max_tokens == 1000));
        assert_eq!(body.len(), HEADER_LEN + 3);
    }

    #[tokio::test]
    async fn chat_audio_with_empty_reply_sends_only_header() {
        let speech = MockSpeech::new(vec![b"x".to_vec()]);
        let text = MockText::new(&["   "]);
        let body = drain(pipeline(&speech, &text).chat_audio(
            "prompt".into(),
            Voice::Tara,
            TextParams::default(),
        ))
        .await;

        assert_eq!(body, default_streaming_header().to_vec());
        assert!(speech.calls().is_empty());
    }

    #[tokio::test]
    async fn chat_audio_stops_on_llm_failure() {
        let speech = MockSpeech::new(vec![b"x".to_vec()]);
        let text = MockText::failing();
        let body = drain(pipeline(&speech, &text).chat_audio(
            "prompt".into(),
            Voice::Tara,
            TextParams::default(),
        ))
        .await;

        assert_eq!(body.len(), HEADER_LEN);
        assert!(speech.calls().is_empty());
    }

    #[tokio::test]
    async fn chat_text_never_touches_speech() {
        let speech = MockSpeech::new(vec![b"x".to_vec()]);
        let text = MockText::new(&["Hi", "", " there."]);
        let body = drain(pipeline(&speech, &text).chat_text("prompt".into(), TextParams::default())).await;

        assert_eq!(body, b"Hi there.");
        assert!(speech.calls().is_empty());
        assert_eq!(text.prompts().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_overlap_engine_use() {
        let monitor = Monitor::default();
        let speech = MockSpeech::new(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).slow(&monitor);
        let text = MockText::new(&["One. Two."]).slow(&monitor);
        let p = pipeline(&speech, &text);

        let a = drain(p.chat_audio("a".into(), Voice::Tara, TextParams::default()));
        let b = drain(p.chat_audio("b".into(), Voice::Zoe, TextParams::default()));
        let c = drain(p.speak("c".into(), Voice::Zac, SynthesisParams::default()));
        let (a, b, c) = tokio::join!(a, b, c);

        assert_eq!(a.len(), HEADER_LEN + 6);
        assert_eq!(b.len(), HEADER_LEN + 6);
        assert_eq!(c.len(), HEADER_LEN + 3);
        assert_eq!(monitor.max_active(), 1);
        assert_eq!(monitor.entries(), 7);
    }

    #[tokio::test]
    async fn dropped_receiver_stops_producer() {
        let speech = MockSpeech::new(vec![vec![0u8; 8]; 1000]);
        let text = MockText::new(&[]);
        let p = pipeline(&speech, &text);
        let gate = p.gate.clone();

        let mut rx = p.speak("long".into(), Voice::Tara, SynthesisParams::default());
        assert!(rx.recv().await.is_some());
        drop(rx);

        // The producer releases the device once it notices the disconnect.
        for _ in 0..100 {
            if gate.is_idle() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("producer kept the device after disconnect");
    }

    #[tokio::test]
    async fn stalled_reader_releases_device() {
        let speech = MockSpeech::new(vec![vec![0u8; 8]; 100]);
        let text = MockText::new(&[]);
        let p = pipeline(&speech, &text).with_send_timeout(Duration::from_millis(50));

        // Held open but never read: fills its channel and stalls.
        let _stalled = p.speak("a".into(), Voice::Tara, SynthesisParams::default());
        let second = drain(p.speak("b".into(), Voice::Zoe, SynthesisParams::default()));
        let body = tokio::time::timeout(Duration::from_secs(3), second)
            .await
            .expect("second request waited on the stalled one");

        assert_eq!(body.len(), HEADER_LEN + 800);
        assert_eq!(
            speech.calls(),
            vec![("a".to_string(), Voice::Tara), ("b".to_string(), Voice::Zoe)]
        );
    }

    #[test]
    fn phase_names() {
        assert_eq!(ChatPhase::EmittingTts(2).to_string(), "emitting-tts(2)");
        assert_eq!(ChatPhase::AwaitingLlm.to_string(), "awaiting-llm");
    }
}
