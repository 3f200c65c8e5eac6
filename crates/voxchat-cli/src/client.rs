//! Client side of the CLI: requests against a running voxchat server.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use serde_json::{json, Value};

use voxchat_core::bench::{summarize, RunStats, Workload};
use voxchat_core::types::Turn;
use voxchat_core::wav::{fix_wav_sizes, parse_wav_header};

/// Everything received from one streamed response.
struct Streamed {
    body: Vec<u8>,
    stats: RunStats,
}

/// One client for every request of a command, with a whole-request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("server returned {status}: {body}");
}

/// Drain a streamed response, timing the first chunk. `on_chunk` sees each
/// chunk as it arrives.
async fn collect(
    resp: reqwest::Response,
    started: Instant,
    mut on_chunk: impl FnMut(&[u8]) -> Result<()>,
) -> Result<Streamed> {
    let mut body = Vec::new();
    let mut first_chunk_secs = None;
    let mut chunks = 0u64;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream interrupted")?;
        if chunk.is_empty() {
            continue;
        }
        if first_chunk_secs.is_none() {
            first_chunk_secs = Some(started.elapsed().as_secs_f64());
        }
        chunks += 1;
        on_chunk(&chunk)?;
        body.extend_from_slice(&chunk);
    }

    Ok(Streamed {
        stats: RunStats {
            total_secs: started.elapsed().as_secs_f64(),
            first_chunk_secs,
            bytes: body.len() as u64,
            chunks,
        },
        body,
    })
}

fn report(stats: &RunStats, workload: Workload) {
    println!("  bytes:            {}", stats.bytes);
    println!("  chunks:           {}", stats.chunks);
    println!("  total time:       {:.2}s", stats.total_secs);
    match stats.first_chunk_secs {
        Some(t) => println!("  first chunk:      {t:.3}s"),
        None => println!("  first chunk:      (none)"),
    }
    if workload == Workload::Audio {
        println!("  est. tokens:      {:.0}", stats.estimated_tokens());
    }
    println!("  throughput:       {:.1} {}", stats.rate(workload), workload.unit());
}

/// Patch the streaming header with real sizes, write the file and describe it.
async fn save_wav(out: &Path, body: Vec<u8>) -> Result<()> {
    let wav = fix_wav_sizes(body);
    match parse_wav_header(&wav) {
        Ok(header) => {
            let data_len = wav.len().saturating_sub(header.data_offset);
            println!(
                "  format:           {} Hz, {}-bit, {} channel(s), {:.2}s of audio",
                header.sample_rate,
                header.bits_per_sample,
                header.channels,
                header.duration_secs(data_len)
            );
        }
        Err(e) => println!("  format:           unreadable WAV header ({e})"),
    }
    tokio::fs::write(out, &wav)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("  saved to:         {}", out.display());
    Ok(())
}

/// GET a JSON endpoint and pretty-print it, whatever the status.
pub async fn get_json(client: &reqwest::Client, server: &str, path: &str) -> Result<()> {
    let resp = client
        .get(format!("{server}{path}"))
        .send()
        .await
        .with_context(|| format!("cannot reach {server}"))?;
    let status = resp.status();
    let body: Value = resp.json().await.context("response is not JSON")?;
    println!("{status}");
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn tts(
    client: &reqwest::Client,
    server: &str,
    prompt: &str,
    voice: &str,
    use_get: bool,
    out: &Path,
) -> Result<()> {
    let url = format!("{server}/tts");
    let request = if use_get {
        client.get(&url).query(&[("prompt", prompt), ("voice", voice)])
    } else {
        client.post(&url).json(&json!({ "prompt": prompt, "voice": voice }))
    };

    println!("Synthesizing with voice '{voice}'...");
    let started = Instant::now();
    let resp = check(request.send().await.context("request failed")?).await?;
    let streamed = collect(resp, started, |_| Ok(())).await?;

    report(&streamed.stats, Workload::Audio);
    save_wav(out, streamed.body).await
}

fn load_history(path: Option<&Path>) -> Result<Vec<Turn>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid history in {}", path.display()))
}

async fn chat_request(
    client: &reqwest::Client,
    server: &str,
    message: &str,
    voice: &str,
    history: &[Turn],
    stream_text: bool,
) -> Result<reqwest::Response> {
    let resp = client
        .post(format!("{server}/chat"))
        .json(&json!({
            "message": message,
            "voice": voice,
            "history": history,
            "stream_text": stream_text,
        }))
        .send()
        .await
        .context("request failed")?;
    check(resp).await
}

pub async fn chat(
    client: &reqwest::Client,
    server: &str,
    message: &str,
    voice: &str,
    history: Option<&Path>,
    text: bool,
    out: &Path,
) -> Result<()> {
    let history = load_history(history)?;
    let started = Instant::now();
    let resp = chat_request(client, server, message, voice, &history, text).await?;

    if text {
        let mut stdout = std::io::stdout();
        let streamed = collect(resp, started, |chunk| {
            stdout.write_all(chunk)?;
            stdout.flush()?;
            Ok(())
        })
        .await?;
        println!();
        eprintln!(
            "{} bytes in {:.2}s",
            streamed.stats.bytes, streamed.stats.total_secs
        );
        return Ok(());
    }

    println!("Chatting with voice '{voice}' ({} history turns)...", history.len());
    let streamed = collect(resp, started, |_| Ok(())).await?;
    report(&streamed.stats, Workload::Audio);
    save_wav(out, streamed.body).await
}

/// Time `runs` chat requests. With `text`, the reply is streamed as text and
/// the speech engine is left out of the measurement.
pub async fn bench(
    client: &reqwest::Client,
    server: &str,
    message: &str,
    voice: &str,
    runs: usize,
    text: bool,
) -> Result<()> {
    let workload = if text { Workload::Text } else { Workload::Audio };
    let mut results = Vec::with_capacity(runs);

    for run in 1..=runs {
        println!("Run {run}/{runs}");
        let started = Instant::now();
        let outcome = async {
            let resp = chat_request(client, server, message, voice, &[], text).await?;
            collect(resp, started, |_| Ok(())).await
        }
        .await;

        match outcome {
            Ok(streamed) => {
                report(&streamed.stats, workload);
                results.push(streamed.stats);
            }
            Err(e) => println!("  failed: {e:#}"),
        }
    }

    let Some(summary) = summarize(&results, workload) else {
        bail!("all {runs} runs failed");
    };
    let unit = workload.unit();
    println!();
    println!("Summary over {} successful run(s)", summary.runs);
    println!("  avg total time:   {:.2}s", summary.avg_total_secs);
    println!("  avg first chunk:  {:.3}s", summary.avg_first_chunk_secs);
    println!("  avg bytes:        {:.0}", summary.avg_bytes);
    println!("  avg throughput:   {:.1} {unit}", summary.avg_throughput);
    if let (Some(total), Some(rate)) = (summary.std_total_secs, summary.std_throughput) {
        println!("  std total time:   ±{total:.2}s");
        println!("  std throughput:   ±{rate:.1} {unit}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::Router;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn slow_server_hits_timeout() {
        let app = Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );
        let server = spawn_server(app).await;
        let client = http_client(Duration::from_millis(100)).unwrap();

        let started = Instant::now();
        assert!(get_json(&client, &server, "/health").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn text_bench_streams_reply() {
        let app = Router::new().route("/chat", post(|| async { "Quantum bits. Superposition." }));
        let server = spawn_server(app).await;
        let client = http_client(Duration::from_secs(10)).unwrap();

        bench(&client, &server, "Explain quantum computing.", "tara", 2, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bench_fails_when_every_run_fails() {
        let app = Router::new().route(
            "/chat",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "not loaded") }),
        );
        let server = spawn_server(app).await;
        let client = http_client(Duration::from_secs(10)).unwrap();

        let err = bench(&client, &server, "hi", "tara", 2, false).await.unwrap_err();
        assert!(err.to_string().contains("all 2 runs failed"));
    }
}
