//! Client-side latency and throughput figures for benchmark runs.
//!
//! Audio token counts are estimates: the server does not report them, so they
//! are derived from response size (roughly 7 tokens per 110-byte audio frame).
//! Text runs are measured in bytes of reply per second.

const BYTES_PER_FRAME: f64 = 110.0;
const TOKENS_PER_FRAME: f64 = 7.0;

/// Measurements from one streamed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub total_secs: f64,
    pub first_chunk_secs: Option<f64>,
    pub bytes: u64,
    pub chunks: u64,
}

impl RunStats {
    pub fn estimated_tokens(&self) -> f64 {
        self.bytes as f64 / BYTES_PER_FRAME * TOKENS_PER_FRAME
    }

    /// Estimated tokens per second over the whole request.
    pub fn throughput(&self) -> f64 {
        if self.total_secs > 0.0 {
            self.estimated_tokens() / self.total_secs
        } else {
            0.0
        }
    }

    pub fn bytes_per_sec(&self) -> f64 {
        if self.total_secs > 0.0 {
            self.bytes as f64 / self.total_secs
        } else {
            0.0
        }
    }

    /// Throughput in the unit that fits the workload.
    pub fn rate(&self, workload: Workload) -> f64 {
        match workload {
            Workload::Audio => self.throughput(),
            Workload::Text => self.bytes_per_sec(),
        }
    }
}

/// What a benchmark run streams back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// `/chat` audio, rated in estimated tokens per second.
    Audio,
    /// `/chat` with `stream_text`, rated in bytes per second.
    Text,
}

impl Workload {
    pub fn unit(self) -> &'static str {
        match self {
            Workload::Audio => "tokens/s",
            Workload::Text => "chars/s",
        }
    }
}

/// Averages over the successful runs of a benchmark.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub runs: usize,
    pub avg_total_secs: f64,
    pub avg_first_chunk_secs: f64,
    pub avg_bytes: f64,
    pub avg_throughput: f64,
    /// Sample standard deviations; `None` with fewer than two runs.
    pub std_total_secs: Option<f64>,
    pub std_throughput: Option<f64>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values.iter().copied());
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Summarize completed runs. Returns `None` when every run failed.
pub fn summarize(runs: &[RunStats], workload: Workload) -> Option<Summary> {
    if runs.is_empty() {
        return None;
    }
    let totals: Vec<f64> = runs.iter().map(|r| r.total_secs).collect();
    let rates: Vec<f64> = runs.iter().map(|r| r.rate(workload)).collect();
    Some(Summary {
        runs: runs.len(),
        avg_total_secs: mean(runs.iter().map(|r| r.total_secs)),
        avg_first_chunk_secs: mean(runs.iter().filter_map(|r| r.first_chunk_secs)),
        avg_bytes: mean(runs.iter().map(|r| r.bytes as f64)),
        avg_throughput: mean(rates.iter().copied()),
        std_total_secs: std_dev(&totals),
        std_throughput: std_dev(&rates),
    })
}
