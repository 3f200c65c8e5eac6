//! GPU diagnostics via `nvidia-smi`.
//!
//! Used by the `diagnose` command to show how much device memory the two
//! engines are claiming and which processes hold it.

use std::io::ErrorKind;

use tokio::process::Command;

use voxchat_core::gpu::{
    parse_compute_apps, parse_gpu_query, ComputeApp, GpuInfo, COMPUTE_APPS_QUERY, GPU_QUERY,
};

const NVIDIA_SMI: &str = "nvidia-smi";

async fn run_query(flag: &str, fields: &str) -> Result<String, String> {
    let output = Command::new(NVIDIA_SMI)
        .arg(format!("{flag}={fields}"))
        .arg("--format=csv,noheader,nounits")
        .output()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => format!("{NVIDIA_SMI} not found on PATH; no NVIDIA driver?"),
            _ => format!("failed to run {NVIDIA_SMI}: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{NVIDIA_SMI} exited with {}: {}", output.status, stderr.trim()));
    }

    String::from_utf8(output.stdout).map_err(|e| format!("{NVIDIA_SMI} output is not UTF-8: {e}"))
}

/// Per-device memory and utilization.
pub async fn query_gpus() -> Result<Vec<GpuInfo>, String> {
    let out = run_query("--query-gpu", GPU_QUERY).await?;
    parse_gpu_query(&out)
}

/// Processes currently holding device memory.
pub async fn query_compute_apps() -> Result<Vec<ComputeApp>, String> {
    let out = run_query("--query-compute-apps", COMPUTE_APPS_QUERY).await?;
    parse_compute_apps(&out)
}
