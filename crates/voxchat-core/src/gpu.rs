//! Parsing for `nvidia-smi` CSV queries used by the diagnostics command.
//!
//! Expects `--format=csv,noheader,nounits` output: one record per line,
//! comma-separated, memory in MiB, utilization in percent.

/// Fields requested with `--query-gpu`.
pub const GPU_QUERY: &str = "index,name,memory.used,memory.total,utilization.gpu";

/// Fields requested with `--query-compute-apps`.
pub const COMPUTE_APPS_QUERY: &str = "pid,process_name,used_memory";

#[derive(Debug, Clone, PartialEq)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
    pub utilization_percent: u32,
}

impl GpuInfo {
    pub fn memory_used_fraction(&self) -> f32 {
        if self.memory_total_mib == 0 {
            return 0.0;
        }
        self.memory_used_mib as f32 / self.memory_total_mib as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeApp {
    pub pid: u32,
    pub process_name: String,
    pub used_memory_mib: u64,
}

fn fields(line: &str, expected: usize) -> Result<Vec<&str>, String> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != expected {
        return Err(format!("expected {expected} fields, got {}: '{line}'", parts.len()));
    }
    Ok(parts)
}

fn number<T: std::str::FromStr>(field: &str, what: &str) -> Result<T, String> {
    field
        .parse()
        .map_err(|_| format!("invalid {what} '{field}'"))
}

fn records(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Parse `--query-gpu` output.
pub fn parse_gpu_query(output: &str) -> Result<Vec<GpuInfo>, String> {
    records(output)
        .map(|line| {
            let f = fields(line, 5)?;
            Ok(GpuInfo {
                index: number(f[0], "gpu index")?,
                name: f[1].to_string(),
                memory_used_mib: number(f[2], "memory.used")?,
                memory_total_mib: number(f[3], "memory.total")?,
                utilization_percent: number(f[4], "utilization.gpu")?,
            })
        })
        .collect()
}

/// Parse `--query-compute-apps` output.
pub fn parse_compute_apps(output: &str) -> Result<Vec<ComputeApp>, String> {
    records(output)
        .map(|line| {
            let f = fields(line, 3)?;
            Ok(ComputeApp {
                pid: number(f[0], "pid")?,
                process_name: f[1].to_string(),
                used_memory_mib: number(f[2], "used_memory")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gpu_rows() {
        let out = "0, NVIDIA A100-SXM4-40GB, 30512, 40960, 87\n1, NVIDIA A100-SXM4-40GB, 0, 40960, 0\n";
        let gpus = parse_gpu_query(out).unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].name, "NVIDIA A100-SXM4-40GB");
        assert_eq!(gpus[0].memory_used_mib, 30512);
        assert_eq!(gpus[0].utilization_percent, 87);
        assert!((gpus[1].memory_used_fraction()).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_compute_apps() {
        let apps = parse_compute_apps("4242, python3, 20480\n").unwrap();
        assert_eq!(
            apps,
            vec![ComputeApp {
                pid: 4242,
                process_name: "python3".into(),
                used_memory_mib: 20480,
            }]
        );
    }

    #[test]
    fn empty_output_is_no_rows() {
        assert!(parse_compute_apps("\n").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse_gpu_query("0, gpu, lots, 40960, 1").is_err());
        assert!(parse_gpu_query("0, gpu").is_err());
    }
}
