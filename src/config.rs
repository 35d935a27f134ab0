//! Worker configuration from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::sandbox::SandboxConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// List the worker pops jobs from
    pub job_queue: String,
    /// Pub/sub channel for live packet subscribers
    pub packet_channel: String,
    /// List every packet is pushed onto
    pub packet_queue: String,
    pub submission_type: String,
    pub worker_name: String,
    pub admin_addr: SocketAddr,
    pub languages_config: PathBuf,
    pub problems_dir: Option<PathBuf>,
    pub output_limit: usize,
    pub sandbox: SandboxConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            redis_url: text("REDIS_URL", "redis://localhost:6379"),
            job_queue: text("JUDGE_QUEUE", "judge:queue"),
            packet_channel: text("PACKET_CHANNEL", "judge:packets"),
            packet_queue: text("PACKET_QUEUE", "judge:packets:queue"),
            submission_type: text("SUBMISSION_TYPE", "contest"),
            worker_name: text("WORKER_NAME", "judge"),
            admin_addr: parsed(&lookup, "ADMIN_ADDR", "127.0.0.1:9091")?,
            languages_config: text("LANGUAGES_CONFIG", "./files/languages.toml").into(),
            problems_dir: lookup("PROBLEMS_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            output_limit: parsed(&lookup, "OUTPUT_LIMIT_BYTES", "65536")?,
            sandbox: SandboxConfig {
                compile_time_limit_ms: parsed(&lookup, "COMPILE_TIME_LIMIT_MS", "30000")?,
                compile_memory_limit_mb: parsed(&lookup, "COMPILE_MEMORY_LIMIT_MB", "2048")?,
                box_base: parsed(&lookup, "SANDBOX_BOX_BASE", "0")?,
            },
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {}: {:?}", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.job_queue, "judge:queue");
        assert_eq!(config.packet_queue, "judge:packets:queue");
        assert_eq!(config.submission_type, "contest");
        assert_eq!(config.admin_addr.port(), 9091);
        assert_eq!(config.output_limit, 65536);
        assert_eq!(config.sandbox.compile_time_limit_ms, 30_000);
        assert!(config.problems_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SUBMISSION_TYPE", "practice"),
            ("PROBLEMS_DIR", "/srv/problems"),
            ("SANDBOX_BOX_BASE", "2000"),
            ("ADMIN_ADDR", "0.0.0.0:8000"),
        ])
        .unwrap();
        assert_eq!(config.submission_type, "practice");
        assert_eq!(config.problems_dir, Some(PathBuf::from("/srv/problems")));
        assert_eq!(config.sandbox.box_base, 2000);
        assert_eq!(config.admin_addr.port(), 8000);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = config(&[("OUTPUT_LIMIT_BYTES", "lots")]).unwrap_err();
        assert!(err.to_string().contains("OUTPUT_LIMIT_BYTES"));
    }
}
