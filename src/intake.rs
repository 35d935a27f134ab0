//! Job intake - parsing and validating messages from the Redis queue
//!
//! Anything malformed is rejected here with an `IntakeError`, logged and
//! dropped; it never becomes a job and never reaches the reporter.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::GradingEngine;
use crate::error::IntakeError;

/// Message popped from the job queue
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Grade a submission against a problem
    #[serde(rename = "judge")]
    Judge(JudgeJob),
    /// Run a program once on raw input
    #[serde(rename = "invocation")]
    Invocation(InvocationJob),
}

/// One grading request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeJob {
    #[serde(deserialize_with = "coerce::integer")]
    pub submission_id: i64,
    #[serde(deserialize_with = "coerce::integer")]
    pub problem_id: i64,
    pub language: String,
    pub source: String,
    /// Seconds
    #[serde(deserialize_with = "coerce::float")]
    pub time_limit: f64,
    /// KiB
    #[serde(deserialize_with = "coerce::unsigned")]
    pub memory_limit: u64,
    #[serde(default)]
    pub problem_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_type: Option<String>,
}

/// Ad-hoc execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationJob {
    #[serde(deserialize_with = "coerce::integer")]
    pub submission_id: i64,
    pub language: String,
    pub source: String,
    #[serde(deserialize_with = "coerce::float")]
    pub time_limit: f64,
    #[serde(deserialize_with = "coerce::unsigned")]
    pub memory_limit: u64,
    #[serde(default)]
    pub input_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_type: Option<String>,
}

impl WorkerJob {
    pub fn submission_id(&self) -> i64 {
        match self {
            WorkerJob::Judge(job) => job.submission_id,
            WorkerJob::Invocation(job) => job.submission_id,
        }
    }
}

/// Parse and validate a raw queue message
pub fn parse_job(raw: &str) -> Result<WorkerJob, IntakeError> {
    let job: WorkerJob = serde_json::from_str(raw)?;

    let (language, time_limit, memory_limit) = match &job {
        WorkerJob::Judge(j) => (&j.language, j.time_limit, j.memory_limit),
        WorkerJob::Invocation(j) => (&j.language, j.time_limit, j.memory_limit),
    };

    if language.trim().is_empty() {
        return Err(IntakeError::invalid("language", "must not be empty"));
    }
    if !time_limit.is_finite() || time_limit <= 0.0 {
        return Err(IntakeError::invalid(
            "time_limit",
            format!("must be a positive number of seconds, got {}", time_limit),
        ));
    }
    if memory_limit == 0 {
        return Err(IntakeError::invalid("memory_limit", "must be positive"));
    }

    Ok(job)
}

/// Lenient numeric fields: numbers or numeric strings
mod coerce {
    use super::*;
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Numeric::deserialize(deserializer)? {
            Numeric::Int(v) => Ok(v),
            Numeric::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(v as i64),
            Numeric::Float(v) => Err(D::Error::custom(format!("expected an integer, got {}", v))),
            Numeric::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("expected an integer, got {:?}", s))),
        }
    }

    pub fn unsigned<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = integer(deserializer)?;
        u64::try_from(value)
            .map_err(|_| D::Error::custom(format!("expected a non-negative integer, got {}", value)))
    }

    pub fn float<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Numeric::deserialize(deserializer)? {
            Numeric::Int(v) => Ok(v as f64),
            Numeric::Float(v) => Ok(v),
            Numeric::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("expected a number, got {:?}", s))),
        }
    }
}

/// Blocking consumer of the job queue
pub struct JobQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
    key: String,
}

impl JobQueue {
    pub async fn connect(redis_url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        let key = key.into();
        info!("Listening for jobs on {} at {}", key, redis_url);
        Ok(Self { client, conn, key })
    }

    /// Wait up to `timeout` seconds for the next well-formed job.
    /// Malformed messages are dropped.
    pub async fn pop(&mut self, timeout: f64) -> Result<Option<WorkerJob>> {
        loop {
            let popped: Option<(String, String)> =
                match redis::AsyncCommands::blpop(&mut self.conn, &self.key, timeout).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.conn = get_connection_with_retry(&self.client).await?;
                        continue;
                    }
                };

            let Some((_, data)) = popped else {
                return Ok(None);
            };

            match parse_job(&data) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => warn!("Dropping job message: {}. Data: {}", e, data),
            }
        }
    }
}

/// Where jobs come from
#[async_trait]
pub trait JobSource: Send {
    /// Next job, or `None` when nothing arrived within `timeout` seconds
    async fn next_job(&mut self, timeout: f64) -> Result<Option<WorkerJob>>;
}

#[async_trait]
impl JobSource for JobQueue {
    async fn next_job(&mut self, timeout: f64) -> Result<Option<WorkerJob>> {
        self.pop(timeout).await
    }
}

/// Hand jobs to `engine` until `shutdown` fires.
///
/// Shutdown is only checked between pops, so a job taken off the queue always
/// reaches the engine and ends with a final packet.
pub async fn serve(
    engine: &GradingEngine,
    jobs: &mut dyn JobSource,
    shutdown: &CancellationToken,
    timeout: f64,
) -> Result<()> {
    while !shutdown.is_cancelled() {
        let Some(job) = jobs.next_job(timeout).await? else {
            continue;
        };

        let submission_id = job.submission_id();
        let accepted = async {
            match job {
                WorkerJob::Judge(job) => {
                    info!(
                        "Received judge job: submission_id={}, problem_id={}, language={}",
                        job.submission_id, job.problem_id, job.language
                    );
                    engine.accept(job).await
                }
                WorkerJob::Invocation(job) => {
                    info!(
                        "Received invocation job: submission_id={}, language={}",
                        job.submission_id, job.language
                    );
                    engine.custom_invocation(job).await
                }
            }
        };

        tokio::pin!(accepted);
        tokio::select! {
            _ = &mut accepted => {}
            _ = shutdown.cancelled() => {
                warn!("Shutting down while submission {} waits", submission_id);
                engine.request_termination().await;
                accepted.await;
            }
        }
    }
    Ok(())
}

/// Get a Redis connection, retrying until one succeeds
pub(crate) async fn get_connection_with_retry(
    client: &redis::Client,
) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!("Failed to connect to Redis: {}. Retrying in 3 seconds...", e);
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
