//! Problems and their case sequences
//!
//! A problem is resolved once per job from the job's `problem_data` payload
//! (or from the local problem library when the payload is absent) and is
//! owned by that job alone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::checker::CheckerKind;
use crate::intake::JudgeJob;
use crate::storage::DataStore;

/// Default cap on captured program output
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Test data, either carried in the payload or stored in object storage
#[derive(Debug, Clone, PartialEq)]
pub enum TestData {
    Inline(String),
    Stored(String),
}

impl TestData {
    pub async fn load(&self, store: Option<&dyn DataStore>) -> Result<String> {
        match self {
            TestData::Inline(data) => Ok(data.clone()),
            TestData::Stored(key) => {
                let store = store
                    .ok_or_else(|| anyhow::anyhow!("No object storage configured for {}", key))?;
                store
                    .fetch(key)
                    .await
                    .with_context(|| format!("Failed to fetch test data: {}", key))
            }
        }
    }
}

/// One test instance
#[derive(Debug, Clone)]
pub struct Case {
    /// 1-based, stable across the whole sequence
    pub position: u32,
    /// Batch number (1-based) when grouped
    pub batch: Option<u32>,
    pub input: TestData,
    pub expected: TestData,
    pub points: f64,
    /// Whether a failure here skips the rest of its scope
    pub short_circuit: bool,
}

/// Resolved grading target
#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    /// Seconds
    pub time_limit: f64,
    /// KiB
    pub memory_limit: u64,
    pub checker: CheckerKind,
    pub output_limit: usize,
    pub cases: Vec<Case>,
}

impl Problem {
    /// Build a problem from a `problem_data` payload
    pub fn from_payload(
        id: impl Into<String>,
        time_limit: f64,
        memory_limit: u64,
        payload: &Value,
    ) -> Result<Self> {
        let id = id.into();
        let raw: RawProblem = serde_json::from_value(payload.clone())
            .with_context(|| format!("Invalid problem data for problem {}", id))?;

        let mut cases = Vec::new();
        let mut batch_counter = 0u32;

        for entry in raw.cases {
            match entry {
                RawEntry::Batch(batch) => {
                    if batch.batched.is_empty() {
                        anyhow::bail!("Problem {} has an empty batch", id);
                    }
                    batch_counter += 1;
                    let share = batch.points / batch.batched.len() as f64;
                    for raw_case in batch.batched {
                        let position = cases.len() as u32 + 1;
                        let (input, expected) = raw_case.into_data(position)?;
                        cases.push(Case {
                            position,
                            batch: Some(batch_counter),
                            input,
                            expected,
                            points: share,
                            short_circuit: batch.short_circuit,
                        });
                    }
                }
                RawEntry::Single(raw_case) => {
                    let position = cases.len() as u32 + 1;
                    let points = raw_case.points;
                    let (input, expected) = raw_case.into_data(position)?;
                    cases.push(Case {
                        position,
                        batch: None,
                        input,
                        expected,
                        points,
                        short_circuit: raw.short_circuit,
                    });
                }
            }
        }

        if cases.is_empty() {
            anyhow::bail!("Problem {} has no test cases", id);
        }

        debug!(
            "Resolved problem {}: {} cases in {} batches",
            id,
            cases.len(),
            batch_counter
        );

        Ok(Self {
            id,
            time_limit,
            memory_limit,
            checker: raw.checker,
            output_limit: raw.output_limit.unwrap_or(DEFAULT_OUTPUT_LIMIT),
            cases,
        })
    }

    /// Single unchecked case used for custom invocations
    pub fn invocation(time_limit: f64, memory_limit: u64, input: String) -> Self {
        Self {
            id: "CustomInvocation".to_string(),
            time_limit,
            memory_limit,
            checker: CheckerKind::Standard,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            cases: vec![Case {
                position: 1,
                batch: None,
                input: TestData::Inline(input),
                expected: TestData::Inline(String::new()),
                points: 0.0,
                short_circuit: false,
            }],
        }
    }

    pub fn batch_count(&self) -> usize {
        self.cases.iter().filter_map(|c| c.batch).max().unwrap_or(0) as usize
    }
}

#[derive(Debug, Deserialize)]
struct RawProblem {
    #[serde(default)]
    cases: Vec<RawEntry>,
    #[serde(default)]
    checker: CheckerKind,
    output_limit: Option<usize>,
    #[serde(default)]
    short_circuit: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Batch(RawBatch),
    Single(RawCase),
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    batched: Vec<RawCase>,
    #[serde(default)]
    points: f64,
    #[serde(default = "default_batch_short_circuit")]
    short_circuit: bool,
}

fn default_batch_short_circuit() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawCase {
    input: Option<String>,
    output: Option<String>,
    input_path: Option<String>,
    output_path: Option<String>,
    #[serde(default)]
    points: f64,
}

impl RawCase {
    fn into_data(self, position: u32) -> Result<(TestData, TestData)> {
        let input = match (self.input, self.input_path) {
            (Some(data), _) => TestData::Inline(data),
            (None, Some(path)) => TestData::Stored(path),
            (None, None) => anyhow::bail!("Case {} has no input", position),
        };
        let expected = match (self.output, self.output_path) {
            (Some(data), _) => TestData::Inline(data),
            (None, Some(path)) => TestData::Stored(path),
            (None, None) => anyhow::bail!("Case {} has no expected output", position),
        };
        Ok((input, expected))
    }
}

/// Turns a job into its problem
#[async_trait]
pub trait ProblemResolver: Send + Sync {
    async fn resolve(&self, job: &JudgeJob) -> Result<Problem>;

    /// Problem ids this worker can grade without a payload
    async fn supported_problems(&self) -> Result<Vec<i64>> {
        Ok(Vec::new())
    }
}

/// Resolves from the job payload, falling back to the local library
#[derive(Debug, Clone)]
pub struct PayloadResolver {
    library: Option<ProblemLibrary>,
    output_limit: usize,
}

impl PayloadResolver {
    pub fn new(library: Option<ProblemLibrary>) -> Self {
        Self {
            library,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Output cap for problems that do not set their own
    pub fn with_output_limit(mut self, output_limit: usize) -> Self {
        self.output_limit = output_limit;
        self
    }
}

#[async_trait]
impl ProblemResolver for PayloadResolver {
    async fn resolve(&self, job: &JudgeJob) -> Result<Problem> {
        let payload = match &job.problem_data {
            Value::Null => {
                let library = self.library.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Problem {} has no payload and no problem library is configured",
                        job.problem_id
                    )
                })?;
                library
                    .load(job.problem_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Unknown problem: {}", job.problem_id))?
            }
            payload => payload.clone(),
        };

        let mut problem = Problem::from_payload(
            job.problem_id.to_string(),
            job.time_limit,
            job.memory_limit,
            &payload,
        )?;
        if payload.get("output_limit").is_none() {
            problem.output_limit = self.output_limit;
        }
        Ok(problem)
    }

    async fn supported_problems(&self) -> Result<Vec<i64>> {
        match &self.library {
            Some(library) => library.supported().await,
            None => Ok(Vec::new()),
        }
    }
}

/// Directory of `<problem_id>/problem.json` payloads
#[derive(Debug, Clone)]
pub struct ProblemLibrary {
    root: PathBuf,
}

impl ProblemLibrary {
    const PAYLOAD_FILE: &'static str = "problem.json";

    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self, problem_id: i64) -> Result<Option<Value>> {
        let path = self
            .root
            .join(problem_id.to_string())
            .join(Self::PAYLOAD_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let payload = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {:?}", path))?;
        Ok(Some(payload))
    }

    /// Ids of every problem directory holding a payload, sorted
    pub async fn supported(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read problem library {:?}", self.root))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.parse::<i64>().ok()) else {
                continue;
            };
            if fs::try_exists(entry.path().join(Self::PAYLOAD_FILE))
                .await
                .unwrap_or(false)
            {
                ids.push(id);
            } else {
                warn!("Problem directory {:?} has no {}", entry.path(), Self::PAYLOAD_FILE);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }
}
