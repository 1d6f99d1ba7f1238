//! Client for the external pipeline engine that segments raw recordings into
//! per-frequency trial CSVs.
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::params::Frequency;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Turns one raw recording into `<label>.csv` files in an output directory.
pub trait Segmenter: Send + Sync {
    fn segment(&self, request: &SegmentationRequest) -> Result<()>;
}

/// Everything the engine needs to segment one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationRequest {
    pub source_file: PathBuf,
    pub frequencies: Vec<Frequency>,
    pub time_window: [f64; 2],
    pub output_dir: PathBuf,
}

impl SegmentationRequest {
    /// Parameter payload loaded into the engine's pipeline graph.
    pub fn engine_parameters(&self) -> Value {
        let rules: Vec<Value> = self
            .frequencies
            .iter()
            .map(|f| {
                json!({
                    "name": format!("{}.csv", f.label()),
                    "rule": {
                        format!("trial-start-{}-hz", f.0): "target-trial-begin",
                        format!("trial-end-{}-hz", f.0): "target-trial-end",
                    }
                })
            })
            .collect();
        json!({
            "filename": self.source_file.to_string_lossy(),
            "hz": rules,
            "secs": self.time_window,
            "path": self.output_dir.to_string_lossy(),
        })
    }
}

/// How long to wait for an execution to report completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Identifier the engine assigns to an execution; numeric or textual.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExecutionId {
    Number(u64),
    Text(String),
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionId::Number(n) => write!(f, "{n}"),
            ExecutionId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Deserialize)]
struct CreatedExecution {
    id: Option<ExecutionId>,
}

#[derive(Deserialize)]
struct ExecutionState {
    completed: Option<bool>,
}

/// HTTP client for the engine's `/executions` API.
pub struct EngineClient {
    client: Client,
    executions_url: String,
    pipeline_file: PathBuf,
    poll: PollPolicy,
}

impl EngineClient {
    /// Client for the engine at `base_url`. Every request is bounded by
    /// `request_timeout`; completion polling follows `poll`.
    pub fn new(base_url: &str, pipeline_file: &Path, request_timeout: Duration, poll: PollPolicy) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            executions_url: format!("{}/executions", base_url.trim_end_matches('/')),
            pipeline_file: pipeline_file.to_path_buf(),
            poll,
        })
    }

    /// Collection URL all execution requests are built from.
    pub fn executions_url(&self) -> &str {
        &self.executions_url
    }

    /// Creates an empty execution and returns its id.
    pub fn create_execution(&self) -> Result<ExecutionId> {
        let created: CreatedExecution = self
            .client
            .post(&self.executions_url)
            .json(&json!({}))
            .send()?
            .error_for_status()?
            .json()?;
        created
            .id
            .ok_or_else(|| Error::Engine("create execution response has no id".into()))
    }

    /// Loads the pipeline graph file into the execution.
    pub fn load_graph(&self, id: &ExecutionId) -> Result<()> {
        self.load(
            id,
            &json!({ "file": self.pipeline_file.to_string_lossy(), "what": "graph" }),
        )
    }

    /// Loads the segmentation parameters into the graph.
    pub fn load_parameters(&self, id: &ExecutionId, parameters: Value) -> Result<()> {
        self.load(
            id,
            &json!({ "what": "parameters", "data": { "data": { "value": parameters } } }),
        )
    }

    fn load(&self, id: &ExecutionId, body: &Value) -> Result<()> {
        self.client
            .post(format!("{}/{}/actions/load", self.executions_url, id))
            .json(body)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    /// Sets the execution running.
    pub fn start(&self, id: &ExecutionId) -> Result<()> {
        self.client
            .patch(format!("{}/{}/state", self.executions_url, id))
            .json(&json!({ "running": true, "paused": false }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    /// Reads the execution's `completed` flag.
    pub fn is_completed(&self, id: &ExecutionId) -> Result<bool> {
        let state: ExecutionState = self
            .client
            .get(format!("{}/{}/state", self.executions_url, id))
            .send()?
            .error_for_status()?
            .json()?;
        state
            .completed
            .ok_or_else(|| Error::Engine(format!("state of execution {id} has no completed flag")))
    }

    /// Polls until the execution reports completion or the policy's timeout elapses.
    pub fn wait_for_completion(&self, id: &ExecutionId) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.is_completed(id)? {
                debug!("Execution {} completed after {:?}", id, started.elapsed());
                return Ok(());
            }
            if let Some(timeout) = self.poll.timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(Error::EngineTimeout {
                        execution: id.to_string(),
                        waited,
                    });
                }
            }
            thread::sleep(self.poll.interval);
        }
    }

    /// Removes the execution from the engine.
    pub fn delete(&self, id: &ExecutionId) -> Result<()> {
        self.client
            .delete(format!("{}/{}", self.executions_url, id))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn run_execution(&self, id: &ExecutionId, request: &SegmentationRequest) -> Result<()> {
        self.load_graph(id)?;
        self.load_parameters(id, request.engine_parameters())?;
        self.start(id)?;
        self.wait_for_completion(id)
    }
}

impl Segmenter for EngineClient {
    fn segment(&self, request: &SegmentationRequest) -> Result<()> {
        std::fs::create_dir_all(&request.output_dir)?;

        let id = self.create_execution()?;
        info!("Segmenting {:?} in execution {}", request.source_file, id);

        let outcome = self.run_execution(&id, request);
        let deleted = self.delete(&id);

        match (outcome, deleted) {
            (Ok(()), deleted) => deleted,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(delete_err)) => {
                warn!("Failed to delete execution {} after error: {}", id, delete_err);
                Err(e)
            }
        }
    }
}
