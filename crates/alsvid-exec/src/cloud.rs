//! Cloud proxy shim.
//!
//! The cloud endpoint is eager: one `POST /execute` call blocks until the
//! program has run and returns the complete result map. The node runner,
//! however, is written against the polling interface of the local service
//! (live progress loop, per-handle fetches). [`CloudJob`] and
//! [`CloudResultHandles`] normalize the eager response into that interface:
//!
//! - `is_processing()` reports `true` exactly once and `false` afterwards,
//!   so the runner's live-fetch loop executes a single cycle;
//! - `wait_for_all_values()` is a no-op — everything already arrived;
//! - `fetch()` serves the stored arrays;
//! - `count_so_far()` is `None` — the cloud does not track iterations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ndarray::ArrayD;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use alsvid_seq::Program;
use alsvid_state::{ControllerConfig, Network};

use crate::backend::{Backend, ResultHandle, ResultHandles};
use crate::error::{ExecError, ExecResult};
use crate::job::{JobId, JobStatus};
use crate::wire::ArrayPayload;

/// Default execution timeout forwarded in the request options, seconds.
const DEFAULT_TIMEOUT_S: u64 = 300;

/// Request body of the eager execute call.
#[derive(Debug, serde::Serialize)]
struct CloudExecuteRequest {
    backend: String,
    program: serde_json::Value,
    config: serde_json::Value,
    options: CloudOptions,
}

#[derive(Debug, serde::Serialize)]
struct CloudOptions {
    timeout: u64,
}

/// Response of the eager execute call: the full result map.
#[derive(Debug, serde::Deserialize)]
pub struct CloudRunData {
    #[serde(default)]
    pub id: Option<String>,
    pub result: BTreeMap<String, ArrayPayload>,
}

/// Client for the cloud proxy endpoint.
#[derive(Clone)]
pub struct CloudClient {
    client: Client,
    base_url: String,
    backend: String,
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend)
            .finish()
    }
}

impl CloudClient {
    /// Build a client from the persisted network block.
    ///
    /// `network.cloud_backend` names the quantum computer behind the proxy.
    pub fn from_network(network: &Network) -> ExecResult<Self> {
        let backend = network.cloud_backend.clone().unwrap_or_default();
        let port = network.port.unwrap_or(443);
        let base_url = format!("https://{}:{}", network.host, port);
        Self::new(base_url, backend)
    }

    /// Build a client against an explicit endpoint.
    pub fn new(base_url: impl Into<String>, backend: impl Into<String>) -> ExecResult<Self> {
        let client = Client::builder()
            // The execute call blocks for the whole run.
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_S + 60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backend: backend.into(),
        })
    }

    /// Execute a program eagerly and return the stored run data.
    #[instrument(skip(self, program, config))]
    pub async fn execute(
        &self,
        program: &Program,
        config: &ControllerConfig,
        timeout: Duration,
    ) -> ExecResult<CloudRunData> {
        program.validate()?;
        let url = format!("{}/execute", self.base_url);
        debug!("executing {} via cloud at {}", program.name, url);
        let body = CloudExecuteRequest {
            backend: self.backend.clone(),
            program: serde_json::to_value(program)?,
            config: serde_json::to_value(config)?,
            options: CloudOptions {
                timeout: timeout.as_secs(),
            },
        };
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExecError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

/// A completed cloud run wearing the polling interface.
pub struct CloudJob {
    pub id: JobId,
    handles: Arc<CloudResultHandles>,
}

impl CloudJob {
    /// Wrap an eager response.
    pub fn new(run_data: CloudRunData) -> Self {
        let id = run_data
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id: JobId::new(id),
            handles: Arc::new(CloudResultHandles::new(run_data.result)),
        }
    }

    /// The stored result handles.
    pub fn result_handles(&self) -> Arc<CloudResultHandles> {
        Arc::clone(&self.handles)
    }

    /// Execution report of the run.
    ///
    /// The cloud response carries none; the empty report keeps the runner's
    /// bookkeeping path uniform across backends.
    pub fn execution_report(&self) -> Option<String> {
        None
    }
}

/// Eager results behind the polling interface.
///
/// The one-shot `is_processing()` flag is atomic so the handles can be
/// shared between the progress loop and the fetch path.
pub struct CloudResultHandles {
    results: BTreeMap<String, ArrayPayload>,
    processing: AtomicBool,
}

impl CloudResultHandles {
    /// Wrap a stored result map.
    pub fn new(results: BTreeMap<String, ArrayPayload>) -> Self {
        Self {
            results,
            processing: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ResultHandles for CloudResultHandles {
    fn keys(&self) -> Vec<String> {
        self.results.keys().cloned().collect()
    }

    fn get(&self, name: &str) -> ExecResult<Box<dyn ResultHandle>> {
        let payload = self
            .results
            .get(name)
            .ok_or_else(|| ExecError::HandleNotFound(name.to_string()))?;
        Ok(Box::new(CloudResult {
            name: name.to_string(),
            payload: payload.clone(),
        }))
    }

    async fn is_processing(&self) -> ExecResult<bool> {
        // True exactly once: the runner's live loop gets one fetch cycle
        // against the already-complete data, then stops.
        Ok(self.processing.swap(false, Ordering::AcqRel))
    }

    async fn wait_for_all_values(&self) -> ExecResult<()> {
        Ok(())
    }
}

/// One stored result array.
#[derive(Debug)]
struct CloudResult {
    name: String,
    payload: ArrayPayload,
}

#[async_trait]
impl ResultHandle for CloudResult {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ExecResult<ArrayD<f64>> {
        self.payload.clone().into_array(&self.name)
    }

    async fn count_so_far(&self) -> ExecResult<Option<u64>> {
        Ok(None)
    }
}

/// Backend routing execution through the cloud proxy.
pub struct CloudBackend {
    client: CloudClient,
    timeout: Duration,
    jobs: Mutex<BTreeMap<JobId, Arc<CloudResultHandles>>>,
}

impl CloudBackend {
    /// Build from the persisted network block.
    pub fn from_network(network: &Network, timeout: Option<Duration>) -> ExecResult<Self> {
        Ok(Self {
            client: CloudClient::from_network(network)?,
            timeout: timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_S)),
            jobs: Mutex::new(BTreeMap::new()),
        })
    }

    /// Wrap an existing client.
    pub fn new(client: CloudClient, timeout: Option<Duration>) -> Self {
        Self {
            client,
            timeout: timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_S)),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Backend for CloudBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn submit(&self, program: &Program, config: &ControllerConfig) -> ExecResult<JobId> {
        // Eager: the job is already complete when submit returns.
        let run_data = self.client.execute(program, config, self.timeout).await?;
        let job = CloudJob::new(run_data);
        let id = job.id.clone();
        self.jobs.lock().await.insert(id.clone(), job.result_handles());
        Ok(id)
    }

    async fn status(&self, job: &JobId) -> ExecResult<JobStatus> {
        let jobs = self.jobs.lock().await;
        if jobs.contains_key(job) {
            Ok(JobStatus::Completed)
        } else {
            Err(ExecError::HandleNotFound(job.to_string()))
        }
    }

    async fn handles(&self, job: &JobId) -> ExecResult<Box<dyn ResultHandles>> {
        let jobs = self.jobs.lock().await;
        let handles = jobs
            .get(job)
            .ok_or_else(|| ExecError::HandleNotFound(job.to_string()))?;
        Ok(Box::new(SharedCloudHandles(Arc::clone(handles))))
    }

    async fn cancel(&self, _job: &JobId) -> ExecResult<()> {
        // Nothing to cancel; the run finished inside submit.
        Ok(())
    }

    async fn progress(&self, _job: &JobId, _counter: &str) -> ExecResult<Option<u64>> {
        Ok(None)
    }
}

/// Boxed view over shared cloud handles.
struct SharedCloudHandles(Arc<CloudResultHandles>);

#[async_trait]
impl ResultHandles for SharedCloudHandles {
    fn keys(&self) -> Vec<String> {
        self.0.keys()
    }

    fn get(&self, name: &str) -> ExecResult<Box<dyn ResultHandle>> {
        self.0.get(name)
    }

    async fn is_processing(&self) -> ExecResult<bool> {
        self.0.is_processing().await
    }

    async fn wait_for_all_values(&self) -> ExecResult<()> {
        self.0.wait_for_all_values().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_data() -> CloudRunData {
        let mut result = BTreeMap::new();
        result.insert(
            "state1".to_string(),
            ArrayPayload {
                shape: vec![2, 3],
                data: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            },
        );
        result.insert(
            "n".to_string(),
            ArrayPayload {
                shape: vec![],
                data: vec![100.0],
            },
        );
        CloudRunData {
            id: Some("run-7".into()),
            result,
        }
    }

    #[tokio::test]
    async fn test_is_processing_true_exactly_once() {
        let job = CloudJob::new(run_data());
        let handles = job.result_handles();
        assert!(handles.is_processing().await.unwrap());
        assert!(!handles.is_processing().await.unwrap());
        assert!(!handles.is_processing().await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_serves_stored_arrays() {
        let job = CloudJob::new(run_data());
        let handles = job.result_handles();
        let handle = handles.get("state1").unwrap();
        let array = handle.fetch().await.unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        // Fetch is repeatable.
        let again = handle.fetch().await.unwrap();
        assert_eq!(again, array);
    }

    #[tokio::test]
    async fn test_count_so_far_is_none() {
        let job = CloudJob::new(run_data());
        let handle = job.result_handles().get("n").unwrap();
        assert_eq!(handle.count_so_far().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wait_for_all_values_is_noop() {
        let job = CloudJob::new(run_data());
        job.result_handles().wait_for_all_values().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let job = CloudJob::new(run_data());
        let err = job.result_handles().get("missing").unwrap_err();
        assert!(matches!(err, ExecError::HandleNotFound(_)));
    }

    #[test]
    fn test_execution_report_is_empty() {
        let job = CloudJob::new(run_data());
        assert!(job.execution_report().is_none());
    }

    #[test]
    fn test_run_data_parses_without_id() {
        let json = r#"{"result": {"state1": {"shape": [2], "data": [0.0, 1.0]}}}"#;
        let run: CloudRunData = serde_json::from_str(json).unwrap();
        assert!(run.id.is_none());
        let job = CloudJob::new(run);
        assert!(!job.id.0.is_empty());
    }
}
