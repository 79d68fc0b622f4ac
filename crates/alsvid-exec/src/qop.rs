//! Client for the local quantum-orchestration service.
//!
//! ## Submission flow
//!
//! 1. `POST /machines` with the cluster name and controller config — blocks
//!    (client-side retry loop) until the machine is free or the session
//!    queue timeout elapses.
//! 2. `POST /machines/{id}/jobs` with the program JSON — get `job_id`.
//! 3. Poll `GET /jobs/{id}/status` and `GET /jobs/{id}/progress/{counter}`.
//! 4. Fetch named results from `GET /jobs/{id}/results/{name}`.
//! 5. `DELETE /machines/{id}` — best-effort close, logged, never fatal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::ArrayD;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use alsvid_seq::Program;
use alsvid_state::{ControllerConfig, Network};

use crate::backend::{Backend, POLL_INTERVAL, ResultHandle, ResultHandles};
use crate::error::{ExecError, ExecResult};
use crate::job::{JobId, JobStatus};
use crate::wire::{
    ExecuteRequest, ExecuteResponse, FetchResponse, HandleListResponse, JobStatusResponse,
    OpenMachineRequest, OpenMachineResponse, ProgressResponse,
};

/// HTTP client against the orchestration endpoint.
#[derive(Clone)]
pub struct QopClient {
    client: Client,
    base_url: String,
    cluster: String,
}

impl std::fmt::Debug for QopClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QopClient")
            .field("base_url", &self.base_url)
            .field("cluster", &self.cluster)
            .finish()
    }
}

impl QopClient {
    /// Build a client from the persisted network block.
    pub fn from_network(network: &Network) -> ExecResult<Self> {
        let port = network.port.unwrap_or(80);
        let base_url = format!("http://{}:{}", network.host, port);
        Self::new(base_url, network.cluster_name.clone())
    }

    /// Build a client against an explicit endpoint.
    pub fn new(base_url: impl Into<String>, cluster: impl Into<String>) -> ExecResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cluster: cluster.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Open a machine, waiting out the session queue.
    ///
    /// The service answers 409 while another session holds the machine; the
    /// client retries until `queue_timeout` elapses.
    #[instrument(skip(self, config))]
    pub async fn open_machine(
        &self,
        config: &ControllerConfig,
        queue_timeout: Duration,
    ) -> ExecResult<String> {
        let url = self.url("/machines");
        let body = OpenMachineRequest {
            cluster: self.cluster.clone(),
            config: serde_json::to_value(config)?,
        };
        let deadline = tokio::time::Instant::now() + queue_timeout;
        loop {
            debug!("opening machine at {}", url);
            let response = self.client.post(&url).json(&body).send().await?;
            match response.status() {
                StatusCode::CONFLICT => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ExecError::SessionQueueTimeout(queue_timeout.as_secs()));
                    }
                    sleep(POLL_INTERVAL).await;
                }
                StatusCode::UNPROCESSABLE_ENTITY => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ExecError::ConfigRejected(message));
                }
                _ => {
                    let opened: OpenMachineResponse = handle_response(response).await?;
                    return Ok(opened.machine_id);
                }
            }
        }
    }

    /// Execute a program on an open machine.
    #[instrument(skip(self, program))]
    pub async fn execute(&self, machine_id: &str, program: &Program) -> ExecResult<JobId> {
        program.validate()?;
        let url = self.url(&format!("/machines/{machine_id}/jobs"));
        debug!("executing {} at {}", program.name, url);
        let body = ExecuteRequest {
            program: serde_json::to_value(program)?,
        };
        let response = self.client.post(&url).json(&body).send().await?;
        if response.status() == StatusCode::BAD_REQUEST {
            let message = response.text().await.unwrap_or_default();
            return Err(ExecError::SubmissionRejected(message));
        }
        let executed: ExecuteResponse = handle_response(response).await?;
        Ok(JobId::new(executed.job_id))
    }

    /// Current status of a job.
    #[instrument(skip(self))]
    pub async fn job_status(&self, job: &JobId) -> ExecResult<JobStatusResponse> {
        let url = self.url(&format!("/jobs/{job}/status"));
        let response = self.client.get(&url).send().await?;
        handle_response(response).await
    }

    /// Live progress of a counter stream.
    #[instrument(skip(self))]
    pub async fn progress(&self, job: &JobId, counter: &str) -> ExecResult<Option<u64>> {
        let url = self.url(&format!("/jobs/{job}/progress/{counter}"));
        let response = self.client.get(&url).send().await?;
        let progress: ProgressResponse = handle_response(response).await?;
        Ok(progress.count)
    }

    /// Names of the result handles on a job.
    #[instrument(skip(self))]
    pub async fn list_handles(&self, job: &JobId) -> ExecResult<Vec<String>> {
        let url = self.url(&format!("/jobs/{job}/results"));
        let response = self.client.get(&url).send().await?;
        let list: HandleListResponse = handle_response(response).await?;
        Ok(list.handles)
    }

    /// Fetch one named result.
    #[instrument(skip(self))]
    pub async fn fetch(&self, job: &JobId, name: &str) -> ExecResult<FetchResponse> {
        let url = self.url(&format!("/jobs/{job}/results/{name}"));
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ExecError::HandleNotFound(name.to_string()));
        }
        handle_response(response).await
    }

    /// Cancel a job.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job: &JobId) -> ExecResult<()> {
        let url = self.url(&format!("/jobs/{job}/cancel"));
        let response = self.client.post(&url).json(&serde_json::json!({})).send().await?;
        let _: serde_json::Value = handle_response(response).await?;
        Ok(())
    }

    /// Close a machine. Best-effort: failures are logged, never returned.
    #[instrument(skip(self))]
    pub async fn close_machine(&self, machine_id: &str) {
        let url = self.url(&format!("/machines/{machine_id}"));
        match self.client.delete(&url).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(machine_id, status = %response.status(), "machine close rejected");
            }
            Err(e) => warn!(machine_id, error = %e, "machine close failed"),
            Ok(_) => debug!(machine_id, "machine closed"),
        }
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> ExecResult<T> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(ExecError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Backend driving the local orchestration service.
///
/// Each submit opens a machine session (waiting out the queue) and the
/// session is released with [`Backend::release`] once the caller is done
/// with the job.
pub struct QopBackend {
    client: QopClient,
    queue_timeout: Duration,
    sessions: Mutex<HashMap<JobId, String>>,
}

impl QopBackend {
    /// Build from the persisted network block.
    pub fn from_network(network: &Network, queue_timeout: Duration) -> ExecResult<Self> {
        Ok(Self {
            client: QopClient::from_network(network)?,
            queue_timeout,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Wrap an existing client.
    pub fn new(client: QopClient, queue_timeout: Duration) -> Self {
        Self {
            client,
            queue_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Release the machine session behind a job. Best-effort.
    pub async fn release_session(&self, job: &JobId) {
        if let Some(machine_id) = self.sessions.lock().await.remove(job) {
            self.client.close_machine(&machine_id).await;
        }
    }
}

#[async_trait]
impl Backend for QopBackend {
    fn name(&self) -> &str {
        "qop"
    }

    async fn submit(&self, program: &Program, config: &ControllerConfig) -> ExecResult<JobId> {
        let machine_id = self.client.open_machine(config, self.queue_timeout).await?;
        let job = match self.client.execute(&machine_id, program).await {
            Ok(job) => job,
            Err(e) => {
                self.client.close_machine(&machine_id).await;
                return Err(e);
            }
        };
        self.sessions.lock().await.insert(job.clone(), machine_id);
        Ok(job)
    }

    async fn status(&self, job: &JobId) -> ExecResult<JobStatus> {
        Ok(self.client.job_status(job).await?.to_status())
    }

    async fn handles(&self, job: &JobId) -> ExecResult<Box<dyn ResultHandles>> {
        let names = self.client.list_handles(job).await?;
        Ok(Box::new(QopResultHandles {
            client: self.client.clone(),
            job: job.clone(),
            names,
        }))
    }

    async fn cancel(&self, job: &JobId) -> ExecResult<()> {
        self.client.cancel(job).await
    }

    async fn progress(&self, job: &JobId, counter: &str) -> ExecResult<Option<u64>> {
        self.client.progress(job, counter).await
    }

    async fn release(&self, job: &JobId) {
        self.release_session(job).await;
    }
}

/// On-demand handles backed by the service.
struct QopResultHandles {
    client: QopClient,
    job: JobId,
    names: Vec<String>,
}

#[async_trait]
impl ResultHandles for QopResultHandles {
    fn keys(&self) -> Vec<String> {
        self.names.clone()
    }

    fn get(&self, name: &str) -> ExecResult<Box<dyn ResultHandle>> {
        if !self.names.iter().any(|n| n == name) {
            return Err(ExecError::HandleNotFound(name.to_string()));
        }
        Ok(Box::new(QopResultHandle {
            client: self.client.clone(),
            job: self.job.clone(),
            name: name.to_string(),
        }))
    }

    async fn is_processing(&self) -> ExecResult<bool> {
        Ok(self.client.job_status(&self.job).await?.processing)
    }

    async fn wait_for_all_values(&self) -> ExecResult<()> {
        loop {
            let status = self.client.job_status(&self.job).await?;
            match status.to_status() {
                JobStatus::Failed(msg) => return Err(ExecError::JobFailed(msg)),
                JobStatus::Cancelled => return Err(ExecError::JobCancelled),
                _ if !status.processing => return Ok(()),
                _ => sleep(POLL_INTERVAL).await,
            }
        }
    }
}

#[derive(Debug)]
struct QopResultHandle {
    client: QopClient,
    job: JobId,
    name: String,
}

#[async_trait]
impl ResultHandle for QopResultHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ExecResult<ArrayD<f64>> {
        let response = self.client.fetch(&self.job, &self.name).await?;
        response.payload.into_array(&self.name)
    }

    async fn count_so_far(&self) -> ExecResult<Option<u64>> {
        Ok(self.client.fetch(&self.job, &self.name).await?.count_so_far)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_network_builds_url() {
        let network = Network {
            host: "10.1.1.5".into(),
            port: Some(9510),
            cluster_name: "cluster_1".into(),
            cloud: false,
            cloud_backend: None,
            data_folder: std::path::PathBuf::from("/tmp"),
        };
        let client = QopClient::from_network(&network).unwrap();
        assert_eq!(client.url("/machines"), "http://10.1.1.5:9510/machines");
    }

    #[test]
    fn test_default_port() {
        let client = QopClient::new("http://host/", "c").unwrap();
        assert_eq!(client.url("/jobs/1/status"), "http://host/jobs/1/status");
    }
}
