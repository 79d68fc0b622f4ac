//! Wire types shared by the local service client and the cloud proxy.
//!
//! Arrays travel as a flat value list plus an explicit shape; the vendor
//! formats are out of scope, so this is the minimal JSON surface both
//! endpoints speak.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};

/// A shaped array payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayPayload {
    /// Axis lengths, outermost first. Empty for scalars.
    #[serde(default)]
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f64>,
}

impl ArrayPayload {
    /// Wrap an array into a payload.
    pub fn from_array(array: &ArrayD<f64>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    /// Decode into an n-dimensional array, checking the element count.
    pub fn into_array(self, name: &str) -> ExecResult<ArrayD<f64>> {
        let want: usize = self.shape.iter().product::<usize>().max(1);
        if self.data.len() != want {
            return Err(ExecError::ShapeMismatch {
                name: name.to_string(),
                got: self.data.len(),
                want,
                shape: self.shape,
            });
        }
        let shape = if self.shape.is_empty() {
            vec![1]
        } else {
            self.shape
        };
        ArrayD::from_shape_vec(shape, self.data).map_err(|e| ExecError::Api {
            status: 0,
            message: format!("result {name}: {e}"),
        })
    }
}

/// Request to open a machine on the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenMachineRequest {
    pub cluster: String,
    pub config: serde_json::Value,
}

/// Response to opening a machine.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenMachineResponse {
    pub machine_id: String,
}

/// Request to execute a program on an open machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub program: serde_json::Value,
}

/// Response to an execute request.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub job_id: String,
}

/// Job status as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    /// queued | running | completed | failed | cancelled.
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    /// Whether result streams are still filling.
    #[serde(default)]
    pub processing: bool,
}

impl JobStatusResponse {
    /// Map the status string into the typed state.
    pub fn to_status(&self) -> crate::job::JobStatus {
        use crate::job::JobStatus;
        match self.status.to_lowercase().as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "cancelled" | "cancelling" => JobStatus::Cancelled,
            _ => JobStatus::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("unknown status: {}", self.status)),
            ),
        }
    }
}

/// Live progress of a named counter stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressResponse {
    #[serde(default)]
    pub count: Option<u64>,
}

/// One named result with its completion counter.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchResponse {
    #[serde(flatten)]
    pub payload: ArrayPayload,
    /// Completed outer iterations, when the service tracks them.
    #[serde(default)]
    pub count_so_far: Option<u64>,
}

/// The names available on a job.
#[derive(Debug, Clone, Deserialize)]
pub struct HandleListResponse {
    pub handles: Vec<String>,
}
