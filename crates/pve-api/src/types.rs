use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Tasks ────────────────────────────────────────────────────────────

/// Reply to a state-changing request.
///
/// `data` carries the task handle (`UPID:...`) when the server queued a task.
/// It is `null` or absent when the request completed synchronously or was a
/// no-op.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskSubmission {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl TaskSubmission {
    /// Serialized `errors` payload, if the server rejected the request.
    pub fn rejection(&self) -> Option<String> {
        match &self.errors {
            None | Some(Value::Null) => None,
            Some(errors) => {
                Some(serde_json::to_string_pretty(errors).unwrap_or_else(|_| errors.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    pub data: TaskStatus,
}

/// `GET /nodes/{node}/tasks/{upid}/status`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskStatus {
    /// `running` or `stopped`.
    #[serde(default)]
    pub status: Option<String>,
    /// Absent while the task is running; `OK` on success.
    #[serde(default)]
    pub exitstatus: Option<String>,
}

// ── Storage ──────────────────────────────────────────────────────────

/// Reply to `POST /nodes/{node}/storage/{storage}/content`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskCreation {
    /// Full volume id, `storage:volume`.
    #[serde(default)]
    pub data: Option<String>,
}

// ── Cluster ──────────────────────────────────────────────────────────

/// Reply to `GET /cluster/nextid`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdAllocation {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl IdAllocation {
    pub fn is_error(&self) -> bool {
        !matches!(self.errors, None | Some(Value::Null))
    }
}

/// Entry of `GET /cluster/resources?type=vm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResource {
    /// `qemu/101`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub template: Option<u8>,
}

/// Entry of `GET /nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub maxcpu: Option<u32>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

// ── Envelopes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataResponse<T> {
    pub data: Option<T>,
}
