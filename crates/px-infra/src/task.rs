use std::fmt;
use std::time::Duration;

use pve_api::{TaskStatusResponse, TaskSubmission, Transport, path_segment};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Default budget for a single task wait.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time between two status queries.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

const EXIT_STATUS_OK: &str = "OK";

/// Server-issued task identifier, `UPID:<node>:<pid>:<pstart>:<starttime>:<type>:<id>:<user>:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    upid: String,
    node: String,
}

impl TaskHandle {
    /// Parse a handle, extracting the node it runs on.
    pub fn parse(upid: impl Into<String>) -> Result<Self> {
        let upid = upid.into();
        let node = task_node(&upid)
            .ok_or_else(|| Error::MalformedTaskHandle(upid.clone()))?
            .to_string();
        Ok(Self { upid, node })
    }

    pub fn as_str(&self) -> &str {
        &self.upid
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    fn status_path(&self) -> String {
        format!(
            "/nodes/{}/tasks/{}/status",
            path_segment(&self.node),
            path_segment(&self.upid)
        )
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.upid)
    }
}

/// The text between the first and second `:` of a `UPID:` handle.
pub fn task_node(upid: &str) -> Option<&str> {
    let (node, _) = upid.strip_prefix("UPID:")?.split_once(':')?;
    (!node.is_empty()).then_some(node)
}

/// How a submitted request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Exit status `OK`.
    Success,
    /// The task ran and reported this exit status.
    Failed {
        handle: TaskHandle,
        exit_status: String,
    },
    /// No exit status within the wait budget. The task may still finish;
    /// pass `handle` to `TaskPoller::wait_handle` to keep waiting.
    TimedOut { handle: TaskHandle, waited: Duration },
    /// The server refused the request; carries the serialized `errors` payload.
    SubmissionError(String),
    /// The server queued no task, e.g. a request that was a no-op.
    NoTask,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The task behind a failed or timed-out outcome.
    pub fn handle(&self) -> Option<&TaskHandle> {
        match self {
            Self::Failed { handle, .. } | Self::TimedOut { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Treat everything except `Success` and `NoTask` as an error.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Success | Self::NoTask => Ok(()),
            Self::Failed {
                handle,
                exit_status,
            } => Err(Error::TaskFailed {
                upid: handle.upid,
                exit_status,
            }),
            Self::TimedOut { handle, waited } => Err(Error::TimedOut {
                upid: handle.upid,
                waited,
            }),
            Self::SubmissionError(errors) => Err(Error::SubmissionRejected(errors)),
        }
    }
}

/// Drives a task handle to a terminal exit status.
#[derive(Debug, Clone, Copy)]
pub struct TaskPoller {
    timeout: Duration,
    interval: Duration,
}

impl Default for TaskPoller {
    fn default() -> Self {
        Self::new(TASK_TIMEOUT, POLL_INTERVAL)
    }
}

impl TaskPoller {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decode a raw submission reply and wait on the task it names.
    pub async fn wait_raw(&self, transport: &dyn Transport, body: &str) -> Result<TaskOutcome> {
        let submission: TaskSubmission = pve_api::decode(body)?;
        self.wait(transport, &submission).await
    }

    /// Poll the task named by `submission` until it exits or the budget runs out.
    pub async fn wait(
        &self,
        transport: &dyn Transport,
        submission: &TaskSubmission,
    ) -> Result<TaskOutcome> {
        if let Some(errors) = submission.rejection() {
            warn!(errors = %errors, "task submission rejected");
            return Ok(TaskOutcome::SubmissionError(errors));
        }

        let Some(upid) = &submission.data else {
            debug!("submission queued no task");
            return Ok(TaskOutcome::NoTask);
        };
        let handle = TaskHandle::parse(upid.as_str())?;
        self.wait_handle(transport, &handle).await
    }

    /// Poll an already known task, e.g. one that timed out earlier.
    ///
    /// Waiting time accrues one poll interval per unanswered status query, so
    /// a budget of `timeout` allows `ceil(timeout / interval)` queries. A status
    /// query whose body was cut short is retried on the next tick; any other
    /// query failure ends the wait with that error.
    pub async fn wait_handle(
        &self,
        transport: &dyn Transport,
        handle: &TaskHandle,
    ) -> Result<TaskOutcome> {
        let mut waited = Duration::ZERO;
        while waited < self.timeout {
            match exit_status(transport, handle).await {
                Ok(Some(status)) if status == EXIT_STATUS_OK => {
                    info!(upid = %handle, ?waited, "task finished");
                    return Ok(TaskOutcome::Success);
                }
                Ok(Some(status)) => {
                    warn!(upid = %handle, exit_status = %status, "task failed");
                    return Ok(TaskOutcome::Failed {
                        handle: handle.clone(),
                        exit_status: status,
                    });
                }
                Ok(None) => debug!(upid = %handle, ?waited, "task still running"),
                Err(e) if e.is_truncated() => {
                    warn!(upid = %handle, error = %e, "truncated task status, polling again");
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.interval).await;
            waited += self.interval;
        }

        warn!(upid = %handle, ?waited, "timed out waiting for task");
        Ok(TaskOutcome::TimedOut {
            handle: handle.clone(),
            waited,
        })
    }
}

async fn exit_status(
    transport: &dyn Transport,
    handle: &TaskHandle,
) -> pve_api::Result<Option<String>> {
    let value = transport.get_json(&handle.status_path()).await?;
    let resp: TaskStatusResponse = pve_api::decode_value(value)?;
    Ok(resp.data.exitstatus.filter(|s| !s.is_empty()))
}
