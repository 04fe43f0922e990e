use std::fmt;
use std::sync::Arc;

use pve_api::{
    ClusterResource, DataResponse, IdAllocation, ListResponse, Method, NodeEntry, Params,
    Session, TaskSubmission, Transport, path_segment,
};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::fetch::READ_ATTEMPTS;
use crate::vm::{SizeDelta, VmKind, VmRef};
use crate::{
    Configuration, Error, OperationClass, OperationGates, Result, RetryableFetch, TaskHandle,
    TaskOutcome, TaskPoller,
};

/// Submit-and-wait cycles attempted by a status change before giving up.
pub const STATUS_CHANGE_ATTEMPTS: u32 = 3;

/// Disk targeted by a resize when the caller names none.
pub const DEFAULT_RESIZE_DISK: &str = "virtio0";

/// Power actions accepted by `/status/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Start,
    Stop,
    Shutdown,
    Reset,
    Suspend,
    Resume,
}

impl StatusAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Shutdown => "shutdown",
            Self::Reset => "reset",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for StatusAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VM lifecycle operations against one Proxmox VE cluster.
///
/// Share one `Client` (behind an `Arc`) between concurrent callers so the
/// clone and resize gates apply client-wide. A `VmRef` must not be handed to
/// two operations at once.
pub struct Client {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) gates: OperationGates,
    pub(crate) poller: TaskPoller,
    pub(crate) fetch: RetryableFetch,
}

impl Client {
    /// Client over an HTTP `Session` built from `config`.
    pub fn new(config: &Configuration) -> Result<Self> {
        let session = Session::new(config.session_options())?;
        Ok(Self::with_transport(config, Arc::new(session)))
    }

    pub fn with_transport(config: &Configuration, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            gates: OperationGates::from_config(config),
            poller: TaskPoller::default(),
            fetch: RetryableFetch::default(),
        }
    }

    pub fn with_poller(mut self, poller: TaskPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_fetch(mut self, fetch: RetryableFetch) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn gates(&self) -> &OperationGates {
        &self.gates
    }

    // ── Inventory ───────────────────────────────────────────────────

    pub async fn list_nodes(&self) -> Result<Vec<NodeEntry>> {
        let resp: ListResponse<NodeEntry> = self
            .fetch
            .fetch(&*self.transport, "/nodes", READ_ATTEMPTS)
            .await?;
        Ok(resp.data)
    }

    pub async fn list_vms(&self) -> Result<Vec<ClusterResource>> {
        let resp: ListResponse<ClusterResource> = self
            .fetch
            .fetch(&*self.transport, "/cluster/resources?type=vm", READ_ATTEMPTS)
            .await?;
        Ok(resp.data)
    }

    /// Inventory entry for `vmr`. Fills in its node and kind.
    pub async fn vm_info(&self, vmr: &mut VmRef) -> Result<ClusterResource> {
        let entry = self
            .list_vms()
            .await?
            .into_iter()
            .find(|vm| vm.vmid == Some(vmr.id()))
            .ok_or(Error::VmNotFound(vmr.id()))?;

        let node = entry.node.clone().ok_or_else(|| {
            Error::UnexpectedResponse(format!("vm {} has no node in inventory", vmr.id()))
        })?;
        let kind: VmKind = entry.kind.parse()?;

        vmr.set_node(node);
        vmr.set_kind(kind);
        Ok(entry)
    }

    /// Look up node and kind of `vmr` unless both are already known.
    pub async fn resolve(&self, vmr: &mut VmRef) -> Result<()> {
        if !vmr.is_resolved() {
            self.vm_info(vmr).await?;
        }
        Ok(())
    }

    /// First VM in the inventory carrying `name`, already resolved.
    pub async fn vm_ref_by_name(&self, name: &str) -> Result<VmRef> {
        let vms = self.list_vms().await?;
        let entry = vms
            .iter()
            .find(|vm| vm.name.as_deref() == Some(name))
            .ok_or_else(|| Error::VmNameNotFound(name.to_string()))?;

        match (entry.vmid, &entry.node) {
            (Some(id), Some(node)) => Ok(VmRef::located(id, node, entry.kind.parse()?)),
            _ => Err(Error::UnexpectedResponse(format!(
                "vm '{name}' has an incomplete inventory entry"
            ))),
        }
    }

    pub async fn vm_state(&self, vmr: &mut VmRef) -> Result<Map<String, Value>> {
        self.resolve(vmr).await?;
        let path = format!("{}/status/current", vmr.api_path()?);
        let resp: DataResponse<Map<String, Value>> = self
            .fetch
            .fetch(&*self.transport, &path, READ_ATTEMPTS)
            .await?;
        resp.data
            .ok_or_else(|| Error::UnexpectedResponse("vm state not readable".into()))
    }

    pub async fn vm_config(&self, vmr: &mut VmRef) -> Result<Map<String, Value>> {
        self.resolve(vmr).await?;
        let path = format!("{}/config", vmr.api_path()?);
        let resp: DataResponse<Map<String, Value>> = self
            .fetch
            .fetch(&*self.transport, &path, READ_ATTEMPTS)
            .await?;
        resp.data
            .ok_or_else(|| Error::UnexpectedResponse("vm config not readable".into()))
    }

    /// Run a QEMU monitor command and return the decoded reply.
    pub async fn monitor_command(&self, vmr: &mut VmRef, command: &str) -> Result<Value> {
        self.resolve(vmr).await?;
        let path = format!("{}/monitor", vmr.api_path()?);
        let params = Params::from([("command".to_string(), json!(command))]);
        let body = self.transport.post(&path, Some(&params)).await?;
        Ok(pve_api::decode(&body)?)
    }

    // ── Task plumbing ───────────────────────────────────────────────

    /// Send a state-changing request, under the gate for `class`.
    ///
    /// The gate covers the submission only; waiting on the task happens
    /// outside it.
    async fn submit(
        &self,
        class: OperationClass,
        method: Method,
        path: &str,
        params: Option<&Params>,
    ) -> Result<TaskSubmission> {
        let body = self
            .gates
            .run(class, self.transport.request(method, path, params))
            .await?;
        Ok(pve_api::decode(&body)?)
    }

    pub(crate) async fn run_task(
        &self,
        class: OperationClass,
        method: Method,
        path: &str,
        params: Option<&Params>,
    ) -> Result<TaskOutcome> {
        let submission = self.submit(class, method, path, params).await?;
        self.poller.wait(&*self.transport, &submission).await
    }

    /// Keep waiting on a task whose earlier wait timed out.
    pub async fn wait_task(&self, handle: &TaskHandle) -> Result<TaskOutcome> {
        self.poller.wait_handle(&*self.transport, handle).await
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Change the power state of a VM.
    ///
    /// The whole submit-and-wait cycle is repeated up to
    /// `STATUS_CHANGE_ATTEMPTS` times while it ends without a task, with a
    /// failed or timed-out task, or with a transport error. Success and
    /// rejected submissions return at once.
    pub async fn change_status(&self, vmr: &mut VmRef, action: StatusAction) -> Result<TaskOutcome> {
        self.resolve(vmr).await?;
        let path = format!("{}/status/{action}", vmr.api_path()?);

        let mut attempt = 1;
        loop {
            let result = self
                .run_task(OperationClass::Unrestricted, Method::POST, &path, None)
                .await;

            let retry = match &result {
                Ok(TaskOutcome::Success | TaskOutcome::SubmissionError(_)) => false,
                Ok(_) => true,
                Err(e) => e.is_transport(),
            };
            if !retry || attempt >= STATUS_CHANGE_ATTEMPTS {
                if let Ok(outcome) = &result {
                    info!(vmid = vmr.id(), %action, ?outcome, "status change finished");
                }
                return result;
            }

            warn!(vmid = vmr.id(), %action, attempt, result = ?result, "status change incomplete, retrying");
            tokio::time::sleep(self.poller.interval()).await;
            attempt += 1;
        }
    }

    pub async fn start_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.change_status(vmr, StatusAction::Start).await
    }

    pub async fn stop_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.change_status(vmr, StatusAction::Stop).await
    }

    pub async fn shutdown_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.change_status(vmr, StatusAction::Shutdown).await
    }

    pub async fn reset_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.change_status(vmr, StatusAction::Reset).await
    }

    pub async fn suspend_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.change_status(vmr, StatusAction::Suspend).await
    }

    pub async fn resume_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.change_status(vmr, StatusAction::Resume).await
    }

    pub async fn delete_vm(&self, vmr: &mut VmRef) -> Result<TaskOutcome> {
        self.resolve(vmr).await?;
        let path = vmr.api_path()?;
        let outcome = self
            .run_task(OperationClass::Unrestricted, Method::DELETE, &path, None)
            .await?;
        info!(vmid = vmr.id(), ?outcome, "vm delete finished");
        Ok(outcome)
    }

    /// Clone `vmr`; `params` carries at least `newid`.
    pub async fn clone_vm(&self, vmr: &mut VmRef, params: &Params) -> Result<TaskOutcome> {
        self.resolve(vmr).await?;
        let path = format!("{}/clone", vmr.api_path()?);
        let outcome = self
            .run_task(OperationClass::Clone, Method::POST, &path, Some(params))
            .await?;
        info!(vmid = vmr.id(), newid = ?params.get("newid"), ?outcome, "vm clone finished");
        Ok(outcome)
    }

    /// Grow (or shrink) a disk by `delta`. `disk` defaults to `virtio0`.
    pub async fn resize_disk(
        &self,
        vmr: &mut VmRef,
        disk: Option<&str>,
        delta: SizeDelta,
    ) -> Result<TaskOutcome> {
        self.resolve(vmr).await?;
        let path = format!("{}/resize", vmr.api_path()?);
        let disk = disk.unwrap_or(DEFAULT_RESIZE_DISK);
        let params = Params::from([
            ("disk".to_string(), json!(disk)),
            ("size".to_string(), json!(delta.to_string())),
        ]);

        let outcome = self
            .run_task(OperationClass::Resize, Method::PUT, &path, Some(&params))
            .await?;
        info!(vmid = vmr.id(), disk, size = %delta, ?outcome, "disk resize finished");
        Ok(outcome)
    }

    pub async fn set_vm_config(&self, vmr: &mut VmRef, params: &Params) -> Result<TaskOutcome> {
        self.resolve(vmr).await?;
        let path = format!("{}/config", vmr.api_path()?);
        self.run_task(OperationClass::Unrestricted, Method::POST, &path, Some(params))
            .await
    }

    pub async fn rollback_snapshot(&self, vmr: &mut VmRef, snapshot: &str) -> Result<TaskOutcome> {
        self.resolve(vmr).await?;
        let path = format!(
            "{}/snapshot/{}/rollback",
            vmr.api_path()?,
            path_segment(snapshot)
        );
        let outcome = self
            .run_task(OperationClass::Unrestricted, Method::POST, &path, None)
            .await?;
        info!(vmid = vmr.id(), snapshot, ?outcome, "snapshot rollback finished");
        Ok(outcome)
    }

    /// Create a QEMU VM on `node`.
    ///
    /// Disks named by the device entries of `params` are allocated first. If
    /// the VM itself does not come up, those disks are deleted again; a
    /// failure to delete them is returned in place of the creation result.
    pub async fn create_qemu_vm(&self, node: &str, params: &Params) -> Result<TaskOutcome> {
        let created = self.create_vm_disks(node, params).await?;

        let path = format!("/nodes/{}/qemu", path_segment(node));
        let result = self
            .run_task(OperationClass::Unrestricted, Method::POST, &path, Some(params))
            .await;

        if !matches!(result, Ok(TaskOutcome::Success)) && !created.is_empty() {
            warn!(node, disks = ?created, result = ?result, "vm creation failed, removing its disks");
            self.delete_vm_disks(node, &created).await?;
        }
        if let Ok(outcome) = &result {
            info!(node, vmid = ?params.get("vmid"), ?outcome, "vm create finished");
        }
        result
    }

    // ── Id allocation ───────────────────────────────────────────────

    /// Next free VM id, preferring `hint` when it is non-zero.
    ///
    /// If the server refuses the hint, the query is repeated once without it.
    pub async fn next_id(&self, hint: u32) -> Result<u32> {
        if let Some(id) = self.query_next_id(hint).await? {
            return Ok(id);
        }
        if hint != 0 {
            warn!(hint, "vm id hint refused, asking for any free id");
            if let Some(id) = self.query_next_id(0).await? {
                return Ok(id);
            }
        }
        Err(Error::IdAllocation("error using /cluster/nextid".into()))
    }

    /// `None` when the server reported an error for this query.
    async fn query_next_id(&self, hint: u32) -> Result<Option<u32>> {
        let path = if hint > 0 {
            format!("/cluster/nextid?vmid={hint}")
        } else {
            "/cluster/nextid".to_string()
        };

        let alloc: IdAllocation = match self.transport.get_json(&path).await {
            Ok(value) => pve_api::decode_value(value)?,
            Err(e) if e.status().is_some_and(|s| s.is_client_error()) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if alloc.is_error() {
            return Ok(None);
        }

        let raw = alloc
            .data
            .ok_or_else(|| Error::IdAllocation("reply carries no id".into()))?;
        raw.trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| Error::IdAllocation(format!("non-numeric id '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{EXIT_OK, RUNNING, ScriptedTransport, UPID, status_path, submitted};

    const INVENTORY: &str = r#"{"data":[
        {"id":"qemu/101","type":"qemu","vmid":101,"node":"node7","name":"web-01","status":"stopped"},
        {"id":"lxc/200","type":"lxc","vmid":200,"node":"node9","name":"cache","status":"running"}
    ]}"#;

    fn client(transport: Arc<ScriptedTransport>) -> Client {
        Client::with_transport(&Configuration::new("https://pve.test/api2/json"), transport)
            .with_poller(TaskPoller::new(Duration::from_secs(10), Duration::from_secs(2)))
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_is_cached() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::GET,
            "/cluster/resources?type=vm",
            INVENTORY,
        ));
        let client = client(transport.clone());

        let mut vmr = VmRef::new(200);
        client.resolve(&mut vmr).await.unwrap();
        client.resolve(&mut vmr).await.unwrap();

        assert_eq!(vmr.node(), Some("node9"));
        assert_eq!(vmr.kind(), Some(VmKind::Lxc));
        assert_eq!(transport.count(Method::GET, "/cluster/resources?type=vm"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_vm_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::GET,
            "/cluster/resources?type=vm",
            INVENTORY,
        ));

        let err = client(transport)
            .start_vm(&mut VmRef::new(999))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VmNotFound(999)));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_by_name() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::GET,
            "/cluster/resources?type=vm",
            INVENTORY,
        ));

        let vmr = client(transport).vm_ref_by_name("web-01").await.unwrap();
        assert_eq!(vmr, VmRef::located(101, "node7", VmKind::Qemu));
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_task() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, "/nodes/node7/qemu/101/status/start", &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), RUNNING)
                .reply(Method::GET, &status_path(UPID), EXIT_OK),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone()).start_vm(&mut vmr).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(transport.count(Method::POST, "/nodes/node7/qemu/101/status/start"), 1);
        assert_eq!(transport.count(Method::GET, &status_path(UPID)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_retries_whole_cycle() {
        let path = "/nodes/node7/qemu/101/status/stop";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, path, r#"{"data":null}"#)
                .reply(Method::POST, path, &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), EXIT_OK),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone()).stop_vm(&mut vmr).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(transport.count(Method::POST, path), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_gives_up_after_three_cycles() {
        let path = "/nodes/node7/qemu/101/status/shutdown";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, path, &submitted(UPID))
                .reply(
                    Method::GET,
                    &status_path(UPID),
                    r#"{"data":{"status":"stopped","exitstatus":"VM quit/powerdown failed"}}"#,
                ),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone()).shutdown_vm(&mut vmr).await.unwrap();

        assert!(matches!(
            outcome,
            TaskOutcome::Failed { exit_status, .. } if exit_status == "VM quit/powerdown failed"
        ));
        assert_eq!(transport.count(Method::POST, path), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_does_not_retry_rejection() {
        let path = "/nodes/node7/qemu/101/status/resume";
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            path,
            r#"{"errors":{"vmid":"not suspended"}}"#,
        ));

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone()).resume_vm(&mut vmr).await.unwrap();

        assert!(matches!(outcome, TaskOutcome::SubmissionError(_)));
        assert_eq!(transport.count(Method::POST, path), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_retries_timed_out_cycle() {
        let path = "/nodes/node7/qemu/101/status/start";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, path, &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), RUNNING),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone()).start_vm(&mut vmr).await.unwrap();

        match outcome {
            TaskOutcome::TimedOut { handle, waited } => {
                assert_eq!(handle.as_str(), UPID);
                assert_eq!(waited, Duration::from_secs(10));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(transport.count(Method::POST, path), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_retries_transport_error() {
        let path = "/nodes/node7/qemu/101/status/reset";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply_status(Method::POST, path, 500, "proxy timeout")
                .reply(Method::POST, path, &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), EXIT_OK),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone()).reset_vm(&mut vmr).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(transport.count(Method::POST, path), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_change_does_not_retry_malformed_handle() {
        let path = "/nodes/node7/qemu/101/status/suspend";
        let transport =
            Arc::new(ScriptedTransport::new().reply(Method::POST, path, r#"{"data":"garbage"}"#));

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let err = client(transport.clone())
            .suspend_vm(&mut vmr)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedTaskHandle(upid) if upid == "garbage"));
        assert_eq!(transport.count(Method::POST, path), 1);
        assert!(transport.calls().iter().all(|c| c.method == Method::POST));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_start_is_awaited_again() {
        let path = "/nodes/node7/qemu/101/status/start";
        let status = status_path(UPID);
        let transport = Arc::new(
            (0..15)
                .fold(
                    ScriptedTransport::new().reply(Method::POST, path, &submitted(UPID)),
                    |t, _| t.reply(Method::GET, &status, RUNNING),
                )
                .reply(Method::GET, &status, EXIT_OK),
        );
        let client = client(transport.clone());

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client.start_vm(&mut vmr).await.unwrap();
        let handle = outcome.handle().cloned().unwrap();

        assert_eq!(client.wait_task(&handle).await.unwrap(), TaskOutcome::Success);
        assert_eq!(transport.count(Method::POST, path), 3);
        assert_eq!(transport.count(Method::GET, &status), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_name_stays_one_path_segment() {
        let path = "/nodes/node9/lxc/200/snapshot/pre%2Fupgrade%3Fv2/rollback";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, path, &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), EXIT_OK),
        );

        let mut vmr = VmRef::located(200, "node9", VmKind::Lxc);
        let outcome = client(transport.clone())
            .rollback_snapshot(&mut vmr, "pre/upgrade?v2")
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Success);
        assert_eq!(transport.count(Method::POST, path), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_defaults_disk_and_formats_delta() {
        let path = "/nodes/node7/qemu/101/resize";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::PUT, path, &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), EXIT_OK),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let outcome = client(transport.clone())
            .resize_disk(&mut vmr, None, SizeDelta::gigabytes(2))
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Success);
        let form = transport.calls()[0].form.clone().unwrap();
        assert_eq!(form["disk"], json!("virtio0"));
        assert_eq!(form["size"], json!("+2G"));
    }

    #[tokio::test(start_paused = true)]
    async fn clone_is_single_shot() {
        let path = "/nodes/node7/qemu/101/clone";
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, path, &submitted(UPID))
                .reply(Method::GET, &status_path(UPID), RUNNING),
        );

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let params = Params::from([("newid".to_string(), json!(150))]);
        let outcome = client(transport.clone())
            .clone_vm(&mut vmr, &params)
            .await
            .unwrap();

        assert!(matches!(outcome, TaskOutcome::TimedOut { .. }));
        assert_eq!(transport.count(Method::POST, path), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_rollback_submit_once() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::DELETE, "/nodes/node9/lxc/200", &submitted(UPID))
                .reply(
                    Method::POST,
                    "/nodes/node9/lxc/200/snapshot/before-upgrade/rollback",
                    &submitted(UPID),
                )
                .reply(Method::GET, &status_path(UPID), EXIT_OK),
        );
        let client = client(transport.clone());

        let mut vmr = VmRef::located(200, "node9", VmKind::Lxc);
        assert!(client.rollback_snapshot(&mut vmr, "before-upgrade").await.unwrap().is_success());
        assert!(client.delete_vm(&mut vmr).await.unwrap().is_success());
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn config_update_without_task() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            "/nodes/node7/qemu/101/config",
            r#"{"data":null}"#,
        ));

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        let params = Params::from([("memory".to_string(), json!(4096))]);
        let outcome = client(transport)
            .set_vm_config(&mut vmr, &params)
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::NoTask);
    }

    #[tokio::test(start_paused = true)]
    async fn next_id_falls_back_without_hint() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::GET, "/cluster/nextid?vmid=105", r#"{"errors":{}}"#)
                .reply(Method::GET, "/cluster/nextid", r#"{"data":"106"}"#),
        );

        let id = client(transport.clone()).next_id(105).await.unwrap();

        assert_eq!(id, 106);
        assert_eq!(transport.count(Method::GET, "/cluster/nextid?vmid=105"), 1);
        assert_eq!(transport.count(Method::GET, "/cluster/nextid"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_id_fallback_error_is_fatal() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply_status(Method::GET, "/cluster/nextid?vmid=105", 400, "vmid in use")
                .reply(Method::GET, "/cluster/nextid", r#"{"errors":{"vmid":"none free"}}"#),
        );

        let err = client(transport.clone()).next_id(105).await.unwrap_err();

        assert!(matches!(err, Error::IdAllocation(_)));
        assert_eq!(transport.count(Method::GET, "/cluster/nextid"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_id_without_hint_does_not_retry() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::GET,
            "/cluster/nextid",
            r#"{"errors":{}}"#,
        ));

        assert!(client(transport.clone()).next_id(0).await.is_err());
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vm_config_requires_data() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::GET, "/nodes/node7/qemu/101/config", r#"{"data":null}"#)
                .reply(
                    Method::GET,
                    "/nodes/node7/qemu/101/status/current",
                    r#"{"data":{"status":"running","qmpstatus":"running"}}"#,
                ),
        );
        let client = client(transport);

        let mut vmr = VmRef::located(101, "node7", VmKind::Qemu);
        assert!(matches!(
            client.vm_config(&mut vmr).await,
            Err(Error::UnexpectedResponse(_))
        ));
        let state = client.vm_state(&mut vmr).await.unwrap();
        assert_eq!(state["status"], json!("running"));
    }

    #[tokio::test(start_paused = true)]
    async fn gates_follow_configuration() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport);

        assert!(client.gates().is_serialized(OperationClass::Clone));
        assert!(client.gates().is_serialized(OperationClass::Resize));

        let config = Configuration {
            parallel_clone: true,
            ..Configuration::new("https://pve.test/api2/json")
        };
        let parallel = Client::with_transport(&config, Arc::new(ScriptedTransport::new()));
        assert!(!parallel.gates().is_serialized(OperationClass::Clone));
    }
}
