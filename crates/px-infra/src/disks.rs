//! Disk provisioning for VM creation.
//!
//! Disks referenced by a new VM's device entries are allocated on their
//! storage before the VM is created, so the volume names are fixed up front.
//! The volume ids that were allocated are kept so they can be deleted as a
//! unit if creation does not succeed.

use std::collections::BTreeMap;

use pve_api::{DiskCreation, Params, path_segment};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{Client, Error, Result};

const CONTROLLERS: [&str; 4] = ["ide", "sata", "scsi", "virtio"];

/// A disk to allocate: `storage:volume` plus its size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDescriptor {
    /// Device key it came from, e.g. `scsi0`.
    pub device: String,
    pub storage: String,
    pub volume: String,
    /// Size as the API takes it, e.g. `32G`.
    pub size: String,
}

impl DiskDescriptor {
    /// `storage:volume`
    pub fn volume_id(&self) -> String {
        format!("{}:{}", self.storage, self.volume)
    }
}

/// `ide0`, `sata3`, `scsi12`, `virtio0`, ...
pub fn is_storage_device(key: &str) -> bool {
    CONTROLLERS.iter().any(|prefix| {
        key.strip_prefix(prefix)
            .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Split a device value such as `local-lvm:vm-101-disk-0,size=32G,media=disk`
/// into fields. A leading item without `=` is the `file` field.
pub fn parse_device_conf(conf: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for (i, item) in conf.split(',').map(str::trim).enumerate() {
        match item.split_once('=') {
            Some((key, value)) => {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
            None if i == 0 && !item.is_empty() => {
                fields.insert("file".to_string(), item.to_string());
            }
            None => {}
        }
    }
    fields
}

/// Split `storage:volume` at the first `:`.
pub fn split_volume_id(volume_id: &str) -> Result<(&str, &str)> {
    match volume_id.split_once(':') {
        Some((storage, volume)) if !storage.is_empty() && !volume.is_empty() => {
            Ok((storage, volume))
        }
        _ => Err(Error::MalformedDisk(volume_id.to_string())),
    }
}

/// Disks (`media=disk`) named by the controller entries of `params`.
/// Removable media and other keys are skipped.
pub fn disk_descriptors(params: &Params) -> Result<Vec<DiskDescriptor>> {
    let mut disks = Vec::new();
    for (key, value) in params {
        if !is_storage_device(key) {
            continue;
        }
        let conf = value
            .as_str()
            .ok_or_else(|| Error::MalformedDisk(format!("{key}: {value}")))?;
        let fields = parse_device_conf(conf);
        if fields.get("media").map(String::as_str) != Some("disk") {
            continue;
        }

        let file = fields
            .get("file")
            .ok_or_else(|| Error::MalformedDisk(format!("{key}: no file in '{conf}'")))?;
        let (storage, volume) = split_volume_id(file)?;
        let size = fields
            .get("size")
            .ok_or_else(|| Error::MalformedDisk(format!("{key}: no size in '{conf}'")))?;

        disks.push(DiskDescriptor {
            device: key.clone(),
            storage: storage.to_string(),
            volume: volume.to_string(),
            size: size.clone(),
        });
    }
    Ok(disks)
}

fn vmid_param(params: &Params) -> Result<u64> {
    match params.get("vmid") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or(Error::MissingVmid)
}

impl Client {
    /// Allocate one disk and check the server named it as requested.
    pub async fn create_vm_disk(&self, node: &str, vmid: u64, disk: &DiskDescriptor) -> Result<()> {
        let path = format!(
            "/nodes/{}/storage/{}/content",
            path_segment(node),
            path_segment(&disk.storage)
        );
        let params = Params::from([
            ("vmid".to_string(), json!(vmid)),
            ("filename".to_string(), json!(disk.volume)),
            ("size".to_string(), json!(disk.size)),
        ]);

        let body = self.transport.post(&path, Some(&params)).await?;
        let created: DiskCreation = pve_api::decode(&body)?;

        let volume_id = disk.volume_id();
        if created.data.as_deref() != Some(volume_id.as_str()) {
            return Err(Error::DiskCreation(volume_id));
        }

        info!(node, vmid, disk = %volume_id, size = %disk.size, "vm disk created");
        Ok(())
    }

    /// Allocate every disk `params` names; returns their volume ids.
    ///
    /// If one allocation fails, the disks already allocated are deleted before
    /// the error is returned.
    pub(crate) async fn create_vm_disks(&self, node: &str, params: &Params) -> Result<Vec<String>> {
        let disks = disk_descriptors(params)?;
        if disks.is_empty() {
            return Ok(Vec::new());
        }
        let vmid = vmid_param(params)?;

        let mut created = Vec::with_capacity(disks.len());
        for disk in &disks {
            if let Err(e) = self.create_vm_disk(node, vmid, disk).await {
                if !created.is_empty() {
                    warn!(node, vmid, disks = ?created, error = %e, "disk allocation failed, removing allocated disks");
                    self.delete_vm_disks(node, &created).await?;
                }
                return Err(e);
            }
            created.push(disk.volume_id());
        }
        Ok(created)
    }

    /// Delete the given `storage:volume` disks from `node`.
    ///
    /// Every disk is attempted once; the first failure is returned.
    pub async fn delete_vm_disks(&self, node: &str, disks: &[String]) -> Result<()> {
        let mut first_err = None;
        for volume_id in disks {
            let (storage, volume) = match split_volume_id(volume_id) {
                Ok(parts) => parts,
                Err(e) => {
                    first_err.get_or_insert(e);
                    continue;
                }
            };

            let path = format!(
                "/nodes/{}/storage/{}/content/{}",
                path_segment(node),
                path_segment(storage),
                path_segment(volume)
            );
            match self.transport.delete(&path).await {
                Ok(_) => info!(node, disk = %volume_id, "vm disk deleted"),
                Err(source) => {
                    warn!(node, disk = %volume_id, error = %source, "failed to delete vm disk");
                    first_err.get_or_insert(Error::DiskRollback {
                        disk: volume_id.clone(),
                        source,
                    });
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
