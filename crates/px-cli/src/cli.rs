use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pve_api::Params;
use px_infra::{Client, Configuration, SizeDelta, StatusAction, TaskHandle, TaskOutcome, VmRef};
use serde_json::{Value, json};

#[derive(Debug, Parser)]
#[command(name = "pxctl", about = "Proxmox VE VM lifecycle from the command line")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List cluster nodes
    Nodes,
    /// List VMs and containers
    Vms,
    /// Show the runtime state of a VM
    State { vmid: u32 },
    /// Show a VM's configuration, or update it with KEY=VALUE pairs
    Config {
        vmid: u32,
        #[arg(value_parser = parse_param)]
        set: Vec<(String, Value)>,
    },
    Start { vmid: u32 },
    Stop { vmid: u32 },
    Shutdown { vmid: u32 },
    Reset { vmid: u32 },
    Suspend { vmid: u32 },
    Resume { vmid: u32 },
    /// Delete a VM and its disks
    Delete { vmid: u32 },
    Clone(CloneArgs),
    /// Grow a disk, e.g. `pxctl resize 101 +10G --disk scsi0`
    Resize {
        vmid: u32,
        #[arg(allow_hyphen_values = true)]
        size: SizeDelta,
        #[arg(long)]
        disk: Option<String>,
    },
    /// Roll a VM back to a snapshot
    Rollback { vmid: u32, snapshot: String },
    /// Create a QEMU VM from KEY=VALUE parameters
    Create(CreateArgs),
    /// Print the next free VM id
    NextId {
        #[arg(long, default_value_t = 0)]
        hint: u32,
    },
    /// Run a QEMU monitor command
    Monitor { vmid: u32, command: String },
    /// Keep waiting on a task, e.g. one that timed out
    Wait { upid: String },
}

#[derive(Debug, Args)]
struct CloneArgs {
    vmid: u32,
    /// Id of the clone; the next free id when omitted
    #[arg(long)]
    newid: Option<u32>,
    #[arg(long)]
    name: Option<String>,
    /// Target node
    #[arg(long)]
    target: Option<String>,
    /// Full copy instead of a linked clone
    #[arg(long)]
    full: bool,
}

#[derive(Debug, Args)]
struct CreateArgs {
    node: String,
    /// VM id; the next free id when omitted
    #[arg(long)]
    vmid: Option<u32>,
    #[arg(value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Configuration::from_env().context("loading configuration")?;
        tracing::debug!(?config, "configuration loaded");
        let client = Client::new(&config)?;

        match self.command {
            Command::Nodes => print_json(&client.list_nodes().await?),
            Command::Vms => print_json(&client.list_vms().await?),
            Command::State { vmid } => print_json(&client.vm_state(&mut VmRef::new(vmid)).await?),
            Command::Config { vmid, set } if set.is_empty() => {
                print_json(&client.vm_config(&mut VmRef::new(vmid)).await?)
            }
            Command::Config { vmid, set } => {
                let params: Params = set.into_iter().collect();
                finish(client.set_vm_config(&mut VmRef::new(vmid), &params).await?)
            }
            Command::Start { vmid } => status(&client, vmid, StatusAction::Start).await,
            Command::Stop { vmid } => status(&client, vmid, StatusAction::Stop).await,
            Command::Shutdown { vmid } => status(&client, vmid, StatusAction::Shutdown).await,
            Command::Reset { vmid } => status(&client, vmid, StatusAction::Reset).await,
            Command::Suspend { vmid } => status(&client, vmid, StatusAction::Suspend).await,
            Command::Resume { vmid } => status(&client, vmid, StatusAction::Resume).await,
            Command::Delete { vmid } => finish(client.delete_vm(&mut VmRef::new(vmid)).await?),
            Command::Clone(args) => {
                let newid = match args.newid {
                    Some(id) => id,
                    None => client.next_id(0).await?,
                };
                let mut params = Params::from([("newid".to_string(), json!(newid))]);
                if let Some(name) = args.name {
                    params.insert("name".into(), json!(name));
                }
                if let Some(target) = args.target {
                    params.insert("target".into(), json!(target));
                }
                if args.full {
                    params.insert("full".into(), json!(true));
                }
                println!("{newid}");
                finish(client.clone_vm(&mut VmRef::new(args.vmid), &params).await?)
            }
            Command::Resize { vmid, size, disk } => finish(
                client
                    .resize_disk(&mut VmRef::new(vmid), disk.as_deref(), size)
                    .await?,
            ),
            Command::Rollback { vmid, snapshot } => finish(
                client
                    .rollback_snapshot(&mut VmRef::new(vmid), &snapshot)
                    .await?,
            ),
            Command::Create(args) => {
                let vmid = match args.vmid {
                    Some(id) => id,
                    None => client.next_id(0).await?,
                };
                let mut params: Params = args.params.into_iter().collect();
                params.insert("vmid".into(), json!(vmid));
                println!("{vmid}");
                finish(client.create_qemu_vm(&args.node, &params).await?)
            }
            Command::NextId { hint } => {
                println!("{}", client.next_id(hint).await?);
                Ok(())
            }
            Command::Monitor { vmid, command } => {
                print_json(&client.monitor_command(&mut VmRef::new(vmid), &command).await?)
            }
            Command::Wait { upid } => finish(client.wait_task(&TaskHandle::parse(upid)?).await?),
        }
    }
}

async fn status(client: &Client, vmid: u32, action: StatusAction) -> anyhow::Result<()> {
    finish(client.change_status(&mut VmRef::new(vmid), action).await?)
}

fn finish(outcome: TaskOutcome) -> anyhow::Result<()> {
    tracing::info!(?outcome, "done");
    outcome.into_result()?;
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), json!(value))),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn params_keep_everything_after_first_equals() {
        assert_eq!(
            parse_param("scsi0=local-lvm:vm-101-disk-0,size=32G,media=disk").unwrap(),
            (
                "scsi0".to_string(),
                json!("local-lvm:vm-101-disk-0,size=32G,media=disk")
            )
        );
        assert!(parse_param("memory").is_err());
        assert!(parse_param("=4096").is_err());
    }

    #[test]
    fn wait_takes_a_task_handle() {
        let upid = "UPID:node7:00001234:0A1B2C3D:65F00000:qmstart:101:root@pam:";
        let cli = Cli::try_parse_from(["pxctl", "wait", upid]).unwrap();
        assert!(matches!(cli.command, Command::Wait { upid: parsed } if parsed == upid));
    }

    #[test]
    fn resize_accepts_signed_size() {
        let cli = Cli::try_parse_from(["pxctl", "resize", "101", "+10G", "--disk", "scsi0"]).unwrap();
        match cli.command {
            Command::Resize { vmid, size, disk } => {
                assert_eq!(vmid, 101);
                assert_eq!(size, SizeDelta::gigabytes(10));
                assert_eq!(disk.as_deref(), Some("scsi0"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
