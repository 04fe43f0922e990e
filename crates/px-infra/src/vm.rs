use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Guest flavour, as reported in the `type` field of the VM inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmKind {
    Qemu,
    Lxc,
}

impl VmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qemu => "qemu",
            Self::Lxc => "lxc",
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qemu" => Ok(Self::Qemu),
            "lxc" => Ok(Self::Lxc),
            other => Err(Error::UnknownVmKind(other.to_string())),
        }
    }
}

/// Caller-held reference to a VM.
///
/// The id is fixed at construction. Node and kind start empty and are filled
/// by `Client::resolve` the first time an operation needs them, then reused
/// for the life of the reference. A VM migrated to another node afterwards
/// is not noticed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRef {
    id: u32,
    node: Option<String>,
    kind: Option<VmKind>,
}

impl VmRef {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            node: None,
            kind: None,
        }
    }

    /// Reference with an already known location.
    pub fn located(id: u32, node: impl Into<String>, kind: VmKind) -> Self {
        Self {
            id,
            node: Some(node.into()),
            kind: Some(kind),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn kind(&self) -> Option<VmKind> {
        self.kind
    }

    pub fn set_node(&mut self, node: impl Into<String>) {
        self.node = Some(node.into());
    }

    pub fn set_kind(&mut self, kind: VmKind) {
        self.kind = Some(kind);
    }

    pub fn is_resolved(&self) -> bool {
        self.node.is_some() && self.kind.is_some()
    }

    /// `/nodes/{node}/{kind}/{id}`
    pub(crate) fn api_path(&self) -> Result<String> {
        match (&self.node, self.kind) {
            (Some(node), Some(kind)) => Ok(format!(
                "/nodes/{}/{kind}/{}",
                pve_api::path_segment(node),
                self.id
            )),
            _ => Err(Error::VmNotFound(self.id)),
        }
    }
}

/// Unit suffix of a disk size delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Kibibytes,
    Mebibytes,
    Gibibytes,
    Tebibytes,
}

impl SizeUnit {
    fn suffix(&self) -> char {
        match self {
            Self::Kibibytes => 'K',
            Self::Mebibytes => 'M',
            Self::Gibibytes => 'G',
            Self::Tebibytes => 'T',
        }
    }
}

/// Signed disk growth, rendered as the API expects (`+2G`, `-512M`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeDelta {
    pub amount: i64,
    pub unit: SizeUnit,
}

impl SizeDelta {
    pub fn gigabytes(amount: i64) -> Self {
        Self {
            amount,
            unit: SizeUnit::Gibibytes,
        }
    }
}

impl fmt::Display for SizeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}{}", self.amount, self.unit.suffix())
    }
}

impl FromStr for SizeDelta {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSize(s.to_string());

        let mut chars = s.trim().chars();
        let unit = match chars.next_back().ok_or_else(invalid)?.to_ascii_uppercase() {
            'K' => SizeUnit::Kibibytes,
            'M' => SizeUnit::Mebibytes,
            'G' => SizeUnit::Gibibytes,
            'T' => SizeUnit::Tebibytes,
            _ => return Err(invalid()),
        };
        let amount = chars.as_str().parse::<i64>().map_err(|_| invalid())?;

        Ok(Self { amount, unit })
    }
}
