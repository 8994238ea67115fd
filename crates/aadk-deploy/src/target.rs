use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ids::{classify_target_kind, normalize_target_id, normalize_target_id_for_compare};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Device,
    Emulator,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Device => "device",
            TargetKind::Emulator => "emulator",
        })
    }
}

/// A reachable device or emulator, keyed by its adb serial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub kind: TargetKind,
}

impl Target {
    pub fn from_id(id: &str) -> Self {
        Self {
            id: normalize_target_id(id),
            kind: classify_target_kind(id),
        }
    }
}

/// Partial filter over targets. Empty fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TargetSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<TargetKind>,
}

impl TargetSpec {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: None,
        }
    }

    pub fn with_kind(kind: TargetKind) -> Self {
        Self {
            id: None,
            kind: Some(kind),
        }
    }

    pub fn matches(&self, target: &Target) -> bool {
        let id_ok = self.id.as_deref().map_or(true, |id| {
            normalize_target_id_for_compare(id) == normalize_target_id_for_compare(&target.id)
        });
        let kind_ok = self.kind.map_or(true, |kind| kind == target.kind);
        id_ok && kind_ok
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// CPU family the installed package has to be built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    Arm,
}

impl Arch {
    /// Maps an ABI name (`x86_64`, `arm64-v8a`, ...) to its family.
    pub fn from_abi(abi: &str) -> Option<Self> {
        let abi = abi.trim().to_ascii_lowercase();
        if abi.starts_with("x86") {
            Some(Arch::X86)
        } else if abi.starts_with("arm") {
            Some(Arch::Arm)
        } else {
            None
        }
    }

    pub fn from_cpuinfo(cpuinfo: &str) -> Self {
        let intel = Regex::new(r"(?i)intel|x86|amd").ok();
        match intel {
            Some(re) if re.is_match(cpuinfo) => Arch::X86,
            _ => Arch::Arm,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::X86 => "x86",
            Arch::Arm => "arm",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: Target,
    pub arch: Arch,
    /// Started by the resolver rather than found online.
    pub provisioned: bool,
}

impl ResolvedTarget {
    pub fn id(&self) -> &str {
        &self.target.id
    }

    pub fn kind(&self) -> TargetKind {
        self.target.kind
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TargetKind::Emulator => write!(f, "emulator {}", self.id()),
            TargetKind::Device => f.write_str("device"),
        }
    }
}
