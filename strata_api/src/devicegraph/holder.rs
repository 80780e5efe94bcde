use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

use crate::Sid;

/// Relationship between a provider device and the device built from it.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HolderKind {
    /// The target is contained in the source, e.g. a partition in its
    /// partition table.
    Subdevice,

    /// The target consumes the source as storage, e.g. a filesystem on a
    /// partition or a volume group on a physical volume.
    User,
}

impl Display for HolderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

/// A directed edge of the device graph, from the provider (`source`) to the
/// consumer (`target`).
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Holder {
    pub source: Sid,
    pub target: Sid,
    pub kind: HolderKind,
}

impl Holder {
    pub fn new(source: Sid, target: Sid, kind: HolderKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }
}

impl Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -{}-> {}", self.source, self.kind, self.target)
    }
}
