//! Actions: the units of work that turn one device graph into another.

use std::{collections::BTreeSet, fmt::Display};

use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

use strata_api::Sid;

mod commit;
mod text;

/// The kind of an action, without its data.
///
/// The declaration order is the phase order of actions that touch the same
/// device.
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
pub enum ActionKind {
    Detach,
    Unmount,
    RemoveFromEtcFstab,
    Delete,
    ReduceMissing,
    Create,
    Rename,
    Resize,
    Modify,
    Attach,
    UpdateInEtcFstab,
    Mount,
    AddToEtcFstab,
}

impl ActionKind {
    /// Position of this kind among the actions of a single device.
    pub fn phase_rank(self) -> u8 {
        match self {
            Self::Detach => 0,
            Self::Unmount => 1,
            Self::RemoveFromEtcFstab => 2,
            Self::Delete => 3,
            Self::ReduceMissing => 4,
            Self::Create => 5,
            Self::Rename => 6,
            Self::Resize => 7,
            Self::Modify => 8,
            Self::Attach => 9,
            Self::UpdateInEtcFstab => 10,
            Self::Mount => 11,
            Self::AddToEtcFstab => 12,
        }
    }

    /// Actions that take something away from the system.
    pub fn is_removal(self) -> bool {
        matches!(
            self,
            Self::Delete | Self::Unmount | Self::RemoveFromEtcFstab | Self::Detach
        )
    }

    /// Actions that bring something new to the system.
    pub fn is_creation(self) -> bool {
        matches!(
            self,
            Self::Create | Self::Mount | Self::AddToEtcFstab | Self::Attach
        )
    }

    /// Actions that change a device in place.
    pub fn is_modification(self) -> bool {
        matches!(
            self,
            Self::Rename | Self::Resize | Self::Modify | Self::ReduceMissing
        )
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ResizeDirection {
    Grow,
    Shrink,
}

/// An attribute changed in place by a modify action.
#[derive(
    Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ModifiedAttribute {
    Label,
    Uuid,
    PartitionId,
    ExtentSize,
    Nocow,
    DefaultSubvolume,
}

/// A unit of planned work.
///
/// Actions only hold sids. The devices are looked up in the device graphs
/// the action graph was computed from: removals in the current graph,
/// creations in the target graph, and in-place changes in both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    Create {
        sid: Sid,
    },
    Delete {
        sid: Sid,
    },
    Modify {
        sid: Sid,
        changes: Vec<ModifiedAttribute>,
    },
    Resize {
        sid: Sid,
        direction: ResizeDirection,
    },
    Rename {
        sid: Sid,
    },
    Mount {
        sid: Sid,
    },
    Unmount {
        sid: Sid,
    },
    AddToEtcFstab {
        sid: Sid,
    },
    RemoveFromEtcFstab {
        sid: Sid,
    },
    UpdateInEtcFstab {
        sid: Sid,
    },

    /// Keeps a device that was only partially found instead of deleting and
    /// recreating it.
    ReduceMissing {
        sid: Sid,
    },

    /// Adds a physical volume to a volume group.
    Attach {
        provider: Sid,
        consumer: Sid,
    },

    /// Removes a physical volume from a volume group.
    Detach {
        provider: Sid,
        consumer: Sid,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create { .. } => ActionKind::Create,
            Self::Delete { .. } => ActionKind::Delete,
            Self::Modify { .. } => ActionKind::Modify,
            Self::Resize { .. } => ActionKind::Resize,
            Self::Rename { .. } => ActionKind::Rename,
            Self::Mount { .. } => ActionKind::Mount,
            Self::Unmount { .. } => ActionKind::Unmount,
            Self::AddToEtcFstab { .. } => ActionKind::AddToEtcFstab,
            Self::RemoveFromEtcFstab { .. } => ActionKind::RemoveFromEtcFstab,
            Self::UpdateInEtcFstab { .. } => ActionKind::UpdateInEtcFstab,
            Self::ReduceMissing { .. } => ActionKind::ReduceMissing,
            Self::Attach { .. } => ActionKind::Attach,
            Self::Detach { .. } => ActionKind::Detach,
        }
    }

    /// The device the action is about. For attach and detach this is the
    /// volume group.
    pub fn sid(&self) -> Sid {
        match self {
            Self::Create { sid }
            | Self::Delete { sid }
            | Self::Modify { sid, .. }
            | Self::Resize { sid, .. }
            | Self::Rename { sid }
            | Self::Mount { sid }
            | Self::Unmount { sid }
            | Self::AddToEtcFstab { sid }
            | Self::RemoveFromEtcFstab { sid }
            | Self::UpdateInEtcFstab { sid }
            | Self::ReduceMissing { sid } => *sid,
            Self::Attach { consumer, .. } | Self::Detach { consumer, .. } => *consumer,
        }
    }

    /// The physical volume of attach and detach, the device itself otherwise.
    pub fn secondary_sid(&self) -> Sid {
        match self {
            Self::Attach { provider, .. } | Self::Detach { provider, .. } => *provider,
            _ => self.sid(),
        }
    }

    /// Every device the action touches.
    pub fn affected_sids(&self) -> BTreeSet<Sid> {
        BTreeSet::from([self.sid(), self.secondary_sid()])
    }

    /// Key used to order actions that do not depend on each other.
    pub fn sort_key(&self) -> (Sid, u8, Sid) {
        (self.sid(), self.kind().phase_rank(), self.secondary_sid())
    }
}

impl Display for Action {
    /// Short form used in logs when no device graph is at hand.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attach { provider, consumer } | Self::Detach { provider, consumer } => {
                write!(f, "{} {provider} -> {consumer}", self.kind())
            }
            Self::Resize { sid, direction } => {
                write!(f, "{} {sid} ({})", self.kind(), <&str>::from(direction))
            }
            _ => write!(f, "{} {}", self.kind(), self.sid()),
        }
    }
}
