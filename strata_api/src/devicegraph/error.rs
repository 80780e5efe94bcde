use serde::{Deserialize, Serialize};

use crate::Sid;

use super::{cardinality::ValidCardinality, device::DeviceKind, holder::HolderKind};

/// Violation of a device graph invariant.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StructuralError {
    #[error("Device with sid {0} does not exist")]
    UnknownSid(Sid),

    #[error("Device with sid {0} already exists")]
    DuplicateSid(Sid),

    #[error("Sid index entry {0} does not match the stored device")]
    IndexMismatch(Sid),

    #[error("Device {0} cannot hold itself")]
    SelfHolder(Sid),

    #[error("Holder from {source_sid} to {target_sid} already exists")]
    DuplicateHolder { source_sid: Sid, target_sid: Sid },

    #[error("Holder from {source_sid} to {target_sid} does not exist")]
    UnknownHolder { source_sid: Sid, target_sid: Sid },

    #[error("Holder from {source_sid} to {target_sid} would close a cycle")]
    HolderCycle { source_sid: Sid, target_sid: Sid },

    #[error("Device graph contains a holder cycle")]
    CycleDetected,

    #[error(
        "Device {sid} has {count} dependent device(s), removal must cascade \
            to remove them"
    )]
    HasDependents { sid: Sid, count: usize },

    #[error(
        "Device {sid} of kind '{kind}' has {count} {holder_kind} parent(s), \
            expected {expected}"
    )]
    InvalidParentCount {
        sid: Sid,
        kind: DeviceKind,
        holder_kind: HolderKind,
        count: usize,
        expected: ValidCardinality,
    },

    #[error(
        "Device {sid} of kind '{kind}' cannot have {holder_kind} parent \
            {parent} of kind '{parent_kind}'"
    )]
    InvalidParentKind {
        sid: Sid,
        kind: DeviceKind,
        holder_kind: HolderKind,
        parent: Sid,
        parent_kind: DeviceKind,
    },

    #[error("Block device {sid} has {count} users, expected at most 1")]
    TooManyUsers { sid: Sid, count: usize },

    #[error("Disk {sid} carries {count} partition tables, expected at most 1")]
    TooManyPartitionTables { sid: Sid, count: usize },

    #[error("Block device {sid} carries both a partition table and a user")]
    ConflictingUsage { sid: Sid },

    #[error("Partition {sid} overlaps partition {other}")]
    PartitionOverlap { sid: Sid, other: Sid },

    #[error("Partition {sid} does not fit in disk {disk}")]
    PartitionOutOfBounds { sid: Sid, disk: Sid },

    #[error("Subvolume {sid} belongs to filesystem {fs}, which is not btrfs")]
    SubvolumeOutsideBtrfs { sid: Sid, fs: Sid },

    #[error("Path of subvolume {sid} is not below the path of its parent subvolume")]
    SubvolumePathOutsideParent { sid: Sid },

    #[error("Filesystem {fs} has {count} default subvolumes, expected at most 1")]
    TooManyDefaultSubvolumes { fs: Sid, count: usize },

    #[error("Device {sid} of kind '{kind}' is not a partition table")]
    NotAPartitionTable { sid: Sid, kind: DeviceKind },

    #[error("Size of the disk carrying partition table {0} is unknown")]
    UnknownDiskSize(Sid),
}
