//! The device graph: storage devices and the holders between them.

mod cardinality;
mod device;
mod error;
mod graph;
mod holder;
mod partitions;
mod rules;

pub use cardinality::ValidCardinality;
pub use device::{
    BtrfsSubvolume, Device, DeviceData, DeviceKind, DeviceKindFlag, Disk, Filesystem, Luks,
    LvmLv, LvmVg, MountPoint, Partition, PartitionTable, Passphrase, StrayBlkDevice,
};
pub use error::StructuralError;
pub use graph::{DeviceGraph, RemovalMode, TraversalFilter};
pub use holder::{Holder, HolderKind};
pub use partitions::PartitionSlot;
