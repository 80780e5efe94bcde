//! Collaborators that change the system for one kind of device each. They
//! run commands through the commit context and report plain errors; the
//! commit loop attaches the failed action.

use anyhow::{Context, Error};

use strata_api::{
    constants::LUKS2_HEADER_SIZE,
    devicegraph::{DeviceData, DeviceGraph, HolderKind},
    error::{CommitError, InternalError, ReportError, StrataError, StrataResultExt},
    Sid,
};

use super::CommitContext;

pub(crate) mod btrfs;
pub(crate) mod encryption;
pub(crate) mod filesystem;
pub(crate) mod lvm;
pub(crate) mod mount;
pub(crate) mod partitioning;

/// Bytes available to the user of a device.
///
/// Filesystems and encrypted volumes take the size of the block device they
/// live on; encrypted volumes lose the space of their header.
pub(crate) fn usable_size(graph: &DeviceGraph, sid: Sid) -> Option<u64> {
    let device = graph.device(sid)?;
    match device.data() {
        DeviceData::Luks(_) => {
            Some(provider_size(graph, sid)?.saturating_sub(LUKS2_HEADER_SIZE))
        }
        DeviceData::Filesystem(_) => provider_size(graph, sid),
        _ => device.size(),
    }
}

fn provider_size(graph: &DeviceGraph, sid: Sid) -> Option<u64> {
    let provider = *graph.parents(sid, Some(HolderKind::User)).first()?;
    usable_size(graph, provider)
}

/// Kernel name of a device.
pub(crate) fn device_name(graph: &DeviceGraph, sid: Sid) -> Result<String, Error> {
    graph
        .device_name(sid)
        .with_context(|| format!("Failed to resolve the name of device {sid}"))
}

/// Name of a volume group or logical volume as the system knows it right
/// now: the old name until the rename was committed.
pub(crate) fn lvm_name(ctx: &CommitContext, sid: Sid) -> Option<String> {
    let graph = if ctx.lhs.contains(sid) && !ctx.is_renamed(sid) {
        ctx.lhs
    } else {
        ctx.rhs
    };

    match graph.device(sid)?.data() {
        DeviceData::LvmVg(vg) => Some(vg.vg_name.clone()),
        DeviceData::LvmLv(lv) => Some(lv.lv_name.clone()),
        _ => None,
    }
}

/// Kernel name of a device at this point of the commit.
pub(crate) fn current_name(ctx: &CommitContext, sid: Sid) -> Result<String, Error> {
    let device = ctx
        .rhs
        .device(sid)
        .or_else(|| ctx.lhs.device(sid))
        .structured(InternalError::DanglingSid(sid))
        .unstructured("Device is part of neither device graph")?;

    let name = match device.data() {
        DeviceData::LvmLv(_) => ctx
            .rhs
            .subdevice_parent(sid)
            .or_else(|| ctx.lhs.subdevice_parent(sid))
            .and_then(|vg| lvm_name(ctx, vg))
            .zip(lvm_name(ctx, sid))
            .map(|(vg, lv)| format!("/dev/{vg}/{lv}")),
        DeviceData::LvmVg(_) => lvm_name(ctx, sid).map(|vg| format!("/dev/{vg}")),
        _ => device.name(),
    };
    name.with_context(|| format!("Failed to resolve the name of device {sid}"))
}

/// Kernel name of the block device a filesystem or encrypted volume lives
/// on, at this point of the commit.
pub(crate) fn current_blk_device_of(ctx: &CommitContext, sid: Sid) -> Result<String, Error> {
    let provider = [ctx.rhs, ctx.lhs]
        .into_iter()
        .find_map(|graph| graph.parents(sid, Some(HolderKind::User)).first().copied())
        .with_context(|| format!("Failed to find the block device holding device {sid}"))?;
    current_name(ctx, provider)
}

/// Error for an action the system cannot carry out.
pub(crate) fn unsupported(action: impl Into<String>, reason: impl Into<String>) -> Error {
    StrataError::new(CommitError::Unsupported {
        action: action.into(),
        reason: reason.into(),
    })
    .unstructured("Action cannot be committed")
}

#[cfg(test)]
mod tests {
    use sysdefs::{
        filesystems::FsType,
        partitions::{PartitionType, PtType},
    };

    use strata_api::{
        devicegraph::{Disk, Filesystem, Luks, Partition, PartitionTable},
        Region,
    };

    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_usable_size() {
        let mut graph = DeviceGraph::new();
        let disk = graph.create_device(Disk::new("/dev/sda")).unwrap();
        let pt = graph
            .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
            .unwrap();
        let partition = graph
            .create_subdevice(
                pt,
                Partition::new(
                    "/dev/sda1",
                    Region::from_bytes(2048, 512 * MIB, 512),
                    PartitionType::Primary,
                ),
            )
            .unwrap();
        let luks = graph
            .create_user(partition, Luks::new("cr_sda1"))
            .unwrap();
        let fs = graph
            .create_user(luks, Filesystem::new(FsType::Ext4))
            .unwrap();

        assert_eq!(usable_size(&graph, partition), Some(512 * MIB));
        assert_eq!(usable_size(&graph, luks), Some(496 * MIB));
        assert_eq!(usable_size(&graph, fs), Some(496 * MIB));
        assert_eq!(usable_size(&graph, pt), None);
        assert_eq!(usable_size(&graph, Sid::from_raw(9999)), None);

        assert_eq!(device_name(&graph, partition).unwrap(), "/dev/sda1");
    }

    #[test]
    fn test_unsupported() {
        let error = unsupported("create disk /dev/sda", "disks are physical devices");
        let message = format!("{error:#}");
        assert!(message.contains("disks are physical devices"), "{message}");
    }
}
