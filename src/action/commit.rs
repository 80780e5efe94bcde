use anyhow::{bail, Context, Error};
use log::debug;

use strata_api::devicegraph::{Device, DeviceData};

use super::{Action, ModifiedAttribute, ResizeDirection};
use crate::engine::{
    storage::{btrfs, encryption, filesystem, lvm, mount, partitioning, unsupported},
    CommitContext,
};

/// Waits for udev after a block device appeared, vanished or changed size.
fn settle_after(ctx: &CommitContext, device: &Device) -> Result<(), Error> {
    if device.kind().is_blk_device() {
        ctx.settle()?;
    }
    Ok(())
}

impl Action {
    /// Applies the action to the system, delegating to the collaborator of
    /// the device kind.
    pub fn commit(&self, ctx: &mut CommitContext) -> Result<(), Error> {
        match self {
            Self::Create { sid } => {
                let device = ctx.rhs_device(*sid)?;
                match device.data() {
                    DeviceData::Disk(disk) => {
                        return Err(unsupported(
                            format!("create disk {}", disk.name),
                            "disks cannot be created",
                        ))
                    }
                    DeviceData::StrayBlkDevice(stray) => {
                        return Err(unsupported(
                            format!("create block device {}", stray.name),
                            "stray block devices cannot be created",
                        ))
                    }
                    DeviceData::PartitionTable(pt) => {
                        partitioning::create_partition_table(ctx, *sid, pt)?
                    }
                    DeviceData::Partition(partition) => {
                        partitioning::create_partition(ctx, *sid, partition)?
                    }
                    DeviceData::LvmVg(vg) => lvm::create_volume_group(vg),
                    DeviceData::LvmLv(lv) => lvm::create_logical_volume(ctx, *sid, lv)?,
                    DeviceData::Luks(luks) => encryption::create(ctx, *sid, luks)?,
                    DeviceData::Filesystem(fs) => filesystem::create(ctx, *sid, fs)?,
                    DeviceData::BtrfsSubvolume(subvolume) => {
                        btrfs::create_subvolume(ctx, *sid, subvolume)?
                    }
                    DeviceData::MountPoint(_) => {
                        debug!("Mount point {sid} is set up by its mount actions")
                    }
                }
                settle_after(ctx, device)
            }

            Self::Delete { sid } => {
                let device = ctx.lhs_device(*sid)?;
                match device.data() {
                    DeviceData::Disk(disk) => {
                        return Err(unsupported(
                            format!("delete disk {}", disk.name),
                            "disks cannot be deleted",
                        ))
                    }
                    DeviceData::StrayBlkDevice(stray) => {
                        return Err(unsupported(
                            format!("delete block device {}", stray.name),
                            "stray block devices cannot be deleted",
                        ))
                    }
                    DeviceData::PartitionTable(_) => {
                        partitioning::delete_partition_table(ctx, *sid)?
                    }
                    DeviceData::Partition(partition) => {
                        partitioning::delete_partition(ctx, *sid, partition)?
                    }
                    DeviceData::LvmVg(_) => lvm::delete_volume_group(ctx, *sid)?,
                    DeviceData::LvmLv(_) => lvm::delete_logical_volume(ctx, *sid)?,
                    DeviceData::Luks(luks) => encryption::delete(ctx, *sid, luks)?,
                    DeviceData::Filesystem(fs) => filesystem::delete(ctx, *sid, fs)?,
                    DeviceData::BtrfsSubvolume(subvolume) => {
                        btrfs::delete_subvolume(ctx, *sid, subvolume)?
                    }
                    DeviceData::MountPoint(_) => {
                        debug!("Mount point {sid} is removed by its unmount actions")
                    }
                }
                settle_after(ctx, device)
            }

            Self::Modify { sid, changes } => {
                let device = ctx.rhs_device(*sid)?;
                for change in changes {
                    match (change, device.data()) {
                        (ModifiedAttribute::Label, DeviceData::Filesystem(fs)) => {
                            filesystem::set_label(ctx, *sid, fs)?
                        }
                        (ModifiedAttribute::Uuid, DeviceData::Filesystem(fs)) => {
                            filesystem::set_uuid(ctx, *sid, fs)?
                        }
                        (ModifiedAttribute::Uuid, DeviceData::Luks(luks)) => {
                            encryption::set_uuid(ctx, *sid, luks)?
                        }
                        (ModifiedAttribute::PartitionId, DeviceData::Partition(partition)) => {
                            let old_id = ctx
                                .lhs_device(*sid)?
                                .as_partition()
                                .map(|old| old.id)
                                .with_context(|| format!("Device {sid} was not a partition"))?;
                            partitioning::set_partition_id(ctx, *sid, partition, old_id)?
                        }
                        (ModifiedAttribute::ExtentSize, DeviceData::LvmVg(vg)) => {
                            lvm::set_extent_size(ctx, *sid, vg)?
                        }
                        (ModifiedAttribute::Nocow, DeviceData::BtrfsSubvolume(subvolume)) => {
                            btrfs::set_nocow(ctx, *sid, subvolume)?
                        }
                        (
                            ModifiedAttribute::DefaultSubvolume,
                            DeviceData::BtrfsSubvolume(subvolume),
                        ) => btrfs::set_default(ctx, *sid, subvolume)?,
                        (change, data) => {
                            let attribute: &str = (*change).into();
                            bail!("Cannot change {attribute} of {}", data.kind())
                        }
                    }
                }
                Ok(())
            }

            Self::Resize { sid, direction } => {
                let device = ctx.rhs_device(*sid)?;
                // A physical volume shrinks before its device and grows after it.
                let physical_volume = lvm::volume_group_on(ctx.lhs, *sid).is_some()
                    && lvm::volume_group_on(ctx.rhs, *sid).is_some();
                if physical_volume && *direction == ResizeDirection::Shrink {
                    lvm::resize_physical_volume(ctx, *sid, *direction)?;
                }
                match device.data() {
                    DeviceData::Partition(partition) => {
                        partitioning::resize_partition(ctx, *sid, partition)?
                    }
                    DeviceData::LvmLv(lv) => lvm::resize_logical_volume(ctx, *sid, lv)?,
                    DeviceData::Luks(luks) => encryption::resize(ctx, *sid, luks, *direction)?,
                    DeviceData::Filesystem(fs) => filesystem::resize(ctx, *sid, fs, *direction)?,
                    data => {
                        return Err(unsupported(
                            format!("resize {}", ctx.rhs.display_name(*sid)),
                            format!("{} cannot be resized", data.kind()),
                        ))
                    }
                }
                settle_after(ctx, device)?;
                if physical_volume && *direction == ResizeDirection::Grow {
                    lvm::resize_physical_volume(ctx, *sid, *direction)?;
                }
                Ok(())
            }

            Self::Rename { sid } => match ctx.rhs_device(*sid)?.data() {
                DeviceData::LvmVg(vg) => lvm::rename_volume_group(ctx, *sid, vg),
                DeviceData::LvmLv(lv) => lvm::rename_logical_volume(ctx, *sid, lv),
                data => Err(unsupported(
                    format!("rename {}", ctx.lhs.display_name(*sid)),
                    format!("{} cannot be renamed", data.kind()),
                )),
            },

            Self::Mount { sid } => mount::mount(ctx, *sid),
            Self::Unmount { sid } => mount::unmount(ctx, *sid),
            Self::AddToEtcFstab { sid } => mount::add_to_fstab(ctx, *sid),
            Self::RemoveFromEtcFstab { sid } => mount::remove_from_fstab(ctx, *sid),
            Self::UpdateInEtcFstab { sid } => mount::update_in_fstab(ctx, *sid),

            Self::ReduceMissing { sid } => match ctx.rhs_device(*sid)?.data() {
                DeviceData::LvmVg(_) => lvm::reduce_missing(ctx, *sid),
                data => {
                    debug!("Keeping missing {} {sid} as it is", data.kind());
                    Ok(())
                }
            },

            Self::Attach { provider, consumer } => lvm::attach(ctx, *provider, *consumer),
            Self::Detach { provider, consumer } => lvm::detach(ctx, *provider, *consumer),
        }
    }
}

#[cfg(test)]
mod tests {
    use osutils::{tabfile::TabFile, testutils::RecordingExecutor};
    use strata_api::{
        devicegraph::{DeviceGraph, Disk, Filesystem, LvmVg, StrayBlkDevice},
        Region,
    };
    use sysdefs::filesystems::FsType;

    use crate::engine::with_test_context;

    use super::*;

    #[test]
    fn test_disks_are_physical() {
        let lhs = DeviceGraph::new();
        let mut rhs = DeviceGraph::new();
        let disk = rhs.create_device(Disk::new("/dev/sdz")).unwrap();
        let stray = rhs
            .create_device(StrayBlkDevice::new("/dev/xvda1"))
            .unwrap();

        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        with_test_context(&lhs, &rhs, &executor, &mut table, |ctx| {
            let error = Action::Create { sid: disk }.commit(ctx).unwrap_err();
            assert!(
                format!("{error:#}").contains("disks cannot be created"),
                "{error:#}"
            );

            let error = Action::Create { sid: stray }.commit(ctx).unwrap_err();
            assert!(
                format!("{error:#}").contains("stray block devices cannot be created"),
                "{error:#}"
            );
        });
        assert!(executor.commands().is_empty());
    }

    #[test]
    fn test_modify_dispatch() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs
            .create_device(Disk::new("/dev/vdb").with_region(Region::from_sectors(0, 2048)))
            .unwrap();
        let fs = lhs
            .create_user(disk, Filesystem::new(FsType::Ext4))
            .unwrap();
        let vg = lhs.create_device(LvmVg::new("data")).unwrap();
        let mut rhs = lhs.clone();
        if let DeviceData::Filesystem(fs) = rhs.device_mut(fs).unwrap().data_mut() {
            fs.label = Some("scratch".into());
        }

        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        with_test_context(&lhs, &rhs, &executor, &mut table, |ctx| {
            Action::Modify {
                sid: fs,
                changes: vec![ModifiedAttribute::Label],
            }
            .commit(ctx)
            .unwrap();

            let error = Action::Modify {
                sid: vg,
                changes: vec![ModifiedAttribute::Label],
            }
            .commit(ctx)
            .unwrap_err();
            assert_eq!(error.to_string(), "Cannot change label of lvm-vg");

            Action::ReduceMissing { sid: fs }.commit(ctx).unwrap();
        });

        assert_eq!(executor.commands(), vec!["tune2fs -L scratch /dev/vdb"]);
    }
}
