use strata_api::{
    config::Tense,
    constants::DEFAULT_FSTAB_PATH,
    devicegraph::{DeviceData, DeviceGraph},
    region::human_size,
    Sid,
};

use crate::engine::storage::usable_size;

use super::{Action, ModifiedAttribute, ResizeDirection};

fn tensed(tense: Tense, future: &'static str, past: &'static str) -> &'static str {
    match tense {
        Tense::Future => future,
        Tense::Past => past,
    }
}

/// Names a device with its kind, e.g. `partition /dev/sda1`.
pub(crate) fn subject(graph: &DeviceGraph, sid: Sid) -> String {
    let Some(device) = graph.device(sid) else {
        return graph.display_name(sid);
    };
    let name = graph.display_name(sid);

    match device.data() {
        DeviceData::Disk(_) => format!("disk {name}"),
        DeviceData::StrayBlkDevice(_) => format!("block device {name}"),
        DeviceData::Partition(_) => format!("partition {name}"),
        DeviceData::LvmLv(_) => format!("logical volume {name}"),
        DeviceData::Luks(_) => format!("encrypted volume {name}"),
        _ => name,
    }
}

/// Like [`subject`], with the size of sized devices and the carrier of
/// encrypted volumes and mount points.
pub(crate) fn describe(graph: &DeviceGraph, sid: Sid) -> String {
    let Some(device) = graph.device(sid) else {
        return graph.display_name(sid);
    };

    match device.data() {
        DeviceData::Partition(_) | DeviceData::LvmLv(_) | DeviceData::StrayBlkDevice(_) => {
            match device.size() {
                Some(size) => format!("{} ({})", subject(graph, sid), human_size(size)),
                None => subject(graph, sid),
            }
        }
        DeviceData::Luks(_) => match graph.blk_device_name_of(sid) {
            Some(blk) => format!("{} on {blk}", subject(graph, sid)),
            None => subject(graph, sid),
        },
        DeviceData::MountPoint(mp) => match mounted_device(graph, sid) {
            Some(mounted) => format!(
                "mount point {} of {}",
                mp.path.display(),
                graph.display_name(mounted)
            ),
            None => graph.display_name(sid),
        },
        _ => subject(graph, sid),
    }
}

fn new_name(graph: &DeviceGraph, sid: Sid) -> String {
    match graph.device(sid).map(|device| device.data()) {
        Some(DeviceData::LvmVg(vg)) => vg.vg_name.clone(),
        Some(DeviceData::LvmLv(lv)) => lv.lv_name.clone(),
        _ => graph.display_name(sid),
    }
}

fn mount_path(graph: &DeviceGraph, sid: Sid) -> String {
    graph
        .device(sid)
        .and_then(|device| device.as_mount_point())
        .map(|mp| mp.path.display().to_string())
        .unwrap_or_else(|| sid.to_string())
}

/// Swap is activated rather than mounted; returns its block device then.
fn swap_device(graph: &DeviceGraph, mount_point: Sid) -> Option<String> {
    let fs = graph.filesystem_of(mount_point)?;
    let filesystem = graph.device(fs)?.as_filesystem()?;
    if !filesystem.fs_type.is_swap() {
        return None;
    }
    graph.blk_device_name_of(fs)
}

/// The subvolume or filesystem a mount point mounts.
fn mounted_device(graph: &DeviceGraph, mount_point: Sid) -> Option<Sid> {
    graph
        .subvolume_of(mount_point)
        .or_else(|| graph.filesystem_of(mount_point))
}

fn mounted_filesystem(graph: &DeviceGraph, mount_point: Sid) -> String {
    mounted_device(graph, mount_point)
        .map(|mounted| graph.display_name(mounted))
        .unwrap_or_else(|| "unknown filesystem".into())
}

impl Action {
    /// Human readable description of the action.
    ///
    /// Removals are described with the devices of `lhs`, creations with the
    /// devices of `rhs`.
    pub fn text(&self, lhs: &DeviceGraph, rhs: &DeviceGraph, tense: Tense) -> String {
        match self {
            Self::Create { sid } => {
                format!("{} {}", tensed(tense, "Create", "Created"), describe(rhs, *sid))
            }
            Self::Delete { sid } => {
                format!("{} {}", tensed(tense, "Delete", "Deleted"), describe(lhs, *sid))
            }
            Self::Modify { sid, changes } => changes
                .iter()
                .map(|change| modify_text(rhs, *sid, *change, tense))
                .collect::<Vec<_>>()
                .join("; "),
            Self::Resize { sid, direction } => {
                let verb = match direction {
                    ResizeDirection::Grow => tensed(tense, "Grow", "Grew"),
                    ResizeDirection::Shrink => tensed(tense, "Shrink", "Shrank"),
                };
                match (usable_size(lhs, *sid), usable_size(rhs, *sid)) {
                    (Some(from), Some(to)) => format!(
                        "{verb} {} from {} to {}",
                        subject(rhs, *sid),
                        human_size(from),
                        human_size(to)
                    ),
                    _ => format!("{verb} {}", subject(rhs, *sid)),
                }
            }
            Self::Rename { sid } => format!(
                "{} {} to {}",
                tensed(tense, "Rename", "Renamed"),
                subject(lhs, *sid),
                new_name(rhs, *sid)
            ),
            Self::Mount { sid } => match swap_device(rhs, *sid) {
                Some(blk) => format!("{} swap on {blk}", tensed(tense, "Activate", "Activated")),
                None => format!(
                    "{} {} at {}",
                    tensed(tense, "Mount", "Mounted"),
                    mounted_filesystem(rhs, *sid),
                    mount_path(rhs, *sid)
                ),
            },
            Self::Unmount { sid } => match swap_device(lhs, *sid) {
                Some(blk) => format!(
                    "{} swap on {blk}",
                    tensed(tense, "Deactivate", "Deactivated")
                ),
                None => format!(
                    "{} {} at {}",
                    tensed(tense, "Unmount", "Unmounted"),
                    mounted_filesystem(lhs, *sid),
                    mount_path(lhs, *sid)
                ),
            },
            Self::AddToEtcFstab { sid } => format!(
                "{} {} to {DEFAULT_FSTAB_PATH}",
                tensed(tense, "Add", "Added"),
                describe(rhs, *sid)
            ),
            Self::RemoveFromEtcFstab { sid } => format!(
                "{} mount point {} from {DEFAULT_FSTAB_PATH}",
                tensed(tense, "Remove", "Removed"),
                mount_path(lhs, *sid)
            ),
            Self::UpdateInEtcFstab { sid } => format!(
                "{} mount point {} in {DEFAULT_FSTAB_PATH}",
                tensed(tense, "Update", "Updated"),
                mount_path(rhs, *sid)
            ),
            Self::ReduceMissing { sid } => match rhs.device(*sid).map(|d| d.data()) {
                Some(DeviceData::LvmVg(_)) => format!(
                    "{} missing physical volumes from {}",
                    tensed(tense, "Remove", "Removed"),
                    rhs.display_name(*sid)
                ),
                _ => format!(
                    "{} missing {}",
                    tensed(tense, "Keep", "Kept"),
                    describe(rhs, *sid)
                ),
            },
            Self::Attach { provider, consumer } => format!(
                "{} {} to {}",
                tensed(tense, "Add", "Added"),
                rhs.display_name(*provider),
                rhs.display_name(*consumer)
            ),
            Self::Detach { provider, consumer } => format!(
                "{} {} from {}",
                tensed(tense, "Remove", "Removed"),
                lhs.display_name(*provider),
                lhs.display_name(*consumer)
            ),
        }
    }
}

fn modify_text(rhs: &DeviceGraph, sid: Sid, change: ModifiedAttribute, tense: Tense) -> String {
    let set = "Set";
    let target = subject(rhs, sid);
    let data = rhs.device(sid).map(|device| device.data());

    match (change, data) {
        (ModifiedAttribute::Label, Some(DeviceData::Filesystem(fs))) => match &fs.label {
            Some(label) => format!("{set} label of {target} to '{label}'"),
            None => format!("{} label of {target}", tensed(tense, "Remove", "Removed")),
        },
        (ModifiedAttribute::Uuid, Some(DeviceData::Filesystem(fs))) => {
            format!(
                "{set} UUID of {target} to {}",
                fs.uuid.as_deref().unwrap_or("a new value")
            )
        }
        (ModifiedAttribute::Uuid, Some(DeviceData::Luks(luks))) => {
            format!(
                "{set} UUID of {target} to {}",
                luks.uuid.as_deref().unwrap_or("a new value")
            )
        }
        (ModifiedAttribute::PartitionId, Some(DeviceData::Partition(partition))) => {
            format!("{set} id of {target} to {}", partition.id)
        }
        (ModifiedAttribute::ExtentSize, Some(DeviceData::LvmVg(vg))) => format!(
            "{set} extent size of {target} to {}",
            human_size(vg.extent_size)
        ),
        (ModifiedAttribute::Nocow, Some(DeviceData::BtrfsSubvolume(subvolume))) => format!(
            "{} nocow for {target}",
            match (subvolume.nocow, tense) {
                (true, Tense::Future) => "Enable",
                (true, Tense::Past) => "Enabled",
                (false, Tense::Future) => "Disable",
                (false, Tense::Past) => "Disabled",
            }
        ),
        (ModifiedAttribute::DefaultSubvolume, Some(DeviceData::BtrfsSubvolume(subvolume))) => {
            if subvolume.default {
                format!("{set} {target} as default subvolume")
            } else {
                format!(
                    "{} default flag of {target}",
                    tensed(tense, "Remove", "Removed")
                )
            }
        }
        (change, _) => format!(
            "{} {} of {target}",
            tensed(tense, "Change", "Changed"),
            <&str>::from(change)
        ),
    }
}

#[cfg(test)]
mod tests {
    use sysdefs::{
        filesystems::FsType,
        partitions::{PartitionId, PartitionType, PtType},
    };

    use strata_api::{
        devicegraph::{
            BtrfsSubvolume, Disk, Filesystem, HolderKind, Luks, LvmLv, LvmVg, MountPoint, Partition,
            PartitionTable, StrayBlkDevice,
        },
        Region,
    };

    use super::*;

    const MIB: u64 = 1024 * 1024;

    struct Fixture {
        graph: DeviceGraph,
        sda1: Sid,
        fs: Sid,
        home: Sid,
    }

    fn fixture() -> Fixture {
        let mut graph = DeviceGraph::new();
        let disk = graph
            .create_device(Disk::new("/dev/sda").with_region(Region::from_sectors(0, 1 << 24)))
            .unwrap();
        let gpt = graph
            .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
            .unwrap();
        let sda1 = graph
            .create_subdevice(
                gpt,
                Partition::new(
                    "/dev/sda1",
                    Region::from_bytes(MIB, 250 * MIB, 512),
                    PartitionType::Primary,
                ),
            )
            .unwrap();
        let fs = graph
            .create_user(sda1, Filesystem::new(FsType::Ext4).with_label("data"))
            .unwrap();
        let home = graph.create_subdevice(fs, MountPoint::new("/home")).unwrap();

        Fixture {
            graph,
            sda1,
            fs,
            home,
        }
    }

    #[test]
    fn test_create_and_delete() {
        let f = fixture();
        let empty = DeviceGraph::new();

        let create = Action::Create { sid: f.sda1 };
        assert_eq!(
            create.text(&empty, &f.graph, Tense::Future),
            "Create partition /dev/sda1 (250.00 MiB)"
        );
        assert_eq!(
            create.text(&empty, &f.graph, Tense::Past),
            "Created partition /dev/sda1 (250.00 MiB)"
        );

        let delete = Action::Delete { sid: f.fs };
        assert_eq!(
            delete.text(&f.graph, &empty, Tense::Future),
            "Delete ext4 on /dev/sda1"
        );
    }

    #[test]
    fn test_mount_texts() {
        let f = fixture();

        assert_eq!(
            Action::Mount { sid: f.home }.text(&f.graph, &f.graph, Tense::Future),
            "Mount ext4 on /dev/sda1 at /home"
        );
        assert_eq!(
            Action::Unmount { sid: f.home }.text(&f.graph, &f.graph, Tense::Past),
            "Unmounted ext4 on /dev/sda1 at /home"
        );
        assert_eq!(
            Action::AddToEtcFstab { sid: f.home }.text(&f.graph, &f.graph, Tense::Future),
            "Add mount point /home of ext4 on /dev/sda1 to /etc/fstab"
        );
        assert_eq!(
            Action::RemoveFromEtcFstab { sid: f.home }.text(&f.graph, &f.graph, Tense::Past),
            "Removed mount point /home from /etc/fstab"
        );
    }

    #[test]
    fn test_swap_is_activated() {
        let mut graph = DeviceGraph::new();
        let disk = graph.create_device(Disk::new("/dev/vdb")).unwrap();
        let swap = graph
            .create_user(disk, Filesystem::new(FsType::Swap))
            .unwrap();
        let mp = graph.create_subdevice(swap, MountPoint::new("swap")).unwrap();

        assert_eq!(
            Action::Mount { sid: mp }.text(&graph, &graph, Tense::Future),
            "Activate swap on /dev/vdb"
        );
        assert_eq!(
            Action::Unmount { sid: mp }.text(&graph, &graph, Tense::Past),
            "Deactivated swap on /dev/vdb"
        );
    }

    #[test]
    fn test_modify_and_resize() {
        let f = fixture();
        let mut rhs = f.graph.clone();
        if let Some(DeviceData::Filesystem(fs)) = rhs.device_mut(f.fs).map(|d| d.data_mut()) {
            fs.label = None;
            fs.uuid = Some("1234-abcd".into());
        }
        if let Some(DeviceData::Partition(partition)) =
            rhs.device_mut(f.sda1).map(|d| d.data_mut())
        {
            partition.region = partition.region.with_length(partition.region.length() * 2);
            partition.id = PartitionId::LVM;
        }

        let modify = Action::Modify {
            sid: f.fs,
            changes: vec![ModifiedAttribute::Label, ModifiedAttribute::Uuid],
        };
        assert_eq!(
            modify.text(&f.graph, &rhs, Tense::Future),
            "Remove label of ext4 on /dev/sda1; Set UUID of ext4 on /dev/sda1 to 1234-abcd"
        );

        let id = Action::Modify {
            sid: f.sda1,
            changes: vec![ModifiedAttribute::PartitionId],
        };
        assert_eq!(
            id.text(&f.graph, &rhs, Tense::Past),
            "Set id of partition /dev/sda1 to 0x8e"
        );

        let grow = Action::Resize {
            sid: f.sda1,
            direction: ResizeDirection::Grow,
        };
        assert_eq!(
            grow.text(&f.graph, &rhs, Tense::Future),
            "Grow partition /dev/sda1 from 250.00 MiB to 500.00 MiB"
        );
        assert_eq!(
            grow.text(&f.graph, &rhs, Tense::Past),
            "Grew partition /dev/sda1 from 250.00 MiB to 500.00 MiB"
        );
    }

    #[test]
    fn test_lvm_texts() {
        let f = fixture();
        let mut lhs = f.graph.clone();
        lhs.remove_descendants(f.sda1).unwrap();
        let vg = lhs.create_user(f.sda1, LvmVg::new("system")).unwrap();
        let lv = lhs
            .create_subdevice(vg, LvmLv::new("root", 1024 * MIB))
            .unwrap();
        let cr = lhs
            .create_user(lv, Luks::new("cr_root").with_passphrase("secret"))
            .unwrap();

        let mut rhs = lhs.clone();
        if let Some(DeviceData::LvmVg(data)) = rhs.device_mut(vg).map(|d| d.data_mut()) {
            data.vg_name = "data".into();
        }

        assert_eq!(
            Action::Rename { sid: vg }.text(&lhs, &rhs, Tense::Future),
            "Rename volume group system to data"
        );
        assert_eq!(
            Action::Attach {
                provider: f.sda1,
                consumer: vg
            }
            .text(&lhs, &rhs, Tense::Future),
            "Add /dev/sda1 to volume group data"
        );
        assert_eq!(
            Action::Detach {
                provider: f.sda1,
                consumer: vg
            }
            .text(&lhs, &rhs, Tense::Past),
            "Removed /dev/sda1 from volume group system"
        );
        assert_eq!(
            Action::Create { sid: lv }.text(&lhs, &rhs, Tense::Future),
            "Create logical volume /dev/data/root (1.00 GiB)"
        );
        assert_eq!(
            Action::Create { sid: cr }.text(&lhs, &rhs, Tense::Future),
            "Create encrypted volume /dev/mapper/cr_root on /dev/data/root"
        );
        assert_eq!(
            Action::ReduceMissing { sid: vg }.text(&lhs, &rhs, Tense::Future),
            "Remove missing physical volumes from volume group data"
        );
        assert_eq!(rhs.holder(f.sda1, vg).map(|h| h.kind), Some(HolderKind::User));
    }

    #[test]
    fn test_subvolume_texts() {
        let mut lhs = DeviceGraph::new();
        let stray = lhs
            .create_device(
                StrayBlkDevice::new("/dev/xvda2")
                    .with_region(Region::from_bytes(0, 512 * MIB, 512)),
            )
            .unwrap();
        let fs = lhs
            .create_user(stray, Filesystem::new(FsType::Btrfs))
            .unwrap();
        let var = lhs
            .create_subdevice(fs, BtrfsSubvolume::new("@/var"))
            .unwrap();
        let mp = lhs.create_subdevice(var, MountPoint::new("/var")).unwrap();

        let mut rhs = lhs.clone();
        if let Some(DeviceData::BtrfsSubvolume(subvolume)) =
            rhs.device_mut(var).map(|d| d.data_mut())
        {
            subvolume.nocow = true;
            subvolume.default = true;
        }

        assert_eq!(describe(&lhs, stray), "block device /dev/xvda2 (512.00 MiB)");
        assert_eq!(
            Action::Create { sid: var }.text(&DeviceGraph::new(), &lhs, Tense::Future),
            "Create subvolume @/var on /dev/xvda2"
        );
        assert_eq!(
            Action::Mount { sid: mp }.text(&lhs, &lhs, Tense::Future),
            "Mount subvolume @/var on /dev/xvda2 at /var"
        );

        let modify = Action::Modify {
            sid: var,
            changes: vec![ModifiedAttribute::Nocow, ModifiedAttribute::DefaultSubvolume],
        };
        assert_eq!(
            modify.text(&lhs, &rhs, Tense::Future),
            "Enable nocow for subvolume @/var on /dev/xvda2; \
             Set subvolume @/var on /dev/xvda2 as default subvolume"
        );
        assert_eq!(
            modify.text(&rhs, &lhs, Tense::Past),
            "Disabled nocow for subvolume @/var on /dev/xvda2; \
             Removed default flag of subvolume @/var on /dev/xvda2"
        );
    }
}
