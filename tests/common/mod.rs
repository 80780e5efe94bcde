#![allow(dead_code)]

use strata::{Action, ActionGraph};
use strata_api::{
    devicegraph::{
        DeviceGraph, Disk, Filesystem, HolderKind, LvmLv, LvmVg, MountPoint, Partition,
        PartitionTable,
    },
    Region, Sid,
};
use sysdefs::{
    filesystems::FsType,
    mount::MountByType,
    partitions::{PartitionId, PartitionType, PtType},
};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Sectors of 512 bytes in `bytes`.
pub fn sectors(bytes: u64) -> u64 {
    bytes / 512
}

pub fn disk(graph: &mut DeviceGraph, name: &str, size: u64) -> Sid {
    graph
        .create_device(Disk::new(name).with_region(Region::from_bytes(0, size, 512)))
        .unwrap()
}

/// Adds a primary partition starting at sector `start`.
pub fn partition(
    graph: &mut DeviceGraph,
    table: Sid,
    name: &str,
    start: u64,
    size: u64,
    id: PartitionId,
) -> Sid {
    graph
        .create_subdevice(
            table,
            Partition::new(
                name,
                Region::from_bytes(start, size, 512),
                PartitionType::Primary,
            )
            .with_id(id),
        )
        .unwrap()
}

/// Asserts that every precedence holds in the commit order.
pub fn assert_order_respects_precedences(actiongraph: &ActionGraph) {
    for (before, after, reason) in actiongraph.precedences() {
        let (Some(a), Some(b)) = (actiongraph.position(before), actiongraph.position(after))
        else {
            panic!("'{before}' or '{after}' is not ordered");
        };
        assert!(a < b, "'{before}' must precede '{after}' ({reason})");
    }
}

pub fn position(actiongraph: &ActionGraph, action: &Action) -> usize {
    actiongraph
        .position(action)
        .unwrap_or_else(|| panic!("'{action}' is not planned"))
}

/// A disk with a GPT, three 1 GiB partitions and nothing else, and the
/// same layout with the partitions joined into volume group `system`.
pub struct Compare4 {
    pub lhs: DeviceGraph,
    pub rhs: DeviceGraph,
    pub disk: Sid,
    pub gpt: Sid,
    pub partitions: Vec<Sid>,
    pub vg: Sid,
}

pub fn compare4() -> Compare4 {
    let mut lhs = DeviceGraph::new();
    let disk = disk(&mut lhs, "/dev/sda", 10 * GIB);

    let mut rhs = lhs.clone();
    let gpt = rhs
        .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
        .unwrap();
    let partitions = (0..3)
        .map(|i| {
            partition(
                &mut rhs,
                gpt,
                &format!("/dev/sda{}", i + 1),
                2048 + i * sectors(GIB),
                GIB,
                PartitionId::LVM,
            )
        })
        .collect::<Vec<_>>();

    let vg = rhs.create_device(LvmVg::new("system")).unwrap();
    for pv in &partitions {
        rhs.add_holder(*pv, vg, HolderKind::User).unwrap();
    }

    Compare4 {
        lhs,
        rhs,
        disk,
        gpt,
        partitions,
        vg,
    }
}

/// A fresh installation on an empty 10 GiB disk: an EFI system partition
/// and an LVM partition holding root and swap.
pub struct Install {
    pub lhs: DeviceGraph,
    pub rhs: DeviceGraph,
    pub gpt: Sid,
    pub esp: Sid,
    pub pv: Sid,
    pub vg: Sid,
    pub root: Sid,
    pub swap: Sid,
    pub esp_fs: Sid,
    pub root_fs: Sid,
    pub swap_fs: Sid,
    pub esp_mp: Sid,
    pub root_mp: Sid,
    pub swap_mp: Sid,
}

pub fn install() -> Install {
    let mut lhs = DeviceGraph::new();
    let disk = disk(&mut lhs, "/dev/vda", 10 * GIB);

    let mut rhs = lhs.clone();
    let gpt = rhs
        .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
        .unwrap();
    let esp = partition(&mut rhs, gpt, "/dev/vda1", 2048, 512 * MIB, PartitionId::ESP);
    let pv = partition(
        &mut rhs,
        gpt,
        "/dev/vda2",
        2048 + sectors(512 * MIB),
        8 * GIB,
        PartitionId::LVM,
    );

    let vg = rhs.create_device(LvmVg::new("system")).unwrap();
    rhs.add_holder(pv, vg, HolderKind::User).unwrap();
    let root = rhs
        .create_subdevice(vg, LvmLv::new("root", 4 * GIB))
        .unwrap();
    let swap = rhs
        .create_subdevice(vg, LvmLv::new("swap", GIB))
        .unwrap();

    let esp_fs = rhs
        .create_user(esp, Filesystem::new(FsType::Vfat).with_label("EFI"))
        .unwrap();
    let root_fs = rhs
        .create_user(
            root,
            Filesystem::new(FsType::Ext4)
                .with_label("root")
                .with_uuid("0c3c2e64-1d4f-4c4a-9a55-2a6a8f1f6c11"),
        )
        .unwrap();
    let swap_fs = rhs
        .create_user(swap, Filesystem::new(FsType::Swap))
        .unwrap();

    let esp_mp = rhs
        .create_subdevice(
            esp_fs,
            MountPoint::new("/boot/efi").with_options(vec!["umask=0077".into()]),
        )
        .unwrap();
    let root_mp = rhs
        .create_subdevice(root_fs, MountPoint::new("/"))
        .unwrap();
    let swap_mp = rhs
        .create_subdevice(
            swap_fs,
            MountPoint::new("swap").with_mount_by(MountByType::Device),
        )
        .unwrap();

    Install {
        lhs,
        rhs,
        gpt,
        esp,
        pv,
        vg,
        root,
        swap,
        esp_fs,
        root_fs,
        swap_fs,
        esp_mp,
        root_mp,
        swap_mp,
    }
}
