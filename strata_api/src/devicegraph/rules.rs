//! Containment rules of the device graph.

use petgraph::algo;

use sysdefs::{filesystems::FsType, partitions::PartitionType};

use crate::Sid;

use super::{
    cardinality::ValidCardinality,
    device::{Device, DeviceData, DeviceKind, DeviceKindFlag},
    error::StructuralError,
    graph::{DeviceGraph, TraversalFilter},
    holder::HolderKind,
};

/// Parent requirements of a device kind for one holder kind.
struct ParentRule {
    holder_kind: HolderKind,
    cardinality: ValidCardinality,
    allowed: DeviceKindFlag,
}

impl DeviceKind {
    /// Returns the parents this device kind requires, per holder kind.
    fn parent_rules(self) -> [ParentRule; 2] {
        let (subdevice, user) = match self {
            Self::Disk | Self::StrayBlkDevice => (
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
            ),
            Self::PartitionTable => (
                (ValidCardinality::new_exact(1), DeviceKindFlag::Disk),
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
            ),
            Self::Partition => (
                (
                    ValidCardinality::new_exact(1),
                    DeviceKindFlag::PartitionTable,
                ),
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
            ),
            Self::LvmVg => (
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
                (ValidCardinality::new_at_least(0), DeviceKindFlag::BlkDevice),
            ),
            Self::LvmLv => (
                (ValidCardinality::new_exact(1), DeviceKindFlag::LvmVg),
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
            ),
            Self::Luks | Self::Filesystem => (
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
                (ValidCardinality::new_exact(1), DeviceKindFlag::BlkDevice),
            ),
            Self::BtrfsSubvolume => (
                (
                    ValidCardinality::new_exact(1),
                    DeviceKindFlag::Filesystem | DeviceKindFlag::BtrfsSubvolume,
                ),
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
            ),
            Self::MountPoint => (
                (ValidCardinality::new_exact(1), DeviceKindFlag::Mountable),
                (ValidCardinality::new_zero(), DeviceKindFlag::empty()),
            ),
        };

        [
            ParentRule {
                holder_kind: HolderKind::Subdevice,
                cardinality: subdevice.0,
                allowed: subdevice.1,
            },
            ParentRule {
                holder_kind: HolderKind::User,
                cardinality: user.0,
                allowed: user.1,
            },
        ]
    }
}

/// Runs all checks and returns the violations found.
pub(super) fn check(graph: &DeviceGraph) -> Vec<StructuralError> {
    let mut violations = check_index(graph);

    if algo::is_cyclic_directed(&graph.inner) {
        violations.push(StructuralError::CycleDetected);
    }

    for device in graph.devices() {
        violations.extend(check_parents(graph, device));
        violations.extend(check_consumers(graph, device));

        match device.data() {
            DeviceData::PartitionTable(_) => {
                violations.extend(check_partitions(graph, device.sid()))
            }
            DeviceData::Filesystem(fs) => {
                violations.extend(check_subvolumes(graph, device.sid(), fs.fs_type))
            }
            _ => {}
        }
    }

    violations
}

/// Checks that the sid index and the stored devices agree.
fn check_index(graph: &DeviceGraph) -> Vec<StructuralError> {
    let mut violations = Vec::new();

    let mut indexed = graph.index.iter().collect::<Vec<_>>();
    indexed.sort_by_key(|(sid, _)| **sid);
    for (sid, idx) in indexed {
        match graph.inner.node_weight(*idx) {
            Some(device) if device.sid() == *sid => {}
            _ => violations.push(StructuralError::IndexMismatch(*sid)),
        }
    }

    for device in graph.devices() {
        if !graph.index.contains_key(&device.sid()) {
            violations.push(StructuralError::IndexMismatch(device.sid()));
        }
    }

    violations
}

fn check_parents(graph: &DeviceGraph, device: &Device) -> Vec<StructuralError> {
    let mut violations = Vec::new();
    let kind = device.kind();

    for rule in kind.parent_rules() {
        let parents = graph.parents(device.sid(), Some(rule.holder_kind));

        if !rule.cardinality.contains(parents.len()) {
            violations.push(StructuralError::InvalidParentCount {
                sid: device.sid(),
                kind,
                holder_kind: rule.holder_kind,
                count: parents.len(),
                expected: rule.cardinality,
            });
        }

        for parent in parents {
            let Some(parent_kind) = graph.device(parent).map(Device::kind) else {
                continue;
            };

            if !rule.allowed.contains(parent_kind.as_flag()) {
                violations.push(StructuralError::InvalidParentKind {
                    sid: device.sid(),
                    kind,
                    holder_kind: rule.holder_kind,
                    parent,
                    parent_kind,
                });
            }
        }
    }

    violations
}

/// Checks how a device is consumed by its children.
fn check_consumers(graph: &DeviceGraph, device: &Device) -> Vec<StructuralError> {
    let mut violations = Vec::new();
    let sid = device.sid();

    let users = graph.children(sid, Some(HolderKind::User)).len();
    let partition_tables = graph
        .children(sid, Some(HolderKind::Subdevice))
        .into_iter()
        .filter(|child| graph.device(*child).map(Device::kind) == Some(DeviceKind::PartitionTable))
        .count();

    if device.kind().is_blk_device() && users > 1 {
        violations.push(StructuralError::TooManyUsers { sid, count: users });
    }

    if partition_tables > 1 {
        violations.push(StructuralError::TooManyPartitionTables {
            sid,
            count: partition_tables,
        });
    }

    if partition_tables > 0 && users > 0 {
        violations.push(StructuralError::ConflictingUsage { sid });
    }

    violations
}

/// Checks the partitions of one partition table against each other and
/// against the disk.
fn check_partitions(graph: &DeviceGraph, table: Sid) -> Vec<StructuralError> {
    let mut violations = Vec::new();

    let partitions = graph
        .children(table, Some(HolderKind::Subdevice))
        .into_iter()
        .filter_map(|sid| graph.device(sid))
        .filter_map(|device| Some((device.sid(), device.as_partition()?)))
        .collect::<Vec<_>>();

    // Logical partitions are nested in the extended partition.
    for (i, (sid, partition)) in partitions.iter().enumerate() {
        for (other, other_partition) in partitions.iter().skip(i + 1) {
            let nested = matches!(
                (partition.partition_type, other_partition.partition_type),
                (PartitionType::Logical, PartitionType::Extended)
                    | (PartitionType::Extended, PartitionType::Logical)
            );
            if !nested && partition.region.overlaps(&other_partition.region) {
                violations.push(StructuralError::PartitionOverlap {
                    sid: *sid,
                    other: *other,
                });
            }
        }
    }

    let disk = graph.subdevice_parent(table).and_then(|disk| {
        let region = graph.device(disk)?.as_disk()?.region?;
        Some((disk, region))
    });

    if let Some((disk, disk_region)) = disk {
        for (sid, partition) in partitions.iter() {
            if !disk_region.contains(&partition.region) {
                violations.push(StructuralError::PartitionOutOfBounds { sid: *sid, disk });
            }
        }
    }

    violations
}

/// Checks the subvolumes below a filesystem.
fn check_subvolumes(graph: &DeviceGraph, fs: Sid, fs_type: FsType) -> Vec<StructuralError> {
    let mut violations = Vec::new();

    let subvolumes = graph
        .descendants(
            fs,
            TraversalFilter::holder_kind(HolderKind::Subdevice)
                .with_device_kinds(DeviceKindFlag::BtrfsSubvolume),
        )
        .into_iter()
        .filter_map(|sid| Some((sid, graph.device(sid)?.as_btrfs_subvolume()?)))
        .collect::<Vec<_>>();
    if subvolumes.is_empty() {
        return violations;
    }

    if fs_type != FsType::Btrfs {
        violations.push(StructuralError::SubvolumeOutsideBtrfs {
            sid: subvolumes[0].0,
            fs,
        });
    }

    // Nested subvolumes live below the path of their parent.
    for (sid, subvolume) in subvolumes.iter() {
        let parent = graph
            .subdevice_parent(*sid)
            .and_then(|parent| graph.device(parent))
            .and_then(Device::as_btrfs_subvolume);
        if let Some(parent) = parent {
            let nested = subvolume
                .path
                .strip_prefix(parent.path.as_str())
                .map_or(false, |rest| rest.starts_with('/') && rest.len() > 1);
            if !nested {
                violations.push(StructuralError::SubvolumePathOutsideParent { sid: *sid });
            }
        }
    }

    let defaults = subvolumes
        .iter()
        .filter(|(_, subvolume)| subvolume.default)
        .count();
    if defaults > 1 {
        violations.push(StructuralError::TooManyDefaultSubvolumes { fs, count: defaults });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    use sysdefs::{filesystems::FsType, partitions::PtType};

    use crate::{
        devicegraph::device::{
            BtrfsSubvolume, Disk, Filesystem, LvmLv, LvmVg, MountPoint, Partition, PartitionTable,
            StrayBlkDevice,
        },
        Region,
    };

    fn disk_with_table(graph: &mut DeviceGraph) -> (Sid, Sid) {
        let disk = graph
            .create_device(Disk::new("/dev/sda").with_region(Region::new(0, 1_000_000, 512)))
            .unwrap();
        let gpt = graph
            .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
            .unwrap();
        (disk, gpt)
    }

    fn partition(name: &str, start: u64, length: u64) -> Partition {
        Partition::new(name, Region::new(start, length, 512), PartitionType::Primary)
    }

    #[test]
    fn test_valid_layout() {
        let mut graph = DeviceGraph::new();
        let (_, gpt) = disk_with_table(&mut graph);
        let sda1 = graph
            .create_subdevice(gpt, partition("/dev/sda1", 2048, 1000))
            .unwrap();
        let sda2 = graph
            .create_subdevice(gpt, partition("/dev/sda2", 4096, 1000))
            .unwrap();
        let vg = graph.create_user(sda1, LvmVg::new("system")).unwrap();
        graph.add_holder(sda2, vg, HolderKind::User).unwrap();
        let lv = graph
            .create_subdevice(vg, LvmLv::new("root", 1 << 20))
            .unwrap();
        let fs = graph.create_user(lv, Filesystem::new(FsType::Xfs)).unwrap();
        graph.create_subdevice(fs, MountPoint::new("/")).unwrap();

        assert_eq!(graph.check_consistency(), vec![]);
    }

    #[test]
    fn test_partition_parent_must_be_table() {
        let mut graph = DeviceGraph::new();
        let (_, gpt) = disk_with_table(&mut graph);
        let sda1 = graph
            .create_subdevice(gpt, partition("/dev/sda1", 2048, 1000))
            .unwrap();
        let nested = graph
            .create_subdevice(sda1, partition("/dev/sda2", 4096, 1000))
            .unwrap();

        assert_eq!(
            graph.check_consistency(),
            vec![StructuralError::InvalidParentKind {
                sid: nested,
                kind: DeviceKind::Partition,
                holder_kind: HolderKind::Subdevice,
                parent: sda1,
                parent_kind: DeviceKind::Partition,
            }]
        );
    }

    #[test]
    fn test_missing_parent() {
        let mut graph = DeviceGraph::new();
        let fs = graph.create_device(Filesystem::new(FsType::Ext4)).unwrap();

        assert_eq!(
            graph.check_consistency(),
            vec![StructuralError::InvalidParentCount {
                sid: fs,
                kind: DeviceKind::Filesystem,
                holder_kind: HolderKind::User,
                count: 0,
                expected: ValidCardinality::new_exact(1),
            }]
        );
    }

    #[test]
    fn test_overlap_and_bounds() {
        let mut graph = DeviceGraph::new();
        let (disk, gpt) = disk_with_table(&mut graph);
        let sda1 = graph
            .create_subdevice(gpt, partition("/dev/sda1", 2048, 4096))
            .unwrap();
        let sda2 = graph
            .create_subdevice(gpt, partition("/dev/sda2", 4096, 1000))
            .unwrap();
        let sda3 = graph
            .create_subdevice(gpt, partition("/dev/sda3", 999_000, 2000))
            .unwrap();

        assert_eq!(
            graph.check_consistency(),
            vec![
                StructuralError::PartitionOverlap {
                    sid: sda1,
                    other: sda2
                },
                StructuralError::PartitionOutOfBounds { sid: sda3, disk },
            ]
        );
    }

    #[test]
    fn test_consumer_conflicts() {
        let mut graph = DeviceGraph::new();
        let (disk, _) = disk_with_table(&mut graph);
        let fs = graph.create_user(disk, Filesystem::new(FsType::Ext4)).unwrap();
        let second = graph.create_user(disk, Filesystem::new(FsType::Ext4)).unwrap();

        let violations = graph.check_consistency();
        assert!(violations.contains(&StructuralError::TooManyUsers {
            sid: disk,
            count: 2
        }));
        assert!(violations.contains(&StructuralError::ConflictingUsage { sid: disk }));
        assert_ne!(fs, second);
    }

    #[test]
    fn test_two_partition_tables() {
        let mut graph = DeviceGraph::new();
        let (disk, _) = disk_with_table(&mut graph);
        graph
            .create_subdevice(disk, PartitionTable::new(PtType::Msdos))
            .unwrap();

        assert_eq!(
            graph.check_consistency(),
            vec![StructuralError::TooManyPartitionTables {
                sid: disk,
                count: 2
            }]
        );
    }

    #[test]
    fn test_subvolumes() {
        let mut graph = DeviceGraph::new();
        let (_, gpt) = disk_with_table(&mut graph);
        let sda1 = graph
            .create_subdevice(gpt, partition("/dev/sda1", 2048, 100_000))
            .unwrap();
        let btrfs = graph
            .create_user(sda1, Filesystem::new(FsType::Btrfs))
            .unwrap();
        let at = graph
            .create_subdevice(btrfs, BtrfsSubvolume::new("@"))
            .unwrap();
        let var = graph
            .create_subdevice(at, BtrfsSubvolume::new("@/var").with_nocow(true))
            .unwrap();
        graph.create_subdevice(var, MountPoint::new("/var")).unwrap();
        graph.create_subdevice(btrfs, MountPoint::new("/")).unwrap();
        let snapshot = graph
            .create_subdevice(
                at,
                BtrfsSubvolume::new("@/.snapshots/1/snapshot").with_default(true),
            )
            .unwrap();
        assert_eq!(graph.check_consistency(), vec![]);

        let stray = graph
            .create_subdevice(var, BtrfsSubvolume::new("@/srv").with_default(true))
            .unwrap();
        assert_eq!(
            graph.check_consistency(),
            vec![
                StructuralError::SubvolumePathOutsideParent { sid: stray },
                StructuralError::TooManyDefaultSubvolumes { fs: btrfs, count: 2 },
            ]
        );
        assert_ne!(snapshot, stray);
    }

    #[test]
    fn test_subvolume_needs_btrfs() {
        let mut graph = DeviceGraph::new();
        let xvda1 = graph
            .create_device(
                StrayBlkDevice::new("/dev/xvda1").with_region(Region::new(0, 100_000, 512)),
            )
            .unwrap();
        let ext4 = graph
            .create_user(xvda1, Filesystem::new(FsType::Ext4))
            .unwrap();
        let home = graph
            .create_subdevice(ext4, BtrfsSubvolume::new("home"))
            .unwrap();

        assert_eq!(
            graph.check_consistency(),
            vec![StructuralError::SubvolumeOutsideBtrfs { sid: home, fs: ext4 }]
        );

        // Stray block devices have no parents.
        let disk = graph.create_device(Disk::new("/dev/xvdb")).unwrap();
        graph.add_holder(disk, xvda1, HolderKind::Subdevice).unwrap();
        assert!(graph
            .check_consistency()
            .contains(&StructuralError::InvalidParentCount {
                sid: xvda1,
                kind: DeviceKind::StrayBlkDevice,
                holder_kind: HolderKind::Subdevice,
                count: 1,
                expected: ValidCardinality::new_zero(),
            }));
    }
}
