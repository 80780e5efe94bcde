//! Classifies the differences between two device graphs into actions.

use std::{collections::BTreeSet, fmt::Display};

use log::{debug, trace};

use strata_api::{
    devicegraph::{
        Device, DeviceData, DeviceGraph, DeviceKind, DeviceKindFlag, Holder, HolderKind,
        MountPoint, TraversalFilter,
    },
    error::{DiffError, StrataError},
    Sid,
};
use sysdefs::mount::MountByType;

use crate::action::{Action, ModifiedAttribute, ResizeDirection};

/// Computes the actions turning `lhs` into `rhs`.
///
/// Actions come out grouped by sid in ascending order, followed by the
/// holder actions.
pub(super) fn diff(lhs: &DeviceGraph, rhs: &DeviceGraph) -> Result<Vec<Action>, StrataError> {
    let violations = rhs.check_consistency();
    if !violations.is_empty() {
        return Err(StrataError::new(DiffError::InconsistentTarget {
            violations: violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }));
    }

    let mut actions = Actions::default();

    let sids = lhs
        .sids()
        .into_iter()
        .chain(rhs.sids())
        .collect::<BTreeSet<_>>();

    for sid in sids {
        match (lhs.device(sid), rhs.device(sid)) {
            (Some(device), None) => removed_device(lhs, rhs, device, &mut actions),
            (None, Some(device)) => added_device(device, &mut actions),
            (Some(before), Some(after)) => {
                changed_device(lhs, rhs, before, after, &mut actions)?
            }
            (None, None) => {}
        }
    }

    diff_holders(lhs, rhs, &mut actions)?;

    let actions = compact_missing(lhs, actions.0);
    debug!("Found {} difference(s) between the device graphs", actions.len());
    Ok(actions)
}

#[derive(Default)]
struct Actions(Vec<Action>);

impl Actions {
    fn push(&mut self, action: Action) {
        if !self.0.contains(&action) {
            trace!("Planning '{action}'");
            self.0.push(action);
        }
    }
}

fn removed_device(lhs: &DeviceGraph, rhs: &DeviceGraph, device: &Device, actions: &mut Actions) {
    let sid = device.sid();
    if device.kind() == DeviceKind::BtrfsSubvolume {
        let fs = lhs.filesystem_of(sid);
        if fs.map_or(true, |fs| !rhs.contains(fs)) {
            debug!("Subvolume {sid} goes away with its filesystem");
            return;
        }
    }

    match device.as_mount_point() {
        Some(mp) => {
            if mp.active {
                actions.push(Action::Unmount { sid });
            }
            if mp.in_etc_fstab {
                actions.push(Action::RemoveFromEtcFstab { sid });
            }
        }
        None => actions.push(Action::Delete { sid }),
    }
}

fn added_device(device: &Device, actions: &mut Actions) {
    let sid = device.sid();
    match device.as_mount_point() {
        Some(mp) => {
            if mp.active {
                actions.push(Action::Mount { sid });
            }
            if mp.in_etc_fstab {
                actions.push(Action::AddToEtcFstab { sid });
            }
        }
        None => actions.push(Action::Create { sid }),
    }
}

fn ensure_unchanged<T>(
    device: &Device,
    attribute: &str,
    lhs: &T,
    rhs: &T,
) -> Result<(), StrataError>
where
    T: PartialEq + Display + ?Sized,
{
    if lhs == rhs {
        return Ok(());
    }

    Err(StrataError::new(DiffError::ImmutableAttribute {
        sid: device.sid(),
        kind: device.kind(),
        attribute: attribute.into(),
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    }))
}

fn changed_device(
    lhs: &DeviceGraph,
    rhs: &DeviceGraph,
    before: &Device,
    after: &Device,
    actions: &mut Actions,
) -> Result<(), StrataError> {
    let sid = before.sid();
    if before.kind() != after.kind() {
        return Err(StrataError::new(DiffError::IncompatibleTypes {
            sid,
            lhs: before.kind(),
            rhs: after.kind(),
        }));
    }

    // Planned as a full round trip, compacted afterwards.
    if before.is_missing() {
        actions.push(Action::Delete { sid });
        actions.push(Action::Create { sid });
    }

    let mut changes = Vec::new();

    match (before.data(), after.data()) {
        (DeviceData::Disk(a), DeviceData::Disk(b)) => {
            ensure_unchanged(before, "name", &a.name, &b.name)?;
            if let (Some(ra), Some(rb)) = (a.region, b.region) {
                ensure_unchanged(before, "region", &ra, &rb)?;
            }
        }
        (DeviceData::StrayBlkDevice(a), DeviceData::StrayBlkDevice(b)) => {
            ensure_unchanged(before, "name", &a.name, &b.name)?;
            if let (Some(ra), Some(rb)) = (a.region, b.region) {
                ensure_unchanged(before, "region", &ra, &rb)?;
            }
        }
        (DeviceData::PartitionTable(a), DeviceData::PartitionTable(b)) => {
            ensure_unchanged(before, "pt-type", &a.pt_type, &b.pt_type)?;
        }
        (DeviceData::Partition(a), DeviceData::Partition(b)) => {
            ensure_unchanged(before, "name", &a.name, &b.name)?;
            ensure_unchanged(before, "partition-type", &a.partition_type, &b.partition_type)?;
            ensure_unchanged(before, "region-start", &a.region.start(), &b.region.start())?;
            resize(lhs, rhs, sid, a.region.size_bytes(), b.region.size_bytes(), actions);
            if a.id != b.id {
                changes.push(ModifiedAttribute::PartitionId);
            }
        }
        (DeviceData::LvmVg(a), DeviceData::LvmVg(b)) => {
            if a.vg_name != b.vg_name {
                actions.push(Action::Rename { sid });
            }
            if a.extent_size != b.extent_size {
                changes.push(ModifiedAttribute::ExtentSize);
            }
        }
        (DeviceData::LvmLv(a), DeviceData::LvmLv(b)) => {
            if a.lv_name != b.lv_name {
                actions.push(Action::Rename { sid });
            }
            resize(lhs, rhs, sid, a.size, b.size, actions);
        }
        (DeviceData::Luks(a), DeviceData::Luks(b)) => {
            ensure_unchanged(before, "dm-name", &a.dm_name, &b.dm_name)?;
            // An unknown target UUID keeps the current one.
            if b.uuid.is_some() && a.uuid != b.uuid {
                changes.push(ModifiedAttribute::Uuid);
            }
        }
        (DeviceData::Filesystem(a), DeviceData::Filesystem(b)) => {
            ensure_unchanged(before, "fs-type", &a.fs_type, &b.fs_type)?;
            if a.label != b.label {
                changes.push(ModifiedAttribute::Label);
            }
            if b.uuid.is_some() && a.uuid != b.uuid {
                changes.push(ModifiedAttribute::Uuid);
            }
        }
        (DeviceData::BtrfsSubvolume(a), DeviceData::BtrfsSubvolume(b)) => {
            ensure_unchanged(before, "path", a.path.as_str(), b.path.as_str())?;
            if a.nocow != b.nocow {
                changes.push(ModifiedAttribute::Nocow);
            }
            if a.default != b.default {
                changes.push(ModifiedAttribute::DefaultSubvolume);
            }
        }
        (DeviceData::MountPoint(a), DeviceData::MountPoint(b)) => {
            changed_mount_point(lhs, rhs, sid, a, b, actions);
        }
        _ => {}
    }

    if !changes.is_empty() {
        actions.push(Action::Modify { sid, changes });
    }

    Ok(())
}

/// Plans a resize of a block device, followed by resizes of the encrypted
/// volumes and filesystems stacked on it.
fn resize(
    lhs: &DeviceGraph,
    rhs: &DeviceGraph,
    sid: Sid,
    before: u64,
    after: u64,
    actions: &mut Actions,
) {
    let direction = match after.cmp(&before) {
        std::cmp::Ordering::Greater => ResizeDirection::Grow,
        std::cmp::Ordering::Less => ResizeDirection::Shrink,
        std::cmp::Ordering::Equal => return,
    };

    actions.push(Action::Resize { sid, direction });

    let stacked = rhs.descendants(
        sid,
        TraversalFilter::holder_kind(HolderKind::User)
            .with_device_kinds(DeviceKindFlag::Luks | DeviceKindFlag::Filesystem),
    );
    for consumer in stacked {
        let kinds = (
            lhs.device(consumer).map(Device::kind),
            rhs.device(consumer).map(Device::kind),
        );
        if kinds.0.is_some() && kinds.0 == kinds.1 {
            actions.push(Action::Resize {
                sid: consumer,
                direction,
            });
        }
    }
}

fn changed_mount_point(
    lhs: &DeviceGraph,
    rhs: &DeviceGraph,
    sid: Sid,
    a: &MountPoint,
    b: &MountPoint,
    actions: &mut Actions,
) {
    let lhs_fs = lhs.filesystem_of(sid);
    let rhs_fs = rhs.filesystem_of(sid);
    let moved = lhs_fs != rhs_fs || lhs.subvolume_of(sid) != rhs.subvolume_of(sid);

    let remount = moved
        || a.path != b.path
        || a.mount_options != b.mount_options
        || a.mount_type != b.mount_type;

    match (a.active, b.active) {
        (true, false) => actions.push(Action::Unmount { sid }),
        (false, true) => actions.push(Action::Mount { sid }),
        (true, true) if remount => {
            actions.push(Action::Unmount { sid });
            actions.push(Action::Mount { sid });
        }
        _ => {}
    }

    // The fstab entry names the device by label or UUID, which may change
    // underneath the mount point.
    let spec_changed = match (
        lhs_fs.and_then(|fs| lhs.device(fs)?.as_filesystem()),
        rhs_fs.and_then(|fs| rhs.device(fs)?.as_filesystem()),
    ) {
        (Some(before), Some(after)) => match b.mount_by {
            MountByType::Uuid => after.uuid.is_some() && before.uuid != after.uuid,
            MountByType::Label => before.label != after.label,
            MountByType::Device => false,
        },
        _ => false,
    };

    let entry_changed = remount || spec_changed || a.mount_by != b.mount_by;

    match (a.in_etc_fstab, b.in_etc_fstab) {
        (true, false) => actions.push(Action::RemoveFromEtcFstab { sid }),
        (false, true) => actions.push(Action::AddToEtcFstab { sid }),
        (true, true) if entry_changed => actions.push(Action::UpdateInEtcFstab { sid }),
        _ => {}
    }
}

fn is_volume_group(graph: &DeviceGraph, sid: Sid) -> bool {
    graph.device(sid).map(Device::kind) == Some(DeviceKind::LvmVg)
}

fn survives(lhs: &DeviceGraph, rhs: &DeviceGraph, sid: Sid) -> bool {
    lhs.contains(sid) && rhs.contains(sid)
}

/// Holders only produce actions of their own for physical volumes. All
/// other holders come and go with the devices they connect.
fn diff_holders(
    lhs: &DeviceGraph,
    rhs: &DeviceGraph,
    actions: &mut Actions,
) -> Result<(), StrataError> {
    let unsupported = |holder: &Holder| {
        StrataError::new(DiffError::UnsupportedHolderChange {
            source_sid: holder.source,
            target_sid: holder.target,
            kind: holder.kind,
        })
    };

    for holder in rhs.holders() {
        if lhs.holder(holder.source, holder.target) == Some(holder) {
            continue;
        }

        if holder.kind == HolderKind::User && is_volume_group(rhs, holder.target) {
            actions.push(Action::Attach {
                provider: holder.source,
                consumer: holder.target,
            });
        } else if survives(lhs, rhs, holder.source) && survives(lhs, rhs, holder.target) {
            return Err(unsupported(&holder));
        }
    }

    for holder in lhs.holders() {
        if rhs.holder(holder.source, holder.target) == Some(holder) {
            continue;
        }

        if holder.kind == HolderKind::User && is_volume_group(lhs, holder.target) {
            if rhs.contains(holder.target) {
                actions.push(Action::Detach {
                    provider: holder.source,
                    consumer: holder.target,
                });
            }
        } else if survives(lhs, rhs, holder.source) && survives(lhs, rhs, holder.target) {
            return Err(unsupported(&holder));
        }
    }

    Ok(())
}

/// Collapses the delete and create of a missing device into a single
/// ReduceMissing action.
fn compact_missing(lhs: &DeviceGraph, actions: Vec<Action>) -> Vec<Action> {
    let is_missing = |sid: Sid| lhs.device(sid).map_or(false, Device::is_missing);
    let recreated = actions
        .iter()
        .filter_map(|action| match action {
            Action::Create { sid } => Some(*sid),
            _ => None,
        })
        .filter(|sid| is_missing(*sid))
        .filter(|sid| actions.contains(&Action::Delete { sid: *sid }))
        .collect::<BTreeSet<_>>();

    actions
        .into_iter()
        .filter_map(|action| match action {
            Action::Delete { sid } if recreated.contains(&sid) => {
                debug!("Keeping missing device {sid} instead of recreating it");
                Some(Action::ReduceMissing { sid })
            }
            Action::Create { sid } if recreated.contains(&sid) => None,
            action => Some(action),
        })
        .collect()
}
