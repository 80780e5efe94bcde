//! Derives the precedences between planned actions.

use std::collections::{HashMap, HashSet};

use log::trace;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use strata_api::{
    devicegraph::{Device, DeviceGraph, DeviceKind, HolderKind, TraversalFilter},
    Sid,
};

use crate::action::{Action, ActionKind, ModifiedAttribute, ResizeDirection};

use super::ActionPetgraph;

/// The rule that put one action before another.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Precedence {
    /// Containers are created before and deleted after their contents.
    Subdevice,

    /// Providers are created before and deleted after their consumers.
    User,

    /// Mount points are unmounted before their devices go away.
    Unmount,

    /// Devices exist before they are mounted.
    Mount,

    /// Growing goes bottom up, shrinking top down.
    Resize,

    /// Space is freed in a container before it is used again.
    Container,

    /// Outer mount points are mounted first and unmounted last.
    NestedMount,

    /// Physical volumes are attached before and detached after the volume
    /// group's contents change.
    VolumeGroup,

    /// In-place changes happen after removals and before creations below
    /// the changed device.
    InPlace,

    /// Partitions are deleted from the highest number down and created from
    /// the lowest number up, so logical partitions go before their extended
    /// partition is deleted and after it is created.
    PartitionNumber,

    /// The old default subvolume of a filesystem is deleted before another
    /// subvolume becomes the default.
    DefaultSubvolume,

    /// Fixed order of actions on the same device.
    Phase,
}

impl std::fmt::Display for Precedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

/// Looks up planned actions by kind and sid.
struct ActionIndex {
    nodes: Vec<(NodeIndex, Action)>,
    by_key: HashMap<(ActionKind, Sid), Vec<NodeIndex>>,
}

impl ActionIndex {
    fn new(graph: &ActionPetgraph) -> Self {
        let nodes = graph
            .node_indices()
            .map(|idx| (idx, graph[idx].clone()))
            .collect::<Vec<_>>();

        let mut by_key: HashMap<_, Vec<_>> = HashMap::new();
        for (idx, action) in nodes.iter() {
            by_key
                .entry((action.kind(), action.sid()))
                .or_default()
                .push(*idx);
        }

        Self { nodes, by_key }
    }

    fn find(&self, kind: ActionKind, sid: Sid) -> &[NodeIndex] {
        self.by_key
            .get(&(kind, sid))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn of_kind(&self, kind: ActionKind) -> impl Iterator<Item = &(NodeIndex, Action)> + '_ {
        self.nodes
            .iter()
            .filter(move |(_, action)| action.kind() == kind)
    }

    /// Resize actions of a device in the given direction.
    fn resizes(&self, sid: Sid, direction: ResizeDirection) -> Vec<NodeIndex> {
        self.find(ActionKind::Resize, sid)
            .iter()
            .copied()
            .filter(|idx| {
                self.nodes.iter().any(|(other, action)| {
                    other == idx
                        && matches!(action, Action::Resize { direction: d, .. } if *d == direction)
                })
            })
            .collect()
    }
}

/// Collects edges, keeping the first reason given for each pair.
#[derive(Default)]
struct Edges {
    seen: HashSet<(NodeIndex, NodeIndex)>,
    edges: Vec<(NodeIndex, NodeIndex, Precedence)>,
}

impl Edges {
    fn add(&mut self, from: NodeIndex, to: NodeIndex, reason: Precedence) {
        if from != to && self.seen.insert((from, to)) {
            self.edges.push((from, to, reason));
        }
    }
}

/// Adds the precedence edges between the actions of `graph`.
pub(super) fn add_dependencies(graph: &mut ActionPetgraph, lhs: &DeviceGraph, rhs: &DeviceGraph) {
    let index = ActionIndex::new(graph);
    let mut edges = Edges::default();

    removals(&index, lhs, &mut edges);
    creations(&index, rhs, &mut edges);
    in_place_changes(&index, lhs, rhs, &mut edges);
    resizes(&index, lhs, rhs, &mut edges);
    containers(&index, lhs, rhs, &mut edges);
    partition_numbers(&index, lhs, rhs, &mut edges);
    nested_mounts(&index, lhs, rhs, &mut edges);
    volume_groups(&index, lhs, rhs, &mut edges);
    default_subvolumes(&index, lhs, rhs, &mut edges);
    phases(&index, &mut edges);

    for (from, to, reason) in edges.edges {
        trace!("'{}' before '{}' ({reason})", graph[from], graph[to]);
        graph.add_edge(from, to, reason);
    }
}

/// Removals happen before the deletion of everything the removed device is
/// built on.
fn removals(index: &ActionIndex, lhs: &DeviceGraph, edges: &mut Edges) {
    for (idx, action) in index.nodes.iter() {
        let kind = action.kind();
        if !kind.is_removal() {
            continue;
        }

        // The physical volume for detach, the device itself otherwise.
        let base = action.secondary_sid();
        let contained_in =
            lhs.ancestors(base, TraversalFilter::holder_kind(HolderKind::Subdevice));

        let mut targets = lhs.ancestors(base, TraversalFilter::all());
        if kind != ActionKind::Delete {
            targets.insert(0, base);
        }

        for target in targets {
            let reason = match kind {
                ActionKind::Unmount | ActionKind::RemoveFromEtcFstab => Precedence::Unmount,
                ActionKind::Detach => Precedence::VolumeGroup,
                _ if contained_in.contains(&target) => Precedence::Subdevice,
                _ => Precedence::User,
            };

            for delete in index.find(ActionKind::Delete, target) {
                edges.add(*idx, *delete, reason);
            }
        }
    }
}

/// Creations happen after the creation of everything the new device is
/// built on.
fn creations(index: &ActionIndex, rhs: &DeviceGraph, edges: &mut Edges) {
    for (idx, action) in index.nodes.iter() {
        let kind = action.kind();
        if !kind.is_creation() {
            continue;
        }

        let bases = match action {
            Action::Attach { provider, consumer } => vec![*provider, *consumer],
            _ => vec![action.sid()],
        };

        for base in bases {
            let contains =
                rhs.ancestors(base, TraversalFilter::holder_kind(HolderKind::Subdevice));

            let mut sources = rhs.ancestors(base, TraversalFilter::all());
            if kind != ActionKind::Create {
                sources.insert(0, base);
            }

            for source in sources {
                let reason = match kind {
                    ActionKind::Mount | ActionKind::AddToEtcFstab => Precedence::Mount,
                    ActionKind::Attach => Precedence::VolumeGroup,
                    _ if contains.contains(&source) => Precedence::Subdevice,
                    _ => Precedence::User,
                };

                for create in index.find(ActionKind::Create, source) {
                    edges.add(*create, *idx, reason);
                }
            }
        }
    }
}

/// A device changed in place is changed after everything below it was
/// removed and before anything new below it appears.
fn in_place_changes(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    const BEFORE: [ActionKind; 3] = [
        ActionKind::Unmount,
        ActionKind::RemoveFromEtcFstab,
        ActionKind::Delete,
    ];
    const AFTER: [ActionKind; 6] = [
        ActionKind::Create,
        ActionKind::Rename,
        ActionKind::Attach,
        ActionKind::UpdateInEtcFstab,
        ActionKind::Mount,
        ActionKind::AddToEtcFstab,
    ];

    for (idx, action) in index.nodes.iter() {
        if !action.kind().is_modification() {
            continue;
        }
        let sid = action.sid();

        for below in lhs.descendants(sid, TraversalFilter::all()) {
            for kind in BEFORE {
                for other in index.find(kind, below) {
                    edges.add(*other, *idx, Precedence::InPlace);
                }
            }
        }

        for below in rhs.descendants(sid, TraversalFilter::all()) {
            for kind in AFTER {
                for other in index.find(kind, below) {
                    edges.add(*idx, *other, Precedence::InPlace);
                }
            }
        }
    }
}

/// Growing a device comes before growing what is stacked on it, shrinking
/// comes after. A physical volume carries the logical volumes of its volume
/// group: they shrink or go away before it shrinks, and grow or appear after
/// it grew.
fn resizes(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    for (idx, action) in index.of_kind(ActionKind::Resize) {
        let Action::Resize { sid, direction } = action else {
            continue;
        };
        // What sits on the device before it shrinks, or after it grew.
        let graph = match direction {
            ResizeDirection::Grow => rhs,
            ResizeDirection::Shrink => lhs,
        };

        for consumer in graph.children(*sid, Some(HolderKind::User)) {
            for other in index.resizes(consumer, *direction) {
                match direction {
                    ResizeDirection::Grow => edges.add(*idx, other, Precedence::Resize),
                    ResizeDirection::Shrink => edges.add(other, *idx, Precedence::Resize),
                }
            }

            if graph.device(consumer).map(Device::kind) != Some(DeviceKind::LvmVg) {
                continue;
            }
            for lv in graph.children(consumer, Some(HolderKind::Subdevice)) {
                match direction {
                    ResizeDirection::Grow => {
                        for other in index.find(ActionKind::Create, lv) {
                            edges.add(*idx, *other, Precedence::Resize);
                        }
                        for other in index.resizes(lv, ResizeDirection::Grow) {
                            edges.add(*idx, other, Precedence::Resize);
                        }
                    }
                    ResizeDirection::Shrink => {
                        for other in index.find(ActionKind::Delete, lv) {
                            edges.add(*other, *idx, Precedence::Resize);
                        }
                        for other in index.resizes(lv, ResizeDirection::Shrink) {
                            edges.add(other, *idx, Precedence::Resize);
                        }
                    }
                }
            }
        }
    }
}

/// Within a container that exists before and after, actions freeing space
/// come before actions using space.
fn containers(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    for container in lhs.sids() {
        if !rhs.contains(container) {
            continue;
        }

        let mut frees = Vec::new();
        for child in lhs.children(container, None) {
            frees.extend_from_slice(index.find(ActionKind::Delete, child));
            frees.extend(index.resizes(child, ResizeDirection::Shrink));
        }
        frees.extend(
            index
                .find(ActionKind::Detach, container)
                .iter()
                .copied(),
        );

        let mut uses = Vec::new();
        for child in rhs.children(container, None) {
            uses.extend_from_slice(index.find(ActionKind::Create, child));
            uses.extend(index.resizes(child, ResizeDirection::Grow));
        }

        for free in frees.iter() {
            for used in uses.iter() {
                edges.add(*free, *used, Precedence::Container);
            }
        }
    }
}

/// Partitions of `table` with an action of `kind`, ordered by number.
fn numbered(
    index: &ActionIndex,
    graph: &DeviceGraph,
    table: Sid,
    kind: ActionKind,
) -> Vec<(u32, NodeIndex)> {
    let mut found = Vec::new();
    for child in graph.children(table, Some(HolderKind::Subdevice)) {
        let Some(number) = graph
            .device(child)
            .and_then(Device::as_partition)
            .and_then(|partition| partition.number())
        else {
            continue;
        };
        found.extend(index.find(kind, child).iter().map(|idx| (number, *idx)));
    }
    found.sort();
    found
}

/// Partitions of one table are deleted in descending and created in
/// ascending order of their numbers.
fn partition_numbers(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    let is_table = |graph: &DeviceGraph, sid: Sid| {
        graph.device(sid).map(Device::kind) == Some(DeviceKind::PartitionTable)
    };

    for table in lhs.sids().into_iter().filter(|sid| is_table(lhs, *sid)) {
        let deletes = numbered(index, lhs, table, ActionKind::Delete);
        for pair in deletes.windows(2) {
            edges.add(pair[1].1, pair[0].1, Precedence::PartitionNumber);
        }
    }

    for table in rhs.sids().into_iter().filter(|sid| is_table(rhs, *sid)) {
        let creates = numbered(index, rhs, table, ActionKind::Create);
        for pair in creates.windows(2) {
            edges.add(pair[0].1, pair[1].1, Precedence::PartitionNumber);
        }
    }
}

fn mount_path(graph: &DeviceGraph, sid: Sid) -> Option<&std::path::Path> {
    graph
        .device(sid)
        .and_then(|device| device.as_mount_point())
        .map(|mp| mp.path.as_path())
}

/// Mount points are mounted outside in and unmounted inside out. Nothing is
/// mounted on or below a path before the old mount there is gone.
fn nested_mounts(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    let mounts = index
        .of_kind(ActionKind::Mount)
        .filter_map(|(idx, action)| Some((*idx, mount_path(rhs, action.sid())?)))
        .collect::<Vec<_>>();
    let unmounts = index
        .of_kind(ActionKind::Unmount)
        .filter_map(|(idx, action)| Some((*idx, mount_path(lhs, action.sid())?)))
        .collect::<Vec<_>>();

    for (outer, outer_path) in mounts.iter() {
        for (inner, inner_path) in mounts.iter() {
            if outer_path != inner_path && inner_path.starts_with(outer_path) {
                edges.add(*outer, *inner, Precedence::NestedMount);
            }
        }
    }

    for (outer, outer_path) in unmounts.iter() {
        for (inner, inner_path) in unmounts.iter() {
            if outer_path != inner_path && inner_path.starts_with(outer_path) {
                edges.add(*inner, *outer, Precedence::NestedMount);
            }
        }
    }

    for (unmount, old_path) in unmounts.iter() {
        for (mount, new_path) in mounts.iter() {
            if new_path.starts_with(old_path) || old_path.starts_with(new_path) {
                edges.add(*unmount, *mount, Precedence::NestedMount);
            }
        }
    }
}

/// Physical volumes join a volume group before logical volumes are created
/// or grown in it, and leave it after logical volumes were deleted or
/// shrunk.
fn volume_groups(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    for (idx, action) in index.of_kind(ActionKind::Attach) {
        for lv in rhs.children(action.sid(), Some(HolderKind::Subdevice)) {
            for other in index.find(ActionKind::Create, lv) {
                edges.add(*idx, *other, Precedence::VolumeGroup);
            }
            for other in index.resizes(lv, ResizeDirection::Grow) {
                edges.add(*idx, other, Precedence::VolumeGroup);
            }
        }
    }

    for (idx, action) in index.of_kind(ActionKind::Detach) {
        for lv in lhs.children(action.sid(), Some(HolderKind::Subdevice)) {
            for other in index.find(ActionKind::Delete, lv) {
                edges.add(*other, *idx, Precedence::VolumeGroup);
            }
            for other in index.resizes(lv, ResizeDirection::Shrink) {
                edges.add(other, *idx, Precedence::VolumeGroup);
            }
        }
    }
}

fn is_default_subvolume(graph: &DeviceGraph, sid: Sid) -> bool {
    graph
        .device(sid)
        .and_then(Device::as_btrfs_subvolume)
        .map_or(false, |subvolume| subvolume.default)
}

/// Deleting the default subvolume hands the default back to the top level,
/// so it happens before a new default of the same filesystem is set.
fn default_subvolumes(index: &ActionIndex, lhs: &DeviceGraph, rhs: &DeviceGraph, edges: &mut Edges) {
    let new_defaults = index
        .nodes
        .iter()
        .filter(|(_, action)| {
            matches!(action, Action::Create { .. })
                || matches!(action, Action::Modify { changes, .. }
                    if changes.contains(&ModifiedAttribute::DefaultSubvolume))
        })
        .filter(|(_, action)| is_default_subvolume(rhs, action.sid()))
        .collect::<Vec<_>>();

    for (idx, action) in index.of_kind(ActionKind::Delete) {
        if !is_default_subvolume(lhs, action.sid()) {
            continue;
        }
        let fs = lhs.filesystem_of(action.sid());
        for (other, new_default) in new_defaults.iter() {
            if fs.is_some() && rhs.filesystem_of(new_default.sid()) == fs {
                edges.add(*idx, *other, Precedence::DefaultSubvolume);
            }
        }
    }
}

/// Actions on the same device follow the phase order of their kinds.
fn phases(index: &ActionIndex, edges: &mut Edges) {
    let mut by_sid: HashMap<Sid, Vec<(u8, NodeIndex)>> = HashMap::new();
    for (idx, action) in index.nodes.iter() {
        by_sid
            .entry(action.sid())
            .or_default()
            .push((action.kind().phase_rank(), *idx));
    }

    for (_, mut actions) in by_sid {
        actions.sort();
        for (i, (rank, from)) in actions.iter().enumerate() {
            // Only the next higher rank, later ranks follow transitively.
            let Some(next_rank) = actions[i..]
                .iter()
                .map(|(r, _)| *r)
                .find(|r| r > rank)
            else {
                continue;
            };

            for (_, to) in actions.iter().filter(|(r, _)| *r == next_rank) {
                edges.add(*from, *to, Precedence::Phase);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use petgraph::graph::DiGraph;
    use sysdefs::{filesystems::FsType, partitions::PtType};

    use strata_api::{
        devicegraph::{
            BtrfsSubvolume, DeviceData, Disk, Filesystem, LvmLv, LvmVg, MountPoint, Partition,
            PartitionTable, RemovalMode,
        },
        Region,
    };
    use sysdefs::partitions::PartitionType;

    use super::*;

    fn edges_of(graph: &ActionPetgraph) -> Vec<(Action, Action, Precedence)> {
        graph
            .edge_indices()
            .filter_map(|edge| {
                let (from, to) = graph.edge_endpoints(edge)?;
                Some((graph[from].clone(), graph[to].clone(), graph[edge]))
            })
            .collect()
    }

    fn build(actions: Vec<Action>, lhs: &DeviceGraph, rhs: &DeviceGraph) -> ActionPetgraph {
        let mut graph = DiGraph::new();
        for action in actions {
            graph.add_node(action);
        }
        add_dependencies(&mut graph, lhs, rhs);
        graph
    }

    #[test]
    fn test_unmount_before_delete() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs.create_device(Disk::new("/dev/sdb")).unwrap();
        let fs = lhs.create_user(disk, Filesystem::new(FsType::Xfs)).unwrap();
        let mp = lhs.create_subdevice(fs, MountPoint::new("/srv")).unwrap();
        let rhs = DeviceGraph::new();

        let graph = build(
            vec![
                Action::Delete { sid: fs },
                Action::Unmount { sid: mp },
                Action::RemoveFromEtcFstab { sid: mp },
            ],
            &lhs,
            &rhs,
        );

        let edges = edges_of(&graph);
        assert!(edges.contains(&(
            Action::Unmount { sid: mp },
            Action::Delete { sid: fs },
            Precedence::Unmount
        )));
        assert!(edges.contains(&(
            Action::RemoveFromEtcFstab { sid: mp },
            Action::Delete { sid: fs },
            Precedence::Unmount
        )));
        assert!(edges.contains(&(
            Action::Unmount { sid: mp },
            Action::RemoveFromEtcFstab { sid: mp },
            Precedence::Phase
        )));
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn test_create_before_mount() {
        let lhs = DeviceGraph::new();
        let mut rhs = DeviceGraph::new();
        let disk = rhs.create_device(Disk::new("/dev/sdb")).unwrap();
        let gpt = rhs
            .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
            .unwrap();
        let fs = rhs
            .create_device(Filesystem::new(FsType::Ext4))
            .unwrap();
        let root = rhs.create_subdevice(fs, MountPoint::new("/")).unwrap();
        let boot = rhs.create_subdevice(fs, MountPoint::new("/boot")).unwrap();

        let graph = build(
            vec![
                Action::Create { sid: gpt },
                Action::Create { sid: fs },
                Action::Mount { sid: root },
                Action::Mount { sid: boot },
            ],
            &lhs,
            &rhs,
        );

        let edges = edges_of(&graph);
        assert!(edges.contains(&(
            Action::Create { sid: fs },
            Action::Mount { sid: root },
            Precedence::Mount
        )));
        assert!(edges.contains(&(
            Action::Mount { sid: root },
            Action::Mount { sid: boot },
            Precedence::NestedMount
        )));
        assert!(!edges
            .iter()
            .any(|(from, to, _)| *from == Action::Create { sid: gpt }
                || *to == Action::Create { sid: gpt }));
    }

    #[test]
    fn test_phase_edges_link_consecutive_ranks() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs.create_device(Disk::new("/dev/sdb")).unwrap();
        let fs = lhs.create_user(disk, Filesystem::new(FsType::Ext4)).unwrap();
        let mp = lhs.create_subdevice(fs, MountPoint::new("/data")).unwrap();
        let rhs = lhs.clone();

        let graph = build(
            vec![
                Action::AddToEtcFstab { sid: mp },
                Action::Mount { sid: mp },
                Action::Unmount { sid: mp },
            ],
            &lhs,
            &rhs,
        );

        let edges = edges_of(&graph);
        assert!(edges.contains(&(
            Action::Unmount { sid: mp },
            Action::Mount { sid: mp },
            Precedence::NestedMount
        )));
        assert!(edges.contains(&(
            Action::Mount { sid: mp },
            Action::AddToEtcFstab { sid: mp },
            Precedence::Phase
        )));
        assert_eq!(edges.len(), 2);
    }

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_physical_volume_resize_carries_logical_volumes() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs.create_device(Disk::new("/dev/sda")).unwrap();
        let gpt = lhs
            .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
            .unwrap();
        let pv = lhs
            .create_subdevice(
                gpt,
                Partition::new(
                    "/dev/sda1",
                    Region::from_bytes(2048, 20 * GIB, 512),
                    PartitionType::Primary,
                ),
            )
            .unwrap();
        let vg = lhs.create_user(pv, LvmVg::new("system")).unwrap();
        let root = lhs.create_subdevice(vg, LvmLv::new("root", 18 * GIB)).unwrap();
        let swap = lhs.create_subdevice(vg, LvmLv::new("swap", GIB)).unwrap();

        let mut rhs = lhs.clone();
        rhs.remove_device(swap, RemovalMode::Reject).unwrap();
        let DeviceData::Partition(smaller) = rhs.device_mut(pv).unwrap().data_mut() else {
            panic!("not a partition");
        };
        smaller.region = Region::from_bytes(2048, 10 * GIB, 512);
        let DeviceData::LvmLv(shrunk) = rhs.device_mut(root).unwrap().data_mut() else {
            panic!("not a logical volume");
        };
        shrunk.size = 8 * GIB;

        let shrink = |sid| Action::Resize {
            sid,
            direction: ResizeDirection::Shrink,
        };
        let graph = build(
            vec![shrink(pv), shrink(root), Action::Delete { sid: swap }],
            &lhs,
            &rhs,
        );
        let edges = edges_of(&graph);
        assert!(edges.contains(&(shrink(root), shrink(pv), Precedence::Resize)));
        assert!(edges.contains(&(Action::Delete { sid: swap }, shrink(pv), Precedence::Resize)));

        // The same change backwards grows the partition first.
        let grow = |sid| Action::Resize {
            sid,
            direction: ResizeDirection::Grow,
        };
        let graph = build(
            vec![Action::Create { sid: swap }, grow(root), grow(pv)],
            &rhs,
            &lhs,
        );
        let edges = edges_of(&graph);
        assert!(edges.contains(&(grow(pv), grow(root), Precedence::Resize)));
        assert!(edges.contains(&(grow(pv), Action::Create { sid: swap }, Precedence::Resize)));
    }

    #[test]
    fn test_partitions_follow_their_numbers() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs.create_device(Disk::new("/dev/sda")).unwrap();
        let msdos = lhs
            .create_subdevice(disk, PartitionTable::new(PtType::Msdos))
            .unwrap();
        let add = |graph: &mut DeviceGraph, name: &str, start: u64, size: u64, kind: PartitionType| {
            graph
                .create_subdevice(
                    msdos,
                    Partition::new(name, Region::from_bytes(start, size, 512), kind),
                )
                .unwrap()
        };
        let extended = add(&mut lhs, "/dev/sda2", 2048, 8 * GIB, PartitionType::Extended);
        let first = add(&mut lhs, "/dev/sda5", 4096, GIB, PartitionType::Logical);
        let second = add(
            &mut lhs,
            "/dev/sda6",
            4096 + 2 * 1024 * 1024 + 2048,
            GIB,
            PartitionType::Logical,
        );
        let rhs = DeviceGraph::new();

        let delete = |sid| Action::Delete { sid };
        let graph = build(
            vec![delete(first), delete(extended), delete(second)],
            &lhs,
            &rhs,
        );
        let edges = edges_of(&graph);
        assert!(edges.contains(&(delete(second), delete(first), Precedence::PartitionNumber)));
        assert!(edges.contains(&(delete(first), delete(extended), Precedence::PartitionNumber)));

        let create = |sid| Action::Create { sid };
        let graph = build(
            vec![create(second), create(first), create(extended)],
            &rhs,
            &lhs,
        );
        let edges = edges_of(&graph);
        assert!(edges.contains(&(create(extended), create(first), Precedence::PartitionNumber)));
        assert!(edges.contains(&(create(first), create(second), Precedence::PartitionNumber)));
        assert!(!edges.contains(&(create(second), create(first), Precedence::PartitionNumber)));
    }

    #[test]
    fn test_old_default_subvolume_goes_first() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs.create_device(Disk::new("/dev/vdc")).unwrap();
        let fs = lhs
            .create_user(disk, Filesystem::new(FsType::Btrfs))
            .unwrap();
        let at = lhs
            .create_subdevice(fs, BtrfsSubvolume::new("@"))
            .unwrap();
        let snapshot = lhs
            .create_subdevice(fs, BtrfsSubvolume::new("snapshot").with_default(true))
            .unwrap();
        let mut rhs = lhs.clone();
        rhs.remove_device(snapshot, RemovalMode::Reject).unwrap();
        let root = rhs
            .create_subdevice(at, BtrfsSubvolume::new("@/root").with_default(true))
            .unwrap();
        let plain = rhs
            .create_subdevice(at, BtrfsSubvolume::new("@/srv"))
            .unwrap();

        let graph = build(
            vec![
                Action::Create { sid: root },
                Action::Create { sid: plain },
                Action::Delete { sid: snapshot },
            ],
            &lhs,
            &rhs,
        );
        let edges = edges_of(&graph);
        assert!(edges.contains(&(
            Action::Delete { sid: snapshot },
            Action::Create { sid: root },
            Precedence::DefaultSubvolume
        )));
        assert!(!edges
            .iter()
            .any(|(from, to, _)| from == &Action::Delete { sid: snapshot }
                && to == &Action::Create { sid: plain }));
    }
}
