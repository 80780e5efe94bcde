use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use log::trace;
use petgraph::{
    algo,
    dot::{Config, Dot},
    stable_graph::{EdgeReference, NodeIndex, StableGraph},
    visit::{EdgeRef, IntoEdgeReferences},
    Direction,
};

use crate::Sid;

use super::{
    device::{Device, DeviceData, DeviceKind, DeviceKindFlag},
    error::StructuralError,
    holder::{Holder, HolderKind},
    rules,
};

/// The type of the graph used to store devices and their holders.
pub(super) type DevicePetgraph = StableGraph<Device, HolderKind>;

/// What to do with the dependents of a device being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Fail when the device still has dependents.
    Reject,

    /// Remove all descendants together with the device.
    Cascade,
}

/// Restricts a traversal to some holder and device kinds.
///
/// The holder kind restricts which edges are followed, the device kinds only
/// restrict which of the reached devices are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalFilter {
    pub holder_kind: Option<HolderKind>,
    pub device_kinds: Option<DeviceKindFlag>,
}

impl TraversalFilter {
    /// Follows every holder and returns every device.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn holder_kind(kind: HolderKind) -> Self {
        Self {
            holder_kind: Some(kind),
            device_kinds: None,
        }
    }

    pub fn with_device_kinds(mut self, kinds: DeviceKindFlag) -> Self {
        self.device_kinds = Some(kinds);
        self
    }

    fn follows(&self, kind: HolderKind) -> bool {
        self.holder_kind.map_or(true, |k| k == kind)
    }

    fn returns(&self, device: &Device) -> bool {
        self.device_kinds
            .map_or(true, |kinds| kinds.contains(device.kind().as_flag()))
    }
}

/// A snapshot of a storage configuration: devices and the holders between
/// them.
///
/// Devices are addressed by their sid. Cloning a graph keeps all sids, so two
/// graphs derived from each other can be compared device by device.
#[derive(Debug, Clone, Default)]
pub struct DeviceGraph {
    pub(super) inner: DevicePetgraph,
    pub(super) index: HashMap<Sid, NodeIndex>,

    /// Position of each device in insertion order. Node indices are reused
    /// after removals, so they cannot serve as one.
    inserted: HashMap<Sid, u64>,
    next_insertion: u64,
}

impl DeviceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.index.contains_key(&sid)
    }

    /// Returns the device with the given sid, if it is part of this graph.
    pub fn device(&self, sid: Sid) -> Option<&Device> {
        self.index
            .get(&sid)
            .and_then(|idx| self.inner.node_weight(*idx))
    }

    pub fn device_mut(&mut self, sid: Sid) -> Option<&mut Device> {
        self.index
            .get(&sid)
            .and_then(|idx| self.inner.node_weight_mut(*idx))
    }

    /// Returns all devices ordered by sid.
    pub fn devices(&self) -> Vec<&Device> {
        let mut devices = self
            .inner
            .node_indices()
            .map(|idx| &self.inner[idx])
            .collect::<Vec<_>>();
        devices.sort_by_key(|device| device.sid());
        devices
    }

    /// Returns all sids in ascending order.
    pub fn sids(&self) -> Vec<Sid> {
        let mut sids = self.index.keys().copied().collect::<Vec<_>>();
        sids.sort();
        sids
    }

    /// Returns all holders ordered by source, then target.
    pub fn holders(&self) -> Vec<Holder> {
        let mut holders = self
            .inner
            .edge_references()
            .map(|edge| self.holder_from_edge(edge.source(), edge.target(), *edge.weight()))
            .collect::<Vec<_>>();
        holders.sort();
        holders
    }

    /// Returns the holder from `source` to `target`, if any.
    pub fn holder(&self, source: Sid, target: Sid) -> Option<Holder> {
        let source_idx = *self.index.get(&source)?;
        let target_idx = *self.index.get(&target)?;
        self.inner
            .find_edge(source_idx, target_idx)
            .and_then(|edge| self.inner.edge_weight(edge))
            .map(|kind| Holder::new(source, target, *kind))
    }

    fn holder_from_edge(&self, source: NodeIndex, target: NodeIndex, kind: HolderKind) -> Holder {
        Holder::new(self.inner[source].sid(), self.inner[target].sid(), kind)
    }

    fn node_index(&self, sid: Sid) -> Result<NodeIndex, StructuralError> {
        self.index
            .get(&sid)
            .copied()
            .ok_or(StructuralError::UnknownSid(sid))
    }

    /// Adds a device to the graph and returns its sid.
    pub fn add_device(&mut self, device: Device) -> Result<Sid, StructuralError> {
        let sid = device.sid();
        if self.index.contains_key(&sid) {
            return Err(StructuralError::DuplicateSid(sid));
        }

        trace!("Adding device {} of kind '{}'", sid, device.kind());
        let idx = self.inner.add_node(device);
        self.index.insert(sid, idx);
        self.inserted.insert(sid, self.next_insertion);
        self.next_insertion += 1;
        Ok(sid)
    }

    /// Creates a new device with a fresh sid.
    pub fn create_device(&mut self, data: impl Into<DeviceData>) -> Result<Sid, StructuralError> {
        self.add_device(Device::new(data))
    }

    /// Creates a new device contained in `parent`.
    pub fn create_subdevice(
        &mut self,
        parent: Sid,
        data: impl Into<DeviceData>,
    ) -> Result<Sid, StructuralError> {
        self.create_child(parent, data, HolderKind::Subdevice)
    }

    /// Creates a new device consuming `provider`.
    pub fn create_user(
        &mut self,
        provider: Sid,
        data: impl Into<DeviceData>,
    ) -> Result<Sid, StructuralError> {
        self.create_child(provider, data, HolderKind::User)
    }

    fn create_child(
        &mut self,
        parent: Sid,
        data: impl Into<DeviceData>,
        kind: HolderKind,
    ) -> Result<Sid, StructuralError> {
        // Validate the parent first so that a failure leaves the graph alone.
        self.node_index(parent)?;
        let sid = self.create_device(data)?;
        self.add_holder(parent, sid, kind)?;
        Ok(sid)
    }

    /// Adds a holder from `source` to `target`.
    pub fn add_holder(
        &mut self,
        source: Sid,
        target: Sid,
        kind: HolderKind,
    ) -> Result<(), StructuralError> {
        let source_idx = self.node_index(source)?;
        let target_idx = self.node_index(target)?;

        if source == target {
            return Err(StructuralError::SelfHolder(source));
        }

        if self.inner.find_edge(source_idx, target_idx).is_some() {
            return Err(StructuralError::DuplicateHolder {
                source_sid: source,
                target_sid: target,
            });
        }

        // An existing path from target back to source would close a cycle.
        if algo::has_path_connecting(&self.inner, target_idx, source_idx, None) {
            return Err(StructuralError::HolderCycle {
                source_sid: source,
                target_sid: target,
            });
        }

        trace!("Adding holder {}", Holder::new(source, target, kind));
        self.inner.add_edge(source_idx, target_idx, kind);
        Ok(())
    }

    /// Removes the holder from `source` to `target` and returns it.
    pub fn remove_holder(&mut self, source: Sid, target: Sid) -> Result<Holder, StructuralError> {
        let source_idx = self.node_index(source)?;
        let target_idx = self.node_index(target)?;

        let edge = self.inner.find_edge(source_idx, target_idx).ok_or(
            StructuralError::UnknownHolder {
                source_sid: source,
                target_sid: target,
            },
        )?;

        let kind = self
            .inner
            .remove_edge(edge)
            .ok_or(StructuralError::UnknownHolder {
                source_sid: source,
                target_sid: target,
            })?;

        Ok(Holder::new(source, target, kind))
    }

    /// Removes a device together with its holders.
    ///
    /// Returns the sids of all removed devices, the requested device first.
    pub fn remove_device(
        &mut self,
        sid: Sid,
        mode: RemovalMode,
    ) -> Result<Vec<Sid>, StructuralError> {
        let idx = self.node_index(sid)?;

        let dependents = self
            .inner
            .neighbors_directed(idx, Direction::Outgoing)
            .count();

        let mut removed = vec![sid];
        if dependents > 0 {
            match mode {
                RemovalMode::Reject => {
                    return Err(StructuralError::HasDependents {
                        sid,
                        count: dependents,
                    })
                }
                RemovalMode::Cascade => {
                    removed.extend(self.descendants(sid, TraversalFilter::all()));
                }
            }
        }

        for sid in removed.iter() {
            trace!("Removing device {}", sid);
            self.forget(*sid);
        }

        Ok(removed)
    }

    /// Removes all descendants of a device, keeping the device itself.
    pub fn remove_descendants(&mut self, sid: Sid) -> Result<Vec<Sid>, StructuralError> {
        self.node_index(sid)?;

        let descendants = self.descendants(sid, TraversalFilter::all());
        for sid in descendants.iter() {
            self.forget(*sid);
        }

        Ok(descendants)
    }

    /// Drops a device and its holders. Removing the node also removes all of
    /// its edges.
    fn forget(&mut self, sid: Sid) {
        self.inserted.remove(&sid);
        if let Some(idx) = self.index.remove(&sid) {
            self.inner.remove_node(idx);
        }
    }

    /// Position of a device in insertion order.
    fn insertion(&self, idx: NodeIndex) -> (u64, Sid) {
        let sid = self.inner[idx].sid();
        (self.inserted.get(&sid).copied().unwrap_or(u64::MAX), sid)
    }

    /// Returns the holders pointing at a device, ordered by source.
    pub fn in_holders(&self, sid: Sid) -> Vec<Holder> {
        self.adjacent_holders(sid, Direction::Incoming)
    }

    /// Returns the holders leaving a device, ordered by target.
    pub fn out_holders(&self, sid: Sid) -> Vec<Holder> {
        self.adjacent_holders(sid, Direction::Outgoing)
    }

    fn adjacent_holders(&self, sid: Sid, direction: Direction) -> Vec<Holder> {
        let Some(idx) = self.index.get(&sid) else {
            return Vec::new();
        };

        let mut holders = self
            .inner
            .edges_directed(*idx, direction)
            .map(|edge| self.holder_from_edge(edge.source(), edge.target(), *edge.weight()))
            .collect::<Vec<_>>();
        holders.sort();
        holders
    }

    /// Returns the direct parents of a device, optionally restricted to one
    /// holder kind.
    pub fn parents(&self, sid: Sid, kind: Option<HolderKind>) -> Vec<Sid> {
        self.in_holders(sid)
            .into_iter()
            .filter(|holder| kind.map_or(true, |k| holder.kind == k))
            .map(|holder| holder.source)
            .collect()
    }

    /// Returns the direct children of a device, optionally restricted to one
    /// holder kind.
    pub fn children(&self, sid: Sid, kind: Option<HolderKind>) -> Vec<Sid> {
        self.out_holders(sid)
            .into_iter()
            .filter(|holder| kind.map_or(true, |k| holder.kind == k))
            .map(|holder| holder.target)
            .collect()
    }

    /// Returns the only Subdevice parent of a device, if it has exactly one.
    pub fn subdevice_parent(&self, sid: Sid) -> Option<Sid> {
        match self.parents(sid, Some(HolderKind::Subdevice)).as_slice() {
            [parent] => Some(*parent),
            _ => None,
        }
    }

    /// Returns the ancestors of a device in breadth-first order.
    pub fn ancestors(&self, sid: Sid, filter: TraversalFilter) -> Vec<Sid> {
        self.traverse(sid, Direction::Incoming, filter)
    }

    /// Returns the descendants of a device in breadth-first order.
    pub fn descendants(&self, sid: Sid, filter: TraversalFilter) -> Vec<Sid> {
        self.traverse(sid, Direction::Outgoing, filter)
    }

    /// Breadth-first traversal. Neighbors are visited in the order in which
    /// they were added to this graph, so the result is deterministic.
    fn traverse(&self, start: Sid, direction: Direction, filter: TraversalFilter) -> Vec<Sid> {
        let Some(start_idx) = self.index.get(&start) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut visited = HashSet::from([*start_idx]);
        let mut queue = VecDeque::from([*start_idx]);

        while let Some(idx) = queue.pop_front() {
            let mut next = self
                .inner
                .edges_directed(idx, direction)
                .filter(|edge| filter.follows(*edge.weight()))
                .map(|edge| match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                })
                .filter(|other| visited.insert(*other))
                .collect::<Vec<_>>();
            next.sort_by_key(|other| self.insertion(*other));

            for other in next {
                let device = &self.inner[other];
                if filter.returns(device) {
                    result.push(device.sid());
                }
                queue.push_back(other);
            }
        }

        result
    }

    /// Returns the kernel name of a device, resolving names that depend on
    /// parents such as `/dev/<vg>/<lv>`.
    pub fn device_name(&self, sid: Sid) -> Option<String> {
        let device = self.device(sid)?;
        match device.data() {
            DeviceData::LvmLv(lv) => {
                let vg = self
                    .subdevice_parent(sid)
                    .and_then(|parent| self.device(parent))
                    .and_then(Device::as_lvm_vg)?;
                Some(format!("/dev/{}/{}", vg.vg_name, lv.lv_name))
            }
            _ => device.name(),
        }
    }

    /// Returns the name of the block device a filesystem or encrypted volume
    /// lives on.
    pub fn blk_device_name_of(&self, sid: Sid) -> Option<String> {
        let provider = *self.parents(sid, Some(HolderKind::User)).first()?;
        self.device_name(provider)
    }

    /// Returns the filesystem a mount point or subvolume belongs to, walking
    /// up through subvolumes.
    pub fn filesystem_of(&self, sid: Sid) -> Option<Sid> {
        self.ancestors(
            sid,
            TraversalFilter::holder_kind(HolderKind::Subdevice)
                .with_device_kinds(DeviceKindFlag::Filesystem),
        )
        .first()
        .copied()
    }

    /// Returns the subvolume a mount point mounts, if any.
    pub fn subvolume_of(&self, mount_point: Sid) -> Option<Sid> {
        self.subdevice_parent(mount_point)
            .filter(|parent| {
                self.device(*parent).map(Device::kind) == Some(DeviceKind::BtrfsSubvolume)
            })
    }

    /// Returns the disk carrying a device, walking up Subdevice holders.
    pub fn disk_of(&self, sid: Sid) -> Option<Sid> {
        if self.device(sid)?.kind() == DeviceKind::Disk {
            return Some(sid);
        }

        self.ancestors(
            sid,
            TraversalFilter::holder_kind(HolderKind::Subdevice)
                .with_device_kinds(DeviceKindFlag::Disk),
        )
        .first()
        .copied()
    }

    /// Human readable description of a device, used in action texts.
    pub fn display_name(&self, sid: Sid) -> String {
        let Some(device) = self.device(sid) else {
            return format!("unknown device {sid}");
        };

        match device.data() {
            DeviceData::PartitionTable(pt) => match self.subdevice_parent(sid) {
                Some(disk) => format!(
                    "{} on {}",
                    pt.pt_type,
                    self.device_name(disk).unwrap_or_else(|| disk.to_string())
                ),
                None => pt.pt_type.to_string(),
            },
            DeviceData::Filesystem(fs) => match self.blk_device_name_of(sid) {
                Some(blk) => format!("{} on {}", fs.fs_type, blk),
                None => fs.fs_type.to_string(),
            },
            DeviceData::BtrfsSubvolume(subvolume) => match self
                .filesystem_of(sid)
                .and_then(|fs| self.blk_device_name_of(fs))
            {
                Some(blk) => format!("subvolume {} on {blk}", subvolume.path),
                None => format!("subvolume {}", subvolume.path),
            },
            DeviceData::MountPoint(mp) => format!("mount point {}", mp.path.display()),
            DeviceData::LvmVg(vg) => format!("volume group {}", vg.vg_name),
            _ => self
                .device_name(sid)
                .unwrap_or_else(|| format!("{} {}", device.kind(), sid)),
        }
    }

    /// Finds a device by kernel name, e.g. `/dev/sda1` or `/dev/system/root`.
    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices()
            .into_iter()
            .find(|device| self.device_name(device.sid()).as_deref() == Some(name))
    }

    /// Returns every violation of the structural invariants, in a
    /// deterministic order.
    pub fn check_consistency(&self) -> Vec<StructuralError> {
        rules::check(self)
    }

    /// Renders the graph in the DOT language.
    pub fn to_graphviz(&self) -> String {
        let node_attrs = |_: &DevicePetgraph, (_, device): (NodeIndex, &Device)| {
            let mut attrs = format!(
                "label=\"{}\\nsid {}\"",
                escape(&self.display_name(device.sid())),
                device.sid()
            );
            if device.is_missing() {
                attrs.push_str(", style=dashed");
            }
            attrs
        };
        let edge_attrs = |_: &DevicePetgraph, edge: EdgeReference<'_, HolderKind>| {
            match edge.weight() {
                HolderKind::Subdevice => "label=\"subdevice\"".to_string(),
                HolderKind::User => "label=\"user\", style=dashed".to_string(),
            }
        };

        format!(
            "{:?}",
            Dot::with_attr_getters(
                &self.inner,
                &[Config::NodeNoLabel, Config::EdgeNoLabel],
                &edge_attrs,
                &node_attrs,
            )
        )
    }

    /// Kinds of the devices in this graph, used for diagnostics.
    pub fn kinds(&self) -> BTreeSet<DeviceKind> {
        self.inner
            .node_indices()
            .map(|idx| self.inner[idx].kind())
            .collect()
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl PartialEq for DeviceGraph {
    /// Graphs are equal when they hold equal devices under the same sids and
    /// the same holders, regardless of how they are stored.
    fn eq(&self, other: &Self) -> bool {
        self.devices() == other.devices() && self.holders() == other.holders()
    }
}

impl Eq for DeviceGraph {}
