use std::{fmt::Display, path::PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

use sysdefs::{
    filesystems::FsType,
    mount::MountByType,
    partitions::{PartitionId, PartitionType, PtType},
};

use crate::{constants::DEFAULT_EXTENT_SIZE, Region, Sid};

/// Kinds of devices that can live in a device graph.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeviceKind {
    /// A physical or virtual disk
    Disk,

    /// A block device that is neither a disk nor a partition of one, e.g. a
    /// Xen virtual partition
    StrayBlkDevice,

    /// A partition table (disk label) on a disk
    PartitionTable,

    /// A partition inside a partition table
    Partition,

    /// An LVM volume group
    LvmVg,

    /// An LVM logical volume
    LvmLv,

    /// A LUKS encrypted volume
    Luks,

    /// A filesystem on a block device
    Filesystem,

    /// A subvolume of a btrfs filesystem
    BtrfsSubvolume,

    /// A mount point of a filesystem
    MountPoint,
}

bitflags::bitflags! {
    /// Bitflags for device kinds.
    ///
    /// MUST MATCH THE CONTENTS OF DeviceKind
    #[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct DeviceKindFlag: u32 {
        const Disk = 1;
        const PartitionTable = 1 << 1;
        const Partition = 1 << 2;
        const LvmVg = 1 << 3;
        const LvmLv = 1 << 4;
        const Luks = 1 << 5;
        const Filesystem = 1 << 6;
        const MountPoint = 1 << 7;
        const StrayBlkDevice = 1 << 8;
        const BtrfsSubvolume = 1 << 9;

        /// Devices with a kernel block device node.
        const BlkDevice = Self::Disk.bits()
            | Self::StrayBlkDevice.bits()
            | Self::Partition.bits()
            | Self::LvmLv.bits()
            | Self::Luks.bits();

        /// Devices that can carry mount points.
        const Mountable = Self::Filesystem.bits() | Self::BtrfsSubvolume.bits();
    }
}

impl DeviceKind {
    /// Returns the flag matching this kind.
    pub fn as_flag(self) -> DeviceKindFlag {
        match self {
            Self::Disk => DeviceKindFlag::Disk,
            Self::StrayBlkDevice => DeviceKindFlag::StrayBlkDevice,
            Self::PartitionTable => DeviceKindFlag::PartitionTable,
            Self::Partition => DeviceKindFlag::Partition,
            Self::LvmVg => DeviceKindFlag::LvmVg,
            Self::LvmLv => DeviceKindFlag::LvmLv,
            Self::Luks => DeviceKindFlag::Luks,
            Self::Filesystem => DeviceKindFlag::Filesystem,
            Self::BtrfsSubvolume => DeviceKindFlag::BtrfsSubvolume,
            Self::MountPoint => DeviceKindFlag::MountPoint,
        }
    }

    /// Returns whether devices of this kind have a kernel block device node.
    pub fn is_blk_device(self) -> bool {
        DeviceKindFlag::BlkDevice.contains(self.as_flag())
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Display for DeviceKindFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use strum::IntoEnumIterator;

        let names = DeviceKind::iter()
            .filter(|kind| self.contains(kind.as_flag()))
            .map(|kind| kind.to_string())
            .collect::<Vec<_>>();
        write!(f, "[{}]", names.join(", "))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Disk {
    /// Kernel device name, e.g. `/dev/sda`.
    pub name: String,

    /// Size and geometry, when known.
    #[serde(default)]
    pub region: Option<Region>,
}

impl Disk {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

/// A block device found on the system that strata can use but not create,
/// delete or resize.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StrayBlkDevice {
    /// Kernel device name, e.g. `/dev/xvda1`.
    pub name: String,

    #[serde(default)]
    pub region: Option<Region>,
}

impl StrayBlkDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartitionTable {
    pub pt_type: PtType,
}

impl PartitionTable {
    pub fn new(pt_type: PtType) -> Self {
        Self { pt_type }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Partition {
    /// Kernel device name, e.g. `/dev/sda1`.
    pub name: String,

    pub region: Region,

    #[serde(default)]
    pub partition_type: PartitionType,

    #[serde(default)]
    pub id: PartitionId,
}

impl Partition {
    pub fn new(name: impl Into<String>, region: Region, partition_type: PartitionType) -> Self {
        Self {
            name: name.into(),
            region,
            partition_type,
            id: PartitionId::default(),
        }
    }

    pub fn with_id(mut self, id: PartitionId) -> Self {
        self.id = id;
        self
    }

    /// Partition number parsed from the trailing digits of the name.
    pub fn number(&self) -> Option<u32> {
        let digits = self
            .name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>();
        if digits.is_empty() {
            return None;
        }
        digits.into_iter().rev().collect::<String>().parse().ok()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LvmVg {
    /// Volume group name, without the `/dev/` prefix.
    pub vg_name: String,

    #[serde(default = "default_extent_size")]
    pub extent_size: u64,
}

fn default_extent_size() -> u64 {
    DEFAULT_EXTENT_SIZE
}

impl LvmVg {
    pub fn new(vg_name: impl Into<String>) -> Self {
        Self {
            vg_name: vg_name.into(),
            extent_size: DEFAULT_EXTENT_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LvmLv {
    pub lv_name: String,

    /// Size in bytes.
    pub size: u64,
}

impl LvmLv {
    pub fn new(lv_name: impl Into<String>, size: u64) -> Self {
        Self {
            lv_name: lv_name.into(),
            size,
        }
    }
}

/// Secret text that is never printed.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Luks {
    /// Device mapper name, the device appears as `/dev/mapper/<dm_name>`.
    pub dm_name: String,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing)]
    pub passphrase: Option<Passphrase>,
}

impl Luks {
    pub fn new(dm_name: impl Into<String>) -> Self {
        Self {
            dm_name: dm_name.into(),
            uuid: None,
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Passphrase::new(passphrase));
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Filesystem {
    pub fs_type: FsType,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub uuid: Option<String>,
}

impl Filesystem {
    pub fn new(fs_type: FsType) -> Self {
        Self {
            fs_type,
            label: None,
            uuid: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BtrfsSubvolume {
    /// Path below the top level subvolume, e.g. `@/var`.
    pub path: String,

    /// Whether new files in the subvolume skip copy-on-write.
    #[serde(default)]
    pub nocow: bool,

    /// Whether the subvolume is mounted when no subvolume is requested.
    #[serde(default)]
    pub default: bool,
}

impl BtrfsSubvolume {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            nocow: false,
            default: false,
        }
    }

    pub fn with_nocow(mut self, nocow: bool) -> Self {
        self.nocow = nocow;
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountPoint {
    /// Mount path, or `swap` for swap areas.
    pub path: PathBuf,

    #[serde(default)]
    pub mount_by: MountByType,

    #[serde(default)]
    pub mount_options: Vec<String>,

    /// Overrides the type taken from the filesystem.
    #[serde(default)]
    pub mount_type: Option<FsType>,

    /// Whether the mount point is (or should be) mounted right now.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Whether the mount point is (or should be) in the persisted mount
    /// table.
    #[serde(default = "default_true")]
    pub in_etc_fstab: bool,
}

fn default_true() -> bool {
    true
}

impl MountPoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mount_by: MountByType::default(),
            mount_options: Vec::new(),
            mount_type: None,
            active: true,
            in_etc_fstab: true,
        }
    }

    pub fn with_mount_by(mut self, mount_by: MountByType) -> Self {
        self.mount_by = mount_by;
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.mount_options = options;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_in_etc_fstab(mut self, in_etc_fstab: bool) -> Self {
        self.in_etc_fstab = in_etc_fstab;
        self
    }
}

/// Type specific attributes of a device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum DeviceData {
    Disk(Disk),
    StrayBlkDevice(StrayBlkDevice),
    PartitionTable(PartitionTable),
    Partition(Partition),
    LvmVg(LvmVg),
    LvmLv(LvmLv),
    Luks(Luks),
    Filesystem(Filesystem),
    BtrfsSubvolume(BtrfsSubvolume),
    MountPoint(MountPoint),
}

impl DeviceData {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Disk(_) => DeviceKind::Disk,
            Self::StrayBlkDevice(_) => DeviceKind::StrayBlkDevice,
            Self::PartitionTable(_) => DeviceKind::PartitionTable,
            Self::Partition(_) => DeviceKind::Partition,
            Self::LvmVg(_) => DeviceKind::LvmVg,
            Self::LvmLv(_) => DeviceKind::LvmLv,
            Self::Luks(_) => DeviceKind::Luks,
            Self::Filesystem(_) => DeviceKind::Filesystem,
            Self::BtrfsSubvolume(_) => DeviceKind::BtrfsSubvolume,
            Self::MountPoint(_) => DeviceKind::MountPoint,
        }
    }
}

macro_rules! impl_from_device_data {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for DeviceData {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_device_data!(
    Disk,
    StrayBlkDevice,
    PartitionTable,
    Partition,
    LvmVg,
    LvmLv,
    Luks,
    Filesystem,
    BtrfsSubvolume,
    MountPoint
);

/// A node of the device graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Device {
    sid: Sid,

    data: DeviceData,

    /// Set by probing when the device could not be fully resolved and is
    /// only a placeholder for what was found.
    #[serde(default)]
    missing: bool,
}

impl Device {
    /// Creates a device with a fresh sid.
    pub fn new(data: impl Into<DeviceData>) -> Self {
        Self::with_sid(Sid::next(), data)
    }

    /// Creates a device with a known sid, e.g. when restoring scanned state.
    pub fn with_sid(sid: Sid, data: impl Into<DeviceData>) -> Self {
        Self {
            sid,
            data: data.into(),
            missing: false,
        }
    }

    /// Marks the device as a missing placeholder.
    pub fn into_missing(mut self) -> Self {
        self.missing = true;
        self
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn data(&self) -> &DeviceData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DeviceData {
        &mut self.data
    }

    pub fn kind(&self) -> DeviceKind {
        self.data.kind()
    }

    pub fn is_missing(&self) -> bool {
        self.missing
    }

    pub fn set_missing(&mut self, missing: bool) {
        self.missing = missing;
    }

    /// Returns the device name when it can be derived from the device alone.
    ///
    /// Logical volumes and partition tables need their parents to be named,
    /// use `DeviceGraph::device_name()` for those.
    pub fn name(&self) -> Option<String> {
        match &self.data {
            DeviceData::Disk(disk) => Some(disk.name.clone()),
            DeviceData::StrayBlkDevice(stray) => Some(stray.name.clone()),
            DeviceData::Partition(partition) => Some(partition.name.clone()),
            DeviceData::LvmVg(vg) => Some(format!("/dev/{}", vg.vg_name)),
            DeviceData::Luks(luks) => Some(format!("/dev/mapper/{}", luks.dm_name)),
            DeviceData::PartitionTable(_)
            | DeviceData::LvmLv(_)
            | DeviceData::Filesystem(_)
            | DeviceData::BtrfsSubvolume(_)
            | DeviceData::MountPoint(_) => None,
        }
    }

    /// Size in bytes, for devices that carry one.
    pub fn size(&self) -> Option<u64> {
        match &self.data {
            DeviceData::Disk(disk) => disk.region.map(|region| region.size_bytes()),
            DeviceData::StrayBlkDevice(stray) => stray.region.map(|region| region.size_bytes()),
            DeviceData::Partition(partition) => Some(partition.region.size_bytes()),
            DeviceData::LvmLv(lv) => Some(lv.size),
            _ => None,
        }
    }

    pub fn as_disk(&self) -> Option<&Disk> {
        match &self.data {
            DeviceData::Disk(disk) => Some(disk),
            _ => None,
        }
    }

    pub fn as_stray_blk_device(&self) -> Option<&StrayBlkDevice> {
        match &self.data {
            DeviceData::StrayBlkDevice(stray) => Some(stray),
            _ => None,
        }
    }

    pub fn as_partition_table(&self) -> Option<&PartitionTable> {
        match &self.data {
            DeviceData::PartitionTable(pt) => Some(pt),
            _ => None,
        }
    }

    pub fn as_partition(&self) -> Option<&Partition> {
        match &self.data {
            DeviceData::Partition(partition) => Some(partition),
            _ => None,
        }
    }

    pub fn as_lvm_vg(&self) -> Option<&LvmVg> {
        match &self.data {
            DeviceData::LvmVg(vg) => Some(vg),
            _ => None,
        }
    }

    pub fn as_lvm_lv(&self) -> Option<&LvmLv> {
        match &self.data {
            DeviceData::LvmLv(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn as_luks(&self) -> Option<&Luks> {
        match &self.data {
            DeviceData::Luks(luks) => Some(luks),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&Filesystem> {
        match &self.data {
            DeviceData::Filesystem(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_btrfs_subvolume(&self) -> Option<&BtrfsSubvolume> {
        match &self.data {
            DeviceData::BtrfsSubvolume(subvolume) => Some(subvolume),
            _ => None,
        }
    }

    pub fn as_mount_point(&self) -> Option<&MountPoint> {
        match &self.data {
            DeviceData::MountPoint(mp) => Some(mp),
            _ => None,
        }
    }
}
