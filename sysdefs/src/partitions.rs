use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// Partition table (disk label) types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PtType {
    Gpt,
    Msdos,
}

impl PtType {
    /// Name understood by `parted mklabel`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Human readable name of the partition table type.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gpt => "GPT",
            Self::Msdos => "MS-DOS",
        }
    }

    /// Returns whether the partition table supports extended and logical
    /// partitions.
    pub fn supports_extended(self) -> bool {
        self == Self::Msdos
    }

    /// Highest number a primary partition can have.
    pub fn max_primary(self) -> u32 {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
        }
    }
}

impl Display for PtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Role of a partition within its partition table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

impl PartitionType {
    /// Name understood by `parted mkpart`.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl Display for PartitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Partition id, using the MS-DOS system id numbering. GPT partition types
/// are mapped onto the same numbers; ids without an MS-DOS counterpart use
/// values above 0xff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub const SWAP: Self = Self(0x82);
    pub const LINUX: Self = Self(0x83);
    pub const LVM: Self = Self(0x8e);
    pub const RAID: Self = Self(0xfd);
    pub const ESP: Self = Self(0xef);
    pub const PREP: Self = Self(0x41);
    pub const BIOS_BOOT: Self = Self(0x101);
    pub const LINUX_HOME: Self = Self(0x10a);

    /// Returns the `parted` flag that marks this id, if there is one.
    pub fn parted_flag(self) -> Option<&'static str> {
        Some(match self {
            Self::SWAP => "swap",
            Self::LVM => "lvm",
            Self::RAID => "raid",
            Self::ESP => "esp",
            Self::PREP => "prep",
            Self::BIOS_BOOT => "bios_grub",
            _ => return None,
        })
    }
}

impl Default for PartitionId {
    fn default() -> Self {
        Self::LINUX
    }
}

impl Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
