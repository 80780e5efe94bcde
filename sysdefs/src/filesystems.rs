use std::{fmt::Display, str::FromStr};

use serde::{de::value::Error, forward_to_deserialize_any, Deserialize, Deserializer, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

/// Filesystem types that can be created on a block device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FsType {
    Btrfs,
    Exfat,
    Ext2,
    Ext3,
    Ext4,
    Ntfs,
    Swap,
    Vfat,
    Xfs,
}

impl FsType {
    /// Returns the name of the filesystem type, as understood by `mkfs -t`
    /// and `mount -t`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns whether this is the ext family.
    pub fn is_ext(self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4)
    }

    /// Swap is activated instead of mounted.
    pub fn is_swap(self) -> bool {
        self == Self::Swap
    }

    /// Returns whether the filesystem can be enlarged.
    pub fn supports_grow(self) -> bool {
        matches!(
            self,
            Self::Btrfs | Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Ntfs | Self::Xfs
        )
    }

    /// Returns whether the filesystem can be reduced. XFS cannot.
    pub fn supports_shrink(self) -> bool {
        matches!(
            self,
            Self::Btrfs | Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Ntfs
        )
    }

    /// Returns the option passed to the formatter to set a label, if the
    /// formatter supports labels at all.
    pub fn mkfs_label_option(self) -> Option<&'static str> {
        match self {
            Self::Vfat => Some("-n"),
            Self::Exfat => Some("-L"),
            Self::Ntfs => Some("-L"),
            Self::Btrfs | Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Swap | Self::Xfs => {
                Some("-L")
            }
        }
    }

    /// Returns the option passed to the formatter to set a UUID, if
    /// supported.
    pub fn mkfs_uuid_option(self) -> Option<&'static str> {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Btrfs | Self::Swap => Some("-U"),
            Self::Xfs => Some("-m"),
            Self::Exfat | Self::Ntfs | Self::Vfat => None,
        }
    }
}

impl Display for FsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FsType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::deserialize(&mut EnumDeserializer(s))
    }
}

/// Simple deserializer to convert a &str into an enum using serde.
struct EnumDeserializer<'de>(&'de str);
impl<'de> Deserializer<'de> for &mut EnumDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: serde::de::Visitor<'de>,
    {
        visitor.visit_str(self.0)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_fs_type_from_str() {
        assert_eq!("ext4".parse::<FsType>().unwrap(), FsType::Ext4);
        assert_eq!("vfat".parse::<FsType>().unwrap(), FsType::Vfat);
        assert_eq!("swap".parse::<FsType>().unwrap(), FsType::Swap);
        "reiserfs".parse::<FsType>().unwrap_err();

        // Every variant round-trips through its name.
        for fs_type in FsType::iter() {
            assert_eq!(fs_type.name().parse::<FsType>().unwrap(), fs_type);
        }
    }

    #[test]
    fn test_fs_type_serde() {
        let fs: FsType = serde_json::from_str(r#""btrfs""#).unwrap();
        assert_eq!(fs, FsType::Btrfs);
        assert_eq!(serde_json::to_string(&FsType::Xfs).unwrap(), r#""xfs""#);
    }

    #[test]
    fn test_fs_type_capabilities() {
        assert!(FsType::Ext4.is_ext());
        assert!(!FsType::Xfs.is_ext());
        assert!(FsType::Xfs.supports_grow());
        assert!(!FsType::Xfs.supports_shrink());
        assert!(!FsType::Vfat.supports_grow());
        assert!(FsType::Swap.is_swap());
        assert_eq!(FsType::Vfat.mkfs_label_option(), Some("-n"));
        assert_eq!(FsType::Vfat.mkfs_uuid_option(), None);
        assert_eq!(FsType::Xfs.mkfs_uuid_option(), Some("-m"));
    }
}
