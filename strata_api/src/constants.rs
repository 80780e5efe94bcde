/// Path of the root mount point.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Default location of the persisted mount table.
pub const DEFAULT_FSTAB_PATH: &str = "/etc/fstab";

/// Sector size assumed for regions created without an explicit block size.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Default physical extent size of new LVM volume groups, 4 MiB.
pub const DEFAULT_EXTENT_SIZE: u64 = 4 * 1024 * 1024;

/// Mount point path used for swap entries in the mount table.
pub const SWAP_MOUNT_POINT: &str = "swap";

/// Space taken by the LUKS2 header at the start of an encrypted volume,
/// 16 MiB.
pub const LUKS2_HEADER_SIZE: u64 = 16 * 1024 * 1024;

/// Seconds to wait for udev to process queued events after block devices
/// change.
pub const UDEV_SETTLE_TIMEOUT_SECS: u32 = 20;

/// Partitions start and end on multiples of this many bytes, 1 MiB.
pub const PARTITION_ALIGNMENT: u64 = 1024 * 1024;

/// Number of the first logical partition of an MS-DOS partition table.
pub const FIRST_LOGICAL_PARTITION: u32 = 5;

/// Bytes taken by the partition entries of the backup GPT at the end of the
/// disk. The backup header takes one more block.
pub const GPT_BACKUP_ENTRIES_SIZE: u64 = 16 * 1024;
