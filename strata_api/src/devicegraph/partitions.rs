//! Free space in partition tables.

use sysdefs::partitions::PartitionType;

use crate::{
    constants::{FIRST_LOGICAL_PARTITION, GPT_BACKUP_ENTRIES_SIZE, PARTITION_ALIGNMENT},
    Region, Sid,
};

use super::{
    device::{Device, PartitionTable},
    error::StructuralError,
    graph::DeviceGraph,
    holder::HolderKind,
};

/// A stretch of a partition table that no partition uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlot {
    pub region: Region,

    /// Number the next partition created here gets.
    pub number: u32,

    /// Kernel name the next partition created here gets.
    pub name: String,

    pub primary_possible: bool,
    pub extended_possible: bool,
    pub logical_possible: bool,
}

impl PartitionTable {
    /// Shrinks `region` to start and end on the partition alignment. Returns
    /// `None` when nothing is left.
    pub fn align(&self, region: Region) -> Option<Region> {
        let grain = grain(&region);
        let start = (region.start() + grain - 1) / grain * grain;
        let end = (region.start() + region.length()) / grain * grain;
        (end > start).then(|| Region::new(start, end - start, region.block_size()))
    }

    /// Part of the disk that partitions may use.
    fn usable_region(&self, disk: Region) -> Region {
        let grain = grain(&disk);
        let mut end = disk.start() + disk.length();
        if !self.pt_type.supports_extended() {
            let block_size = u64::from(disk.block_size().max(1));
            end = end.saturating_sub(1 + GPT_BACKUP_ENTRIES_SIZE / block_size);
        }
        let start = (disk.start() + grain).min(end);
        Region::new(start, end - start, disk.block_size())
    }
}

/// Alignment in blocks of `region`.
fn grain(region: &Region) -> u64 {
    (PARTITION_ALIGNMENT / u64::from(region.block_size().max(1))).max(1)
}

/// Kernel name of partition `number` of `disk`, e.g. `/dev/sda1` or
/// `/dev/nvme0n1p1`.
fn partition_name(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Stretches of `area` not covered by `used`, at least one grain long.
fn gaps(area: Region, used: &[Region]) -> Vec<Region> {
    let block_size = u64::from(area.block_size().max(1));
    let area_end = area.start() + area.length();
    let mut used = used
        .iter()
        .map(|region| {
            let start = (region.start_bytes() / block_size).clamp(area.start(), area_end);
            let end = (region.end_bytes() + block_size - 1) / block_size;
            let end = end.clamp(area.start(), area_end);
            (start, end)
        })
        .collect::<Vec<_>>();
    used.sort();

    let mut found = Vec::new();
    let mut cursor = area.start();
    for (start, end) in used.into_iter().chain([(area_end, area_end)]) {
        if start >= cursor + grain(&area) {
            found.push(Region::new(cursor, start - cursor, area.block_size()));
        }
        cursor = cursor.max(end);
    }
    found
}

impl DeviceGraph {
    /// Returns the unused stretches of a partition table, primary slots
    /// first, each with the number and name a new partition there gets.
    pub fn unused_partition_slots(
        &self,
        table: Sid,
    ) -> Result<Vec<PartitionSlot>, StructuralError> {
        let device = self.device(table).ok_or(StructuralError::UnknownSid(table))?;
        let pt = device
            .as_partition_table()
            .ok_or(StructuralError::NotAPartitionTable {
                sid: table,
                kind: device.kind(),
            })?;
        let disk = self
            .subdevice_parent(table)
            .ok_or(StructuralError::UnknownDiskSize(table))?;
        let disk_region = self
            .device(disk)
            .and_then(Device::as_disk)
            .and_then(|disk| disk.region)
            .ok_or(StructuralError::UnknownDiskSize(table))?;
        let disk_name = self
            .device_name(disk)
            .ok_or(StructuralError::UnknownDiskSize(table))?;

        let partitions = self
            .children(table, Some(HolderKind::Subdevice))
            .into_iter()
            .filter_map(|sid| self.device(sid)?.as_partition().cloned())
            .collect::<Vec<_>>();
        let numbers = partitions
            .iter()
            .filter_map(|partition| partition.number())
            .collect::<Vec<_>>();
        let extended = partitions
            .iter()
            .find(|partition| partition.partition_type == PartitionType::Extended);

        let mut slots = Vec::new();

        let primaries = partitions
            .iter()
            .filter(|partition| partition.partition_type != PartitionType::Logical)
            .map(|partition| partition.region)
            .collect::<Vec<_>>();
        let free_primary = (1..=pt.pt_type.max_primary()).find(|n| !numbers.contains(n));
        for region in gaps(pt.usable_region(disk_region), &primaries) {
            slots.push(PartitionSlot {
                region,
                number: free_primary.unwrap_or_default(),
                name: free_primary
                    .map(|number| partition_name(&disk_name, number))
                    .unwrap_or_default(),
                primary_possible: free_primary.is_some(),
                extended_possible: free_primary.is_some()
                    && pt.pt_type.supports_extended()
                    && extended.is_none(),
                logical_possible: false,
            });
        }

        if let Some(extended) = extended {
            let logicals = partitions
                .iter()
                .filter(|partition| partition.partition_type == PartitionType::Logical)
                .map(|partition| partition.region)
                .collect::<Vec<_>>();
            let number = numbers
                .iter()
                .copied()
                .filter(|number| *number >= FIRST_LOGICAL_PARTITION)
                .max()
                .map_or(FIRST_LOGICAL_PARTITION, |last| last + 1);
            for region in gaps(extended.region, &logicals) {
                slots.push(PartitionSlot {
                    region,
                    number,
                    name: partition_name(&disk_name, number),
                    primary_possible: false,
                    extended_possible: false,
                    logical_possible: true,
                });
            }
        }

        Ok(slots)
    }
}
