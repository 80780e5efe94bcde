use anyhow::{Context, Error};
use log::debug;

use osutils::dependencies::Dependency;
use strata_api::{
    devicegraph::{DeviceGraph, Partition, PartitionTable},
    Sid,
};
use sysdefs::partitions::PartitionId;

use super::device_name;
use crate::engine::CommitContext;

/// Name of the disk carrying a partition table or partition.
fn disk_name(graph: &DeviceGraph, sid: Sid) -> Result<String, Error> {
    let disk = graph
        .disk_of(sid)
        .with_context(|| format!("Failed to find the disk holding device {sid}"))?;
    device_name(graph, disk)
}

fn partition_number(partition: &Partition) -> Result<String, Error> {
    partition
        .number()
        .map(|number| number.to_string())
        .with_context(|| {
            format!(
                "Failed to get the partition number of '{}'",
                partition.name
            )
        })
}

/// Writes an empty partition table to a disk.
pub(crate) fn create_partition_table(
    ctx: &CommitContext,
    sid: Sid,
    pt: &PartitionTable,
) -> Result<(), Error> {
    let disk = disk_name(ctx.rhs, sid)?;
    debug!("Creating {} partition table on '{disk}'", pt.pt_type);

    ctx.run(&Dependency::Parted.cmd().with_args([
        "-s",
        disk.as_str(),
        "mklabel",
        pt.pt_type.name(),
    ]))?;
    Ok(())
}

/// Wipes the partition table signatures of a disk.
pub(crate) fn delete_partition_table(ctx: &CommitContext, sid: Sid) -> Result<(), Error> {
    let disk = disk_name(ctx.lhs, sid)?;
    debug!("Removing partition table from '{disk}'");

    ctx.run(&Dependency::Wipefs.cmd().with_args(["-a", disk.as_str()]))?;
    Ok(())
}

/// Adds a partition, sets the flag matching its id and wipes stale
/// signatures from the new range.
pub(crate) fn create_partition(
    ctx: &CommitContext,
    sid: Sid,
    partition: &Partition,
) -> Result<(), Error> {
    let disk = disk_name(ctx.rhs, sid)?;
    let number = partition_number(partition)?;
    let region = partition.region;
    debug!(
        "Creating partition '{}' on '{disk}' at {region}",
        partition.name
    );

    ctx.run(&Dependency::Parted.cmd().with_args([
        "-s".to_string(),
        disk.clone(),
        "unit".into(),
        "B".into(),
        "mkpart".into(),
        partition.partition_type.name().into(),
        format!("{}B", region.start_bytes()),
        format!("{}B", region.end_bytes().saturating_sub(1)),
    ]))?;

    if let Some(flag) = partition.id.parted_flag() {
        set_flag(ctx, &disk, &number, flag, true)?;
    }

    ctx.run(
        &Dependency::Wipefs
            .cmd()
            .with_args(["-a", partition.name.as_str()]),
    )?;
    Ok(())
}

pub(crate) fn delete_partition(
    ctx: &CommitContext,
    sid: Sid,
    partition: &Partition,
) -> Result<(), Error> {
    let disk = disk_name(ctx.lhs, sid)?;
    let number = partition_number(partition)?;
    debug!("Deleting partition '{}'", partition.name);

    ctx.run(&Dependency::Parted.cmd().with_args([
        "-s",
        disk.as_str(),
        "rm",
        number.as_str(),
    ]))?;
    Ok(())
}

/// Moves the end of a partition to match its new length. The start never
/// changes.
pub(crate) fn resize_partition(
    ctx: &CommitContext,
    sid: Sid,
    partition: &Partition,
) -> Result<(), Error> {
    let disk = disk_name(ctx.rhs, sid)?;
    let number = partition_number(partition)?;
    let end = partition.region.end_bytes().saturating_sub(1);
    debug!("Resizing partition '{}' to end at byte {end}", partition.name);

    ctx.run(&Dependency::Parted.cmd().with_args([
        "-s".to_string(),
        disk,
        "unit".into(),
        "B".into(),
        "resizepart".into(),
        number,
        format!("{end}B"),
    ]))?;
    Ok(())
}

/// Replaces the flag of the old partition id with the flag of the new one.
pub(crate) fn set_partition_id(
    ctx: &CommitContext,
    sid: Sid,
    partition: &Partition,
    old_id: PartitionId,
) -> Result<(), Error> {
    let disk = disk_name(ctx.rhs, sid)?;
    let number = partition_number(partition)?;
    debug!(
        "Changing id of partition '{}' from {old_id} to {}",
        partition.name, partition.id
    );

    if let Some(flag) = old_id.parted_flag() {
        set_flag(ctx, &disk, &number, flag, false)?;
    }
    if let Some(flag) = partition.id.parted_flag() {
        set_flag(ctx, &disk, &number, flag, true)?;
    }
    Ok(())
}

fn set_flag(
    ctx: &CommitContext,
    disk: &str,
    number: &str,
    flag: &str,
    on: bool,
) -> Result<(), Error> {
    ctx.run(&Dependency::Parted.cmd().with_args([
        "-s",
        disk,
        "set",
        number,
        flag,
        if on { "on" } else { "off" },
    ]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use osutils::{tabfile::TabFile, testutils::RecordingExecutor};
    use strata_api::{devicegraph::Disk, Region};
    use sysdefs::partitions::{PartitionType, PtType};

    use crate::engine::with_test_context;

    use super::*;

    fn disk_with_partition() -> (DeviceGraph, Sid, Sid) {
        let mut graph = DeviceGraph::new();
        let disk = graph.create_device(Disk::new("/dev/sda")).unwrap();
        let pt = graph
            .create_subdevice(disk, PartitionTable::new(PtType::Gpt))
            .unwrap();
        let partition = graph
            .create_subdevice(
                pt,
                Partition::new(
                    "/dev/sda2",
                    Region::from_sectors(2048, 4096),
                    PartitionType::Primary,
                )
                .with_id(PartitionId::LVM),
            )
            .unwrap();
        (graph, pt, partition)
    }

    #[test]
    fn test_create_and_delete() {
        let (graph, pt, sid) = disk_with_partition();
        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        let partition = graph.device(sid).unwrap().as_partition().unwrap().clone();

        with_test_context(&graph, &graph, &executor, &mut table, |ctx| {
            create_partition_table(ctx, pt, &PartitionTable::new(PtType::Gpt)).unwrap();
            create_partition(ctx, sid, &partition).unwrap();
            delete_partition(ctx, sid, &partition).unwrap();
            delete_partition_table(ctx, pt).unwrap();
        });

        assert_eq!(
            executor.commands(),
            vec![
                "parted -s /dev/sda mklabel gpt",
                "parted -s /dev/sda unit B mkpart primary 1048576B 3145727B",
                "parted -s /dev/sda set 2 lvm on",
                "wipefs -a /dev/sda2",
                "parted -s /dev/sda rm 2",
                "wipefs -a /dev/sda",
            ]
        );
    }

    #[test]
    fn test_resize_and_set_id() {
        let (graph, _, sid) = disk_with_partition();
        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        let mut partition = graph.device(sid).unwrap().as_partition().unwrap().clone();
        partition.region = partition.region.with_length(8192);
        partition.id = PartitionId::LINUX;

        with_test_context(&graph, &graph, &executor, &mut table, |ctx| {
            resize_partition(ctx, sid, &partition).unwrap();
            set_partition_id(ctx, sid, &partition, PartitionId::LVM).unwrap();
        });

        assert_eq!(
            executor.commands(),
            vec![
                "parted -s /dev/sda unit B resizepart 2 5242879B",
                "parted -s /dev/sda set 2 lvm off",
            ]
        );
    }
}
