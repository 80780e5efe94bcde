use anyhow::{bail, Context, Error};
use log::{debug, info};

use osutils::dependencies::Dependency;
use strata_api::{
    devicegraph::{Device, DeviceGraph, DeviceKind, HolderKind, LvmLv, LvmVg},
    Sid,
};

use super::{current_name, lvm_name, usable_size};
use crate::{action::ResizeDirection, engine::CommitContext};

fn vg_name(ctx: &CommitContext, vg: Sid) -> Result<String, Error> {
    lvm_name(ctx, vg).with_context(|| format!("Failed to find volume group {vg}"))
}

fn vg_of(ctx: &CommitContext, lv: Sid) -> Result<Sid, Error> {
    ctx.rhs
        .subdevice_parent(lv)
        .or_else(|| ctx.lhs.subdevice_parent(lv))
        .with_context(|| format!("Failed to find the volume group of logical volume {lv}"))
}

/// A new volume group has no command of its own; it is created together
/// with its first physical volume.
pub(crate) fn create_volume_group(vg: &LvmVg) {
    debug!(
        "Volume group '{}' will be created with its first physical volume",
        vg.vg_name
    );
}

pub(crate) fn delete_volume_group(ctx: &CommitContext, sid: Sid) -> Result<(), Error> {
    let name = vg_name(ctx, sid)?;
    debug!("Removing volume group '{name}'");

    ctx.run(&Dependency::Vgremove.cmd().with_args(["--force", name.as_str()]))?;
    Ok(())
}

pub(crate) fn rename_volume_group(
    ctx: &mut CommitContext,
    sid: Sid,
    vg: &LvmVg,
) -> Result<(), Error> {
    let old = vg_name(ctx, sid)?;
    debug!("Renaming volume group '{old}' to '{}'", vg.vg_name);

    ctx.run(
        &Dependency::Vgrename
            .cmd()
            .with_args([old.as_str(), vg.vg_name.as_str()]),
    )?;
    ctx.mark_renamed(sid);
    Ok(())
}

pub(crate) fn set_extent_size(ctx: &CommitContext, sid: Sid, vg: &LvmVg) -> Result<(), Error> {
    let name = vg_name(ctx, sid)?;
    debug!(
        "Setting extent size of volume group '{name}' to {} bytes",
        vg.extent_size
    );

    ctx.run(&Dependency::Vgchange.cmd().with_args([
        "-s".to_string(),
        format!("{}b", vg.extent_size),
        name,
    ]))?;
    Ok(())
}

/// Drops physical volumes that are no longer present from a volume group.
pub(crate) fn reduce_missing(ctx: &CommitContext, sid: Sid) -> Result<(), Error> {
    let name = vg_name(ctx, sid)?;
    info!("Removing missing physical volumes from volume group '{name}'");

    ctx.run(&Dependency::Vgreduce.cmd().with_args([
        "--removemissing",
        "--force",
        name.as_str(),
    ]))?;
    Ok(())
}

/// Turns a block device into a physical volume of a volume group. The first
/// physical volume of a new volume group creates the volume group.
pub(crate) fn attach(ctx: &mut CommitContext, provider: Sid, consumer: Sid) -> Result<(), Error> {
    let vg = ctx
        .rhs_device(consumer)?
        .as_lvm_vg()
        .with_context(|| format!("Device {consumer} is not a volume group"))?;
    let pv = current_name(ctx, provider)?;
    let name = vg_name(ctx, consumer)?;

    ctx.run(&Dependency::Pvcreate.cmd().with_args(["--yes", pv.as_str()]))?;

    if ctx.lhs.contains(consumer) || ctx.is_materialized(consumer) {
        debug!("Extending volume group '{name}' with '{pv}'");
        ctx.run(
            &Dependency::Vgextend
                .cmd()
                .with_args([name.as_str(), pv.as_str()]),
        )?;
    } else {
        debug!("Creating volume group '{name}' on '{pv}'");
        ctx.run(&Dependency::Vgcreate.cmd().with_args([
            "-s".to_string(),
            format!("{}b", vg.extent_size),
            name,
            pv,
        ]))?;
        ctx.mark_materialized(consumer);
    }
    Ok(())
}

/// Removes a physical volume from a volume group that stays.
pub(crate) fn detach(ctx: &CommitContext, provider: Sid, consumer: Sid) -> Result<(), Error> {
    let pv = current_name(ctx, provider)?;
    let name = vg_name(ctx, consumer)?;
    debug!("Removing '{pv}' from volume group '{name}'");

    ctx.run(
        &Dependency::Vgreduce
            .cmd()
            .with_args([name.as_str(), pv.as_str()]),
    )?;
    ctx.run(&Dependency::Pvremove.cmd().with_args(["--yes", pv.as_str()]))?;
    Ok(())
}

/// Volume group using a block device as physical volume, if any.
pub(crate) fn volume_group_on(graph: &DeviceGraph, sid: Sid) -> Option<Sid> {
    graph
        .children(sid, Some(HolderKind::User))
        .into_iter()
        .find(|child| graph.device(*child).map(Device::kind) == Some(DeviceKind::LvmVg))
}

/// Fits a physical volume to the new size of its block device. A physical
/// volume is shrunk before its device shrinks and grown after its device
/// grew.
pub(crate) fn resize_physical_volume(
    ctx: &CommitContext,
    sid: Sid,
    direction: ResizeDirection,
) -> Result<(), Error> {
    let pv = current_name(ctx, sid)?;
    let mut command = Dependency::Pvresize.cmd();
    if direction == ResizeDirection::Shrink {
        let size = usable_size(ctx.rhs, sid)
            .with_context(|| format!("Failed to get the new size of '{pv}'"))?;
        debug!("Shrinking physical volume '{pv}' to {size} bytes");
        command.args([
            "--yes".to_string(),
            "--setphysicalvolumesize".into(),
            format!("{size}b"),
        ]);
    } else {
        debug!("Growing physical volume '{pv}' to the size of its device");
    }

    ctx.run(&command.with_arg(&pv))?;
    Ok(())
}

pub(crate) fn create_logical_volume(
    ctx: &CommitContext,
    sid: Sid,
    lv: &LvmLv,
) -> Result<(), Error> {
    let vg = vg_of(ctx, sid)?;
    let name = vg_name(ctx, vg)?;
    if !ctx.lhs.contains(vg) && !ctx.is_materialized(vg) {
        bail!(
            "Volume group '{name}' has no physical volumes to hold logical volume '{}'",
            lv.lv_name
        );
    }
    debug!(
        "Creating logical volume '{}' of {} bytes in '{name}'",
        lv.lv_name, lv.size
    );

    ctx.run(&Dependency::Lvcreate.cmd().with_args([
        "--yes".to_string(),
        "--name".into(),
        lv.lv_name.clone(),
        "--size".into(),
        format!("{}b", lv.size),
        name,
    ]))?;
    Ok(())
}

pub(crate) fn delete_logical_volume(ctx: &CommitContext, sid: Sid) -> Result<(), Error> {
    let path = current_name(ctx, sid)?;
    debug!("Removing logical volume '{path}'");

    ctx.run(&Dependency::Lvremove.cmd().with_args(["--force", path.as_str()]))?;
    Ok(())
}

pub(crate) fn resize_logical_volume(
    ctx: &CommitContext,
    sid: Sid,
    lv: &LvmLv,
) -> Result<(), Error> {
    let path = current_name(ctx, sid)?;
    debug!("Resizing logical volume '{path}' to {} bytes", lv.size);

    ctx.run(&Dependency::Lvresize.cmd().with_args([
        "--force".to_string(),
        "--size".into(),
        format!("{}b", lv.size),
        path,
    ]))?;
    Ok(())
}

pub(crate) fn rename_logical_volume(
    ctx: &mut CommitContext,
    sid: Sid,
    lv: &LvmLv,
) -> Result<(), Error> {
    let vg = vg_name(ctx, vg_of(ctx, sid)?)?;
    let old = lvm_name(ctx, sid)
        .with_context(|| format!("Failed to find logical volume {sid}"))?;
    debug!("Renaming logical volume '{old}' in '{vg}' to '{}'", lv.lv_name);

    ctx.run(&Dependency::Lvrename.cmd().with_args([
        vg.as_str(),
        old.as_str(),
        lv.lv_name.as_str(),
    ]))?;
    ctx.mark_renamed(sid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use osutils::{tabfile::TabFile, testutils::RecordingExecutor};
    use strata_api::{
        devicegraph::{DeviceData, DeviceGraph, Disk, HolderKind},
        Region,
    };

    use crate::engine::with_test_context;

    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_new_volume_group() {
        let lhs = DeviceGraph::new();
        let mut rhs = DeviceGraph::new();
        let pv1 = rhs
            .create_device(Disk::new("/dev/vdb").with_region(Region::from_bytes(0, 10 * GIB, 512)))
            .unwrap();
        let pv2 = rhs
            .create_device(Disk::new("/dev/vdc").with_region(Region::from_bytes(0, 10 * GIB, 512)))
            .unwrap();
        let vg = rhs.create_device(LvmVg::new("data")).unwrap();
        rhs.add_holder(pv1, vg, HolderKind::User).unwrap();
        rhs.add_holder(pv2, vg, HolderKind::User).unwrap();
        let lv = rhs
            .create_subdevice(vg, LvmLv::new("home", 4 * GIB))
            .unwrap();
        let lv_data = rhs.device(lv).unwrap().as_lvm_lv().unwrap().clone();

        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        with_test_context(&lhs, &rhs, &executor, &mut table, |ctx| {
            assert!(create_logical_volume(ctx, lv, &lv_data).is_err());
            attach(ctx, pv1, vg).unwrap();
            attach(ctx, pv2, vg).unwrap();
            create_logical_volume(ctx, lv, &lv_data).unwrap();
        });

        assert_eq!(
            executor.commands(),
            vec![
                "pvcreate --yes /dev/vdb",
                "vgcreate -s 4194304b data /dev/vdb",
                "pvcreate --yes /dev/vdc",
                "vgextend data /dev/vdc",
                "lvcreate --yes --name home --size 4294967296b data",
            ]
        );
    }

    #[test]
    fn test_rename_resolves_names() {
        let mut lhs = DeviceGraph::new();
        let vg = lhs.create_device(LvmVg::new("system")).unwrap();
        let lv = lhs.create_subdevice(vg, LvmLv::new("root", 8 * GIB)).unwrap();

        let mut rhs = lhs.clone();
        let DeviceData::LvmVg(renamed) =
            rhs.device_mut(vg).unwrap().data_mut()
        else {
            panic!("not a volume group");
        };
        renamed.vg_name = "data".into();
        let vg_data = renamed.clone();
        let DeviceData::LvmLv(grown) =
            rhs.device_mut(lv).unwrap().data_mut()
        else {
            panic!("not a logical volume");
        };
        grown.size = 10 * GIB;
        let lv_data = grown.clone();

        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        with_test_context(&lhs, &rhs, &executor, &mut table, |ctx| {
            resize_logical_volume(ctx, lv, &lv_data).unwrap();
            rename_volume_group(ctx, vg, &vg_data).unwrap();
            resize_logical_volume(ctx, lv, &lv_data).unwrap();
            reduce_missing(ctx, vg).unwrap();
        });

        assert_eq!(
            executor.commands(),
            vec![
                "lvresize --force --size 10737418240b /dev/system/root",
                "vgrename system data",
                "lvresize --force --size 10737418240b /dev/data/root",
                "vgreduce --removemissing --force data",
            ]
        );
    }

    #[test]
    fn test_resize_physical_volume() {
        let mut lhs = DeviceGraph::new();
        let disk = lhs
            .create_device(Disk::new("/dev/vdb").with_region(Region::from_bytes(0, 20 * GIB, 512)))
            .unwrap();
        let vg = lhs.create_user(disk, LvmVg::new("data")).unwrap();
        lhs.create_subdevice(vg, LvmLv::new("home", 8 * GIB))
            .unwrap();
        let mut rhs = lhs.clone();
        let DeviceData::Disk(smaller) = rhs.device_mut(disk).unwrap().data_mut() else {
            panic!("not a disk");
        };
        smaller.region = Some(Region::from_bytes(0, 10 * GIB, 512));

        assert_eq!(volume_group_on(&lhs, disk), Some(vg));
        assert_eq!(volume_group_on(&lhs, vg), None);

        let executor = RecordingExecutor::new();
        let mut table = TabFile::default();
        with_test_context(&lhs, &rhs, &executor, &mut table, |ctx| {
            resize_physical_volume(ctx, disk, ResizeDirection::Shrink).unwrap();
            resize_physical_volume(ctx, disk, ResizeDirection::Grow).unwrap();
        });

        assert_eq!(
            executor.commands(),
            vec![
                "pvresize --yes --setphysicalvolumesize 10737418240b /dev/vdb",
                "pvresize /dev/vdb",
            ]
        );
    }
}
