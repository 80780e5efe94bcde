use std::path::PathBuf;

use anyhow::{Context, Error};
use log::debug;

use osutils::{dependencies::Dependency, tabfile::TabFileEntry};
use strata_api::{
    constants::{ROOT_MOUNT_POINT_PATH, SWAP_MOUNT_POINT},
    devicegraph::{DeviceGraph, Filesystem, MountPoint},
    error::{CommitError, ReportError, StrataResultExt},
    Sid,
};
use sysdefs::mount::MountByType;

use super::current_blk_device_of;
use crate::engine::CommitContext;

/// A mount point together with the filesystem it belongs to.
fn mount_point_of(graph: &DeviceGraph, sid: Sid) -> Result<(&MountPoint, Sid, &Filesystem), Error> {
    let mount_point = graph
        .device(sid)
        .and_then(|device| device.as_mount_point())
        .with_context(|| format!("Device {sid} is not a mount point"))?;
    let fs_sid = graph
        .filesystem_of(sid)
        .with_context(|| format!("Failed to find the filesystem of mount point {sid}"))?;
    let fs = graph
        .device(fs_sid)
        .and_then(|device| device.as_filesystem())
        .with_context(|| format!("Device {fs_sid} is not a filesystem"))?;
    Ok((mount_point, fs_sid, fs))
}

/// Mount options of a mount point. A subvolume is selected by path unless
/// the options already select one.
fn mount_options(graph: &DeviceGraph, sid: Sid, mount_point: &MountPoint) -> Vec<String> {
    let mut options = mount_point.mount_options.clone();
    let selected = options
        .iter()
        .any(|option| option.starts_with("subvol=") || option.starts_with("subvolid="));
    let subvolume = graph
        .subvolume_of(sid)
        .and_then(|subvolume| graph.device(subvolume)?.as_btrfs_subvolume());
    if let (Some(subvolume), false) = (subvolume, selected) {
        options.insert(0, format!("subvol={}", subvolume.path));
    }
    options
}

/// Builds the mount table entry of a mount point as described by `graph`.
///
/// Mount by UUID or label falls back to the device name when the
/// filesystem has no UUID or label.
pub(crate) fn fstab_entry(graph: &DeviceGraph, sid: Sid) -> Result<TabFileEntry, Error> {
    let (mount_point, fs_sid, fs) = mount_point_of(graph, sid)?;
    let blk = graph
        .blk_device_name_of(fs_sid)
        .with_context(|| format!("Failed to find the block device of filesystem {fs_sid}"))?;

    let spec = match (mount_point.mount_by, &fs.uuid, &fs.label) {
        (MountByType::Uuid, Some(uuid), _) => format!("UUID={uuid}"),
        (MountByType::Label, _, Some(label)) => format!("LABEL={label}"),
        _ => blk,
    };

    let fs_type = mount_point.mount_type.unwrap_or(fs.fs_type);
    let path = if fs_type.is_swap() {
        PathBuf::from(SWAP_MOUNT_POINT)
    } else {
        mount_point.path.clone()
    };
    let passno = if fs_type.is_swap() {
        0
    } else if mount_point.path.as_os_str() == ROOT_MOUNT_POINT_PATH {
        1
    } else {
        2
    };
    let mut options = mount_options(graph, sid, mount_point);
    if options.is_empty() {
        options.push("defaults".to_string());
    }

    Ok(TabFileEntry::new(spec, path, fs_type.name())
        .with_options(options)
        .with_passno(passno))
}

/// Mounts a filesystem below the root prefix, or activates swap.
pub(crate) fn mount(ctx: &CommitContext, sid: Sid) -> Result<(), Error> {
    let (mount_point, fs_sid, fs) = mount_point_of(ctx.rhs, sid)?;
    let blk = current_blk_device_of(ctx, fs_sid)?;
    let fs_type = mount_point.mount_type.unwrap_or(fs.fs_type);

    if fs_type.is_swap() {
        debug!("Activating swap on '{blk}'");
        ctx.run(&Dependency::Swapon.cmd().with_arg(&blk))?;
        return Ok(());
    }

    let target = ctx.prefixed(&mount_point.path);
    debug!("Mounting '{blk}' at '{}'", target.display());

    let mut command = Dependency::Mount.cmd().with_args(["-t", fs_type.name()]);
    let options = mount_options(ctx.rhs, sid, mount_point);
    if !options.is_empty() {
        command.args(["-o".to_string(), options.join(",")]);
    }
    ctx.run(&command.with_arg(&blk).with_arg(&target))?;
    Ok(())
}

/// Unmounts a filesystem, or deactivates swap.
pub(crate) fn unmount(ctx: &CommitContext, sid: Sid) -> Result<(), Error> {
    let (mount_point, fs_sid, fs) = mount_point_of(ctx.lhs, sid)?;
    let fs_type = mount_point.mount_type.unwrap_or(fs.fs_type);

    if fs_type.is_swap() {
        let blk = current_blk_device_of(ctx, fs_sid)?;
        debug!("Deactivating swap on '{blk}'");
        ctx.run(&Dependency::Swapoff.cmd().with_arg(&blk))?;
        return Ok(());
    }

    let target = ctx.prefixed(&mount_point.path);
    debug!("Unmounting '{}'", target.display());
    ctx.run(&Dependency::Umount.cmd().with_arg(&target))?;
    Ok(())
}

fn mount_table_error(ctx: &CommitContext) -> CommitError {
    CommitError::MountTable {
        path: ctx.config().fstab_path.display().to_string(),
    }
}

pub(crate) fn add_to_fstab(ctx: &mut CommitContext, sid: Sid) -> Result<(), Error> {
    let entry = fstab_entry(ctx.rhs, sid)?;
    debug!("Adding mount table entry '{entry}'");

    let error = mount_table_error(ctx);
    ctx.mount_table()
        .add_entry(entry)
        .structured(error)
        .unstructured("Failed to add mount table entry")
}

pub(crate) fn remove_from_fstab(ctx: &mut CommitContext, sid: Sid) -> Result<(), Error> {
    let entry = fstab_entry(ctx.lhs, sid)?;
    debug!("Removing mount table entry '{entry}'");

    let error = mount_table_error(ctx);
    ctx.mount_table()
        .remove_entry(&entry.spec, &entry.mount_point)
        .structured(error)
        .unstructured("Failed to remove mount table entry")
}

/// Replaces the entry written for the current graph with the entry of the
/// target graph.
pub(crate) fn update_in_fstab(ctx: &mut CommitContext, sid: Sid) -> Result<(), Error> {
    let old = fstab_entry(ctx.lhs, sid)?;
    let new = fstab_entry(ctx.rhs, sid)?;
    debug!("Replacing mount table entry '{old}' with '{new}'");

    let error = mount_table_error(ctx);
    ctx.mount_table()
        .update_entry(&old.spec, &old.mount_point, new)
        .structured(error)
        .unstructured("Failed to update mount table entry")
}
