//! Subvolumes of btrfs filesystems. Every change goes through a temporary
//! mount of the top level subvolume, so it works whether or not the
//! filesystem is mounted elsewhere.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, warn};
use tempfile::TempDir;

use osutils::dependencies::{Command, Dependency};
use strata_api::{
    devicegraph::{
        BtrfsSubvolume, Device, DeviceGraph, DeviceKindFlag, HolderKind, TraversalFilter,
    },
    Sid,
};

use super::current_blk_device_of;
use crate::engine::CommitContext;

/// Subvolume id of the top level subvolume.
const TOP_LEVEL_ID: &str = "5";

/// Mounts the top level subvolume of the filesystem holding `sid` at a
/// temporary directory and calls `f` with that directory. The filesystem is
/// unmounted again even when `f` fails.
fn with_top_level<T>(
    ctx: &CommitContext,
    sid: Sid,
    f: impl FnOnce(&Path) -> Result<T, Error>,
) -> Result<T, Error> {
    let fs = ctx
        .rhs
        .filesystem_of(sid)
        .or_else(|| ctx.lhs.filesystem_of(sid))
        .with_context(|| format!("Failed to find the filesystem of subvolume {sid}"))?;
    let blk = current_blk_device_of(ctx, fs)?;

    let dir = TempDir::new().context("Failed to create a temporary mount directory")?;
    debug!(
        "Mounting top level subvolume of '{blk}' at '{}'",
        dir.path().display()
    );
    ctx.run(
        &Dependency::Mount
            .cmd()
            .with_args(["-t", "btrfs", "-o"])
            .with_arg(format!("subvolid={TOP_LEVEL_ID}"))
            .with_arg(&blk)
            .with_arg(dir.path()),
    )?;

    let result = f(dir.path());

    let unmounted = ctx.run(&Dependency::Umount.cmd().with_arg(dir.path()));
    if let Err(e) = &unmounted {
        warn!("Failed to unmount '{}': {e:#}", dir.path().display());
    }
    let value = result?;
    unmounted?;
    Ok(value)
}

fn subvolume_path(top_level: &Path, subvolume: &BtrfsSubvolume) -> PathBuf {
    top_level.join(subvolume.path.trim_start_matches('/'))
}

fn set_default_command(top_level: &Path, subvolume: Option<&Path>) -> Command {
    let command = Dependency::Btrfs.cmd().with_args(["subvolume", "set-default"]);
    match subvolume {
        Some(path) => command.with_arg(path),
        None => command.with_arg(TOP_LEVEL_ID).with_arg(top_level),
    }
}

fn chattr_command(path: &Path, nocow: bool) -> Command {
    Dependency::Chattr
        .cmd()
        .with_arg(if nocow { "+C" } else { "-C" })
        .with_arg(path)
}

/// Returns whether another subvolume of the filesystem holding `sid` is the
/// default in `graph`.
fn other_default(graph: &DeviceGraph, sid: Sid) -> bool {
    let Some(fs) = graph.filesystem_of(sid) else {
        return false;
    };
    graph
        .descendants(
            fs,
            TraversalFilter::holder_kind(HolderKind::Subdevice)
                .with_device_kinds(DeviceKindFlag::BtrfsSubvolume),
        )
        .into_iter()
        .filter(|other| *other != sid)
        .filter_map(|other| graph.device(other).and_then(Device::as_btrfs_subvolume))
        .any(|other| other.default)
}

pub(crate) fn create_subvolume(
    ctx: &CommitContext,
    sid: Sid,
    subvolume: &BtrfsSubvolume,
) -> Result<(), Error> {
    with_top_level(ctx, sid, |top_level| {
        let path = subvolume_path(top_level, subvolume);
        debug!("Creating subvolume '{}'", subvolume.path);

        // Plain directories between nested subvolumes are not tracked.
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
        }
        ctx.run(
            &Dependency::Btrfs
                .cmd()
                .with_args(["subvolume", "create"])
                .with_arg(&path),
        )?;

        if subvolume.nocow {
            ctx.run(&chattr_command(&path, true))?;
        }
        if subvolume.default {
            ctx.run(&set_default_command(top_level, Some(path.as_path())))?;
        }
        Ok(())
    })
}

/// Deletes a subvolume. The default subvolume cannot be deleted, so the top
/// level becomes the default first.
pub(crate) fn delete_subvolume(
    ctx: &CommitContext,
    sid: Sid,
    subvolume: &BtrfsSubvolume,
) -> Result<(), Error> {
    with_top_level(ctx, sid, |top_level| {
        let path = subvolume_path(top_level, subvolume);
        debug!("Deleting subvolume '{}'", subvolume.path);

        if subvolume.default {
            ctx.run(&set_default_command(top_level, None))?;
        }
        ctx.run(
            &Dependency::Btrfs
                .cmd()
                .with_args(["subvolume", "delete"])
                .with_arg(&path),
        )?;
        Ok(())
    })
}

pub(crate) fn set_nocow(
    ctx: &CommitContext,
    sid: Sid,
    subvolume: &BtrfsSubvolume,
) -> Result<(), Error> {
    with_top_level(ctx, sid, |top_level| {
        debug!(
            "Setting nocow of subvolume '{}' to {}",
            subvolume.path, subvolume.nocow
        );
        ctx.run(&chattr_command(
            &subvolume_path(top_level, subvolume),
            subvolume.nocow,
        ))?;
        Ok(())
    })
}

/// Makes a subvolume the default, or gives the default back to the top level
/// when no other subvolume takes it over.
pub(crate) fn set_default(
    ctx: &CommitContext,
    sid: Sid,
    subvolume: &BtrfsSubvolume,
) -> Result<(), Error> {
    if !subvolume.default && other_default(ctx.rhs, sid) {
        debug!(
            "Subvolume '{}' hands over the default to another subvolume",
            subvolume.path
        );
        return Ok(());
    }

    with_top_level(ctx, sid, |top_level| {
        let path = subvolume.default.then(|| subvolume_path(top_level, subvolume));
        debug!("Setting default subvolume to '{}'", subvolume.path);
        ctx.run(&set_default_command(top_level, path.as_deref()))?;
        Ok(())
    })
}
