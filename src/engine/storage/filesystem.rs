use anyhow::{Context, Error};
use log::debug;

use osutils::dependencies::{Command, Dependency};
use strata_api::{devicegraph::Filesystem, Sid};
use sysdefs::filesystems::FsType;

use super::{current_blk_device_of, unsupported, usable_size};
use crate::{action::ResizeDirection, engine::CommitContext};

/// Builds the command formatting `blk` with `fs`, including its label and
/// UUID when the formatter can set them.
fn format_command(fs: &Filesystem, blk: &str) -> Command {
    let mut command = match fs.fs_type {
        FsType::Swap => Dependency::Mkswap.cmd(),
        fs_type => Dependency::Mkfs.cmd().with_args(["-t", fs_type.name()]),
    };

    if let (Some(label), Some(option)) = (&fs.label, fs.fs_type.mkfs_label_option()) {
        command.args([option, label.as_str()]);
    }

    if let (Some(uuid), Some(option)) = (&fs.uuid, fs.fs_type.mkfs_uuid_option()) {
        match fs.fs_type {
            FsType::Xfs => command.args([option.to_string(), format!("uuid={uuid}")]),
            _ => command.args([option, uuid.as_str()]),
        };
    }

    command.with_arg(blk)
}

/// Wipes old signatures and creates the filesystem.
pub(crate) fn create(ctx: &CommitContext, sid: Sid, fs: &Filesystem) -> Result<(), Error> {
    let blk = current_blk_device_of(ctx, sid)?;
    debug!("Creating {} filesystem on '{blk}'", fs.fs_type);

    ctx.run(&Dependency::Wipefs.cmd().with_args(["-a", blk.as_str()]))?;
    ctx.run(&format_command(fs, &blk))?;
    Ok(())
}

pub(crate) fn delete(ctx: &CommitContext, sid: Sid, fs: &Filesystem) -> Result<(), Error> {
    let blk = current_blk_device_of(ctx, sid)?;
    debug!("Wiping {} filesystem from '{blk}'", fs.fs_type);

    ctx.run(&Dependency::Wipefs.cmd().with_args(["-a", blk.as_str()]))?;
    Ok(())
}

/// Resizes a filesystem to the size of its block device. Swap is
/// recreated, keeping its label and UUID.
pub(crate) fn resize(
    ctx: &CommitContext,
    sid: Sid,
    fs: &Filesystem,
    direction: ResizeDirection,
) -> Result<(), Error> {
    let blk = current_blk_device_of(ctx, sid)?;
    let action = format!("resize {} on {blk}", fs.fs_type);

    let supported = match direction {
        ResizeDirection::Grow => fs.fs_type.supports_grow() || fs.fs_type.is_swap(),
        ResizeDirection::Shrink => fs.fs_type.supports_shrink() || fs.fs_type.is_swap(),
    };
    if !supported {
        let verb: &str = direction.into();
        return Err(unsupported(
            action,
            format!("{} does not support {verb}ing", fs.fs_type),
        ));
    }
    debug!("Resizing {} filesystem on '{blk}'", fs.fs_type);

    match fs.fs_type {
        FsType::Swap => {
            ctx.run(&format_command(fs, &blk))?;
        }
        fs_type if fs_type.is_ext() => {
            let mut command = Dependency::Resize2fs.cmd().with_arg(&blk);
            if direction == ResizeDirection::Shrink {
                let size = usable_size(ctx.rhs, sid)
                    .with_context(|| format!("Failed to get the new size of '{blk}'"))?;
                command.arg(format!("{}K", size / 1024));
            }
            ctx.run(&command)?;
        }
        fs_type => {
            return Err(unsupported(
                action,
                format!("resizing {fs_type} needs it to be mounted"),
            ))
        }
    }
    Ok(())
}

pub(crate) fn set_label(ctx: &CommitContext, sid: Sid, fs: &Filesystem) -> Result<(), Error> {
    let blk = current_blk_device_of(ctx, sid)?;
    let label = fs.label.clone().unwrap_or_default();
    debug!("Setting label of {} on '{blk}' to '{label}'", fs.fs_type);

    let command = match fs.fs_type {
        FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => Dependency::Tune2fs
            .cmd()
            .with_args(["-L", label.as_str(), blk.as_str()]),
        FsType::Xfs => Dependency::XfsAdmin.cmd().with_args([
            "-L",
            if label.is_empty() { "--" } else { label.as_str() },
            blk.as_str(),
        ]),
        FsType::Swap => Dependency::Swaplabel
            .cmd()
            .with_args(["-L", label.as_str(), blk.as_str()]),
        FsType::Vfat => Dependency::Fatlabel
            .cmd()
            .with_args([blk.as_str(), label.as_str()]),
        FsType::Btrfs => Dependency::Btrfs.cmd().with_args([
            "filesystem",
            "label",
            blk.as_str(),
            label.as_str(),
        ]),
        fs_type => {
            return Err(unsupported(
                format!("set label of {fs_type} on {blk}"),
                format!("{fs_type} labels cannot be changed"),
            ))
        }
    };
    ctx.run(&command)?;
    Ok(())
}

pub(crate) fn set_uuid(ctx: &CommitContext, sid: Sid, fs: &Filesystem) -> Result<(), Error> {
    let Some(uuid) = &fs.uuid else {
        return Ok(());
    };
    let blk = current_blk_device_of(ctx, sid)?;
    debug!("Setting UUID of {} on '{blk}' to '{uuid}'", fs.fs_type);

    let command = match fs.fs_type {
        FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => Dependency::Tune2fs
            .cmd()
            .with_args(["-U", uuid.as_str(), blk.as_str()]),
        FsType::Xfs => Dependency::XfsAdmin
            .cmd()
            .with_args(["-U", uuid.as_str(), blk.as_str()]),
        FsType::Swap => Dependency::Swaplabel
            .cmd()
            .with_args(["-U", uuid.as_str(), blk.as_str()]),
        fs_type => {
            return Err(unsupported(
                format!("set UUID of {fs_type} on {blk}"),
                format!("{fs_type} UUIDs cannot be changed"),
            ))
        }
    };
    ctx.run(&command)?;
    Ok(())
}
