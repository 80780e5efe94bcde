use anyhow::{Context, Error};
use log::debug;

use osutils::dependencies::{Command, Dependency};
use strata_api::{devicegraph::Luks, Sid};

use super::{current_blk_device_of, usable_size};
use crate::{action::ResizeDirection, engine::CommitContext};

/// Adds the passphrase of a volume as key file on stdin.
fn with_key(command: Command, luks: &Luks) -> Result<Command, Error> {
    let passphrase = luks
        .passphrase
        .as_ref()
        .with_context(|| format!("No passphrase for encrypted volume '{}'", luks.dm_name))?;
    Ok(command
        .with_args(["--key-file", "-"])
        .with_stdin(passphrase.expose()))
}

/// Formats a block device with LUKS2 and opens it.
pub(crate) fn create(ctx: &CommitContext, sid: Sid, luks: &Luks) -> Result<(), Error> {
    let blk = current_blk_device_of(ctx, sid)?;
    debug!("Encrypting '{blk}' as '{}'", luks.dm_name);

    let mut format = Dependency::Cryptsetup
        .cmd()
        .with_args(["--batch-mode", "luksFormat", "--type", "luks2"]);
    if let Some(uuid) = &luks.uuid {
        format.args(["--uuid", uuid.as_str()]);
    }
    ctx.run(&with_key(format, luks)?.with_arg(&blk))?;

    ctx.run(
        &with_key(Dependency::Cryptsetup.cmd().with_arg("open"), luks)?
            .with_args([blk.as_str(), luks.dm_name.as_str()]),
    )?;
    Ok(())
}

/// Closes an encrypted volume and wipes its header.
pub(crate) fn delete(ctx: &CommitContext, sid: Sid, luks: &Luks) -> Result<(), Error> {
    let blk = current_blk_device_of(ctx, sid)?;
    debug!("Closing encrypted volume '{}' on '{blk}'", luks.dm_name);

    ctx.run(
        &Dependency::Cryptsetup
            .cmd()
            .with_args(["close", luks.dm_name.as_str()]),
    )?;
    ctx.run(&Dependency::Wipefs.cmd().with_args(["-a", blk.as_str()]))?;
    Ok(())
}

pub(crate) fn set_uuid(ctx: &CommitContext, sid: Sid, luks: &Luks) -> Result<(), Error> {
    let Some(uuid) = &luks.uuid else {
        return Ok(());
    };
    let blk = current_blk_device_of(ctx, sid)?;
    debug!("Setting UUID of encrypted volume on '{blk}' to '{uuid}'");

    ctx.run(&Dependency::Cryptsetup.cmd().with_args([
        "--batch-mode",
        "luksUUID",
        "--uuid",
        uuid.as_str(),
        blk.as_str(),
    ]))?;
    Ok(())
}

/// Adjusts the size of an open encrypted volume. Growing fills the
/// underlying device; shrinking sets the size in 512-byte sectors.
pub(crate) fn resize(
    ctx: &CommitContext,
    sid: Sid,
    luks: &Luks,
    direction: ResizeDirection,
) -> Result<(), Error> {
    let mut command = Dependency::Cryptsetup.cmd().with_arg("resize");
    if direction == ResizeDirection::Shrink {
        let size = usable_size(ctx.rhs, sid)
            .with_context(|| format!("Failed to get the new size of '{}'", luks.dm_name))?;
        command.args(["--size".to_string(), (size / 512).to_string()]);
    }
    debug!("Resizing encrypted volume '{}'", luks.dm_name);

    let command = match luks.passphrase {
        Some(_) => with_key(command, luks)?,
        None => command,
    };
    ctx.run(&command.with_arg(&luks.dm_name))?;
    Ok(())
}
