use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::trace;

use osutils::{
    dependencies::{Command, CommandOutput, Dependency, Executor},
    tabfile::MountTable,
};
use strata_api::{
    config::{CommitOptions, StorageConfig},
    constants::UDEV_SETTLE_TIMEOUT_SECS,
    devicegraph::{Device, DeviceGraph},
    error::{InternalError, ReportError, StrataResultExt},
    Sid,
};

use crate::actiongraph::ActionGraph;

/// State shared by all actions of one commit.
pub struct CommitContext<'c> {
    /// The device graph describing the system before the commit.
    pub lhs: &'c DeviceGraph,

    /// The device graph the commit turns the system into.
    pub rhs: &'c DeviceGraph,

    pub actiongraph: &'c ActionGraph<'c>,

    pub options: &'c CommitOptions,

    config: &'c StorageConfig,

    executor: &'c dyn Executor,

    mount_table: &'c mut dyn MountTable,

    /// Volume groups created during this commit. A new volume group only
    /// exists on the system once its first physical volume is attached.
    materialized_vgs: HashSet<Sid>,

    /// Volume groups and logical volumes renamed during this commit.
    renamed: HashSet<Sid>,
}

impl<'c> CommitContext<'c> {
    pub fn new(
        actiongraph: &'c ActionGraph<'c>,
        config: &'c StorageConfig,
        executor: &'c dyn Executor,
        mount_table: &'c mut dyn MountTable,
    ) -> Self {
        Self {
            lhs: actiongraph.lhs(),
            rhs: actiongraph.rhs(),
            actiongraph,
            options: &config.commit,
            config,
            executor,
            mount_table,
            materialized_vgs: HashSet::new(),
            renamed: HashSet::new(),
        }
    }

    /// Runs a command through the configured executor.
    pub fn run(&self, command: &Command) -> Result<CommandOutput, Error> {
        trace!("Executing '{}'", command.render_command());
        self.executor
            .execute(command)
            .with_context(|| format!("Failed to run '{}'", command.render_command()))
    }

    pub fn mount_table(&mut self) -> &mut dyn MountTable {
        self.mount_table
    }

    /// Resolves a mount path below the root prefix.
    pub fn prefixed(&self, path: &Path) -> PathBuf {
        self.config.prefixed(path)
    }

    pub fn config(&self) -> &'c StorageConfig {
        self.config
    }

    /// Waits for udev to process the events of a block device change.
    pub fn settle(&self) -> Result<(), Error> {
        if !self.options.settle {
            return Ok(());
        }

        self.run(
            &Dependency::Udevadm
                .cmd()
                .with_arg("settle")
                .with_arg(format!("--timeout={UDEV_SETTLE_TIMEOUT_SECS}")),
        )
        .map(|_| ())
    }

    /// Looks up a device in the current device graph.
    pub fn lhs_device(&self, sid: Sid) -> Result<&'c Device, Error> {
        self.lhs
            .device(sid)
            .structured(InternalError::DanglingSid(sid))
            .unstructured("Device is not part of the current device graph")
    }

    /// Looks up a device in the target device graph.
    pub fn rhs_device(&self, sid: Sid) -> Result<&'c Device, Error> {
        self.rhs
            .device(sid)
            .structured(InternalError::DanglingSid(sid))
            .unstructured("Device is not part of the target device graph")
    }

    pub(crate) fn is_materialized(&self, vg: Sid) -> bool {
        self.materialized_vgs.contains(&vg)
    }

    pub(crate) fn mark_materialized(&mut self, vg: Sid) {
        self.materialized_vgs.insert(vg);
    }

    pub(crate) fn is_renamed(&self, sid: Sid) -> bool {
        self.renamed.contains(&sid)
    }

    pub(crate) fn mark_renamed(&mut self, sid: Sid) {
        self.renamed.insert(sid);
    }
}
