//! Registry of named device graphs.

use std::collections::BTreeMap;

use log::debug;

use strata_api::{
    config::StorageConfig,
    devicegraph::DeviceGraph,
    error::{InvalidInputError, ReportError, StrataError, StrataResultExt},
};

use crate::{
    actiongraph::ActionGraph,
    engine::{CommitEnvironment, CommitReport},
};

/// Name of the graph holding the system as it was found.
pub const CURRENT: &str = "current";

/// Name of the graph holding the system as it should become.
pub const STAGING: &str = "staging";

/// Device graphs addressed by name, plus the configuration used to commit
/// between them.
#[derive(Debug, Default)]
pub struct Storage {
    config: StorageConfig,
    devicegraphs: BTreeMap<String, DeviceGraph>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            devicegraphs: BTreeMap::new(),
        }
    }

    /// Registers `current` under [`CURRENT`] and a copy of it under
    /// [`STAGING`], ready to be edited.
    pub fn with_current(config: StorageConfig, current: DeviceGraph) -> Self {
        let mut storage = Self::new(config);
        storage
            .devicegraphs
            .insert(STAGING.to_string(), current.clone());
        storage.devicegraphs.insert(CURRENT.to_string(), current);
        storage
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Adds an empty device graph.
    pub fn create_devicegraph(&mut self, name: &str) -> Result<&mut DeviceGraph, StrataError> {
        self.insert(name, DeviceGraph::new())
    }

    /// Adds a copy of the graph `source` under the name `dest`. The copy
    /// keeps all sids and is independent of the source afterwards.
    pub fn copy_devicegraph(
        &mut self,
        source: &str,
        dest: &str,
    ) -> Result<&mut DeviceGraph, StrataError> {
        let copy = self.devicegraph(source)?.clone();
        self.insert(dest, copy)
    }

    pub fn devicegraph(&self, name: &str) -> Result<&DeviceGraph, StrataError> {
        self.devicegraphs
            .get(name)
            .structured(InvalidInputError::UnknownDevicegraph { name: name.into() })
    }

    pub fn devicegraph_mut(&mut self, name: &str) -> Result<&mut DeviceGraph, StrataError> {
        self.devicegraphs
            .get_mut(name)
            .structured(InvalidInputError::UnknownDevicegraph { name: name.into() })
    }

    pub fn remove_devicegraph(&mut self, name: &str) -> Result<DeviceGraph, StrataError> {
        debug!("Removing device graph '{name}'");
        self.devicegraphs
            .remove(name)
            .structured(InvalidInputError::UnknownDevicegraph { name: name.into() })
    }

    pub fn exist_devicegraph(&self, name: &str) -> bool {
        self.devicegraphs.contains_key(name)
    }

    /// Names of all device graphs, sorted.
    pub fn devicegraph_names(&self) -> Vec<&str> {
        self.devicegraphs.keys().map(String::as_str).collect()
    }

    /// Computes the actions turning graph `lhs` into graph `rhs`.
    pub fn calculate_actiongraph(
        &self,
        lhs: &str,
        rhs: &str,
    ) -> Result<ActionGraph<'_>, StrataError> {
        ActionGraph::new(self.devicegraph(lhs)?, self.devicegraph(rhs)?)
            .message(format!("Failed to plan the changes from '{lhs}' to '{rhs}'"))
    }

    /// Plans and commits the changes from graph `lhs` to graph `rhs`.
    pub fn commit(
        &self,
        lhs: &str,
        rhs: &str,
        env: CommitEnvironment<'_>,
    ) -> Result<CommitReport, StrataError> {
        self.calculate_actiongraph(lhs, rhs)?
            .commit(&self.config, env)
    }

    fn insert(&mut self, name: &str, graph: DeviceGraph) -> Result<&mut DeviceGraph, StrataError> {
        if self.devicegraphs.contains_key(name) {
            return Err(StrataError::new(InvalidInputError::DuplicateName {
                name: name.into(),
            }));
        }

        debug!("Adding device graph '{name}'");
        Ok(self.devicegraphs.entry(name.to_string()).or_insert(graph))
    }
}
