use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use sysdefs::mount::MountByType;

use crate::{
    constants::{DEFAULT_FSTAB_PATH, ROOT_MOUNT_POINT_PATH},
    error::{InvalidInputError, ReportError, StrataError},
};

/// Grammatical tense of action descriptions.
#[derive(
    Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq, Hash, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Tense {
    /// "Create partition /dev/sda1", used for previews.
    Future,

    /// "Created partition /dev/sda1", used while committing.
    #[default]
    Past,
}

/// What the commit engine does when an action fails.
#[derive(
    Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq, Hash, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failed action.
    #[default]
    Abort,

    /// Record the failure, skip everything that depends on the failed action
    /// and carry on with independent actions.
    Collect,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommitOptions {
    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Log every action text at info level instead of debug.
    #[serde(default)]
    pub verbose: bool,

    /// Tense of the messages reported while committing.
    #[serde(default)]
    pub tense: Tense,

    /// Wait for udev after creating or removing block devices.
    #[serde(default = "default_true")]
    pub settle: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::default(),
            verbose: false,
            tense: Tense::default(),
            settle: true,
        }
    }
}

/// Configuration of a storage planning session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageConfig {
    /// Prefix of all mount points, e.g. the target root of an installer.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: PathBuf,

    /// Location of the persisted mount table.
    #[serde(default = "default_fstab_path")]
    pub fstab_path: PathBuf,

    /// How new mount points reference their device when none is given.
    #[serde(default)]
    pub default_mount_by: MountByType,

    #[serde(default)]
    pub commit: CommitOptions,
}

fn default_root_prefix() -> PathBuf {
    PathBuf::from(ROOT_MOUNT_POINT_PATH)
}

fn default_fstab_path() -> PathBuf {
    PathBuf::from(DEFAULT_FSTAB_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_prefix: default_root_prefix(),
            fstab_path: default_fstab_path(),
            default_mount_by: MountByType::default(),
            commit: CommitOptions::default(),
        }
    }
}

impl StorageConfig {
    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StrataError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).structured(InvalidInputError::LoadConfig {
                path: path.display().to_string(),
            })?;
        Self::from_yaml(&contents)
    }

    /// Parses the configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, StrataError> {
        serde_yaml::from_str(contents).structured(InvalidInputError::ParseConfig)
    }

    /// Returns the absolute path of a mount point below the root prefix.
    pub fn prefixed(&self, mount_point: impl AsRef<Path>) -> PathBuf {
        let relative = mount_point
            .as_ref()
            .strip_prefix(ROOT_MOUNT_POINT_PATH)
            .unwrap_or(mount_point.as_ref());
        if relative.as_os_str().is_empty() {
            return self.root_prefix.clone();
        }
        self.root_prefix.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::from_yaml("{}").unwrap();
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.fstab_path, PathBuf::from("/etc/fstab"));
        assert_eq!(config.default_mount_by, MountByType::Uuid);
        assert_eq!(config.commit.on_failure, FailurePolicy::Abort);
        assert_eq!(config.commit.tense, Tense::Past);
        assert!(config.commit.settle);
    }

    #[test]
    fn test_parse() {
        let config = StorageConfig::from_yaml(indoc! {r#"
            rootPrefix: /mnt/target
            fstabPath: /mnt/target/etc/fstab
            defaultMountBy: label
            commit:
              onFailure: collect
              verbose: true
              tense: future
              settle: false
        "#})
        .unwrap();

        assert_eq!(config.root_prefix, PathBuf::from("/mnt/target"));
        assert_eq!(config.default_mount_by, MountByType::Label);
        assert_eq!(
            config.commit,
            CommitOptions {
                on_failure: FailurePolicy::Collect,
                verbose: true,
                tense: Tense::Future,
                settle: false,
            }
        );
        assert_eq!(
            config.prefixed("/home"),
            PathBuf::from("/mnt/target/home")
        );
        assert_eq!(config.prefixed("/"), PathBuf::from("/mnt/target"));
    }

    #[test]
    fn test_unknown_field() {
        let error = StorageConfig::from_yaml("rootPrefx: /mnt").unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidInput(InvalidInputError::ParseConfig)
        );
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fstabPath: /tmp/fstab").unwrap();
        let config = StorageConfig::load(file.path()).unwrap();
        assert_eq!(config.fstab_path, PathBuf::from("/tmp/fstab"));

        let error = StorageConfig::load("/non-existent/storage.yaml").unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidInput(InvalidInputError::LoadConfig {
                path: "/non-existent/storage.yaml".into()
            })
        );
    }
}
