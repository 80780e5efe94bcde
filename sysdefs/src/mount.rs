use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// How a mountable is referenced in the persisted mount table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MountByType {
    /// The kernel device name, e.g. `/dev/sda1`.
    Device,

    /// The filesystem UUID, e.g. `UUID=...`.
    #[default]
    Uuid,

    /// The filesystem label, e.g. `LABEL=...`.
    Label,
}

impl Display for MountByType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}
