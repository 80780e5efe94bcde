use std::{
    fmt::Display,
    sync::atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Serialize};

/// First sid handed out in a process.
const FIRST_SID: u32 = 42;

static NEXT_SID: AtomicU32 = AtomicU32::new(FIRST_SID);

/// Storage id: the stable identity of a device.
///
/// A sid is assigned once when a device is created and is preserved when a
/// device graph is copied, so the same sid names "the same device" in every
/// copy. This is what lets two independently modified graphs be compared.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sid(u32);

impl Sid {
    /// Allocates a new, process-unique sid.
    pub(crate) fn next() -> Self {
        Self(NEXT_SID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw sid value, e.g. one recorded by a device scan.
    ///
    /// The caller is responsible for not mixing raw values with sids
    /// allocated in this process.
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
