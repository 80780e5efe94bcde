//! Helpers for testing code that runs commands.

mod executor;

pub use executor::{RecordedCommand, RecordingExecutor};
