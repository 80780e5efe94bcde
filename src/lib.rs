//! Storage planning: compute the actions that turn one device graph into
//! another, order them and commit them to the system.

pub mod action;
pub mod actiongraph;
pub mod engine;
pub mod logging;
pub mod storage;

pub use action::{Action, ActionKind, ModifiedAttribute, ResizeDirection};
pub use actiongraph::{ActionGraph, Precedence};
pub use engine::{
    ActionState, CancelSignal, CommitCallbacks, CommitContext, CommitEnvironment, CommitReport,
    ReportEntry,
};
pub use storage::Storage;
