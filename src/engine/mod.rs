//! The commit engine: applies the actions of an action graph to the system
//! in commit order.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use petgraph::graph::NodeIndex;
use serde::Serialize;

use osutils::{dependencies::Executor, tabfile::MountTable};
use strata_api::{
    config::{FailurePolicy, StorageConfig, Tense},
    error::{CancellationError, CommitError, ReportError, StrataError},
};

use crate::{action::Action, actiongraph::ActionGraph};

mod context;
pub(crate) mod storage;

pub use context::CommitContext;

/// Hooks called by the commit loop. All methods have defaults that do
/// nothing.
pub trait CommitCallbacks {
    /// Called before an action is committed, with its description.
    fn begin(&mut self, _text: &str) {}

    /// Called after an action was committed, with its description in the
    /// configured tense.
    fn message(&mut self, _text: &str) {}

    /// Called when an action failed. Returning `true` carries on with the
    /// actions that do not depend on the failed one.
    fn error(&mut self, _text: &str, _details: &str) -> bool {
        false
    }
}

/// Signal checked by the commit loop between actions.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the running action is finished first.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a commit needs from outside the planner.
pub struct CommitEnvironment<'e> {
    pub executor: &'e dyn Executor,
    pub mount_table: &'e mut dyn MountTable,
    pub callbacks: Option<&'e mut dyn CommitCallbacks>,
    pub cancel: Option<&'e CancelSignal>,
}

impl<'e> CommitEnvironment<'e> {
    pub fn new(executor: &'e dyn Executor, mount_table: &'e mut dyn MountTable) -> Self {
        Self {
            executor,
            mount_table,
            callbacks: None,
            cancel: None,
        }
    }

    pub fn with_callbacks(mut self, callbacks: &'e mut dyn CommitCallbacks) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: &'e CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of one action.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", tag = "state", content = "reason")]
pub enum ActionState {
    Planned,
    Committed,
    Failed(String),
    Skipped(String),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub action: Action,
    pub text: String,
    pub state: ActionState,
}

/// The actions of a commit in commit order, with their outcome.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    entries: Vec<ReportEntry>,
}

impl CommitReport {
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// State of an action, if it is part of the commit.
    pub fn state(&self, action: &Action) -> Option<&ActionState> {
        self.entries
            .iter()
            .find(|entry| &entry.action == action)
            .map(|entry| &entry.state)
    }

    pub fn committed(&self) -> usize {
        self.count(|state| *state == ActionState::Committed)
    }

    pub fn failed(&self) -> usize {
        self.count(|state| matches!(state, ActionState::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|state| matches!(state, ActionState::Skipped(_)))
    }

    /// Whether every action was committed.
    pub fn is_success(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.state == ActionState::Committed)
    }

    fn count(&self, filter: impl Fn(&ActionState) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|entry| filter(&entry.state))
            .count()
    }
}

/// Turns "Create partition /dev/sda1" into "create partition /dev/sda1" for
/// use inside a sentence.
fn in_sentence(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl<'a> ActionGraph<'a> {
    /// Commits all actions in commit order.
    ///
    /// With [`FailurePolicy::Abort`] the first failure ends the commit with
    /// [`CommitError::ActionFailed`]. With [`FailurePolicy::Collect`], or
    /// when the error callback asks to carry on, the failure is recorded and
    /// every action depending on the failed one is skipped.
    #[tracing::instrument(name = "commit", skip_all)]
    pub fn commit(
        &self,
        config: &StorageConfig,
        env: CommitEnvironment<'_>,
    ) -> Result<CommitReport, StrataError> {
        let CommitEnvironment {
            executor,
            mount_table,
            mut callbacks,
            cancel,
        } = env;
        let options = &config.commit;

        let mut report = CommitReport {
            entries: self
                .order()
                .iter()
                .map(|idx| {
                    let action = self.action(*idx);
                    ReportEntry {
                        action: action.clone(),
                        text: self.text(action, Tense::Future),
                        state: ActionState::Planned,
                    }
                })
                .collect(),
        };

        let mut ctx = CommitContext::new(self, config, executor, mount_table);
        let mut skipped: HashMap<NodeIndex, String> = HashMap::new();

        debug!("Committing {} action(s)", self.len());
        for (position, idx) in self.order().iter().enumerate() {
            if cancel.is_some_and(CancelSignal::is_cancelled) {
                let committed = report.committed();
                warn!("Commit cancelled after {committed} action(s)");
                return Err(StrataError::new(CancellationError::Requested {
                    committed,
                    remaining: self.len() - position,
                }));
            }

            let action = self.action(*idx);
            let text = report.entries[position].text.clone();

            if let Some(reason) = skipped.get(idx) {
                debug!("Skipping '{text}': {reason}");
                report.entries[position].state = ActionState::Skipped(reason.clone());
                continue;
            }

            if let Some(callbacks) = callbacks.as_deref_mut() {
                callbacks.begin(&text);
            }

            match action.commit(&mut ctx) {
                Ok(()) => {
                    let message = self.text(action, options.tense);
                    if options.verbose {
                        info!("{message}");
                    } else {
                        debug!("{message}");
                    }
                    if let Some(callbacks) = callbacks.as_deref_mut() {
                        callbacks.message(&message);
                    }
                    report.entries[position].state = ActionState::Committed;
                }
                Err(e) => {
                    let details = format!("{e:?}");
                    error!("Failed to {}: {e:#}", in_sentence(&text));

                    let carry_on = callbacks
                        .as_deref_mut()
                        .map(|callbacks| callbacks.error(&text, &details))
                        .unwrap_or(false);
                    if options.on_failure == FailurePolicy::Abort && !carry_on {
                        return Err(e).structured(CommitError::ActionFailed {
                            action: in_sentence(&text),
                        });
                    }

                    report.entries[position].state = ActionState::Failed(format!("{e:#}"));
                    for dependent in self.dependents(*idx) {
                        skipped
                            .entry(dependent)
                            .or_insert_with(|| format!("depends on failed '{text}'"));
                    }
                }
            }
        }

        debug!(
            "Commit finished: {} committed, {} failed, {} skipped",
            report.committed(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }
}

/// Runs `f` with a commit context for the two graphs, using default
/// configuration without device settling.
#[cfg(test)]
pub(crate) fn with_test_context<R>(
    lhs: &strata_api::devicegraph::DeviceGraph,
    rhs: &strata_api::devicegraph::DeviceGraph,
    executor: &dyn Executor,
    mount_table: &mut dyn MountTable,
    f: impl FnOnce(&mut CommitContext) -> R,
) -> R {
    let actiongraph = ActionGraph::new(lhs, rhs).unwrap();
    let mut config = StorageConfig::default();
    config.commit.settle = false;
    let mut ctx = CommitContext::new(&actiongraph, &config, executor, mount_table);
    f(&mut ctx)
}
