//! The event envelope shared by plan, apply, and migrate streams.

use super::describe::{ChangeAction, PlannedDescription};
use super::patch::{DescriptionPatch, RawPatch};
use crate::addrs::{ComponentInstanceAddr, ProviderAddr, ResourceInstanceObjectAddr};
use crate::diagnostics::Diagnostic;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One event on a stack operation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent<C> {
    /// A change the caller must record.
    Change(C),
    /// Display-only progress.
    Progress(ProgressEvent),
    /// A diagnostic not tied to a change.
    Diagnostic(Diagnostic),
}

/// Events from a plan.
pub type PlanEvent = StackEvent<PlannedChange>;

/// Events from an apply or a state migration.
pub type ApplyEvent = StackEvent<AppliedChange>;

/// Part of a plan.
///
/// `raw` fragments must be kept in emission order across all events and
/// handed back verbatim to apply. `descriptions` are an unordered keyed set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedChange {
    /// Opaque plan fragments.
    pub raw: Vec<Vec<u8>>,
    /// Description puts.
    pub descriptions: Vec<DescriptionPatch>,
}

impl PlannedChange {
    /// Decode the typed descriptions this change carries.
    pub fn planned_descriptions(&self) -> Vec<PlannedDescription> {
        self.descriptions
            .iter()
            .filter_map(|patch| patch.described::<PlannedDescription>())
            .filter_map(|described| described.description)
            .collect()
    }
}

/// Part of an applied state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedChange {
    /// Patches to the raw state map, applied in order.
    pub raw: Vec<RawPatch>,
    /// Patches to the description map, applied in order.
    pub descriptions: Vec<DescriptionPatch>,
}

/// Lifecycle of a component instance during an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentInstanceStatus {
    /// Not started.
    Pending,
    /// Planning resources.
    Planning,
    /// Plan finished.
    Planned,
    /// Applying resources.
    Applying,
    /// Apply finished.
    Applied,
    /// Some resource failed.
    Errored,
    /// Postponed to a later round.
    Deferred,
}

/// Lifecycle of a resource instance object during an operation.
///
/// Objects move forward through `Pending`, `Refreshing`, `Refreshed`,
/// `Planning`, `Planned`, `Applying` and end `Applied` or `Errored`. A
/// deferred object ends `Deferred` without being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceInstanceStatus {
    /// Not started.
    Pending,
    /// Reading current state.
    Refreshing,
    /// Current state read.
    Refreshed,
    /// Computing the change.
    Planning,
    /// Change computed.
    Planned,
    /// Realizing the change.
    Applying,
    /// Change realized.
    Applied,
    /// Failed.
    Errored,
    /// Postponed to a later round.
    Deferred,
}

impl ResourceInstanceStatus {
    /// Whether no further status follows.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Errored | Self::Deferred)
    }
}

/// Counts of changes in one component instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Objects created, including replacements.
    pub add: usize,
    /// Objects updated in place.
    pub change: usize,
    /// Objects destroyed, including replacements.
    pub remove: usize,
    /// Objects imported.
    pub import: usize,
    /// Objects renamed.
    pub moved: usize,
    /// Objects forgotten.
    pub forget: usize,
    /// Changes deferred.
    pub deferred: usize,
}

impl ChangeSummary {
    /// Count one change.
    pub fn record(&mut self, action: ChangeAction) {
        match action {
            ChangeAction::Create => self.add += 1,
            ChangeAction::Update => self.change += 1,
            ChangeAction::Delete => self.remove += 1,
            ChangeAction::Forget => self.forget += 1,
            ChangeAction::DeleteThenCreate | ChangeAction::CreateThenDelete => {
                self.add += 1;
                self.remove += 1;
            },
            ChangeAction::NoOp | ChangeAction::Read => {},
        }
    }

    /// Whether nothing changes.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Which operation a summary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Planning.
    Plan,
    /// Applying.
    Apply,
}

/// Display-only progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A component instance changed status.
    ComponentInstanceStatus {
        /// The component instance.
        addr: ComponentInstanceAddr,
        /// New status.
        status: ComponentInstanceStatus,
    },
    /// A resource instance object changed status.
    ResourceInstanceStatus {
        /// The object.
        addr: ResourceInstanceObjectAddr,
        /// Managing provider.
        provider: ProviderAddr,
        /// New status.
        status: ResourceInstanceStatus,
    },
    /// A lifecycle action reported progress.
    ActionProgress {
        /// The resource the action runs around.
        addr: ResourceInstanceObjectAddr,
        /// The action type.
        action_type: String,
        /// Free text.
        message: String,
    },
    /// Change counts for a component instance.
    ChangeSummary {
        /// The component instance.
        addr: ComponentInstanceAddr,
        /// Plan or apply.
        phase: Phase,
        /// The counts.
        summary: ChangeSummary,
    },
}

impl<C> StackEvent<C> {
    /// A change event.
    pub fn change(change: C) -> Self {
        Self::Change(change)
    }

    /// The change, if this is one.
    pub fn as_change(&self) -> Option<&C> {
        match self {
            Self::Change(change) => Some(change),
            _ => None,
        }
    }

    /// The diagnostic, if this is one.
    pub fn as_diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::Diagnostic(diag) => Some(diag),
            _ => None,
        }
    }
}

impl<C> From<ProgressEvent> for StackEvent<C> {
    fn from(progress: ProgressEvent) -> Self {
        Self::Progress(progress)
    }
}

impl<C> From<Diagnostic> for StackEvent<C> {
    fn from(diag: Diagnostic) -> Self {
        Self::Diagnostic(diag)
    }
}

impl<C> From<EngineError> for StackEvent<C> {
    fn from(err: EngineError) -> Self {
        Self::Diagnostic(err.into())
    }
}

/// Sending half of an operation stream that remembers whether an error
/// diagnostic went out.
#[derive(Debug)]
pub(crate) struct Emitter<C> {
    tx: mpsc::Sender<StackEvent<C>>,
    errored: Arc<AtomicBool>,
}

impl<C> Clone for Emitter<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            errored: self.errored.clone(),
        }
    }
}

impl<C: Send + 'static> Emitter<C> {
    pub(crate) fn channel(buffer: usize) -> (Self, mpsc::Receiver<StackEvent<C>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                errored: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Send one event. A caller that dropped the stream is not an error.
    pub(crate) async fn send(&self, event: impl Into<StackEvent<C>>) {
        let event = event.into();
        if let StackEvent::Diagnostic(diag) = &event {
            if diag.is_error() {
                self.errored.store(true, Ordering::SeqCst);
            }
        }
        let _ = self.tx.send(event).await;
    }

    pub(crate) async fn diagnostics(&self, diags: impl IntoIterator<Item = Diagnostic>) {
        for diag in diags {
            self.send(diag).await;
        }
    }

    pub(crate) async fn change(&self, change: C) {
        self.send(StackEvent::Change(change)).await;
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_replace_twice() {
        let mut summary = ChangeSummary::default();
        assert!(summary.is_empty());
        summary.record(ChangeAction::CreateThenDelete);
        summary.record(ChangeAction::Update);
        summary.record(ChangeAction::NoOp);
        assert_eq!(summary.add, 1);
        assert_eq!(summary.remove, 1);
        assert_eq!(summary.change, 1);
    }

    #[test]
    fn test_status_order() {
        assert!(ResourceInstanceStatus::Pending < ResourceInstanceStatus::Refreshing);
        assert!(ResourceInstanceStatus::Planned < ResourceInstanceStatus::Applying);
        assert!(ResourceInstanceStatus::Errored.is_terminal());
        assert!(!ResourceInstanceStatus::Planned.is_terminal());
    }

    #[tokio::test]
    async fn test_emitter_tracks_errors() {
        let (emitter, mut rx) = Emitter::<AppliedChange>::channel(8);
        emitter.send(Diagnostic::warning("careful")).await;
        assert!(!emitter.has_errors());
        emitter.send(EngineError::Cancelled).await;
        assert!(emitter.has_errors());
        drop(emitter);

        let mut seen = 0;
        while let Some(event) = rx.recv().await {
            assert!(event.as_diagnostic().is_some());
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_progress_json() {
        let event = ProgressEvent::ComponentInstanceStatus {
            addr: ComponentInstanceAddr::new("web"),
            status: ComponentInstanceStatus::Planned,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "kind": "component_instance_status",
                "addr": "component.web",
                "status": "planned"
            })
        );
    }
}
