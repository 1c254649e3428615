//! Renaming objects in stored state.
//!
//! Migration never talks to a provider: it rewrites state keys so that
//! objects created under one address are managed under another. Resources
//! named explicitly move to their new address; everything left in a mapped
//! component instance follows the component. Every mapping is checked
//! before the first patch is sent, so a rejected migration changes nothing.

use super::describe::{AppliedDescription, Described};
use super::events::{AppliedChange, ApplyEvent, Emitter};
use super::patch::{DescriptionPatch, RawPatch};
use super::raw::StateComponentInstance;
use super::state::{encode_record, PriorState, RawState, StateKey};
use crate::addrs::{AbsResourceInstanceAddr, ComponentInstanceAddr, ResourceInstanceObjectAddr};
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything a state migration needs.
#[derive(Debug, Clone, Default)]
pub struct MigrateRequest {
    /// The state to migrate.
    pub state: Arc<RawState>,
    /// Old resource instance address to new.
    pub resources: BTreeMap<AbsResourceInstanceAddr, AbsResourceInstanceAddr>,
    /// Old component instance to new.
    pub components: BTreeMap<ComponentInstanceAddr, ComponentInstanceAddr>,
    /// Tuning.
    pub options: EngineOptions,
}

/// Start migrating. The stream carries the same changes an apply does.
///
/// `cancel` is cancelled when the operation ends, releasing anything linked
/// to it, so give each operation its own token.
pub fn migrate_stack_state(request: MigrateRequest, cancel: CancellationToken) -> ReceiverStream<ApplyEvent> {
    let (emitter, rx) = Emitter::channel(request.options.event_buffer);
    let span = info_span!(
        "stacks.migrate",
        resources = request.resources.len(),
        components = request.components.len()
    );
    tokio::spawn(
        async move {
            let done = emitter.clone();
            // Cancelled before the stream closes, so linked watchers are gone by then.
            let _release = cancel.clone().drop_guard();
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("migration cancelled");
                    done.send(EngineError::Cancelled).await;
                },
                _ = run_migrate(request, emitter) => {},
            }
        }
        .instrument(span),
    );
    ReceiverStream::new(rx)
}

/// Where every affected object and component record goes.
#[derive(Debug, Default)]
struct Moves {
    objects: Vec<(ResourceInstanceObjectAddr, ResourceInstanceObjectAddr)>,
    components: Vec<(ComponentInstanceAddr, ComponentInstanceAddr)>,
}

fn plan_moves(prior: &PriorState, request: &MigrateRequest) -> (Moves, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut moves = Moves::default();

    for source in request.resources.keys() {
        if !prior.resources.keys().any(|addr| &addr.instance == source) {
            diags.push(Diagnostic::error("Migration source not found").with_detail(format!(
                "State has no objects for {}.",
                source
            )));
        }
    }
    let instances = prior.component_instances();
    for source in request.components.keys() {
        if !instances.contains(source) {
            diags.push(Diagnostic::error("Migration source not found").with_detail(format!(
                "State has no component instance {}.",
                source
            )));
        }
    }

    for addr in prior.resources.keys() {
        let target = request.resources.get(&addr.instance).cloned().or_else(|| {
            request
                .components
                .get(&addr.instance.component)
                .map(|component| AbsResourceInstanceAddr {
                    component: component.clone(),
                    resource: addr.instance.resource.clone(),
                })
        });
        if let Some(target) = target.filter(|t| t != &addr.instance) {
            let new = ResourceInstanceObjectAddr {
                instance: target,
                deposed: addr.deposed.clone(),
            };
            moves.objects.push((addr.clone(), new));
        }
    }
    for (from, to) in &request.components {
        if from != to && prior.components.contains_key(from) {
            moves.components.push((from.clone(), to.clone()));
        }
    }

    // Renames apply in order, so no target may already hold an object, even
    // one that is itself moving.
    let mut taken = BTreeSet::new();
    for (old, new) in &moves.objects {
        if prior.resources.contains_key(new) || !taken.insert(new.clone()) {
            diags.push(Diagnostic::error("Migration target already occupied").with_detail(format!(
                "{} cannot move to {}: another object is already stored there.",
                old, new
            )));
        }
    }
    let mut taken = BTreeSet::new();
    for (old, new) in &moves.components {
        if prior.components.contains_key(new) || !taken.insert(new.clone()) {
            diags.push(Diagnostic::error("Migration target already occupied").with_detail(format!(
                "{} cannot move to {}: that component instance already exists.",
                old, new
            )));
        }
    }
    (moves, diags)
}

fn rename(raw: &RawState, old: StateKey, new: StateKey) -> AppliedChange {
    let old = old.to_string();
    let new = new.to_string();
    let mut patches = vec![RawPatch::delete(&old)];
    if let Some(bytes) = raw.get(&old) {
        patches.push(RawPatch::put(&new, bytes.clone()));
    }
    AppliedChange {
        raw: patches,
        descriptions: vec![DescriptionPatch::moved(old, new)],
    }
}

async fn run_migrate(request: MigrateRequest, emitter: Emitter<AppliedChange>) {
    let (prior, diags) = PriorState::load(&request.state);
    emitter.diagnostics(diags).await;
    if emitter.has_errors() {
        return;
    }
    let (moves, diags) = plan_moves(&prior, &request);
    let failed = diags.has_errors();
    emitter.diagnostics(diags).await;
    if failed {
        return;
    }

    // Final object list of every component instance the migration touches.
    let mut touched: BTreeSet<ComponentInstanceAddr> = BTreeSet::new();
    for (old, new) in &moves.objects {
        touched.insert(old.instance.component.clone());
        touched.insert(new.instance.component.clone());
    }
    for (old, new) in &moves.components {
        touched.insert(old.clone());
        touched.insert(new.clone());
    }
    let renamed: BTreeMap<&ResourceInstanceObjectAddr, &ResourceInstanceObjectAddr> =
        moves.objects.iter().map(|(old, new)| (old, new)).collect();
    let mut members: BTreeMap<ComponentInstanceAddr, Vec<ResourceInstanceObjectAddr>> = BTreeMap::new();
    for addr in prior.resources.keys() {
        let addr = renamed.get(addr).map_or(addr, |new| *new);
        members
            .entry(addr.instance.component.clone())
            .or_default()
            .push(addr.clone());
    }

    for (old, new) in &moves.objects {
        debug!(from = %old, to = %new, "moving object");
        let change = rename(
            &request.state,
            StateKey::Resource(old.clone()),
            StateKey::Resource(new.clone()),
        );
        emitter.change(change).await;
    }
    for (old, new) in &moves.components {
        debug!(from = %old, to = %new, "moving component instance");
        let change = rename(
            &request.state,
            StateKey::Component(old.clone()),
            StateKey::Component(new.clone()),
        );
        emitter.change(change).await;
    }

    let moved_away: BTreeSet<&ComponentInstanceAddr> = moves.components.iter().map(|(old, _)| old).collect();
    let moved_in: BTreeSet<&ComponentInstanceAddr> = moves.components.iter().map(|(_, new)| new).collect();
    for addr in touched {
        let mut resources = members.remove(&addr).unwrap_or_default();
        resources.sort();
        let recorded = (prior.components.contains_key(&addr) && !moved_away.contains(&addr))
            || moved_in.contains(&addr);
        if !recorded && resources.is_empty() {
            continue;
        }
        let key = StateKey::Component(addr.clone()).to_string();
        let mut raw = Vec::new();
        if !recorded {
            raw.push(RawPatch::put(&key, encode_record(&StateComponentInstance::default())));
        }
        let description = Described::new(AppliedDescription::ComponentInstance { addr, resources });
        match DescriptionPatch::put(&key, &description) {
            Ok(patch) => {
                emitter
                    .change(AppliedChange {
                        raw,
                        descriptions: vec![patch],
                    })
                    .await
            },
            Err(err) => emitter.send(err).await,
        }
    }
    info!(
        objects = moves.objects.len(),
        components = moves.components.len(),
        "state migrated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::events::StackEvent;
    use crate::stacks::patch::StateFold;
    use crate::testing::{assert_error_contains, assert_no_errors, parse_config, StackHarness};
    use serde_json::json;
    use tokio_stream::StreamExt;

    async fn applied_state() -> StateFold {
        let mut harness = StackHarness::new(parse_config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "config": { "name": "a" } },
                        "fake_thing.b": { "provider": "fake", "config": { "name": "b" } }
                    }
                }
            }
        })));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.state().clone()
    }

    async fn migrate(mut fold: StateFold, mut request: MigrateRequest) -> (StateFold, Diagnostics, usize) {
        request.state = Arc::new(fold.raw().clone());
        let mut stream = migrate_stack_state(request, CancellationToken::new());
        let mut diags = Diagnostics::new();
        let mut changes = 0;
        while let Some(event) = stream.next().await {
            match event {
                StackEvent::Change(change) => {
                    fold.apply_raw(&change.raw);
                    fold.apply_descriptions(&change.descriptions);
                    changes += 1;
                },
                StackEvent::Diagnostic(diag) => diags.push(diag),
                StackEvent::Progress(_) => {},
            }
        }
        (fold, diags, changes)
    }

    fn instance(addr: &str) -> AbsResourceInstanceAddr {
        addr.parse().unwrap()
    }

    fn keys(fold: &StateFold) -> Vec<&str> {
        fold.raw().keys().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_move_resource_to_new_component() {
        let (fold, diags, _) = migrate(applied_state().await, MigrateRequest {
            resources: BTreeMap::from([(
                instance("component.web.fake_thing.a"),
                instance("component.api.fake_thing.main"),
            )]),
            ..Default::default()
        })
        .await;
        assert_no_errors(&diags);
        assert_eq!(
            keys(&fold),
            vec![
                "CMPTcomponent.api",
                "CMPTcomponent.web",
                "RSRCcomponent.api.fake_thing.main",
                "RSRCcomponent.web.fake_thing.b",
            ]
        );
        assert!(fold.descriptions().contains_key("RSRCcomponent.api.fake_thing.main"));
        assert!(!fold.descriptions().contains_key("RSRCcomponent.web.fake_thing.a"));
    }

    #[tokio::test]
    async fn test_move_component() {
        let (fold, diags, _) = migrate(applied_state().await, MigrateRequest {
            components: BTreeMap::from([(ComponentInstanceAddr::new("web"), ComponentInstanceAddr::new("site"))]),
            ..Default::default()
        })
        .await;
        assert_no_errors(&diags);
        assert_eq!(
            keys(&fold),
            vec![
                "CMPTcomponent.site",
                "RSRCcomponent.site.fake_thing.a",
                "RSRCcomponent.site.fake_thing.b",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_source_changes_nothing() {
        let state = applied_state().await;
        let (fold, diags, changes) = migrate(state.clone(), MigrateRequest {
            resources: BTreeMap::from([(
                instance("component.web.fake_thing.missing"),
                instance("component.web.fake_thing.c"),
            )]),
            ..Default::default()
        })
        .await;
        assert_error_contains(&diags, "Migration source not found");
        assert_eq!(changes, 0);
        assert_eq!(fold.raw(), state.raw());
    }

    #[tokio::test]
    async fn test_occupied_target_rejected() {
        let (_, diags, changes) = migrate(applied_state().await, MigrateRequest {
            resources: BTreeMap::from([(
                instance("component.web.fake_thing.a"),
                instance("component.web.fake_thing.b"),
            )]),
            ..Default::default()
        })
        .await;
        assert_error_contains(&diags, "Migration target already occupied");
        assert_eq!(changes, 0);
    }

    #[tokio::test]
    async fn test_token_cancelled_when_stream_ends() {
        let cancel = CancellationToken::new();
        let mut stream = migrate_stack_state(MigrateRequest::default(), cancel.clone());
        while stream.next().await.is_some() {}
        assert!(cancel.is_cancelled());
    }
}
