//! The orchestration API.
//!
//! A [`StacksService`] owns every object a caller has opened and refers to
//! them by integer handle. Each operation looks its handles up once, then
//! runs against shared snapshots; closing a handle cancels operations
//! still using it. Invalid handles are the only `Err` results. Everything
//! else is reported as diagnostics.

use super::apply::{apply_stack_changes, ApplyRequest};
use super::config::{ComponentInfo, DependencyLocks, SourceBundle, StackConfig};
use super::events::{ApplyEvent, PlanEvent};
use super::migrate::{migrate_stack_state, MigrateRequest};
use super::plan::{plan_stack_changes, PlanMode, PlanRequest};
use super::raw::PlanFragment;
use super::state::{PriorState, RawState};
use crate::addrs::{AbsResourceInstanceAddr, ComponentInstanceAddr, ProviderAddr, ResourceInstanceObjectAddr};
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::handles::{linked_token, Handle, HandleTable};
use crate::provider::ProviderFactory;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument};

/// An open source bundle.
pub type SourceBundleHandle = Handle<Arc<dyn SourceBundle>>;
/// An open stack configuration.
pub type ConfigHandle = Handle<StackConfig>;
/// An open raw state.
pub type StateHandle = Handle<RawState>;
/// An open plan: raw fragments in emission order.
pub type PlanHandle = Handle<Vec<Vec<u8>>>;
/// An open set of dependency locks.
pub type LocksHandle = Handle<DependencyLocks>;
/// An open provider cache.
pub type ProviderCacheHandle = Handle<Arc<dyn ProviderFactory>>;

/// Input to [`StacksService::plan_stack_changes`].
#[derive(Debug, Clone)]
pub struct PlanStackChangesRequest {
    /// Configuration to plan.
    pub config: ConfigHandle,
    /// State to plan against.
    pub state: StateHandle,
    /// Provider versions.
    pub locks: LocksHandle,
    /// Where providers come from.
    pub providers: ProviderCacheHandle,
    /// Input variable values.
    pub inputs: BTreeMap<String, Value>,
    /// Plan mode.
    pub mode: PlanMode,
}

/// Input to [`StacksService::apply_stack_changes`].
#[derive(Debug, Clone)]
pub struct ApplyStackChangesRequest {
    /// Configuration the plan was made from.
    pub config: ConfigHandle,
    /// The plan.
    pub plan: PlanHandle,
    /// Provider versions.
    pub locks: LocksHandle,
    /// Where providers come from.
    pub providers: ProviderCacheHandle,
    /// Input variable values, ephemeral ones included.
    pub inputs: BTreeMap<String, Value>,
}

/// Input to [`StacksService::migrate_stack_state`].
#[derive(Debug, Clone)]
pub struct MigrateStackStateRequest {
    /// State to migrate.
    pub state: StateHandle,
    /// Old resource instance address to new.
    pub resources: BTreeMap<AbsResourceInstanceAddr, AbsResourceInstanceAddr>,
    /// Old component instance to new.
    pub components: BTreeMap<ComponentInstanceAddr, ComponentInstanceAddr>,
}

/// The recorded identity of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// The object.
    pub addr: ResourceInstanceObjectAddr,
    /// Managing provider.
    pub provider: ProviderAddr,
    /// Identity schema version the identity was written with.
    pub identity_schema_version: u64,
    /// The identity.
    pub identity: serde_json::Value,
}

/// Owner of every handle a caller has open.
#[derive(Debug)]
pub struct StacksService {
    bundles: HandleTable<Arc<dyn SourceBundle>>,
    configs: HandleTable<StackConfig>,
    states: HandleTable<RawState>,
    plans: HandleTable<Vec<Vec<u8>>>,
    locks: HandleTable<DependencyLocks>,
    providers: HandleTable<Arc<dyn ProviderFactory>>,
    options: EngineOptions,
}

impl Default for StacksService {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl StacksService {
    /// A service with nothing open.
    pub fn new(options: EngineOptions) -> Self {
        Self {
            bundles: HandleTable::new("source bundle"),
            configs: HandleTable::new("stack configuration"),
            states: HandleTable::new("state"),
            plans: HandleTable::new("plan"),
            locks: HandleTable::new("dependency locks"),
            providers: HandleTable::new("provider cache"),
            options,
        }
    }

    /// The options operations run with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Open a source bundle.
    pub fn open_source_bundle(&self, bundle: Arc<dyn SourceBundle>) -> SourceBundleHandle {
        self.bundles.open(bundle)
    }

    /// Close a source bundle. Configurations loaded from it stay open.
    pub fn close_source_bundle(&self, handle: SourceBundleHandle) -> Result<(), EngineError> {
        self.bundles.close(handle).map(drop)
    }

    /// Load and open the configuration at `source` in `bundle`.
    #[instrument(skip(self), name = "stacks.open_config")]
    pub async fn open_stack_configuration(
        &self,
        bundle: SourceBundleHandle,
        source: &str,
    ) -> Result<(Option<ConfigHandle>, Diagnostics), EngineError> {
        let bundle: Arc<dyn SourceBundle> = (*self.bundles.get(bundle)?).clone();
        let (config, diags) = StackConfig::load(bundle.as_ref(), source).await;
        let handle = match config {
            Some(config) if !diags.has_errors() => Some(self.configs.open(config)),
            _ => None,
        };
        Ok((handle, diags))
    }

    /// Close a configuration, cancelling operations that use it.
    pub fn close_stack_configuration(&self, handle: ConfigHandle) -> Result<(), EngineError> {
        self.configs.close(handle).map(drop)
    }

    /// Check a configuration without starting any provider.
    pub fn validate_stack_configuration(&self, handle: ConfigHandle) -> Result<Diagnostics, EngineError> {
        Ok(self.configs.get(handle)?.validate())
    }

    /// Every component a configuration declares.
    pub fn find_stack_configuration_components(
        &self,
        handle: ConfigHandle,
    ) -> Result<Vec<ComponentInfo>, EngineError> {
        Ok(self.configs.get(handle)?.components_info())
    }

    /// Open a raw state map. Entries that fail to decode refuse the open.
    pub fn open_state(&self, raw: RawState) -> (Option<StateHandle>, Diagnostics) {
        let (_, diags) = PriorState::load(&raw);
        if diags.has_errors() {
            return (None, diags);
        }
        debug!(entries = raw.len(), "opening state");
        (Some(self.states.open(raw)), diags)
    }

    /// Close a state, cancelling operations that use it.
    pub fn close_state(&self, handle: StateHandle) -> Result<(), EngineError> {
        self.states.close(handle).map(drop)
    }

    /// Open a plan from its raw fragments in emission order.
    pub fn open_plan(&self, fragments: Vec<Vec<u8>>) -> (Option<PlanHandle>, Diagnostics) {
        let diags: Diagnostics = fragments
            .iter()
            .enumerate()
            .filter_map(|(i, bytes)| {
                PlanFragment::decode_fragment(bytes).err().map(|err| {
                    Diagnostic::error("Invalid plan").with_detail(format!("Fragment {}: {}", i, err.message()))
                })
            })
            .collect();
        if diags.has_errors() {
            return (None, diags);
        }
        (Some(self.plans.open(fragments)), diags)
    }

    /// Close a plan, cancelling applies that use it.
    pub fn close_plan(&self, handle: PlanHandle) -> Result<(), EngineError> {
        self.plans.close(handle).map(drop)
    }

    /// Parse and open a dependency lock document.
    pub fn open_dependency_locks(&self, source: &str) -> (Option<LocksHandle>, Diagnostics) {
        match DependencyLocks::parse(source) {
            Ok(locks) => (Some(self.locks.open(locks)), Diagnostics::new()),
            Err(err) => (
                None,
                Diagnostic::error("Invalid dependency locks")
                    .with_detail(err.message())
                    .into(),
            ),
        }
    }

    /// Open already parsed dependency locks.
    pub fn open_dependency_locks_value(&self, locks: DependencyLocks) -> LocksHandle {
        self.locks.open(locks)
    }

    /// Close dependency locks.
    pub fn close_dependency_locks(&self, handle: LocksHandle) -> Result<(), EngineError> {
        self.locks.close(handle).map(drop)
    }

    /// Open a provider cache.
    pub fn open_provider_cache(&self, factory: Arc<dyn ProviderFactory>) -> ProviderCacheHandle {
        self.providers.open(factory)
    }

    /// Close a provider cache, cancelling operations that use it.
    pub fn close_provider_cache(&self, handle: ProviderCacheHandle) -> Result<(), EngineError> {
        self.providers.close(handle).map(drop)
    }

    /// Start planning.
    pub fn plan_stack_changes(
        &self,
        request: PlanStackChangesRequest,
    ) -> Result<ReceiverStream<PlanEvent>, EngineError> {
        let cancel = linked_token(vec![
            self.configs.token(request.config)?,
            self.states.token(request.state)?,
            self.locks.token(request.locks)?,
            self.providers.token(request.providers)?,
        ]);
        let plan = PlanRequest {
            config: self.configs.get(request.config)?,
            prior_state: self.states.get(request.state)?,
            locks: self.locks.get(request.locks)?,
            providers: (*self.providers.get(request.providers)?).clone(),
            inputs: request.inputs,
            mode: request.mode,
            options: self.options.clone(),
        };
        info!(config = %request.config, state = %request.state, mode = ?request.mode, "planning");
        Ok(plan_stack_changes(plan, cancel))
    }

    /// Start applying an open plan.
    pub fn apply_stack_changes(
        &self,
        request: ApplyStackChangesRequest,
    ) -> Result<ReceiverStream<ApplyEvent>, EngineError> {
        let cancel = linked_token(vec![
            self.configs.token(request.config)?,
            self.plans.token(request.plan)?,
            self.locks.token(request.locks)?,
            self.providers.token(request.providers)?,
        ]);
        let apply = ApplyRequest {
            config: self.configs.get(request.config)?,
            plan: (*self.plans.get(request.plan)?).clone(),
            locks: self.locks.get(request.locks)?,
            providers: (*self.providers.get(request.providers)?).clone(),
            inputs: request.inputs,
            options: self.options.clone(),
        };
        info!(config = %request.config, plan = %request.plan, "applying");
        Ok(apply_stack_changes(apply, cancel))
    }

    /// Start migrating an open state.
    pub fn migrate_stack_state(
        &self,
        request: MigrateStackStateRequest,
    ) -> Result<ReceiverStream<ApplyEvent>, EngineError> {
        let cancel = linked_token(vec![self.states.token(request.state)?]);
        let migrate = MigrateRequest {
            state: self.states.get(request.state)?,
            resources: request.resources,
            components: request.components,
            options: self.options.clone(),
        };
        Ok(migrate_stack_state(migrate, cancel))
    }

    /// The identity recorded for every object in an open state that has one.
    pub fn list_resource_identities(
        &self,
        handle: StateHandle,
    ) -> Result<(Vec<ResourceIdentity>, Diagnostics), EngineError> {
        let raw = self.states.get(handle)?;
        let (prior, mut diags) = PriorState::load(&raw);
        let mut identities = Vec::new();
        for (addr, stored) in prior.resources {
            if stored.record.identity_json.is_empty() {
                continue;
            }
            match serde_json::from_slice(&stored.record.identity_json) {
                Ok(identity) => identities.push(ResourceIdentity {
                    addr,
                    provider: stored.provider,
                    identity_schema_version: stored.record.identity_schema_version,
                    identity,
                }),
                Err(err) => diags.push(
                    Diagnostic::error("Invalid resource identity")
                        .with_detail(format!("The identity stored for {} is not valid JSON: {}", addr, err)),
                ),
            }
        }
        Ok((identities, diags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::config::MemoryBundle;
    use crate::stacks::events::StackEvent;
    use crate::stacks::patch::StateFold;
    use crate::testing::{assert_no_errors, FakeProvider, FakeProviderFactory};
    use tokio_stream::StreamExt;
    use tokio_test::{assert_err, assert_ok};

    const STACK: &str = r#"{
        "providers": { "fake": { "source": "hemmer/fake" } },
        "components": {
            "web": {
                "resources": {
                    "fake_thing.a": { "provider": "fake", "config": { "name": "a" } }
                }
            }
        }
    }"#;

    const LOCKS: &str = r#"{ "providers": { "registry.hemmer.io/hemmer/fake": { "version": "1.0.0" } } }"#;

    async fn open_config(service: &StacksService) -> ConfigHandle {
        let bundle = service.open_source_bundle(Arc::new(MemoryBundle::new().with_source("stack.json", STACK)));
        let (config, diags) = assert_ok!(service.open_stack_configuration(bundle, "stack.json").await);
        assert_no_errors(&diags);
        assert_ok!(service.close_source_bundle(bundle));
        assert_ok!(config.ok_or("configuration did not open"))
    }

    #[tokio::test]
    async fn test_configuration_lifecycle() {
        let service = StacksService::default();
        let config = open_config(&service).await;

        assert!(assert_ok!(service.validate_stack_configuration(config)).is_empty());
        let components = assert_ok!(service.find_stack_configuration_components(config));
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "web");

        assert_ok!(service.close_stack_configuration(config));
        assert_err!(service.validate_stack_configuration(config));
        assert_err!(service.close_stack_configuration(config));
    }

    #[tokio::test]
    async fn test_bad_configuration_not_opened() {
        let service = StacksService::default();
        let bundle = service.open_source_bundle(Arc::new(
            MemoryBundle::new().with_source("bad.json", r#"{"components": {"web": {"depends_on": ["db"]}}}"#),
        ));
        let (config, diags) = assert_ok!(service.open_stack_configuration(bundle, "bad.json").await);
        assert!(config.is_none());
        assert!(diags.has_errors());
    }

    #[tokio::test]
    async fn test_plan_apply_and_list_identities() {
        let service = StacksService::default();
        let config = open_config(&service).await;
        let (state, diags) = service.open_state(RawState::new());
        assert_no_errors(&diags);
        let state = assert_ok!(state.ok_or("state did not open"));
        let (locks, diags) = service.open_dependency_locks(LOCKS);
        assert_no_errors(&diags);
        let locks = assert_ok!(locks.ok_or("locks did not open"));
        let fake = Arc::new(FakeProvider::new());
        let providers = service.open_provider_cache(Arc::new(FakeProviderFactory::new(fake.clone())));

        let mut stream = assert_ok!(service.plan_stack_changes(PlanStackChangesRequest {
            config,
            state,
            locks,
            providers,
            inputs: BTreeMap::new(),
            mode: PlanMode::Normal,
        }));
        let mut fragments = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                StackEvent::Change(change) => fragments.extend(change.raw),
                StackEvent::Diagnostic(diag) => assert!(!diag.is_error(), "{:?}", diag),
                StackEvent::Progress(_) => {},
            }
        }
        let (plan, diags) = service.open_plan(fragments);
        assert_no_errors(&diags);
        let plan = assert_ok!(plan.ok_or("plan did not open"));

        let mut stream = assert_ok!(service.apply_stack_changes(ApplyStackChangesRequest {
            config,
            plan,
            locks,
            providers,
            inputs: BTreeMap::new(),
        }));
        let mut fold = StateFold::new();
        while let Some(event) = stream.next().await {
            match event {
                StackEvent::Change(change) => {
                    fold.apply_raw(&change.raw);
                    fold.apply_descriptions(&change.descriptions);
                },
                StackEvent::Diagnostic(diag) => assert!(!diag.is_error(), "{:?}", diag),
                StackEvent::Progress(_) => {},
            }
        }
        assert_eq!(fake.objects("fake_thing").len(), 1);

        let (applied, diags) = service.open_state(fold.into_raw());
        assert_no_errors(&diags);
        let applied = assert_ok!(applied.ok_or("state did not open"));
        let (identities, diags) = assert_ok!(service.list_resource_identities(applied));
        assert_no_errors(&diags);
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].addr.to_string(), "component.web.fake_thing.a");
        assert!(identities[0].identity["id"].as_str().is_some_and(|id| id.starts_with("fake-")));
    }

    async fn drain_diagnostics<T>(mut stream: ReceiverStream<StackEvent<T>>) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let drained = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(event) = stream.next().await {
                if let StackEvent::Diagnostic(diag) = event {
                    diags.push(diag);
                }
            }
        })
        .await;
        assert!(drained.is_ok(), "stream did not end");
        diags
    }

    #[tokio::test]
    async fn test_closing_config_cancels_apply() {
        let service = StacksService::default();
        let config = open_config(&service).await;
        let (state, _) = service.open_state(RawState::new());
        let state = assert_ok!(state.ok_or("state did not open"));
        let locks = service.open_dependency_locks_value(DependencyLocks::parse(LOCKS).expect("locks"));
        let fake = Arc::new(FakeProvider::new());
        fake.block_apply_for("a");
        let providers = service.open_provider_cache(Arc::new(FakeProviderFactory::new(fake.clone())));

        let mut stream = assert_ok!(service.plan_stack_changes(PlanStackChangesRequest {
            config,
            state,
            locks,
            providers,
            inputs: BTreeMap::new(),
            mode: PlanMode::Normal,
        }));
        let mut fragments = Vec::new();
        while let Some(event) = stream.next().await {
            if let StackEvent::Change(change) = event {
                fragments.extend(change.raw);
            }
        }
        let (plan, _) = service.open_plan(fragments);
        let plan = assert_ok!(plan.ok_or("plan did not open"));

        let stream = assert_ok!(service.apply_stack_changes(ApplyStackChangesRequest {
            config,
            plan,
            locks,
            providers,
            inputs: BTreeMap::new(),
        }));
        fake.apply_blocked().await;
        assert_ok!(service.close_stack_configuration(config));

        let diags = drain_diagnostics(stream).await;
        assert!(
            diags.errors().any(|d| d.summary == EngineError::Cancelled.to_string()),
            "{:?}",
            diags
        );
        assert!(fake.objects("fake_thing").is_empty());
        // Only the configuration was closed.
        assert_ok!(service.close_plan(plan));
        assert_ok!(service.close_state(state));
    }

    #[tokio::test]
    async fn test_finished_operation_releases_watchers() {
        let service = StacksService::default();
        let (state, _) = service.open_state(RawState::new());
        let state = assert_ok!(state.ok_or("state did not open"));
        let metrics = tokio::runtime::Handle::current().metrics();

        for _ in 0..10 {
            let stream = assert_ok!(service.migrate_stack_state(MigrateStackStateRequest {
                state,
                resources: BTreeMap::new(),
                components: BTreeMap::new(),
            }));
            assert_no_errors(&drain_diagnostics(stream).await);
        }
        for _ in 0..100 {
            if metrics.num_alive_tasks() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(metrics.num_alive_tasks(), 0);
        // The handle outlives the operations that used it.
        assert_ok!(service.close_state(state));
    }

    #[tokio::test]
    async fn test_closed_handle_rejected() {
        let service = StacksService::default();
        let config = open_config(&service).await;
        let (state, _) = service.open_state(RawState::new());
        let state = assert_ok!(state.ok_or("state did not open"));
        let locks = service.open_dependency_locks_value(DependencyLocks::default());
        let providers = service.open_provider_cache(Arc::new(FakeProviderFactory::new(Arc::new(FakeProvider::new()))));
        assert_ok!(service.close_state(state));

        let err = assert_err!(service.plan_stack_changes(PlanStackChangesRequest {
            config,
            state,
            locks,
            providers,
            inputs: BTreeMap::new(),
            mode: PlanMode::Normal,
        }));
        assert!(matches!(err, EngineError::InvalidHandle { kind: "state", .. }));
    }

    #[test]
    fn test_corrupt_plan_not_opened() {
        let service = StacksService::default();
        let (plan, diags) = service.open_plan(vec![vec![0xff, 0xff, 0xff]]);
        assert!(plan.is_none());
        assert!(diags.has_errors());
    }

    #[tokio::test]
    async fn test_migrate_through_handle() {
        let service = StacksService::default();
        let (state, _) = service.open_state(RawState::new());
        let state = assert_ok!(state.ok_or("state did not open"));
        let mut stream = assert_ok!(service.migrate_stack_state(MigrateStackStateRequest {
            state,
            resources: BTreeMap::new(),
            components: BTreeMap::from([(
                ComponentInstanceAddr::new("web"),
                ComponentInstanceAddr::new("site"),
            )]),
        }));
        let mut errors = 0;
        while let Some(event) = stream.next().await {
            if event.as_diagnostic().is_some_and(Diagnostic::is_error) {
                errors += 1;
            }
        }
        // Nothing named web is stored.
        assert_eq!(errors, 1);
    }
}
