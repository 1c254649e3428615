//! Applying a plan.
//!
//! Apply replays the raw fragments of a plan in two passes. The first pass
//! walks component instances in plan order and realizes every create, update,
//! replace and read, dependencies first. The second pass walks them in
//! reverse and performs deletes and forgets, dependents first. Every state
//! change is streamed as soon as the provider has completed it, so a caller
//! that persists each event never records a change that did not happen.

use super::config::{evaluate, DependencyLocks, ResourceConfig, StackConfig};
use super::describe::{AppliedDescription, ChangeAction, Described, DescribedValue};
use super::events::{
    AppliedChange, ApplyEvent, ChangeSummary, ComponentInstanceStatus, Emitter, Phase, ProgressEvent,
    ResourceInstanceStatus,
};
use super::patch::{DescriptionPatch, RawPatch};
use super::plan::describe_whole;
use super::providers::{
    block_config, capabilities, strip_ephemeral, unpack, ConfiguredProvider, ProviderSet, ENGINE_VERSION,
};
use super::raw::{
    self, plan_fragment::Kind, PlanFragment, PlanMode, PlannedAction, PlannedComponentInstance,
    PlannedInputVariable, PlannedOutputValue, PlannedResourceInstance, StateComponentInstance, StateInputVariable,
    StateOutputValue, StateResourceInstanceObject,
};
use super::state::{encode_record, StateKey};
use crate::addrs::{ComponentInstanceAddr, DeposedKey, InstanceKey, ProviderAddr, ResourceInstanceObjectAddr, ResourceMode};
use crate::codec;
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::provider::{
    unknown_type, ApplyResourceChangeRequest, InvokeActionEvent, InvokeActionRequest, LinkedResourceInvokeData,
    Provider, ProviderFactory, ReadDataSourceRequest,
};
use crate::schema::{AttributeType, IdentitySchema, Schema};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything an apply needs.
#[derive(Clone)]
pub struct ApplyRequest {
    /// The stack configuration, as used to plan.
    pub config: Arc<StackConfig>,
    /// Raw plan fragments in emission order.
    pub plan: Vec<Vec<u8>>,
    /// Provider version locks.
    pub locks: Arc<DependencyLocks>,
    /// Where provider instances come from.
    pub providers: Arc<dyn ProviderFactory>,
    /// Input variable values. Ephemeral variables must be supplied again.
    pub inputs: BTreeMap<String, Value>,
    /// Tuning.
    pub options: EngineOptions,
}

/// Start applying. The stream ends when applying finishes or `cancel` fires.
///
/// Cancelling aborts in-flight provider calls. Changes already streamed
/// stay valid: each one describes work the provider has completed.
///
/// `cancel` is cancelled when the operation ends, releasing anything linked
/// to it, so give each operation its own token.
pub fn apply_stack_changes(request: ApplyRequest, cancel: CancellationToken) -> ReceiverStream<ApplyEvent> {
    let (emitter, rx) = Emitter::channel(request.options.event_buffer);
    let span = info_span!("stacks.apply", fragments = request.plan.len());
    tokio::spawn(
        async move {
            let done = emitter.clone();
            // Cancelled before the stream closes, so linked watchers are gone by then.
            let _release = cancel.clone().drop_guard();
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("apply cancelled");
                    done.send(EngineError::Cancelled).await;
                },
                _ = run_apply(request, emitter) => {},
            }
        }
        .instrument(span),
    );
    ReceiverStream::new(rx)
}

/// A plan split back into its parts.
#[derive(Debug, Default)]
struct DecodedPlan {
    mode: Option<PlanMode>,
    variables: Vec<PlannedInputVariable>,
    components: Vec<(ComponentInstanceAddr, PlannedComponentInstance)>,
    resources: BTreeMap<ComponentInstanceAddr, Vec<PlannedObject>>,
    outputs: Vec<PlannedOutputValue>,
}

#[derive(Debug, Clone)]
struct PlannedObject {
    addr: ResourceInstanceObjectAddr,
    action: ChangeAction,
    fragment: PlannedResourceInstance,
}

impl PlannedObject {
    fn resource_key(&self) -> String {
        self.addr.instance.resource.resource.to_string()
    }
}

fn decode_action(action: i32) -> Result<ChangeAction, EngineError> {
    raw::Action::try_from(action)
        .map(ChangeAction::from)
        .map_err(|_| EngineError::InvalidPlan(format!("unknown change action {}", action)))
}

fn decode_plan(fragments: &[Vec<u8>]) -> Result<DecodedPlan, EngineError> {
    let mut plan = DecodedPlan::default();
    let mut applyable = None;
    for (i, bytes) in fragments.iter().enumerate() {
        let kind = PlanFragment::decode_fragment(bytes)?;
        if applyable.is_some() {
            return Err(EngineError::InvalidPlan("fragments follow the applyability marker".to_string()));
        }
        match kind {
            Kind::Header(header) => {
                if i != 0 {
                    return Err(EngineError::InvalidPlan("plan header is not the first fragment".to_string()));
                }
                if header.engine_version != ENGINE_VERSION {
                    return Err(EngineError::InvalidPlan(format!(
                        "plan was created by engine version {}, this is {}",
                        header.engine_version, ENGINE_VERSION
                    )));
                }
                plan.mode = Some(PlanMode::try_from(header.mode).unwrap_or(PlanMode::Normal));
            },
            _ if plan.mode.is_none() => {
                return Err(EngineError::InvalidPlan("plan does not start with a header".to_string()));
            },
            Kind::InputVariable(variable) => plan.variables.push(variable),
            Kind::ResourceInstance(fragment) => {
                let addr: ResourceInstanceObjectAddr = fragment.addr.parse()?;
                let action = decode_action(fragment.action)?;
                plan.resources
                    .entry(addr.instance.component.clone())
                    .or_default()
                    .push(PlannedObject { addr, action, fragment });
            },
            Kind::ComponentInstance(component) => {
                let addr: ComponentInstanceAddr = component.addr.parse()?;
                plan.components.push((addr, component));
            },
            Kind::OutputValue(output) => plan.outputs.push(output),
            Kind::Applyable(marker) => applyable = Some(marker.applyable),
        }
    }
    match applyable {
        Some(true) => Ok(plan),
        Some(false) => Err(EngineError::InvalidPlan("the plan reported errors and cannot be applied".to_string())),
        None => Err(EngineError::InvalidPlan("the plan is incomplete".to_string())),
    }
}

struct ApplyContext {
    config: Arc<StackConfig>,
    vars: BTreeMap<String, Value>,
    providers: ProviderSet,
    options: EngineOptions,
    emitter: Emitter<AppliedChange>,
}

async fn run_apply(request: ApplyRequest, emitter: Emitter<AppliedChange>) {
    let ApplyRequest {
        config,
        plan,
        locks,
        providers: factory,
        inputs,
        options,
    } = request;

    let plan = match decode_plan(&plan) {
        Ok(plan) => plan,
        Err(err) => {
            emitter
                .send(Diagnostic::error("Invalid plan").with_detail(err.message()))
                .await;
            return;
        },
    };
    info!(mode = ?plan.mode, components = plan.components.len(), "applying stack changes");

    emitter.diagnostics(config.validate()).await;
    emitter.diagnostics(locks.check(&config)).await;
    if emitter.has_errors() {
        return;
    }

    let Some(vars) = apply_variables(&emitter, &config, &plan.variables, &inputs).await else {
        return;
    };

    let (providers, diags) = ProviderSet::start(&config, factory.as_ref(), &vars, &options).await;
    emitter.diagnostics(diags).await;

    let ctx = Arc::new(ApplyContext {
        config,
        vars,
        providers,
        options,
        emitter: emitter.clone(),
    });
    apply_components(&ctx, plan.components, plan.resources).await;
    apply_outputs(&ctx, &plan.outputs).await;

    let diags = ctx.providers.stop().await;
    emitter.diagnostics(diags).await;
    info!(errored = emitter.has_errors(), "apply finished");
}

fn value_json(value: &Value) -> Result<Vec<u8>, EngineError> {
    codec::encode_json(value, &AttributeType::Dynamic)
}

async fn emit_applied(
    emitter: &Emitter<AppliedChange>,
    raw: Vec<RawPatch>,
    descriptions: Vec<(String, Option<AppliedDescription>)>,
) {
    let mut patches = Vec::with_capacity(descriptions.len());
    for (key, description) in descriptions {
        match description {
            Some(description) => match DescriptionPatch::put(key, &Described::new(description)) {
                Ok(patch) => patches.push(patch),
                Err(err) => emitter.send(err).await,
            },
            None => patches.push(DescriptionPatch::delete(key)),
        }
    }
    emitter
        .change(AppliedChange {
            raw,
            descriptions: patches,
        })
        .await;
}

async fn apply_variables(
    emitter: &Emitter<AppliedChange>,
    config: &StackConfig,
    planned: &[PlannedInputVariable],
    inputs: &BTreeMap<String, Value>,
) -> Option<BTreeMap<String, Value>> {
    let mut diags = Diagnostics::new();
    for name in inputs.keys().filter(|name| !config.variables.contains_key(*name)) {
        diags.push(Diagnostic::error("Undeclared input variable").with_detail(format!(
            "A value was given for \"{}\", but the stack declares no such variable.",
            name
        )));
    }

    let mut vars = BTreeMap::new();
    let mut raw = Vec::new();
    let mut descriptions = Vec::new();
    for variable in planned {
        let name = &variable.name;
        let key = StateKey::Variable(name.clone()).to_string();
        let action = match decode_action(variable.action) {
            Ok(action) => action,
            Err(err) => {
                diags.push(err);
                continue;
            },
        };
        let declared = config.variables.get(name);
        if action == ChangeAction::Delete {
            raw.push(RawPatch::delete(&key));
            descriptions.push((key, None));
            // Destroying still evaluates provider configuration.
            if declared.is_some() {
                match unpack(&variable.value, &AttributeType::Dynamic) {
                    Ok(value) => {
                        vars.insert(name.clone(), value);
                    },
                    Err(err) => diags.push(err),
                }
            }
            continue;
        }
        let value = if variable.ephemeral {
            match (inputs.get(name), declared.and_then(|v| v.default.as_ref())) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => Value::from_json(default),
                (None, None) => {
                    diags.push(Diagnostic::error("No value for ephemeral input variable").with_detail(format!(
                        "The ephemeral input variable \"{}\" must be given again when applying.",
                        name
                    )));
                    continue;
                },
            }
        } else {
            let value = match unpack(&variable.value, &AttributeType::Dynamic) {
                Ok(value) => value,
                Err(err) => {
                    diags.push(err);
                    continue;
                },
            };
            if let Some(given) = inputs.get(name) {
                if given != &value {
                    diags.push(Diagnostic::error("Input variable changed since plan").with_detail(format!(
                        "The value given for \"{}\" differs from the one the plan was created with.",
                        name
                    )));
                    continue;
                }
            }
            value
        };
        if !variable.ephemeral && matches!(action, ChangeAction::Create | ChangeAction::Update) {
            match value_json(&value) {
                Ok(value_json) => {
                    raw.push(RawPatch::put(&key, encode_record(&StateInputVariable { value_json })));
                    let sensitive = declared.is_some_and(|v| v.sensitive);
                    descriptions.push((
                        key,
                        Some(AppliedDescription::InputVariable {
                            name: name.clone(),
                            value: describe_whole(&value, sensitive),
                        }),
                    ));
                },
                Err(err) => diags.push(Diagnostic::from(err).with_detail(format!("Input variable \"{}\".", name))),
            }
        }
        vars.insert(name.clone(), value);
    }

    let failed = diags.has_errors();
    emitter.diagnostics(diags).await;
    if failed {
        return None;
    }
    if !raw.is_empty() || !descriptions.is_empty() {
        emit_applied(emitter, raw, descriptions).await;
    }
    Some(vars)
}

/// Progress of one component instance across both passes.
#[derive(Debug, Default)]
struct ComponentProgress {
    summary: ChangeSummary,
    errored: bool,
    deferred: bool,
    alive: BTreeSet<ResourceInstanceObjectAddr>,
}

/// The result of applying one object.
#[derive(Debug)]
struct ObjectOutcome {
    addr: ResourceInstanceObjectAddr,
    resource_key: String,
    applied: Option<ChangeAction>,
    importing: bool,
    moved: bool,
    errored: bool,
    deferred: bool,
    alive: Vec<ResourceInstanceObjectAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Changes,
    Removals,
}

impl Pass {
    fn includes(self, action: ChangeAction) -> bool {
        match self {
            Self::Changes => !action.is_removal(),
            Self::Removals => action.is_removal(),
        }
    }
}

async fn apply_components(
    ctx: &Arc<ApplyContext>,
    components: Vec<(ComponentInstanceAddr, PlannedComponentInstance)>,
    mut resources: BTreeMap<ComponentInstanceAddr, Vec<PlannedObject>>,
) {
    // Instances with an unknown key exist only to carry deferred changes.
    let components: Vec<_> = components
        .into_iter()
        .filter(|(addr, _)| addr.key != InstanceKey::Wildcard)
        .collect();
    let mut progress: BTreeMap<ComponentInstanceAddr, ComponentProgress> = BTreeMap::new();

    for (addr, planned) in &components {
        ctx.emitter
            .send(ProgressEvent::ComponentInstanceStatus {
                addr: addr.clone(),
                status: ComponentInstanceStatus::Applying,
            })
            .await;
        let objects = resources.get(addr).cloned().unwrap_or_default();
        let upstream_failed = planned.depends_on.iter().find(|dep| {
            progress
                .iter()
                .any(|(other, p)| &other.component == *dep && p.errored)
        });
        let state = progress.entry(addr.clone()).or_default();
        match upstream_failed {
            Some(dep) => skip_all(ctx, addr, &objects, Pass::Changes, &format!("component.{}", dep), state).await,
            None => apply_pass(ctx, addr, &objects, Pass::Changes, state).await,
        }
    }

    for (addr, _) in components.iter().rev() {
        let objects = resources.remove(addr).unwrap_or_default();
        let downstream_failed = components
            .iter()
            .filter(|(_, other)| other.depends_on.contains(&addr.component))
            .find(|(other, _)| progress.get(other).is_some_and(|p| p.errored))
            .map(|(other, _)| other.to_string());
        let state = progress.entry(addr.clone()).or_default();
        match downstream_failed {
            Some(dep) => skip_all(ctx, addr, &objects, Pass::Removals, &dep, state).await,
            None => apply_pass(ctx, addr, &objects, Pass::Removals, state).await,
        }
    }

    // Objects under wildcard instances are all deferred; report them.
    for (addr, objects) in resources.into_iter().filter(|(addr, _)| addr.key == InstanceKey::Wildcard) {
        for object in objects {
            if let Ok(provider) = object.fragment.provider_addr.parse() {
                ctx.emitter
                    .send(ProgressEvent::ResourceInstanceStatus {
                        addr: object.addr,
                        provider,
                        status: ResourceInstanceStatus::Deferred,
                    })
                    .await;
            }
        }
        debug!(component = %addr, "instance set unknown, nothing applied");
    }

    for (addr, planned) in &components {
        let state = progress.remove(addr).unwrap_or_default();
        finish_component(ctx, addr, planned, state).await;
    }
}

async fn skip_all(
    ctx: &ApplyContext,
    addr: &ComponentInstanceAddr,
    objects: &[PlannedObject],
    pass: Pass,
    blocker: &str,
    state: &mut ComponentProgress,
) {
    for object in objects.iter().filter(|o| pass.includes(o.action)) {
        if object.action == ChangeAction::NoOp || !object.fragment.deferred_reason.is_empty() {
            if !object.fragment.prior.is_empty() {
                state.alive.insert(object.addr.clone());
            }
            continue;
        }
        ctx.emitter
            .send(Diagnostic::error("Change skipped").with_detail(format!(
                "{} was not changed because {} failed.",
                object.addr, blocker
            )))
            .await;
        state.errored = true;
        if !object.fragment.prior.is_empty() {
            state.alive.insert(object.addr.clone());
        }
    }
    debug!(component = %addr, ?pass, blocker, "skipped component changes");
}

/// Group objects into dependency levels: level 0 depends on nothing else in
/// the set.
fn levels(objects: &[PlannedObject]) -> Vec<Vec<PlannedObject>> {
    let keys: BTreeSet<String> = objects.iter().map(PlannedObject::resource_key).collect();
    let mut level: BTreeMap<String, usize> = keys.iter().map(|k| (k.clone(), 0)).collect();
    for _ in 0..objects.len() {
        let mut changed = false;
        for object in objects {
            let deepest = object
                .fragment
                .dependencies
                .iter()
                .filter(|dep| keys.contains(*dep) && **dep != object.resource_key())
                .filter_map(|dep| level.get(dep))
                .max()
                .map_or(0, |l| l + 1);
            let entry = level.entry(object.resource_key()).or_insert(0);
            if deepest > *entry {
                *entry = deepest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let mut waves: Vec<Vec<PlannedObject>> = Vec::new();
    for object in objects {
        let l = level.get(&object.resource_key()).copied().unwrap_or(0);
        if waves.len() <= l {
            waves.resize_with(l + 1, Vec::new);
        }
        waves[l].push(object.clone());
    }
    waves
}

async fn apply_pass(
    ctx: &Arc<ApplyContext>,
    addr: &ComponentInstanceAddr,
    objects: &[PlannedObject],
    pass: Pass,
    state: &mut ComponentProgress,
) {
    let selected: Vec<PlannedObject> = objects.iter().filter(|o| pass.includes(o.action)).cloned().collect();
    if selected.is_empty() {
        return;
    }
    let span = info_span!("component", component = %addr, ?pass);
    async move {
        let mut waves = levels(&selected);
        if pass == Pass::Removals {
            waves.reverse();
        }
        let semaphore = Arc::new(Semaphore::new(ctx.options.parallelism.max(1)));
        let mut failed: BTreeSet<String> = BTreeSet::new();
        for wave in waves {
            let mut set = JoinSet::new();
            for object in wave {
                let blocker = match pass {
                    Pass::Changes => object.fragment.dependencies.iter().find(|dep| failed.contains(*dep)).cloned(),
                    Pass::Removals => selected
                        .iter()
                        .filter(|other| other.fragment.dependencies.contains(&object.resource_key()))
                        .map(PlannedObject::resource_key)
                        .find(|key| failed.contains(key)),
                };
                if let Some(blocker) = blocker {
                    ctx.emitter
                        .send(Diagnostic::error("Change skipped").with_detail(format!(
                            "{} was not changed because {} failed.",
                            object.addr, blocker
                        )))
                        .await;
                    failed.insert(object.resource_key());
                    state.errored = true;
                    if !object.fragment.prior.is_empty() {
                        state.alive.insert(object.addr.clone());
                    }
                    continue;
                }
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    apply_object(&ctx, object).await
                });
            }

            let mut finished = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => finished.push(outcome),
                    Err(err) => {
                        ctx.emitter
                            .send(Diagnostic::error("Internal error while applying").with_detail(err.to_string()))
                            .await;
                        state.errored = true;
                    },
                }
            }
            finished.sort_by(|a, b| a.addr.cmp(&b.addr));
            for outcome in finished {
                if outcome.errored {
                    failed.insert(outcome.resource_key.clone());
                    state.errored = true;
                }
                if outcome.deferred {
                    state.deferred = true;
                    state.summary.deferred += 1;
                }
                if let Some(action) = outcome.applied {
                    state.summary.record(action);
                    if outcome.importing {
                        state.summary.import += 1;
                    }
                    if outcome.moved {
                        state.summary.moved += 1;
                    }
                }
                state.alive.extend(outcome.alive);
            }
        }
    }
    .instrument(span)
    .await
}

async fn finish_component(
    ctx: &ApplyContext,
    addr: &ComponentInstanceAddr,
    planned: &PlannedComponentInstance,
    state: ComponentProgress,
) {
    let key = StateKey::Component(addr.clone()).to_string();
    let removing = decode_action(planned.action).is_ok_and(ChangeAction::is_removal);
    if removing && state.alive.is_empty() {
        emit_applied(&ctx.emitter, vec![RawPatch::delete(&key)], vec![(key, None)]).await;
    } else {
        let record = StateComponentInstance {
            depends_on: planned.depends_on.clone(),
        };
        emit_applied(
            &ctx.emitter,
            vec![RawPatch::put(&key, encode_record(&record))],
            vec![(
                key,
                Some(AppliedDescription::ComponentInstance {
                    addr: addr.clone(),
                    resources: state.alive.into_iter().collect(),
                }),
            )],
        )
        .await;
    }

    ctx.emitter
        .send(ProgressEvent::ChangeSummary {
            addr: addr.clone(),
            phase: Phase::Apply,
            summary: state.summary,
        })
        .await;
    let status = if state.errored {
        ComponentInstanceStatus::Errored
    } else if state.deferred {
        ComponentInstanceStatus::Deferred
    } else {
        ComponentInstanceStatus::Applied
    };
    ctx.emitter
        .send(ProgressEvent::ComponentInstanceStatus {
            addr: addr.clone(),
            status,
        })
        .await;
}

async fn apply_outputs(ctx: &ApplyContext, outputs: &[PlannedOutputValue]) {
    let mut raw = Vec::new();
    let mut descriptions = Vec::new();
    for output in outputs {
        let key = StateKey::Output(output.name.clone()).to_string();
        let action = match decode_action(output.action) {
            Ok(action) => action,
            Err(err) => {
                ctx.emitter.send(err).await;
                continue;
            },
        };
        if action.is_removal() {
            raw.push(RawPatch::delete(&key));
            descriptions.push((key, None));
            continue;
        }
        // Outputs are evaluated again so values unknown at plan time resolve.
        let value = match ctx.config.outputs.get(&output.name) {
            Some(config) => evaluate(&config.value, &ctx.vars).map_err(Diagnostics::from),
            None => unpack(&output.value, &AttributeType::Dynamic).map_err(Diagnostics::from),
        };
        let value = match value {
            Ok(value) => value,
            Err(diags) => {
                ctx.emitter.diagnostics(diags).await;
                continue;
            },
        };
        match value_json(&value) {
            Ok(value_json) => {
                let record = StateOutputValue {
                    value_json,
                    sensitive: output.sensitive,
                };
                raw.push(RawPatch::put(&key, encode_record(&record)));
                descriptions.push((
                    key,
                    Some(AppliedDescription::OutputValue {
                        name: output.name.clone(),
                        value: describe_whole(&value, output.sensitive),
                    }),
                ));
            },
            Err(err) => {
                ctx.emitter
                    .send(Diagnostic::from(err).with_detail(format!("Output value \"{}\".", output.name)))
                    .await;
            },
        }
    }
    if !raw.is_empty() {
        emit_applied(&ctx.emitter, raw, descriptions).await;
    }
}

#[derive(Clone)]
struct Base {
    provider: Arc<ConfiguredProvider>,
    type_name: String,
    schema: Schema,
    identity: Option<IdentitySchema>,
}

/// Applies one planned object and streams its state changes.
struct ObjectApplier<'a> {
    ctx: &'a ApplyContext,
    object: PlannedObject,
    base: Option<Base>,
    /// Key the object was stored under before a rename, until first written.
    moved_from: Option<String>,
    errored: bool,
    alive: Vec<ResourceInstanceObjectAddr>,
}

async fn apply_object(ctx: &ApplyContext, object: PlannedObject) -> ObjectOutcome {
    let moved_from = (!object.fragment.moved_from.is_empty()).then(|| object.fragment.moved_from.clone());
    let mut applier = ObjectApplier {
        ctx,
        base: None,
        moved_from: None,
        errored: false,
        alive: Vec::new(),
        object,
    };
    let deferred = !applier.object.fragment.deferred_reason.is_empty();
    let applied = if deferred {
        debug!(addr = %applier.object.addr, reason = %applier.object.fragment.deferred_reason, "skipping deferred change");
        if !applier.object.fragment.prior.is_empty() {
            applier.alive.push(applier.object.addr.clone());
        }
        if let Ok(provider) = applier.object.fragment.provider_addr.parse() {
            ctx.emitter
                .send(ProgressEvent::ResourceInstanceStatus {
                    addr: applier.object.addr.clone(),
                    provider,
                    status: ResourceInstanceStatus::Deferred,
                })
                .await;
        }
        None
    } else {
        applier.moved_from = moved_from
            .map(|from| from.parse::<ResourceInstanceObjectAddr>().map(|a| StateKey::Resource(a).to_string()))
            .transpose()
            .unwrap_or_default();
        applier.run().await
    };
    ObjectOutcome {
        addr: applier.object.addr.clone(),
        resource_key: applier.object.resource_key(),
        importing: applier.object.fragment.importing,
        moved: !applier.object.fragment.moved_from.is_empty(),
        applied: applied.filter(|_| !applier.errored),
        errored: applier.errored,
        deferred,
        alive: applier.alive,
    }
}

/// Stored form of one object: value, private data and identity.
#[derive(Clone)]
struct Stored {
    value: Value,
    private: Vec<u8>,
    identity: Value,
}

impl<'a> ObjectApplier<'a> {
    async fn fail(&mut self, diag: Diagnostic) {
        self.errored = true;
        self.ctx.emitter.send(diag).await;
    }

    /// Forward diagnostics; true when any was an error.
    async fn absorb(&mut self, diags: Diagnostics) -> bool {
        let failed = diags.has_errors();
        if failed {
            warn!(addr = %self.object.addr, errors = diags.errors().count(), "provider reported errors");
            self.errored = true;
        }
        self.ctx.emitter.diagnostics(diags).await;
        failed
    }

    async fn status(&self, status: ResourceInstanceStatus) {
        if let Some(base) = &self.base {
            self.ctx
                .emitter
                .send(ProgressEvent::ResourceInstanceStatus {
                    addr: self.object.addr.clone(),
                    provider: base.provider.addr.clone(),
                    status,
                })
                .await;
        }
    }

    fn key(&self) -> String {
        StateKey::Resource(self.object.addr.clone()).to_string()
    }

    fn resource_config(&self) -> Option<&'a ResourceConfig> {
        let instance = &self.object.addr.instance;
        self.ctx
            .config
            .components
            .get(&instance.component.component)
            .and_then(|c| c.resources.get(&instance.resource.resource))
    }

    async fn resolve(&mut self) -> Result<Base, ()> {
        let fragment = &self.object.fragment;
        let provider_addr = match fragment.provider_addr.parse::<ProviderAddr>() {
            Ok(addr) => addr,
            Err(err) => {
                self.fail(Diagnostic::error("Invalid plan").with_detail(err.message())).await;
                return Err(());
            },
        };
        let Some(provider) = self
            .ctx
            .providers
            .for_stored(&provider_addr, &fragment.provider_config)
            .cloned()
        else {
            let detail = format!(
                "{} needs provider {}, which could not be started.",
                self.object.addr, provider_addr
            );
            self.fail(Diagnostic::error("Provider configuration not present").with_detail(detail)).await;
            return Err(());
        };
        let resource = &self.object.addr.instance.resource.resource;
        let type_name = resource.type_name.clone();
        let (schema, identity) = match resource.mode {
            ResourceMode::Managed => (
                provider.schema.resources.get(&type_name).cloned(),
                provider.schema.identities.get(&type_name).cloned(),
            ),
            ResourceMode::Data => (provider.schema.data_sources.get(&type_name).cloned(), None),
        };
        let Some(schema) = schema else {
            self.fail(unknown_type("resource", &type_name)).await;
            return Err(());
        };
        if schema.version != fragment.schema_version {
            let detail = format!(
                "{} was planned against schema version {} of {}, but the provider now reports version {}.",
                self.object.addr, fragment.schema_version, type_name, schema.version
            );
            self.fail(Diagnostic::error("Provider schema changed since plan").with_detail(detail)).await;
            return Err(());
        }
        if !provider.configured {
            let detail = format!("Provider {} could not be configured for apply.", provider.addr);
            self.fail(Diagnostic::error("Provider not configured").with_detail(detail)).await;
            return Err(());
        }
        let base = Base {
            provider,
            type_name,
            schema,
            identity,
        };
        self.base = Some(base.clone());
        Ok(base)
    }

    async fn run(&mut self) -> Option<ChangeAction> {
        let base = self.resolve().await.ok()?;
        let action = self.object.action;
        self.status(ResourceInstanceStatus::Applying).await;

        let done = match self.object.addr.instance.resource.resource.mode {
            ResourceMode::Managed => self.apply_managed(&base, action).await,
            ResourceMode::Data => self.apply_data(&base, action).await,
        };
        let status = if done.is_ok() && !self.errored {
            info!(addr = %self.object.addr, ?action, "applied");
            ResourceInstanceStatus::Applied
        } else {
            ResourceInstanceStatus::Errored
        };
        self.status(status).await;
        done.ok().map(|_| action)
    }

    fn decode_planned(&self, base: &Base) -> Result<(Stored, Stored), EngineError> {
        let fragment = &self.object.fragment;
        let ty = base.schema.block.implied_type();
        let identity_ty = base.identity.as_ref().map(IdentitySchema::implied_type);
        let identity = |bytes: &[u8]| match &identity_ty {
            Some(ty) => unpack(bytes, ty),
            None => Ok(Value::Null),
        };
        Ok((
            Stored {
                value: unpack(&fragment.prior, &ty)?,
                private: fragment.prior_private.clone(),
                identity: identity(&fragment.prior_identity)?,
            },
            Stored {
                value: unpack(&fragment.planned, &ty)?,
                private: fragment.planned_private.clone(),
                identity: identity(&fragment.planned_identity)?,
            },
        ))
    }

    async fn config_value(&mut self, base: &Base) -> Result<Value, ()> {
        let Some(config) = self.resource_config() else {
            let detail = format!("{} is no longer declared in configuration.", self.object.addr);
            self.fail(Diagnostic::error("Resource removed since plan").with_detail(detail)).await;
            return Err(());
        };
        match block_config(&config.config, &self.ctx.vars, &base.schema.block) {
            Ok(value) => Ok(value),
            Err(diag) => {
                self.fail(diag).await;
                Err(())
            },
        }
    }

    async fn apply_managed(&mut self, base: &Base, action: ChangeAction) -> Result<(), ()> {
        let (prior, planned) = match self.decode_planned(base) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.fail(Diagnostic::error("Invalid plan").with_detail(err.message())).await;
                return Err(());
            },
        };
        match action {
            ChangeAction::NoOp => {
                let identity = if planned.identity.is_null() {
                    prior.identity.clone()
                } else {
                    planned.identity.clone()
                };
                self.write(base, self.object.addr.clone(), Stored { identity, ..planned }, false)
                    .await
            },
            ChangeAction::Forget => {
                info!(addr = %self.object.addr, "forgetting object");
                self.remove(self.object.addr.clone()).await;
                Ok(())
            },
            ChangeAction::Delete => self.destroy(base, &prior, &planned.private).await,
            ChangeAction::Create | ChangeAction::Update => {
                let config = self.config_value(base).await?;
                self.run_actions(base, true, &prior.value, &planned, &config).await?;
                let new = self.change(base, &prior, &planned, &config).await?;
                self.write(base, self.object.addr.clone(), new.clone(), false).await?;
                self.run_actions(base, false, &prior.value, &new, &config).await
            },
            ChangeAction::DeleteThenCreate => {
                let config = self.config_value(base).await?;
                self.run_actions(base, true, &prior.value, &planned, &config).await?;
                self.destroy(base, &prior, &prior.private).await?;
                self.write_interim_gap(base).await;
                let none = Stored {
                    value: Value::Null,
                    private: Vec::new(),
                    identity: Value::Null,
                };
                let new = match self.change(base, &none, &planned, &config).await {
                    Ok(new) => new,
                    Err(()) => {
                        self.close_interim_gap().await;
                        return Err(());
                    },
                };
                self.write(base, self.object.addr.clone(), new.clone(), false).await?;
                self.run_actions(base, false, &prior.value, &new, &config).await
            },
            ChangeAction::CreateThenDelete => {
                let config = self.config_value(base).await?;
                self.run_actions(base, true, &prior.value, &planned, &config).await?;
                let none = Stored {
                    value: Value::Null,
                    private: Vec::new(),
                    identity: Value::Null,
                };
                let new = self.change(base, &none, &planned, &config).await?;

                let deposed =
                    ResourceInstanceObjectAddr::deposed(self.object.addr.instance.clone(), DeposedKey::generate());
                debug!(addr = %self.object.addr, deposed = %deposed, "deposing replaced object");
                self.write(base, self.object.addr.clone(), new.clone(), true).await?;
                self.write(
                    base,
                    deposed.clone(),
                    Stored {
                        value: prior.value.clone(),
                        private: prior.private.clone(),
                        identity: prior.identity.clone(),
                    },
                    false,
                )
                .await?;

                let destroyed = self.destroy_at(base, &deposed, &prior, &prior.private).await;
                self.write(base, self.object.addr.clone(), new.clone(), false).await?;
                destroyed?;
                self.run_actions(base, false, &prior.value, &new, &config).await
            },
            ChangeAction::Read => {
                self.fail(Diagnostic::error("Invalid plan").with_detail(format!(
                    "{} is a managed resource but was planned as a read.",
                    self.object.addr
                )))
                .await;
                Err(())
            },
        }
    }

    async fn apply_data(&mut self, base: &Base, action: ChangeAction) -> Result<(), ()> {
        let ty = base.schema.block.implied_type();
        match action {
            ChangeAction::Forget | ChangeAction::Delete => {
                self.remove(self.object.addr.clone()).await;
                Ok(())
            },
            ChangeAction::Read => {
                let config = self.config_value(base).await?;
                if !config.is_wholly_known() {
                    let detail = format!("The configuration of {} is still unknown.", self.object.addr);
                    self.fail(Diagnostic::error("Data source configuration unknown").with_detail(detail))
                        .await;
                    return Err(());
                }
                let resp = base
                    .provider
                    .session
                    .read_data_source(ReadDataSourceRequest {
                        type_name: base.type_name.clone(),
                        config,
                        client_capabilities: capabilities(&self.ctx.options),
                    })
                    .await;
                if self.absorb(resp.diagnostics).await {
                    return Err(());
                }
                if resp.deferred.is_some() {
                    let detail = format!("{} could not be read during apply.", self.object.addr);
                    self.fail(Diagnostic::error("Data source deferred during apply").with_detail(detail))
                        .await;
                    return Err(());
                }
                self.write_data(base, resp.state).await
            },
            _ => match unpack(&self.object.fragment.planned, &ty) {
                Ok(value) => self.write_data(base, value).await,
                Err(err) => {
                    self.fail(Diagnostic::error("Invalid plan").with_detail(err.message())).await;
                    Err(())
                },
            },
        }
    }

    async fn write_data(&mut self, base: &Base, value: Value) -> Result<(), ()> {
        let stored = Stored {
            value,
            private: Vec::new(),
            identity: Value::Null,
        };
        self.write(base, self.object.addr.clone(), stored, false).await
    }

    /// Ask the provider to realize `planned` from `prior`.
    async fn change(&mut self, base: &Base, prior: &Stored, planned: &Stored, config: &Value) -> Result<Stored, ()> {
        let resp = base
            .provider
            .session
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: base.type_name.clone(),
                prior_state: prior.value.clone(),
                planned_state: planned.value.clone(),
                config: config.clone(),
                planned_private: planned.private.clone(),
                planned_identity: planned.identity.clone(),
            })
            .await;
        let new = Stored {
            value: resp.new_state,
            private: resp.private,
            identity: if resp.new_identity.is_null() {
                planned.identity.clone()
            } else {
                resp.new_identity
            },
        };
        if self.absorb(resp.diagnostics).await {
            // A partially created object is still real and must be recorded.
            if !new.value.is_null() && new.value.is_wholly_known() {
                let _ = self.write(base, self.object.addr.clone(), new, false).await;
            } else if !prior.value.is_null() {
                self.alive.push(self.object.addr.clone());
            }
            return Err(());
        }
        if !new.value.is_wholly_known() {
            let detail = format!(
                "Provider {} left values unknown in the new state of {}.",
                base.provider.addr, self.object.addr
            );
            self.fail(Diagnostic::error("Provider produced invalid object").with_detail(detail)).await;
            return Err(());
        }
        Ok(new)
    }

    async fn destroy(&mut self, base: &Base, prior: &Stored, private: &[u8]) -> Result<(), ()> {
        let addr = self.object.addr.clone();
        self.destroy_at(base, &addr, prior, private).await
    }

    async fn destroy_at(
        &mut self,
        base: &Base,
        addr: &ResourceInstanceObjectAddr,
        prior: &Stored,
        private: &[u8],
    ) -> Result<(), ()> {
        if prior.value.is_null() {
            self.remove(addr.clone()).await;
            return Ok(());
        }
        let resp = base
            .provider
            .session
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: base.type_name.clone(),
                prior_state: prior.value.clone(),
                planned_state: Value::Null,
                config: Value::Null,
                planned_private: private.to_vec(),
                planned_identity: prior.identity.clone(),
            })
            .await;
        if self.absorb(resp.diagnostics).await {
            self.alive.push(addr.clone());
            return Err(());
        }
        self.remove(addr.clone()).await;
        Ok(())
    }

    /// Record that the current object is gone until the replacement exists.
    async fn write_interim_gap(&mut self, base: &Base) {
        let description = AppliedDescription::ResourceInstance {
            addr: self.object.addr.clone(),
            provider: base.provider.addr.clone(),
            schema_version: base.schema.version,
            value: DescribedValue::default(),
            interim: true,
        };
        emit_applied(&self.ctx.emitter, Vec::new(), vec![(self.key(), Some(description))]).await;
    }

    /// The replacement was never created: drop the interim description so
    /// it agrees with the raw state, which no longer holds the object.
    async fn close_interim_gap(&mut self) {
        if self.alive.contains(&self.object.addr) {
            return;
        }
        debug!(addr = %self.object.addr, "replacement failed, object is gone");
        emit_applied(&self.ctx.emitter, Vec::new(), vec![(self.key(), None)]).await;
    }

    fn take_moved(&mut self) -> (Vec<RawPatch>, Vec<DescriptionPatch>) {
        match self.moved_from.take() {
            Some(old) => (
                vec![RawPatch::delete(&old)],
                vec![DescriptionPatch::moved(&old, self.key())],
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Write an object's state, or remove it when the value is null.
    async fn write(
        &mut self,
        base: &Base,
        addr: ResourceInstanceObjectAddr,
        stored: Stored,
        interim: bool,
    ) -> Result<(), ()> {
        if stored.value.is_null() {
            self.remove(addr).await;
            return Ok(());
        }
        let value = strip_ephemeral(&base.schema.block, &stored.value);
        let record = match self.record(base, &value, stored.private, &stored.identity) {
            Ok(record) => record,
            Err(err) => {
                let detail = format!("{}: {}", addr, err.message());
                self.fail(Diagnostic::error("Failed to record object state").with_detail(detail)).await;
                return Err(());
            },
        };
        let key = StateKey::Resource(addr.clone()).to_string();
        let (mut raw, moved) = if addr.deposed.is_none() {
            self.take_moved()
        } else {
            (Vec::new(), Vec::new())
        };
        raw.push(RawPatch::put(&key, encode_record(&record)));
        let description = AppliedDescription::ResourceInstance {
            addr: addr.clone(),
            provider: base.provider.addr.clone(),
            schema_version: base.schema.version,
            value: DescribedValue::new(&value, base.schema.block.sensitive_paths(&value)),
            interim,
        };
        let mut patches = moved;
        match DescriptionPatch::put(&key, &Described::new(description)) {
            Ok(patch) => patches.push(patch),
            Err(err) => self.ctx.emitter.send(err).await,
        }
        self.ctx.emitter.change(AppliedChange { raw, descriptions: patches }).await;
        if !interim && !self.alive.contains(&addr) {
            self.alive.push(addr);
        }
        Ok(())
    }

    async fn remove(&mut self, addr: ResourceInstanceObjectAddr) {
        let key = StateKey::Resource(addr.clone()).to_string();
        let (mut raw, mut descriptions) = if addr.deposed.is_none() {
            self.take_moved()
        } else {
            (Vec::new(), Vec::new())
        };
        raw.push(RawPatch::delete(&key));
        descriptions.push(DescriptionPatch::delete(&key));
        self.alive.retain(|a| a != &addr);
        self.ctx.emitter.change(AppliedChange { raw, descriptions }).await;
    }

    fn record(
        &self,
        base: &Base,
        value: &Value,
        private: Vec<u8>,
        identity: &Value,
    ) -> Result<StateResourceInstanceObject, EngineError> {
        let fragment = &self.object.fragment;
        let identity_json = match (&base.identity, identity.is_null()) {
            (Some(schema), false) => codec::encode_json(identity, &schema.implied_type())?,
            _ => Vec::new(),
        };
        Ok(StateResourceInstanceObject {
            provider_addr: base.provider.addr.to_string(),
            schema_version: base.schema.version,
            value_json: codec::encode_json(value, &base.schema.block.implied_type())?,
            private,
            identity_json,
            identity_schema_version: base.identity.as_ref().map_or(0, |i| i.version),
            dependencies: fragment.dependencies.clone(),
            create_before_destroy: fragment.create_before_destroy,
            provider_config: base.provider.name.clone(),
        })
    }

    /// Invoke the lifecycle actions planned to run `before` (or after) the
    /// change, forwarding their progress.
    async fn run_actions(
        &mut self,
        base: &Base,
        before: bool,
        prior: &Value,
        planned: &Stored,
        config: &Value,
    ) -> Result<(), ()> {
        let actions: Vec<PlannedAction> = self
            .object
            .fragment
            .actions
            .iter()
            .filter(|a| a.before == before)
            .cloned()
            .collect();
        for action in actions {
            self.invoke(base, &action, prior, planned, config).await?;
        }
        Ok(())
    }

    async fn invoke(
        &mut self,
        base: &Base,
        action: &PlannedAction,
        prior: &Value,
        planned: &Stored,
        config: &Value,
    ) -> Result<(), ()> {
        let trigger = self
            .resource_config()
            .and_then(|c| c.actions.iter().find(|t| t.action_type == action.action_type));
        let schema = base.provider.schema.actions.get(&action.action_type);
        let (Some(trigger), Some(schema)) = (trigger, schema) else {
            let detail = format!(
                "Action \"{}\" planned for {} is no longer available.",
                action.action_type, self.object.addr
            );
            self.fail(Diagnostic::error("Action removed since plan").with_detail(detail)).await;
            return Err(());
        };
        let action_config = match block_config(&trigger.config, &self.ctx.vars, &schema.schema.block) {
            Ok(value) => value,
            Err(diag) => {
                self.fail(diag).await;
                return Err(());
            },
        };
        let linked_resources = if action.linked {
            vec![LinkedResourceInvokeData {
                prior_state: prior.clone(),
                planned_state: planned.value.clone(),
                config: config.clone(),
                planned_identity: planned.identity.clone(),
            }]
        } else {
            Vec::new()
        };
        debug!(addr = %self.object.addr, action = %action.action_type, before = action.before, "invoking action");
        let resp = base
            .provider
            .session
            .invoke_action(InvokeActionRequest {
                action_type: action.action_type.clone(),
                linked_resources,
                config: action_config,
            })
            .await;
        if self.absorb(resp.diagnostics).await {
            return Err(());
        }
        let Some(mut events) = resp.events else {
            return Ok(());
        };
        while let Some(event) = events.recv().await {
            match event {
                InvokeActionEvent::Progress { message } => {
                    self.ctx
                        .emitter
                        .send(ProgressEvent::ActionProgress {
                            addr: self.object.addr.clone(),
                            action_type: action.action_type.clone(),
                            message,
                        })
                        .await;
                },
                InvokeActionEvent::Completed { diagnostics, .. } => {
                    return if self.absorb(diagnostics).await { Err(()) } else { Ok(()) };
                },
            }
        }
        let detail = format!(
            "Action \"{}\" for {} ended without reporting completion.",
            action.action_type, self.object.addr
        );
        self.fail(Diagnostic::error("Action did not complete").with_detail(detail)).await;
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::plan::PlanMode;
    use crate::testing::{assert_error_contains, assert_no_errors, parse_config, StackHarness};
    use serde_json::json;

    fn two_things(cbd: bool, size: i64) -> StackConfig {
        parse_config(json!({
            "variables": { "prefix": { "default": "app" } },
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": {
                            "provider": "fake",
                            "config": { "name": "a", "size": size },
                            "create_before_destroy": cbd
                        },
                        "fake_thing.b": {
                            "provider": "fake",
                            "config": { "name": "b" },
                            "depends_on": ["fake_thing.a"]
                        }
                    }
                }
            },
            "outputs": { "prefix": { "value": { "$var": "prefix" } } }
        }))
    }

    fn resource_keys(harness: &StackHarness) -> Vec<String> {
        harness
            .state()
            .raw()
            .keys()
            .filter(|k| k.starts_with("RSRC"))
            .cloned()
            .collect()
    }

    fn applied_descriptions(changes: &[AppliedChange]) -> Vec<AppliedDescription> {
        changes
            .iter()
            .flat_map(|c| c.descriptions.iter())
            .filter_map(|patch| patch.described::<AppliedDescription>())
            .filter_map(|described| described.description)
            .collect()
    }

    #[tokio::test]
    async fn test_create_then_noop() {
        let mut harness = StackHarness::new(two_things(false, 1));
        let run = harness.converge().await;
        assert_no_errors(&run.diagnostics);
        assert_eq!(harness.fake.objects("fake_thing").len(), 2);
        assert_eq!(
            resource_keys(&harness),
            vec!["RSRCcomponent.web.fake_thing.a", "RSRCcomponent.web.fake_thing.b"]
        );
        let raw = harness.state().raw();
        assert!(raw.contains_key("CMPTcomponent.web"));
        assert!(raw.contains_key("OTPTprefix"));
        assert!(raw.contains_key("VRBLprefix"));

        let summary = run.progress.iter().find_map(|p| match p {
            ProgressEvent::ChangeSummary { summary, .. } => Some(*summary),
            _ => None,
        });
        assert_eq!(summary.map(|s| s.add), Some(2));

        let applies = harness.fake.calls("apply_resource_change");
        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        assert!(plan.resources().iter().all(|r| r.action == ChangeAction::NoOp));
        let run = harness.apply(&plan).await;
        assert_no_errors(&run.diagnostics);
        assert_eq!(harness.fake.calls("apply_resource_change"), applies);
        assert_eq!(resource_keys(&harness).len(), 2);
    }

    #[tokio::test]
    async fn test_replace_delete_first() {
        let mut harness = StackHarness::new(two_things(false, 1));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.set_config(two_things(false, 2));

        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").map(|r| r.action);
        assert_eq!(change, Some(ChangeAction::DeleteThenCreate));

        let run = harness.apply(&plan).await;
        assert_no_errors(&run.diagnostics);
        let things = harness.fake.objects("fake_thing");
        assert_eq!(things.len(), 2);
        assert!(things.values().any(|v| v.get_attr("size") == Some(&Value::int(2))));
        assert!(applied_descriptions(&run.changes)
            .iter()
            .any(|d| matches!(d, AppliedDescription::ResourceInstance { interim: true, .. })));
    }

    #[tokio::test]
    async fn test_replace_create_first_clears_deposed() {
        let mut harness = StackHarness::new(two_things(true, 1));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.set_config(two_things(true, 2));

        let plan = harness.plan(PlanMode::Normal).await;
        let change = plan.resource("component.web.fake_thing.a").map(|r| r.action);
        assert_eq!(change, Some(ChangeAction::CreateThenDelete));

        let run = harness.apply(&plan).await;
        assert_no_errors(&run.diagnostics);
        // The old object was deposed, then destroyed.
        let deposed_puts = run
            .changes
            .iter()
            .flat_map(|c| c.raw.iter())
            .filter(|p| p.key.contains('/') && p.value.is_some())
            .count();
        assert_eq!(deposed_puts, 1);
        assert_eq!(resource_keys(&harness).len(), 2);
        assert_eq!(harness.fake.objects("fake_thing").len(), 2);
    }

    #[tokio::test]
    async fn test_orphan_deleted() {
        let mut harness = StackHarness::new(two_things(false, 1));
        assert_no_errors(&harness.converge().await.diagnostics);

        harness.set_config(parse_config(json!({
            "variables": { "prefix": { "default": "app" } },
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "config": { "name": "a", "size": 1 } }
                    }
                }
            }
        })));
        let run = harness.converge().await;
        assert_no_errors(&run.diagnostics);
        assert_eq!(resource_keys(&harness), vec!["RSRCcomponent.web.fake_thing.a"]);
        assert_eq!(harness.fake.objects("fake_thing").len(), 1);
        assert!(!harness.state().raw().contains_key("OTPTprefix"));
    }

    #[tokio::test]
    async fn test_destroy_empties_state() {
        let mut harness = StackHarness::new(two_things(false, 1));
        assert_no_errors(&harness.converge().await.diagnostics);

        let plan = harness.plan(PlanMode::Destroy).await;
        assert_no_errors(&plan.diagnostics);
        let run = harness.apply(&plan).await;
        assert_no_errors(&run.diagnostics);
        assert!(harness.fake.objects("fake_thing").is_empty());
        assert!(harness.state().raw().is_empty(), "{:?}", harness.state().raw().keys());
        assert!(harness.state().descriptions().is_empty());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let mut harness = StackHarness::new(two_things(false, 1));
        harness.fake.fail_apply_for("a");
        let plan = harness.plan(PlanMode::Normal).await;
        let run = harness.apply(&plan).await;

        assert_error_contains(&run.diagnostics, "Simulated apply failure");
        assert_error_contains(&run.diagnostics, "Change skipped");
        assert!(harness.fake.objects("fake_thing").is_empty());
        assert!(resource_keys(&harness).is_empty());
        assert!(run.progress.iter().any(|p| matches!(
            p,
            ProgressEvent::ComponentInstanceStatus {
                status: ComponentInstanceStatus::Errored,
                ..
            }
        )));
    }

    fn single_thing(name: &str, size: i64) -> StackConfig {
        parse_config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "config": { "name": name, "size": size } }
                    }
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_failed_replacement_leaves_consistent_state() {
        let mut harness = StackHarness::new(single_thing("a", 1));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.set_config(single_thing("a2", 2));
        harness.fake.fail_apply_for("a2");

        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").map(|r| r.action);
        assert_eq!(change, Some(ChangeAction::DeleteThenCreate));

        let run = harness.apply(&plan).await;
        assert_error_contains(&run.diagnostics, "Simulated apply failure");
        assert!(harness.fake.objects("fake_thing").is_empty());
        let key = "RSRCcomponent.web.fake_thing.a";
        assert!(!harness.state().raw().contains_key(key));
        assert!(!harness.state().descriptions().contains_key(key));
    }

    #[tokio::test]
    async fn test_failure_spares_independent_objects() {
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
        harness.fake.fail_apply_for("a");
        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let run = harness.apply(&plan).await;

        assert_error_contains(&run.diagnostics, "Simulated apply failure");
        assert!(!run.diagnostics.errors().any(|d| d.summary.contains("Change skipped")));
        assert_eq!(resource_keys(&harness), vec!["RSRCcomponent.web.fake_thing.b"]);
        assert!(harness.state().descriptions().contains_key("RSRCcomponent.web.fake_thing.b"));
        let things = harness.fake.objects("fake_thing");
        assert_eq!(things.len(), 1);
        assert!(things.values().all(|v| v.get_attr("name") == Some(&Value::string("b"))));
        assert!(run.progress.iter().any(|p| matches!(
            p,
            ProgressEvent::ResourceInstanceStatus {
                addr,
                status: ResourceInstanceStatus::Applied,
                ..
            } if addr.to_string() == "component.web.fake_thing.b"
        )));
    }

    #[tokio::test]
    async fn test_lifecycle_action_reports_progress() {
        let mut harness = StackHarness::new(parse_config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": {
                            "provider": "fake",
                            "config": { "name": "a" },
                            "actions": [
                                { "action_type": "fake_notify", "when": "after", "config": { "message": "hi" } }
                            ]
                        }
                    }
                }
            }
        })));
        let run = harness.converge().await;
        assert_no_errors(&run.diagnostics);
        assert_eq!(harness.fake.calls("invoke_action"), 1);
        let messages: Vec<_> = run
            .progress
            .iter()
            .filter_map(|p| match p {
                ProgressEvent::ActionProgress { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["fake_notify: hi"]);
    }

    #[tokio::test]
    async fn test_incomplete_plan_rejected() {
        let mut harness = StackHarness::new(two_things(false, 1));
        let mut plan = harness.plan(PlanMode::Normal).await;
        plan.fragments.pop();
        let run = harness.apply(&plan).await;
        assert_error_contains(&run.diagnostics, "Invalid plan");
        assert!(run.changes.is_empty());
        assert_eq!(harness.fake.calls("apply_resource_change"), 0);
    }

    #[tokio::test]
    async fn test_changed_input_rejected() {
        let mut harness = StackHarness::new(two_things(false, 1)).with_input("prefix", Value::string("one"));
        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);

        harness.inputs.insert("prefix".to_string(), Value::string("two"));
        let run = harness.apply(&plan).await;
        assert_error_contains(&run.diagnostics, "Input variable changed since plan");
        assert!(run.changes.is_empty());
    }

    #[test]
    fn test_levels_follow_dependencies() {
        let object = |name: &str, deps: &[&str]| {
            let addr: ResourceInstanceObjectAddr = format!("component.web.fake_thing.{}", name).parse().unwrap();
            PlannedObject {
                addr,
                action: ChangeAction::Create,
                fragment: PlannedResourceInstance {
                    dependencies: deps.iter().map(|d| d.to_string()).collect(),
                    ..Default::default()
                },
            }
        };
        let waves = levels(&[
            object("c", &["fake_thing.b"]),
            object("a", &[]),
            object("b", &["fake_thing.a"]),
        ]);
        let names: Vec<Vec<String>> = waves
            .iter()
            .map(|w| w.iter().map(PlannedObject::resource_key).collect())
            .collect();
        assert_eq!(
            names,
            vec![vec!["fake_thing.a"], vec!["fake_thing.b"], vec!["fake_thing.c"]]
        );
    }
}
