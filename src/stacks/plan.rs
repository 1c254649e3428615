//! Planning a stack.
//!
//! A plan runs as a background task feeding an event stream. Raw fragments
//! come out in a fixed order: the header first, then input variables, then
//! each component's resources (one change per object) followed by the
//! component itself, then output values, and finally the applyability
//! fragment. Callers store the fragments in that order and hand them back
//! verbatim to apply.

use super::config::{
    evaluate, evaluate_instances, ActionTrigger, ComponentConfig, DependencyLocks, Instances, ResourceConfig,
    StackConfig,
};
use super::describe::{
    ChangeAction, ComponentInstanceChange, Described, DescribedValue, InputVariableChange,
    OutputValueChange, PlannedDescription, ResourceInstanceChange,
};
use super::events::{
    ChangeSummary, ComponentInstanceStatus, Emitter, Phase, PlanEvent, PlannedChange, ProgressEvent,
    ResourceInstanceStatus,
};
use super::patch::DescriptionPatch;
use super::providers::{
    block_config, capabilities, decode_stored, pack, proposed_new_state, ConfiguredProvider, ProviderSet,
    ENGINE_VERSION,
};
use super::raw::{
    plan_fragment::Kind, PlanApplyable, PlanFragment, PlanHeader, PlannedAction, PlannedComponentInstance,
    PlannedInputVariable, PlannedOutputValue, PlannedResourceInstance,
};
use super::state::{PriorState, RawState, StateKey, StoredObject};
use crate::addrs::{
    AbsResourceInstanceAddr, ComponentInstanceAddr, InstanceKey, ResourceAddr, ResourceInstanceObjectAddr,
    ResourceMode,
};
use crate::codec;
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::provider::{
    unknown_type, DeferredReason, ImportResourceStateRequest, LinkedResourcePlanData, MoveResourceStateRequest,
    PlanActionRequest, PlanResourceChangeRequest, Provider, ProviderFactory, ReadDataSourceRequest,
    ReadResourceRequest, ValidateResourceConfigRequest,
};
use crate::schema::{ActionLinkage, AttributeType, ExecutionOrder, IdentitySchema, Schema};
use crate::value::{AttributePath, Value};
use prost::Message;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

pub use super::raw::PlanMode;

/// Description key of the applyability flag.
pub const APPLYABLE_KEY: &str = "PLAN_APPLYABLE";

/// Everything a plan needs.
#[derive(Clone)]
pub struct PlanRequest {
    /// The stack configuration.
    pub config: Arc<StackConfig>,
    /// Raw state from the previous apply.
    pub prior_state: Arc<RawState>,
    /// Provider version locks.
    pub locks: Arc<DependencyLocks>,
    /// Where provider instances come from.
    pub providers: Arc<dyn ProviderFactory>,
    /// Input variable values.
    pub inputs: BTreeMap<String, Value>,
    /// Planning mode.
    pub mode: PlanMode,
    /// Tuning.
    pub options: EngineOptions,
}

/// Start planning. The stream ends when planning finishes or `cancel` fires.
///
/// Failures are reported as diagnostics on the stream. A plan whose stream
/// carried any error diagnostic ends with a non-applyable fragment, or with
/// no applyability fragment at all when cancelled.
///
/// `cancel` is cancelled when the operation ends, releasing anything linked
/// to it, so give each operation its own token.
pub fn plan_stack_changes(request: PlanRequest, cancel: CancellationToken) -> ReceiverStream<PlanEvent> {
    let (emitter, rx) = Emitter::channel(request.options.event_buffer);
    let span = info_span!("stacks.plan", mode = ?request.mode);
    tokio::spawn(
        async move {
            let done = emitter.clone();
            // Cancelled before the stream closes, so linked watchers are gone by then.
            let _release = cancel.clone().drop_guard();
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("plan cancelled");
                    done.send(EngineError::Cancelled).await;
                },
                _ = run_plan(request, emitter) => {},
            }
        }
        .instrument(span),
    );
    ReceiverStream::new(rx)
}

struct PlanContext {
    config: Arc<StackConfig>,
    prior: PriorState,
    vars: BTreeMap<String, Value>,
    providers: ProviderSet,
    mode: PlanMode,
    options: EngineOptions,
    emitter: Emitter<PlannedChange>,
}

async fn run_plan(request: PlanRequest, emitter: Emitter<PlannedChange>) {
    let PlanRequest {
        config,
        prior_state,
        locks,
        providers: factory,
        inputs,
        mode,
        options,
    } = request;
    info!(components = config.components.len(), "planning stack changes");

    let header = PlanHeader {
        engine_version: ENGINE_VERSION.to_string(),
        mode: mode as i32,
        created_at: Some(prost_types::Timestamp::from(std::time::SystemTime::now())),
    };
    emit_planned(&emitter, vec![Kind::Header(header)], Vec::new()).await;

    let (prior, diags) = PriorState::load(&prior_state);
    emitter.diagnostics(diags).await;
    emitter.diagnostics(config.validate()).await;
    emitter.diagnostics(locks.check(&config)).await;
    if emitter.has_errors() {
        finish(&emitter).await;
        return;
    }

    let Some(vars) = plan_variables(&emitter, &config, &prior, &inputs, mode).await else {
        finish(&emitter).await;
        return;
    };

    let (providers, diags) = ProviderSet::start(&config, factory.as_ref(), &vars, &options).await;
    emitter.diagnostics(diags).await;

    let ctx = Arc::new(PlanContext {
        config,
        prior,
        vars,
        providers,
        mode,
        options,
        emitter: emitter.clone(),
    });
    plan_components(&ctx).await;
    plan_outputs(&ctx).await;

    let diags = ctx.providers.stop().await;
    emitter.diagnostics(diags).await;
    finish(&emitter).await;
}

async fn finish(emitter: &Emitter<PlannedChange>) {
    let applyable = !emitter.has_errors();
    info!(applyable, "plan finished");
    emit_planned(
        emitter,
        vec![Kind::Applyable(PlanApplyable { applyable })],
        vec![(APPLYABLE_KEY.to_string(), PlannedDescription::PlanApplyable { applyable })],
    )
    .await;
}

async fn emit_planned(
    emitter: &Emitter<PlannedChange>,
    fragments: Vec<Kind>,
    descriptions: Vec<(String, PlannedDescription)>,
) {
    let raw = fragments
        .into_iter()
        .map(|kind| PlanFragment::new(kind).encode_to_vec())
        .collect();
    let mut patches = Vec::with_capacity(descriptions.len());
    for (key, description) in descriptions {
        match DescriptionPatch::put(key, &Described::new(description)) {
            Ok(patch) => patches.push(patch),
            Err(err) => emitter.send(err).await,
        }
    }
    emitter
        .change(PlannedChange {
            raw,
            descriptions: patches,
        })
        .await;
}

/// Describe a whole value, hiding it when sensitive.
pub(super) fn describe_whole(value: &Value, sensitive: bool) -> DescribedValue {
    if sensitive {
        DescribedValue::sensitive(value)
    } else {
        DescribedValue::new(value, Vec::new())
    }
}

fn json_value(bytes: &[u8]) -> Value {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .map(|json| Value::from_json(&json))
        .unwrap_or_default()
}

async fn plan_variables(
    emitter: &Emitter<PlannedChange>,
    config: &StackConfig,
    prior: &PriorState,
    inputs: &BTreeMap<String, Value>,
    mode: PlanMode,
) -> Option<BTreeMap<String, Value>> {
    let mut diags = Diagnostics::new();
    for name in inputs.keys().filter(|name| !config.variables.contains_key(*name)) {
        diags.push(Diagnostic::error("Undeclared input variable").with_detail(format!(
            "A value was given for \"{}\", but the stack declares no such variable.",
            name
        )));
    }

    let mut vars = BTreeMap::new();
    let mut fragments = Vec::new();
    let mut descriptions = Vec::new();
    for (name, var) in &config.variables {
        let value = match (inputs.get(name), &var.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => Value::from_json(default),
            (None, None) => {
                diags.push(
                    Diagnostic::error("No value for required input variable")
                        .with_detail(format!("The input variable \"{}\" has no default.", name)),
                );
                continue;
            },
        };
        let before = prior.variables.get(name).map(Value::from_json).unwrap_or_default();
        let action = if mode == PlanMode::Destroy {
            if prior.variables.contains_key(name) {
                ChangeAction::Delete
            } else {
                ChangeAction::NoOp
            }
        } else if var.ephemeral {
            ChangeAction::NoOp
        } else if !prior.variables.contains_key(name) {
            ChangeAction::Create
        } else if before == value {
            ChangeAction::NoOp
        } else {
            ChangeAction::Update
        };
        let stored = if var.ephemeral { Value::Null } else { value.clone() };
        let packed = match pack(&stored, &AttributeType::Dynamic) {
            Ok(packed) => packed,
            Err(err) => {
                diags.push(Diagnostic::from(err).with_detail(format!("Input variable \"{}\".", name)));
                continue;
            },
        };
        fragments.push(Kind::InputVariable(PlannedInputVariable {
            name: name.clone(),
            action: super::raw::Action::from(action) as i32,
            value: packed,
            ephemeral: var.ephemeral,
        }));
        descriptions.push((
            StateKey::Variable(name.clone()).to_string(),
            PlannedDescription::InputVariable(InputVariableChange {
                name: name.clone(),
                action,
                before: describe_whole(&before, var.sensitive),
                after: describe_whole(&stored, var.sensitive),
            }),
        ));
        vars.insert(name.clone(), value);
    }

    for (name, json) in &prior.variables {
        if config.variables.contains_key(name) {
            continue;
        }
        fragments.push(Kind::InputVariable(PlannedInputVariable {
            name: name.clone(),
            action: super::raw::Action::Delete as i32,
            value: Vec::new(),
            ephemeral: false,
        }));
        descriptions.push((
            StateKey::Variable(name.clone()).to_string(),
            PlannedDescription::InputVariable(InputVariableChange {
                name: name.clone(),
                action: ChangeAction::Delete,
                before: DescribedValue::new(&Value::from_json(json), Vec::new()),
                after: DescribedValue::default(),
            }),
        ));
    }

    let failed = diags.has_errors();
    emitter.diagnostics(diags).await;
    if failed {
        return None;
    }
    emit_planned(emitter, fragments, descriptions).await;
    Some(vars)
}

#[derive(Debug, Default, Clone, Copy)]
struct ComponentOutcome {
    deferred: bool,
    errored: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Prereq {
    deferred: Option<DeferredReason>,
    errored: bool,
}

async fn plan_components(ctx: &Arc<PlanContext>) {
    let order = match ctx.config.component_order() {
        Ok(order) => order,
        Err(diag) => {
            ctx.emitter.send(diag).await;
            return;
        },
    };

    let mut outcomes: BTreeMap<String, ComponentOutcome> = BTreeMap::new();
    let mut planned: BTreeSet<ComponentInstanceAddr> = BTreeSet::new();
    if ctx.mode != PlanMode::Destroy {
        for name in &order {
            let Some(component) = ctx.config.components.get(name) else {
                continue;
            };
            let upstream = component.depends_on.iter().filter_map(|dep| outcomes.get(dep));
            let mut prereq = Prereq::default();
            for outcome in upstream {
                prereq.errored |= outcome.errored;
                if outcome.deferred {
                    prereq.deferred = Some(DeferredReason::DeferredPrereq);
                }
            }

            let instances = match evaluate_instances(component.instances.as_ref(), &ctx.vars) {
                Ok(instances) => instances,
                Err(diag) => {
                    ctx.emitter.send(diag).await;
                    outcomes.insert(name.clone(), ComponentOutcome { deferred: false, errored: true });
                    continue;
                },
            };

            let mut outcome = ComponentOutcome::default();
            match instances {
                Instances::Unknown => {
                    debug!(component = %name, "instance set unknown, deferring");
                    // Existing instances stay untouched until the set is known.
                    for existing in ctx.prior.component_instances() {
                        if &existing.component == name {
                            planned.insert(existing);
                        }
                    }
                    let addr = ComponentInstanceAddr::with_key(name.clone(), InstanceKey::Wildcard);
                    let deferred = Prereq {
                        deferred: Some(DeferredReason::InstanceCountUnknown),
                        errored: prereq.errored,
                    };
                    let result = plan_component_instance(ctx, &addr, Some(component), deferred).await;
                    outcome.deferred = true;
                    outcome.errored |= result.errored;
                },
                Instances::Known(keys) => {
                    for key in keys {
                        let addr = ComponentInstanceAddr::with_key(name.clone(), key);
                        planned.insert(addr.clone());
                        let result = plan_component_instance(ctx, &addr, Some(component), prereq).await;
                        outcome.deferred |= result.deferred;
                        outcome.errored |= result.errored;
                    }
                },
            }
            outcomes.insert(name.clone(), outcome);
        }
    }

    // Prior instances not planned above are being removed, dependents first.
    let mut removed: Vec<ComponentInstanceAddr> = ctx
        .prior
        .component_instances()
        .into_iter()
        .filter(|addr| !planned.contains(addr))
        .collect();
    let rank: BTreeMap<&String, usize> = order.iter().enumerate().map(|(i, name)| (name, i)).collect();
    removed.sort_by_key(|addr| std::cmp::Reverse(rank.get(&addr.component).copied().unwrap_or(usize::MAX)));
    for addr in removed {
        plan_component_instance(ctx, &addr, None, Prereq::default()).await;
    }
}

struct ResourceTask {
    addr: ResourceInstanceObjectAddr,
    config: Option<ResourceConfig>,
    prior: Option<(ResourceInstanceObjectAddr, StoredObject)>,
    import_id: Option<String>,
    removed: Option<bool>,
}

/// Plan every object of one component instance. `component` is `None` when
/// the instance no longer exists in configuration.
async fn plan_component_instance(
    ctx: &Arc<PlanContext>,
    addr: &ComponentInstanceAddr,
    component: Option<&ComponentConfig>,
    prereq: Prereq,
) -> ComponentOutcome {
    let span = info_span!("component", component = %addr);
    async move {
        ctx.emitter
            .send(ProgressEvent::ComponentInstanceStatus {
                addr: addr.clone(),
                status: ComponentInstanceStatus::Planning,
            })
            .await;

        let waves = match collect_tasks(ctx, addr, component) {
            Ok(waves) => waves,
            Err(diag) => {
                ctx.emitter.send(diag).await;
                let outcome = ComponentOutcome {
                    deferred: false,
                    errored: true,
                };
                return finish_component(ctx, addr, component, outcome, ChangeSummary::default()).await;
            },
        };

        let semaphore = Arc::new(Semaphore::new(ctx.options.parallelism.max(1)));
        let mut results: BTreeMap<ResourceInstanceObjectAddr, (bool, bool)> = BTreeMap::new();
        let mut outcome = ComponentOutcome::default();
        let mut summary = ChangeSummary::default();
        for wave in waves {
            let mut set = JoinSet::new();
            for task in wave {
                let mut task_prereq = prereq;
                if let Some(config) = &task.config {
                    for dep in &config.depends_on {
                        let dep_addr = AbsResourceInstanceAddr::new(addr.clone(), dep.instance(InstanceKey::None)).current();
                        if let Some((deferred, errored)) = results.get(&dep_addr) {
                            task_prereq.errored |= *errored;
                            if *deferred && task_prereq.deferred.is_none() {
                                task_prereq.deferred = Some(DeferredReason::DeferredPrereq);
                            }
                        }
                    }
                }
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    plan_resource(&ctx, task, task_prereq).await
                });
            }

            let mut finished = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(result) => finished.push(result),
                    Err(err) => {
                        ctx.emitter
                            .send(Diagnostic::error("Internal error while planning").with_detail(err.to_string()))
                            .await;
                        outcome.errored = true;
                    },
                }
            }
            finished.sort_by(|a, b| a.addr.cmp(&b.addr));
            for result in finished {
                outcome.deferred |= result.deferred;
                outcome.errored |= result.errored;
                results.insert(result.addr.clone(), (result.deferred, result.errored));
                if result.deferred {
                    summary.deferred += 1;
                } else if let Some(action) = result.action {
                    summary.record(action);
                    if result.importing {
                        summary.import += 1;
                    }
                    if result.moved {
                        summary.moved += 1;
                    }
                }
                emit_resource(ctx, result).await;
            }
        }
        finish_component(ctx, addr, component, outcome, summary).await
    }
    .instrument(span)
    .await
}

fn collect_tasks(
    ctx: &PlanContext,
    addr: &ComponentInstanceAddr,
    component: Option<&ComponentConfig>,
) -> Result<Vec<Vec<ResourceTask>>, Diagnostic> {
    let prior_objects: BTreeMap<&ResourceInstanceObjectAddr, &StoredObject> = ctx.prior.component_objects(addr).collect();
    let mut claimed: BTreeSet<ResourceInstanceObjectAddr> = BTreeSet::new();
    let mut waves: Vec<Vec<ResourceTask>> = Vec::new();

    if let Some(component) = component {
        if !component.imports.is_empty() && addr.key != InstanceKey::None {
            return Err(Diagnostic::error("Import into multi-instance component").with_detail(format!(
                "{} has import blocks, which are only supported for single-instance components.",
                addr
            )));
        }
        let order = ctx.config.resource_order(&addr.component)?;
        let mut levels: BTreeMap<&ResourceAddr, usize> = BTreeMap::new();
        for resource in &order {
            let Some(config) = component.resources.get(resource) else {
                continue;
            };
            let level = config
                .depends_on
                .iter()
                .filter_map(|dep| levels.get(dep))
                .max()
                .map_or(0, |deepest| deepest + 1);
            levels.insert(resource, level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }

            let current = AbsResourceInstanceAddr::new(addr.clone(), resource.instance(InstanceKey::None)).current();
            let prior = match prior_objects.get(&current) {
                Some(stored) => Some((current.clone(), (*stored).clone())),
                None => component
                    .moved
                    .iter()
                    .filter(|moved| &moved.to == resource)
                    .find_map(|moved| {
                        let from = AbsResourceInstanceAddr::new(addr.clone(), moved.from.instance(InstanceKey::None)).current();
                        prior_objects.get(&from).map(|stored| (from, (*stored).clone()))
                    }),
            };
            if let Some((from, _)) = &prior {
                claimed.insert(from.clone());
            }
            let import_id = match prior {
                Some(_) => None,
                None => component
                    .imports
                    .iter()
                    .find(|import| &import.to == resource)
                    .map(|import| import.id.clone()),
            };
            waves[level].push(ResourceTask {
                addr: current,
                config: Some(config.clone()),
                prior,
                import_id,
                removed: None,
            });
        }
    }

    let orphans: Vec<ResourceTask> = prior_objects
        .into_iter()
        .filter(|(object, _)| !claimed.contains(*object))
        .map(|(object, stored)| ResourceTask {
            addr: object.clone(),
            config: None,
            prior: Some((object.clone(), stored.clone())),
            import_id: None,
            removed: ctx.config.removed_destroy(&object.instance),
        })
        .collect();
    if !orphans.is_empty() {
        waves.push(orphans);
    }
    Ok(waves)
}

async fn finish_component(
    ctx: &PlanContext,
    addr: &ComponentInstanceAddr,
    component: Option<&ComponentConfig>,
    outcome: ComponentOutcome,
    summary: ChangeSummary,
) -> ComponentOutcome {
    let prior = ctx.prior.components.get(addr);
    let depends_on = component.map(|c| c.depends_on.clone()).unwrap_or_default();
    let action = match (component, prior) {
        (None, _) => ChangeAction::Delete,
        (Some(_), _) if ctx.mode == PlanMode::Destroy => ChangeAction::Delete,
        (Some(_), None) => ChangeAction::Create,
        (Some(_), Some(prior)) if prior.depends_on == depends_on => ChangeAction::NoOp,
        (Some(_), Some(_)) => ChangeAction::Update,
    };
    let plan_complete = !outcome.deferred;
    emit_planned(
        &ctx.emitter,
        vec![Kind::ComponentInstance(PlannedComponentInstance {
            addr: addr.to_string(),
            action: super::raw::Action::from(action) as i32,
            depends_on,
            plan_complete,
        })],
        vec![(
            StateKey::Component(addr.clone()).to_string(),
            PlannedDescription::ComponentInstance(ComponentInstanceChange {
                addr: addr.clone(),
                action,
                plan_complete,
            }),
        )],
    )
    .await;

    let status = if outcome.errored {
        ComponentInstanceStatus::Errored
    } else if outcome.deferred {
        ComponentInstanceStatus::Deferred
    } else {
        ComponentInstanceStatus::Planned
    };
    ctx.emitter
        .send(ProgressEvent::ChangeSummary {
            addr: addr.clone(),
            phase: Phase::Plan,
            summary,
        })
        .await;
    ctx.emitter
        .send(ProgressEvent::ComponentInstanceStatus {
            addr: addr.clone(),
            status,
        })
        .await;
    outcome
}

/// The result of planning one object.
struct ResourceOutcome {
    addr: ResourceInstanceObjectAddr,
    provider: Option<crate::addrs::ProviderAddr>,
    action: Option<ChangeAction>,
    fragment: Option<PlannedResourceInstance>,
    description: Option<ResourceInstanceChange>,
    diagnostics: Diagnostics,
    deferred: bool,
    errored: bool,
    importing: bool,
    moved: bool,
}

async fn emit_resource(ctx: &PlanContext, outcome: ResourceOutcome) {
    ctx.emitter.diagnostics(outcome.diagnostics).await;
    if let (Some(fragment), Some(description)) = (outcome.fragment, outcome.description) {
        emit_planned(
            &ctx.emitter,
            vec![Kind::ResourceInstance(fragment)],
            vec![(
                StateKey::Resource(outcome.addr.clone()).to_string(),
                PlannedDescription::ResourceInstance(description),
            )],
        )
        .await;
    }
    if let Some(provider) = outcome.provider {
        let status = if outcome.errored {
            ResourceInstanceStatus::Errored
        } else if outcome.deferred {
            ResourceInstanceStatus::Deferred
        } else {
            ResourceInstanceStatus::Planned
        };
        ctx.emitter
            .send(ProgressEvent::ResourceInstanceStatus {
                addr: outcome.addr,
                provider,
                status,
            })
            .await;
    }
}

/// Why planning an object stopped early.
enum Halt {
    /// Reported through diagnostics, or a prerequisite failed.
    Errored,
    /// Postponed to a later plan.
    Deferred(DeferredReason),
    /// Nothing to plan.
    Skip,
}

#[derive(Clone)]
struct Base {
    provider: Arc<ConfiguredProvider>,
    type_name: String,
    schema: Schema,
    identity: Option<IdentitySchema>,
}

struct Planned {
    action: ChangeAction,
    prior: Value,
    planned: Value,
    prior_private: Vec<u8>,
    planned_private: Vec<u8>,
    prior_identity: Value,
    planned_identity: Value,
    replace_paths: Vec<AttributePath>,
    moved_from: Option<ResourceInstanceObjectAddr>,
    importing: bool,
    previous_run: Option<Value>,
    notable_change_outside: bool,
    actions: Vec<PlannedAction>,
    deferred: Option<DeferredReason>,
}

impl Planned {
    fn new(action: ChangeAction, prior: Value, planned: Value) -> Self {
        Self {
            action,
            prior,
            planned,
            prior_private: Vec::new(),
            planned_private: Vec::new(),
            prior_identity: Value::Null,
            planned_identity: Value::Null,
            replace_paths: Vec::new(),
            moved_from: None,
            importing: false,
            previous_run: None,
            notable_change_outside: false,
            actions: Vec::new(),
            deferred: None,
        }
    }
}

struct ResourcePlanner<'a> {
    ctx: &'a PlanContext,
    addr: ResourceInstanceObjectAddr,
    diags: Diagnostics,
    base: Option<Base>,
    prior: Value,
    has_prior: bool,
    dependencies: Vec<String>,
    create_before_destroy: bool,
}

async fn plan_resource(ctx: &PlanContext, task: ResourceTask, prereq: Prereq) -> ResourceOutcome {
    let (dependencies, create_before_destroy) = match (&task.config, &task.prior) {
        (Some(config), _) => (
            config.depends_on.iter().map(ToString::to_string).collect(),
            config.create_before_destroy,
        ),
        (None, Some((_, stored))) => (
            stored.record.dependencies.clone(),
            stored.record.create_before_destroy,
        ),
        (None, None) => (Vec::new(), false),
    };
    let mut planner = ResourcePlanner {
        ctx,
        addr: task.addr.clone(),
        diags: Diagnostics::new(),
        base: None,
        prior: Value::Null,
        has_prior: task.prior.is_some(),
        dependencies,
        create_before_destroy,
    };
    let result = planner.plan(task, prereq).await;
    planner.outcome(result)
}

impl<'a> ResourcePlanner<'a> {
    fn fail(&mut self, diag: Diagnostic) -> Halt {
        self.diags.push(diag);
        Halt::Errored
    }

    fn absorb(&mut self, diags: Diagnostics) -> Result<(), Halt> {
        let failed = diags.has_errors();
        self.diags.extend(diags);
        if failed {
            Err(Halt::Errored)
        } else {
            Ok(())
        }
    }

    async fn status(&self, status: ResourceInstanceStatus) {
        if let Some(base) = &self.base {
            self.ctx
                .emitter
                .send(ProgressEvent::ResourceInstanceStatus {
                    addr: self.addr.clone(),
                    provider: base.provider.addr.clone(),
                    status,
                })
                .await;
        }
    }

    async fn plan(&mut self, task: ResourceTask, prereq: Prereq) -> Result<Planned, Halt> {
        let resource = &task.addr.instance.resource.resource;
        let mode = resource.mode;
        let type_name = resource.type_name.clone();

        let provider = match (&task.config, &task.prior) {
            (Some(config), _) => {
                if self.ctx.providers.is_failed(&config.provider) {
                    return Err(Halt::Errored);
                }
                self.ctx.providers.get(&config.provider).cloned()
            },
            (None, Some((_, stored))) => self
                .ctx
                .providers
                .for_stored(&stored.provider, &stored.provider_config)
                .cloned(),
            (None, None) => return Err(Halt::Skip),
        };
        let Some(provider) = provider else {
            let detail = match &task.prior {
                Some((_, stored)) => format!(
                    "{} was created by provider {}, which the configuration no longer declares.",
                    self.addr, stored.provider
                ),
                None => format!("{} refers to a provider configuration that was not started.", self.addr),
            };
            return Err(self.fail(Diagnostic::error("Provider configuration not present").with_detail(detail)));
        };

        let (kind, schema) = match mode {
            ResourceMode::Managed => ("resource", provider.schema.resources.get(&type_name)),
            ResourceMode::Data => ("data source", provider.schema.data_sources.get(&type_name)),
        };
        let Some(schema) = schema.cloned() else {
            return Err(self.fail(unknown_type(kind, &type_name)));
        };
        let identity = match mode {
            ResourceMode::Managed => provider.schema.identities.get(&type_name).cloned(),
            ResourceMode::Data => None,
        };
        self.base = Some(Base {
            provider: provider.clone(),
            type_name,
            schema,
            identity,
        });

        if prereq.errored {
            return Err(Halt::Errored);
        }
        if let Some(reason) = prereq.deferred {
            return Err(Halt::Deferred(reason));
        }
        if !provider.configured {
            return Err(Halt::Deferred(DeferredReason::ProviderConfigUnknown));
        }

        match mode {
            ResourceMode::Managed => self.plan_managed(task).await,
            ResourceMode::Data => self.plan_data(task).await,
        }
    }

    fn base(&self) -> Result<Base, Halt> {
        self.base.clone().ok_or(Halt::Errored)
    }

    async fn plan_managed(&mut self, task: ResourceTask) -> Result<Planned, Halt> {
        let base = self.base()?;
        let session = &base.provider.session;
        let type_name = base.type_name.clone();
        let caps = capabilities(&self.ctx.options);
        let destroying = self.ctx.mode == PlanMode::Destroy || task.config.is_none();

        let config_value = match &task.config {
            Some(config) if !destroying => {
                let value = block_config(&config.config, &self.ctx.vars, &base.schema.block).map_err(|d| self.fail(d))?;
                let diags = session
                    .validate_resource_config(ValidateResourceConfigRequest {
                        type_name: type_name.clone(),
                        config: value.clone(),
                    })
                    .await;
                self.absorb(diags)?;
                value
            },
            _ => Value::Null,
        };

        let mut moved_from = None;
        let mut private = Vec::new();
        let mut identity = Value::Null;
        let mut importing = false;
        if let Some((from, stored)) = &task.prior {
            if from != &self.addr {
                moved_from = Some(from.clone());
            }
            let from_type = &from.instance.resource.resource.type_name;
            if from_type != &type_name {
                let (value, moved_private, moved_identity) = self.move_state(&base, from_type, stored).await?;
                self.prior = value;
                private = moved_private;
                identity = moved_identity;
            } else {
                let (value, stored_identity) =
                    decode_stored(&base.provider, &type_name, &base.schema, base.identity.as_ref(), &stored.record)
                        .await
                        .map_err(|diags| {
                            self.diags.extend(diags);
                            Halt::Errored
                        })?;
                self.prior = value;
                private = stored.record.private.clone();
                identity = stored_identity;
            }
        } else if let (Some(id), false) = (&task.import_id, destroying) {
            let mut resp = session
                .import_resource_state(ImportResourceStateRequest {
                    type_name: type_name.clone(),
                    id: id.clone(),
                    identity: Value::Null,
                    client_capabilities: caps,
                })
                .await;
            self.absorb(std::mem::take(&mut resp.diagnostics))?;
            if let Some(deferred) = resp.deferred {
                return Err(Halt::Deferred(deferred.reason));
            }
            let Some(imported) = resp.imported_resources.into_iter().find(|r| r.type_name == type_name) else {
                return Err(self.fail(Diagnostic::error("Import returned no matching object").with_detail(format!(
                    "Importing \"{}\" into {} returned no {} object.",
                    id, self.addr, type_name
                ))));
            };
            info!(addr = %self.addr, id = %id, "importing existing object");
            self.prior = imported.state;
            private = imported.private;
            identity = imported.identity;
            importing = true;
            self.has_prior = true;
        }

        let mut previous_run = None;
        let mut notable_change_outside = false;
        if self.ctx.mode != PlanMode::Destroy && !self.prior.is_null() {
            self.status(ResourceInstanceStatus::Refreshing).await;
            let mut resp = session
                .read_resource(ReadResourceRequest {
                    type_name: type_name.clone(),
                    prior_state: self.prior.clone(),
                    private: private.clone(),
                    current_identity: identity.clone(),
                    client_capabilities: caps,
                })
                .await;
            self.absorb(std::mem::take(&mut resp.diagnostics))?;
            if let Some(deferred) = resp.deferred {
                return Err(Halt::Deferred(deferred.reason));
            }
            if !importing {
                notable_change_outside = resp.new_state != self.prior;
                previous_run = Some(std::mem::take(&mut self.prior));
            }
            self.prior = resp.new_state;
            private = resp.private;
            if !resp.identity.is_null() {
                identity = resp.identity;
            }
            self.status(ResourceInstanceStatus::Refreshed).await;
        }

        let prior = self.prior.clone();
        let mut planned = if self.ctx.mode == PlanMode::RefreshOnly {
            let mut planned = Planned::new(ChangeAction::NoOp, prior.clone(), prior.clone());
            planned.planned_private = private.clone();
            planned.planned_identity = identity.clone();
            planned
        } else if destroying {
            if prior.is_null() || task.removed == Some(false) {
                Planned::new(ChangeAction::Forget, prior.clone(), Value::Null)
            } else {
                self.status(ResourceInstanceStatus::Planning).await;
                let mut resp = session
                    .plan_resource_change(PlanResourceChangeRequest {
                        type_name: type_name.clone(),
                        prior_state: prior.clone(),
                        proposed_new_state: Value::Null,
                        config: Value::Null,
                        prior_private: private.clone(),
                        prior_identity: identity.clone(),
                        client_capabilities: caps,
                    })
                    .await;
                self.absorb(std::mem::take(&mut resp.diagnostics))?;
                if let Some(deferred) = resp.deferred {
                    return Err(Halt::Deferred(deferred.reason));
                }
                let mut planned = Planned::new(ChangeAction::Delete, prior.clone(), Value::Null);
                planned.planned_private = resp.planned_private;
                planned
            }
        } else {
            self.status(ResourceInstanceStatus::Planning).await;
            let mut resp = session
                .plan_resource_change(PlanResourceChangeRequest {
                    type_name: type_name.clone(),
                    prior_state: prior.clone(),
                    proposed_new_state: proposed_new_state(&base.schema.block, &prior, &config_value),
                    config: config_value.clone(),
                    prior_private: private.clone(),
                    prior_identity: identity.clone(),
                    client_capabilities: caps,
                })
                .await;
            self.absorb(std::mem::take(&mut resp.diagnostics))?;
            if let Some(deferred) = resp.deferred {
                return Err(Halt::Deferred(deferred.reason));
            }

            if prior.is_null() {
                let mut planned = Planned::new(ChangeAction::Create, prior.clone(), resp.planned_state);
                planned.planned_private = resp.planned_private;
                planned.planned_identity = resp.planned_identity;
                planned
            } else if !resp.requires_replace.is_empty() {
                let mut replacement = session
                    .plan_resource_change(PlanResourceChangeRequest {
                        type_name: type_name.clone(),
                        prior_state: Value::Null,
                        proposed_new_state: proposed_new_state(&base.schema.block, &Value::Null, &config_value),
                        config: config_value.clone(),
                        prior_private: Vec::new(),
                        prior_identity: Value::Null,
                        client_capabilities: caps,
                    })
                    .await;
                self.absorb(std::mem::take(&mut replacement.diagnostics))?;
                if let Some(deferred) = replacement.deferred {
                    return Err(Halt::Deferred(deferred.reason));
                }
                let action = if self.create_before_destroy {
                    ChangeAction::CreateThenDelete
                } else {
                    ChangeAction::DeleteThenCreate
                };
                let mut planned = Planned::new(action, prior.clone(), replacement.planned_state);
                planned.planned_private = replacement.planned_private;
                planned.planned_identity = replacement.planned_identity;
                planned.replace_paths = resp.requires_replace;
                planned
            } else {
                let action = if resp.planned_state == prior {
                    ChangeAction::NoOp
                } else {
                    ChangeAction::Update
                };
                let mut planned = Planned::new(action, prior.clone(), resp.planned_state);
                planned.planned_private = resp.planned_private;
                planned.planned_identity = if resp.planned_identity.is_null() {
                    identity.clone()
                } else {
                    resp.planned_identity
                };
                planned
            }
        };

        if let Some(config) = &task.config {
            if matches!(
                planned.action,
                ChangeAction::Create
                    | ChangeAction::Update
                    | ChangeAction::DeleteThenCreate
                    | ChangeAction::CreateThenDelete
            ) {
                for trigger in &config.actions {
                    let action = self
                        .plan_trigger(&base, trigger, &planned, &identity, &config_value)
                        .await?;
                    planned.actions.push(action);
                }
            }
        }

        planned.prior_private = private;
        planned.prior_identity = identity;
        planned.moved_from = moved_from;
        planned.importing = importing;
        planned.previous_run = previous_run;
        planned.notable_change_outside = notable_change_outside;
        Ok(planned)
    }

    async fn move_state(
        &mut self,
        base: &Base,
        from_type: &str,
        stored: &StoredObject,
    ) -> Result<(Value, Vec<u8>, Value), Halt> {
        if !base.provider.schema.capabilities.move_resource_state {
            return Err(self.fail(Diagnostic::error("Unsupported cross-type move").with_detail(format!(
                "Provider {} cannot move {} objects to {}.",
                base.provider.addr, from_type, base.type_name
            ))));
        }
        debug!(addr = %self.addr, from = from_type, to = %base.type_name, "moving state across types");
        let mut resp = base
            .provider
            .session
            .move_resource_state(MoveResourceStateRequest {
                source_provider_address: stored.provider.to_string(),
                source_type_name: from_type.to_string(),
                source_schema_version: stored.record.schema_version,
                source_state_json: stored.record.value_json.clone(),
                target_type_name: base.type_name.clone(),
                source_private: stored.record.private.clone(),
                source_identity_json: stored.record.identity_json.clone(),
                source_identity_schema_version: stored.record.identity_schema_version,
            })
            .await;
        self.absorb(std::mem::take(&mut resp.diagnostics))?;
        Ok((resp.target_state, resp.target_private, resp.target_identity))
    }

    async fn plan_trigger(
        &mut self,
        base: &Base,
        trigger: &ActionTrigger,
        planned: &Planned,
        prior_identity: &Value,
        config: &Value,
    ) -> Result<PlannedAction, Halt> {
        let Some(schema) = base.provider.schema.actions.get(&trigger.action_type) else {
            return Err(self.fail(unknown_type("action", &trigger.action_type)));
        };
        let linked = match &schema.linkage {
            ActionLinkage::Unlinked => false,
            ActionLinkage::Lifecycle { resource, .. } if resource.type_name == base.type_name => true,
            _ => {
                return Err(self.fail(Diagnostic::error("Invalid action trigger").with_detail(format!(
                    "Action \"{}\" cannot be triggered by {}: it is not a lifecycle action for {} resources.",
                    trigger.action_type, self.addr, base.type_name
                ))))
            },
        };
        let action_config =
            block_config(&trigger.config, &self.ctx.vars, &schema.schema.block).map_err(|d| self.fail(d))?;
        let linked_resources = if linked {
            vec![LinkedResourcePlanData {
                prior_state: planned.prior.clone(),
                planned_state: planned.planned.clone(),
                config: config.clone(),
                prior_identity: prior_identity.clone(),
            }]
        } else {
            Vec::new()
        };
        let mut resp = base
            .provider
            .session
            .plan_action(PlanActionRequest {
                action_type: trigger.action_type.clone(),
                linked_resources,
                config: action_config,
                client_capabilities: capabilities(&self.ctx.options),
            })
            .await;
        self.absorb(std::mem::take(&mut resp.diagnostics))?;
        if let Some(deferred) = resp.deferred {
            return Err(Halt::Deferred(deferred.reason));
        }
        Ok(PlannedAction {
            action_type: trigger.action_type.clone(),
            before: trigger.when == ExecutionOrder::Before,
            linked,
        })
    }

    async fn plan_data(&mut self, task: ResourceTask) -> Result<Planned, Halt> {
        let base = self.base()?;
        // Stored data results are informational; a shape change just drops them.
        let prior = task
            .prior
            .as_ref()
            .and_then(|(_, stored)| codec::decode_json(&stored.record.value_json, &base.schema.block.implied_type()).ok())
            .unwrap_or_default();

        let config = match &task.config {
            Some(config) if self.ctx.mode != PlanMode::Destroy => config,
            _ => {
                if task.prior.is_none() {
                    return Err(Halt::Skip);
                }
                return Ok(Planned::new(ChangeAction::Forget, prior, Value::Null));
            },
        };

        let value = block_config(&config.config, &self.ctx.vars, &base.schema.block).map_err(|d| self.fail(d))?;
        let diags = base
            .provider
            .session
            .validate_data_resource_config(ValidateResourceConfigRequest {
                type_name: base.type_name.clone(),
                config: value.clone(),
            })
            .await;
        self.absorb(diags)?;

        if !value.is_wholly_known() {
            debug!(addr = %self.addr, "data source configuration unknown, reading during apply");
            return Ok(Planned::new(ChangeAction::Read, prior, Value::Unknown));
        }
        self.status(ResourceInstanceStatus::Refreshing).await;
        let mut resp = base
            .provider
            .session
            .read_data_source(ReadDataSourceRequest {
                type_name: base.type_name.clone(),
                config: value,
                client_capabilities: capabilities(&self.ctx.options),
            })
            .await;
        self.absorb(std::mem::take(&mut resp.diagnostics))?;
        if let Some(deferred) = resp.deferred {
            return Err(Halt::Deferred(deferred.reason));
        }
        Ok(Planned::new(ChangeAction::NoOp, prior, resp.state))
    }

    fn outcome(mut self, result: Result<Planned, Halt>) -> ResourceOutcome {
        let (planned, errored) = match result {
            Ok(planned) => (Some(planned), false),
            Err(Halt::Deferred(reason)) => {
                debug!(addr = %self.addr, ?reason, "deferred");
                let action = if self.has_prior {
                    ChangeAction::Update
                } else {
                    ChangeAction::Create
                };
                let mut planned = Planned::new(action, std::mem::take(&mut self.prior), Value::Unknown);
                planned.deferred = Some(reason);
                (Some(planned), false)
            },
            Err(Halt::Errored) => (None, true),
            Err(Halt::Skip) => (None, false),
        };
        let mut outcome = ResourceOutcome {
            addr: self.addr.clone(),
            provider: None,
            action: None,
            fragment: None,
            description: None,
            diagnostics: Diagnostics::new(),
            deferred: false,
            errored,
            importing: false,
            moved: false,
        };
        if let Some(base) = self.base.as_ref() {
            if errored || planned.is_some() {
                outcome.provider = Some(base.provider.addr.clone());
            }
            if let Some(planned) = planned {
                match self.render(base, &planned) {
                    Ok((fragment, description)) => {
                        outcome.action = Some(planned.action);
                        outcome.deferred = planned.deferred.is_some();
                        outcome.importing = planned.importing;
                        outcome.moved = planned.moved_from.is_some();
                        outcome.fragment = Some(fragment);
                        outcome.description = Some(description);
                    },
                    Err(err) => {
                        self.diags.push(
                            Diagnostic::error("Provider produced invalid plan")
                                .with_detail(format!("{}: {}", self.addr, err.message())),
                        );
                        outcome.errored = true;
                    },
                }
            }
        }
        outcome.diagnostics = self.diags;
        outcome
    }

    fn render(
        &self,
        base: &Base,
        planned: &Planned,
    ) -> Result<(PlannedResourceInstance, ResourceInstanceChange), EngineError> {
        let ty = base.schema.block.implied_type();
        let identity_ty = base.identity.as_ref().map(IdentitySchema::implied_type);
        let pack_identity = |value: &Value| match &identity_ty {
            Some(ty) => pack(value, ty),
            None => Ok(Vec::new()),
        };
        let block = &base.schema.block;
        let fragment = PlannedResourceInstance {
            addr: self.addr.to_string(),
            provider_addr: base.provider.addr.to_string(),
            provider_config: base.provider.name.clone(),
            action: super::raw::Action::from(planned.action) as i32,
            prior: pack(&planned.prior, &ty)?,
            planned: pack(&planned.planned, &ty)?,
            prior_private: planned.prior_private.clone(),
            planned_private: planned.planned_private.clone(),
            prior_identity: pack_identity(&planned.prior_identity)?,
            planned_identity: pack_identity(&planned.planned_identity)?,
            schema_version: base.schema.version,
            dependencies: self.dependencies.clone(),
            moved_from: planned.moved_from.as_ref().map(ToString::to_string).unwrap_or_default(),
            importing: planned.importing,
            create_before_destroy: self.create_before_destroy,
            deferred_reason: planned.deferred.map(deferred_reason_name).unwrap_or_default(),
            actions: planned.actions.clone(),
            identity_schema_version: base.identity.as_ref().map_or(0, |i| i.version),
        };
        let description = ResourceInstanceChange {
            addr: self.addr.clone(),
            previous_addr: planned.moved_from.clone(),
            provider: base.provider.addr.clone(),
            action: planned.action,
            before: DescribedValue::new(&planned.prior, block.sensitive_paths(&planned.prior)),
            after: DescribedValue::new(&planned.planned, block.sensitive_paths(&planned.planned)),
            replace_paths: planned.replace_paths.clone(),
            importing: planned.importing,
            previous_run_value: planned
                .previous_run
                .as_ref()
                .map(|value| DescribedValue::new(value, block.sensitive_paths(value))),
            notable_change_outside: planned.notable_change_outside,
            deferred: planned.deferred,
            actions: planned.actions.iter().map(|a| a.action_type.clone()).collect(),
        };
        Ok((fragment, description))
    }
}

/// The wire name of a deferral reason, as stored in plan fragments.
pub(super) fn deferred_reason_name(reason: DeferredReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|json| json.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn plan_outputs(ctx: &PlanContext) {
    let destroying = ctx.mode == PlanMode::Destroy;
    let mut fragments = Vec::new();
    let mut descriptions = Vec::new();
    for (name, output) in &ctx.config.outputs {
        let value = if destroying {
            Value::Null
        } else {
            match evaluate(&output.value, &ctx.vars) {
                Ok(value) => value,
                Err(diag) => {
                    ctx.emitter.send(diag).await;
                    continue;
                },
            }
        };
        let prior = ctx.prior.outputs.get(name);
        let before = prior.map(|p| json_value(&p.value_json)).unwrap_or_default();
        let action = match (prior, destroying) {
            (None, true) => continue,
            (Some(_), true) => ChangeAction::Delete,
            (None, false) => ChangeAction::Create,
            (Some(_), false) if before == value => ChangeAction::NoOp,
            (Some(_), false) => ChangeAction::Update,
        };
        let packed = match pack(&value, &AttributeType::Dynamic) {
            Ok(packed) => packed,
            Err(err) => {
                ctx.emitter.send(err).await;
                continue;
            },
        };
        fragments.push(Kind::OutputValue(PlannedOutputValue {
            name: name.clone(),
            action: super::raw::Action::from(action) as i32,
            value: packed,
            sensitive: output.sensitive,
        }));
        descriptions.push((
            StateKey::Output(name.clone()).to_string(),
            PlannedDescription::OutputValue(OutputValueChange {
                name: name.clone(),
                action,
                before: describe_whole(&before, output.sensitive || prior.is_some_and(|p| p.sensitive)),
                after: describe_whole(&value, output.sensitive),
            }),
        ));
    }
    for (name, prior) in &ctx.prior.outputs {
        if ctx.config.outputs.contains_key(name) {
            continue;
        }
        fragments.push(Kind::OutputValue(PlannedOutputValue {
            name: name.clone(),
            action: super::raw::Action::Delete as i32,
            value: Vec::new(),
            sensitive: prior.sensitive,
        }));
        descriptions.push((
            StateKey::Output(name.clone()).to_string(),
            PlannedDescription::OutputValue(OutputValueChange {
                name: name.clone(),
                action: ChangeAction::Delete,
                before: describe_whole(&json_value(&prior.value_json), prior.sensitive),
                after: DescribedValue::default(),
            }),
        ));
    }
    if !fragments.is_empty() {
        emit_planned(&ctx.emitter, fragments, descriptions).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_error_contains, assert_has_errors, assert_no_errors, parse_config, StackHarness};
    use serde_json::json;

    fn one_thing(size: i64) -> StackConfig {
        parse_config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "config": { "name": "a", "size": size } }
                    }
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_plan_creates_from_empty_state() {
        let harness = StackHarness::new(one_thing(1));
        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        assert!(plan.applyable());

        let change = plan.resource("component.web.fake_thing.a").map(|r| r.action);
        assert_eq!(change, Some(ChangeAction::Create));
        let component = plan.component("component.web").map(|c| c.action);
        assert_eq!(component, Some(ChangeAction::Create));
        // Planning never touches remote objects.
        assert_eq!(harness.fake.calls("apply_resource_change"), 0);
    }

    #[tokio::test]
    async fn test_second_plan_is_noop() {
        let mut harness = StackHarness::new(one_thing(1));
        assert_no_errors(&harness.converge().await.diagnostics);

        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").expect("planned");
        assert_eq!(change.action, ChangeAction::NoOp);
        assert!(!change.notable_change_outside);
        assert!(change.previous_run_value.is_some());
    }

    #[tokio::test]
    async fn test_forced_replacement() {
        let mut harness = StackHarness::new(one_thing(1));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.set_config(one_thing(2));

        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").expect("planned");
        assert_eq!(change.action, ChangeAction::DeleteThenCreate);
        assert!(!change.replace_paths.is_empty());
    }

    #[tokio::test]
    async fn test_change_outside_detected() {
        let mut harness = StackHarness::new(one_thing(1));
        assert_no_errors(&harness.converge().await.diagnostics);
        for (_, value) in harness.fake.objects("fake_thing") {
            let Value::Object(mut attrs) = value else {
                panic!("expected an object");
            };
            attrs.insert("name".to_string(), Value::string("drifted"));
            harness.fake.insert_object("fake_thing", Value::Object(attrs));
        }

        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").expect("planned");
        assert_eq!(change.action, ChangeAction::Update);
        assert!(change.notable_change_outside);
    }

    #[tokio::test]
    async fn test_refresh_only_records_drift() {
        let mut harness = StackHarness::new(one_thing(1));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.set_config(one_thing(2));
        let plans = harness.fake.calls("plan_resource_change");

        let plan = harness.plan(PlanMode::RefreshOnly).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").expect("planned");
        assert_eq!(change.action, ChangeAction::NoOp);
        assert_eq!(harness.fake.calls("plan_resource_change"), plans);
    }

    #[tokio::test]
    async fn test_removed_resource_planned_for_delete() {
        let mut harness = StackHarness::new(one_thing(1));
        assert_no_errors(&harness.converge().await.diagnostics);
        harness.set_config(parse_config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": { "web": { "resources": {} } }
        })));

        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let change = plan.resource("component.web.fake_thing.a").map(|r| r.action);
        assert_eq!(change, Some(ChangeAction::Delete));
    }

    #[tokio::test]
    async fn test_destroy_mode_deletes_everything() {
        let mut harness = StackHarness::new(one_thing(1));
        assert_no_errors(&harness.converge().await.diagnostics);

        let plan = harness.plan(PlanMode::Destroy).await;
        assert_no_errors(&plan.diagnostics);
        assert!(plan.applyable());
        assert!(!plan.resources().is_empty());
        assert!(plan.resources().iter().all(|r| r.action == ChangeAction::Delete));
        let component = plan.component("component.web").map(|c| c.action);
        assert_eq!(component, Some(ChangeAction::Delete));
    }

    #[tokio::test]
    async fn test_unknown_instances_defer() {
        let harness = StackHarness::new(parse_config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "instances": { "$unknown": true },
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "config": { "name": "a" } }
                    }
                }
            }
        })));
        let plan = harness.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        let resources = plan.resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].addr.to_string(), "component.web[*].fake_thing.a");
        assert_eq!(resources[0].deferred, Some(DeferredReason::InstanceCountUnknown));
        assert_eq!(harness.fake.calls("plan_resource_change"), 0);
    }

    #[tokio::test]
    async fn test_missing_required_variable() {
        let harness = StackHarness::new(parse_config(json!({
            "variables": { "region": {} },
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {}
        })));
        let plan = harness.plan(PlanMode::Normal).await;
        assert_error_contains(&plan.diagnostics, "No value for required input variable");
        assert!(!plan.applyable());
    }

    #[tokio::test]
    async fn test_unlocked_provider_rejected() {
        let mut harness = StackHarness::new(one_thing(1));
        harness.set_locks(DependencyLocks::default());
        let plan = harness.plan(PlanMode::Normal).await;
        assert_has_errors(&plan.diagnostics);
        assert_error_contains(&plan.diagnostics, "Provider not locked");
        assert!(!plan.applyable());
    }
}
