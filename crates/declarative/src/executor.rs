//! Execution engine - applies a plan wave by wave on a bounded worker pool

use crate::context::{ApplyContext, CancelToken, ProgressCallback};
use crate::error::{Error, ErrorCategory, ProviderError, ResolveError, Result};
use crate::graph::Graph;
use crate::planner::{Operation, Plan, Step, StepKey};
use crate::provider::Provider;
use crate::resource::Resource;
use crate::retry::with_retry;
use crate::state::{LiveResource, Snapshot, StateStore};
use crate::types::{
    Action, ApplyResult, Attributes, ExecuteOptions, ExecuteSummary, FailurePolicy, ResourceId,
};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Outcome of a single step
#[derive(Debug, Clone)]
enum StepOutcome {
    /// Create, update and retire carry the new record, delete carries nothing
    Applied(Option<LiveResource>),
    Failed(String),
    Skipped(String),
}

impl StepOutcome {
    fn result(&self, action: Action) -> ApplyResult {
        match self {
            Self::Applied(_) => ApplyResult::for_action(action),
            Self::Failed(error) => ApplyResult::Failed {
                error: error.clone(),
            },
            Self::Skipped(reason) => ApplyResult::Skipped {
                reason: reason.clone(),
            },
        }
    }
}

/// A step ready for dispatch with its inputs resolved
struct Job {
    step: Step,
    /// Instance an update applies to
    provider_id: Option<String>,
    properties: Attributes,
    depends_on: BTreeSet<ResourceId>,
    /// Superseded instances: carried into the new record by create and
    /// update, deleted by delete and retire
    deposed: Vec<String>,
    /// Record a delete or retire starts from
    record: Option<LiveResource>,
}

/// Execute a plan with the given options and progress callback
///
/// Waves run strictly one after the other; the steps of a wave run
/// concurrently on a pool of `opts.jobs` workers. Each successful step is
/// persisted to `store` by the worker that ran it, so an interrupted run
/// leaves state matching everything that completed.
///
/// # Arguments
/// * `plan` - Waves to execute
/// * `graph` - Desired graph (properties and dependencies)
/// * `snapshot` - State the plan was computed against
/// * `provider` - Performs the resource operations
/// * `store` - Receives per-resource state updates
/// * `opts` - Execution options (jobs, failure policy, retry, dry_run)
/// * `progress` - Progress callback
///
/// # Returns
/// Summary with a final result per resource. Provider failures are
/// reported there; `Err` means the run could not start.
pub fn execute<P: ProgressCallback>(
    plan: &Plan,
    graph: &Graph,
    snapshot: &Snapshot,
    provider: &dyn Provider,
    store: &dyn StateStore,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<ExecuteSummary> {
    let mut run = Run::new(graph, snapshot);

    if opts.dry_run {
        for step in plan.steps() {
            run.outcomes
                .insert(step.key(), StepOutcome::Skipped("dry run".into()));
        }
        return Ok(run.summary(plan));
    }

    let jobs = opts.jobs.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("apply-{i}"))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;
    let cancel = CancelToken::new();

    log::info!(
        "Applying {} steps in {} waves with {} workers via {}",
        plan.step_count(),
        plan.waves.len(),
        jobs,
        provider.name()
    );

    for (index, wave) in plan.waves.iter().enumerate() {
        progress.on_wave_start(index, plan.waves.len(), wave.len());

        let mut ready = Vec::with_capacity(wave.len());
        for step in wave {
            match run.prepare(step, &cancel) {
                Ok(job) => ready.push(job),
                Err(outcome) => run.record(step, outcome, progress),
            }
        }

        let finished: Vec<(Step, StepOutcome)> = pool.install(|| {
            ready
                .par_iter()
                .map(|job| {
                    let outcome = run_job(job, provider, store, opts, &cancel);
                    if matches!(outcome, StepOutcome::Failed(_))
                        && opts.failure_policy == FailurePolicy::FailFast
                    {
                        log::warn!("{} failed, cancelling remaining steps", job.step);
                        cancel.cancel();
                    }
                    (job.step.clone(), outcome)
                })
                .collect()
        });

        for (step, outcome) in finished {
            run.record(&step, outcome, progress);
        }
        progress.on_wave_complete(index);
    }

    run.refresh_unchanged(plan, store);
    Ok(run.summary(plan))
}

/// Bookkeeping for one execution, owned by the coordinating thread
struct Run<'a> {
    graph: &'a Graph,
    /// Current record per resource
    records: HashMap<ResourceId, LiveResource>,
    outcomes: HashMap<StepKey, StepOutcome>,
}

impl<'a> Run<'a> {
    fn new(graph: &'a Graph, snapshot: &Snapshot) -> Self {
        Self {
            graph,
            records: snapshot
                .iter()
                .map(|r| (r.id.clone(), r.clone()))
                .collect(),
            outcomes: HashMap::new(),
        }
    }

    /// Check predecessors and resolve inputs, or settle the step early
    fn prepare(&self, step: &Step, cancel: &CancelToken) -> std::result::Result<Job, StepOutcome> {
        if cancel.is_cancelled() {
            return Err(StepOutcome::Skipped("cancelled".into()));
        }

        for key in &step.after {
            match self.outcomes.get(key) {
                Some(StepOutcome::Applied(_)) => {}
                Some(StepOutcome::Failed(_)) => {
                    return Err(StepOutcome::Skipped(format!(
                        "dependency {} failed",
                        key.resource_id
                    )));
                }
                Some(StepOutcome::Skipped(_)) | None => {
                    return Err(StepOutcome::Skipped(format!(
                        "dependency {} was skipped",
                        key.resource_id
                    )));
                }
            }
        }

        let id = &step.resource_id;
        match step.operation {
            Operation::Create | Operation::Update => {
                let resource = self
                    .graph
                    .get(id)
                    .ok_or_else(|| StepOutcome::Failed(format!("{id} is not declared")))?;
                let properties = resolve_properties(resource, &self.records)
                    .map_err(|e| StepOutcome::Failed(e.to_string()))?;
                let current = self.records.get(id);
                let (provider_id, deposed) = match (step.operation, current) {
                    (Operation::Update, Some(record)) => {
                        (Some(record.provider_id.clone()), record.deposed.clone())
                    }
                    (Operation::Update, None) => {
                        return Err(StepOutcome::Failed(format!("{id} is not in state")));
                    }
                    // The old instance stays on record until it is retired
                    (_, Some(old)) => {
                        let mut deposed = old.deposed.clone();
                        deposed.push(old.provider_id.clone());
                        (None, deposed)
                    }
                    (_, None) => (None, Vec::new()),
                };
                Ok(Job {
                    step: step.clone(),
                    provider_id,
                    properties,
                    depends_on: self.graph.dependencies(id).clone(),
                    deposed,
                    record: None,
                })
            }
            Operation::Delete | Operation::Retire => {
                let record = self
                    .records
                    .get(id)
                    .ok_or_else(|| StepOutcome::Failed(format!("{id} is not in state")))?;
                Ok(Job {
                    step: step.clone(),
                    provider_id: None,
                    properties: Attributes::new(),
                    depends_on: BTreeSet::new(),
                    deposed: record.deposed.clone(),
                    record: Some(record.clone()),
                })
            }
        }
    }

    fn record<P: ProgressCallback>(&mut self, step: &Step, outcome: StepOutcome, progress: &mut P) {
        let id = &step.resource_id;
        match &outcome {
            StepOutcome::Applied(Some(live)) => {
                self.records.insert(id.clone(), live.clone());
            }
            StepOutcome::Applied(None) => {
                self.records.remove(id);
            }
            StepOutcome::Failed(error) => log::warn!("{step} failed: {error}"),
            StepOutcome::Skipped(reason) => log::info!("{step} skipped: {reason}"),
        }

        progress.on_step_complete(step, &outcome.result(step.action));
        self.outcomes.insert(step.key(), outcome);
    }

    /// Persist changed dependency sets of resources that needed no apply
    fn refresh_unchanged(&mut self, plan: &Plan, store: &dyn StateStore) {
        let planned: BTreeSet<&ResourceId> = plan.steps().map(|s| &s.resource_id).collect();
        for resource in self.graph.resources() {
            if planned.contains(&resource.id) {
                continue;
            }
            let deps = self.graph.dependencies(&resource.id);
            if let Some(record) = self.records.get_mut(&resource.id)
                && &record.depends_on != deps
            {
                record.depends_on = deps.clone();
                if let Err(e) = store.save(record) {
                    log::warn!("Failed to record dependencies of {}: {}", resource.id, e);
                }
            }
        }
    }

    /// Fold step outcomes into one result per resource
    ///
    /// A failed step wins over a skipped one; a resource is only reported
    /// with its action when every one of its steps was applied.
    fn summary(&self, plan: &Plan) -> ExecuteSummary {
        let mut per_resource: BTreeMap<&ResourceId, (Action, Vec<&StepOutcome>)> = BTreeMap::new();
        for step in plan.steps() {
            let entry = per_resource
                .entry(&step.resource_id)
                .or_insert((step.action, Vec::new()));
            if let Some(outcome) = self.outcomes.get(&step.key()) {
                entry.1.push(outcome);
            }
        }

        let mut summary = ExecuteSummary::default();
        for (id, (action, outcomes)) in per_resource {
            let failed = outcomes.iter().find_map(|o| match o {
                StepOutcome::Failed(e) => Some(e),
                _ => None,
            });
            let skipped = outcomes.iter().find_map(|o| match o {
                StepOutcome::Skipped(r) => Some(r),
                _ => None,
            });
            let result = match (failed, skipped) {
                (Some(error), _) => ApplyResult::Failed {
                    error: error.clone(),
                },
                (None, Some(reason)) => ApplyResult::Skipped {
                    reason: reason.clone(),
                },
                (None, None) if !outcomes.is_empty() => ApplyResult::for_action(action),
                (None, None) => ApplyResult::Skipped {
                    reason: "not executed".into(),
                },
            };
            summary.add_result(id.clone(), result);
        }

        for resource in self.graph.resources() {
            if !summary.results.contains_key(&resource.id) {
                summary.add_result(resource.id.clone(), ApplyResult::NoChange);
            }
        }
        summary
    }
}

/// Resolve every property against the outputs of applied resources
fn resolve_properties(
    resource: &Resource,
    records: &HashMap<ResourceId, LiveResource>,
) -> std::result::Result<Attributes, ResolveError> {
    let outputs = |id: &ResourceId| records.get(id).map(|r| &r.outputs);
    resource
        .properties
        .iter()
        .map(|(name, value)| Ok((name.clone(), value.resolve(&outputs)?)))
        .collect()
}

/// Run one step on a worker: provider calls with retry, then persist
fn run_job(
    job: &Job,
    provider: &dyn Provider,
    store: &dyn StateStore,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
) -> StepOutcome {
    if cancel.is_cancelled() {
        return StepOutcome::Skipped("cancelled".into());
    }

    let step = &job.step;
    log::debug!("Starting {step}");
    let outcome = match step.operation {
        Operation::Create | Operation::Update => put(job, provider, store, opts, cancel),
        Operation::Delete | Operation::Retire => remove(job, provider, store, opts, cancel),
    };
    if let StepOutcome::Applied(_) = outcome {
        log::debug!("Finished {step}");
    }
    outcome
}

/// Create or update, then save the new record
fn put(
    job: &Job,
    provider: &dyn Provider,
    store: &dyn StateStore,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
) -> StepOutcome {
    let id = &job.step.resource_id;
    let kind = id.kind.as_str();
    let provider_id = job.provider_id.as_deref().unwrap_or_default();

    let result = with_retry(&opts.retry, cancel, |attempt| {
        let ctx = ApplyContext {
            resource: id,
            verbose: opts.verbose,
            attempt,
            cancel,
        };
        if job.step.operation == Operation::Update {
            provider
                .update(&ctx, kind, provider_id, &job.properties)
                .map(|outputs| (provider_id.to_string(), outputs))
        } else {
            provider
                .create(&ctx, kind, &job.properties)
                .map(|created| (created.provider_id, created.outputs))
        }
    });

    let (provider_id, outputs) = match result {
        Ok(applied) => applied,
        Err(e) => return provider_failure(e),
    };
    let live = LiveResource {
        id: id.clone(),
        provider_id,
        properties: job.properties.clone(),
        outputs,
        depends_on: job.depends_on.clone(),
        applied_at: Utc::now(),
        deposed: job.deposed.clone(),
    };
    match store.save(&live) {
        Ok(()) => StepOutcome::Applied(Some(live)),
        Err(e) => StepOutcome::Failed(format!("applied but state not saved: {e}")),
    }
}

/// Delete superseded instances, then the current one unless retiring
///
/// Whatever could not be deleted stays on record for the next run.
fn remove(
    job: &Job,
    provider: &dyn Provider,
    store: &dyn StateStore,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
) -> StepOutcome {
    let id = &job.step.resource_id;
    let Some(record) = &job.record else {
        return StepOutcome::Failed(format!("{id} is not in state"));
    };

    let mut remaining = Vec::new();
    let mut failure = None;
    for old in &job.deposed {
        if failure.is_some() {
            remaining.push(old.clone());
            continue;
        }
        if let Err(e) = delete_instance(job, old, provider, opts, cancel) {
            remaining.push(old.clone());
            failure = Some(e);
        }
    }
    let kept = LiveResource {
        deposed: remaining,
        ..record.clone()
    };

    let failure = match failure {
        None if job.step.operation == Operation::Retire => {
            return match store.save(&kept) {
                Ok(()) => StepOutcome::Applied(Some(kept)),
                Err(e) => StepOutcome::Failed(format!("deleted but state not saved: {e}")),
            };
        }
        None => match delete_instance(job, &record.provider_id, provider, opts, cancel) {
            Ok(()) => {
                return match store.remove(id) {
                    Ok(()) => StepOutcome::Applied(None),
                    Err(e) => StepOutcome::Failed(format!("deleted but state not saved: {e}")),
                };
            }
            Err(e) => e,
        },
        Some(e) => e,
    };

    if kept.deposed != record.deposed
        && let Err(e) = store.save(&kept)
    {
        log::warn!("Failed to record partial cleanup of {id}: {e}");
    }
    provider_failure(failure)
}

/// Delete one instance; an instance that is already gone counts as deleted
fn delete_instance(
    job: &Job,
    provider_id: &str,
    provider: &dyn Provider,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
) -> std::result::Result<(), ProviderError> {
    let id = &job.step.resource_id;
    with_retry(&opts.retry, cancel, |attempt| {
        let ctx = ApplyContext {
            resource: id,
            verbose: opts.verbose,
            attempt,
            cancel,
        };
        match provider.delete(&ctx, &id.kind, provider_id) {
            Err(e) if e.category == ErrorCategory::NotFound => {
                log::info!("{id} ({provider_id}) is already gone");
                Ok(())
            }
            other => other,
        }
    })
}

fn provider_failure(error: ProviderError) -> StepOutcome {
    if error.category == ErrorCategory::Cancelled {
        StepOutcome::Skipped("cancelled".into())
    } else {
        StepOutcome::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::diff::compute_changes;
    use crate::policy::{KindPolicy, PolicyTable};
    use crate::retry::RetryConfig;
    use crate::state::MemoryStateStore;
    use crate::testing::MockProvider;
    use crate::types::ReplaceStrategy;
    use crate::value::Value;
    use serde_json::json;
    use std::time::Duration;

    fn id(kind: &str, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            jobs: 4,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
            ..ExecuteOptions::default()
        }
    }

    fn apply_with(
        resources: Vec<Resource>,
        provider: &MockProvider,
        store: &MemoryStateStore,
        policies: &PolicyTable,
        opts: &ExecuteOptions,
    ) -> ExecuteSummary {
        let graph = Graph::build(resources).unwrap();
        let snapshot = store.load().unwrap();
        let changes = compute_changes(&graph, &snapshot, policies);
        let plan = Plan::build(&changes, &graph, &snapshot, policies).unwrap();
        execute(&plan, &graph, &snapshot, provider, store, opts, &mut NoProgress).unwrap()
    }

    fn apply(
        resources: Vec<Resource>,
        provider: &MockProvider,
        store: &MemoryStateStore,
    ) -> ExecuteSummary {
        apply_with(resources, provider, store, &PolicyTable::new(), &options())
    }

    fn network() -> Vec<Resource> {
        vec![
            Resource::new("vpc", "main").with_property("cidr", "10.0.0.0/16"),
            Resource::new("subnet", "a")
                .with_property("vpc_id", Value::reference(id("vpc", "main"), "id"))
                .with_property("cidr", "10.0.1.0/24"),
            Resource::new("subnet", "b")
                .with_property("vpc_id", Value::reference(id("vpc", "main"), "id"))
                .with_property("cidr", "10.0.2.0/24"),
        ]
    }

    #[test]
    fn test_fresh_apply_resolves_outputs() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();

        let summary = apply(network(), &provider, &store);
        assert!(summary.is_success());
        assert_eq!(summary.created, 3);

        let state = store.snapshot();
        let vpc_id = &state.get(&id("vpc", "main")).unwrap().provider_id;
        let subnet = state.get(&id("subnet", "a")).unwrap();
        assert_eq!(subnet.properties["vpc_id"], json!(vpc_id));
        assert_eq!(subnet.depends_on, BTreeSet::from([id("vpc", "main")]));
        assert_eq!(provider.calls()[0], "create vpc.main");
    }

    #[test]
    fn test_second_apply_is_a_no_op() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        apply(network(), &provider, &store);
        let calls = provider.calls().len();

        let summary = apply(network(), &provider, &store);
        assert_eq!(summary.total_changes(), 0);
        assert_eq!(summary.no_change, 3);
        assert_eq!(provider.calls().len(), calls);
    }

    #[test]
    fn test_partial_failure_keeps_successes() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        provider.fail(id("node", "b"));

        let resources = vec![
            Resource::new("node", "a"),
            Resource::new("node", "b").with_dependency(id("node", "a")),
            Resource::new("node", "c"),
            Resource::new("node", "d")
                .with_property("parent", Value::reference(id("node", "b"), "id")),
        ];
        let summary = apply(resources, &provider, &store);

        assert_eq!(summary.result(&id("node", "a")), Some(&ApplyResult::Created));
        assert_eq!(summary.result(&id("node", "c")), Some(&ApplyResult::Created));
        assert!(matches!(
            summary.result(&id("node", "b")),
            Some(ApplyResult::Failed { .. })
        ));
        assert!(matches!(
            summary.result(&id("node", "d")),
            Some(ApplyResult::Skipped { .. })
        ));
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);

        let state = store.snapshot();
        assert_eq!(state.len(), 2);
        assert!(state.contains(&id("node", "a")));
        assert!(state.contains(&id("node", "c")));
        assert!(!provider.calls().contains(&"create node.d".to_string()));

        // b only ran once a was in place
        let calls = provider.calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        assert!(position("create node.a") < position("create node.b"));
    }

    #[test]
    fn test_jobs_bound_concurrency() {
        let provider = MockProvider::with_latency(Duration::from_millis(20));
        let store = MemoryStateStore::new();
        let resources = (0..12)
            .map(|i| Resource::new("node", format!("n{i}")))
            .collect();
        let opts = ExecuteOptions {
            jobs: 3,
            ..options()
        };

        let summary = apply_with(resources, &provider, &store, &PolicyTable::new(), &opts);
        assert_eq!(summary.created, 12);
        assert!(provider.peak_concurrency() <= 3);
        assert!(provider.peak_concurrency() >= 1);
    }

    #[test]
    fn test_fail_fast_cancels_in_flight_work() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        provider.block_until_cancelled(id("node", "slow"));
        provider.fail(id("node", "bad"));

        let resources = vec![
            Resource::new("node", "slow"),
            Resource::new("node", "bad"),
            Resource::new("node", "later").with_dependency(id("node", "slow")),
        ];
        let opts = ExecuteOptions {
            jobs: 2,
            failure_policy: FailurePolicy::FailFast,
            retry: RetryConfig::none(),
            ..options()
        };
        let summary = apply_with(resources, &provider, &store, &PolicyTable::new(), &opts);

        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.result(&id("node", "slow")),
            Some(&ApplyResult::Skipped {
                reason: "cancelled".into()
            })
        );
        assert!(matches!(
            summary.result(&id("node", "later")),
            Some(ApplyResult::Skipped { .. })
        ));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        provider.fail_transiently(id("node", "a"), 2);

        let summary = apply(vec![Resource::new("node", "a")], &provider, &store);
        assert_eq!(summary.created, 1);
        assert_eq!(provider.calls(), vec!["create node.a"; 3]);
    }

    #[test]
    fn test_removed_resources_are_deleted() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        apply(network(), &provider, &store);

        let summary = apply(network().into_iter().take(2).collect(), &provider, &store);
        assert_eq!(summary.deleted, 1);
        assert!(!store.snapshot().contains(&id("subnet", "b")));
        assert_eq!(provider.object_count(), 2);
    }

    #[test]
    fn test_delete_of_missing_object_succeeds() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        apply(vec![Resource::new("node", "a")], &provider, &store);
        let provider_id = store
            .snapshot()
            .get(&id("node", "a"))
            .unwrap()
            .provider_id
            .clone();
        provider.forget(&provider_id);

        let summary = apply(Vec::new(), &provider, &store);
        assert_eq!(summary.deleted, 1);
        assert!(store.snapshot().is_empty());
    }

    fn immutable_lb(strategy: ReplaceStrategy) -> PolicyTable {
        PolicyTable::new().with_kind(
            "lb",
            KindPolicy::immutable(["scheme"]).with_strategy(strategy),
        )
    }

    fn lb(scheme: &str) -> Vec<Resource> {
        vec![Resource::new("lb", "web").with_property("scheme", scheme)]
    }

    #[test]
    fn test_create_before_delete_replacement() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        let policies = immutable_lb(ReplaceStrategy::CreateBeforeDelete);
        apply_with(lb("internal"), &provider, &store, &policies, &options());
        let old_id = store
            .snapshot()
            .get(&id("lb", "web"))
            .unwrap()
            .provider_id
            .clone();

        let summary = apply_with(lb("internet-facing"), &provider, &store, &policies, &options());
        assert_eq!(summary.replaced, 1);

        let calls = provider.calls();
        assert_eq!(&calls[calls.len() - 2..], ["create lb.web", "delete lb.web"]);

        let record = store.snapshot().get(&id("lb", "web")).cloned().unwrap();
        assert_ne!(record.provider_id, old_id);
        assert_eq!(record.properties["scheme"], json!("internet-facing"));
        assert!(record.deposed.is_empty());
        assert!(!provider.exists(&old_id));
        assert!(provider.exists(&record.provider_id));
    }

    #[test]
    fn test_failed_retire_keeps_old_instance_on_record() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        let policies = immutable_lb(ReplaceStrategy::CreateBeforeDelete);
        apply_with(lb("internal"), &provider, &store, &policies, &options());
        let old_id = store
            .snapshot()
            .get(&id("lb", "web"))
            .unwrap()
            .provider_id
            .clone();

        provider.fail_deletes(id("lb", "web"));
        let summary = apply_with(lb("internet-facing"), &provider, &store, &policies, &options());
        assert!(matches!(
            summary.result(&id("lb", "web")),
            Some(ApplyResult::Failed { .. })
        ));
        let record = store.snapshot().get(&id("lb", "web")).cloned().unwrap();
        assert_ne!(record.provider_id, old_id);
        assert_eq!(record.deposed, vec![old_id.clone()]);
        assert!(provider.exists(&old_id));

        // The next plan still owes the delete of the old instance
        let graph = Graph::build(lb("internet-facing")).unwrap();
        let snapshot = store.load().unwrap();
        let changes = compute_changes(&graph, &snapshot, &policies);
        assert!(changes.has_changes());
        let plan = Plan::build(&changes, &graph, &snapshot, &policies).unwrap();
        let steps: Vec<String> = plan.steps().map(ToString::to_string).collect();
        assert_eq!(steps, ["delete lb.web (replaced)"]);

        provider.recover(&id("lb", "web"));
        let summary = apply_with(lb("internet-facing"), &provider, &store, &policies, &options());
        assert_eq!(summary.replaced, 1);
        let record = store.snapshot().get(&id("lb", "web")).cloned().unwrap();
        assert!(record.deposed.is_empty());
        assert!(!provider.exists(&old_id));
        assert_eq!(provider.object_count(), 1);
    }

    #[test]
    fn test_delete_takes_superseded_instances_along() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        let policies = immutable_lb(ReplaceStrategy::CreateBeforeDelete);
        apply_with(lb("internal"), &provider, &store, &policies, &options());
        provider.fail_deletes(id("lb", "web"));
        apply_with(lb("internet-facing"), &provider, &store, &policies, &options());
        assert_eq!(provider.object_count(), 2);

        provider.recover(&id("lb", "web"));
        let summary = apply_with(Vec::new(), &provider, &store, &policies, &options());
        assert_eq!(summary.deleted, 1);
        assert_eq!(provider.object_count(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_delete_before_create_replacement() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        let policies = immutable_lb(ReplaceStrategy::DeleteBeforeCreate);
        apply_with(lb("internal"), &provider, &store, &policies, &options());

        let summary = apply_with(lb("internet-facing"), &provider, &store, &policies, &options());
        assert_eq!(summary.replaced, 1);

        let calls = provider.calls();
        assert_eq!(&calls[calls.len() - 2..], ["delete lb.web", "create lb.web"]);
        assert_eq!(provider.object_count(), 1);
        assert!(store.snapshot().contains(&id("lb", "web")));
    }

    #[test]
    fn test_update_keeps_provider_id() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        apply(
            vec![Resource::new("node", "a").with_property("size", 1_i64)],
            &provider,
            &store,
        );
        let before = store
            .snapshot()
            .get(&id("node", "a"))
            .unwrap()
            .provider_id
            .clone();

        let summary = apply(
            vec![Resource::new("node", "a").with_property("size", 2_i64)],
            &provider,
            &store,
        );
        assert_eq!(summary.updated, 1);
        let after = store.snapshot().get(&id("node", "a")).cloned().unwrap();
        assert_eq!(after.provider_id, before);
        assert_eq!(after.outputs["size"], json!(2));
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        let opts = ExecuteOptions {
            dry_run: true,
            ..options()
        };

        let summary = apply_with(network(), &provider, &store, &PolicyTable::new(), &opts);
        assert_eq!(summary.skipped, 3);
        assert!(provider.calls().is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_unchanged_resources_record_new_dependencies() {
        let provider = MockProvider::new();
        let store = MemoryStateStore::new();
        apply(
            vec![Resource::new("node", "a"), Resource::new("node", "b")],
            &provider,
            &store,
        );

        let summary = apply(
            vec![
                Resource::new("node", "a"),
                Resource::new("node", "b").with_dependency(id("node", "a")),
            ],
            &provider,
            &store,
        );
        assert_eq!(summary.total_changes(), 0);
        let record = store.snapshot().get(&id("node", "b")).cloned().unwrap();
        assert_eq!(record.depends_on, BTreeSet::from([id("node", "a")]));
    }
}
