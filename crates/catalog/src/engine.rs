//! Convergence engine - applies a compiled catalog against live state
//!
//! Walks the catalog in dependency order. Resources with no path between
//! them run concurrently on a bounded rayon pool; a resource never starts
//! before every dependency converged. Failures are recorded, never thrown:
//! dependents of a failed resource are skipped and independent subgraphs
//! continue.

use crate::compile::Catalog;
use crate::provider::{LiveState, Provider, ProviderRegistry, run_with_timeout};
use crate::report::{
    AttrChange, AttrDiff, ConvergenceError, Outcome, ResourceReport, RunReport,
};
use crate::resource::{Desired, ResourceRef, Scalar};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Skip reason recorded for divergent resources in a dry run
pub const DRY_RUN_REASON: &str = "dry run";

/// Knobs for one apply
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Parallelism bound for resources with disjoint dependency sets
    pub jobs: usize,
    /// Deadline for each live-state query and each state change
    pub op_timeout: Duration,
    /// Observe and diff, but perform no changes
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            op_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

/// Apply a compiled catalog, returning the per-resource run report
///
/// Idempotent: applying the same catalog twice with no external
/// interference yields all-`Unchanged` on the second run. Report entries
/// are in the catalog's topological order.
pub fn apply(catalog: &Catalog, providers: &ProviderRegistry, opts: &ApplyOptions) -> RunReport {
    let node_count = catalog.len();
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for &(dependency, dependent) in catalog.edges() {
        dependencies[dependent].push(dependency);
    }

    // Group nodes into waves by dependency depth; disjoint resources in a
    // wave are safe to run concurrently
    let mut depth = vec![0usize; node_count];
    let mut waves: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &index in catalog.order() {
        for &dependency in &dependencies[index] {
            depth[index] = depth[index].max(depth[dependency] + 1);
        }
        waves.entry(depth[index]).or_default().push(index);
    }

    let mut outcomes: Vec<Option<(Outcome, AttrDiff)>> = (0..node_count).map(|_| None).collect();

    for wave in waves.values() {
        let mut runnable: Vec<(usize, ResourceRef, Desired, Arc<dyn Provider>)> = Vec::new();

        for &index in wave {
            let node = catalog.node(index);

            // A dependent never starts before its dependency converged. In a
            // dry run, pending changes are reported as skipped but do not
            // block their dependents from being inspected.
            let blocked = dependencies[index].iter().find(|&&dep| {
                let Some((outcome, _)) = &outcomes[dep] else {
                    return true;
                };
                if outcome.is_success() {
                    return false;
                }
                !(opts.dry_run && matches!(outcome, Outcome::Skipped { .. }))
            });
            if let Some(&dep) = blocked {
                let reason = format!(
                    "dependency {} did not converge",
                    catalog.node(dep).reference
                );
                outcomes[index] = Some((Outcome::Skipped { reason }, AttrDiff::new()));
                continue;
            }

            match providers.get(&node.reference.rtype) {
                Some(provider) => runnable.push((
                    index,
                    node.reference.clone(),
                    node.desired.clone(),
                    provider,
                )),
                None => {
                    let error = ConvergenceError::StateQueryFailed {
                        reason: format!(
                            "no provider registered for resource type `{}`",
                            node.reference.rtype
                        ),
                    };
                    outcomes[index] = Some((Outcome::Failed(error), AttrDiff::new()));
                }
            }
        }

        for (index, outcome, diff) in run_wave(runnable, opts) {
            outcomes[index] = Some((outcome, diff));
        }
    }

    let mut report = RunReport::new();
    for &index in catalog.order() {
        let (outcome, diff) = outcomes[index]
            .take()
            .unwrap_or((Outcome::Skipped { reason: "not scheduled".into() }, AttrDiff::new()));
        report.push(ResourceReport {
            resource: catalog.node(index).reference.clone(),
            outcome,
            diff,
        });
    }
    report
}

type Runnable = (usize, ResourceRef, Desired, Arc<dyn Provider>);

fn run_wave(runnable: Vec<Runnable>, opts: &ApplyOptions) -> Vec<(usize, Outcome, AttrDiff)> {
    if opts.jobs <= 1 || runnable.len() <= 1 {
        return runnable
            .into_iter()
            .map(|(index, reference, desired, provider)| {
                let (outcome, diff) = converge(&reference, &desired, &provider, opts);
                (index, outcome, diff)
            })
            .collect();
    }

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs)
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            // Degrade to sequential rather than aborting the run
            log::warn!("failed to build worker pool ({e}), applying sequentially");
            let sequential = ApplyOptions { jobs: 1, ..opts.clone() };
            return run_wave(runnable, &sequential);
        }
    };

    pool.install(|| {
        runnable
            .into_par_iter()
            .map(|(index, reference, desired, provider)| {
                let (outcome, diff) = converge(&reference, &desired, &provider, opts);
                (index, outcome, diff)
            })
            .collect()
    })
}

/// Converge one resource: read, diff, change, confirm
fn converge(
    reference: &ResourceRef,
    desired: &Desired,
    provider: &Arc<dyn Provider>,
    opts: &ApplyOptions,
) -> (Outcome, AttrDiff) {
    let live = match read_live(provider, &reference.title, opts.op_timeout) {
        Ok(live) => live,
        Err(error) => return (Outcome::Failed(error), AttrDiff::new()),
    };

    let desired_attrs = desired.attributes();
    let diff = diff_attrs(&desired_attrs, &live);
    if diff.is_empty() {
        log::debug!("{reference}: already converged");
        return (Outcome::Unchanged, diff);
    }

    if opts.dry_run {
        log::info!("{reference}: would change ({})", diff.summary());
        return (
            Outcome::Skipped { reason: DRY_RUN_REASON.to_string() },
            diff,
        );
    }

    log::info!("{reference}: applying ({})", diff.summary());
    {
        let provider = Arc::clone(provider);
        let title = reference.title.clone();
        let desired = desired.clone();
        let pending = diff.clone();
        match run_with_timeout(opts.op_timeout, move || {
            provider.change(&title, &desired, &pending)
        }) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let error = ConvergenceError::StateChangeFailed { reason: format!("{e:#}") };
                return (Outcome::Failed(error), diff);
            }
            Err(_) => {
                return (
                    Outcome::Failed(timeout_error("state change", opts.op_timeout)),
                    diff,
                );
            }
        }
    }

    // Re-query to confirm convergence before reporting a change
    let confirmed = match read_live(provider, &reference.title, opts.op_timeout) {
        Ok(live) => live,
        Err(error) => return (Outcome::Failed(error), diff),
    };
    let residual = diff_attrs(&desired_attrs, &confirmed);
    if residual.is_empty() {
        (Outcome::Changed, diff)
    } else {
        let error = ConvergenceError::PostApplyMismatch { summary: residual.summary() };
        (Outcome::Failed(error), diff)
    }
}

fn read_live(
    provider: &Arc<dyn Provider>,
    title: &str,
    timeout: Duration,
) -> Result<LiveState, ConvergenceError> {
    let provider = Arc::clone(provider);
    let title = title.to_string();
    match run_with_timeout(timeout, move || provider.read(&title)) {
        Ok(Ok(live)) => Ok(live),
        Ok(Err(e)) => Err(ConvergenceError::StateQueryFailed { reason: format!("{e:#}") }),
        Err(_) => Err(timeout_error("state query", timeout)),
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> ConvergenceError {
    ConvergenceError::Timeout {
        operation: operation.to_string(),
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Per-attribute delta of desired against live state
fn diff_attrs(desired: &BTreeMap<String, Scalar>, live: &LiveState) -> AttrDiff {
    let mut diff = AttrDiff::new();
    for (attribute, after) in desired {
        let before = live.get(attribute);
        if before != Some(after) {
            diff.push(AttrChange {
                attribute: attribute.clone(),
                before: before.cloned(),
                after: after.clone(),
            });
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::facts::FactStore;
    use crate::memory::MemoryProvider;
    use crate::resource::{DeclarationSet, ResourceDeclaration};
    use crate::verify;
    use std::collections::BTreeMap;

    fn service(title: &str) -> ResourceDeclaration {
        ResourceDeclaration::service(title)
            .attr("ensure", "running")
            .attr("enable", true)
    }

    fn facts() -> FactStore {
        FactStore::new().with("hostname", "storm.example.org")
    }

    fn registry_with(provider: Arc<MemoryProvider>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(provider);
        registry
    }

    fn fast_opts() -> ApplyOptions {
        ApplyOptions {
            op_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_backend_service_converges() {
        let set = DeclarationSet::new().with(service("backend-server"));
        let facts = facts();
        assert!(verify::compiles_with_all_deps(&set, &facts));

        let catalog = compile(&set, &facts).unwrap();
        let memory = Arc::new(MemoryProvider::new().with_service("backend-server", false, false));
        let registry = registry_with(Arc::clone(&memory));

        let report = apply(&catalog, &registry, &fast_opts());
        assert!(report.is_success());
        assert_eq!(
            report.outcome_of(&ResourceRef::service("backend-server")),
            Some(&Outcome::Changed)
        );

        let expected: BTreeMap<String, Scalar> = BTreeMap::from([
            ("ensure".to_string(), Scalar::Str("running".into())),
            ("enable".to_string(), Scalar::Bool(true)),
        ]);
        assert!(verify::live_contains(
            &registry,
            "service",
            "backend-server",
            &expected
        ));
    }

    #[test]
    fn test_second_apply_is_all_unchanged() {
        let set = DeclarationSet::new()
            .with(service("a"))
            .with(service("b").require(ResourceRef::service("a")));
        let catalog = compile(&set, &facts()).unwrap();
        let registry = registry_with(Arc::new(MemoryProvider::new()));

        let first = apply(&catalog, &registry, &fast_opts());
        assert!(first.is_success());
        assert_eq!(first.summary().changed, 2);

        let second = apply(&catalog, &registry, &fast_opts());
        assert!(second.is_success());
        assert_eq!(second.summary().unchanged, 2);
        assert_eq!(second.summary().changed, 0);
    }

    #[test]
    fn test_failed_dependency_skips_dependents_but_not_siblings() {
        let set = DeclarationSet::new()
            .with(service("dep"))
            .with(service("child").require(ResourceRef::service("dep")))
            .with(service("independent"));
        let catalog = compile(&set, &facts()).unwrap();

        let memory = Arc::new(MemoryProvider::new());
        memory.deny_change("dep");
        let registry = registry_with(Arc::clone(&memory));

        let report = apply(&catalog, &registry, &fast_opts());
        assert!(!report.is_success());

        assert!(matches!(
            report.outcome_of(&ResourceRef::service("dep")),
            Some(Outcome::Failed(ConvergenceError::StateChangeFailed { .. }))
        ));
        assert!(matches!(
            report.outcome_of(&ResourceRef::service("child")),
            Some(Outcome::Skipped { reason }) if reason.contains("service[dep]")
        ));
        assert_eq!(
            report.outcome_of(&ResourceRef::service("independent")),
            Some(&Outcome::Changed)
        );

        // The dependency's outcome is recorded before the dependent's
        let entries: Vec<_> = report
            .resources()
            .iter()
            .map(|r| r.resource.title.as_str())
            .collect();
        let dep_at = entries.iter().position(|&t| t == "dep").unwrap();
        let child_at = entries.iter().position(|&t| t == "child").unwrap();
        assert!(dep_at < child_at);

        // The skipped child was never materialized
        assert!(memory.record("child").is_none());
    }

    #[test]
    fn test_timeout_is_contained_to_one_resource() {
        // `fast` is already converged, so its convergence never issues a
        // change and never hits the injected delay
        let memory = Arc::new(MemoryProvider::new().with_service("fast", true, true));
        memory.set_change_delay(Duration::from_millis(500));

        let set = DeclarationSet::new()
            .with(service("slow"))
            .with(service("fast"));
        let catalog = compile(&set, &facts()).unwrap();

        let opts = ApplyOptions {
            op_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let report = apply(&catalog, &registry_with(Arc::clone(&memory)), &opts);

        assert!(matches!(
            report.outcome_of(&ResourceRef::service("slow")),
            Some(Outcome::Failed(ConvergenceError::Timeout { .. }))
        ));
        assert_eq!(
            report.outcome_of(&ResourceRef::service("fast")),
            Some(&Outcome::Unchanged)
        );
    }

    #[test]
    fn test_dry_run_reports_pending_diff_without_mutating() {
        let set = DeclarationSet::new().with(service("svc"));
        let catalog = compile(&set, &facts()).unwrap();
        let memory = Arc::new(MemoryProvider::new().with_service("svc", false, false));
        let registry = registry_with(Arc::clone(&memory));

        let opts = ApplyOptions { dry_run: true, ..fast_opts() };
        let report = apply(&catalog, &registry, &opts);

        let entry = &report.resources()[0];
        assert_eq!(
            entry.outcome,
            Outcome::Skipped { reason: DRY_RUN_REASON.to_string() }
        );
        assert_eq!(entry.diff.len(), 2);
        assert_eq!(
            memory.record("svc"),
            Some(crate::memory::ServiceRecord { running: false, enabled: false })
        );
    }

    #[test]
    fn test_dry_run_does_not_cascade_skips() {
        let set = DeclarationSet::new()
            .with(service("dep"))
            .with(service("child").require(ResourceRef::service("dep")));
        let catalog = compile(&set, &facts()).unwrap();
        let registry = registry_with(Arc::new(MemoryProvider::new()));

        let opts = ApplyOptions { dry_run: true, ..fast_opts() };
        let report = apply(&catalog, &registry, &opts);

        // Both divergent resources report their own pending diff
        for entry in report.resources() {
            assert_eq!(
                entry.outcome,
                Outcome::Skipped { reason: DRY_RUN_REASON.to_string() }
            );
            assert!(!entry.diff.is_empty());
        }
    }

    #[test]
    fn test_parallel_wave_converges_disjoint_resources() {
        let mut set = DeclarationSet::new();
        for i in 0..8 {
            set.push(service(&format!("svc-{i}")));
        }
        let catalog = compile(&set, &facts()).unwrap();
        let memory = Arc::new(MemoryProvider::new());
        let registry = registry_with(Arc::clone(&memory));

        let opts = ApplyOptions { jobs: 4, ..fast_opts() };
        let report = apply(&catalog, &registry, &opts);

        assert!(report.is_success());
        assert_eq!(report.summary().changed, 8);
        for i in 0..8 {
            let record = memory.record(&format!("svc-{i}")).unwrap();
            assert!(record.running);
            assert!(record.enabled);
        }
    }

    #[test]
    fn test_missing_provider_fails_that_resource() {
        let set = DeclarationSet::new().with(service("svc"));
        let catalog = compile(&set, &facts()).unwrap();
        let report = apply(&catalog, &ProviderRegistry::new(), &fast_opts());

        assert!(matches!(
            report.outcome_of(&ResourceRef::service("svc")),
            Some(Outcome::Failed(ConvergenceError::StateQueryFailed { reason }))
                if reason.contains("no provider")
        ));
    }
}
