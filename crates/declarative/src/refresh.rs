//! Drift detection: reconcile recorded state with what the provider reports

use crate::context::{ApplyContext, CancelToken};
use crate::error::ProviderError;
use crate::graph::Graph;
use crate::provider::Provider;
use crate::state::{LiveResource, Snapshot};
use crate::types::ResourceId;
use rayon::prelude::*;

/// What a refresh found
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RefreshReport {
    /// Declared resources the provider no longer knows about
    pub missing: Vec<ResourceId>,
    /// Undeclared resources the provider no longer knows about; their
    /// records stay so the plan deletes them
    pub orphaned: Vec<ResourceId>,
    /// Resources whose outputs changed out of band
    pub drifted: Vec<ResourceId>,
    /// Resources that could not be read; their records are kept as is
    pub errors: Vec<(ResourceId, ProviderError)>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
            && self.orphaned.is_empty()
            && self.drifted.is_empty()
            && self.errors.is_empty()
    }
}

enum Observed {
    Same,
    Gone,
    Drifted(LiveResource),
    Unreadable(ProviderError),
}

/// Read every recorded resource back from the provider
///
/// Returns the snapshot to diff against: missing resources still in
/// `graph` are dropped so the next plan re-creates them, drifted outputs
/// replace the recorded ones. Missing resources no longer in `graph` keep
/// their record, so the plan deletes it (the provider's not-found counts as
/// deleted). Recorded properties are left alone.
pub fn refresh(
    snapshot: &Snapshot,
    provider: &dyn Provider,
    graph: &Graph,
) -> (Snapshot, RefreshReport) {
    let cancel = CancelToken::new();
    let observed: Vec<(&LiveResource, Observed)> = snapshot
        .resources
        .par_iter()
        .map(|(id, live)| {
            let ctx = ApplyContext::new(id, &cancel);
            let observed = match provider.read(&ctx, &id.kind, &live.provider_id) {
                Ok(None) => Observed::Gone,
                Ok(Some(outputs)) if outputs == live.outputs => Observed::Same,
                Ok(Some(outputs)) => Observed::Drifted(LiveResource {
                    outputs,
                    ..live.clone()
                }),
                Err(e) => Observed::Unreadable(e),
            };
            (live, observed)
        })
        .collect();

    let mut refreshed = Snapshot::new();
    let mut report = RefreshReport::default();
    for (live, observed) in observed {
        match observed {
            Observed::Same => refreshed.insert(live.clone()),
            Observed::Gone if graph.contains(&live.id) => {
                log::info!("{} ({}) no longer exists", live.id, live.provider_id);
                report.missing.push(live.id.clone());
            }
            Observed::Gone => {
                log::info!("{} ({}) no longer exists and is no longer declared", live.id, live.provider_id);
                report.orphaned.push(live.id.clone());
                refreshed.insert(live.clone());
            }
            Observed::Drifted(updated) => {
                log::info!("{} drifted since last apply", live.id);
                report.drifted.push(live.id.clone());
                refreshed.insert(updated);
            }
            Observed::Unreadable(e) => {
                log::warn!("Could not refresh {}: {}", live.id, e);
                report.errors.push((live.id.clone(), e));
                refreshed.insert(live.clone());
            }
        }
    }
    (refreshed, report)
}
