//! LRP convergence: one pass restoring the desired/actual invariants.
//!
//! Step order is strict (prune malformed desired entries, prune actuals
//! that are malformed or bound to dead executors, detect drift against
//! the pruned survivor set, emit stops for ownerless survivors) so later
//! steps never act on state an earlier step removed.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, warn, Instrument};

use tally_core::{observability, schema, Result};

use crate::coordinator::Coordinator;
use crate::fanout::{self, SweptNode};
use crate::metrics::{
    CONVERGENCE_COMPARE_AND_SWAP_LRP, CONVERGENCE_DELETE_LRP, CONVERGENCE_STOP_LRP, CONVERGE_LRPS,
    LRP_CONVERGENCE_DURATION,
};
use crate::models::{ActualLrp, DesiredLrp, StopLrpInstance};

impl Coordinator {
    /// Runs one LRP convergence pass.
    ///
    /// On completion the `converge-lrps` counter is bumped once and the
    /// wall-clock duration recorded. A transient load failure aborts the
    /// pass without mutation; the next scheduled pass retries.
    pub async fn converge_lrps(&self) -> Result<()> {
        let span = observability::convergence_span("lrps");
        async {
            let started = Instant::now();
            self.converge_lrps_pass().await?;
            self.sink.increment_counter(CONVERGE_LRPS, 1);
            self.sink
                .record_duration(LRP_CONVERGENCE_DURATION, started.elapsed());
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn converge_lrps_pass(&self) -> Result<()> {
        let width = self.config.fanout_width;
        let desired: Vec<SweptNode<DesiredLrp>> =
            fanout::sweep(self.store.as_ref(), schema::DESIRED_ROOT, width).await?;
        let actuals: Vec<SweptNode<ActualLrp>> =
            fanout::sweep(self.store.as_ref(), schema::ACTUAL_ROOT, width).await?;
        let live_executors: HashSet<String> = self
            .store
            .list_recursively(schema::EXECUTOR_ROOT)
            .await?
            .iter()
            .map(|node| schema::leaf(&node.key).to_string())
            .collect();

        let retained_desired = self.prune_malformed_desired(desired).await;
        let survivors = self.prune_actuals(actuals, &live_executors).await;

        // Kick desired entries whose actual set drifted. The CAS uses the
        // version observed at load; a conflict means someone else already
        // touched the entry and no kick is needed.
        for entry in &retained_desired {
            let healthy = survivors
                .get(&entry.lrp.process_guid)
                .map_or(&[][..], Vec::as_slice);
            if !needs_kick(&entry.lrp, healthy) {
                continue;
            }
            match super::kick(self.store.as_ref(), &entry.key, entry.version, entry.value.clone())
                .await
            {
                Ok(true) => self
                    .sink
                    .increment_counter(CONVERGENCE_COMPARE_AND_SWAP_LRP, 1),
                Ok(false) => {
                    debug!(key = %entry.key, "skipping kick; desired entry changed during convergence");
                }
                Err(error) => warn!(key = %entry.key, error = %error, "failed to kick desired entry"),
            }
        }

        // Surviving actuals with no owning desired get stop directives.
        let desired_guids: HashSet<&str> = retained_desired
            .iter()
            .map(|entry| entry.lrp.process_guid.as_str())
            .collect();
        for (process_guid, instances) in &survivors {
            if desired_guids.contains(process_guid.as_str()) {
                continue;
            }
            for actual in instances {
                self.publish_stop(StopLrpInstance {
                    process_guid: actual.process_guid.clone(),
                    instance_guid: actual.instance_guid.clone(),
                    index: actual.index,
                });
                self.sink.increment_counter(CONVERGENCE_STOP_LRP, 1);
            }
        }

        Ok(())
    }

    /// Deletes desired entries that fail to decode, keeping the rest with
    /// their load-time version and raw value for identity kicks.
    async fn prune_malformed_desired(
        &self,
        desired: Vec<SweptNode<DesiredLrp>>,
    ) -> Vec<RetainedDesired> {
        let mut retained = Vec::with_capacity(desired.len());
        for node in desired {
            match node.record {
                Ok(lrp) => retained.push(RetainedDesired {
                    key: node.key,
                    version: node.version,
                    value: node.value,
                    lrp,
                }),
                Err(error) => {
                    warn!(key = %node.key, error = %error, "deleting malformed desired entry");
                    match self.store.delete(&node.key).await {
                        Ok(()) => self.sink.increment_counter(CONVERGENCE_DELETE_LRP, 1),
                        Err(delete_error) => {
                            warn!(key = %node.key, error = %delete_error, "failed to delete malformed desired entry");
                        }
                    }
                }
            }
        }
        retained
    }

    /// Deletes actuals that are malformed or bound to a dead executor,
    /// removing directories that empty out. Returns survivors grouped by
    /// process guid.
    async fn prune_actuals(
        &self,
        actuals: Vec<SweptNode<ActualLrp>>,
        live_executors: &HashSet<String>,
    ) -> HashMap<String, Vec<ActualLrp>> {
        let mut grouped: HashMap<String, Vec<SweptNode<ActualLrp>>> = HashMap::new();
        for node in actuals {
            grouped
                .entry(actual_process_guid(&node.key).to_string())
                .or_default()
                .push(node);
        }

        let mut survivors: HashMap<String, Vec<ActualLrp>> = HashMap::new();
        for (process_guid, nodes) in grouped {
            let mut kept = Vec::new();
            for node in nodes {
                match node.record {
                    Ok(actual) if live_executors.contains(&actual.executor_id) => {
                        kept.push(actual);
                    }
                    Ok(actual) => {
                        debug!(key = %node.key, executor_id = %actual.executor_id, "deleting actual bound to dead executor");
                        if let Err(error) = self.store.delete(&node.key).await {
                            warn!(key = %node.key, error = %error, "failed to delete orphaned actual entry");
                        }
                    }
                    Err(error) => {
                        warn!(key = %node.key, error = %error, "deleting malformed actual entry");
                        if let Err(delete_error) = self.store.delete(&node.key).await {
                            warn!(key = %node.key, error = %delete_error, "failed to delete malformed actual entry");
                        }
                    }
                }
            }
            if kept.is_empty() {
                // The process no longer runs anywhere; drop its directory.
                if let Ok(dir) = schema::actual_lrp_dir(&process_guid) {
                    if let Err(error) = self.store.delete(&dir).await {
                        warn!(dir = %dir, error = %error, "failed to remove emptied actual directory");
                    }
                }
            } else {
                survivors.insert(process_guid, kept);
            }
        }
        survivors
    }
}

struct RetainedDesired {
    key: String,
    version: u64,
    value: bytes::Bytes,
    lrp: DesiredLrp,
}

/// A desired LRP needs a kick when its healthy actuals do not cover the
/// index range `[0, instances)` exactly once each.
fn needs_kick(lrp: &DesiredLrp, healthy: &[ActualLrp]) -> bool {
    if healthy.len() != lrp.instances as usize {
        return true;
    }
    let mut indices: Vec<u32> = healthy.iter().map(|actual| actual.index).collect();
    indices.sort_unstable();
    indices
        .iter()
        .enumerate()
        .any(|(expected, &index)| index as usize != expected)
}

/// Extracts the process guid from an actual key
/// (`/v1/actual/<process_guid>/<instance_guid>`).
fn actual_process_guid(key: &str) -> &str {
    key.strip_prefix(schema::ACTUAL_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(key)
}
