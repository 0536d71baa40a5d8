//! LRP convergence behavior over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tally_core::{schema, Error, MemoryStore, Store};
use tally_coordinator::{
    metrics, CapturingSink, Coordinator, CoordinatorConfig, DesiredLrp, MetricsSink,
    StopLrpInstance,
};

const PROCESS_GUID: &str = "process-guid";
const EXECUTOR_ID: &str = "the-executor-id";

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<CapturingSink>,
    coordinator: Coordinator,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(CapturingSink::new());
    let coordinator = Coordinator::new(
        Arc::clone(&store) as Arc<dyn Store>,
        CoordinatorConfig::default(),
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
    );
    Harness {
        store,
        sink,
        coordinator,
    }
}

impl Harness {
    async fn register_executor(&self, executor_id: &str) {
        self.store
            .set(&schema::executor(executor_id).unwrap(), Bytes::new(), None)
            .await
            .unwrap();
    }

    async fn report_two_actuals(&self) {
        self.coordinator
            .report_actual_lrp_as_starting(PROCESS_GUID, "instance-guid-1", EXECUTOR_ID, 0)
            .await
            .unwrap();
        self.coordinator
            .report_actual_lrp_as_starting(PROCESS_GUID, "instance-guid-2", EXECUTOR_ID, 1)
            .await
            .unwrap();
    }
}

fn desired_lrp(instances: u32) -> DesiredLrp {
    DesiredLrp {
        process_guid: PROCESS_GUID.into(),
        domain: "tests".into(),
        instances,
        stack: "pancake".into(),
        actions: serde_json::json!([
            {"download": {"from": "http://example.com", "to": "/tmp/internet"}}
        ]),
    }
}

/// Lets spawned watcher pumps drain their raw channels.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn bumps_the_convergence_counter() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;

    assert_eq!(h.sink.counter(metrics::CONVERGE_LRPS), 0);
    h.coordinator.converge_lrps().await.unwrap();
    assert_eq!(h.sink.counter(metrics::CONVERGE_LRPS), 1);
    h.coordinator.converge_lrps().await.unwrap();
    assert_eq!(h.sink.counter(metrics::CONVERGE_LRPS), 2);
}

#[tokio::test]
async fn reports_the_duration_that_it_took_to_converge() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;

    h.coordinator.converge_lrps().await.unwrap();

    let durations = h.sink.durations(metrics::LRP_CONVERGENCE_DURATION);
    assert_eq!(durations.len(), 1);
    assert!(durations[0] > Duration::ZERO);
}

#[tokio::test]
async fn does_not_prune_actuals_whose_executor_is_present() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;

    h.coordinator.converge_lrps().await.unwrap();

    assert_eq!(h.coordinator.actual_lrps().await.unwrap().len(), 2);
}

#[tokio::test]
async fn prunes_actuals_of_a_missing_executor_and_their_directory() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;

    h.store
        .delete(&schema::executor(EXECUTOR_ID).unwrap())
        .await
        .unwrap();
    h.coordinator.converge_lrps().await.unwrap();

    assert!(h.coordinator.actual_lrps().await.unwrap().is_empty());
    assert!(h
        .store
        .list_recursively(schema::ACTUAL_ROOT)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deletes_malformed_desired_entries_and_counts_them() {
    let h = harness();
    h.store
        .set_multi(vec![(
            "/v1/desired/bogus-desired".to_string(),
            Bytes::from_static("\u{df}".as_bytes()),
        )])
        .await
        .unwrap();

    assert_eq!(h.sink.counter(metrics::CONVERGENCE_DELETE_LRP), 0);
    h.coordinator.converge_lrps().await.unwrap();

    assert!(matches!(
        h.store.get("/v1/desired/bogus-desired").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_DELETE_LRP), 1);
}

#[tokio::test]
async fn does_not_kick_a_desired_lrp_with_all_its_actuals() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;
    h.coordinator.desire_lrp(&desired_lrp(2)).await.unwrap();

    let (mut changes, _handle) = h
        .coordinator
        .watch_for_desired_lrp_changes()
        .await
        .unwrap();
    h.coordinator.converge_lrps().await.unwrap();
    settle().await;

    assert!(changes.try_recv().is_err());
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_COMPARE_AND_SWAP_LRP), 0);
}

#[tokio::test]
async fn kicks_a_desired_lrp_that_is_missing_actuals() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;
    let desired = desired_lrp(3);
    h.coordinator.desire_lrp(&desired).await.unwrap();

    let (mut changes, _handle) = h
        .coordinator
        .watch_for_desired_lrp_changes()
        .await
        .unwrap();
    h.coordinator.converge_lrps().await.unwrap();

    let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .expect("change within a second")
        .expect("change stream open");
    assert_eq!(change.after, Some(desired));
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_COMPARE_AND_SWAP_LRP), 1);
}

#[tokio::test]
async fn kicks_a_desired_lrp_with_extra_actuals() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;
    let desired = desired_lrp(1);
    h.coordinator.desire_lrp(&desired).await.unwrap();

    let (mut changes, _handle) = h
        .coordinator
        .watch_for_desired_lrp_changes()
        .await
        .unwrap();
    h.coordinator.converge_lrps().await.unwrap();

    let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .expect("change within a second")
        .expect("change stream open");
    assert_eq!(change.after, Some(desired));
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_COMPARE_AND_SWAP_LRP), 1);
}

#[tokio::test]
async fn kicks_a_desired_lrp_with_duplicate_indices() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;
    h.coordinator
        .report_actual_lrp_as_starting(PROCESS_GUID, "instance-guid-duplicate", EXECUTOR_ID, 0)
        .await
        .unwrap();
    h.coordinator.desire_lrp(&desired_lrp(2)).await.unwrap();

    h.coordinator.converge_lrps().await.unwrap();

    assert_eq!(h.sink.counter(metrics::CONVERGENCE_COMPARE_AND_SWAP_LRP), 1);
}

#[tokio::test]
async fn emits_stops_for_actuals_with_no_desired_lrp() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;

    let mut stops = h.coordinator.take_stop_stream().expect("stop stream");
    h.coordinator.converge_lrps().await.unwrap();

    let mut received = Vec::new();
    while let Ok(stop) = stops.try_recv() {
        received.push(stop);
    }
    assert_eq!(received.len(), 2);
    assert!(received.contains(&StopLrpInstance {
        process_guid: PROCESS_GUID.into(),
        instance_guid: "instance-guid-1".into(),
        index: 0,
    }));
    assert!(received.contains(&StopLrpInstance {
        process_guid: PROCESS_GUID.into(),
        instance_guid: "instance-guid-2".into(),
        index: 1,
    }));
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_STOP_LRP), 2);
}

#[tokio::test]
async fn convergence_is_idempotent_across_repeated_passes() {
    let h = harness();
    h.register_executor(EXECUTOR_ID).await;
    h.report_two_actuals().await;
    h.coordinator.desire_lrp(&desired_lrp(2)).await.unwrap();

    h.coordinator.converge_lrps().await.unwrap();
    h.coordinator.converge_lrps().await.unwrap();

    // Nothing drifted, so no kicks, deletions, or stops on either pass.
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_COMPARE_AND_SWAP_LRP), 0);
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_DELETE_LRP), 0);
    assert_eq!(h.sink.counter(metrics::CONVERGENCE_STOP_LRP), 0);
    assert_eq!(h.coordinator.actual_lrps().await.unwrap().len(), 2);
}
