//! Observation store contract, exercised against both backends

use chrono::{DateTime, TimeZone, Utc};
use metrics_collector::observation::{MetricObservation, ObservationLog};
use metrics_collector::store::{
    MemoryObservationStore, ObservationQuery, ObservationStore, SqliteObservationStore, SqliteStoreConfig,
};

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, secs).unwrap()
}

/// Readings deliberately out of time order.
fn shuffled_log() -> ObservationLog {
    ObservationLog::from_observations(vec![
        MetricObservation::at("loss", 0.4, at(30)),
        MetricObservation::at("accuracy", 0.7, at(10)),
        MetricObservation::at("loss", 0.8, at(0)),
        MetricObservation::at("accuracy", 0.9, at(40)),
        MetricObservation::at("loss", 0.6, at(10)),
    ])
}

async fn check_contract<S: ObservationStore>(store: &S) {
    store.init_schema().await.unwrap();
    store.init_schema().await.unwrap();

    // Empty registration and reads of unknown trials are fine.
    store.register_observation_log("trial-a", &ObservationLog::new()).await.unwrap();
    assert!(store
        .get_observation_log("unknown", &ObservationQuery::new())
        .await
        .unwrap()
        .is_empty());

    store.register_observation_log("trial-a", &shuffled_log()).await.unwrap();
    store
        .register_observation_log(
            "trial-b",
            &ObservationLog::from_observations(vec![MetricObservation::at("loss", 0.1, at(5))]),
        )
        .await
        .unwrap();

    // Round trip, ordered by time.
    let all = store.get_observation_log("trial-a", &ObservationQuery::new()).await.unwrap();
    assert_eq!(all.len(), 5);
    let times: Vec<_> = all.iter().filter_map(MetricObservation::timestamp).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(all.observations()[0].value(), 0.8);
    assert_eq!(all.observations()[4].value(), 0.9);

    // Metric filter.
    let loss = store
        .get_observation_log("trial-a", &ObservationQuery::new().metric_name("loss"))
        .await
        .unwrap();
    assert_eq!(loss.len(), 3);
    assert!(loss.iter().all(|o| o.name() == "loss"));

    // Inclusive time bounds, combined with the metric filter.
    let window = store
        .get_observation_log(
            "trial-a",
            &ObservationQuery::new().metric_name("loss").start_time(at(10)).end_time(at(30)),
        )
        .await
        .unwrap();
    let values: Vec<f64> = window.iter().map(MetricObservation::value).collect();
    assert_eq!(values, vec![0.6, 0.4]);

    // Delete is scoped to the trial and idempotent.
    store.delete_observation_log("trial-a").await.unwrap();
    store.delete_observation_log("trial-a").await.unwrap();
    assert!(store
        .get_observation_log("trial-a", &ObservationQuery::new())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .get_observation_log("trial-b", &ObservationQuery::new())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_memory_store_contract() {
    check_contract(&MemoryObservationStore::new()).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteObservationStore::open(&SqliteStoreConfig::new(dir.path().join("obs.db"))).unwrap();
    check_contract(&store).await;
}

#[tokio::test]
async fn test_sqlite_persists_unavailable_and_skips_untimed() {
    let dir = tempfile::tempdir().unwrap();
    let config = SqliteStoreConfig::new(dir.path().join("obs.db"));
    let store = SqliteObservationStore::connect(&config).await.unwrap();
    store.init_schema().await.unwrap();

    let log = ObservationLog::from_observations(vec![
        MetricObservation::unavailable("accuracy"),
        MetricObservation::new("loss", 0.5),
    ]);
    store.register_observation_log("trial-1", &log).await.unwrap();

    // Reopen to make sure it hit the file.
    drop(store);
    let store = SqliteObservationStore::open(&config).unwrap();
    let stored = store.get_observation_log("trial-1", &ObservationQuery::new()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored.observations()[0].is_unavailable());
    assert_eq!(stored.observations()[0].name(), "accuracy");
}

#[tokio::test]
async fn test_sqlite_query_from_wire_strings() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteObservationStore::open(&SqliteStoreConfig::new(dir.path().join("obs.db"))).unwrap();
    store.init_schema().await.unwrap();
    store.register_observation_log("trial-1", &shuffled_log()).await.unwrap();

    let query = ObservationQuery::from_wire("accuracy", "2024-03-01T10:00:20Z", "").unwrap();
    let stored = store.get_observation_log("trial-1", &query).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored.observations()[0].value(), 0.9);

    assert!(ObservationQuery::from_wire("", "yesterday", "").is_err());
}
