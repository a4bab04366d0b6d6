//! Store-backed reporting client

use std::sync::Arc;

use tracing::info;

use super::{ReportingClient, TrialStatus};
use crate::observation::ObservationLog;
use crate::store::ObservationStore;
use crate::Result;

/// Writes observation logs straight into an [`ObservationStore`].
///
/// There is no status service in this mode; status updates are logged.
pub struct StoreReportingClient<S> {
    store: Arc<S>,
}

impl<S: ObservationStore> StoreReportingClient<S> {
    /// Client over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ObservationStore> ReportingClient for StoreReportingClient<S> {
    async fn report_observation_log(&self, trial_name: &str, log: &ObservationLog) -> Result<()> {
        self.store.register_observation_log(trial_name, log).await?;
        info!(trial = trial_name, observations = log.len(), "Observation log stored");
        Ok(())
    }

    async fn set_trial_status(&self, trial_name: &str, status: TrialStatus) -> Result<()> {
        info!(trial = trial_name, %status, "Trial status recorded locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::observation::MetricObservation;
    use crate::store::{MemoryObservationStore, ObservationQuery};

    #[tokio::test]
    async fn test_reports_into_store() {
        let client = StoreReportingClient::new(Arc::new(MemoryObservationStore::new()));
        let log = ObservationLog::from_observations(vec![
            MetricObservation::at("loss", 0.3, Utc::now()),
            MetricObservation::at("accuracy", 0.8, Utc::now()),
        ]);

        client.report_observation_log("trial-1", &log).await.unwrap();
        client.set_trial_status("trial-1", TrialStatus::EarlyStopped).await.unwrap();

        let stored = client
            .store()
            .get_observation_log("trial-1", &ObservationQuery::new())
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }
}
