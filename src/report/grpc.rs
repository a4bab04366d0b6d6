//! gRPC reporting client for the DB manager and early stopping services

use chrono::SecondsFormat;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Endpoint;
use tracing::{debug, info};

use super::{ReportingClient, RetryPolicy, TrialStatus};
use crate::observation::{unknown_timestamp, ObservationLog};
use crate::{Error, Result};

const REPORT_OBSERVATION_LOG_PATH: &str = "/api.v1.beta1.DBManager/ReportObservationLog";
const SET_TRIAL_STATUS_PATH: &str = "/api.v1.beta1.EarlyStopping/SetTrialStatus";

/// Wire messages of the `api.v1.beta1` services.
pub mod proto {
    /// A metric reading; the value travels as text.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Metric {
        /// Metric name
        #[prost(string, tag = "1")]
        pub name: String,
        /// Metric value
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A timestamped reading.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MetricLog {
        /// RFC 3339 timestamp
        #[prost(string, tag = "1")]
        pub time_stamp: String,
        /// The reading
        #[prost(message, optional, tag = "2")]
        pub metric: Option<Metric>,
    }

    /// All readings of a trial.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ObservationLog {
        /// Readings
        #[prost(message, repeated, tag = "1")]
        pub metric_logs: Vec<MetricLog>,
    }

    /// `DBManager.ReportObservationLog` request.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ReportObservationLogRequest {
        /// Trial the log belongs to
        #[prost(string, tag = "1")]
        pub trial_name: String,
        /// The log
        #[prost(message, optional, tag = "2")]
        pub observation_log: Option<ObservationLog>,
    }

    /// `DBManager.ReportObservationLog` reply.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct ReportObservationLogReply {}

    /// `EarlyStopping.SetTrialStatus` request.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SetTrialStatusRequest {
        /// Trial to mark as early stopped
        #[prost(string, tag = "1")]
        pub trial_name: String,
    }

    /// `EarlyStopping.SetTrialStatus` reply.
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct SetTrialStatusReply {}
}

impl From<&ObservationLog> for proto::ObservationLog {
    fn from(log: &ObservationLog) -> Self {
        let metric_logs = log
            .iter()
            .map(|o| proto::MetricLog {
                time_stamp: o
                    .timestamp()
                    .unwrap_or_else(unknown_timestamp)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                metric: Some(proto::Metric {
                    name: o.name().to_string(),
                    value: o.value_string(),
                }),
            })
            .collect();
        Self { metric_logs }
    }
}

/// Reports over gRPC.
///
/// A fresh connection is dialled per attempt, so an unreachable service is
/// retried like any other failure.
#[derive(Debug, Clone)]
pub struct GrpcReportingClient {
    db_manager: Endpoint,
    early_stopping: Endpoint,
    retry: RetryPolicy,
}

impl GrpcReportingClient {
    /// Client for the given `host:port` (or full URI) addresses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an address is not a valid URI.
    pub fn new(db_manager_addr: &str, early_stop_addr: &str, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            db_manager: endpoint(db_manager_addr, &retry)?,
            early_stopping: endpoint(early_stop_addr, &retry)?,
            retry,
        })
    }

    /// Retry policy applied to every call.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

fn endpoint(addr: &str, retry: &RetryPolicy) -> Result<Endpoint> {
    let uri = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    Endpoint::from_shared(uri)
        .map(|e| e.connect_timeout(retry.call_timeout))
        .map_err(|e| Error::InvalidInput(format!("service address {addr:?}: {e}")))
}

async fn unary<Req, Resp>(endpoint: &Endpoint, path: &'static str, request: Req) -> Result<Resp>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    let channel = endpoint
        .connect()
        .await
        .map_err(|e| Error::Transport(format!("connect {}: {e}", endpoint.uri())))?;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| Error::Transport(format!("{} not ready: {e}", endpoint.uri())))?;

    let codec: ProstCodec<Req, Resp> = ProstCodec::default();
    let response = grpc
        .unary(tonic::Request::new(request), PathAndQuery::from_static(path), codec)
        .await
        .map_err(|status| Error::Transport(format!("{path}: {status}")))?;
    Ok(response.into_inner())
}

impl ReportingClient for GrpcReportingClient {
    async fn report_observation_log(&self, trial_name: &str, log: &ObservationLog) -> Result<()> {
        let request = proto::ReportObservationLogRequest {
            trial_name: trial_name.to_string(),
            observation_log: Some(log.into()),
        };
        debug!(trial = trial_name, observations = log.len(), "Reporting observation log");
        self.retry
            .run("ReportObservationLog", move || {
                unary::<_, proto::ReportObservationLogReply>(
                    &self.db_manager,
                    REPORT_OBSERVATION_LOG_PATH,
                    request.clone(),
                )
            })
            .await?;
        info!(trial = trial_name, observations = log.len(), "Observation log reported");
        Ok(())
    }

    async fn set_trial_status(&self, trial_name: &str, status: TrialStatus) -> Result<()> {
        let request = match status {
            TrialStatus::EarlyStopped => proto::SetTrialStatusRequest {
                trial_name: trial_name.to_string(),
            },
        };
        self.retry
            .run("SetTrialStatus", move || {
                unary::<_, proto::SetTrialStatusReply>(
                    &self.early_stopping,
                    SET_TRIAL_STATUS_PATH,
                    request.clone(),
                )
            })
            .await?;
        info!(trial = trial_name, %status, "Trial status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::observation::MetricObservation;

    #[test]
    fn test_observation_log_to_proto() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let log = ObservationLog::from_observations(vec![
            MetricObservation::at("loss", 0.25, ts),
            MetricObservation::unavailable("accuracy"),
        ]);

        let wire = proto::ObservationLog::from(&log);
        assert_eq!(wire.metric_logs.len(), 2);
        assert_eq!(wire.metric_logs[0].time_stamp, "2024-05-01T12:00:00Z");
        assert_eq!(wire.metric_logs[0].metric.as_ref().unwrap().value, "0.25");
        assert_eq!(wire.metric_logs[1].time_stamp, "0001-01-01T00:00:00Z");
        assert_eq!(wire.metric_logs[1].metric.as_ref().unwrap().value, "unavailable");
    }

    #[test]
    fn test_addresses_get_a_scheme() {
        let client = GrpcReportingClient::new(
            "katib-db-manager.kubeflow:6789",
            "http://127.0.0.1:6788",
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(client.db_manager.uri().scheme_str(), Some("http"));
        assert_eq!(client.early_stopping.uri().port_u16(), Some(6788));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_transport_error() {
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(2),
        };
        // Port 9 (discard) is not expected to serve gRPC.
        let client = GrpcReportingClient::new("127.0.0.1:9", "127.0.0.1:9", retry).unwrap();
        let err = client
            .set_trial_status("trial-1", TrialStatus::EarlyStopped)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_) | Error::Timeout(_)));
    }
}
