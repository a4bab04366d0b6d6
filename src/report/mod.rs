//! Reporting: where the observation log and the trial status go
//!
//! [`ReportingClient`] is the boundary the collector reports through.
//! - [`GrpcReportingClient`] talks to the DB manager and early stopping
//!   services (feature `grpc`)
//! - [`StoreReportingClient`] writes straight into an
//!   [`ObservationStore`](crate::store::ObservationStore)
//!
//! Every remote call is wrapped in a [`RetryPolicy`].

#[cfg(feature = "grpc")]
mod grpc;
mod local;
mod retry;

#[cfg(feature = "grpc")]
pub use grpc::{proto, GrpcReportingClient};
pub use local::StoreReportingClient;
pub use retry::RetryPolicy;

use std::fmt;
use std::future::Future;

use crate::observation::ObservationLog;
use crate::Result;

/// Trial status the collector can set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStatus {
    /// Trial was stopped by its early stopping rules
    EarlyStopped,
}

impl TrialStatus {
    /// Status name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EarlyStopped => "EarlyStopped",
        }
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for a trial's observation log and status.
pub trait ReportingClient: Send + Sync {
    /// Persist the observation log of `trial_name`.
    fn report_observation_log(
        &self,
        trial_name: &str,
        log: &ObservationLog,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Update the status of `trial_name`.
    fn set_trial_status(
        &self,
        trial_name: &str,
        status: TrialStatus,
    ) -> impl Future<Output = Result<()>> + Send;
}
