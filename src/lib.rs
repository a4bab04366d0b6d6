//! # metrics-collector: trial metrics sidecar
//!
//! Runs next to a training container, follows its metrics log, and reports the
//! trial's observation log exactly once, whether the trial completes on its
//! own or is stopped early.
//!
//! ## Pieces
//!
//! - [`extract`]: regex filters turning log lines into [`observation::MetricObservation`]s
//! - [`engine`]: the early stopping decision over a live rule set
//! - [`store`]: observation log persistence (SQLite, in-memory)
//! - [`process`]: finding, waiting for and terminating the training processes
//! - [`report`]: reporting clients (gRPC, store-backed) with retries
//! - [`collector`]: the session tying it together
//!
//! ## Example
//!
//! ```rust
//! use metrics_collector::engine::{EarlyStoppingEngine, ObjectiveDirection, ObjectiveTracker};
//! use metrics_collector::extract::MetricExtractor;
//! use metrics_collector::rules::StoppingRule;
//!
//! let rules = vec!["loss;0.1;less;0".parse::<StoppingRule>()?];
//! let mut engine = EarlyStoppingEngine::new(
//!     rules,
//!     ObjectiveTracker::new("accuracy", ObjectiveDirection::Maximize),
//! );
//! let extractor = MetricExtractor::default();
//!
//! assert!(engine.consume_line("epoch=1 loss=0.5", &extractor).is_none());
//! assert!(engine.consume_line("epoch=2 loss=0.05", &extractor).is_some());
//! # Ok::<(), metrics_collector::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logging;
pub mod observation;
pub mod process;
pub mod report;
pub mod rules;
pub mod store;

pub use error::{Error, Result};
