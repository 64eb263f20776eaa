//! Evaluation publishing for evalcard.
//!
//! This crate ties the run model, the dataset hub, history reconciliation and
//! card rendering together into the end-to-end `save` workflow of
//! [`tracker::EvaluationTracker`].

pub mod run;
pub mod scalars;
pub mod tracker;

pub use run::{EvaluationRun, GeneralConfig, RunInfo};
pub use scalars::{JsonlScalarSink, Scalar, ScalarSink};
pub use tracker::{
    EvaluationTracker, ProgressReporter, SaveOutcome, SilentProgress, TrackerConfig,
    generate_final_dict,
};
