//! Scan engine
//!
//! - [`errors`] - Error Classifier
//! - [`retry`] - Retry Policy shared by every remote call
//! - [`resolver`] - Account id and enabled regions
//! - [`orchestrator`] - Task planning, bounded execution, result merging

pub mod errors;
pub mod orchestrator;
pub mod resolver;
pub mod retry;

pub use errors::{log_fault, ErrorClassifier, ErrorKind};
pub use orchestrator::{
    plan_tasks, AuthErrorPolicy, RegionSelection, ScanError, ScanOutcome, ScanRequest,
    ScanSettings, ScanTask, Scanner, TaskFailure,
};
pub use resolver::Resolver;
pub use retry::{Retrier, RetryPolicy, Sleeper, TokioSleeper};
