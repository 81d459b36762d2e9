//! Scan Orchestrator
//!
//! Plans one task per `(service, region)` pair (global services collapse to
//! one task in the default region), runs them on a bounded pool and drains
//! every finished task into a single [`ScanOutcome`]. Only the drain loop
//! touches the outcome, so workers share no mutable state.

use super::errors::{log_fault, ErrorClassifier, ErrorKind};
use super::resolver::Resolver;
use super::retry::{Retrier, RetryPolicy, Sleeper, TokioSleeper};
use crate::arn;
use crate::aws::{ApiFault, CloudClient};
use crate::resource::collector::{CollectOptions, CollectorRegistry, Lookup, TaskContext};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What to do with the rest of the scan once a task hits an authentication failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorPolicy {
    /// Stop immediately, abandoning in-flight tasks
    #[default]
    Abort,
    /// Stop scheduling, let in-flight tasks finish
    Drain,
}

/// Engine configuration, injected by the caller
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub default_region: String,
    pub global_services: HashSet<String>,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub auth_error_policy: AuthErrorPolicy,
    pub collect: CollectOptions,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            global_services: [
                "iam",
                "s3",
                "route53",
                "cloudfront",
                "organizations",
                "waf",
                "shield",
                "budgets",
                "ce",
                "chatbot",
                "health",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_concurrency: 10,
            retry: RetryPolicy::default(),
            auth_error_policy: AuthErrorPolicy::default(),
            collect: CollectOptions::default(),
        }
    }
}

/// Regions to scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSelection {
    /// Every region enabled for the account
    All,
    Only(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub services: Vec<String>,
    pub regions: RegionSelection,
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanTask {
    pub service: String,
    pub region: String,
}

/// A task that did not complete cleanly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub service: String,
    pub region: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything a scan produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanOutcome {
    pub account_id: String,
    pub arns: BTreeSet<String>,
    pub failures: Vec<TaskFailure>,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    /// Tasks never started because of cancellation or an auth stop
    pub skipped: usize,
    pub cancelled: bool,
}

impl ScanOutcome {
    pub fn failures_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Scan-fatal errors. Per-task failures never end up here.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to resolve account identity: {0}")]
    Identity(#[source] ApiFault),
    #[error("failed to list enabled regions: {0}")]
    Regions(#[source] ApiFault),
    #[error("authentication failed for {service} in {region}: {source}")]
    Authentication {
        service: String,
        region: String,
        #[source]
        source: ApiFault,
        /// What was collected before the scan stopped
        partial: Box<ScanOutcome>,
    },
}

/// Build the task list. Services are deduplicated (first occurrence wins);
/// a global service yields one task in the default region, any other service
/// one task per region.
pub fn plan_tasks(services: &[String], regions: &[String], settings: &ScanSettings) -> Vec<ScanTask> {
    let mut seen_services = HashSet::new();
    let mut seen_regions = HashSet::new();
    let regions: Vec<&String> = regions
        .iter()
        .filter(|r| seen_regions.insert(r.as_str()))
        .collect();

    let mut tasks = Vec::new();
    for service in services {
        if !seen_services.insert(service.as_str()) {
            continue;
        }
        if settings.global_services.contains(service) {
            tasks.push(ScanTask {
                service: service.clone(),
                region: settings.default_region.clone(),
            });
        } else {
            tasks.extend(regions.iter().map(|region| ScanTask {
                service: service.clone(),
                region: (*region).clone(),
            }));
        }
    }
    tasks
}

/// Result of one task, handed to the drain loop
enum TaskReport {
    Skipped,
    Finished {
        task: ScanTask,
        arns: Vec<String>,
        failure: Option<(ErrorKind, String, Option<ApiFault>)>,
    },
}

pub struct Scanner {
    client: Arc<dyn CloudClient>,
    collectors: Arc<CollectorRegistry>,
    classifier: Arc<ErrorClassifier>,
    sleeper: Arc<dyn Sleeper>,
    settings: ScanSettings,
}

impl Scanner {
    /// Scanner with the built-in mappings and overrides
    pub fn new(client: Arc<dyn CloudClient>, settings: ScanSettings) -> Self {
        Self {
            client,
            collectors: Arc::new(CollectorRegistry::builtin()),
            classifier: Arc::new(ErrorClassifier::new()),
            sleeper: Arc::new(TokioSleeper),
            settings,
        }
    }

    pub fn with_collectors(mut self, collectors: CollectorRegistry) -> Self {
        self.collectors = Arc::new(collectors);
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn collectors(&self) -> &CollectorRegistry {
        &self.collectors
    }

    fn retrier(&self) -> Retrier {
        Retrier::with_sleeper(
            self.settings.retry.clone(),
            self.classifier.clone(),
            self.sleeper.clone(),
        )
    }

    /// Run a scan. Per-task failures are recorded in the outcome; only
    /// identity resolution and authentication failures end it early.
    pub async fn scan(
        &self,
        request: &ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let span = info_span!("scan", scan_id = %Uuid::new_v4());
        self.run(request, cancel).instrument(span).await
    }

    async fn run(
        &self,
        request: &ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let started = Instant::now();
        let retrier = self.retrier();
        let resolver = Resolver::new(
            self.client.as_ref(),
            &retrier,
            &self.settings.default_region,
        );

        let account_id = resolver.account_id().await.map_err(ScanError::Identity)?;
        let regions = match &request.regions {
            RegionSelection::All => resolver
                .enabled_regions()
                .await
                .map_err(ScanError::Regions)?,
            RegionSelection::Only(regions) => regions.clone(),
        };

        let tasks = plan_tasks(&request.services, &regions, &self.settings);
        info!(
            "Scanning {} services across {} regions ({} tasks) for account {}",
            request.services.len(),
            regions.len(),
            tasks.len(),
            account_id
        );

        let mut outcome = ScanOutcome {
            account_id: account_id.clone(),
            tasks_total: tasks.len(),
            ..ScanOutcome::default()
        };

        let account_id: Arc<str> = Arc::from(account_id);
        let today = Utc::now().date_naive();
        // Stops scheduling on user cancellation or a draining auth failure
        let stop = cancel.child_token();

        let mut reports = stream::iter(tasks)
            .map(|task| {
                let stop = stop.clone();
                let ctx = self.context(&task, account_id.clone(), retrier.clone(), today);
                async move {
                    if stop.is_cancelled() {
                        return TaskReport::Skipped;
                    }
                    let span = info_span!("task", service = %task.service, region = %task.region);
                    self.run_task(task, ctx).instrument(span).await
                }
            })
            .buffer_unordered(self.settings.max_concurrency.max(1));

        let mut auth_failure: Option<(String, String, ApiFault)> = None;

        while let Some(report) = reports.next().await {
            let TaskReport::Finished { task, arns, failure } = report else {
                outcome.skipped += 1;
                continue;
            };
            outcome.tasks_completed += 1;
            merge_arns(&mut outcome.arns, arns, &task);

            let Some((kind, message, fault)) = failure else {
                continue;
            };
            outcome.failures.push(TaskFailure {
                service: task.service.clone(),
                region: task.region.clone(),
                kind,
                message,
            });

            if let (true, Some(fault)) = (kind.is_fatal(), fault) {
                if auth_failure.is_none() {
                    auth_failure = Some((task.service, task.region, fault));
                }
                match self.settings.auth_error_policy {
                    AuthErrorPolicy::Abort => break,
                    AuthErrorPolicy::Drain => stop.cancel(),
                }
            }
        }
        drop(reports);

        outcome.cancelled = cancel.is_cancelled();
        if outcome.cancelled {
            warn!(
                "Scan cancelled: {} tasks skipped, {} completed",
                outcome.skipped, outcome.tasks_completed
            );
        }
        info!(
            "Scan finished in {:.1}s: {} resources, {} failed tasks",
            started.elapsed().as_secs_f64(),
            outcome.arns.len(),
            outcome.failures.len()
        );

        match auth_failure {
            Some((service, region, source)) => Err(ScanError::Authentication {
                service,
                region,
                source,
                partial: Box::new(outcome),
            }),
            None => Ok(outcome),
        }
    }

    fn context(
        &self,
        task: &ScanTask,
        account_id: Arc<str>,
        retrier: Retrier,
        today: NaiveDate,
    ) -> TaskContext {
        TaskContext {
            service: task.service.clone(),
            region: task.region.clone(),
            account_id,
            client: self.client.clone(),
            retrier,
            options: self.settings.collect.clone(),
            today,
        }
    }

    async fn run_task(&self, task: ScanTask, ctx: TaskContext) -> TaskReport {
        let collector = match self.collectors.lookup(&task.service) {
            Lookup::Found(collector) => collector,
            Lookup::Unsupported(reason) => {
                info!("{} is not supported: {}", task.service, reason);
                return TaskReport::Finished {
                    task,
                    arns: Vec::new(),
                    failure: Some((ErrorKind::Unsupported, reason, None)),
                };
            }
            Lookup::Unknown => {
                info!("No mapping or collector for {}", task.service);
                return TaskReport::Finished {
                    task,
                    arns: Vec::new(),
                    failure: Some((
                        ErrorKind::Unsupported,
                        "no mapping or collector".to_string(),
                        None,
                    )),
                };
            }
        };

        let mut arns = Vec::new();
        let result = collector.collect(&ctx, &mut arns).await;
        debug!("Collected {} ARNs", arns.len());

        let failure = result.err().map(|fault| {
            let kind = ctx.classify(&fault);
            log_fault(kind, &task.service, &task.region, &fault);
            (kind, fault.to_string(), Some(fault))
        });
        TaskReport::Finished {
            task,
            arns,
            failure,
        }
    }
}

fn merge_arns(into: &mut BTreeSet<String>, arns: Vec<String>, task: &ScanTask) {
    for candidate in arns {
        if arn::is_valid(&candidate) {
            into.insert(candidate);
        } else {
            warn!(
                "Dropping malformed ARN from {} in {}: {}",
                task.service, task.region, candidate
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_global_service_collapses() {
        let settings = ScanSettings::default();
        let tasks = plan_tasks(
            &strings(&["iam"]),
            &strings(&["us-east-1", "eu-west-1", "ap-south-1"]),
            &settings,
        );
        assert_eq!(
            tasks,
            vec![ScanTask {
                service: "iam".to_string(),
                region: "us-east-1".to_string()
            }]
        );
    }

    #[test]
    fn test_global_service_pinned_to_default_region() {
        let settings = ScanSettings {
            default_region: "eu-central-1".to_string(),
            ..ScanSettings::default()
        };
        let tasks = plan_tasks(&strings(&["s3"]), &strings(&["us-west-2"]), &settings);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].region, "eu-central-1");
    }

    #[test]
    fn test_regional_service_fans_out() {
        let settings = ScanSettings::default();
        let tasks = plan_tasks(
            &strings(&["lambda", "lambda", "iam"]),
            &strings(&["us-east-1", "eu-west-1", "us-east-1"]),
            &settings,
        );
        let set: BTreeSet<ScanTask> = tasks.iter().cloned().collect();
        assert_eq!(tasks.len(), 3);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&ScanTask {
            service: "lambda".to_string(),
            region: "eu-west-1".to_string()
        }));
    }

    #[test]
    fn test_no_regions_still_scans_globals() {
        let tasks = plan_tasks(&strings(&["ec2", "route53"]), &[], &ScanSettings::default());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].service, "route53");
    }

    #[test]
    fn test_merge_drops_malformed() {
        let mut set = BTreeSet::new();
        let task = ScanTask {
            service: "sqs".to_string(),
            region: "us-east-1".to_string(),
        };
        merge_arns(
            &mut set,
            strings(&["arn:aws:sqs:us-east-1:1:q", "not-an-arn", "arn:aws:sqs:us-east-1:1:q"]),
            &task,
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_failures_by_kind() {
        let failure = |kind| TaskFailure {
            service: "x".to_string(),
            region: "r".to_string(),
            kind,
            message: String::new(),
        };
        let outcome = ScanOutcome {
            failures: vec![
                failure(ErrorKind::AccessDenied),
                failure(ErrorKind::AccessDenied),
                failure(ErrorKind::NotFound),
            ],
            ..ScanOutcome::default()
        };
        let counts = outcome.failures_by_kind();
        assert_eq!(counts[&ErrorKind::AccessDenied], 2);
        assert_eq!(counts[&ErrorKind::NotFound], 1);
    }
}
