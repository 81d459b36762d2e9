//! Collectors - the unit of work behind each scan task
//!
//! Most services are listed by [`GenericCollector`], which drives one mapping
//! entry. Services whose resources need several calls (EC2, S3, IAM, ...)
//! register an override under the same name. Either way the collector only
//! sees a [`TaskContext`]: every remote call it makes goes through the shared
//! [`Retrier`].

use super::extract::{extract, str_at};
use super::overrides;
use super::registry::{get_registry, MappingRegistry, ServiceMapping};
use crate::aws::{ApiFault, CloudClient};
use crate::scan::errors::ErrorKind;
use crate::scan::retry::Retrier;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hard stop for runaway pagination
pub const MAX_PAGES: usize = 1000;

/// Per-scan knobs collectors may consult
#[derive(Debug, Clone, PartialEq)]
pub struct CollectOptions {
    /// List top-level S3 objects as well as buckets
    pub include_objects: bool,
    pub max_objects_per_bucket: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            include_objects: true,
            max_objects_per_bucket: 100,
        }
    }
}

/// Everything a collector needs for one `(service, region)` task
#[derive(Clone)]
pub struct TaskContext {
    pub service: String,
    pub region: String,
    pub account_id: Arc<str>,
    pub client: Arc<dyn CloudClient>,
    pub retrier: Retrier,
    pub options: CollectOptions,
    /// Anchor for date-relative requests (cost windows)
    pub today: NaiveDate,
}

impl TaskContext {
    pub fn classify(&self, fault: &ApiFault) -> ErrorKind {
        self.retrier.classifier().classify(fault)
    }

    /// Call a method of this task's service.
    pub async fn call(&self, method: &str, params: &Value) -> Result<Value, ApiFault> {
        self.call_service(&self.service, method, params).await
    }

    /// Call a method of any service in this task's region.
    pub async fn call_service(
        &self,
        service: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, ApiFault> {
        let label = format!("{}.{} in {}", service, method, self.region);
        self.retrier
            .call(&label, || {
                self.client.invoke(service, method, &self.region, params)
            })
            .await
    }

    /// Call a method with an explicit region (S3 objects live in the bucket's region).
    pub async fn call_in_region(
        &self,
        service: &str,
        method: &str,
        region: &str,
        params: &Value,
    ) -> Result<Value, ApiFault> {
        let label = format!("{}.{} in {}", service, method, region);
        self.retrier
            .call(&label, || self.client.invoke(service, method, region, params))
            .await
    }

    /// Best-effort handling of a secondary call: authentication and region
    /// opt-in failures propagate, anything else is logged and turned into
    /// `None`.
    pub fn tolerate<T>(&self, what: &str, result: Result<T, ApiFault>) -> Result<Option<T>, ApiFault> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(fault) => {
                let kind = self.classify(&fault);
                if kind.stops_task() {
                    return Err(fault);
                }
                debug!(
                    service = %self.service,
                    region = %self.region,
                    kind = %kind,
                    "Skipping {}: {}",
                    what,
                    fault
                );
                Ok(None)
            }
        }
    }

    /// Fetch every page of a list call, handing each page to `on_page`.
    ///
    /// `tokens` is `(request parameter, response field)`. Pagination stops when
    /// the response carries no token, repeats the previous one, or after
    /// [`MAX_PAGES`] pages.
    pub async fn paginate<F>(
        &self,
        service: &str,
        method: &str,
        params: Value,
        tokens: Option<(&str, &str)>,
        mut on_page: F,
    ) -> Result<(), ApiFault>
    where
        F: FnMut(&Value) + Send,
    {
        let mut params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut previous: Option<String> = None;

        for page in 1..=MAX_PAGES {
            let response = self
                .call_service(service, method, &Value::Object(params.clone()))
                .await?;
            on_page(&response);

            let Some((input, output)) = tokens else {
                return Ok(());
            };
            let next = match str_at(&response, output) {
                Some(token) if !token.is_empty() => token.to_string(),
                _ => return Ok(()),
            };
            if previous.as_deref() == Some(next.as_str()) {
                warn!("{}.{} returned the same page token twice, stopping", service, method);
                return Ok(());
            }
            if page == MAX_PAGES {
                warn!("{}.{} exceeded {} pages, stopping", service, method, MAX_PAGES);
                return Ok(());
            }
            params.insert(input.to_string(), Value::String(next.clone()));
            previous = Some(next);
        }
        Ok(())
    }
}

/// Produces ARNs for one task. ARNs are pushed into `sink` as they are
/// found, so a collector that fails midway keeps what it already listed.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault>;
}

/// Drives one mapping entry: build the request, paginate, extract.
#[derive(Debug, Clone)]
pub struct GenericCollector {
    mapping: ServiceMapping,
}

impl GenericCollector {
    pub fn new(mapping: ServiceMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &ServiceMapping {
        &self.mapping
    }
}

#[async_trait]
impl Collector for GenericCollector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let mapping = &self.mapping;
        let params = mapping.request_params(&ctx.region, &ctx.account_id, ctx.today);
        let tokens = mapping
            .pagination
            .as_ref()
            .map(|p| (p.input_token.as_str(), p.output_token.as_str()));

        ctx.paginate(&ctx.service, &mapping.list_method, params, tokens, |page| {
            sink.extend(extract(mapping, page, &ctx.region, &ctx.account_id));
        })
        .await
    }
}

/// What the registry knows about a service
#[derive(Clone)]
pub enum Lookup {
    Found(Arc<dyn Collector>),
    /// Known but cannot be listed
    Unsupported(String),
    /// Neither a mapping nor an override
    Unknown,
}

#[derive(Clone)]
enum Entry {
    Collector(Arc<dyn Collector>),
    Unsupported(String),
}

/// Collectors keyed by service name. Overrides replace generic entries.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    entries: HashMap<String, Entry>,
}

impl CollectorRegistry {
    /// Generic collectors for every mapping, without overrides.
    pub fn from_mappings(mappings: &MappingRegistry) -> Self {
        let mut entries = HashMap::new();
        for name in mappings.service_names() {
            let Some(mapping) = mappings.get(name) else {
                continue;
            };
            let entry = match mapping.unsupported_reason() {
                Some(reason) => Entry::Unsupported(reason.to_string()),
                None => Entry::Collector(Arc::new(GenericCollector::new(mapping.clone()))),
            };
            entries.insert(name.to_string(), entry);
        }
        Self { entries }
    }

    /// Built-in mappings plus the built-in overrides.
    pub fn builtin() -> Self {
        let mut registry = Self::from_mappings(get_registry());
        overrides::register_all(&mut registry, get_registry());
        registry
    }

    pub fn register(&mut self, service: &str, collector: Arc<dyn Collector>) {
        self.entries
            .insert(service.to_string(), Entry::Collector(collector));
    }

    pub fn lookup(&self, service: &str) -> Lookup {
        match self.entries.get(service) {
            Some(Entry::Collector(c)) => Lookup::Found(c.clone()),
            Some(Entry::Unsupported(reason)) => Lookup::Unsupported(reason.clone()),
            None => Lookup::Unknown,
        }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }

    /// All service names, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
