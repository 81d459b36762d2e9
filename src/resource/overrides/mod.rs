//! Hand-written collectors for services a single list call cannot cover
//!
//! Several of them boil down to a fixed table of list calls, each yielding
//! an ARN attribute or an identifier to format; [`Listing`] describes one
//! such call and [`collect_listings`] runs a table of them.

mod apigateway;
mod cloudwatch;
mod ec2;
mod ecs;
mod iam;
mod kms;
mod route53;
mod s3;

pub use apigateway::ApiGatewayCollector;
pub use cloudwatch::CloudWatchCollector;
pub use ec2::Ec2Collector;
pub use ecs::EcsCollector;
pub use iam::IamCollector;
pub use kms::KmsCollector;
pub use route53::Route53Collector;
pub use s3::S3Collector;

use super::collector::{CollectorRegistry, TaskContext};
use super::extract::{items_at, walk_path};
use super::registry::MappingRegistry;
use crate::aws::ApiFault;
use crate::scan::errors::log_fault;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Install the built-in overrides. CloudWatch wraps the generic mapping.
pub fn register_all(registry: &mut CollectorRegistry, mappings: &MappingRegistry) {
    registry.register("ec2", Arc::new(Ec2Collector));
    registry.register("s3", Arc::new(S3Collector));
    registry.register("iam", Arc::new(IamCollector));
    registry.register("route53", Arc::new(Route53Collector));
    registry.register("kms", Arc::new(KmsCollector));
    registry.register("ecs", Arc::new(EcsCollector));
    registry.register("apigateway", Arc::new(ApiGatewayCollector));
    registry.register(
        "cloudwatch",
        Arc::new(CloudWatchCollector::new(mappings.get("cloudwatch").cloned())),
    );
}

/// One list call in a table-driven collector
pub(crate) struct Listing {
    pub method: &'static str,
    /// Dotted path of the item array
    pub path: &'static str,
    /// Array inside each item to descend into (EC2 reservations)
    pub nested: Option<&'static str>,
    /// Attribute holding the ARN, or the identifier when `template` is set
    pub attribute: &'static str,
    /// `{region}`, `{account_id}` and `{id}` are substituted
    pub template: Option<&'static str>,
    /// `(request parameter, response field)`
    pub tokens: Option<(&'static str, &'static str)>,
    pub params: &'static [(&'static str, &'static str)],
}

impl Listing {
    pub const fn arns(method: &'static str, path: &'static str, attribute: &'static str) -> Self {
        Self {
            method,
            path,
            nested: None,
            attribute,
            template: None,
            tokens: None,
            params: &[],
        }
    }

    pub const fn ids(
        method: &'static str,
        path: &'static str,
        attribute: &'static str,
        template: &'static str,
    ) -> Self {
        Self {
            method,
            path,
            nested: None,
            attribute,
            template: Some(template),
            tokens: None,
            params: &[],
        }
    }

    pub const fn nested(mut self, nested: &'static str) -> Self {
        self.nested = Some(nested);
        self
    }

    pub const fn paginated(mut self, input: &'static str, output: &'static str) -> Self {
        self.tokens = Some((input, output));
        self
    }

    pub const fn with_params(mut self, params: &'static [(&'static str, &'static str)]) -> Self {
        self.params = params;
        self
    }

    fn request(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect::<Map<String, Value>>(),
        )
    }

    fn arn_for(&self, item: &Value, ctx: &TaskContext) -> Option<String> {
        let value = walk_path(item, self.attribute).and_then(Value::as_str)?;
        if value.is_empty() {
            return None;
        }
        Some(match self.template {
            Some(template) => fill(template, &ctx.region, &ctx.account_id, value),
            None => value.to_string(),
        })
    }

    fn extract(&self, page: &Value, ctx: &TaskContext, sink: &mut Vec<String>) {
        for item in items_at(page, self.path) {
            match self.nested {
                Some(inner) => {
                    for nested in items_at(item, inner) {
                        sink.extend(self.arn_for(nested, ctx));
                    }
                }
                None => sink.extend(self.arn_for(item, ctx)),
            }
        }
    }
}

pub(crate) fn fill(template: &str, region: &str, account_id: &str, id: &str) -> String {
    template
        .replace("{region}", region)
        .replace("{account_id}", account_id)
        .replace("{id}", id)
}

/// Keeps the first failure of a multi-call collector, so the task still
/// reports it after the remaining calls ran. Failures that stop the task
/// (bad credentials, region not enabled) are returned at once.
#[derive(Default)]
pub(crate) struct Faults {
    first: Option<ApiFault>,
}

impl Faults {
    pub fn absorb<T>(
        &mut self,
        ctx: &TaskContext,
        what: &str,
        result: Result<T, ApiFault>,
    ) -> Result<Option<T>, ApiFault> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(fault) => {
                let kind = ctx.classify(&fault);
                if kind.stops_task() {
                    return Err(fault);
                }
                log_fault(kind, &format!("{} {}", ctx.service, what), &ctx.region, &fault);
                self.first.get_or_insert(fault);
                Ok(None)
            }
        }
    }

    pub fn finish(self) -> Result<(), ApiFault> {
        match self.first {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

/// Run every listing of `service`. One failing listing does not stop the
/// others unless the failure stops the whole task.
pub(crate) async fn collect_listings(
    ctx: &TaskContext,
    service: &str,
    listings: &[Listing],
    sink: &mut Vec<String>,
) -> Result<(), ApiFault> {
    let mut faults = Faults::default();
    for listing in listings {
        let result = ctx
            .paginate(service, listing.method, listing.request(), listing.tokens, |page| {
                listing.extract(page, ctx, sink)
            })
            .await;
        faults.absorb(ctx, listing.method, result)?;
    }
    faults.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::collector::tests::{context, ScriptedClient};
    use serde_json::json;

    const LISTINGS: &[Listing] = &[
        Listing::arns("list_a", "Items", "Arn"),
        Listing::ids("list_b", "Outer", "Id", "arn:aws:x:{region}:{account_id}:b/{id}")
            .nested("Inner")
            .with_params(&[("Scope", "Local")]),
    ];

    #[tokio::test]
    async fn test_listings_continue_after_failure() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("x.list_a", Err(ApiFault::service("AccessDenied", "no", 403)))
                .on("x.list_b", Ok(json!({"Outer": [{"Inner": [{"Id": "1"}, {"Id": "2"}]}]}))),
        );
        let ctx = context("x", "eu-west-1", client.clone());

        let mut sink = Vec::new();
        let result = collect_listings(&ctx, "x", LISTINGS, &mut sink).await;

        assert_eq!(result.unwrap_err().code(), Some("AccessDenied"));
        assert_eq!(
            sink,
            vec![
                "arn:aws:x:eu-west-1:123456789012:b/1",
                "arn:aws:x:eu-west-1:123456789012:b/2"
            ]
        );
        assert_eq!(client.calls_to("x.list_b")[0], json!({"Scope": "Local"}));
    }

    #[tokio::test]
    async fn test_auth_error_stops_listings() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("x.list_a", Err(ApiFault::service("InvalidClientTokenId", "bad", 403)))
                .on("x.list_b", Ok(json!({}))),
        );
        let ctx = context("x", "eu-west-1", client.clone());

        let mut sink = Vec::new();
        let result = collect_listings(&ctx, "x", LISTINGS, &mut sink).await;

        assert!(result.is_err());
        assert!(client.calls_to("x.list_b").is_empty());
    }

    #[tokio::test]
    async fn test_region_opt_in_stops_listings() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("x.list_a", Err(ApiFault::service("OptInRequired", "not enabled", 403)))
                .on("x.list_b", Ok(json!({"Outer": [{"Inner": [{"Id": "1"}]}]}))),
        );
        let ctx = context("x", "ap-east-1", client.clone());

        let mut sink = Vec::new();
        let result = collect_listings(&ctx, "x", LISTINGS, &mut sink).await;

        assert_eq!(result.unwrap_err().code(), Some("OptInRequired"));
        assert_eq!(client.calls_to("x.list_a").len(), 1);
        assert!(client.calls_to("x.list_b").is_empty());
        assert!(sink.is_empty());
    }
}
