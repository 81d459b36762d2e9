use super::Faults;
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext, MAX_PAGES};
use crate::resource::extract::{items_at, str_at};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Hosted zones, their record sets and health checks
pub struct Route53Collector;

/// `/hostedzone/Z123` -> `Z123`
fn zone_id(raw: &str) -> &str {
    raw.rsplit('/').next().unwrap_or(raw)
}

async fn record_sets(ctx: &TaskContext, zone: &str) -> Result<Vec<String>, ApiFault> {
    let mut arns = Vec::new();
    let mut params = Map::new();
    params.insert("Id".to_string(), Value::from(zone));

    for _ in 0..MAX_PAGES {
        let page = ctx
            .call("list_resource_record_sets", &Value::Object(params.clone()))
            .await?;
        for record in items_at(&page, "ResourceRecordSets") {
            if let (Some(name), Some(kind)) = (str_at(record, "Name"), str_at(record, "Type")) {
                arns.push(format!(
                    "arn:aws:route53:::hostedzone/{}/record/{}/{}",
                    zone, name, kind
                ));
            }
        }

        let truncated = str_at(&page, "IsTruncated") == Some("true")
            || page.get("IsTruncated") == Some(&Value::Bool(true));
        match (truncated, str_at(&page, "NextRecordName")) {
            (true, Some(next)) => {
                params.insert("StartRecordName".to_string(), Value::from(next));
                match str_at(&page, "NextRecordType") {
                    Some(kind) => params.insert("StartRecordType".to_string(), Value::from(kind)),
                    None => params.remove("StartRecordType"),
                };
            }
            _ => break,
        }
    }
    Ok(arns)
}

#[async_trait]
impl Collector for Route53Collector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let mut faults = Faults::default();
        let mut zones = Vec::new();
        let listed = ctx
            .paginate(
                "route53",
                "list_hosted_zones",
                json!({}),
                Some(("Marker", "NextMarker")),
                |page| {
                    for id in items_at(page, "HostedZones").iter().filter_map(|z| str_at(z, "Id")) {
                        let zone = zone_id(id);
                        sink.push(format!("arn:aws:route53:::hostedzone/{}", zone));
                        zones.push(zone.to_string());
                    }
                },
            )
            .await;
        faults.absorb(ctx, "list_hosted_zones", listed)?;

        for zone in &zones {
            let records = record_sets(ctx, zone).await;
            if let Some(records) = ctx.tolerate("record sets", records)? {
                sink.extend(records);
            }
        }

        let health_checks = ctx
            .paginate(
                "route53",
                "list_health_checks",
                json!({}),
                Some(("Marker", "NextMarker")),
                |page| {
                    sink.extend(
                        items_at(page, "HealthChecks")
                            .iter()
                            .filter_map(|h| str_at(h, "Id"))
                            .map(|id| format!("arn:aws:route53:::healthcheck/{}", id)),
                    );
                },
            )
            .await;
        faults.absorb(ctx, "list_health_checks", health_checks)?;
        faults.finish()
    }
}
