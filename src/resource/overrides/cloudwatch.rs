use super::{collect_listings, Faults, Listing};
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, GenericCollector, TaskContext};
use crate::resource::registry::ServiceMapping;
use async_trait::async_trait;

const LISTINGS: &[Listing] = &[
    Listing::arns("describe_alarms", "MetricAlarms", "AlarmArn")
        .paginated("NextToken", "NextToken")
        .with_params(&[("AlarmTypes.member.1", "MetricAlarm")]),
    Listing::arns("describe_alarms", "CompositeAlarms", "AlarmArn")
        .paginated("NextToken", "NextToken")
        .with_params(&[("AlarmTypes.member.1", "CompositeAlarm")]),
    Listing::arns("list_dashboards", "DashboardEntries", "DashboardArn")
        .paginated("NextToken", "NextToken"),
];

/// Alarms and dashboards, followed by the generic metric mapping
pub struct CloudWatchCollector {
    metrics: Option<GenericCollector>,
}

impl CloudWatchCollector {
    pub fn new(mapping: Option<ServiceMapping>) -> Self {
        Self {
            metrics: mapping.map(GenericCollector::new),
        }
    }
}

#[async_trait]
impl Collector for CloudWatchCollector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let mut faults = Faults::default();
        let listed = collect_listings(ctx, "cloudwatch", LISTINGS, sink).await;
        faults.absorb(ctx, "alarms and dashboards", listed)?;

        if let Some(metrics) = &self.metrics {
            let listed = metrics.collect(ctx, sink).await;
            faults.absorb(ctx, "metrics", listed)?;
        }
        faults.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::collector::tests::{context, ScriptedClient};
    use crate::resource::registry::get_registry;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_alarms_dashboards_and_metrics() {
        let client = Arc::new(
            ScriptedClient::default()
                .on(
                    "cloudwatch.describe_alarms",
                    Ok(json!({"MetricAlarms": [{"AlarmArn": "arn:aws:cloudwatch:us-east-1:123456789012:alarm:cpu"}]})),
                )
                .on(
                    "cloudwatch.describe_alarms",
                    Ok(json!({"CompositeAlarms": [{"AlarmArn": "arn:aws:cloudwatch:us-east-1:123456789012:alarm:all"}]})),
                )
                .on(
                    "cloudwatch.list_dashboards",
                    Ok(json!({"DashboardEntries": [{"DashboardArn": "arn:aws:cloudwatch::123456789012:dashboard/main"}]})),
                )
                .on(
                    "cloudwatch.list_metrics",
                    Ok(json!({"Metrics": [{"MetricName": "CPUUtilization", "Namespace": "AWS/EC2"}]})),
                ),
        );
        let ctx = context("cloudwatch", "us-east-1", client.clone());
        let collector = CloudWatchCollector::new(get_registry().get("cloudwatch").cloned());

        let mut sink = Vec::new();
        collector.collect(&ctx, &mut sink).await.unwrap();

        assert_eq!(sink.len(), 4);
        assert!(sink.contains(&"arn:aws:cloudwatch:us-east-1:123456789012:alarm:all".to_string()));
        assert_eq!(
            client.calls_to("cloudwatch.list_metrics")[0]["Namespace"],
            "AWS/EC2"
        );
        let alarm_calls = client.calls_to("cloudwatch.describe_alarms");
        assert_eq!(alarm_calls[1]["AlarmTypes.member.1"], "CompositeAlarm");
    }
}
