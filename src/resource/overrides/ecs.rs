use super::Faults;
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext};
use crate::resource::extract::items_at;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Clusters, the services in each cluster, task definitions
pub struct EcsCollector;

fn strings(page: &Value, path: &str) -> Vec<String> {
    items_at(page, path)
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Collector for EcsCollector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let mut faults = Faults::default();
        let mut clusters = Vec::new();
        let listed = ctx
            .paginate("ecs", "list_clusters", json!({}), Some(("nextToken", "nextToken")), |page| {
                let arns = strings(page, "clusterArns");
                sink.extend(arns.iter().cloned());
                clusters.extend(arns);
            })
            .await;
        faults.absorb(ctx, "list_clusters", listed)?;

        for cluster in &clusters {
            let services = ctx
                .paginate(
                    "ecs",
                    "list_services",
                    json!({"cluster": cluster}),
                    Some(("nextToken", "nextToken")),
                    |page| sink.extend(strings(page, "serviceArns")),
                )
                .await;
            ctx.tolerate("cluster services", services)?;
        }

        let definitions = ctx
            .paginate(
                "ecs",
                "list_task_definitions",
                json!({}),
                Some(("nextToken", "nextToken")),
                |page| sink.extend(strings(page, "taskDefinitionArns")),
            )
            .await;
        faults.absorb(ctx, "list_task_definitions", definitions)?;
        faults.finish()
    }
}
