use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext};
use crate::resource::extract::{items_at, str_at, walk_path};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Buckets, plus the top-level objects of buckets in the task's region
pub struct S3Collector;

/// `GetBucketLocation` answers null for us-east-1 and `EU` for the oldest
/// eu-west-1 buckets.
pub fn bucket_region(location: &Value) -> String {
    match walk_path(location, "LocationConstraint").and_then(Value::as_str) {
        None | Some("") => "us-east-1".to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

#[async_trait]
impl Collector for S3Collector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let response = ctx.call("list_buckets", &json!({})).await?;
        let buckets: Vec<String> = items_at(&response, "Buckets")
            .iter()
            .filter_map(|b| str_at(b, "Name"))
            .map(str::to_string)
            .collect();

        sink.extend(buckets.iter().map(|name| format!("arn:aws:s3:::{}", name)));

        if !ctx.options.include_objects || ctx.options.max_objects_per_bucket == 0 {
            return Ok(());
        }

        for bucket in &buckets {
            let location = ctx.call("get_bucket_location", &json!({"Bucket": bucket})).await;
            let Some(location) = ctx.tolerate("bucket location", location)? else {
                continue;
            };
            let region = bucket_region(&location);
            if region != ctx.region {
                debug!("Bucket {} is in {}, not listing objects", bucket, region);
                continue;
            }

            let params = json!({
                "Bucket": bucket,
                "Delimiter": "/",
                "MaxKeys": ctx.options.max_objects_per_bucket,
            });
            let objects = ctx.call_in_region("s3", "list_objects_v2", &region, &params).await;
            let Some(objects) = ctx.tolerate("bucket objects", objects)? else {
                continue;
            };
            sink.extend(
                items_at(&objects, "Contents")
                    .iter()
                    .filter_map(|o| str_at(o, "Key"))
                    .take(ctx.options.max_objects_per_bucket)
                    .map(|key| format!("arn:aws:s3:::{}/{}", bucket, key)),
            );
        }
        Ok(())
    }
}
