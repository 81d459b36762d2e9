use super::Faults;
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext};
use crate::resource::extract::{items_at, str_at};
use async_trait::async_trait;
use serde_json::json;

/// Keys and the aliases pointing at them
pub struct KmsCollector;

#[async_trait]
impl Collector for KmsCollector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let mut faults = Faults::default();
        let mut key_ids = Vec::new();
        let listed = ctx
            .paginate("kms", "list_keys", json!({}), Some(("Marker", "NextMarker")), |page| {
                for key in items_at(page, "Keys") {
                    if let (Some(id), Some(arn)) = (str_at(key, "KeyId"), str_at(key, "KeyArn")) {
                        sink.push(arn.to_string());
                        key_ids.push(id.to_string());
                    }
                }
            })
            .await;
        faults.absorb(ctx, "list_keys", listed)?;

        for key_id in key_ids {
            let aliases = ctx
                .paginate(
                    "kms",
                    "list_aliases",
                    json!({"KeyId": key_id}),
                    Some(("Marker", "NextMarker")),
                    |page| {
                        sink.extend(
                            items_at(page, "Aliases")
                                .iter()
                                .filter_map(|a| str_at(a, "AliasArn"))
                                .map(str::to_string),
                        );
                    },
                )
                .await;
            ctx.tolerate("key aliases", aliases)?;
        }
        faults.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::collector::tests::{context, ScriptedClient};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_keys_and_aliases() {
        let key = "arn:aws:kms:us-east-1:123456789012:key/k1";
        let client = Arc::new(
            ScriptedClient::default()
                .on(
                    "kms.list_keys",
                    Ok(json!({"Keys": [{"KeyId": "k1", "KeyArn": key}], "Truncated": false})),
                )
                .on(
                    "kms.list_aliases",
                    Ok(json!({"Aliases": [{"AliasName": "alias/app", "AliasArn": "arn:aws:kms:us-east-1:123456789012:alias/app"}]})),
                ),
        );
        let ctx = context("kms", "us-east-1", client.clone());

        let mut sink = Vec::new();
        KmsCollector.collect(&ctx, &mut sink).await.unwrap();

        assert_eq!(sink, vec![key, "arn:aws:kms:us-east-1:123456789012:alias/app"]);
        assert_eq!(client.calls_to("kms.list_aliases")[0], json!({"KeyId": "k1"}));
    }

    #[tokio::test]
    async fn test_alias_auth_error_propagates() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("kms.list_keys", Ok(json!({"Keys": [{"KeyId": "k1", "KeyArn": "arn:k1"}]})))
                .on("kms.list_aliases", Err(ApiFault::service("ExpiredTokenException", "x", 400))),
        );
        let ctx = context("kms", "us-east-1", client);

        let mut sink = Vec::new();
        let result = KmsCollector.collect(&ctx, &mut sink).await;
        assert!(result.is_err());
        assert_eq!(sink, vec!["arn:k1"]);
    }

    #[tokio::test]
    async fn test_keys_listed_before_failed_page_are_kept() {
        let key = "arn:aws:kms:us-east-1:123456789012:key/k1";
        let client = Arc::new(
            ScriptedClient::default()
                .on(
                    "kms.list_keys",
                    Ok(json!({"Keys": [{"KeyId": "k1", "KeyArn": key}], "NextMarker": "m2"})),
                )
                .on("kms.list_keys", Err(ApiFault::service("AccessDeniedException", "no", 400)))
                .on(
                    "kms.list_aliases",
                    Ok(json!({"Aliases": [{"AliasArn": "arn:aws:kms:us-east-1:123456789012:alias/k1"}]})),
                ),
        );
        let ctx = context("kms", "us-east-1", client.clone());

        let mut sink = Vec::new();
        let result = KmsCollector.collect(&ctx, &mut sink).await;

        assert_eq!(result.unwrap_err().code(), Some("AccessDeniedException"));
        assert_eq!(sink, vec![key, "arn:aws:kms:us-east-1:123456789012:alias/k1"]);
        assert_eq!(client.calls_to("kms.list_keys")[1]["Marker"], "m2");
    }
}
