use super::Faults;
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext};
use crate::resource::extract::{items_at, str_at};
use async_trait::async_trait;
use serde_json::{json, Value};

/// REST APIs with their resources and stages, then HTTP/WebSocket APIs
/// (apigatewayv2) with their stages.
pub struct ApiGatewayCollector;

fn attribute_values(page: &Value, path: &str, attribute: &str) -> Vec<String> {
    items_at(page, path)
        .iter()
        .filter_map(|item| str_at(item, attribute))
        .map(str::to_string)
        .collect()
}

impl ApiGatewayCollector {
    async fn rest_apis(
        ctx: &TaskContext,
        sink: &mut Vec<String>,
        faults: &mut Faults,
    ) -> Result<(), ApiFault> {
        let base = format!("arn:aws:apigateway:{}::/restapis", ctx.region);
        let mut apis = Vec::new();
        let listed = ctx
            .paginate(
                "apigateway",
                "get_rest_apis",
                json!({}),
                Some(("position", "position")),
                |page| {
                    for api in attribute_values(page, "item", "id") {
                        sink.push(format!("{}/{}", base, api));
                        apis.push(api);
                    }
                },
            )
            .await;
        faults.absorb(ctx, "get_rest_apis", listed)?;

        for api in &apis {
            let resources = ctx
                .paginate(
                    "apigateway",
                    "get_resources",
                    json!({"restapi_id": api}),
                    Some(("position", "position")),
                    |page| {
                        sink.extend(
                            attribute_values(page, "item", "id")
                                .into_iter()
                                .map(|id| format!("{}/{}/resources/{}", base, api, id)),
                        )
                    },
                )
                .await;
            ctx.tolerate("API resources", resources)?;

            let stages = ctx
                .call("get_stages", &json!({"restapi_id": api}))
                .await;
            if let Some(stages) = ctx.tolerate("API stages", stages)? {
                sink.extend(
                    attribute_values(&stages, "item", "stageName")
                        .into_iter()
                        .map(|name| format!("{}/{}/stages/{}", base, api, name)),
                );
            }
        }
        Ok(())
    }

    async fn http_apis(
        ctx: &TaskContext,
        sink: &mut Vec<String>,
        faults: &mut Faults,
    ) -> Result<(), ApiFault> {
        let base = format!("arn:aws:apigateway:{}::/apis", ctx.region);
        let mut apis = Vec::new();
        let listed = ctx
            .paginate(
                "apigatewayv2",
                "get_apis",
                json!({}),
                Some(("NextToken", "nextToken")),
                |page| {
                    for api in attribute_values(page, "items", "apiId") {
                        sink.push(format!("{}/{}", base, api));
                        apis.push(api);
                    }
                },
            )
            .await;
        faults.absorb(ctx, "get_apis", listed)?;

        for api in &apis {
            let stages = ctx
                .paginate(
                    "apigatewayv2",
                    "get_stages",
                    json!({"ApiId": api}),
                    Some(("NextToken", "nextToken")),
                    |page| {
                        sink.extend(
                            attribute_values(page, "items", "stageName")
                                .into_iter()
                                .map(|name| format!("{}/{}/stages/{}", base, api, name)),
                        )
                    },
                )
                .await;
            ctx.tolerate("HTTP API stages", stages)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for ApiGatewayCollector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        let mut faults = Faults::default();
        Self::rest_apis(ctx, sink, &mut faults).await?;
        Self::http_apis(ctx, sink, &mut faults).await?;
        faults.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::collector::tests::{context, ScriptedClient};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rest_and_http_apis() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("apigateway.get_rest_apis", Ok(json!({"item": [{"id": "abc", "name": "api"}]})))
                .on("apigateway.get_resources", Ok(json!({"item": [{"id": "r1", "path": "/"}]})))
                .on("apigateway.get_stages", Ok(json!({"item": [{"stageName": "prod"}]})))
                .on("apigatewayv2.get_apis", Ok(json!({"items": [{"apiId": "h1"}]})))
                .on("apigatewayv2.get_stages", Ok(json!({"items": [{"stageName": "$default"}]}))),
        );
        let ctx = context("apigateway", "eu-west-1", client);

        let mut sink = Vec::new();
        ApiGatewayCollector.collect(&ctx, &mut sink).await.unwrap();

        assert_eq!(
            sink,
            vec![
                "arn:aws:apigateway:eu-west-1::/restapis/abc",
                "arn:aws:apigateway:eu-west-1::/restapis/abc/resources/r1",
                "arn:aws:apigateway:eu-west-1::/restapis/abc/stages/prod",
                "arn:aws:apigateway:eu-west-1::/apis/h1",
                "arn:aws:apigateway:eu-west-1::/apis/h1/stages/$default",
            ]
        );
    }

    #[tokio::test]
    async fn test_rest_failure_still_lists_http_apis() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("apigateway.get_rest_apis", Err(ApiFault::service("AccessDeniedException", "no", 403)))
                .on("apigatewayv2.get_apis", Ok(json!({"items": [{"apiId": "h1"}]})))
                .on("apigatewayv2.get_stages", Ok(json!({"items": []}))),
        );
        let ctx = context("apigateway", "eu-west-1", client);

        let mut sink = Vec::new();
        let result = ApiGatewayCollector.collect(&ctx, &mut sink).await;
        assert_eq!(result.unwrap_err().code(), Some("AccessDeniedException"));
        assert_eq!(sink, vec!["arn:aws:apigateway:eu-west-1::/apis/h1"]);
    }

    #[tokio::test]
    async fn test_apis_listed_before_failed_page_are_kept() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("apigateway.get_rest_apis", Ok(json!({"item": [{"id": "abc"}], "position": "p2"})))
                .on(
                    "apigateway.get_rest_apis",
                    Err(ApiFault::service("TooManyRequestsException", "slow", 429)),
                )
                .on("apigateway.get_resources", Ok(json!({"item": []})))
                .on("apigateway.get_stages", Ok(json!({"item": [{"stageName": "prod"}]})))
                .on("apigatewayv2.get_apis", Ok(json!({"items": []}))),
        );
        let ctx = context("apigateway", "eu-west-1", client);

        let mut sink = Vec::new();
        let result = ApiGatewayCollector.collect(&ctx, &mut sink).await;

        assert_eq!(result.unwrap_err().code(), Some("TooManyRequestsException"));
        assert_eq!(
            sink,
            vec![
                "arn:aws:apigateway:eu-west-1::/restapis/abc",
                "arn:aws:apigateway:eu-west-1::/restapis/abc/stages/prod",
            ]
        );
    }
}
