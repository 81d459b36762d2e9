//! Account/Region Resolver
//!
//! One-time lookups that must succeed before any task is planned.

use super::retry::Retrier;
use crate::aws::{ApiFault, CloudClient};
use crate::resource::extract::{items_at, str_at};
use serde_json::json;
use tracing::debug;

pub struct Resolver<'a> {
    client: &'a dyn CloudClient,
    retrier: &'a Retrier,
    region: &'a str,
}

impl<'a> Resolver<'a> {
    /// `region` is where STS and EC2 are asked.
    pub fn new(client: &'a dyn CloudClient, retrier: &'a Retrier, region: &'a str) -> Self {
        Self {
            client,
            retrier,
            region,
        }
    }

    /// Account id of the caller's credentials
    pub async fn account_id(&self) -> Result<String, ApiFault> {
        let params = json!({});
        let response = self
            .retrier
            .call("sts.get_caller_identity", || {
                self.client
                    .invoke("sts", "get_caller_identity", self.region, &params)
            })
            .await?;
        let account = str_at(&response, "Account")
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ApiFault::Transport("GetCallerIdentity returned no Account".to_string()))?;
        debug!("Resolved account {}", account);
        Ok(account.to_string())
    }

    /// Regions enabled for the account, sorted
    pub async fn enabled_regions(&self) -> Result<Vec<String>, ApiFault> {
        let params = json!({});
        let response = self
            .retrier
            .call("ec2.describe_regions", || {
                self.client.invoke("ec2", "describe_regions", self.region, &params)
            })
            .await?;
        let mut regions: Vec<String> = items_at(&response, "Regions")
            .iter()
            .filter_map(|r| str_at(r, "RegionName"))
            .map(str::to_string)
            .collect();
        regions.sort();
        regions.dedup();
        debug!("Resolved {} enabled regions", regions.len());
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::collector::tests::{context, ScriptedClient};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_account_and_regions() {
        let client = Arc::new(
            ScriptedClient::default()
                .on("sts.get_caller_identity", Ok(json!({"Account": "123456789012", "Arn": "arn:aws:iam::123456789012:user/me"})))
                .on(
                    "ec2.describe_regions",
                    Ok(json!({"Regions": [{"RegionName": "us-west-2"}, {"RegionName": "eu-west-1"}]})),
                ),
        );
        let ctx = context("sts", "us-east-1", client.clone());
        let resolver = Resolver::new(client.as_ref(), &ctx.retrier, "us-east-1");

        assert_eq!(resolver.account_id().await.unwrap(), "123456789012");
        assert_eq!(resolver.enabled_regions().await.unwrap(), vec!["eu-west-1", "us-west-2"]);
    }

    #[tokio::test]
    async fn test_identity_failure() {
        let client = Arc::new(ScriptedClient::default().on(
            "sts.get_caller_identity",
            Err(ApiFault::service("InvalidClientTokenId", "bad token", 403)),
        ));
        let ctx = context("sts", "us-east-1", client.clone());
        let resolver = Resolver::new(client.as_ref(), &ctx.retrier, "us-east-1");

        assert_eq!(resolver.account_id().await.unwrap_err().code(), Some("InvalidClientTokenId"));

        let empty = Arc::new(ScriptedClient::default().on("sts.get_caller_identity", Ok(json!({}))));
        let resolver = Resolver::new(empty.as_ref(), &ctx.retrier, "us-east-1");
        assert!(matches!(resolver.account_id().await, Err(ApiFault::Transport(_))));
    }
}
