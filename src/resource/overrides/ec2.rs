use super::{collect_listings, Listing};
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext};
use async_trait::async_trait;

const LISTINGS: &[Listing] = &[
    Listing::ids(
        "describe_instances",
        "Reservations",
        "InstanceId",
        "arn:aws:ec2:{region}:{account_id}:instance/{id}",
    )
    .nested("Instances")
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_volumes",
        "Volumes",
        "VolumeId",
        "arn:aws:ec2:{region}:{account_id}:volume/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_security_groups",
        "SecurityGroups",
        "GroupId",
        "arn:aws:ec2:{region}:{account_id}:security-group/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_addresses",
        "Addresses",
        "AllocationId",
        "arn:aws:ec2:{region}:{account_id}:elastic-ip/{id}",
    ),
    Listing::ids(
        "describe_vpcs",
        "Vpcs",
        "VpcId",
        "arn:aws:ec2:{region}:{account_id}:vpc/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_subnets",
        "Subnets",
        "SubnetId",
        "arn:aws:ec2:{region}:{account_id}:subnet/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_route_tables",
        "RouteTables",
        "RouteTableId",
        "arn:aws:ec2:{region}:{account_id}:route-table/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_network_acls",
        "NetworkAcls",
        "NetworkAclId",
        "arn:aws:ec2:{region}:{account_id}:network-acl/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_internet_gateways",
        "InternetGateways",
        "InternetGatewayId",
        "arn:aws:ec2:{region}:{account_id}:internet-gateway/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_nat_gateways",
        "NatGateways",
        "NatGatewayId",
        "arn:aws:ec2:{region}:{account_id}:natgateway/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_network_interfaces",
        "NetworkInterfaces",
        "NetworkInterfaceId",
        "arn:aws:ec2:{region}:{account_id}:network-interface/{id}",
    )
    .paginated("NextToken", "NextToken"),
    Listing::ids(
        "describe_transit_gateways",
        "TransitGateways",
        "TransitGatewayId",
        "arn:aws:ec2:{region}:{account_id}:transit-gateway/{id}",
    )
    .paginated("NextToken", "NextToken"),
];

/// Instances, volumes and the VPC networking objects of one region
pub struct Ec2Collector;

#[async_trait]
impl Collector for Ec2Collector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        collect_listings(ctx, "ec2", LISTINGS, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::collector::tests::{context, ScriptedClient};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_instances_and_vpcs() {
        let client = Arc::new(
            ScriptedClient::default()
                .on(
                    "ec2.describe_instances",
                    Ok(json!({"Reservations": [
                        {"Instances": [{"InstanceId": "i-1"}, {"InstanceId": "i-2"}]},
                        {"Instances": [{"InstanceId": "i-3"}]}
                    ]})),
                )
                .on("ec2.describe_vpcs", Ok(json!({"Vpcs": [{"VpcId": "vpc-1"}]})))
                .on("ec2.describe_addresses", Ok(json!({"Addresses": [{"PublicIp": "1.2.3.4"}]}))),
        );
        let ctx = context("ec2", "us-west-2", client);

        let mut sink = Vec::new();
        // Listings without a scripted answer report NotFound
        let result = Ec2Collector.collect(&ctx, &mut sink).await;
        assert_eq!(result.unwrap_err().code(), Some("ResourceNotFoundException"));

        sink.sort();
        assert_eq!(
            sink,
            vec![
                "arn:aws:ec2:us-west-2:123456789012:instance/i-1",
                "arn:aws:ec2:us-west-2:123456789012:instance/i-2",
                "arn:aws:ec2:us-west-2:123456789012:instance/i-3",
                "arn:aws:ec2:us-west-2:123456789012:vpc/vpc-1",
            ]
        );
    }

    #[tokio::test]
    async fn test_disabled_region_makes_one_call() {
        let optin = || -> Result<serde_json::Value, ApiFault> {
            Err(ApiFault::service("OptInRequired", "region not enabled", 403))
        };
        let mut client = ScriptedClient::default();
        for listing in LISTINGS {
            client = client.on(&format!("ec2.{}", listing.method), optin());
        }
        let client = Arc::new(client);
        let ctx = context("ec2", "me-south-1", client.clone());

        let mut sink = Vec::new();
        let result = Ec2Collector.collect(&ctx, &mut sink).await;

        assert_eq!(result.unwrap_err().code(), Some("OptInRequired"));
        assert_eq!(client.calls.lock().unwrap().len(), 1);
        assert!(sink.is_empty());
    }
}
