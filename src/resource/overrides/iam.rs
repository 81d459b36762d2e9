use super::{collect_listings, Listing};
use crate::aws::ApiFault;
use crate::resource::collector::{Collector, TaskContext};
use async_trait::async_trait;

const LISTINGS: &[Listing] = &[
    Listing::arns("list_roles", "Roles", "Arn").paginated("Marker", "Marker"),
    Listing::arns("list_users", "Users", "Arn").paginated("Marker", "Marker"),
    // Customer managed policies only; AWS managed ones are not account resources
    Listing::arns("list_policies", "Policies", "Arn")
        .paginated("Marker", "Marker")
        .with_params(&[("Scope", "Local")]),
    Listing::arns("list_groups", "Groups", "Arn").paginated("Marker", "Marker"),
    Listing::arns("list_instance_profiles", "InstanceProfiles", "Arn")
        .paginated("Marker", "Marker"),
    Listing::arns("list_saml_providers", "SAMLProviderList", "Arn"),
    Listing::arns("list_server_certificates", "ServerCertificateMetadataList", "Arn")
        .paginated("Marker", "Marker"),
];

pub struct IamCollector;

#[async_trait]
impl Collector for IamCollector {
    async fn collect(&self, ctx: &TaskContext, sink: &mut Vec<String>) -> Result<(), ApiFault> {
        collect_listings(ctx, "iam", LISTINGS, sink).await
    }
}
