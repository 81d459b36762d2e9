//! Endpoint catalog - per-service wire details loaded from embedded JSON
//!
//! The generic scanner only knows service and operation names; this catalog
//! supplies what the HTTP client needs to actually reach them: protocol,
//! signing name, endpoint host and, for REST protocols, the route of each
//! operation.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

const CATALOG_FILE: &str = include_str!("../resources/endpoints.json");

/// Wire protocol of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Action=X&Version=Y form posts, XML answers (IAM, RDS, SNS)
    Query,
    /// Query-style requests with EC2's own XML dialect
    Ec2,
    /// JSON-RPC style with X-Amz-Target header
    Json,
    /// REST with JSON body
    RestJson,
    /// REST with XML body (S3, Route53, CloudFront)
    RestXml,
}

/// Route of one REST operation
#[derive(Debug, Clone, Deserialize)]
pub struct RestOperation {
    pub http: String,
    /// Path template; `{Name}` segments are filled from request parameters.
    pub path: String,
    /// Parameter name -> query string key
    #[serde(default)]
    pub query: HashMap<String, String>,
    /// XML elements that are always lists, even with a single child
    #[serde(default)]
    pub lists: Vec<String>,
}

/// AWS service definition
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    pub protocol: Protocol,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub target_prefix: Option<String>,
    #[serde(default)]
    pub json_version: Option<String>,
    #[serde(default)]
    pub signing_name: Option<String>,
    #[serde(default)]
    pub endpoint_prefix: Option<String>,
    /// Served from a single endpoint regardless of the requested region
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub global_endpoint: Option<String>,
    #[serde(default)]
    pub signing_region: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub operations: HashMap<String, RestOperation>,
}

impl ServiceEndpoint {
    pub fn signing_name<'a>(&'a self, service: &'a str) -> &'a str {
        self.signing_name.as_deref().unwrap_or(service)
    }

    pub fn endpoint_prefix<'a>(&'a self, service: &'a str) -> &'a str {
        self.endpoint_prefix
            .as_deref()
            .unwrap_or_else(|| self.signing_name(service))
    }

    pub fn json_content_type(&self) -> String {
        format!(
            "application/x-amz-json-{}",
            self.json_version.as_deref().unwrap_or("1.1")
        )
    }

    /// Region to sign for, given the region the task targets.
    pub fn effective_region<'a>(&'a self, region: &'a str) -> &'a str {
        if self.global {
            self.signing_region.as_deref().unwrap_or("us-east-1")
        } else {
            region
        }
    }

    /// Base URL (scheme + host) for a region.
    pub fn base_url(&self, service: &str, region: &str) -> String {
        if self.global {
            if let Some(host) = &self.global_endpoint {
                return format!("https://{}", host);
            }
        }
        let region = self.effective_region(region);
        let domain = if region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        format!("https://{}.{}.{}", self.endpoint_prefix(service), region, domain)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    services: HashMap<String, ServiceEndpoint>,
}

static CATALOG: OnceLock<HashMap<String, ServiceEndpoint>> = OnceLock::new();

fn catalog() -> &'static HashMap<String, ServiceEndpoint> {
    CATALOG.get_or_init(|| {
        let file: CatalogFile = serde_json::from_str(CATALOG_FILE)
            .unwrap_or_else(|e| panic!("Failed to parse embedded endpoint catalog: {}", e));
        file.services
    })
}

/// Look up a service definition
pub fn get_service(name: &str) -> Option<&'static ServiceEndpoint> {
    catalog().get(name)
}

/// All services the client can reach, sorted
pub fn service_names() -> Vec<&'static str> {
    let mut names: Vec<&str> = catalog().keys().map(|s| s.as_str()).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::get_registry;

    #[test]
    fn test_every_mapping_is_reachable() {
        for name in get_registry().service_names() {
            let service = get_service(name).unwrap_or_else(|| panic!("no endpoint for {}", name));
            if matches!(service.protocol, Protocol::RestJson | Protocol::RestXml) {
                let method = &get_registry().get(name).unwrap().list_method;
                assert!(
                    service.operations.contains_key(method),
                    "no route for {}.{}",
                    name,
                    method
                );
            }
        }
    }

    #[test]
    fn test_query_and_ec2_have_versions() {
        for name in service_names() {
            let service = get_service(name).unwrap();
            if matches!(service.protocol, Protocol::Query | Protocol::Ec2) {
                assert!(service.api_version.is_some(), "{} lacks api_version", name);
            }
            if service.protocol == Protocol::Json {
                assert!(service.target_prefix.is_some(), "{} lacks target_prefix", name);
            }
        }
    }

    #[test]
    fn test_endpoints() {
        let lambda = get_service("lambda").unwrap();
        assert_eq!(lambda.base_url("lambda", "eu-west-1"), "https://lambda.eu-west-1.amazonaws.com");

        let iam = get_service("iam").unwrap();
        assert_eq!(iam.base_url("iam", "eu-west-1"), "https://iam.amazonaws.com");
        assert_eq!(iam.effective_region("eu-west-1"), "us-east-1");

        let ecr = get_service("ecr").unwrap();
        assert_eq!(ecr.base_url("ecr", "us-west-2"), "https://api.ecr.us-west-2.amazonaws.com");
        assert_eq!(ecr.signing_name("ecr"), "ecr");

        let elbv2 = get_service("elbv2").unwrap();
        assert_eq!(elbv2.signing_name("elbv2"), "elasticloadbalancing");
    }
}
