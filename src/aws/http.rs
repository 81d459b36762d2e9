//! Signed HTTP client
//!
//! One client for every protocol in the endpoint catalog. Requests are built
//! from the snake_case operation name and a JSON parameter object, signed
//! with SigV4 and decoded into the SDK response shape.

use super::catalog::{self, Protocol, RestOperation, ServiceEndpoint};
use super::credentials::{self, mask_credential, Credentials};
use super::signing::{sign_request, SigningParams};
use super::xml;
use super::{ApiFault, CloudClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace, warn};
use url::Url;

/// A fully built request, ready to sign and send
#[derive(Debug)]
struct WireRequest {
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

/// AWS HTTP client
pub struct AwsClient {
    http: Client,
    credentials: Credentials,
    endpoint_url: Option<String>,
}

impl AwsClient {
    /// Create a new client. With `endpoint_url` set, every request goes to
    /// that URL (LocalStack, test servers).
    pub fn new(credentials: Credentials, endpoint_url: Option<String>) -> Self {
        debug!(
            "Creating AWS client, access_key: {}, endpoint_url: {:?}",
            mask_credential(&credentials.access_key_id),
            endpoint_url
        );
        Self {
            http: Client::new(),
            credentials,
            endpoint_url: endpoint_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Build a client from ambient credentials. `AWS_ENDPOINT_URL` is used
    /// when no endpoint is given.
    pub fn from_env(profile: Option<&str>, endpoint_url: Option<String>) -> Result<Self> {
        let credentials = credentials::load_credentials(profile)
            .context("Failed to load AWS credentials")?;
        let endpoint_url = endpoint_url.or_else(|| std::env::var("AWS_ENDPOINT_URL").ok());
        Ok(Self::new(credentials, endpoint_url))
    }

    fn base_url(&self, service: &ServiceEndpoint, name: &str, region: &str) -> String {
        match &self.endpoint_url {
            Some(url) => url.clone(),
            None => service.base_url(name, region),
        }
    }

    fn build(
        &self,
        service: &ServiceEndpoint,
        name: &str,
        method: &str,
        region: &str,
        params: &Value,
    ) -> Result<WireRequest, ApiFault> {
        let base = self.base_url(service, name, region);
        let mut headers: BTreeMap<String, String> = service
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        let (http_method, url, body) = match service.protocol {
            Protocol::Query | Protocol::Ec2 => {
                let mut pairs = vec![
                    ("Action".to_string(), operation_name(method)),
                    (
                        "Version".to_string(),
                        service.api_version.clone().unwrap_or_default(),
                    ),
                ];
                flatten_query("", params, service.protocol == Protocol::Ec2, &mut pairs);
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter())
                    .finish();
                headers.insert(
                    "content-type".to_string(),
                    "application/x-www-form-urlencoded; charset=utf-8".to_string(),
                );
                (Method::POST, parse_url(&format!("{}/", base))?, body.into_bytes())
            }
            Protocol::Json => {
                let prefix = service
                    .target_prefix
                    .as_deref()
                    .unwrap_or_else(|| service.signing_name(name));
                headers.insert(
                    "x-amz-target".to_string(),
                    format!("{}.{}", prefix, operation_name(method)),
                );
                headers.insert("content-type".to_string(), service.json_content_type());
                (Method::POST, parse_url(&format!("{}/", base))?, json_body(params)?)
            }
            Protocol::RestJson | Protocol::RestXml => {
                let op = service.operations.get(method).ok_or_else(|| {
                    ApiFault::service(
                        "UnsupportedOperation",
                        &format!("no route for {}.{}", name, method),
                        0,
                    )
                })?;
                let (http_method, url, rest) = rest_url(&base, op, params)?;
                let body = if http_method == Method::GET || service.protocol == Protocol::RestXml {
                    Vec::new()
                } else {
                    headers.insert("content-type".to_string(), "application/json".to_string());
                    json_body(&Value::Object(rest))?
                };
                (http_method, url, body)
            }
        };

        Ok(WireRequest {
            method: http_method,
            url,
            headers,
            body,
        })
    }

    fn decode(
        &self,
        service: &ServiceEndpoint,
        method: &str,
        text: &str,
    ) -> Result<Value, ApiFault> {
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        match service.protocol {
            Protocol::Json | Protocol::RestJson => serde_json::from_str(text)
                .map_err(|e| ApiFault::Transport(format!("invalid JSON response: {}", e))),
            Protocol::Query => xml::parse_document(text, &[])
                .map(|(_, content)| xml::unwrap_query(content))
                .map_err(ApiFault::Transport),
            Protocol::Ec2 => xml::parse_document(text, &[])
                .map(|(_, content)| xml::shape_ec2(content))
                .map_err(ApiFault::Transport),
            Protocol::RestXml => {
                let lists = service
                    .operations
                    .get(method)
                    .map(|op| op.lists.as_slice())
                    .unwrap_or(&[]);
                xml::parse_document(text, lists)
                    .map(|(root, content)| xml::unwrap_rest(root, content))
                    .map_err(ApiFault::Transport)
            }
        }
    }
}

#[async_trait]
impl CloudClient for AwsClient {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        region: &str,
        params: &Value,
    ) -> Result<Value, ApiFault> {
        let endpoint = catalog::get_service(service).ok_or_else(|| {
            ApiFault::service(
                "UnsupportedService",
                &format!("no endpoint known for {}", service),
                0,
            )
        })?;

        let mut request = self.build(endpoint, service, method, region, params)?;
        debug!("{} {} -> {}", service, method, request.url);
        trace!("Request body: {}", String::from_utf8_lossy(&request.body));

        request.headers.insert("host".to_string(), host_header(&request.url)?);
        let signing = SigningParams {
            credentials: &self.credentials,
            region: endpoint.effective_region(region),
            service: endpoint.signing_name(service),
            time: Utc::now(),
        };
        sign_request(
            &signing,
            request.method.as_str(),
            &request.url,
            &mut request.headers,
            &request.body,
            service == "s3",
        );

        let mut builder = self.http.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            // reqwest derives Host from the URL
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiFault::Transport(e.to_string()))?;
        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| ApiFault::Transport(e.to_string()))?;

        debug!("Response status: {}", status);
        trace!("Response body (first 2000 chars): {}", truncate(&text, 2000));

        if !status.is_success() {
            let fault = parse_fault(status.as_u16(), error_type.as_deref(), &text);
            warn!(
                "AWS request failed: {} {} in {}: {}",
                service, method, region, fault
            );
            return Err(fault);
        }

        self.decode(endpoint, method, &text)
    }
}

/// `list_functions` -> `ListFunctions`
pub fn operation_name(method: &str) -> String {
    method
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Flatten a parameter object into query-protocol pairs. Lists use
/// `Name.member.N` (or `Name.N` for EC2); keys that already carry dots pass
/// through unchanged.
fn flatten_query(prefix: &str, value: &Value, ec2: bool, out: &mut Vec<(String, String)>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_query(&join(k), v, ec2, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let key = if ec2 {
                    join(&(i + 1).to_string())
                } else {
                    join(&format!("member.{}", i + 1))
                };
                flatten_query(&key, item, ec2, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Null => {}
    }
}

fn json_body(params: &Value) -> Result<Vec<u8>, ApiFault> {
    let body = match params {
        Value::Object(map) if !map.is_empty() => params.clone(),
        _ => Value::Object(Map::new()),
    };
    serde_json::to_vec(&body).map_err(|e| ApiFault::Transport(e.to_string()))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fill the route template; returns the method, the final URL and the
/// parameters that were not consumed by the path or the query string.
fn rest_url(
    base: &str,
    op: &RestOperation,
    params: &Value,
) -> Result<(Method, Url, Map<String, Value>), ApiFault> {
    let http_method = Method::from_bytes(op.http.as_bytes())
        .map_err(|e| ApiFault::Transport(format!("bad HTTP method {}: {}", op.http, e)))?;
    let params = params.as_object().cloned().unwrap_or_default();
    let mut used = HashSet::new();

    let (template, static_query) = match op.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (op.path.as_str(), None),
    };

    let mut path = String::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let end = rest[start..]
            .find('}')
            .map(|e| start + e)
            .ok_or_else(|| ApiFault::Transport(format!("bad route {}", op.path)))?;
        let name = &rest[start + 1..end];
        let value = params.get(name).and_then(scalar).ok_or_else(|| {
            ApiFault::service(
                "MissingParameter",
                &format!("route {} needs {}", op.path, name),
                0,
            )
        })?;
        path.push_str(&urlencoding::encode(&value));
        used.insert(name.to_string());
        rest = &rest[end + 1..];
    }
    path.push_str(rest);

    let mut url = parse_url(&format!("{}{}", base, path))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(static_query) = static_query {
            for part in static_query.split('&').filter(|p| !p.is_empty()) {
                let (k, v) = part.split_once('=').unwrap_or((part, ""));
                query.append_pair(k, v);
            }
        }
        for (param, key) in &op.query {
            if let Some(value) = params.get(param).and_then(scalar) {
                query.append_pair(key, &value);
                used.insert(param.clone());
            }
        }
        if http_method == Method::GET {
            for (param, value) in &params {
                if used.contains(param) {
                    continue;
                }
                if let Some(value) = scalar(value) {
                    query.append_pair(param, &value);
                    used.insert(param.clone());
                }
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }

    let remaining = params
        .into_iter()
        .filter(|(k, _)| !used.contains(k))
        .collect();
    Ok((http_method, url, remaining))
}

fn parse_url(raw: &str) -> Result<Url, ApiFault> {
    Url::parse(raw).map_err(|e| ApiFault::Transport(format!("invalid URL {}: {}", raw, e)))
}

fn host_header(url: &Url) -> Result<String, ApiFault> {
    let host = url
        .host_str()
        .ok_or_else(|| ApiFault::Transport(format!("URL without host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Turn an error response into a fault carrying the service's error code.
pub fn parse_fault(status: u16, error_type: Option<&str>, body: &str) -> ApiFault {
    let mut code = error_type
        .map(|t| t.split(':').next().unwrap_or(t).to_string())
        .filter(|c| !c.is_empty());
    let mut message = None;

    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if code.is_none() {
            code = ["__type", "code", "Code"]
                .iter()
                .find_map(|k| json.get(*k).and_then(Value::as_str))
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
        }
        message = ["message", "Message", "errorMessage"]
            .iter()
            .find_map(|k| json.get(*k).and_then(Value::as_str))
            .map(str::to_string);
    } else if let Ok((_, content)) = xml::parse_document(body, &[]) {
        if code.is_none() {
            code = xml::find_text(&content, "Code");
        }
        message = xml::find_text(&content, "Message");
    }

    let code = code.unwrap_or_else(|| {
        if status == 429 {
            "TooManyRequestsException".to_string()
        } else {
            format!("Http{}", status)
        }
    });
    let message = message.unwrap_or_else(|| truncate(body, 200).to_string());
    ApiFault::Service {
        code,
        message,
        status,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AwsClient {
        AwsClient::new(
            Credentials::new("AKIDEXAMPLE", "secret", None),
            Some("http://127.0.0.1:4566/".to_string()),
        )
    }

    #[test]
    fn test_operation_name() {
        assert_eq!(operation_name("list_functions"), "ListFunctions");
        assert_eq!(operation_name("list_objects_v2"), "ListObjectsV2");
        assert_eq!(operation_name("describe_db_instances"), "DescribeDbInstances");
    }

    #[test]
    fn test_flatten_query() {
        let mut out = Vec::new();
        let params = json!({
            "Filters.member.1.Name": "engine",
            "Names": ["a", "b"],
            "Owner": {"Id": "x"},
            "MaxRecords": 100,
            "Skip": null
        });
        flatten_query("", &params, false, &mut out);
        out.sort();
        assert_eq!(
            out,
            vec![
                ("Filters.member.1.Name".to_string(), "engine".to_string()),
                ("MaxRecords".to_string(), "100".to_string()),
                ("Names.member.1".to_string(), "a".to_string()),
                ("Names.member.2".to_string(), "b".to_string()),
                ("Owner.Id".to_string(), "x".to_string()),
            ]
        );

        let mut out = Vec::new();
        flatten_query("", &json!({"GroupId": ["sg-1"]}), true, &mut out);
        assert_eq!(out, vec![("GroupId.1".to_string(), "sg-1".to_string())]);
    }

    #[test]
    fn test_build_query_request() {
        let c = client();
        let sns = catalog::get_service("sns").unwrap();
        let req = c.build(sns, "sns", "list_topics", "eu-west-1", &json!({"NextToken": "t"})).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url.as_str(), "http://127.0.0.1:4566/");
        let body = String::from_utf8(req.body).unwrap();
        assert!(body.starts_with("Action=ListTopics&Version=2010-03-31"));
        assert!(body.contains("NextToken=t"));
    }

    #[test]
    fn test_build_json_request() {
        let c = client();
        let ddb = catalog::get_service("dynamodb").unwrap();
        let req = c.build(ddb, "dynamodb", "list_tables", "us-east-1", &json!({})).unwrap();
        assert_eq!(req.headers["x-amz-target"], "DynamoDB_20120810.ListTables");
        assert_eq!(req.headers["content-type"], "application/x-amz-json-1.0");
        assert_eq!(req.body, b"{}");
    }

    #[test]
    fn test_build_rest_request() {
        let c = client();
        let s3 = catalog::get_service("s3").unwrap();
        let req = c
            .build(s3, "s3", "list_objects_v2", "us-east-1", &json!({"Bucket": "my bucket", "MaxKeys": 5}))
            .unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url.path(), "/my%20bucket");
        let query: Vec<(String, String)> = req.url.query_pairs().map(|(k, v)| (k.into(), v.into())).collect();
        assert!(query.contains(&("list-type".to_string(), "2".to_string())));
        assert!(query.contains(&("max-keys".to_string(), "5".to_string())));

        let missing = c.build(s3, "s3", "get_bucket_location", "us-east-1", &json!({}));
        assert_eq!(missing.unwrap_err().code(), Some("MissingParameter"));

        let batch = catalog::get_service("batch").unwrap();
        let req = c
            .build(batch, "batch", "describe_compute_environments", "us-east-1", &json!({"nextToken": "n"}))
            .unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url.query(), None);
        assert_eq!(serde_json::from_slice::<Value>(&req.body).unwrap(), json!({"nextToken": "n"}));
    }

    #[test]
    fn test_parse_fault() {
        let f = parse_fault(400, None, r#"{"__type":"com.amazonaws.dynamodb.v20120810#ThrottlingException","message":"slow"}"#);
        assert_eq!(f, ApiFault::service("ThrottlingException", "slow", 400));

        let f = parse_fault(403, Some("AccessDeniedException:http://internal.amazon.com/"), "{}");
        assert_eq!(f.code(), Some("AccessDeniedException"));

        let xml = "<ErrorResponse><Error><Code>OptInRequired</Code><Message>sign up</Message></Error></ErrorResponse>";
        assert_eq!(parse_fault(401, None, xml), ApiFault::service("OptInRequired", "sign up", 401));

        assert_eq!(parse_fault(429, None, "").code(), Some("TooManyRequestsException"));
        assert_eq!(parse_fault(502, None, "bad gateway").code(), Some("Http502"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
