//! Mapping Registry - Load service mappings from JSON
//!
//! Every service the generic collector understands is described by a mapping
//! entry in one of the embedded `resources/*.json` files: which list method
//! to call, where the resources sit in the response, and how to turn each
//! element into an ARN. Entries are validated when the registry is built, so
//! a malformed mapping is a load-time error rather than a mid-scan surprise.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded mapping files (compiled into the binary)
const MAPPING_FILES: &[&str] = &[
    include_str!("../resources/compute.json"),
    include_str!("../resources/database.json"),
    include_str!("../resources/networking.json"),
    include_str!("../resources/security.json"),
    include_str!("../resources/management.json"),
    include_str!("../resources/integration.json"),
    include_str!("../resources/analytics.json"),
    include_str!("../resources/devtools.json"),
];

const PLACEHOLDERS: &[&str] = &["region", "account_id", "id"];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid mapping JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("mapping '{service}': unknown extraction mode '{mode}'")]
    UnknownMode { service: String, mode: String },
    #[error("mapping '{service}': mode '{mode}' requires '{field}'")]
    MissingField {
        service: String,
        mode: String,
        field: &'static str,
    },
    #[error("mapping '{service}': '{field}' must not be empty")]
    EmptyField { service: String, field: &'static str },
    #[error("mapping '{service}': bad ARN template '{template}': {reason}")]
    BadTemplate {
        service: String,
        template: String,
        reason: String,
    },
}

/// ARN format string with `{region}`, `{account_id}` and `{id}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnTemplate(String);

impl ArnTemplate {
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut rest = template;
        let mut has_id = false;
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                return Err("unclosed placeholder".to_string());
            };
            let name = &after[..close];
            if !PLACEHOLDERS.contains(&name) {
                return Err(format!("unknown placeholder '{{{}}}'", name));
            }
            has_id |= name == "id";
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err("unbalanced '}'".to_string());
        }
        if !has_id {
            return Err("missing '{id}' placeholder".to_string());
        }
        Ok(Self(template.to_string()))
    }

    pub fn format(&self, region: &str, account_id: &str, id: &str) -> String {
        self.0
            .replace("{region}", region)
            .replace("{account_id}", account_id)
            .replace("{id}", id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rewrite applied to an identifier before it is placed in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdTransform {
    /// Keep what follows the final `/` (queue URLs, resource paths).
    LastSegment,
}

impl IdTransform {
    pub fn apply<'a>(&self, id: &'a str) -> &'a str {
        match self {
            IdTransform::LastSegment => id.rsplit('/').next().unwrap_or(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdField {
    pub attribute: String,
    pub template: ArnTemplate,
    pub transform: Option<IdTransform>,
}

/// How the response is turned into ARNs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// `response_path` names a single ARN string.
    DirectArn,
    /// `response_path` names a list of identifiers.
    IdList {
        template: ArnTemplate,
        transform: Option<IdTransform>,
    },
    /// `response_path` names a list of ARN strings.
    ArnList,
    /// `response_path` names a list of objects; the ARN is read from
    /// `arn_attribute` when present, otherwise built from `id`.
    ObjectList {
        arn_attribute: Option<String>,
        id: Option<IdField>,
    },
}

/// Request shapes that need more than static parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomRequest {
    /// Cost queries over the trailing `days` days, monthly granularity.
    CostWindow { days: u32 },
    /// Metric listing restricted to one namespace.
    Namespace { namespace: String },
    /// The call requires an explicit (empty) filter object.
    EmptyFilter,
    /// The service cannot be enumerated without input we do not have.
    Unsupported { reason: String },
}

impl CustomRequest {
    fn apply(&self, params: &mut Map<String, Value>, today: NaiveDate) {
        match self {
            CustomRequest::CostWindow { days } => {
                let start = today - chrono::Duration::days(i64::from(*days));
                params.insert(
                    "TimePeriod".to_string(),
                    serde_json::json!({
                        "Start": start.format("%Y-%m-%d").to_string(),
                        "End": today.format("%Y-%m-%d").to_string(),
                    }),
                );
                params.insert("Granularity".to_string(), Value::from("MONTHLY"));
                params.insert("Metrics".to_string(), serde_json::json!(["UnblendedCost"]));
            }
            CustomRequest::Namespace { namespace } => {
                params.insert("Namespace".to_string(), Value::from(namespace.as_str()));
            }
            CustomRequest::EmptyFilter => {
                params.insert("filter".to_string(), Value::Object(Map::new()));
            }
            CustomRequest::Unsupported { .. } => {}
        }
    }
}

/// Token names for paginated list calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    /// Request parameter carrying the continuation token.
    pub input_token: String,
    /// Response field carrying the next token.
    pub output_token: String,
}

/// A validated mapping entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMapping {
    pub service_name: String,
    pub list_method: String,
    pub response_path: String,
    pub extraction: Extraction,
    /// Static request parameters. String values may use `{account_id}` and `{region}`.
    pub params: Map<String, Value>,
    pub pagination: Option<Pagination>,
    pub custom: Option<CustomRequest>,
}

impl ServiceMapping {
    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }

    /// Reason the service cannot be listed, if it is marked unsupported.
    pub fn unsupported_reason(&self) -> Option<&str> {
        match &self.custom {
            Some(CustomRequest::Unsupported { reason }) => Some(reason),
            _ => None,
        }
    }

    /// Build the first-page request parameters for one task.
    pub fn request_params(&self, region: &str, account_id: &str, today: NaiveDate) -> Value {
        let mut params = Map::new();
        for (key, value) in &self.params {
            params.insert(key.clone(), substitute(value, region, account_id));
        }
        if let Some(custom) = &self.custom {
            custom.apply(&mut params, today);
        }
        Value::Object(params)
    }
}

fn substitute(value: &Value, region: &str, account_id: &str) -> Value {
    match value {
        Value::String(s) => Value::String(
            s.replace("{account_id}", account_id)
                .replace("{region}", region),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(v, region, account_id))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, region, account_id)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Mapping entry as written in the JSON files
#[derive(Debug, Clone, Deserialize)]
struct MappingDef {
    method: String,
    key: String,
    mode: String,
    #[serde(default)]
    arn_format: Option<String>,
    #[serde(default)]
    arn_attr: Option<String>,
    #[serde(default)]
    id_attr: Option<String>,
    #[serde(default)]
    id_transform: Option<IdTransform>,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
    #[serde(default)]
    custom: Option<CustomRequest>,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
struct MappingFile {
    #[serde(default)]
    mappings: HashMap<String, MappingDef>,
}

impl MappingDef {
    fn into_mapping(self, service: &str) -> Result<ServiceMapping, RegistryError> {
        if self.method.trim().is_empty() {
            return Err(RegistryError::EmptyField {
                service: service.to_string(),
                field: "method",
            });
        }
        if self.key.trim().is_empty() {
            return Err(RegistryError::EmptyField {
                service: service.to_string(),
                field: "key",
            });
        }

        let template = |raw: &str| {
            ArnTemplate::parse(raw).map_err(|reason| RegistryError::BadTemplate {
                service: service.to_string(),
                template: raw.to_string(),
                reason,
            })
        };
        let missing = |field: &'static str| RegistryError::MissingField {
            service: service.to_string(),
            mode: self.mode.clone(),
            field,
        };

        let extraction = match self.mode.as_str() {
            "direct_arn" => Extraction::DirectArn,
            "arn_list" => Extraction::ArnList,
            "id_list" => {
                let raw = self.arn_format.as_deref().ok_or_else(|| missing("arn_format"))?;
                Extraction::IdList {
                    template: template(raw)?,
                    transform: self.id_transform,
                }
            }
            "object_list" => {
                let id = match (&self.id_attr, &self.arn_format) {
                    (Some(attribute), Some(raw)) => Some(IdField {
                        attribute: attribute.clone(),
                        template: template(raw)?,
                        transform: self.id_transform,
                    }),
                    (Some(_), None) => return Err(missing("arn_format")),
                    (None, _) => None,
                };
                if self.arn_attr.is_none() && id.is_none() {
                    return Err(missing("arn_attr or id_attr"));
                }
                Extraction::ObjectList {
                    arn_attribute: self.arn_attr.clone(),
                    id,
                }
            }
            other => {
                return Err(RegistryError::UnknownMode {
                    service: service.to_string(),
                    mode: other.to_string(),
                })
            }
        };

        Ok(ServiceMapping {
            service_name: service.to_string(),
            list_method: self.method,
            response_path: self.key,
            extraction,
            params: self.params,
            pagination: self.pagination,
            custom: self.custom,
        })
    }
}

/// Read-only lookup from service name to mapping.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    mappings: HashMap<String, ServiceMapping>,
}

impl MappingRegistry {
    /// Build a registry from one or more mapping documents. Later documents
    /// win on duplicate service names.
    pub fn from_json_docs(docs: &[&str]) -> Result<Self, RegistryError> {
        let mut mappings = HashMap::new();
        for doc in docs {
            let file: MappingFile = serde_json::from_str(doc)?;
            for (service, def) in file.mappings {
                let mapping = def.into_mapping(&service)?;
                mappings.insert(service, mapping);
            }
        }
        Ok(Self { mappings })
    }

    pub fn from_mappings(items: impl IntoIterator<Item = ServiceMapping>) -> Self {
        Self {
            mappings: items
                .into_iter()
                .map(|m| (m.service_name.clone(), m))
                .collect(),
        }
    }

    pub fn get(&self, service: &str) -> Option<&ServiceMapping> {
        self.mappings.get(service)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.mappings.contains_key(service)
    }

    /// All mapped service names, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mappings.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<MappingRegistry> = OnceLock::new();

/// Get the built-in registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static MappingRegistry {
    REGISTRY.get_or_init(|| {
        MappingRegistry::from_json_docs(MAPPING_FILES)
            .unwrap_or_else(|e| panic!("Failed to load embedded service mappings: {}", e))
    })
}

/// Get a built-in mapping by service name
pub fn get_mapping(service: &str) -> Option<&'static ServiceMapping> {
    get_registry().get(service)
}
