//! Extraction Engine
//!
//! Turns one list/describe response into ARN strings according to the
//! mapping's extraction mode. Missing paths and elements without the
//! configured attribute yield nothing rather than an error.

use super::registry::{Extraction, IdField, IdTransform, ServiceMapping};
use serde_json::Value;

/// Walk a dot-notation path. An absent segment yields `None`.
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, part| current.get(part))
}

/// The array at `path`, or an empty slice when the path is absent or not a list.
pub fn items_at<'a>(value: &'a Value, path: &str) -> &'a [Value] {
    walk_path(value, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// String at `path`, if present and a string.
pub fn str_at<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    walk_path(value, path).and_then(Value::as_str)
}

/// Identifiers may come back as strings or numbers.
fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn transformed(id: String, transform: Option<IdTransform>) -> String {
    match transform {
        Some(t) => t.apply(&id).to_string(),
        None => id,
    }
}

fn from_id_field(item: &Value, field: &IdField, region: &str, account_id: &str) -> Option<String> {
    let id = walk_path(item, &field.attribute).and_then(scalar_id)?;
    let id = transformed(id, field.transform);
    Some(field.template.format(region, account_id, &id))
}

/// Extract ARNs from a single response.
pub fn extract(
    mapping: &ServiceMapping,
    response: &Value,
    region: &str,
    account_id: &str,
) -> Vec<String> {
    match &mapping.extraction {
        Extraction::DirectArn => str_at(response, &mapping.response_path)
            .filter(|s| !s.is_empty())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        Extraction::IdList { template, transform } => items_at(response, &mapping.response_path)
            .iter()
            .filter_map(scalar_id)
            .map(|id| template.format(region, account_id, &transformed(id, *transform)))
            .collect(),
        Extraction::ArnList => items_at(response, &mapping.response_path)
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Extraction::ObjectList { arn_attribute, id } => items_at(response, &mapping.response_path)
            .iter()
            .filter_map(|item| {
                let direct = arn_attribute
                    .as_deref()
                    .and_then(|attr| walk_path(item, attr))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                direct.or_else(|| {
                    id.as_ref()
                        .and_then(|field| from_id_field(item, field, region, account_id))
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::{ArnTemplate, MappingRegistry};
    use serde_json::json;

    fn mapping(path: &str, extraction: Extraction) -> ServiceMapping {
        ServiceMapping {
            service_name: "test".to_string(),
            list_method: "list_things".to_string(),
            response_path: path.to_string(),
            extraction,
            params: Default::default(),
            pagination: None,
            custom: None,
        }
    }

    fn template(raw: &str) -> ArnTemplate {
        ArnTemplate::parse(raw).unwrap()
    }

    #[test]
    fn test_direct_arn() {
        let m = mapping("HubArn", Extraction::DirectArn);
        let arns = extract(&m, &json!({"HubArn": "arn:aws:securityhub:us-east-1:1:hub/default"}), "us-east-1", "1");
        assert_eq!(arns, vec!["arn:aws:securityhub:us-east-1:1:hub/default"]);

        assert!(extract(&m, &json!({}), "us-east-1", "1").is_empty());
        assert!(extract(&m, &json!({"HubArn": null}), "us-east-1", "1").is_empty());
    }

    #[test]
    fn test_id_list() {
        let m = mapping(
            "TableNames",
            Extraction::IdList {
                template: template("arn:aws:dynamodb:{region}:{account_id}:table/{id}"),
                transform: None,
            },
        );
        let arns = extract(&m, &json!({"TableNames": ["t1", "t2"]}), "us-east-1", "123456789012");
        assert_eq!(
            arns,
            vec![
                "arn:aws:dynamodb:us-east-1:123456789012:table/t1",
                "arn:aws:dynamodb:us-east-1:123456789012:table/t2",
            ]
        );
    }

    #[test]
    fn test_id_list_with_transform_and_numbers() {
        let m = mapping(
            "QueueUrls",
            Extraction::IdList {
                template: template("arn:aws:sqs:{region}:{account_id}:{id}"),
                transform: Some(IdTransform::LastSegment),
            },
        );
        let arns = extract(
            &m,
            &json!({"QueueUrls": ["https://sqs.eu-west-1.amazonaws.com/1/jobs", 42, null]}),
            "eu-west-1",
            "1",
        );
        assert_eq!(arns, vec!["arn:aws:sqs:eu-west-1:1:jobs", "arn:aws:sqs:eu-west-1:1:42"]);
    }

    #[test]
    fn test_arn_list() {
        let m = mapping("clusterArns", Extraction::ArnList);
        let arns = extract(&m, &json!({"clusterArns": ["arn:aws:ecs:x:1:cluster/a", 7]}), "x", "1");
        assert_eq!(arns, vec!["arn:aws:ecs:x:1:cluster/a"]);
    }

    #[test]
    fn test_object_list_prefers_arn_attribute() {
        let m = mapping(
            "logGroups",
            Extraction::ObjectList {
                arn_attribute: Some("arn".to_string()),
                id: Some(IdField {
                    attribute: "logGroupName".to_string(),
                    template: template("arn:aws:logs:{region}:{account_id}:log-group:{id}"),
                    transform: None,
                }),
            },
        );
        let response = json!({"logGroups": [
            {"arn": "arn:aws:logs:us-east-1:1:log-group:a:*", "logGroupName": "a"},
            {"logGroupName": "b"},
            {"somethingElse": true}
        ]});
        let arns = extract(&m, &response, "us-east-1", "1");
        assert_eq!(
            arns,
            vec!["arn:aws:logs:us-east-1:1:log-group:a:*", "arn:aws:logs:us-east-1:1:log-group:b"]
        );
    }

    #[test]
    fn test_object_list_skips_missing_attribute() {
        let m = mapping(
            "Functions",
            Extraction::ObjectList {
                arn_attribute: Some("FunctionArn".to_string()),
                id: None,
            },
        );
        let arns = extract(
            &m,
            &json!({"Functions": [{"FunctionArn": "arn:aws:lambda:r:1:function:f"}, {"FunctionName": "g"}]}),
            "r",
            "1",
        );
        assert_eq!(arns, vec!["arn:aws:lambda:r:1:function:f"]);
    }

    #[test]
    fn test_nested_path_and_missing_segment() {
        let m = mapping("DistributionList.Items", Extraction::ObjectList {
            arn_attribute: Some("ARN".to_string()),
            id: None,
        });
        let response = json!({"DistributionList": {"Items": [{"ARN": "arn:aws:cloudfront::1:distribution/E1"}]}});
        assert_eq!(extract(&m, &response, "us-east-1", "1").len(), 1);
        assert!(extract(&m, &json!({"DistributionList": {}}), "us-east-1", "1").is_empty());
        assert!(extract(&m, &json!({"DistributionList": {"Items": null}}), "us-east-1", "1").is_empty());
    }

    #[test]
    fn test_dotted_id_attribute() {
        let registry = MappingRegistry::from_json_docs(&[r#"{"mappings": {"ce": {
            "method": "get_cost_and_usage", "key": "ResultsByTime", "mode": "object_list",
            "id_attr": "TimePeriod.Start", "arn_format": "arn:aws:ce::{account_id}:cost-period/{id}"}}}"#])
        .unwrap();
        let m = registry.get("ce").unwrap();
        let arns = extract(
            m,
            &json!({"ResultsByTime": [{"TimePeriod": {"Start": "2024-03-01", "End": "2024-04-01"}}]}),
            "us-east-1",
            "1",
        );
        assert_eq!(arns, vec!["arn:aws:ce::1:cost-period/2024-03-01"]);
    }

    #[test]
    fn test_walk_path() {
        let v = json!({"a": {"b": {"c": 1}}});
        assert_eq!(walk_path(&v, "a.b.c"), Some(&json!(1)));
        assert_eq!(walk_path(&v, "a.x.c"), None);
        assert_eq!(walk_path(&v, ""), Some(&v));
    }
}
