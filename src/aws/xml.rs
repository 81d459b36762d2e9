//! XML response decoding
//!
//! Converts query, ec2 and rest-xml answers into the JSON shape the SDKs
//! expose, so mappings can use the same response paths for every protocol:
//! list wrappers (`member`, `item`, `<Buckets><Bucket>`) become arrays, the
//! `XResponse/XResult` envelope is removed, and EC2's lowerCamel `...Set`
//! names become `UpperCamel` plurals.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Parse a document into `(root element name, root content)`.
pub fn parse_document(xml: &str, lists: &[String]) -> Result<(String, Value), String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let value = parse_element(&mut reader, &name, lists)?;
                return Ok((name, value));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                return Ok((name, Value::Null));
            }
            Ok(Event::Eof) => return Err("empty XML document".to_string()),
            Ok(_) => {}
            Err(e) => return Err(format!("XML parse error: {}", e)),
        }
    }
}

fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    // Repeated siblings collapse into an array
    if let Some(existing) = map.get_mut(&name) {
        match existing {
            Value::Array(items) => items.push(value),
            _ => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    } else {
        map.insert(name, value);
    }
}

fn parse_element(reader: &mut Reader<&[u8]>, name: &str, lists: &[String]) -> Result<Value, String> {
    let mut map = Map::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let child = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let value = parse_element(reader, &child, lists)?;
                insert_child(&mut map, child, value);
            }
            Ok(Event::Empty(e)) => {
                let child = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                insert_child(&mut map, child, Value::Null);
            }
            Ok(Event::Text(e)) => {
                let chunk = e.unescape().map_err(|e| format!("XML text error: {}", e))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(_)) | Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("XML parse error: {}", e)),
        }
    }

    if map.is_empty() {
        return Ok(if text.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        });
    }

    for hinted in lists {
        if let Some(value) = map.get_mut(hinted) {
            if !value.is_array() && !value.is_null() && !is_single_wrapper(value) {
                let single = value.take();
                *value = Value::Array(vec![single]);
            }
        }
    }

    if map.len() == 1 {
        let is_list = {
            let (child, _) = map.iter().next().ok_or("unreachable")?;
            child == "member"
                || child == "item"
                || (name != child && name.starts_with(child.as_str()))
                || lists.iter().any(|l| l == name)
        };
        if is_list {
            let (_, value) = map.into_iter().next().ok_or("unreachable")?;
            return Ok(match value {
                Value::Array(items) => Value::Array(items),
                other => Value::Array(vec![other]),
            });
        }
    }

    Ok(Value::Object(map))
}

/// An object with exactly one key is a list wrapper that gets unwrapped at
/// its own level, so the parent leaves it alone.
fn is_single_wrapper(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1)
}

/// Query protocol: `<OpResponse><OpResult>...</OpResult><ResponseMetadata/></OpResponse>`
pub fn unwrap_query(content: Value) -> Value {
    match content {
        Value::Object(map) => {
            let result = map
                .iter()
                .find(|(k, _)| k.ends_with("Result"))
                .map(|(_, v)| v.clone());
            match result {
                Some(Value::Object(inner)) => Value::Object(inner),
                Some(_) => Value::Object(Map::new()),
                None => Value::Object(map),
            }
        }
        _ => Value::Object(Map::new()),
    }
}

/// REST-XML: the root element is the response, unless it only carries text
/// (`<LocationConstraint>eu-west-1</LocationConstraint>`).
pub fn unwrap_rest(root: String, content: Value) -> Value {
    match content {
        Value::Object(map) => Value::Object(map),
        scalar => {
            let mut map = Map::new();
            map.insert(root, scalar);
            Value::Object(map)
        }
    }
}

/// EC2: drop `requestId`, rename keys to the SDK casing.
pub fn shape_ec2(content: Value) -> Value {
    match shape_ec2_value(content) {
        Value::Object(mut map) => {
            map.remove("RequestId");
            Value::Object(map)
        }
        _ => Value::Object(Map::new()),
    }
}

fn shape_ec2_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = shape_ec2_value(v);
                    (ec2_key(&k, &v), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(shape_ec2_value).collect()),
        other => other,
    }
}

fn ec2_key(key: &str, value: &Value) -> String {
    let mut name = key.to_string();
    if value.is_array() || value.is_null() {
        if let Some(base) = key.strip_suffix("Set").or_else(|| key.strip_suffix("Info")) {
            name = if base.ends_with('s') {
                base.to_string()
            } else {
                format!("{}s", base)
            };
        }
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}

/// First string found under `key` anywhere in the tree.
pub fn find_text(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get(key) {
                return Some(s.clone());
            }
            map.values().find_map(|v| find_text(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_text(v, key)),
        _ => None,
    }
}
