//! JSON recovery and shape validation for LLM output.
//!
//! Models sometimes wrap JSON in markdown fences or prose. Recovery tries a
//! plain parse, then a fenced block, then the substring from the first `{`
//! to its matching `}` (string- and escape-aware). Shape checks enforce the
//! requested fields, the template's key set at each nesting level, and
//! consistent array element keys.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Strip a single leading/trailing markdown code fence, if present.
pub fn strip_fences(text: &str) -> String {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*\n?(.*?)\n?\s*```\s*$").expect("fence regex compiles")
    });
    match re.captures(text) {
        Some(captures) => captures
            .get(1)
            .map(|m| m.as_str().to_owned())
            .unwrap_or_else(|| text.trim().to_owned()),
        None => text.trim().to_owned(),
    }
}

/// Recover a JSON value from possibly mixed text.
///
/// # Errors
///
/// Returns a description of why every recovery strategy failed.
pub fn recover_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let plain_err = match serde_json::from_str(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    let fenced = strip_fences(trimmed);
    if fenced != trimmed {
        if let Ok(value) = serde_json::from_str::<Value>(&fenced) {
            return Ok(value);
        }
    }

    if let Some(slice) = balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(slice) {
            return Ok(value);
        }
    }

    Err(format!("no JSON object recoverable from output: {plain_err}"))
}

/// The substring from the first `{` to its matching `}`, honoring strings
/// and escapes. `None` when braces never balance.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0_i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return text.get(start..=offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Shape checks
// ---------------------------------------------------------------------------

/// The record the requested fields must appear in: the first element of the
/// primary array, or the value itself when no array-valued key exists.
pub fn primary_record(data: &Value) -> &Value {
    match primary_array(data) {
        Some(items) => items.first().unwrap_or(data),
        None => data,
    }
}

/// The primary array of an object-shaped output: the value under `data`
/// when it is an array, otherwise the first array-valued key.
pub fn primary_array(data: &Value) -> Option<&Vec<Value>> {
    let object = data.as_object()?;
    if let Some(Value::Array(items)) = object.get("data") {
        return Some(items);
    }
    object.values().find_map(Value::as_array)
}

/// Records represented by the output: primary array length, else 1.
pub fn records_parsed(data: &Value) -> usize {
    primary_array(data).map_or(1, Vec::len)
}

/// Field names of the first shaped record.
pub fn extracted_fields(data: &Value) -> Vec<String> {
    primary_record(data)
        .as_object()
        .map(|object| object.keys().cloned().collect())
        .unwrap_or_default()
}

/// Every requested field must be present as a key (value may be null) in
/// the primary record. When the output has no primary array the output
/// itself is the record; a top-level sibling key next to the array does not
/// count.
///
/// # Errors
///
/// Names the first missing field.
pub fn check_required_fields(data: &Value, required: &[String]) -> Result<(), String> {
    let record = primary_record(data);
    for field in required {
        let in_record = record
            .as_object()
            .map_or(false, |object| object.contains_key(field));
        if !in_record {
            return Err(format!("required field {field:?} is missing"));
        }
    }
    Ok(())
}

/// The output must mirror the template's key set at each nesting level.
///
/// # Errors
///
/// Describes the first level where the key sets diverge.
pub fn check_template(data: &Value, template: &Value) -> Result<(), String> {
    check_template_at(data, template, "$")
}

fn check_template_at(data: &Value, template: &Value, path: &str) -> Result<(), String> {
    match (data, template) {
        (Value::Object(data_map), Value::Object(template_map)) => {
            let data_keys: BTreeSet<&String> = data_map.keys().collect();
            let template_keys: BTreeSet<&String> = template_map.keys().collect();
            if data_keys != template_keys {
                let missing: Vec<&str> = template_keys
                    .difference(&data_keys)
                    .map(|k| k.as_str())
                    .collect();
                let extra: Vec<&str> = data_keys
                    .difference(&template_keys)
                    .map(|k| k.as_str())
                    .collect();
                return Err(format!(
                    "key set mismatch at {path}: missing {missing:?}, unexpected {extra:?}"
                ));
            }
            for (key, template_value) in template_map {
                check_template_at(&data_map[key], template_value, &format!("{path}.{key}"))?;
            }
            Ok(())
        }
        (Value::Array(items), Value::Array(template_items)) => {
            let Some(template_element) = template_items.first() else {
                return Ok(());
            };
            for (index, item) in items.iter().enumerate() {
                check_template_at(item, template_element, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        (found, Value::Object(_)) => Err(format!(
            "expected an object at {path}, found {}",
            kind_name(found)
        )),
        (found, Value::Array(_)) => Err(format!(
            "expected an array at {path}, found {}",
            kind_name(found)
        )),
        // Scalar template positions constrain nothing beyond presence.
        _ => Ok(()),
    }
}

/// All object elements of every array in the output must share one key set.
///
/// # Errors
///
/// Names the array path and the diverging element index.
pub fn check_array_consistency(data: &Value) -> Result<(), String> {
    check_arrays_at(data, "$")
}

fn check_arrays_at(data: &Value, path: &str) -> Result<(), String> {
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                check_arrays_at(value, &format!("{path}.{key}"))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let mut expected: Option<BTreeSet<&String>> = None;
            for (index, item) in items.iter().enumerate() {
                if let Value::Object(map) = item {
                    let keys: BTreeSet<&String> = map.keys().collect();
                    match &expected {
                        None => expected = Some(keys),
                        Some(first) if *first != keys => {
                            return Err(format!(
                                "array at {path} has inconsistent fields at element {index}"
                            ));
                        }
                        Some(_) => {}
                    }
                }
                check_arrays_at(item, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
