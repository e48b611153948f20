use std::collections::BTreeMap;

use serde_json::Value;

use jobpulse_shared::{JobPulseError, Result};

use super::{FieldMap, ListingExtractor};

/// JSON-pointer extraction for listing APIs.
pub struct JsonExtractor {
    items: String,
    fields: Vec<(String, String)>,
}

impl JsonExtractor {
    pub fn new(items: &str, fields: &BTreeMap<String, String>) -> Result<Self> {
        check_pointer(items)?;
        for pointer in fields.values() {
            check_pointer(pointer)?;
        }
        Ok(Self {
            items: items.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

impl ListingExtractor for JsonExtractor {
    fn extract(&self, body: &str) -> Result<Vec<FieldMap>> {
        let doc: Value = serde_json::from_str(body)
            .map_err(|e| JobPulseError::parse(format!("response is not JSON: {e}")))?;
        let items = doc
            .pointer(&self.items)
            .ok_or_else(|| JobPulseError::parse(format!("no value at {}", self.items)))?;
        let items = match items {
            Value::Array(items) => items,
            Value::Null => return Ok(Vec::new()),
            _ => {
                return Err(JobPulseError::parse(format!(
                    "value at {} is not an array",
                    self.items
                )));
            }
        };

        Ok(items
            .iter()
            .map(|item| {
                self.fields
                    .iter()
                    .filter_map(|(name, pointer)| {
                        let text = item.pointer(pointer).and_then(value_text)?;
                        Some((name.clone(), text))
                    })
                    .collect::<FieldMap>()
            })
            .filter(|map| !map.is_empty())
            .collect())
    }

    fn name(&self) -> &str {
        "json"
    }
}

fn check_pointer(pointer: &str) -> Result<()> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(JobPulseError::config(format!(
            "JSON pointer {pointer:?} must be empty or start with '/'"
        )))
    }
}

/// Flatten a scalar or array of scalars into text; arrays join with `,`.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(values) => values
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}
