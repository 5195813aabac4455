//! `Ref` and `Fn::GetAtt` discovery and rewriting in template bodies.

use serde_json::{json, Value};
use std::collections::BTreeSet;

/// A reference to a template resource, optionally to one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceReference {
    /// Referenced logical id.
    pub logical_id: String,
    /// Attribute, for `Fn::GetAtt`.
    pub attribute: Option<String>,
}

impl ResourceReference {
    /// Parses a `{Ref: X}` or `{Fn::GetAtt: ...}` node.
    #[must_use]
    pub fn from_node(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 1 {
            return None;
        }

        if let Some(target) = map.get("Ref") {
            return Some(Self {
                logical_id: target.as_str()?.to_string(),
                attribute: None,
            });
        }

        let (logical_id, attribute) = match map.get("Fn::GetAtt")? {
            Value::String(dotted) => {
                let (id, attr) = dotted.split_once('.')?;
                (id.to_string(), attr.to_string())
            }
            Value::Array(parts) => match parts.as_slice() {
                [Value::String(id), Value::String(attr)] => (id.clone(), attr.clone()),
                _ => return None,
            },
            _ => return None,
        };
        Some(Self {
            logical_id,
            attribute: Some(attribute),
        })
    }

    /// The expression that reads this reference in the producing template.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.attribute {
            Some(attribute) => json!({ "Fn::GetAtt": [self.logical_id, attribute] }),
            None => json!({ "Ref": self.logical_id }),
        }
    }

    /// Output and parameter name used when the reference crosses targets.
    #[must_use]
    pub fn output_name(&self) -> String {
        let name = match &self.attribute {
            Some(attribute) => format!("{}Dot{attribute}", self.logical_id),
            None => self.logical_id.clone(),
        };
        name.chars().filter(char::is_ascii_alphanumeric).collect()
    }

    /// Export name published by the producing target.
    #[must_use]
    pub fn export_name(&self, stack_name: &str) -> String {
        match &self.attribute {
            Some(attribute) => format!("{stack_name}-{}-{attribute}", self.logical_id),
            None => format!("{stack_name}-{}", self.logical_id),
        }
    }
}

/// Collects every reference in a value.
#[must_use]
pub fn collect_references(value: &Value) -> BTreeSet<ResourceReference> {
    let mut found = BTreeSet::new();
    collect_into(value, &mut found);
    found
}

fn collect_into(value: &Value, found: &mut BTreeSet<ResourceReference>) {
    if let Some(reference) = ResourceReference::from_node(value) {
        found.insert(reference);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_into(item, found)),
        Value::Object(map) => map.values().for_each(|item| collect_into(item, found)),
        _ => {}
    }
}

/// Replaces reference nodes for which `replace` returns a value.
pub fn rewrite_references<F>(value: &mut Value, replace: &mut F)
where
    F: FnMut(&ResourceReference) -> Option<Value>,
{
    if let Some(reference) = ResourceReference::from_node(value) {
        if let Some(replacement) = replace(&reference) {
            *value = replacement;
        }
        return;
    }
    match value {
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| rewrite_references(item, replace)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|item| rewrite_references(item, replace)),
        _ => {}
    }
}
