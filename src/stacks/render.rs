//! Per-target template rendering.

use serde_json::Value;

use crate::error::{ConfigError, Result};

/// Values available to expressions while rendering one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// Physical account id.
    pub account_id: String,
    /// Account name.
    pub account_name: String,
    /// Logical account id.
    pub logical_account_id: String,
    /// Region.
    pub region: String,
    /// Configured stack name.
    pub stack_name: String,
}

/// Resolves expressions in a template body for one target.
pub trait TemplateRenderer: Send + Sync {
    /// Renders a whole template body.
    ///
    /// # Errors
    ///
    /// Returns a `Resolution` error if an expression cannot be resolved.
    fn render(&self, body: &Value, context: &RenderContext) -> Result<Value>;

    /// Resolves a single string expression.
    ///
    /// # Errors
    ///
    /// Returns a `Resolution` error if an expression cannot be resolved.
    fn resolve_scalar(&self, expression: &str, context: &RenderContext) -> Result<String>;
}

/// Substitutes `${CurrentAccount.*}`, `${CurrentRegion}` and `${CurrentStack}`.
///
/// Any other `${...}` placeholder is left for the provider to resolve.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    /// Creates a renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn lookup(name: &str, context: &RenderContext) -> Result<Option<String>> {
        let value = match name {
            "CurrentAccount.AccountId" => context.account_id.clone(),
            "CurrentAccount.AccountName" => context.account_name.clone(),
            "CurrentAccount.LogicalId" => context.logical_account_id.clone(),
            "CurrentRegion" => context.region.clone(),
            "CurrentStack" => context.stack_name.clone(),
            other if other.starts_with("CurrentAccount.") => {
                return Err(ConfigError::Resolution {
                    expression: format!("${{{other}}}"),
                    message: String::from("unknown account attribute"),
                }
                .into());
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn substitute(text: &str, context: &RenderContext) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = &after[..end];
            match Self::lookup(name, context)? {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[start..start + 2 + end + 1]),
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, body: &Value, context: &RenderContext) -> Result<Value> {
        Ok(match body {
            Value::String(text) => Value::String(Self::substitute(text, context)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render(item, context))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| Ok((key.clone(), self.render(value, context)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    fn resolve_scalar(&self, expression: &str, context: &RenderContext) -> Result<String> {
        Self::substitute(expression, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> RenderContext {
        RenderContext {
            account_id: String::from("222222222222"),
            account_name: String::from("Dev"),
            logical_account_id: String::from("DevAccount"),
            region: String::from("eu-west-1"),
            stack_name: String::from("baseline"),
        }
    }

    #[test]
    fn test_resolve_scalar() {
        let renderer = PlaceholderRenderer::new();
        let resolved = renderer
            .resolve_scalar("${CurrentStack}-${CurrentAccount.AccountId}-${CurrentRegion}", &context())
            .expect("resolve");
        assert_eq!(resolved, "baseline-222222222222-eu-west-1");
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let renderer = PlaceholderRenderer::new();
        let resolved = renderer
            .resolve_scalar("arn:${AWS::Partition}:s3:::${CurrentAccount.LogicalId}", &context())
            .expect("resolve");
        assert_eq!(resolved, "arn:${AWS::Partition}:s3:::DevAccount");

        let unterminated = renderer.resolve_scalar("${CurrentRegion", &context()).expect("resolve");
        assert_eq!(unterminated, "${CurrentRegion");
    }

    #[test]
    fn test_unknown_account_attribute_fails() {
        let err = PlaceholderRenderer::new()
            .resolve_scalar("${CurrentAccount.Email}", &context())
            .expect_err("unknown attribute");
        assert!(err.to_string().contains("CurrentAccount.Email"));
    }

    #[test]
    fn test_render_walks_nested_values() {
        let body = json!({
            "Resources": {
                "Bucket": {
                    "Type": "AWS::S3::Bucket",
                    "Properties": { "BucketName": "logs-${CurrentAccount.AccountName}", "Tags": ["${CurrentRegion}", 3] }
                }
            }
        });

        let rendered = PlaceholderRenderer::new().render(&body, &context()).expect("render");
        assert_eq!(
            rendered["Resources"]["Bucket"]["Properties"]["BucketName"],
            json!("logs-Dev")
        );
        assert_eq!(
            rendered["Resources"]["Bucket"]["Properties"]["Tags"],
            json!(["eu-west-1", 3])
        );
    }
}
