//! AP-006: Template expansion in recipe values.
//!
//! Resolves `{{params.key}}` and `{{paths.key}}` inside string values. A
//! string consisting of exactly one template takes the referenced value
//! with its type intact; anything else is spliced in as text.

use super::error::{Error, Result};
use super::types::yaml_value_to_string;
use indexmap::IndexMap;

/// Values templates may reference.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub params: &'a IndexMap<String, serde_yaml_ng::Value>,
    pub paths: &'a IndexMap<String, serde_yaml_ng::Value>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(
        params: &'a IndexMap<String, serde_yaml_ng::Value>,
        paths: &'a IndexMap<String, serde_yaml_ng::Value>,
    ) -> Self {
        Self { params, paths }
    }

    fn lookup(&self, key: &str) -> Result<&'a serde_yaml_ng::Value> {
        if let Some(name) = key.strip_prefix("params.") {
            self.params
                .get(name)
                .ok_or_else(|| Error::Template(format!("unknown param: {}", name)))
        } else if let Some(name) = key.strip_prefix("paths.") {
            self.paths
                .get(name)
                .ok_or_else(|| Error::Template(format!("unknown path: {}", name)))
        } else {
            Err(Error::Template(format!(
                "unknown template variable: {}",
                key
            )))
        }
    }
}

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, ctx: &TemplateContext<'_>) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| Error::Template(format!("unclosed template at position {}", open)))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = yaml_value_to_string(ctx.lookup(key)?);

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Expand templates in every string of a YAML tree.
pub fn expand(value: &serde_yaml_ng::Value, ctx: &TemplateContext<'_>) -> Result<serde_yaml_ng::Value> {
    use serde_yaml_ng::Value as Y;
    Ok(match value {
        Y::String(s) => match whole_template(s) {
            Some(key) => ctx.lookup(key)?.clone(),
            None => Y::String(resolve_template(s, ctx)?),
        },
        Y::Sequence(items) => Y::Sequence(
            items
                .iter()
                .map(|item| expand(item, ctx))
                .collect::<Result<Vec<_>>>()?,
        ),
        Y::Mapping(map) => {
            let mut out = serde_yaml_ng::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), expand(v, ctx)?);
            }
            Y::Mapping(out)
        }
        other => other.clone(),
    })
}

/// The key of a string that is exactly one `{{ ... }}` template.
fn whole_template(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}
