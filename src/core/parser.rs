//! AP-012: YAML parsing, command-line overrides and validation.
//!
//! Reads injection, appareil and chain files. Overrides of the form
//! `dotted.key=value` are applied to the raw document before it is
//! deserialized, so they can reach any field, dotted factory keys included.
//! Validation collects every problem instead of stopping at the first.

use super::builder::{is_reserved, PREFIXES};
use super::error::{Error, Result};
use super::path::DottedPath;
use super::registry::{Instantiator, Registry};
use super::template::{expand, TemplateContext};
use super::types::*;
use super::value::{Callable, Value};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_yaml_ng::{Mapping, Value as Yaml};
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn invalid(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

// ============================================================================
// Documents and overrides
// ============================================================================

/// Parse a YAML document from a string.
pub fn parse_document(yaml: &str) -> Result<Yaml> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Parse(format!("YAML parse error: {}", e)))
}

/// Read and parse a YAML document from disk.
pub fn load_document(path: &Path) -> Result<Yaml> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_document(&content)
}

/// Apply one `dotted.key=value` override to a document.
///
/// At each mapping the longest run of segments naming an existing key is
/// taken, so `factories.kwargs.lr=0.1` reaches the `kwargs.lr` factory.
/// Missing keys are created: nested at the top level, as a single dotted
/// key below it. The value is parsed as YAML.
pub fn apply_override(doc: &mut Yaml, expr: &str) -> Result<()> {
    let fail = |message: String| Error::Override {
        expr: expr.to_string(),
        message,
    };
    let (key, raw) = expr
        .split_once('=')
        .ok_or_else(|| fail("expected KEY=VALUE".to_string()))?;
    let path = DottedPath::parse(key.trim()).map_err(|e| fail(e.to_string()))?;
    let value: Yaml = if raw.trim().is_empty() {
        Yaml::Null
    } else {
        serde_yaml_ng::from_str(raw).map_err(|e| fail(format!("bad value: {}", e)))?
    };

    let segments = path.segments();
    let mut node = doc;
    let mut i = 0;
    let mut top_level = true;
    while i < segments.len() {
        if node.is_null() {
            *node = Yaml::Mapping(Mapping::new());
        }
        let map = match node {
            Yaml::Mapping(map) => map,
            other => {
                return Err(fail(format!(
                    "'{}' is a {}, not a mapping",
                    segments[..i].join("."),
                    yaml_kind(other)
                )))
            }
        };
        let matched = (i + 1..=segments.len())
            .rev()
            .map(|end| (end, segments[i..end].join(".")))
            .find(|(_, k)| map.contains_key(k.as_str()));
        let (end, k) = match matched {
            Some(found) => found,
            None if top_level => (i + 1, segments[i].clone()),
            None => (segments.len(), segments[i..].join(".")),
        };
        tracing::debug!("override {} -> {}", expr, k);
        if end == segments.len() {
            map.insert(Yaml::String(k), value);
            return Ok(());
        }
        node = map
            .entry(Yaml::String(k))
            .or_insert_with(|| Yaml::Mapping(Mapping::new()));
        i = end;
        top_level = false;
    }
    Ok(())
}

/// Apply overrides in order.
pub fn apply_overrides(doc: &mut Yaml, overrides: &[String]) -> Result<()> {
    overrides.iter().try_for_each(|expr| apply_override(doc, expr))
}

/// Deserialize a document into one of the file schemas.
pub fn from_document<T: DeserializeOwned>(doc: Yaml) -> Result<T> {
    serde_yaml_ng::from_value(doc).map_err(|e| Error::Parse(format!("YAML parse error: {}", e)))
}

/// Load a file, apply overrides, deserialize.
pub fn load_file<T: DeserializeOwned>(path: &Path, overrides: &[String]) -> Result<T> {
    let mut doc = load_document(path)?;
    apply_overrides(&mut doc, overrides)?;
    from_document(doc)
}

pub fn parse_injection(yaml: &str) -> Result<InjectionFile> {
    from_document(parse_document(yaml)?)
}

pub fn parse_appareil(yaml: &str) -> Result<AppareilFile> {
    from_document(parse_document(yaml)?)
}

pub fn parse_chain(yaml: &str) -> Result<ChainFile> {
    from_document(parse_document(yaml)?)
}

// ============================================================================
// Conversion
// ============================================================================

/// A bare string names a target; anything else is taken as written.
fn as_recipe(yaml: &Yaml) -> Yaml {
    match yaml {
        Yaml::String(name) => {
            let mut map = Mapping::new();
            map.insert(Yaml::String(TARGET_KEY.to_string()), Yaml::String(name.clone()));
            Yaml::Mapping(map)
        }
        other => other.clone(),
    }
}

fn instantiate_recipe(
    registry: &Registry,
    path: &str,
    yaml: &Yaml,
    ctx: &TemplateContext<'_>,
) -> Result<Callable> {
    let expanded = expand(&as_recipe(yaml), ctx)?;
    let leaf = registry.normalize(path, &Descriptor::Recipe(expanded))?;
    registry.instantiate(path, &leaf)
}

/// Factories of an injection file, templates expanded. Values that are not
/// recipes become constants.
pub fn injection_factories(file: &InjectionFile) -> Result<IndexMap<String, Descriptor>> {
    let ctx = TemplateContext::new(&file.params, &file.paths);
    let mut out = IndexMap::with_capacity(file.factories.len());
    for (key, yaml) in &file.factories {
        let expanded = expand(yaml, &ctx)?;
        let descriptor = if Recipe::is_recipe(&expanded) {
            Descriptor::Recipe(expanded)
        } else {
            Descriptor::constant(Value::from_yaml(&expanded)?)
        };
        out.insert(key.clone(), descriptor);
    }
    Ok(out)
}

/// The callable an injection file applies its arguments to.
pub fn injection_target(file: &InjectionFile, registry: &Registry) -> Result<Callable> {
    let ctx = TemplateContext::new(&file.params, &file.paths);
    instantiate_recipe(registry, "target", &file.target, &ctx)
}

/// Parts of an appareil file, instantiated.
pub fn appareil_parts(file: &AppareilFile, registry: &Registry) -> Result<IndexMap<String, Part>> {
    let ctx = TemplateContext::new(&file.params, &file.paths);
    let mut parts = IndexMap::with_capacity(file.parts.len());
    for (name, yaml) in &file.parts {
        let expanded = expand(&as_recipe(yaml), &ctx)?;
        parts.insert(name.clone(), registry.part(name, &expanded)?);
    }
    Ok(parts)
}

/// Steps of a chain file, instantiated.
pub fn chain_steps(file: &ChainFile, registry: &Registry) -> Result<IndexMap<String, Callable>> {
    let ctx = TemplateContext::new(&file.params, &file.paths);
    file.steps
        .iter()
        .map(|(name, yaml)| Ok((name.clone(), instantiate_recipe(registry, name, yaml, &ctx)?)))
        .collect()
}

/// The chain's initial input, templates expanded.
pub fn chain_input(file: &ChainFile) -> Result<Option<Value>> {
    let ctx = TemplateContext::new(&file.params, &file.paths);
    file.input
        .as_ref()
        .map(|yaml| Value::from_yaml(&expand(yaml, &ctx)?))
        .transpose()
}

// ============================================================================
// Validation
// ============================================================================

/// Check a recipe (and recipes nested in its arguments) against the registry.
fn check_recipe(where_: &str, yaml: &Yaml, registry: &Registry, errors: &mut Vec<ValidationError>) {
    if Recipe::is_recipe(yaml) {
        match Recipe::parse(yaml) {
            Ok(recipe) => {
                if !registry.contains(&recipe.target) {
                    invalid(
                        errors,
                        format!("{} references unknown target '{}'", where_, recipe.target),
                    );
                }
                for (i, arg) in recipe.args.iter().enumerate() {
                    check_recipe(&format!("{}.{}", where_, i), arg, registry, errors);
                }
                for (k, arg) in &recipe.kwargs {
                    check_recipe(&format!("{}.{}", where_, k), arg, registry, errors);
                }
            }
            Err(message) => invalid(errors, format!("{}: {}", where_, message)),
        }
        return;
    }
    match yaml {
        Yaml::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                check_recipe(&format!("{}.{}", where_, i), item, registry, errors);
            }
        }
        Yaml::Mapping(map) => {
            for (k, v) in map {
                check_recipe(
                    &format!("{}.{}", where_, yaml_value_to_string(k)),
                    v,
                    registry,
                    errors,
                );
            }
        }
        _ => {}
    }
}

/// Expand and check a value that must be a recipe (or a bare target name).
fn check_entry(
    where_: &str,
    yaml: &Yaml,
    ctx: &TemplateContext<'_>,
    registry: &Registry,
    errors: &mut Vec<ValidationError>,
) {
    match expand(&as_recipe(yaml), ctx) {
        Ok(expanded) if Recipe::is_recipe(&expanded) => {
            check_recipe(where_, &expanded, registry, errors)
        }
        Ok(expanded) => invalid(
            errors,
            format!("{} must be a recipe, got {}", where_, yaml_kind(&expanded)),
        ),
        Err(e) => invalid(errors, format!("{}: {}", where_, e)),
    }
}

fn check_name(name: &str, errors: &mut Vec<ValidationError>) {
    if name.is_empty() {
        invalid(errors, "name must not be empty".to_string());
    }
}

/// Factory keys outside the reserved branches. They are dropped at build
/// time, so they warn rather than fail.
pub fn injection_warnings(file: &InjectionFile) -> Vec<ValidationError> {
    let mut warnings = Vec::new();
    for key in file.factories.keys().filter(|key| !is_reserved(key)) {
        invalid(
            &mut warnings,
            format!(
                "factory '{}' does not start with one of {:?} and will be ignored",
                key, PREFIXES
            ),
        );
    }
    warnings
}

/// Validate an injection file. Returns a list of errors (empty = valid).
pub fn validate_injection(file: &InjectionFile, registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let ctx = TemplateContext::new(&file.params, &file.paths);
    check_name(&file.name, &mut errors);
    check_entry("target", &file.target, &ctx, registry, &mut errors);

    // Reserved keys only, each with whether it holds a recipe.
    let mut accepted = Vec::new();
    for (key, yaml) in file.factories.iter().filter(|(key, _)| is_reserved(key)) {
        let path = match DottedPath::parse(key) {
            Ok(p) => p,
            Err(e) => {
                invalid(&mut errors, e.to_string());
                continue;
            }
        };
        let holds_recipe = match expand(yaml, &ctx) {
            Ok(expanded) => {
                check_recipe(key, &expanded, registry, &mut errors);
                Recipe::is_recipe(&expanded)
            }
            Err(e) => {
                invalid(&mut errors, format!("{}: {}", key, e));
                false
            }
        };
        accepted.push((path, holds_recipe));
    }

    if file.strict {
        accepted.sort_by(|a, b| a.0.cmp(&b.0));
        for (i, (a, a_is_recipe)) in accepted.iter().enumerate() {
            if *a_is_recipe {
                continue;
            }
            for (b, _) in &accepted[i + 1..] {
                if a.is_prefix_of(b) {
                    invalid(
                        &mut errors,
                        format!("factory '{}' conflicts with '{}' (strict)", b, a),
                    );
                }
            }
        }
    }

    for path in &file.convert_to_list {
        if let Err(e) = DottedPath::parse(path) {
            invalid(&mut errors, format!("convert_to_list: {}", e));
        }
    }
    errors
}

/// Validate an appareil file. Returns a list of errors (empty = valid).
pub fn validate_appareil(file: &AppareilFile, registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let ctx = TemplateContext::new(&file.params, &file.paths);
    check_name(&file.name, &mut errors);
    for name in file.to_run.iter().flatten() {
        if !file.parts.contains_key(name) {
            invalid(&mut errors, format!("to_run references unknown part '{}'", name));
        }
    }
    for (name, yaml) in &file.parts {
        check_entry(&format!("part '{}'", name), yaml, &ctx, registry, &mut errors);
    }
    errors
}

/// Validate a chain file. Returns a list of errors (empty = valid).
pub fn validate_chain(file: &ChainFile, registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let ctx = TemplateContext::new(&file.params, &file.paths);
    check_name(&file.name, &mut errors);
    if let Some(input) = &file.input {
        if let Err(e) = expand(input, &ctx) {
            invalid(&mut errors, format!("input: {}", e));
        }
    }
    for (name, yaml) in &file.steps {
        check_entry(&format!("step '{}'", name), yaml, &ctx, registry, &mut errors);
    }
    errors
}
