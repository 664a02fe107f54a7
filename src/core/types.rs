//! AP-001: Descriptors, recipes, parts and the YAML file schemas.
//!
//! Descriptors are what callers register under dotted paths. Recipes are
//! the declarative form: a mapping naming a registered `_target_` plus its
//! arguments. The file types derive Serialize/Deserialize for YAML.

use super::value::{Callable, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved recipe key naming the registered callable.
pub const TARGET_KEY: &str = "_target_";
/// Reserved recipe key holding positional arguments.
pub const ARGS_KEY: &str = "_args_";
/// Reserved recipe key selecting partial (deferred) instantiation.
pub const PARTIAL_KEY: &str = "_partial_";

// ============================================================================
// Descriptors
// ============================================================================

/// A factory descriptor registered under a dotted path.
#[derive(Debug, Clone)]
pub enum Descriptor {
    /// A zero-argument callable producing the dependency.
    Factory(Callable),
    /// A declarative recipe, resolved against a registry.
    Recipe(serde_yaml_ng::Value),
}

impl Descriptor {
    pub fn factory<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> super::error::Result<Value> + Send + Sync + 'static,
    {
        Self::Factory(Callable::nullary(name, func))
    }

    /// A factory that always yields a clone of `value`.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::factory("const", move || Ok(value.clone()))
    }

    pub fn recipe(yaml: serde_yaml_ng::Value) -> Self {
        Self::Recipe(yaml)
    }
}

/// A normalized descriptor: the plain form stored in a path tree.
#[derive(Debug, Clone)]
pub enum Leaf {
    Factory(Callable),
    Recipe(Recipe),
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factory(c) => write!(f, "<factory {}>", c.name()),
            Self::Recipe(r) => write!(f, "<recipe {}>", r.target),
        }
    }
}

/// A parsed recipe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub target: String,
    pub args: Vec<serde_yaml_ng::Value>,
    pub kwargs: IndexMap<String, serde_yaml_ng::Value>,
    /// `None` means the position decides: top-level recipes are partial,
    /// nested ones are built eagerly.
    pub partial: Option<bool>,
}

impl Recipe {
    /// Parse a recipe mapping. Errors are plain messages; callers attach
    /// the path.
    pub fn parse(yaml: &serde_yaml_ng::Value) -> Result<Recipe, String> {
        let map = match yaml {
            serde_yaml_ng::Value::Mapping(m) => m,
            serde_yaml_ng::Value::Tagged(t) => return Self::parse(&t.value),
            other => return Err(format!("recipe must be a mapping, got {}", yaml_kind(other))),
        };

        let mut target = None;
        let mut args = Vec::new();
        let mut kwargs = IndexMap::new();
        let mut partial = None;

        for (k, v) in map {
            let key = k
                .as_str()
                .ok_or_else(|| format!("recipe keys must be strings, got {:?}", k))?;
            match key {
                TARGET_KEY => {
                    let name = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be a string", TARGET_KEY))?;
                    if name.is_empty() {
                        return Err(format!("{} must not be empty", TARGET_KEY));
                    }
                    target = Some(name.to_string());
                }
                ARGS_KEY => match v {
                    serde_yaml_ng::Value::Sequence(items) => args.clone_from(items),
                    other => {
                        return Err(format!(
                            "{} must be a list, got {}",
                            ARGS_KEY,
                            yaml_kind(other)
                        ))
                    }
                },
                PARTIAL_KEY => {
                    partial = Some(
                        v.as_bool()
                            .ok_or_else(|| format!("{} must be a boolean", PARTIAL_KEY))?,
                    );
                }
                _ => {
                    kwargs.insert(key.to_string(), v.clone());
                }
            }
        }

        let target = target.ok_or_else(|| format!("recipe has no {}", TARGET_KEY))?;
        Ok(Recipe {
            target,
            args,
            kwargs,
            partial,
        })
    }

    /// True for a mapping carrying a `_target_` key.
    pub fn is_recipe(yaml: &serde_yaml_ng::Value) -> bool {
        match yaml {
            serde_yaml_ng::Value::Mapping(m) => m.contains_key(TARGET_KEY),
            serde_yaml_ng::Value::Tagged(t) => Self::is_recipe(&t.value),
            _ => false,
        }
    }
}

/// Short name of a YAML node's kind.
pub fn yaml_kind(value: &serde_yaml_ng::Value) -> &'static str {
    match value {
        serde_yaml_ng::Value::Null => "null",
        serde_yaml_ng::Value::Bool(_) => "bool",
        serde_yaml_ng::Value::Number(_) => "number",
        serde_yaml_ng::Value::String(_) => "string",
        serde_yaml_ng::Value::Sequence(_) => "list",
        serde_yaml_ng::Value::Mapping(_) => "mapping",
        serde_yaml_ng::Value::Tagged(_) => "tagged value",
    }
}

/// Stringify a scalar YAML value for template splicing.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Parts
// ============================================================================

/// A runnable part, optionally carrying display metadata.
#[derive(Debug, Clone)]
pub enum Part {
    Direct(Callable),
    Described {
        callable: Callable,
        name: String,
        description: String,
    },
}

impl Part {
    pub fn callable(&self) -> &Callable {
        match self {
            Self::Direct(c) => c,
            Self::Described { callable, .. } => callable,
        }
    }

    /// The described target name, or the callable's own name.
    pub fn name(&self) -> &str {
        match self {
            Self::Direct(c) => c.name(),
            Self::Described { name, .. } => name,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Described { description, .. } => Some(description),
        }
    }
}

// ============================================================================
// YAML files
// ============================================================================

/// An injection file: a target plus flat dotted-path factories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionFile {
    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Recipe (or bare registered name) of the callable to inject into
    pub target: serde_yaml_ng::Value,

    /// Paths whose subtrees become key-sorted lists
    #[serde(default)]
    pub convert_to_list: Vec<String>,

    /// High-level values available as `{{params.key}}`
    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Path values available as `{{paths.key}}`
    #[serde(default)]
    pub paths: IndexMap<String, serde_yaml_ng::Value>,

    /// Reject overlapping factory paths instead of overwriting
    #[serde(default)]
    pub strict: bool,

    /// Dotted path -> recipe
    pub factories: IndexMap<String, serde_yaml_ng::Value>,
}

/// An appareil file: named parts run in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppareilFile {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    #[serde(default)]
    pub paths: IndexMap<String, serde_yaml_ng::Value>,

    /// Parts to run; all parts in name order when absent
    #[serde(default)]
    pub to_run: Option<Vec<String>>,

    /// Log the run without invoking anything
    #[serde(default)]
    pub dry: bool,

    /// Part name -> recipe
    pub parts: IndexMap<String, serde_yaml_ng::Value>,
}

/// A chain file: steps fed one into the next, in name order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainFile {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Initial input; the first step produces it when absent
    #[serde(default)]
    pub input: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    #[serde(default)]
    pub paths: IndexMap<String, serde_yaml_ng::Value>,

    /// Step name -> recipe
    #[serde(default)]
    pub steps: IndexMap<String, serde_yaml_ng::Value>,
}
