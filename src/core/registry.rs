//! AP-007: Instantiation: the registry of named callables behind recipes.
//!
//! `Instantiator` is the seam the builder and resolver talk to: one call to
//! turn a descriptor into a plain leaf, one to turn a leaf into something
//! invokable. `Registry` is the stock implementation, resolving a recipe's
//! `_target_` against registered callables.

use super::error::{Error, Result};
use super::types::{Descriptor, Leaf, Part, Recipe};
use super::value::{CallArgs, Callable, Value};
use std::collections::BTreeMap;

/// Normalizes descriptors and materializes leaves.
pub trait Instantiator {
    /// Turn a descriptor registered at `path` into a plain leaf.
    fn normalize(&self, path: &str, descriptor: &Descriptor) -> Result<Leaf>;

    /// Turn a leaf at `path` into a callable the resolver invokes with no
    /// arguments.
    fn instantiate(&self, path: &str, leaf: &Leaf) -> Result<Callable> {
        self.instantiate_with(path, leaf, BTreeMap::new())
    }

    /// Like `instantiate`, with keyword arguments resolved from deeper paths
    /// that extend the leaf. Injected values win over same-named ones in the
    /// recipe.
    fn instantiate_with(
        &self,
        path: &str,
        leaf: &Leaf,
        injected: BTreeMap<String, Value>,
    ) -> Result<Callable>;
}

#[derive(Debug, Clone)]
struct Entry {
    callable: Callable,
    doc: Option<String>,
}

/// Named callables addressable from recipes.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the `aprl.*` built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::stdlib::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(Callable::new(name, func), None)
    }

    /// Register with a description, shown when parts run.
    pub fn register_with_doc<F>(&mut self, name: &str, doc: &str, func: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(Callable::new(name, func), Some(doc.to_string()))
    }

    /// Register an existing callable under its own name.
    pub fn insert(&mut self, callable: Callable, doc: Option<String>) -> &mut Self {
        self.entries
            .insert(callable.name().to_string(), Entry { callable, doc });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.entries.get(name).map(|e| &e.callable)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn describe(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|e| e.doc.as_deref())
    }

    /// Registered names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn lookup(&self, target: &str) -> Result<&Callable> {
        self.get(target).ok_or_else(|| Error::UnknownTarget {
            target: target.to_string(),
        })
    }

    /// Instantiate a recipe as a runnable part, tagged with the target's
    /// description when it has one.
    pub fn part(&self, path: &str, yaml: &serde_yaml_ng::Value) -> Result<Part> {
        let leaf = self.normalize(path, &Descriptor::Recipe(yaml.clone()))?;
        let callable = self.instantiate(path, &leaf)?;
        let Leaf::Recipe(recipe) = leaf else {
            return Ok(Part::Direct(callable));
        };
        Ok(match self.describe(&recipe.target) {
            Some(doc) => Part::Described {
                callable,
                name: recipe.target.clone(),
                description: doc.to_string(),
            },
            None => Part::Direct(callable),
        })
    }

    /// Build the call arguments of a recipe, instantiating nested recipes.
    fn recipe_args(&self, path: &str, recipe: &Recipe) -> Result<CallArgs> {
        let mut args = CallArgs::new();
        for (i, item) in recipe.args.iter().enumerate() {
            args.args
                .push(self.value_of(&format!("{}.{}", path, i), item)?);
        }
        for (key, item) in &recipe.kwargs {
            args.kwargs
                .insert(key.clone(), self.value_of(&format!("{}.{}", path, key), item)?);
        }
        Ok(args)
    }

    /// A recipe argument as a value. Nested recipes are built (or bound,
    /// with `_partial_: true`); containers are walked.
    fn value_of(&self, path: &str, yaml: &serde_yaml_ng::Value) -> Result<Value> {
        use serde_yaml_ng::Value as Y;
        if Recipe::is_recipe(yaml) {
            let recipe = Recipe::parse(yaml).map_err(|message| Error::Normalization {
                path: path.to_string(),
                message,
            })?;
            let bound = self.bind(path, &recipe)?;
            return if recipe.partial.unwrap_or(false) {
                Ok(Value::Callable(bound))
            } else {
                bound.invoke()
            };
        }
        match yaml {
            Y::Sequence(items) => Ok(Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.value_of(&format!("{}.{}", path, i), item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Y::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = k
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| super::types::yaml_value_to_string(k));
                    let value = self.value_of(&format!("{}.{}", path, key), v)?;
                    out.insert(key, value);
                }
                Ok(Value::Map(out))
            }
            other => Value::from_yaml(other),
        }
    }

    /// The target with the recipe's arguments bound.
    fn bind(&self, path: &str, recipe: &Recipe) -> Result<Callable> {
        self.bind_with(path, recipe, BTreeMap::new())
    }

    fn bind_with(
        &self,
        path: &str,
        recipe: &Recipe,
        injected: BTreeMap<String, Value>,
    ) -> Result<Callable> {
        let target = self.lookup(&recipe.target)?;
        let mut args = self.recipe_args(path, recipe)?;
        args.kwargs.extend(injected);
        Ok(target.bind(args))
    }
}

impl Instantiator for Registry {
    fn normalize(&self, path: &str, descriptor: &Descriptor) -> Result<Leaf> {
        match descriptor {
            Descriptor::Factory(c) => Ok(Leaf::Factory(c.clone())),
            Descriptor::Recipe(yaml) => Recipe::parse(yaml)
                .map(Leaf::Recipe)
                .map_err(|message| Error::Normalization {
                    path: path.to_string(),
                    message,
                }),
        }
    }

    fn instantiate_with(
        &self,
        path: &str,
        leaf: &Leaf,
        injected: BTreeMap<String, Value>,
    ) -> Result<Callable> {
        let recipe = match leaf {
            Leaf::Factory(c) if injected.is_empty() => return Ok(c.clone()),
            Leaf::Factory(c) => {
                return Ok(c.bind(CallArgs {
                    args: Vec::new(),
                    kwargs: injected,
                }))
            }
            Leaf::Recipe(recipe) => recipe,
        };
        let bound = self.bind_with(path, recipe, injected)?;
        if recipe.partial.unwrap_or(true) {
            return Ok(bound);
        }
        // Eager: the target builds the factory that gets invoked.
        match bound.invoke()? {
            Value::Callable(factory) => Ok(factory),
            other => Err(Error::NotInvokable {
                path: path.to_string(),
                found: other.kind(),
            }),
        }
    }
}
