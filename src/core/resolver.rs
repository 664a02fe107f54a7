//! AP-009: Resolving evaluator and application to a target.
//!
//! Resolution walks the builder's keys together with the list-conversion
//! paths in descending string order. A conversion path replaces its subtree
//! with the children's values in ascending key order; any other path
//! replaces its descriptor with the result of instantiating and invoking it.
//! A recipe extended by deeper keys resolves after them and receives their
//! values as keyword arguments.
//! Every factory runs exactly once; a failure stops the walk and nothing
//! already run is undone.
//!
//! `apply` then calls `store(target(*args, **kwargs))`.

use super::builder::{build, BuildOptions, BuiltTree, ARGS_PREFIX, KWARGS_PREFIX, STORE_PREFIX};
use super::error::{Error, Result};
use super::path::DottedPath;
use super::registry::Instantiator;
use super::tree::{Node, PathTree};
use super::types::{yaml_kind, yaml_value_to_string, Descriptor, Leaf, Recipe};
use super::value::{CallArgs, Callable, Value};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

/// A tree with every descriptor replaced by its value.
#[derive(Debug)]
pub struct ResolvedTree {
    tree: PathTree,
}

impl ResolvedTree {
    pub fn tree(&self) -> &PathTree {
        &self.tree
    }
}

/// Result of applying a resolved tree to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// What the target returned.
    pub raw: Value,
    /// What the store sink returned; equal to `raw` when there is no sink.
    pub stored: Value,
}

/// Values of `node`'s immediate children, ordered by ascending key.
pub fn to_list(path: &str, node: Node) -> Result<Vec<Value>> {
    let list = match node {
        Node::Branch(children) => children
            .into_iter()
            .map(|(key, child)| child.into_value(&format!("{}.{}", path, key)))
            .collect::<Result<Vec<_>>>()?,
        Node::Resolved(Value::Map(map)) => map.into_values().collect(),
        Node::Resolved(Value::List(items)) => items,
        other => {
            return Err(Error::Shape {
                path: path.to_string(),
                expected: "a list",
                found: other.kind(),
            })
        }
    };
    tracing::debug!("converted {} to a list of {}", path, list.len());
    Ok(list)
}

/// Replace descriptors with values and flagged subtrees with lists.
pub fn resolve<I: Instantiator + ?Sized>(
    built: BuiltTree,
    convert_to_list: &[String],
    instantiator: &I,
) -> Result<ResolvedTree> {
    let BuiltTree { mut tree, keys, .. } = built;
    let convert = convert_to_list
        .iter()
        .map(|p| DottedPath::parse(p))
        .collect::<Result<BTreeSet<_>>>()?;
    tracing::debug!("will convert {:?} to lists", convert_to_list);

    let order: BTreeSet<DottedPath> = keys.into_iter().chain(convert.iter().cloned()).collect();
    for path in order.iter().rev() {
        if convert.contains(path) {
            convert_at(&mut tree, path)?;
        } else {
            invoke_at(&mut tree, path, instantiator)?;
        }
    }
    tracing::debug!("resolved tree:\n{}", tree);

    Ok(ResolvedTree { tree })
}

fn convert_at(tree: &mut PathTree, path: &DottedPath) -> Result<()> {
    tracing::debug!("converting {} to list", path);
    let segments = path.segments();
    if let Some(depth) = tree.blocking_ancestor(segments) {
        let ancestor = segments[..depth].join(".");
        let found = tree.get_at(&segments[..depth]).map_or("nothing", Node::kind);
        return Err(Error::Shape {
            path: ancestor,
            expected: "a subtree",
            found,
        });
    }
    let (last, parent_segments) = match segments.split_last() {
        Some(split) => split,
        None => return Ok(()),
    };
    let list = match tree.take_at(segments) {
        Some(node) => to_list(path.as_str(), node)?,
        None => {
            // Nothing injected below: the list may live in a pending recipe.
            if let Some(
                Node::Pending(Leaf::Recipe(recipe))
                | Node::Extended {
                    leaf: Leaf::Recipe(recipe),
                    ..
                },
            ) = tree.get_at_mut(parent_segments)
            {
                if let Some(item) = recipe.kwargs.get_mut(last.as_str()) {
                    *item = yaml_to_list(path.as_str(), item)?;
                    return Ok(());
                }
            }
            Vec::new()
        }
    };
    let (parent, _) = tree.ensure_subtree(parent_segments);
    parent.insert(last.clone(), Node::Resolved(Value::List(list)));
    Ok(())
}

/// A recipe argument as a YAML sequence; mapping values are ordered by
/// ascending key.
fn yaml_to_list(path: &str, yaml: &serde_yaml_ng::Value) -> Result<serde_yaml_ng::Value> {
    use serde_yaml_ng::Value as Y;
    let found = match yaml {
        Y::Sequence(_) => return Ok(yaml.clone()),
        Y::Mapping(_) if Recipe::is_recipe(yaml) => "recipe",
        Y::Mapping(map) => {
            let mut entries: Vec<(String, &Y)> = map
                .iter()
                .map(|(k, v)| (yaml_value_to_string(k), v))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            tracing::debug!("converted {} to a list of {}", path, entries.len());
            return Ok(Y::Sequence(
                entries.into_iter().map(|(_, v)| v.clone()).collect(),
            ));
        }
        other => yaml_kind(other),
    };
    Err(Error::Shape {
        path: path.to_string(),
        expected: "a list",
        found,
    })
}

fn invoke_at<I: Instantiator + ?Sized>(
    tree: &mut PathTree,
    path: &DottedPath,
    instantiator: &I,
) -> Result<()> {
    let (leaf, injected) = match tree.take_at(path.segments()) {
        Some(Node::Pending(leaf)) => (leaf, BTreeMap::new()),
        Some(Node::Extended { leaf, children }) => {
            let mut injected = BTreeMap::new();
            for (key, child) in children {
                let value = child.into_value(&format!("{}.{}", path, key))?;
                injected.insert(key, value);
            }
            (leaf, injected)
        }
        Some(other) => {
            return Err(Error::NotInvokable {
                path: path.to_string(),
                found: other.kind(),
            })
        }
        None => {
            return Err(Error::Unresolved {
                path: path.to_string(),
            })
        }
    };
    if injected.is_empty() {
        tracing::debug!("instantiating and calling {}", path);
    } else {
        tracing::debug!(
            "instantiating and calling {} with injected {:?}",
            path,
            injected.keys().collect::<Vec<_>>()
        );
    }
    let wrap = |source: Error| Error::Instantiation {
        path: path.to_string(),
        source: Box::new(source),
    };
    let callable = instantiator
        .instantiate_with(path.as_str(), &leaf, injected)
        .map_err(wrap)?;
    let value = callable.invoke().map_err(wrap)?;
    tree.set_at(path.segments(), Node::Resolved(value));
    Ok(())
}

/// Call `store(target(*args, **kwargs))` with the resolved branches.
pub fn apply(resolved: ResolvedTree, target: &Callable) -> Result<Applied> {
    let mut root = resolved.tree.into_root();

    let kwargs = match root.remove(KWARGS_PREFIX) {
        None => BTreeMap::new(),
        Some(node) => match node.into_value(KWARGS_PREFIX)? {
            Value::Map(map) => map,
            other => {
                return Err(Error::Shape {
                    path: KWARGS_PREFIX.to_string(),
                    expected: "a mapping",
                    found: other.kind(),
                })
            }
        },
    };
    let args = match root.remove(ARGS_PREFIX) {
        None => Vec::new(),
        Some(node) => to_list(ARGS_PREFIX, node)?,
    };
    let store = match root.remove(STORE_PREFIX) {
        None => None,
        Some(Node::Resolved(Value::Callable(sink))) => Some(sink),
        Some(other) => {
            return Err(Error::NotInvokable {
                path: STORE_PREFIX.to_string(),
                found: other.kind(),
            })
        }
    };

    tracing::debug!(
        "calling {} with {} positional and {} keyword argument(s)",
        target.name(),
        args.len(),
        kwargs.len()
    );
    let raw = target
        .call(CallArgs { args, kwargs })
        .map_err(|source| Error::TargetInvocation {
            target: target.name().to_string(),
            source: Box::new(source),
        })?;

    let stored = match store {
        None => raw.clone(),
        Some(sink) => {
            tracing::debug!("routing result through store {}", sink.name());
            sink.call(CallArgs::positional(vec![raw.clone()]))
                .map_err(|source| Error::Sink {
                    source: Box::new(source),
                })?
        }
    };
    Ok(Applied { raw, stored })
}

/// Build, resolve and apply in one go.
pub fn depinject<I: Instantiator + ?Sized>(
    target: &Callable,
    flat_factories: &IndexMap<String, Descriptor>,
    convert_to_list: &[String],
    instantiator: &I,
    options: BuildOptions,
) -> Result<Applied> {
    let built = build(flat_factories, instantiator, options)?;
    let resolved = resolve(built, convert_to_list, instantiator)?;
    apply(resolved, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registry;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Factory that records its key when called.
    fn logged(log: &Log, key: &str, value: impl Into<Value>) -> Descriptor {
        let log = log.clone();
        let key = key.to_string();
        let value = value.into();
        Descriptor::factory(key.clone(), move || {
            log.lock().unwrap().push(key.clone());
            Ok(value.clone())
        })
    }

    /// Target returning `{args, kwargs}`.
    fn collect() -> Callable {
        Callable::new("collect", |call: CallArgs| {
            let mut out = BTreeMap::new();
            out.insert("args".to_string(), Value::List(call.args));
            out.insert("kwargs".to_string(), Value::Map(call.kwargs));
            Ok(Value::Map(out))
        })
    }

    fn run(flat: &IndexMap<String, Descriptor>, convert: &[&str]) -> Result<Applied> {
        let convert: Vec<String> = convert.iter().map(|s| s.to_string()).collect();
        depinject(
            &collect(),
            flat,
            &convert,
            &Registry::new(),
            BuildOptions::default(),
        )
    }

    #[test]
    fn test_ap009_end_to_end() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.x".to_string(), Descriptor::constant(5));
        flat.insert("args.0".to_string(), Descriptor::constant("a"));
        flat.insert("args.1".to_string(), Descriptor::constant("b"));

        let target = Callable::new("fn", |call: CallArgs| {
            let x = call.kwargs.get("x").cloned().unwrap_or_default();
            Ok(Value::List(vec![Value::List(call.args), x]))
        });
        let applied = depinject(&target, &flat, &[], &Registry::new(), BuildOptions::default())
            .unwrap();
        assert_eq!(
            applied.raw,
            Value::List(vec![
                Value::List(vec![Value::from("a"), Value::from("b")]),
                Value::Int(5),
            ])
        );
        assert_eq!(applied.stored, applied.raw);
    }

    #[test]
    fn test_ap009_descending_invocation_order() {
        let log: Log = Arc::default();
        let mut flat = IndexMap::new();
        for key in ["args.0", "kwargs.b", "kwargs.a", "args.1", "kwargs.c.d"] {
            flat.insert(key.to_string(), logged(&log, key, 1));
        }
        run(&flat, &[]).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["kwargs.c.d", "kwargs.b", "kwargs.a", "args.1", "args.0"]
        );
    }

    #[test]
    fn test_ap009_list_conversion_sorts_keys() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.layers.1".to_string(), Descriptor::constant("X"));
        flat.insert("kwargs.layers.0".to_string(), Descriptor::constant("Y"));
        let applied = run(&flat, &["kwargs.layers"]).unwrap();
        let kwargs = applied.raw.as_map().unwrap()["kwargs"].clone();
        assert_eq!(
            kwargs.as_map().unwrap()["layers"],
            Value::List(vec![Value::from("Y"), Value::from("X")])
        );
    }

    #[test]
    fn test_ap009_list_conversion_is_string_sorted() {
        let mut flat = IndexMap::new();
        for i in [2, 10, 1] {
            flat.insert(format!("args.{}", i), Descriptor::constant(i as i64));
        }
        let applied = run(&flat, &[]).unwrap();
        assert_eq!(
            applied.raw.as_map().unwrap()["args"],
            Value::List(vec![Value::Int(1), Value::Int(10), Value::Int(2)])
        );
    }

    #[test]
    fn test_ap009_missing_conversion_path_is_empty_list() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.x".to_string(), Descriptor::constant(1));
        let applied = run(&flat, &["kwargs.callbacks"]).unwrap();
        let kwargs = applied.raw.as_map().unwrap()["kwargs"].clone();
        assert_eq!(kwargs.as_map().unwrap()["callbacks"], Value::List(vec![]));
    }

    #[test]
    fn test_ap009_conversion_through_leaf_fails() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.x".to_string(), Descriptor::constant(1));
        let err = run(&flat, &["kwargs.x.items"]).unwrap_err();
        assert!(matches!(
            err,
            Error::Shape { ref path, expected: "a subtree", .. } if path == "kwargs.x"
        ));
    }

    #[test]
    fn test_ap009_args_default_empty() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.x".to_string(), Descriptor::constant(1));
        let applied = run(&flat, &[]).unwrap();
        assert_eq!(applied.raw.as_map().unwrap()["args"], Value::List(vec![]));

        let applied = run(&IndexMap::new(), &[]).unwrap();
        let map = applied.raw.as_map().unwrap();
        assert_eq!(map["args"], Value::List(vec![]));
        assert_eq!(map["kwargs"], Value::Map(BTreeMap::new()));
    }

    #[test]
    fn test_ap009_nested_kwargs_become_mappings() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.opt.lr".to_string(), Descriptor::constant(0.1));
        flat.insert("kwargs.opt.momentum".to_string(), Descriptor::constant(0.9));
        let applied = run(&flat, &[]).unwrap();
        let kwargs = applied.raw.as_map().unwrap()["kwargs"].clone();
        let opt = kwargs.as_map().unwrap()["opt"].as_map().unwrap().clone();
        assert_eq!(opt["lr"], Value::Float(0.1));
        assert_eq!(opt["momentum"], Value::Float(0.9));
    }

    #[test]
    fn test_ap009_store_receives_result_once() {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let sink_log = seen.clone();
        let sink = Callable::new("capture", move |call: CallArgs| {
            sink_log.lock().unwrap().push(call.args[0].clone());
            Ok(Value::from("stored"))
        });
        let mut flat = IndexMap::new();
        flat.insert("kwargs.x".to_string(), Descriptor::constant(3));
        flat.insert(
            "store".to_string(),
            Descriptor::factory("capture-factory", move || Ok(Value::Callable(sink.clone()))),
        );
        let applied = run(&flat, &[]).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], applied.raw);
        assert_eq!(applied.stored, Value::from("stored"));
    }

    #[test]
    fn test_ap009_store_must_be_callable() {
        let mut flat = IndexMap::new();
        flat.insert("store".to_string(), Descriptor::constant(1));
        let err = run(&flat, &[]).unwrap_err();
        assert!(matches!(err, Error::NotInvokable { ref path, found: "int" } if path == "store"));
    }

    #[test]
    fn test_ap009_failure_stops_resolution() {
        let log: Log = Arc::default();
        let mut flat = IndexMap::new();
        flat.insert("kwargs.z".to_string(), logged(&log, "kwargs.z", 1));
        flat.insert(
            "kwargs.m".to_string(),
            Descriptor::factory("broken", || Err(Error::call("broken", "no data"))),
        );
        flat.insert("kwargs.a".to_string(), logged(&log, "kwargs.a", 1));

        let target_calls = Arc::new(Mutex::new(0));
        let counter = target_calls.clone();
        let target = Callable::new("t", move |_call: CallArgs| {
            *counter.lock().unwrap() += 1;
            Ok(Value::Null)
        });
        let err = depinject(&target, &flat, &[], &Registry::new(), BuildOptions::default())
            .unwrap_err();

        assert!(matches!(err, Error::Instantiation { ref path, .. } if path == "kwargs.m"));
        assert!(matches!(err.root(), Error::Call { callable, .. } if callable == "broken"));
        // kwargs.z ran before the failure and is not rolled back; kwargs.a never ran.
        assert_eq!(*log.lock().unwrap(), ["kwargs.z"]);
        assert_eq!(*target_calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_ap009_target_failure_surfaces() {
        let target = Callable::new("explode", |_call: CallArgs| {
            Err(Error::call("explode", "bad input"))
        });
        let err = depinject(
            &target,
            &IndexMap::new(),
            &[],
            &Registry::new(),
            BuildOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TargetInvocation { ref target, .. } if target == "explode"));
        assert!(matches!(err.root(), Error::Call { .. }));
    }

    #[test]
    fn test_ap009_deeper_key_overwrites_factory() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.a".to_string(), Descriptor::constant(1));
        flat.insert("kwargs.a.b".to_string(), Descriptor::constant(2));
        let err = run(&flat, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::NotInvokable { ref path, found: "subtree" } if path == "kwargs.a"
        ));
    }

    /// Registry whose `model` target returns its keyword arguments.
    fn model_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register("model", |call: CallArgs| Ok(Value::Map(call.kwargs)));
        registry
    }

    fn recipe(yaml: &str) -> Descriptor {
        Descriptor::recipe(serde_yaml_ng::from_str(yaml).unwrap())
    }

    fn injected_model(flat: &IndexMap<String, Descriptor>, convert: &[&str]) -> Result<Value> {
        let convert: Vec<String> = convert.iter().map(|s| s.to_string()).collect();
        let applied = depinject(
            &collect(),
            flat,
            &convert,
            &model_registry(),
            BuildOptions::default(),
        )?;
        let kwargs = applied.raw.as_map().unwrap()["kwargs"].clone();
        Ok(kwargs.as_map().unwrap()["model"].clone())
    }

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_ap009_deeper_key_extends_recipe() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.model".to_string(), recipe("{_target_: model, depth: 2}"));
        flat.insert("kwargs.model.optimizer".to_string(), Descriptor::constant("sgd"));
        let model = injected_model(&flat, &[]).unwrap();
        assert_eq!(
            model,
            map(&[("depth", Value::Int(2)), ("optimizer", Value::from("sgd"))])
        );
    }

    #[test]
    fn test_ap009_extension_nests_and_overrides() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.model".to_string(), recipe("{_target_: model, depth: 2}"));
        flat.insert("kwargs.model.depth".to_string(), Descriptor::constant(5));
        flat.insert("kwargs.model.optimizer".to_string(), recipe("{_target_: model, lr: 1}"));
        flat.insert("kwargs.model.optimizer.decay".to_string(), Descriptor::constant(0.5));
        let model = injected_model(&flat, &[]).unwrap();
        assert_eq!(
            model,
            map(&[
                ("depth", Value::Int(5)),
                (
                    "optimizer",
                    map(&[("decay", Value::Float(0.5)), ("lr", Value::Int(1))])
                ),
            ])
        );
    }

    #[test]
    fn test_ap009_conversion_inside_recipe_arguments() {
        let mut flat = IndexMap::new();
        flat.insert(
            "kwargs.model".to_string(),
            recipe("{_target_: model, items: {b: 2, a: 1}}"),
        );
        let model = injected_model(&flat, &["kwargs.model.items"]).unwrap();
        assert_eq!(
            model,
            map(&[("items", Value::List(vec![Value::Int(1), Value::Int(2)]))])
        );
    }

    #[test]
    fn test_ap009_conversion_below_extended_recipe() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.model".to_string(), recipe("{_target_: model}"));
        flat.insert("kwargs.model.layers.1".to_string(), Descriptor::constant("X"));
        flat.insert("kwargs.model.layers.0".to_string(), Descriptor::constant("Y"));
        let model = injected_model(&flat, &["kwargs.model.layers"]).unwrap();
        assert_eq!(
            model,
            map(&[(
                "layers",
                Value::List(vec![Value::from("Y"), Value::from("X")])
            )])
        );
    }

    #[test]
    fn test_ap009_conversion_of_scalar_recipe_argument_fails() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.model".to_string(), recipe("{_target_: model, depth: 2}"));
        let err = injected_model(&flat, &["kwargs.model.depth"]).unwrap_err();
        assert!(matches!(
            err,
            Error::Shape { ref path, expected: "a list", found: "number" }
                if path == "kwargs.model.depth"
        ));
    }

    #[test]
    fn test_ap009_recipes_resolve_through_registry() {
        let mut registry = Registry::new();
        registry.register("scale", |call: CallArgs| {
            let x = call.require("scale", "x", 0)?.as_i64().unwrap_or(0);
            let by = call.require("scale", "by", 1)?.as_i64().unwrap_or(1);
            Ok(Value::Int(x * by))
        });
        let mut flat = IndexMap::new();
        flat.insert(
            "kwargs.y".to_string(),
            Descriptor::recipe(serde_yaml_ng::from_str("{_target_: scale, x: 4, by: 3}").unwrap()),
        );
        let applied = depinject(&collect(), &flat, &[], &registry, BuildOptions::default())
            .unwrap();
        let kwargs = applied.raw.as_map().unwrap()["kwargs"].clone();
        assert_eq!(kwargs.as_map().unwrap()["y"], Value::Int(12));
    }

    #[test]
    fn test_ap009_tree_snapshot_after_resolve() {
        let mut flat = IndexMap::new();
        flat.insert("kwargs.x".to_string(), Descriptor::constant(5));
        let registry = Registry::new();
        let built = build(&flat, &registry, BuildOptions::default()).unwrap();
        assert_eq!(built.tree().to_string(), "kwargs:\n  x: <factory const>\n");
        let resolved = resolve(built, &[], &registry).unwrap();
        assert_eq!(resolved.tree().to_string(), "kwargs:\n  x: 5\n");
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["kwargs", "args"]),
            "[a-d0-9]{1,2}",
        )
            .prop_map(|(head, tail)| format!("{}.{}", head, tail))
    }

    proptest! {
        #[test]
        fn prop_ap009_each_factory_once_in_descending_order(
            keys in prop::collection::btree_set(key_strategy(), 1..12)
        ) {
            let log: Log = Arc::default();
            let flat: IndexMap<String, Descriptor> = keys
                .iter()
                .map(|k| (k.clone(), logged(&log, k, 1)))
                .collect();
            run(&flat, &[]).unwrap();
            let mut expected: Vec<String> = keys.iter().cloned().collect();
            expected.reverse();
            prop_assert_eq!(&*log.lock().unwrap(), &expected);
        }

        #[test]
        fn prop_ap009_repeated_runs_are_identical(
            keys in prop::collection::btree_set(key_strategy(), 1..12)
        ) {
            let flat: IndexMap<String, Descriptor> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), Descriptor::constant(i as i64)))
                .collect();
            let first = run(&flat, &[]).unwrap();
            let second = run(&flat, &[]).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
