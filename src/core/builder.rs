//! AP-008: Path-tree builder: flat dotted keys to a nested factory tree.
//!
//! Keys are inserted in ascending string order, so a lexicographically
//! later key is applied last. A deeper key under a recipe extends that
//! recipe with an extra keyword argument; under any other leaf it wins and
//! the leaf is replaced. Keys outside the reserved `kwargs`/`args`/`store`
//! branches are dropped with a warning and never parsed.

use super::error::{Error, Result};
use super::path::DottedPath;
use super::registry::Instantiator;
use super::tree::{Node, PathTree};
use super::types::Descriptor;
use indexmap::IndexMap;

/// Branch bound to keyword arguments.
pub const KWARGS_PREFIX: &str = "kwargs";
/// Branch combined, key-sorted, into positional arguments.
pub const ARGS_PREFIX: &str = "args";
/// Optional sink receiving the target's return value.
pub const STORE_PREFIX: &str = "store";

pub const PREFIXES: [&str; 3] = [STORE_PREFIX, KWARGS_PREFIX, ARGS_PREFIX];

/// Build behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Fail when a key would replace another instead of letting the later
    /// key win. Extending a recipe is always allowed.
    pub strict: bool,
}

/// Output of [`build`]: the tree plus the keys that made it in.
#[derive(Debug)]
pub struct BuiltTree {
    pub(crate) tree: PathTree,
    pub(crate) keys: Vec<DottedPath>,
    ignored: Vec<String>,
}

impl BuiltTree {
    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    /// Accepted keys, ascending.
    pub fn keys(&self) -> &[DottedPath] {
        &self.keys
    }

    /// Keys dropped for not starting with a reserved branch.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }
}

/// True when the key's first segment is a reserved branch. The key need not
/// be a valid path.
pub fn is_reserved(key: &str) -> bool {
    key.split('.')
        .next()
        .is_some_and(|head| PREFIXES.contains(&head))
}

/// Build the nested factory tree from a flat mapping.
pub fn build<I: Instantiator + ?Sized>(
    flat: &IndexMap<String, Descriptor>,
    instantiator: &I,
    options: BuildOptions,
) -> Result<BuiltTree> {
    let mut accepted = Vec::with_capacity(flat.len());
    let mut ignored = Vec::new();
    for key in flat.keys() {
        if is_reserved(key) {
            accepted.push(DottedPath::parse(key)?);
        } else {
            ignored.push(key.clone());
        }
    }
    if !ignored.is_empty() {
        tracing::warn!(
            "all factory keys should start with one of {:?}, {:?} will be ignored",
            PREFIXES,
            ignored
        );
    }
    accepted.sort();

    tracing::debug!("creating nested tree of factories");
    let mut tree = PathTree::new();
    for path in &accepted {
        tracing::debug!("inserting {} as {:?}", path, path.segments());
        let leaf = instantiator.normalize(path.as_str(), &flat[path.as_str()])?;
        if let Some(displaced) = tree.set_at(path.segments(), Node::Pending(leaf)) {
            let other = path.segments()[..displaced.depth].join(".");
            if options.strict {
                return Err(Error::ConflictingPath {
                    path: path.to_string(),
                    other,
                });
            }
            tracing::debug!(
                "{} overwrote the {} at {}",
                path,
                displaced.node.kind(),
                other
            );
        }
    }
    tracing::debug!("nested factory tree:\n{}", tree);

    Ok(BuiltTree {
        tree,
        keys: accepted,
        ignored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registry;
    use crate::core::types::Leaf;

    fn flat(entries: &[(&str, i64)]) -> IndexMap<String, Descriptor> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Descriptor::constant(*v)))
            .collect()
    }

    #[test]
    fn test_ap008_nests_keys() {
        let built = build(
            &flat(&[("kwargs.model.lr", 1), ("args.0", 2), ("store", 3)]),
            &Registry::new(),
            BuildOptions::default(),
        )
        .unwrap();
        let tree = built.tree();
        assert!(matches!(
            tree.get_at(&["kwargs", "model", "lr"]),
            Some(Node::Pending(Leaf::Factory(_)))
        ));
        assert!(tree.get_at(&["args", "0"]).is_some());
        assert!(tree.get_at(&["store"]).is_some());
        let keys: Vec<&str> = built.keys().iter().map(DottedPath::as_str).collect();
        assert_eq!(keys, ["args.0", "kwargs.model.lr", "store"]);
    }

    #[test]
    fn test_ap008_ignores_unreserved_keys() {
        let built = build(
            &flat(&[("kwargs.x", 1), ("params.lr", 2), ("kwargsish.y", 3)]),
            &Registry::new(),
            BuildOptions::default(),
        )
        .unwrap();
        assert_eq!(built.ignored(), ["params.lr", "kwargsish.y"]);
        assert!(built.tree().get_at(&["params"]).is_none());
        assert_eq!(built.keys().len(), 1);
    }

    #[test]
    fn test_ap008_malformed_unreserved_keys_are_ignored() {
        let built = build(
            &flat(&[("kwargs.x", 1), ("notes..draft", 2), ("", 3), (".args", 4)]),
            &Registry::new(),
            BuildOptions::default(),
        )
        .unwrap();
        assert_eq!(built.ignored(), ["notes..draft", "", ".args"]);
        assert_eq!(built.keys().len(), 1);
    }

    #[test]
    fn test_ap008_reserved_prefix_check() {
        assert!(is_reserved("kwargs"));
        assert!(is_reserved("args.0"));
        assert!(is_reserved("store.x"));
        assert!(is_reserved("kwargs..x"));
        assert!(!is_reserved("kwargsish.y"));
        assert!(!is_reserved(""));
    }

    fn recipe(yaml: &str) -> Descriptor {
        Descriptor::recipe(serde_yaml_ng::from_str(yaml).unwrap())
    }

    #[test]
    fn test_ap008_deeper_key_extends_recipe() {
        let mut flat = flat(&[("kwargs.model.optimizer", 1)]);
        flat.insert("kwargs.model".to_string(), recipe("{_target_: model, depth: 2}"));
        let built = build(&flat, &Registry::new(), BuildOptions { strict: true }).unwrap();
        assert!(matches!(
            built.tree().get_at(&["kwargs", "model"]),
            Some(Node::Extended { leaf: Leaf::Recipe(r), children })
                if r.target == "model" && children.contains_key("optimizer")
        ));
        assert_eq!(built.keys().len(), 2);
    }

    #[test]
    fn test_ap008_later_key_overwrites_earlier_factory() {
        // "kwargs.a" < "kwargs.a.b": the deeper key is inserted last and wins.
        let built = build(
            &flat(&[("kwargs.a.b", 2), ("kwargs.a", 1)]),
            &Registry::new(),
            BuildOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            built.tree().get_at(&["kwargs", "a"]),
            Some(Node::Branch(children)) if children.contains_key("b")
        ));
    }

    #[test]
    fn test_ap008_strict_rejects_overlap() {
        let err = build(
            &flat(&[("kwargs.a", 1), ("kwargs.a.b", 2)]),
            &Registry::new(),
            BuildOptions { strict: true },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::ConflictingPath { ref path, ref other } if path == "kwargs.a.b" && other == "kwargs.a"
        ));
    }

    #[test]
    fn test_ap008_invalid_key_is_fatal() {
        let err = build(&flat(&[("kwargs..x", 1)]), &Registry::new(), BuildOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn test_ap008_normalization_failure_aborts() {
        let mut flat = flat(&[("kwargs.a", 1)]);
        flat.insert(
            "kwargs.b".to_string(),
            Descriptor::recipe(serde_yaml_ng::from_str("{not_a_target: 1}").unwrap()),
        );
        let err = build(&flat, &Registry::new(), BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Normalization { ref path, .. } if path == "kwargs.b"));
    }

    #[test]
    fn test_ap008_build_does_not_invoke_factories() {
        let mut flat = IndexMap::new();
        flat.insert(
            "kwargs.boom".to_string(),
            Descriptor::factory("boom", || Err(Error::call("boom", "should not run"))),
        );
        let built = build(&flat, &Registry::new(), BuildOptions::default()).unwrap();
        assert_eq!(built.keys().len(), 1);
    }
}
