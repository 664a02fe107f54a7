//! AP-005: Path tree: the nested form of a flat dotted-path mapping.
//!
//! Insertion is last-write-wins. A path running through a pending recipe
//! extends it: the recipe keeps its place and gains children that become
//! keyword arguments once resolved. A path running through any other leaf
//! replaces that leaf with a subtree, and setting a path where a subtree
//! lives replaces the subtree. Either replacement reports the displaced
//! node so callers can log it or reject it.

use super::error::{Error, Result};
use super::types::Leaf;
use super::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A node in the tree.
#[derive(Debug, Clone)]
pub enum Node {
    Branch(BTreeMap<String, Node>),
    /// A normalized descriptor awaiting resolution.
    Pending(Leaf),
    /// A pending recipe with injected children.
    Extended {
        leaf: Leaf,
        children: BTreeMap<String, Node>,
    },
    Resolved(Value),
}

impl Node {
    pub fn branch() -> Self {
        Self::Branch(BTreeMap::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Branch(_) => "subtree",
            Self::Pending(_) | Self::Extended { .. } => "unresolved descriptor",
            Self::Resolved(v) => v.kind(),
        }
    }

    /// Children of a subtree or of an extended recipe.
    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Self::Branch(children) | Self::Extended { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match self {
            Self::Branch(children) | Self::Extended { children, .. } => Some(children),
            _ => None,
        }
    }

    /// True for a pending recipe, which deeper paths extend instead of
    /// replacing.
    pub fn is_extendable(&self) -> bool {
        matches!(self, Self::Pending(Leaf::Recipe(_)) | Self::Extended { .. })
    }

    /// Collapse into a plain value. Subtrees become mappings; an unresolved
    /// descriptor anywhere below is an error.
    pub fn into_value(self, path: &str) -> Result<Value> {
        match self {
            Self::Resolved(v) => Ok(v),
            Self::Branch(children) => {
                let mut out = BTreeMap::new();
                for (key, child) in children {
                    let child_path = format!("{}.{}", path, key);
                    out.insert(key, child.into_value(&child_path)?);
                }
                Ok(Value::Map(out))
            }
            Self::Pending(_) | Self::Extended { .. } => Err(Error::Unresolved {
                path: path.to_string(),
            }),
        }
    }
}

/// What an insertion pushed out of the tree.
#[derive(Debug)]
pub struct Displaced {
    /// Number of leading path segments naming the displaced position.
    pub depth: usize,
    pub node: Node,
}

/// Nested mapping from segment to node.
#[derive(Debug, Clone, Default)]
pub struct PathTree {
    root: BTreeMap<String, Node>,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn root(&self) -> &BTreeMap<String, Node> {
        &self.root
    }

    pub fn into_root(self) -> BTreeMap<String, Node> {
        self.root
    }

    /// Node at `path`, if every segment exists and each ancestor has children.
    pub fn get_at<S: AsRef<str>>(&self, path: &[S]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get(first.as_ref())?;
        for seg in rest {
            node = node.children()?.get(seg.as_ref())?;
        }
        Some(node)
    }

    pub fn get_at_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get_mut(first.as_ref())?;
        for seg in rest {
            node = node.children_mut()?.get_mut(seg.as_ref())?;
        }
        Some(node)
    }

    /// Place `node` at `path`, creating intermediate subtrees and extending
    /// pending recipes on the way.
    ///
    /// Returns whatever was displaced: the previous node at `path`, or the
    /// first ancestor leaf that had to become a subtree.
    pub fn set_at<S: AsRef<str>>(&mut self, path: &[S], node: Node) -> Option<Displaced> {
        let (last, parents) = path.split_last()?;
        let mut displaced = None;
        let parent = ensure_branch(&mut self.root, parents, &mut displaced);
        if let Some(prev) = parent.insert(last.as_ref().to_string(), node) {
            displaced.get_or_insert(Displaced {
                depth: path.len(),
                node: prev,
            });
        }
        displaced
    }

    /// The children at `path`, created (or forced over a leaf) if needed.
    pub fn ensure_subtree<S: AsRef<str>>(
        &mut self,
        path: &[S],
    ) -> (&mut BTreeMap<String, Node>, Option<Displaced>) {
        let mut displaced = None;
        let children = ensure_branch(&mut self.root, path, &mut displaced);
        (children, displaced)
    }

    /// Remove and return the node at `path`.
    pub fn take_at<S: AsRef<str>>(&mut self, path: &[S]) -> Option<Node> {
        let (last, parents) = path.split_last()?;
        let mut map = &mut self.root;
        for seg in parents {
            map = map.get_mut(seg.as_ref())?.children_mut()?;
        }
        map.remove(last.as_ref())
    }

    /// Depth of the first strict ancestor of `path` that can hold neither
    /// children nor an extension.
    pub fn blocking_ancestor<S: AsRef<str>>(&self, path: &[S]) -> Option<usize> {
        let parents = path.split_last().map(|(_, p)| p).unwrap_or(&[]);
        let mut map = &self.root;
        for (i, seg) in parents.iter().enumerate() {
            match map.get(seg.as_ref()) {
                Some(node) => match node.children() {
                    Some(children) => map = children,
                    None if node.is_extendable() => return None,
                    None => return Some(i + 1),
                },
                None => return None,
            }
        }
        None
    }
}

fn ensure_branch<'a, S: AsRef<str>>(
    mut map: &'a mut BTreeMap<String, Node>,
    segments: &[S],
    displaced: &mut Option<Displaced>,
) -> &'a mut BTreeMap<String, Node> {
    for (i, seg) in segments.iter().enumerate() {
        let slot = map
            .entry(seg.as_ref().to_string())
            .or_insert_with(Node::branch);
        if slot.children().is_none() {
            let old = std::mem::replace(slot, Node::branch());
            match old {
                Node::Pending(leaf @ Leaf::Recipe(_)) => {
                    *slot = Node::Extended {
                        leaf,
                        children: BTreeMap::new(),
                    };
                }
                old => {
                    displaced.get_or_insert(Displaced {
                        depth: i + 1,
                        node: old,
                    });
                }
            }
        }
        map = match slot.children_mut() {
            Some(children) => children,
            None => unreachable!("slot was just given children"),
        };
    }
    map
}

impl fmt::Display for PathTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.root.is_empty() {
            return writeln!(f, "{{}}");
        }
        write_children(f, &self.root, 0)
    }
}

fn write_children(
    f: &mut fmt::Formatter<'_>,
    children: &BTreeMap<String, Node>,
    indent: usize,
) -> fmt::Result {
    for (key, node) in children {
        let pad = "  ".repeat(indent);
        match node {
            Node::Branch(inner) if inner.is_empty() => writeln!(f, "{}{}: {{}}", pad, key)?,
            Node::Branch(inner) => {
                writeln!(f, "{}{}:", pad, key)?;
                write_children(f, inner, indent + 1)?;
            }
            Node::Extended { leaf, children } => {
                writeln!(f, "{}{}: {}", pad, key, leaf)?;
                write_children(f, children, indent + 1)?;
            }
            Node::Pending(leaf) => writeln!(f, "{}{}: {}", pad, key, leaf)?,
            Node::Resolved(value) => writeln!(f, "{}{}: {}", pad, key, value)?,
        }
    }
    Ok(())
}
