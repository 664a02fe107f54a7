//! AP-004: Runtime values, call arguments and callables.
//!
//! Factories produce `Value`s, targets consume them. Plain data converts
//! to and from YAML; callables and opaque objects pass through untouched
//! and render as placeholders when serialized.

use super::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type CallFn = dyn Fn(CallArgs) -> Result<Value> + Send + Sync;

/// A resolved value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Callable(Callable),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wrap an arbitrary instance (a model, a connection pool, ...).
    pub fn object<T: Any + Send + Sync>(inner: T) -> Self {
        Self::Object(Arc::new(inner))
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "mapping",
            Self::Callable(_) => "callable",
            Self::Object(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Borrow a wrapped object as its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Convert a YAML document into a value. Tags are dropped; non-string
    /// scalar keys are stringified.
    pub fn from_yaml(yaml: &serde_yaml_ng::Value) -> Result<Self> {
        use serde_yaml_ng::Value as Y;
        Ok(match yaml {
            Y::Null => Self::Null,
            Y::Bool(b) => Self::Bool(*b),
            Y::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Y::String(s) => Self::Str(s.clone()),
            Y::Sequence(items) => Self::List(
                items
                    .iter()
                    .map(Self::from_yaml)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Y::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    let key = match k {
                        Y::String(s) => s.clone(),
                        Y::Number(n) => n.to_string(),
                        Y::Bool(b) => b.to_string(),
                        other => {
                            return Err(Error::Parse(format!(
                                "mapping keys must be scalars, got {:?}",
                                other
                            )))
                        }
                    };
                    out.insert(key, Self::from_yaml(v)?);
                }
                Self::Map(out)
            }
            Y::Tagged(tagged) => Self::from_yaml(&tagged.value)?,
        })
    }

    /// Render as YAML. Callables and objects become placeholder strings.
    pub fn to_yaml(&self) -> serde_yaml_ng::Value {
        use serde_yaml_ng::Value as Y;
        match self {
            Self::Null => Y::Null,
            Self::Bool(b) => Y::Bool(*b),
            Self::Int(n) => Y::Number((*n).into()),
            Self::Float(x) => Y::Number((*x).into()),
            Self::Str(s) => Y::String(s.clone()),
            Self::List(items) => Y::Sequence(items.iter().map(Self::to_yaml).collect()),
            Self::Map(m) => {
                let mut out = serde_yaml_ng::Mapping::new();
                for (k, v) in m {
                    out.insert(Y::String(k.clone()), v.to_yaml());
                }
                Y::Mapping(out)
            }
            Self::Callable(c) => Y::String(format!("<callable {}>", c.name())),
            Self::Object(_) => Y::String("<object>".to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Callable(a), Self::Callable(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Int(n) => write!(f, "Int({})", n),
            Self::Float(x) => write!(f, "Float({})", x),
            Self::Str(s) => write!(f, "Str({:?})", s),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Self::Callable(c) => write!(f, "Callable({})", c.name()),
            Self::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Self::Callable(c) => write!(f, "<callable {}>", c.name()),
            Self::Object(_) => write!(f, "<object>"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_yaml().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Self::Map(m)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Self::Callable(c)
    }
}

/// Positional and keyword arguments for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Look up a parameter by keyword first, then by position.
    pub fn get(&self, name: &str, position: usize) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(position))
    }

    /// Like [`CallArgs::get`], failing with a call error naming `callable`.
    pub fn require(&self, callable: &str, name: &str, position: usize) -> Result<&Value> {
        self.get(name, position)
            .ok_or_else(|| Error::call(callable, format!("missing argument '{}'", name)))
    }

    /// Bound arguments first, then `extra`; `extra` keywords win.
    pub fn merged(&self, extra: CallArgs) -> CallArgs {
        let mut args = self.args.clone();
        args.extend(extra.args);
        let mut kwargs = self.kwargs.clone();
        kwargs.extend(extra.kwargs);
        CallArgs { args, kwargs }
    }
}

/// A named, shareable callable.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    func: Arc<CallFn>,
}

impl Callable {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// A zero-argument factory. Calling it with arguments is an error.
    pub fn nullary<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self::new(name, move |args: CallArgs| {
            if !args.is_empty() {
                return Err(Error::call(label.as_str(), "takes no arguments"));
            }
            func()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: CallArgs) -> Result<Value> {
        (self.func)(args)
    }

    /// Call with no arguments.
    pub fn invoke(&self) -> Result<Value> {
        self.call(CallArgs::default())
    }

    /// Partially apply `bound`; later call arguments are appended.
    pub fn bind(&self, bound: CallArgs) -> Callable {
        let inner = self.clone();
        Self::new(self.name.to_string(), move |extra: CallArgs| {
            inner.call(bound.merged(extra))
        })
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name)
    }
}
