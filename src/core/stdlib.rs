//! AP-010: Built-in `aprl.*` targets.
//!
//! Enough to write useful injection, run and chain files without
//! registering anything: constants and containers, arithmetic and string
//! joining, directory creation, and the two stock sinks.

use super::error::{Error, Result};
use super::registry::Registry;
use super::value::{CallArgs, Callable, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Create `path` as a directory, or create its parent when it names a file.
///
/// With `isdir` unset, a path without an extension is taken as a directory.
pub fn mkp(path: &Path, isdir: Option<bool>) -> Result<PathBuf> {
    let isdir = isdir.unwrap_or_else(|| path.extension().is_none());
    let dir = if isdir { Some(path) } else { path.parent() };
    if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.display().to_string(),
            source,
        })?;
    }
    Ok(path.to_path_buf())
}

/// Register every built-in under its `aprl.*` name.
pub fn register_builtins(registry: &mut Registry) {
    registry
        .register_with_doc("aprl.const", "Return `value` unchanged", |call: CallArgs| {
            Ok(call.require("aprl.const", "value", 0)?.clone())
        })
        .register_with_doc("aprl.identity", "Return the first argument", |call: CallArgs| {
            Ok(call.args.into_iter().next().unwrap_or_default())
        })
        .register_with_doc("aprl.list", "Collect positional arguments into a list", |call: CallArgs| {
            Ok(Value::List(call.args))
        })
        .register_with_doc("aprl.dict", "Collect keyword arguments into a mapping", |call: CallArgs| {
            Ok(Value::Map(call.kwargs))
        })
        .register_with_doc(
            "aprl.collect",
            "Return the call itself as {args, kwargs}",
            |call: CallArgs| {
                let mut out = BTreeMap::new();
                out.insert("args".to_string(), Value::List(call.args));
                out.insert("kwargs".to_string(), Value::Map(call.kwargs));
                Ok(Value::Map(out))
            },
        )
        .register_with_doc("aprl.sum", "Add numeric positional arguments", sum)
        .register_with_doc(
            "aprl.concat",
            "Join positional arguments as text, separated by `sep`",
            concat,
        )
        .register_with_doc("aprl.call", "Invoke `fn` with the remaining arguments", call)
        .register_with_doc(
            "aprl.mkp",
            "Create a directory (or a file's parent) and return the path",
            |call: CallArgs| {
                let path = call
                    .require("aprl.mkp", "path", 0)?
                    .as_str()
                    .ok_or_else(|| Error::call("aprl.mkp", "path must be a string"))?
                    .to_string();
                let isdir = call.get("isdir", 1).and_then(Value::as_bool);
                let made = mkp(Path::new(&path), isdir)?;
                Ok(Value::Str(made.display().to_string()))
            },
        )
        .register_with_doc("aprl.print", "Sink printing each value as YAML", |call: CallArgs| {
            let prefix = call
                .get("prefix", 0)
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(Value::Callable(print_sink(prefix)))
        })
        .register_with_doc(
            "aprl.write_yaml",
            "Sink writing each value to `path` as YAML",
            |call: CallArgs| {
                let path = call
                    .require("aprl.write_yaml", "path", 0)?
                    .as_str()
                    .ok_or_else(|| Error::call("aprl.write_yaml", "path must be a string"))?;
                Ok(Value::Callable(write_yaml_sink(PathBuf::from(path))))
            },
        );
}

fn sum(call: CallArgs) -> Result<Value> {
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for (i, arg) in call.args.iter().enumerate() {
        match arg {
            Value::Int(n) if float_total.is_none() => {
                int_total = int_total
                    .checked_add(*n)
                    .ok_or_else(|| Error::call("aprl.sum", "integer overflow"))?;
            }
            Value::Int(_) | Value::Float(_) => {
                let x = arg.as_f64().unwrap_or_default();
                *float_total.get_or_insert(int_total as f64) += x;
            }
            other => {
                return Err(Error::call(
                    "aprl.sum",
                    format!("argument {} is a {}, not a number", i, other.kind()),
                ))
            }
        }
    }
    Ok(match float_total {
        Some(x) => Value::Float(x),
        None => Value::Int(int_total),
    })
}

fn concat(call: CallArgs) -> Result<Value> {
    let sep = call
        .kwargs
        .get("sep")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let parts: Vec<String> = call
        .args
        .iter()
        .map(|v| match v {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Ok(Value::Str(parts.join(sep)))
}

fn call(mut call: CallArgs) -> Result<Value> {
    let func = match call.kwargs.remove("fn") {
        Some(f) => f,
        None if !call.args.is_empty() => call.args.remove(0),
        None => return Err(Error::call("aprl.call", "missing argument 'fn'")),
    };
    match func {
        Value::Callable(c) => c.call(call),
        other => Err(Error::call(
            "aprl.call",
            format!("'fn' is a {}, not a callable", other.kind()),
        )),
    }
}

fn sink_value(name: &str, call: &CallArgs) -> Result<Value> {
    call.args
        .first()
        .cloned()
        .ok_or_else(|| Error::call(name, "sink expects one argument"))
}

fn print_sink(prefix: Option<String>) -> Callable {
    Callable::new("aprl.print", move |call: CallArgs| {
        let value = sink_value("aprl.print", &call)?;
        let yaml = serde_yaml_ng::to_string(&value)
            .map_err(|e| Error::call("aprl.print", e.to_string()))?;
        match &prefix {
            Some(p) => print!("{}{}", p, yaml),
            None => print!("{}", yaml),
        }
        Ok(value)
    })
}

fn write_yaml_sink(path: PathBuf) -> Callable {
    Callable::new("aprl.write_yaml", move |call: CallArgs| {
        let value = sink_value("aprl.write_yaml", &call)?;
        mkp(&path, Some(false))?;
        let yaml = serde_yaml_ng::to_string(&value)
            .map_err(|e| Error::call("aprl.write_yaml", e.to_string()))?;
        std::fs::write(&path, yaml).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!("wrote {}", path.display());
        Ok(Value::Str(path.display().to_string()))
    })
}
