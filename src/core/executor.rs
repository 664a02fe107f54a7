//! AP-011: Executor: run loops over named parts and chained steps.
//!
//! `run_parts` invokes a selection of parts in order, logging progress the
//! same way for parts of an appareil and stages of a pipeline.
//! `run_chain` feeds each step's output into the next.

use super::error::{Error, Result};
use super::types::Part;
use super::value::{CallArgs, Callable, Value};
use indexmap::IndexMap;
use std::time::{Duration, Instant};

/// Outcome of a part run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Parts invoked, with their return values, in run order.
    pub outputs: IndexMap<String, Value>,
    /// Parts logged but not invoked (dry run).
    pub skipped: Vec<String>,
    pub total_duration: Duration,
}

impl RunReport {
    pub fn ran(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }
}

/// Every part name in ascending order.
pub fn all_parts(parts: &IndexMap<String, Part>) -> Vec<String> {
    let mut names: Vec<String> = parts.keys().cloned().collect();
    names.sort();
    names
}

/// Run `to_run` from `parts`, in the given order.
///
/// `unit` labels the log lines ("part", "stage"). Every name is checked
/// before anything runs; with `dry` nothing is invoked.
pub fn run_parts(
    unit: &str,
    to_run: &[String],
    parts: &IndexMap<String, Part>,
    dry: bool,
) -> Result<RunReport> {
    if let Some(missing) = to_run.iter().find(|name| !parts.contains_key(*name)) {
        return Err(Error::UnknownPart {
            unit: unit.to_string(),
            name: missing.clone(),
            available: all_parts(parts).join(", "),
        });
    }

    let start = Instant::now();
    let mut report = RunReport::default();
    tracing::info!("Starting");
    for name in to_run {
        let part = &parts[name.as_str()];
        tracing::info!("Running {} {}", unit, name);
        match part.description() {
            Some(description) => tracing::debug!("{}: {}", part.name(), description),
            None => tracing::debug!("{}", part.name()),
        }
        if dry {
            report.skipped.push(name.clone());
            continue;
        }
        let output = part.callable().invoke()?;
        tracing::info!("{} {} done", unit, name);
        report.outputs.insert(name.clone(), output);
    }
    tracing::info!("Done");
    report.total_duration = start.elapsed();
    Ok(report)
}

/// Run steps in ascending name order, each receiving the previous output.
///
/// Without an `input` the first step is invoked with no arguments and its
/// result becomes the input of the rest. Without steps the input comes
/// back unchanged (or `Null`).
pub fn run_chain(input: Option<Value>, steps: &IndexMap<String, Callable>) -> Result<Value> {
    let mut names: Vec<&String> = steps.keys().collect();
    names.sort();
    let mut names = names.into_iter();

    let mut current = match input {
        Some(value) => value,
        None => match names.next() {
            Some(first) => {
                tracing::info!("Running step {} (no input)", first);
                steps[first.as_str()].invoke()?
            }
            None => return Ok(Value::Null),
        },
    };
    for name in names {
        tracing::info!("Running step {}", name);
        current = steps[name.as_str()].call(CallArgs::positional(vec![current]))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Part {
        let log = log.clone();
        let tag = name.to_string();
        Part::Direct(Callable::nullary(name, move || {
            log.lock().unwrap().push(tag.clone());
            Ok(Value::from(tag.as_str()))
        }))
    }

    fn parts(log: &Arc<Mutex<Vec<String>>>, names: &[&str]) -> IndexMap<String, Part> {
        names
            .iter()
            .map(|n| (n.to_string(), recording(log, n)))
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ap011_runs_in_given_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parts = parts(&log, &["a", "b", "c"]);
        let report = run_parts("part", &names(&["c", "a"]), &parts, false).unwrap();
        assert_eq!(*log.lock().unwrap(), ["c", "a"]);
        assert_eq!(report.ran().collect::<Vec<_>>(), ["c", "a"]);
        assert_eq!(report.outputs["c"], Value::from("c"));
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_ap011_dry_run_invokes_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parts = parts(&log, &["a", "b"]);
        let report = run_parts("stage", &all_parts(&parts), &parts, true).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(report.skipped, ["a", "b"]);
        assert_eq!(report.ran().count(), 0);
    }

    #[test]
    fn test_ap011_unknown_part_fails_before_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parts = parts(&log, &["b", "a"]);
        let err = run_parts("part", &names(&["a", "zzz"]), &parts, false).unwrap_err();
        assert!(log.lock().unwrap().is_empty());
        match err {
            Error::UnknownPart {
                name, available, ..
            } => {
                assert_eq!(name, "zzz");
                assert_eq!(available, "a, b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ap011_part_failure_stops_the_loop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parts = parts(&log, &["a", "c"]);
        parts.insert(
            "b".to_string(),
            Part::Direct(Callable::nullary("b", || Err(Error::call("b", "broken")))),
        );
        let err = run_parts("part", &names(&["a", "b", "c"]), &parts, false).unwrap_err();
        assert!(matches!(err, Error::Call { .. }));
        assert_eq!(*log.lock().unwrap(), ["a"]);
    }

    fn append(tag: &'static str) -> Callable {
        Callable::new(tag, move |call: CallArgs| {
            let prev = call.args.first().and_then(Value::as_str).unwrap_or("");
            Ok(Value::from(format!("{prev}{tag}")))
        })
    }

    #[test]
    fn test_ap011_chain_sorted_steps() {
        let mut steps = IndexMap::new();
        steps.insert("2_b".to_string(), append("b"));
        steps.insert("1_a".to_string(), append("a"));
        steps.insert("3_c".to_string(), append("c"));
        let out = run_chain(Some(Value::from(">")), &steps).unwrap();
        assert_eq!(out, Value::from(">abc"));
    }

    #[test]
    fn test_ap011_chain_without_input_starts_from_first_step() {
        let mut steps = IndexMap::new();
        steps.insert(
            "0_seed".to_string(),
            Callable::nullary("seed", || Ok(Value::from("s"))),
        );
        steps.insert("1_next".to_string(), append("n"));
        assert_eq!(run_chain(None, &steps).unwrap(), Value::from("sn"));
    }

    #[test]
    fn test_ap011_chain_without_steps() {
        let steps = IndexMap::new();
        assert_eq!(run_chain(Some(Value::Int(4)), &steps).unwrap(), Value::Int(4));
        assert_eq!(run_chain(None, &steps).unwrap(), Value::Null);
    }
}
