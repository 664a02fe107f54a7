//! AP-002: Error taxonomy for building, resolving and applying injections.
//!
//! Every fatal condition is a variant here. Wrapping variants (`Instantiation`,
//! `TargetInvocation`, `Sink`) keep the underlying error as `source` so callers
//! can match on what the failing callable actually raised.

use thiserror::Error;

/// Main error type for the aprl crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("cannot normalize descriptor at '{path}': {message}")]
    Normalization { path: String, message: String },

    #[error("unknown target '{target}'")]
    UnknownTarget { target: String },

    #[error("instantiating '{path}' failed: {source}")]
    Instantiation {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("value at '{path}' is not invokable (found {found})")]
    NotInvokable { path: String, found: &'static str },

    #[error("conflicting path '{path}': overlaps '{other}'")]
    ConflictingPath { path: String, other: String },

    #[error("cannot use '{path}' as {expected} (found {found})")]
    Shape {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'{path}' was never resolved")]
    Unresolved { path: String },

    #[error("target '{target}' failed: {source}")]
    TargetInvocation {
        target: String,
        #[source]
        source: Box<Error>,
    },

    #[error("store sink failed: {source}")]
    Sink {
        #[source]
        source: Box<Error>,
    },

    #[error("{callable}: {message}")]
    Call { callable: String, message: String },

    #[error("unknown {unit} '{name}' (available: {available})")]
    UnknownPart {
        unit: String,
        name: String,
        available: String,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("override '{expr}': {message}")]
    Override { expr: String, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0} validation error(s)")]
    Validation(usize),

    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Error raised from inside a registered callable.
    pub fn call(callable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            callable: callable.into(),
            message: message.into(),
        }
    }

    /// Walk wrapping variants down to the error a callable actually raised.
    pub fn root(&self) -> &Error {
        match self {
            Self::Instantiation { source, .. }
            | Self::TargetInvocation { source, .. }
            | Self::Sink { source } => source.root(),
            other => other,
        }
    }
}
