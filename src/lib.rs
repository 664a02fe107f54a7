//! aprl: configuration composition and dotted-path dependency injection.
//!
//! Factories registered under flat dotted keys (`kwargs.model.lr`,
//! `args.0`, `store`) are assembled into a tree, resolved deepest-first,
//! and applied to a target as `store(target(*args, **kwargs))`.

pub mod cli;
pub mod core;

pub use crate::core::builder::{build, BuildOptions, BuiltTree};
pub use crate::core::error::{Error, Result};
pub use crate::core::registry::{Instantiator, Registry};
pub use crate::core::resolver::{apply, depinject, resolve, Applied, ResolvedTree};
pub use crate::core::types::Descriptor;
pub use crate::core::value::{CallArgs, Callable, Value};
