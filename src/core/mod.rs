//! Core logic: paths, values, the factory tree, build, resolve, run loops.

pub mod builder;
pub mod error;
pub mod executor;
pub mod parser;
pub mod path;
pub mod registry;
pub mod resolver;
pub mod stdlib;
pub mod template;
pub mod tree;
pub mod types;
pub mod value;
