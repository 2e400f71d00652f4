//! Core library for the reconciling indexer engine: crawls a filesystem,
//! tails live changes, and keeps a remote search index in sync.

pub mod change_source;
pub mod config;
pub mod daemon;
pub mod document;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod path_filter;
pub mod query;
pub mod reconciler;
pub mod validator;

pub use config::Config;
pub use engine::EngineAdapter;
pub use error::{Error, Result};
pub use path_filter::PathFilter;
