//! Log explorer core: compiles nested filter selections into per-source
//! warehouse SQL and manages incrementally loaded, deduplicated results.

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod filter;
pub mod results;
pub mod session;
pub mod source;
pub mod sql_compiler;
pub mod templates;
pub mod time_range;

pub use error::QueryError;
pub use filter::{FilterGroup, FilterSpec, FilterValue};
pub use source::LogSourceTable;
pub use sql_compiler::{CompiledQuery, QueryCompiler};
