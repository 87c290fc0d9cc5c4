//! Predicate search
//!
//! Build a [`Query`], then run it against a tree with [`search`] or a [`Searcher`] of your own.
//!

// Re-export
pub use self::engine::search;
pub use self::engine::search_sequential;
pub use self::engine::{SearchOptions, SearchResults, SearchStats, Searcher, MAX_THREADS_CEILING};
pub use self::query::{NameFilter, Predicate, Query, QueryError, SizeFilter};

pub mod engine;
mod glob;
pub mod query;
