//! RDF Pages: a read-optimized paged triple store.
//!
//! A large subject-grouped triple dump is built offline into:
//! - one data file of per-subject gzip chunks (UTF-16LE text, one
//!   `predicate\tobject` line per triple);
//! - a bucketed primary index from subject to `(offset, length)`;
//! - an overflow index for subjects whose text was split into several chunks;
//! - a CVT table marking subjects without a name;
//! - a names table from MID to `type.object.name`.
//!
//! At query time every table is resident and the data file is held as a
//! page arena. Queries decompress only the chunks of the subjects they touch.
//!
//! ## Module Organization
//!
//! - `trim`: first pass over a raw dump (entity/other split, histograms)
//! - `builder`: streaming index build
//! - `predicate_types` / `ghost`: post-build side tables
//! - `store`: loading, chunk reads, one-time shared initialization
//! - `engine`: the five query operations and [`QueryService`]

pub mod arena;
pub mod binfmt;
pub mod bucket;
pub mod builder;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod ghost;
pub mod graph;
pub mod predicate_types;
pub mod store;
pub mod tables;
pub mod triples;
pub mod trim;

// Re-export key types
pub use arena::{PageArena, DEFAULT_PAGE_SIZE};
pub use builder::{build_store, BuildStats, IndexBuilder};
pub use config::{BuildConfig, StoreConfig, StoreFiles};
pub use engine::QueryService;
pub use error::{Result, StoreError};
pub use graph::{GraphNode, NodeId, NodeKind, PredicateObjects, Subgraph};
pub use store::{SharedStore, Store};
pub use tables::IndexTables;
pub use triples::{Triple, TripleReader};
