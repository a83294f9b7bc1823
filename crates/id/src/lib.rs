#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Hierarchical identifiers and the in-memory trees that index by them.
//!
//! An [`Identifier`] names a location in a nested hierarchy (`a/b/c`) and is
//! interned through a process-wide bounded cache. An [`IdTree`] arranges
//! values in a tree keyed by those identifiers and supports point lookups and
//! subtree visitation; [`LruIdTree`] bounds one with an LRU policy.

pub mod identifier;
pub mod lru;
pub mod lru_tree;
pub mod tree;

pub use identifier::Identifier;
pub use lru::LruCache;
pub use lru_tree::LruIdTree;
pub use tree::IdTree;
