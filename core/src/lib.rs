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

//! An embedded, multi-version object database over a hierarchical blob
//! store.
//!
//! The stack, bottom up:
//!
//! - a raw [`provider::StorageSession`] stores byte blobs under hierarchical
//!   identifiers ([`provider::FileStorageProvider`] is the local-filesystem
//!   implementation);
//! - [`object::ObjectStorage`] layers serialization, a read-through LRU
//!   cache and lifecycle callbacks on top, scheduling every call through an
//!   identifier-indexed task scheduler;
//! - [`mvcc::MvccStorage`] adds revisions and optimistic concurrency:
//!   sessions write privately and publish through a validated commit, with
//!   conflicting sessions told to retry.

use std::time::Duration;

use contrail_id::Identifier;
use contrail_task_system::TaskError;
use contrail_utils::FileIOError;
use thiserror::Error;

pub mod codec;
pub mod item;
pub mod mvcc;
pub mod object;
pub mod provider;

pub use item::{Item, PropertyValue};
pub use mvcc::{Mode, MvccSession, MvccStorage};
pub use object::{Lifecycle, ObjectStorage, ObjectStorageSession};
pub use provider::{FileStorageProvider, StorageProvider, StorageSession};

/// How long a lock lease or a revision session claim stays valid.
pub const SESSION_MAX_ACTIVE: Duration = Duration::from_secs(31);

/// Reserved property name carrying an item's identifier.
pub const KEY_ID: &str = "__ID__";

/// Reserved property name carrying an item's kind.
pub const KEY_KIND: &str = "__KIND__";

/// Every error the storage stack surfaces. `Clone` because task results are
/// observable by any number of waiters.
#[derive(Debug, Clone, Error)]
pub enum Error {
	#[error("not found: {0}")]
	NotFound(Identifier),

	#[error(transparent)]
	FileIO(#[from] FileIOError),

	#[error("folder is locked: {0}")]
	FolderLocked(Identifier),

	#[error("conflicting commit")]
	ConflictingCommit,

	#[error("revision not found: {0}")]
	RevisionNotFound(i64),

	#[error("corrupted storage: {0}")]
	StorageCorrupt(String),

	#[error("internal error: {0}")]
	Internal(String),

	#[error("codec failure: {0}")]
	Codec(String),

	#[error("task was cancelled")]
	Cancelled,
}

impl From<TaskError<Error>> for Error {
	fn from(error: TaskError<Error>) -> Self {
		match error {
			TaskError::Cancelled => Self::Cancelled,
			TaskError::Panicked(message) => Self::Internal(message),
			TaskError::Run(error) => error,
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
