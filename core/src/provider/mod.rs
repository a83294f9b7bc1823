//! The raw storage contract: a hierarchy of byte blobs addressed by
//! [`Identifier`].
//!
//! No method is atomic across multiple blobs. The one hard cross-process
//! requirement is [`StorageSession::create`]: an atomic create-if-absent,
//! which is the primitive everything else builds mutual exclusion out of.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use contrail_id::Identifier;

use crate::Result;

pub mod file;

pub use file::FileStorageProvider;

#[async_trait]
pub trait StorageSession: Send + Sync {
	/// Identifiers of the direct children of `path`.
	async fn list_children(&self, path: &Identifier) -> Result<Vec<Identifier>>;

	/// The blob at `path`, or `None` when absent.
	async fn fetch(&self, path: &Identifier) -> Result<Option<Vec<u8>>>;

	/// Unconditionally stores `content` at `path`, creating parents as
	/// needed.
	async fn store(&self, path: &Identifier, content: Vec<u8>) -> Result<()>;

	/// Atomic create-if-absent: returns true iff this call materialised the
	/// blob. When the path already exists and `wait` is non-zero, keeps
	/// retrying until the path disappears or `wait` elapses, then returns
	/// false.
	async fn create(&self, path: &Identifier, content: Vec<u8>, wait: Duration) -> Result<bool>;

	/// Idempotent removal of `path` and everything below it.
	async fn delete(&self, path: &Identifier) -> Result<()>;

	/// Blocks until all previously submitted mutations are durable.
	async fn flush(&self) -> Result<()>;

	/// Must be called when the session is no longer needed; implies
	/// [`Self::flush`].
	async fn close(&self) -> Result<()>;
}

pub trait StorageProvider: Send + Sync {
	/// Starts a storage session.
	fn connect(&self) -> Arc<dyn StorageSession>;
}
