//! The object layer: serialization, a read-through cache, and lifecycle
//! callbacks over a raw storage session.
//!
//! Every operation is scheduled through the session's own [`Conductor`], so
//! the dependency rules of the scheduler govern object access exactly as
//! they govern raw blob access one level down. Lifecycle callbacks run
//! inside the scheduled task and therefore inherit its ordering guarantees.
//!
//! Caching deserialized values is safe even with multiple writing processes
//! because the layers above never mutate a stored object in place, they only
//! write new revisions. Child listings are the exception: other processes do
//! add children, so those are never cached.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use contrail_id::{Identifier, IdTree, LruIdTree};
use contrail_task_system::{pool, Conductor, Future, Operation};
use tokio::time::{sleep, Instant};
use tracing::instrument;

use crate::{
	codec,
	provider::{StorageProvider, StorageSession},
	Error, Item, Result,
};

/// How many deserialized objects a session keeps alive.
pub const OBJECT_CACHE_CAPACITY: usize = 1024;

/// How long a losing create-if-absent sleeps before its next attempt.
const CREATE_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Hooks invoked around storage events for the items that care. The session
/// is passed by reference on each call and outlives every item it returns;
/// hooks may schedule further work on it but must not block on work that the
/// scheduler orders after the task they run in.
#[async_trait]
pub trait Lifecycle: Send + Sync {
	/// Runs inside the WRITE/CREATE task, after the provider call completed.
	async fn on_insert(
		&self,
		_storage: &ObjectStorageSession,
		_path: &Identifier,
		_item: &Item,
	) -> Result<()> {
		Ok(())
	}

	/// Runs inside the READ task, after a successful deserialize.
	async fn on_load(
		&self,
		_storage: &ObjectStorageSession,
		_path: &Identifier,
		_item: &Item,
	) -> Result<()> {
		Ok(())
	}

	/// Runs inside the DELETE task, after the provider call completed. The
	/// item is the deleted value when it was still available.
	async fn on_delete(
		&self,
		_storage: &ObjectStorageSession,
		_path: &Identifier,
		_item: Option<&Item>,
	) -> Result<()> {
		Ok(())
	}
}

/// Factory for [`ObjectStorageSession`]s over one raw provider.
pub struct ObjectStorage {
	provider: Arc<dyn StorageProvider>,
}

impl ObjectStorage {
	#[must_use]
	pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
		Self { provider }
	}

	#[must_use]
	pub fn provider(&self) -> &Arc<dyn StorageProvider> {
		&self.provider
	}

	#[must_use]
	pub fn connect(&self) -> ObjectStorageSession {
		self.connect_inner(None)
	}

	/// Connects with a lifecycle observer that will be consulted for every
	/// item passing through the session.
	#[must_use]
	pub fn connect_with_lifecycle(&self, lifecycle: Arc<dyn Lifecycle>) -> ObjectStorageSession {
		self.connect_inner(Some(lifecycle))
	}

	fn connect_inner(&self, lifecycle: Option<Arc<dyn Lifecycle>>) -> ObjectStorageSession {
		ObjectStorageSession {
			inner: Arc::new(SessionInner {
				session: self.provider.connect(),
				cache: LruIdTree::new(OBJECT_CACHE_CAPACITY),
				conductor: Conductor::new(),
				lifecycle,
			}),
		}
	}
}

/// A client's connection to object storage. Cheap to clone; clones share the
/// cache and the scheduler. Safe to use from many tasks at once.
#[derive(Clone)]
pub struct ObjectStorageSession {
	inner: Arc<SessionInner>,
}

struct SessionInner {
	session: Arc<dyn StorageSession>,
	cache: LruIdTree<Item>,
	conductor: Conductor,
	lifecycle: Option<Arc<dyn Lifecycle>>,
}

impl ObjectStorageSession {
	/// Schedules a write of `item` at `path` and returns its future.
	/// Serialization starts immediately so the codec cost overlaps with any
	/// dependency wait.
	pub fn store(&self, path: &Identifier, item: Item) -> Future<(), Error> {
		let serialized = pool::spawn({
			let item = item.clone();
			async move { codec::serialize(&item) }
		});

		let this = self.clone();
		let path_owned = path.clone();
		self.inner.conductor.submit(Operation::Write, path, async move {
			let bytes = serialized.get().await.map_err(Error::from)?;
			this.inner.session.store(&path_owned, bytes).await?;
			this.inner.cache.store(&path_owned, item.clone());
			if let Some(lifecycle) = &this.inner.lifecycle {
				lifecycle.on_insert(&this, &path_owned, &item).await?;
			}
			Ok(())
		})
	}

	/// The item at `path`, from cache or storage, or `None` when absent.
	pub async fn fetch(&self, path: &Identifier) -> Result<Option<Item>> {
		let this = self.clone();
		let path_owned = path.clone();
		self.inner
			.conductor
			.submit(Operation::Read, path, async move {
				if let Some(item) = this.inner.cache.fetch(&path_owned) {
					return Ok(Some(item));
				}
				let Some(bytes) = this.inner.session.fetch(&path_owned).await? else {
					return Ok(None);
				};
				this.load_item(&path_owned, &bytes).await.map(Some)
			})
			.get()
			.await
			.map_err(Error::from)
	}

	/// Create-if-absent with the provider's semantics; on success the item
	/// also enters the cache and `on_insert` fires.
	///
	/// The wait is a retry loop around short scheduled attempts rather than
	/// one long task, so deletions of the path interleave with the waiting
	/// instead of queueing behind it.
	pub async fn create(&self, path: &Identifier, item: Item, wait: Duration) -> Result<bool> {
		let serialized = pool::spawn({
			let item = item.clone();
			async move { codec::serialize(&item) }
		});

		let deadline = Instant::now() + wait;
		loop {
			let this = self.clone();
			let path_owned = path.clone();
			let serialized = serialized.clone();
			let item = item.clone();
			let created = self
				.inner
				.conductor
				.submit(Operation::Create, path, async move {
					let bytes = serialized.get().await.map_err(Error::from)?;
					if !this
						.inner
						.session
						.create(&path_owned, bytes, Duration::ZERO)
						.await?
					{
						return Ok(false);
					}
					this.inner.cache.store(&path_owned, item.clone());
					if let Some(lifecycle) = &this.inner.lifecycle {
						lifecycle.on_insert(&this, &path_owned, &item).await?;
					}
					Ok(true)
				})
				.get()
				.await
				.map_err(Error::from)?;

			if created {
				return Ok(true);
			}
			if wait.is_zero() || Instant::now() >= deadline {
				return Ok(false);
			}
			sleep(CREATE_RETRY_INTERVAL).await;
		}
	}

	/// Schedules the removal of `path` and returns its future.
	pub fn delete(&self, path: &Identifier) -> Future<(), Error> {
		let this = self.clone();
		let path_owned = path.clone();
		self.inner.conductor.submit(Operation::Delete, path, async move {
			// Resolved directly against cache and provider: scheduling a
			// READ from inside the DELETE task would wait on the DELETE
			// itself.
			let existing = match this.inner.cache.fetch(&path_owned) {
				Some(item) => Some(item),
				None => match this.inner.session.fetch(&path_owned).await? {
					Some(bytes) => Some(codec::deserialize(&bytes)?),
					None => None,
				},
			};

			this.inner.cache.delete(&path_owned);
			this.inner.session.delete(&path_owned).await?;

			if let Some(lifecycle) = &this.inner.lifecycle {
				lifecycle
					.on_delete(&this, &path_owned, existing.as_ref())
					.await?;
			}
			Ok(())
		})
	}

	/// Deletes every path, in parallel, and waits for all of them.
	pub async fn delete_all(&self, paths: &[Identifier]) -> Result<()> {
		let futures = paths.iter().map(|path| self.delete(path)).collect::<Vec<_>>();
		pool::wait_all(&futures).await.map_err(Error::from)
	}

	/// Lists children and deletes them all.
	pub async fn delete_all_children(&self, path: &Identifier) -> Result<()> {
		let children = self.list_children(path).await?;
		self.delete_all(&children).await
	}

	/// Identifiers of the direct children of `path`. Never cached: sibling
	/// sets change across sessions.
	pub async fn list_children(&self, path: &Identifier) -> Result<Vec<Identifier>> {
		let this = self.clone();
		let path_owned = path.clone();
		self.inner
			.conductor
			.submit(Operation::List, path, async move {
				this.inner.session.list_children(&path_owned).await
			})
			.get()
			.await
			.map_err(Error::from)
	}

	/// Fetches every direct child of `path` in parallel and returns them as
	/// a tree. The fan-out futures are joined inside the owning LIST task.
	#[instrument(skip(self), err)]
	pub async fn fetch_children(&self, path: &Identifier) -> Result<IdTree<Item>> {
		let this = self.clone();
		let path_owned = path.clone();
		self.inner
			.conductor
			.submit(Operation::List, path, async move {
				let children = this.inner.session.list_children(&path_owned).await?;

				let fetches = children
					.into_iter()
					.map(|child| {
						let this = this.clone();
						pool::spawn(async move {
							if let Some(item) = this.inner.cache.fetch(&child) {
								return Ok(Some((child, item)));
							}
							let Some(bytes) = this.inner.session.fetch(&child).await? else {
								return Ok(None);
							};
							let item = this.load_item(&child, &bytes).await?;
							Ok(Some((child, item)))
						})
					})
					.collect::<Vec<_>>();

				let found = IdTree::new();
				for fetch in &fetches {
					if let Some((child, item)) = fetch.get().await.map_err(Error::from)? {
						found.store(&child, item);
					}
				}
				Ok(found)
			})
			.get()
			.await
			.map_err(Error::from)
	}

	/// Deserializes a fetched blob, installs it in the cache, and fires
	/// `on_load`.
	async fn load_item(&self, path: &Identifier, bytes: &[u8]) -> Result<Item> {
		let item = codec::deserialize(bytes)?;
		self.inner.cache.store(path, item.clone());
		if let Some(lifecycle) = &self.inner.lifecycle {
			lifecycle.on_load(self, path, &item).await?;
		}
		Ok(item)
	}

	/// Access to the raw session, for callers that need to bypass the cache
	/// and codec for a path.
	#[must_use]
	pub fn raw(&self) -> &Arc<dyn StorageSession> {
		&self.inner.session
	}

	/// Blocks until every scheduled task has completed, then flushes the
	/// provider. Errors of fire-and-forget stores surface through their own
	/// futures, not here.
	///
	/// Must not be called from inside one of this session's own tasks.
	pub async fn flush(&self) -> Result<()> {
		self.inner.conductor.join().await;
		self.inner.session.flush().await
	}

	/// Flushes, then releases the scheduler and the underlying session.
	pub async fn close(&self) -> Result<()> {
		self.flush().await?;
		self.inner.conductor.close().await;
		self.inner.session.close().await
	}
}
