//! Folder entities and the advisory lock built on create-if-absent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use contrail_id::Identifier;
use tracing::{debug, warn};

use crate::{object::ObjectStorageSession, Error, Item, Result, SESSION_MAX_ACTIVE};

pub(crate) const KIND_FOLDER: &str = "folder";
pub(crate) const KIND_LOCK: &str = "lock";

pub(crate) const PROP_PROCESS_ID: &str = "processId";
pub(crate) const PROP_LEASE_EXPIRY: &str = "leaseExpiry";

/// A grouping entity: an identifier whose children are the grouped objects.
#[derive(Debug, Clone)]
pub struct Folder {
	id: Identifier,
}

impl Folder {
	#[must_use]
	pub fn new(id: Identifier) -> Self {
		Self { id }
	}

	#[must_use]
	pub fn id(&self) -> &Identifier {
		&self.id
	}

	#[must_use]
	pub fn item(&self) -> Item {
		Item::of_kind(&self.id, KIND_FOLDER)
	}
}

/// A folder owned by whichever process managed to create its `lock` child.
///
/// The atomic create-if-absent of the storage provider is the consensus
/// step: many anonymous processes can decide among themselves who holds the
/// folder. Lock records carry a lease expiry so a crashed holder does not
/// wedge the system forever.
#[derive(Debug, Clone)]
pub struct LockFolder {
	folder: Folder,
}

impl LockFolder {
	#[must_use]
	pub fn new(id: Identifier) -> Self {
		Self {
			folder: Folder::new(id),
		}
	}

	#[must_use]
	pub fn id(&self) -> &Identifier {
		self.folder.id()
	}

	#[must_use]
	pub fn item(&self) -> Item {
		self.folder.item()
	}

	fn lock_id(&self) -> Identifier {
		self.id().child(KIND_LOCK)
	}

	/// Tries to take the lock for `process_id`. With `wait_for_next`, waits
	/// out the current holder's lease and then breaks it once; failing even
	/// then raises [`Error::FolderLocked`].
	pub async fn lock(
		&self,
		storage: &ObjectStorageSession,
		process_id: &str,
		wait_for_next: bool,
	) -> Result<bool> {
		self.lock_with_lease(storage, process_id, wait_for_next, SESSION_MAX_ACTIVE)
			.await
	}

	/// [`Self::lock`] with an explicit lease duration.
	pub async fn lock_with_lease(
		&self,
		storage: &ObjectStorageSession,
		process_id: &str,
		wait_for_next: bool,
		lease: Duration,
	) -> Result<bool> {
		let lock_id = self.lock_id();
		let wait = if wait_for_next { lease } else { Duration::ZERO };

		if storage
			.create(&lock_id, lock_record(&lock_id, process_id, lease)?, wait)
			.await?
		{
			debug!(folder = %self.id(), process_id, "folder locked;");
			return Ok(true);
		}

		if wait_for_next {
			// We waited a full lease: whoever holds the lock has expired.
			warn!(folder = %self.id(), process_id, "breaking expired lock;");
			storage.delete(&lock_id).get().await.map_err(Error::from)?;

			if storage
				.create(&lock_id, lock_record(&lock_id, process_id, lease)?, wait)
				.await?
			{
				debug!(folder = %self.id(), process_id, "folder locked after break;");
				return Ok(true);
			}
			return Err(Error::FolderLocked(self.id().clone()));
		}

		Ok(false)
	}

	/// Releases the lock, verifying `process_id` actually holds it.
	pub async fn unlock(&self, storage: &ObjectStorageSession, process_id: &str) -> Result<()> {
		let lock_id = self.lock_id();

		let holder = storage.fetch(&lock_id).await?;
		let owned = holder
			.as_ref()
			.and_then(|item| item.get_string(PROP_PROCESS_ID))
			== Some(process_id);
		if !owned {
			return Err(Error::Internal(format!(
				"process {process_id} tried to unlock a folder it does not own: {}",
				self.id()
			)));
		}

		storage.delete(&lock_id).get().await.map_err(Error::from)?;
		storage.flush().await?;
		debug!(folder = %self.id(), process_id, "folder unlocked;");
		Ok(())
	}
}

fn lock_record(lock_id: &Identifier, process_id: &str, lease: Duration) -> Result<Item> {
	let mut item = Item::of_kind(lock_id, KIND_LOCK);
	item.set_property(PROP_PROCESS_ID, process_id);
	item.set_property(PROP_LEASE_EXPIRY, expiry_from_now(lease)?);
	Ok(item)
}

/// A timestamp `lease` from now.
pub(crate) fn expiry_from_now(lease: Duration) -> Result<DateTime<Utc>> {
	chrono::Duration::from_std(lease)
		.map(|lease| Utc::now() + lease)
		.map_err(|e| Error::Internal(format!("lease duration out of range: {e}")))
}
