//! The root folder anchoring one storage system: the revisions it knows
//! about, the tombstones of deleted revisions, the global commit log, and
//! the lock that serialises commits.

use std::collections::BTreeSet;

use contrail_id::Identifier;
use futures_concurrency::future::TryJoin;
use tracing::trace;

use super::{
	folder::{Folder, LockFolder},
	revision::{RevisionFolder, KIND_COMMIT_MARKER, PROP_FINAL_COMMIT_NUMBER},
};
use crate::{object::ObjectStorageSession, Error, Item, Result};

pub(crate) const KIND_ROOT: &str = "rootFolder";
const KIND_DELETED_REVISION: &str = "deletedRevision";

const CHILD_REVISIONS: &str = "revisions";
const CHILD_DELETIONS: &str = "deletions";
const CHILD_LOCKS: &str = "locks";
const CHILD_COMMITS: &str = "commits";

/// The root of a storage system. Children: `revisions/` with one folder per
/// revision, `deletions/` with a tombstone per revision being cleaned up,
/// `commits/` mapping revision numbers to final commit numbers, and `locks/`
/// for the commit lock.
#[derive(Debug, Clone)]
pub struct RootFolder {
	id: Identifier,
	revisions: Folder,
	deletions: Folder,
	commits: Folder,
	lock: LockFolder,
}

impl RootFolder {
	#[must_use]
	pub fn new(id: Identifier) -> Self {
		Self {
			revisions: Folder::new(id.child(CHILD_REVISIONS)),
			deletions: Folder::new(id.child(CHILD_DELETIONS)),
			commits: Folder::new(id.child(CHILD_COMMITS)),
			lock: LockFolder::new(id.child(CHILD_LOCKS)),
			id,
		}
	}

	#[must_use]
	pub fn id(&self) -> &Identifier {
		&self.id
	}

	#[must_use]
	pub fn item(&self) -> Item {
		Item::of_kind(&self.id, KIND_ROOT)
	}

	#[must_use]
	pub fn revisions_id(&self) -> &Identifier {
		self.revisions.id()
	}

	#[must_use]
	pub fn deletions_id(&self) -> &Identifier {
		self.deletions.id()
	}

	#[must_use]
	pub fn commits_id(&self) -> &Identifier {
		self.commits.id()
	}

	#[must_use]
	pub(crate) fn lock_folder(&self) -> &LockFolder {
		&self.lock
	}

	/// Every revision folder that is not tombstoned, newest revision number
	/// first.
	pub async fn revision_folders(
		&self,
		storage: &ObjectStorageSession,
	) -> Result<Vec<RevisionFolder>> {
		let tombstoned = storage
			.list_children(self.deletions.id())
			.await?
			.iter()
			.filter_map(|marker| marker.name().parse::<i64>().ok())
			.collect::<BTreeSet<_>>();

		let children = storage.fetch_children(self.revisions.id()).await?;
		let mut revisions = children
			.values()
			.iter()
			.filter_map(RevisionFolder::from_item)
			.filter(|revision| !tombstoned.contains(&revision.revision_number()))
			.collect::<Vec<_>>();

		revisions.sort_by_key(|revision| std::cmp::Reverse(revision.revision_number()));
		Ok(revisions)
	}

	pub async fn revision_folder(
		&self,
		storage: &ObjectStorageSession,
		revision_number: i64,
	) -> Result<Option<RevisionFolder>> {
		Ok(storage
			.fetch(&self.revisions.id().child(&format!("revision-{revision_number}")))
			.await?
			.as_ref()
			.and_then(RevisionFolder::from_item))
	}

	/// The highest revision number this store has ever handed out, counting
	/// folders still present, tombstones, and the commit log. Revision
	/// numbers must never be reused: stale data-plane versions of a
	/// reclaimed revision would otherwise be mistaken for a new session's
	/// own writes.
	pub(crate) async fn highest_known_revision_number(
		&self,
		storage: &ObjectStorageSession,
	) -> Result<i64> {
		let parse_names = |ids: Vec<Identifier>| {
			ids.iter()
				.filter_map(|id| {
					id.name()
						.strip_prefix("revision-")
						.unwrap_or(id.name())
						.parse::<i64>()
						.ok()
				})
				.max()
		};

		let folders = parse_names(storage.list_children(self.revisions.id()).await?);
		let tombstones = parse_names(storage.list_children(self.deletions.id()).await?);
		let commits = parse_names(storage.list_children(self.commits.id()).await?);

		Ok([folders, tombstones, commits]
			.into_iter()
			.flatten()
			.max()
			.unwrap_or(0))
	}

	/// The committed revision with the highest final commit number, if any.
	pub async fn last_committed_revision(
		&self,
		storage: &ObjectStorageSession,
	) -> Result<Option<(RevisionFolder, i64)>> {
		let revisions = self.revision_folders(storage).await?;
		let ranked = sort_by_descending_commit_number(storage, revisions).await?;
		Ok(ranked
			.into_iter()
			.find_map(|(revision, commit)| commit.map(|commit| (revision, commit))))
	}

	/// Takes the root lock for `process_id`; no revision can commit while it
	/// is held.
	pub async fn lock(&self, storage: &ObjectStorageSession, process_id: &str) -> Result<()> {
		if self.lock.lock(storage, process_id, true).await? {
			trace!(process_id, "root locked;");
			Ok(())
		} else {
			Err(Error::FolderLocked(self.lock.id().clone()))
		}
	}

	pub async fn unlock(&self, storage: &ObjectStorageSession, process_id: &str) -> Result<()> {
		self.lock.unlock(storage, process_id).await?;
		trace!(process_id, "root unlocked;");
		Ok(())
	}

	/// Writes the tombstone that hides `revision_number` from enumeration
	/// while its folder is torn down.
	pub async fn mark_revision_for_deletion(
		&self,
		storage: &ObjectStorageSession,
		revision_number: i64,
	) -> Result<()> {
		let marker_id = self.deletions.id().child(&revision_number.to_string());
		storage
			.store(&marker_id, Item::of_kind(&marker_id, KIND_DELETED_REVISION))
			.get()
			.await
			.map_err(Error::from)
	}

	pub async fn clear_deletion_mark(
		&self,
		storage: &ObjectStorageSession,
		revision_number: i64,
	) -> Result<()> {
		storage
			.delete(&self.deletions.id().child(&revision_number.to_string()))
			.get()
			.await
			.map_err(Error::from)
	}

	/// Records `revision_number → final_commit_number` in the commit log.
	/// Unlike commit markers, log entries survive revision cleanup, so reads
	/// can always rank the versions they find.
	pub async fn record_commit(
		&self,
		storage: &ObjectStorageSession,
		revision_number: i64,
		final_commit_number: i64,
	) -> Result<()> {
		let record_id = self.commits.id().child(&revision_number.to_string());
		let mut item = Item::of_kind(&record_id, KIND_COMMIT_MARKER);
		item.set_property(PROP_FINAL_COMMIT_NUMBER, final_commit_number);
		storage.store(&record_id, item).get().await.map_err(Error::from)
	}

	/// The final commit number of `revision_number`, or `None` while it is
	/// uncommitted.
	pub async fn commit_number_of(
		&self,
		storage: &ObjectStorageSession,
		revision_number: i64,
	) -> Result<Option<i64>> {
		Ok(storage
			.fetch(&self.commits.id().child(&revision_number.to_string()))
			.await?
			.and_then(|item| item.get_i64(PROP_FINAL_COMMIT_NUMBER)))
	}
}

/// Ranks revisions by final commit number, committed revisions first in
/// descending commit order, uncommitted ones last. Markers are fetched in
/// parallel.
pub(crate) async fn sort_by_descending_commit_number(
	storage: &ObjectStorageSession,
	revisions: Vec<RevisionFolder>,
) -> Result<Vec<(RevisionFolder, Option<i64>)>> {
	let commits = revisions
		.iter()
		.map(|revision| {
			let revision = revision.clone();
			let storage = storage.clone();
			async move { revision.final_commit_number(&storage).await }
		})
		.collect::<Vec<_>>()
		.try_join()
		.await?;

	let mut ranked = revisions.into_iter().zip(commits).collect::<Vec<_>>();
	ranked.sort_by_key(|(_, commit)| std::cmp::Reverse(*commit));
	Ok(ranked)
}
