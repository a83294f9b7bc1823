//! Per-revision metadata: the revision folder itself, its commit marker,
//! its change journal, and the session leases that keep it alive.

use std::{collections::BTreeSet, time::Duration};

use chrono::Utc;
use contrail_id::Identifier;
use contrail_task_system::Future;

use super::folder::{expiry_from_now, LockFolder, KIND_FOLDER, PROP_LEASE_EXPIRY};
use crate::{object::ObjectStorageSession, Error, Item, PropertyValue, Result};

pub(crate) const KIND_REVISION: &str = "revisionFolder";
pub(crate) const KIND_COMMIT_MARKER: &str = "commitMarker";
pub(crate) const KIND_JOURNAL: &str = "journal";
pub(crate) const KIND_LEASE: &str = "sessionLease";

const PROP_REVISION_NUMBER: &str = "revisionNumber";
const PROP_START_COMMIT_NUMBER: &str = "startCommitNumber";
pub(crate) const PROP_FINAL_COMMIT_NUMBER: &str = "finalCommitNumber";
const PROP_SESSION_ID: &str = "sessionId";
const PROP_WRITES: &str = "writes";
const PROP_DELETES: &str = "deletes";

const CHILD_SESSIONS: &str = "sessions";
const CHILD_LOCK: &str = "lock";
const CHILD_COMMIT_MARKER: &str = "commitMarker";
const CHILD_JOURNAL: &str = "journal";

/// Witness that a revision is committed, carrying its position in the
/// global commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitMarker {
	pub final_commit_number: i64,
}

impl CommitMarker {
	#[must_use]
	pub fn item(&self, id: &Identifier) -> Item {
		let mut item = Item::of_kind(id, KIND_COMMIT_MARKER);
		item.set_property(PROP_FINAL_COMMIT_NUMBER, self.final_commit_number);
		item
	}

	#[must_use]
	pub fn from_item(item: &Item) -> Option<Self> {
		(item.kind() == Some(KIND_COMMIT_MARKER)).then(|| {
			Some(Self {
				final_commit_number: item.get_i64(PROP_FINAL_COMMIT_NUMBER)?,
			})
		})?
	}
}

/// The change set of one revision: which identifiers it wrote and which it
/// deleted. Enough to decide whether two revisions can both commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionJournal {
	pub revision_number: i64,
	pub writes: BTreeSet<Identifier>,
	pub deletes: BTreeSet<Identifier>,
}

impl RevisionJournal {
	#[must_use]
	pub fn new(revision_number: i64) -> Self {
		Self {
			revision_number,
			..Self::default()
		}
	}

	/// Two journals conflict when the write or delete set of one touches an
	/// identifier in the write or delete set of the other.
	#[must_use]
	pub fn conflicts_with(&self, other: &Self) -> bool {
		self.writes
			.iter()
			.chain(self.deletes.iter())
			.any(|id| other.writes.contains(id) || other.deletes.contains(id))
	}

	#[must_use]
	pub fn item(&self, id: &Identifier) -> Item {
		let ids_to_seq = |ids: &BTreeSet<Identifier>| {
			ids.iter()
				.cloned()
				.map(PropertyValue::Id)
				.collect::<Vec<_>>()
		};

		let mut item = Item::of_kind(id, KIND_JOURNAL);
		item.set_property(PROP_REVISION_NUMBER, self.revision_number);
		item.set_property(PROP_WRITES, ids_to_seq(&self.writes));
		item.set_property(PROP_DELETES, ids_to_seq(&self.deletes));
		item
	}

	#[must_use]
	pub fn from_item(item: &Item) -> Option<Self> {
		if item.kind() != Some(KIND_JOURNAL) {
			return None;
		}

		let seq_to_ids = |seq: &[PropertyValue]| {
			seq.iter()
				.filter_map(|value| match value {
					PropertyValue::Id(id) => Some(id.clone()),
					_ => None,
				})
				.collect::<BTreeSet<_>>()
		};

		Some(Self {
			revision_number: item.get_i64(PROP_REVISION_NUMBER)?,
			writes: seq_to_ids(item.get_seq(PROP_WRITES)?),
			deletes: seq_to_ids(item.get_seq(PROP_DELETES)?),
		})
	}
}

/// The folder holding everything known about one revision: session leases
/// under `sessions/`, a lock folder, a commit marker once committed, and the
/// journal.
#[derive(Debug, Clone)]
pub struct RevisionFolder {
	id: Identifier,
	revision_number: i64,
	start_commit_number: i64,
}

impl RevisionFolder {
	#[must_use]
	pub fn new(
		revisions_folder: &Identifier,
		revision_number: i64,
		start_commit_number: i64,
	) -> Self {
		Self {
			id: revisions_folder.child(&format!("revision-{revision_number}")),
			revision_number,
			start_commit_number,
		}
	}

	#[must_use]
	pub fn from_item(item: &Item) -> Option<Self> {
		(item.kind() == Some(KIND_REVISION)).then(|| {
			Some(Self {
				id: item.id()?.clone(),
				revision_number: item.get_i64(PROP_REVISION_NUMBER)?,
				start_commit_number: item.get_i64(PROP_START_COMMIT_NUMBER)?,
			})
		})?
	}

	#[must_use]
	pub fn item(&self) -> Item {
		let mut item = Item::of_kind(&self.id, KIND_REVISION);
		item.set_property(PROP_REVISION_NUMBER, self.revision_number);
		item.set_property(PROP_START_COMMIT_NUMBER, self.start_commit_number);
		item
	}

	#[must_use]
	pub fn id(&self) -> &Identifier {
		&self.id
	}

	#[must_use]
	pub const fn revision_number(&self) -> i64 {
		self.revision_number
	}

	/// The last committed revision visible to the writer when this revision
	/// was created.
	#[must_use]
	pub const fn start_commit_number(&self) -> i64 {
		self.start_commit_number
	}

	#[must_use]
	pub fn sessions_id(&self) -> Identifier {
		self.id.child(CHILD_SESSIONS)
	}

	#[must_use]
	pub fn lock_folder(&self) -> LockFolder {
		LockFolder::new(self.id.child(CHILD_LOCK))
	}

	#[must_use]
	pub fn marker_id(&self) -> Identifier {
		self.id.child(CHILD_COMMIT_MARKER)
	}

	#[must_use]
	pub fn journal_id(&self) -> Identifier {
		self.id.child(CHILD_JOURNAL)
	}

	pub async fn commit_marker(
		&self,
		storage: &ObjectStorageSession,
	) -> Result<Option<CommitMarker>> {
		Ok(storage
			.fetch(&self.marker_id())
			.await?
			.as_ref()
			.and_then(CommitMarker::from_item))
	}

	/// A revision is committed iff its commit marker exists.
	pub async fn is_committed(&self, storage: &ObjectStorageSession) -> Result<bool> {
		Ok(self.commit_marker(storage).await?.is_some())
	}

	pub async fn final_commit_number(
		&self,
		storage: &ObjectStorageSession,
	) -> Result<Option<i64>> {
		Ok(self
			.commit_marker(storage)
			.await?
			.map(|marker| marker.final_commit_number))
	}

	pub async fn journal(&self, storage: &ObjectStorageSession) -> Result<Option<RevisionJournal>> {
		Ok(storage
			.fetch(&self.journal_id())
			.await?
			.as_ref()
			.and_then(RevisionJournal::from_item))
	}

	/// Registers a session lease, inhibiting cleanup of this revision until
	/// the lease is removed or expires.
	pub async fn add_session(
		&self,
		storage: &ObjectStorageSession,
		session_id: &str,
		lease: Duration,
	) -> Result<()> {
		let lease_id = self.sessions_id().child(session_id);
		let mut item = Item::of_kind(&lease_id, KIND_LEASE);
		item.set_property(PROP_SESSION_ID, session_id);
		item.set_property(PROP_LEASE_EXPIRY, expiry_from_now(lease)?);

		storage.store(&lease_id, item).get().await.map_err(Error::from)
	}

	pub async fn remove_session(
		&self,
		storage: &ObjectStorageSession,
		session_id: &str,
	) -> Result<()> {
		storage
			.delete(&self.sessions_id().child(session_id))
			.get()
			.await
			.map_err(Error::from)
	}

	/// True while any session holds an unexpired lease on this revision.
	pub async fn has_live_sessions(&self, storage: &ObjectStorageSession) -> Result<bool> {
		let leases = storage.fetch_children(&self.sessions_id()).await?;
		let now = Utc::now();
		Ok(leases.values().iter().any(|lease| {
			lease.kind() == Some(KIND_LEASE)
				&& lease
					.get_timestamp(PROP_LEASE_EXPIRY)
					.is_some_and(|expiry| expiry > now)
		}))
	}

	/// Schedules the removal of this revision's child entities; used when
	/// the folder itself is being deleted so the cache does not keep serving
	/// them.
	pub(crate) fn delete_children(&self, storage: &ObjectStorageSession) -> Vec<Future<(), Error>> {
		vec![
			storage.delete(&self.marker_id()),
			storage.delete(&self.journal_id()),
			storage.delete(&self.sessions_id()),
			storage.delete(self.lock_folder().id()),
		]
	}
}

/// Stores the sessions and lock child folders a fresh revision folder
/// needs; fired from the lifecycle hook when the folder item is inserted.
pub(crate) fn materialize_children(revision: &RevisionFolder, storage: &ObjectStorageSession) {
	let sessions_id = revision.sessions_id();
	let _ = storage.store(&sessions_id, Item::of_kind(&sessions_id, KIND_FOLDER));
	let lock = revision.lock_folder();
	let _ = storage.store(lock.id(), lock.item());
}
