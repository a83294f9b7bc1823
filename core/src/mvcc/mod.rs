//! Multiversion concurrency control over the object layer.
//!
//! A process opens an [`MvccStorage`] against a root identifier and begins
//! sessions. A read-write session is bound to a fresh revision; nothing it
//! writes is visible to others until [`MvccSession::commit`] succeeds.
//! Commits are optimistic: validation compares the session's change journal
//! against every revision committed since the session started, and a
//! [`Error::ConflictingCommit`] tells the caller to reopen and retry.
//!
//! A file-based consensus protocol (the root [`LockFolder`]) lets many
//! processes share one store; the only primitive it needs from the provider
//! is atomic create-if-absent.

use std::{
	collections::{BTreeSet, HashMap},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex, MutexGuard,
	},
};

use async_trait::async_trait;
use contrail_id::Identifier;
use contrail_task_system::{pool, Future, TaskPool};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
	object::{Lifecycle, ObjectStorage, ObjectStorageSession},
	provider::StorageProvider,
	Error, Item, Result, SESSION_MAX_ACTIVE,
};

pub mod folder;
pub mod revision;
pub mod root;

pub use folder::{Folder, LockFolder};
pub use revision::{CommitMarker, RevisionFolder, RevisionJournal};
pub use root::RootFolder;

use folder::KIND_FOLDER;
use revision::{materialize_children, KIND_REVISION};
use root::{sort_by_descending_commit_number, KIND_ROOT};

/// Default root identifier for a storage system.
pub const DEFAULT_ROOT_PATH: &str = "contrail/storage/rootFolder";

/// Reserved child name holding the version history of a stored object.
const VERSIONS_DIR: &str = "__versions__";

/// Kind of the version entity that records a deletion.
const KIND_TOMBSTONE: &str = "tombstone";

const CHILD_DATA: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	ReadOnly,
	ReadWrite,
}

/// A versioned, transactional object store. Cheap to clone; clones share
/// the store.
#[derive(Clone)]
pub struct MvccStorage {
	inner: Arc<StorageInner>,
}

struct StorageInner {
	session: ObjectStorageSession,
	root: RootFolder,
	data_id: Identifier,
	state: Mutex<SharedState>,
	cleanups: TaskPool<Error>,
}

struct SharedState {
	/// Sessions opened through this storage and not yet closed, so
	/// [`MvccStorage::close`] can release leases the application forgot.
	active: HashMap<String, ActiveSession>,
	/// Revisions at or below this number are known cleaned up, and
	/// therefore committed; lets [`MvccStorage::is_revision_committed`]
	/// skip a boatload of lookups.
	last_known_deleted_revision: i64,
	known_uncommitted: BTreeSet<i64>,
}

struct ActiveSession {
	revision_number: i64,
	start_revision_number: Option<i64>,
}

/// Lifecycle observer wiring folder bootstrap into the object layer: when a
/// root or revision folder item lands, its child structure is scheduled
/// right behind it, inside the same dependency order.
struct MvccLifecycle;

#[async_trait]
impl Lifecycle for MvccLifecycle {
	async fn on_insert(
		&self,
		storage: &ObjectStorageSession,
		path: &Identifier,
		item: &Item,
	) -> Result<()> {
		match item.kind() {
			Some(KIND_ROOT) => {
				let root = RootFolder::new(path.clone());
				for folder_id in [
					root.revisions_id(),
					root.deletions_id(),
					root.commits_id(),
				] {
					let _ = storage.store(folder_id, Item::of_kind(folder_id, KIND_FOLDER));
				}
				let _ = storage.store(
					root.lock_folder().id(),
					root.lock_folder().item(),
				);

				// Seed revision 0 as committed so a committed revision
				// always exists.
				let genesis = RevisionFolder::new(root.revisions_id(), 0, 0);
				let _ = storage.store(genesis.id(), genesis.item());
				let _ = storage.store(
					&genesis.marker_id(),
					CommitMarker {
						final_commit_number: 0,
					}
					.item(&genesis.marker_id()),
				);
				let _ = storage.store(
					&genesis.journal_id(),
					RevisionJournal::new(0).item(&genesis.journal_id()),
				);

				let record_id = root.commits_id().child("0");
				let mut record = Item::of_kind(&record_id, revision::KIND_COMMIT_MARKER);
				record.set_property(revision::PROP_FINAL_COMMIT_NUMBER, 0_i64);
				let _ = storage.store(&record_id, record);
			}
			Some(KIND_REVISION) => {
				if let Some(revision) = RevisionFolder::from_item(item) {
					materialize_children(&revision, storage);
				}
			}
			_ => {}
		}
		Ok(())
	}

	async fn on_delete(
		&self,
		storage: &ObjectStorageSession,
		_path: &Identifier,
		item: Option<&Item>,
	) -> Result<()> {
		// Deleting a revision folder takes its subtree with it on disk;
		// the child entities are deleted through the session as well so the
		// cache stops serving them.
		if let Some(revision) = item
			.filter(|item| item.kind() == Some(KIND_REVISION))
			.and_then(RevisionFolder::from_item)
		{
			drop(revision.delete_children(storage));
		}
		Ok(())
	}
}

impl MvccStorage {
	/// Opens the store anchored at `root_id`, bootstrapping it on first use
	/// with revision 0 already committed.
	pub async fn open(provider: Arc<dyn StorageProvider>, root_id: &Identifier) -> Result<Self> {
		let object = ObjectStorage::new(provider);
		let session = object.connect_with_lifecycle(Arc::new(MvccLifecycle));
		let root = RootFolder::new(root_id.clone());

		if session.fetch(root_id).await?.is_none() {
			info!(root = %root_id, "initializing storage root;");
			session
				.store(root_id, root.item())
				.get()
				.await
				.map_err(Error::from)?;
			session.flush().await?;
		}

		Ok(Self {
			inner: Arc::new(StorageInner {
				session,
				data_id: root_id.child(CHILD_DATA),
				root,
				state: Mutex::new(SharedState {
					active: HashMap::new(),
					last_known_deleted_revision: -1,
					known_uncommitted: BTreeSet::new(),
				}),
				cleanups: TaskPool::new(),
			}),
		})
	}

	/// The object session backing this store.
	#[must_use]
	pub fn object_session(&self) -> &ObjectStorageSession {
		&self.inner.session
	}

	fn state(&self) -> MutexGuard<'_, SharedState> {
		self.inner.state.lock().expect("storage state mutex poisoned")
	}

	/// Begins a session against the head of the store. A read-write session
	/// is bound to a fresh revision; a read-only session to the last
	/// committed one.
	#[instrument(skip(self), err)]
	pub async fn open_session(&self, mode: Mode) -> Result<MvccSession> {
		let session_id = new_session_id();
		let storage = &self.inner.session;

		self.inner.root.lock(storage, &session_id).await?;
		let opened = self.open_session_locked(mode, &session_id).await;
		let unlocked = self.inner.root.unlock(storage, &session_id).await;

		let session = opened?;
		unlocked?;
		storage.flush().await?;

		self.register(&session);
		info!(
			%session_id,
			?mode,
			revision = session.revision_number,
			"session opened;"
		);
		Ok(session)
	}

	async fn open_session_locked(&self, mode: Mode, session_id: &str) -> Result<MvccSession> {
		let storage = &self.inner.session;
		let root = &self.inner.root;

		let Some((start_revision, start_commit)) =
			root.last_committed_revision(storage).await?
		else {
			return Err(corrupt_no_committed_revisions());
		};

		match mode {
			Mode::ReadOnly => {
				start_revision
					.add_session(storage, session_id, SESSION_MAX_ACTIVE)
					.await?;
				Ok(self.session(
					session_id,
					mode,
					start_revision,
					None,
					-1,
					start_commit,
				))
			}
			Mode::ReadWrite => {
				let last_revision_number =
					root.highest_known_revision_number(storage).await?;

				let revision = RevisionFolder::new(
					root.revisions_id(),
					last_revision_number + 1,
					start_commit,
				);
				storage
					.store(revision.id(), revision.item())
					.get()
					.await
					.map_err(Error::from)?;

				// Lease both: the new revision to claim it, the start
				// revision so cleanup cannot take the base out from under
				// this session.
				revision
					.add_session(storage, session_id, SESSION_MAX_ACTIVE)
					.await?;
				start_revision
					.add_session(storage, session_id, SESSION_MAX_ACTIVE)
					.await?;

				self.state()
					.known_uncommitted
					.insert(revision.revision_number());

				Ok(self.session(
					session_id,
					mode,
					revision,
					Some(start_revision),
					start_commit,
					start_commit,
				))
			}
		}
	}

	/// Begins a read-only session against a specific committed revision.
	#[instrument(skip(self), err)]
	pub async fn open_session_at(&self, revision_number: i64) -> Result<MvccSession> {
		let session_id = new_session_id();
		let storage = &self.inner.session;

		let Some(revision) = self
			.inner
			.root
			.revision_folder(storage, revision_number)
			.await?
		else {
			return Err(Error::RevisionNotFound(revision_number));
		};
		// An uncommitted revision stays locked until committed, so it can
		// never be opened for reading.
		let Some(commit) = revision.final_commit_number(storage).await? else {
			return Err(Error::RevisionNotFound(revision_number));
		};

		let lock = revision.lock_folder();
		if !lock.lock(storage, &session_id, true).await? {
			return Err(Error::FolderLocked(lock.id().clone()));
		}
		let leased = revision
			.add_session(storage, &session_id, SESSION_MAX_ACTIVE)
			.await;
		let unlocked = lock.unlock(storage, &session_id).await;
		leased?;
		unlocked?;
		storage.flush().await?;

		let session = self.session(
			&session_id,
			Mode::ReadOnly,
			revision,
			None,
			-1,
			commit,
		);
		self.register(&session);
		info!(%session_id, revision_number, "session opened at revision;");
		Ok(session)
	}

	#[allow(clippy::too_many_arguments)]
	fn session(
		&self,
		session_id: &str,
		mode: Mode,
		revision: RevisionFolder,
		start_revision: Option<RevisionFolder>,
		start_commit_number: i64,
		visible_commit_number: i64,
	) -> MvccSession {
		MvccSession {
			inner: Arc::clone(&self.inner),
			session_id: session_id.to_string(),
			mode,
			revision_number: revision.revision_number(),
			revision,
			start_revision,
			start_commit_number,
			visible_commit_number,
			draft: Mutex::new(Draft::default()),
		}
	}

	fn register(&self, session: &MvccSession) {
		self.state().active.insert(
			session.session_id.clone(),
			ActiveSession {
				revision_number: session.revision_number,
				start_revision_number: session
					.start_revision
					.as_ref()
					.map(RevisionFolder::revision_number),
			},
		);
	}

	/// Whether `revision_number` is committed. A revision whose folder has
	/// already been cleaned up counts as committed; the answer is remembered
	/// as a watermark so older revisions short-circuit.
	pub async fn is_revision_committed(&self, revision_number: i64) -> Result<bool> {
		{
			let state = self.state();
			if revision_number <= state.last_known_deleted_revision {
				return Ok(true);
			}
			if state.known_uncommitted.contains(&revision_number) {
				return Ok(false);
			}
		}

		match self
			.inner
			.root
			.revision_folder(&self.inner.session, revision_number)
			.await?
		{
			Some(folder) => folder.is_committed(&self.inner.session).await,
			None => {
				// Cleaned up. A revision cannot be cleaned before every
				// older one was, so everything below it is settled too.
				let mut state = self.state();
				state.last_known_deleted_revision =
					state.last_known_deleted_revision.max(revision_number);
				state
					.known_uncommitted
					.retain(|n| *n > revision_number);
				Ok(true)
			}
		}
	}

	/// Revision numbers currently present under the root.
	pub async fn available_revisions(&self) -> Result<Vec<i64>> {
		Ok(self
			.inner
			.root
			.revision_folders(&self.inner.session)
			.await?
			.iter()
			.map(RevisionFolder::revision_number)
			.collect())
	}

	/// Removes revisions nothing can see anymore: committed ones older than
	/// the last commit, and abandoned uncommitted ones, as long as no live
	/// lease holds them.
	pub async fn cleanup(&self) -> Result<()> {
		run_cleanup(&self.inner).await
	}

	/// Releases leases of sessions the application never closed, waits for
	/// background cleanup, and closes the underlying object session.
	pub async fn close(&self) -> Result<()> {
		let abandoned = {
			let mut state = self.state();
			state.active.drain().collect::<Vec<_>>()
		};

		for (session_id, active) in abandoned {
			warn!(%session_id, "closing session left open by the application;");
			let revision = RevisionFolder::new(
				self.inner.root.revisions_id(),
				active.revision_number,
				0,
			);
			if let Err(e) = revision
				.remove_session(&self.inner.session, &session_id)
				.await
			{
				warn!(?e, %session_id, "failed to release revision lease;");
			}
			if let Some(start_number) = active.start_revision_number {
				let start = RevisionFolder::new(
					self.inner.root.revisions_id(),
					start_number,
					0,
				);
				if let Err(e) = start
					.remove_session(&self.inner.session, &session_id)
					.await
				{
					warn!(?e, %session_id, "failed to release base revision lease;");
				}
			}
		}

		self.inner.cleanups.wait().await.map_err(Error::from)?;
		self.inner.session.close().await
	}
}

#[derive(Default)]
struct Draft {
	writes: BTreeSet<Identifier>,
	deletes: BTreeSet<Identifier>,
	/// Futures of the version writes staged so far; settled before the
	/// journal is written at commit.
	pending: Vec<Future<(), Error>>,
}

/// One transaction against an [`MvccStorage`].
///
/// Reads resolve against the revisions committed when the session began;
/// writes stage new versions visible only to this session until commit.
pub struct MvccSession {
	inner: Arc<StorageInner>,
	session_id: String,
	mode: Mode,
	revision: RevisionFolder,
	start_revision: Option<RevisionFolder>,
	revision_number: i64,
	start_commit_number: i64,
	/// Reads see versions from revisions with a final commit number at or
	/// below this bound.
	visible_commit_number: i64,
	draft: Mutex<Draft>,
}

impl MvccSession {
	#[must_use]
	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	#[must_use]
	pub const fn mode(&self) -> Mode {
		self.mode
	}

	#[must_use]
	pub const fn revision_number(&self) -> i64 {
		self.revision_number
	}

	#[must_use]
	pub const fn start_commit_number(&self) -> i64 {
		self.start_commit_number
	}

	fn draft(&self) -> MutexGuard<'_, Draft> {
		self.draft.lock().expect("session draft mutex poisoned")
	}

	fn ensure_writable(&self) -> Result<()> {
		if self.mode == Mode::ReadWrite {
			Ok(())
		} else {
			Err(Error::Internal(format!(
				"session {} is read-only",
				self.session_id
			)))
		}
	}

	/// Identifier of `path`'s slot in the data plane.
	fn data_id(&self, path: &Identifier) -> Identifier {
		if path.path().is_empty() {
			self.inner.data_id.clone()
		} else {
			Identifier::new(format!("{}/{}", self.inner.data_id.path(), path.path()))
		}
	}

	fn version_dir(&self, path: &Identifier) -> Identifier {
		self.data_id(path).child(VERSIONS_DIR)
	}

	fn version_id(&self, path: &Identifier, revision_number: i64) -> Identifier {
		self.version_dir(path).child(&revision_number.to_string())
	}

	/// Stages `item` at `path` in this session's revision.
	pub fn store(&self, path: &Identifier, item: Item) -> Result<()> {
		self.ensure_writable()?;

		let version = self.version_id(path, self.revision_number);
		let pending = self.inner.session.store(&version, item);

		let mut draft = self.draft();
		draft.writes.insert(path.clone());
		draft.deletes.remove(path);
		draft.pending.push(pending);
		Ok(())
	}

	/// Stages the deletion of `path` in this session's revision.
	pub fn delete(&self, path: &Identifier) -> Result<()> {
		self.ensure_writable()?;

		let version = self.version_id(path, self.revision_number);
		let pending = self
			.inner
			.session
			.store(&version, Item::of_kind(&version, KIND_TOMBSTONE));

		let mut draft = self.draft();
		draft.deletes.insert(path.clone());
		draft.writes.remove(path);
		draft.pending.push(pending);
		Ok(())
	}

	/// The item at `path` as this session sees it: its own staged version
	/// first, then the newest version committed within its visibility
	/// bound.
	pub async fn fetch(&self, path: &Identifier) -> Result<Option<Item>> {
		if self.mode == Mode::ReadWrite {
			if let Some(item) = self
				.inner
				.session
				.fetch(&self.version_id(path, self.revision_number))
				.await?
			{
				return Ok(filter_tombstone(item));
			}
		}
		self.resolve_committed(path).await
	}

	async fn resolve_committed(&self, path: &Identifier) -> Result<Option<Item>> {
		let versions = self
			.inner
			.session
			.list_children(&self.version_dir(path))
			.await?;

		let mut best: Option<(i64, Identifier)> = None;
		for version in versions {
			let Ok(revision_number) = version.name().parse::<i64>() else {
				continue;
			};
			let Some(commit) = self
				.inner
				.root
				.commit_number_of(&self.inner.session, revision_number)
				.await?
			else {
				continue;
			};
			if commit <= self.visible_commit_number
				&& best.as_ref().map_or(true, |(at, _)| *at < commit)
			{
				best = Some((commit, version));
			}
		}

		let Some((_, version)) = best else {
			return Ok(None);
		};
		let Some(item) = self.inner.session.fetch(&version).await? else {
			return Ok(None);
		};
		Ok(filter_tombstone(item))
	}

	/// Children of `path` visible to this session.
	pub async fn list_children(&self, path: &Identifier) -> Result<Vec<Identifier>> {
		let entries = self
			.inner
			.session
			.list_children(&self.data_id(path))
			.await?;

		let mut children = Vec::new();
		for entry in entries {
			if entry.name() == VERSIONS_DIR {
				continue;
			}
			let child = if path.path().is_empty() {
				Identifier::new(entry.name())
			} else {
				path.child(entry.name())
			};
			if self.fetch(&child).await?.is_some() {
				children.push(child);
			}
		}
		Ok(children)
	}

	/// Publishes this session's changes as a new committed revision.
	///
	/// Fails with [`Error::ConflictingCommit`] when any revision committed
	/// after this session began touched an overlapping identifier; the
	/// caller should open a new session and retry the transaction.
	#[instrument(
		skip(self),
		fields(session_id = %self.session_id, revision = self.revision_number),
		err
	)]
	pub async fn commit(self) -> Result<()> {
		self.ensure_writable()?;
		let storage = &self.inner.session;
		let root = &self.inner.root;

		// Settle staged version writes, then persist the journal.
		let (journal, pending) = {
			let mut draft = self.draft();
			let journal = RevisionJournal {
				revision_number: self.revision_number,
				writes: draft.writes.clone(),
				deletes: draft.deletes.clone(),
			};
			(journal, std::mem::take(&mut draft.pending))
		};
		pool::wait_all(&pending).await.map_err(Error::from)?;
		storage
			.store(&self.revision.journal_id(), journal.item(&self.revision.journal_id()))
			.get()
			.await
			.map_err(Error::from)?;

		// No other revision may commit while the root is held.
		root.lock(storage, &self.session_id).await?;
		let outcome = self.validate_and_mark(&journal).await;
		let unlocked = root.unlock(storage, &self.session_id).await;

		{
			let mut state = self.inner.state.lock().expect("storage state mutex poisoned");
			state.active.remove(&self.session_id);
			if outcome.is_ok() {
				state.known_uncommitted.remove(&self.revision_number);
			}
		}

		// A failed commit still ends the session; without its leases the
		// abandoned revision is reclaimable.
		if outcome.is_err() {
			if let Err(e) = self.revision.remove_session(storage, &self.session_id).await {
				warn!(?e, "failed to release revision lease after failed commit;");
			}
			if let Some(start) = &self.start_revision {
				if let Err(e) = start.remove_session(storage, &self.session_id).await {
					warn!(?e, "failed to release base lease after failed commit;");
				}
			}
		}

		spawn_cleanup(&self.inner);

		outcome?;
		unlocked?;
		info!("session committed;");
		Ok(())
	}

	async fn validate_and_mark(&self, journal: &RevisionJournal) -> Result<()> {
		let storage = &self.inner.session;
		let root = &self.inner.root;

		let revisions = root.revision_folders(storage).await?;
		let ranked = sort_by_descending_commit_number(storage, revisions).await?;

		let Some(last_commit) = ranked.iter().find_map(|(_, commit)| *commit) else {
			return Err(corrupt_no_committed_revisions());
		};

		// Validate against every revision committed since this session
		// began, in parallel, bailing out on the first conflict found.
		let conflicted = Arc::new(AtomicBool::new(false));
		let journal = Arc::new(journal.clone());
		let checks = TaskPool::new();
		for (other, commit) in &ranked {
			let Some(commit) = *commit else { continue };
			if commit <= self.start_commit_number {
				continue;
			}

			let other = other.clone();
			let storage = storage.clone();
			let journal = Arc::clone(&journal);
			let conflicted = Arc::clone(&conflicted);
			checks.go(async move {
				if conflicted.load(Ordering::Acquire) {
					return Ok(());
				}
				if let Some(theirs) = other.journal(&storage).await? {
					if theirs.conflicts_with(&journal) {
						debug!(
							against = other.revision_number(),
							"commit validation found a conflict;"
						);
						conflicted.store(true, Ordering::Release);
					}
				}
				Ok(())
			});
		}
		checks.wait().await.map_err(Error::from)?;

		if conflicted.load(Ordering::Acquire) {
			warn!("conflicting commit;");
			return Err(Error::ConflictingCommit);
		}

		let final_commit_number = last_commit + 1;
		storage
			.store(
				&self.revision.marker_id(),
				CommitMarker {
					final_commit_number,
				}
				.item(&self.revision.marker_id()),
			)
			.get()
			.await
			.map_err(Error::from)?;
		root.record_commit(storage, self.revision_number, final_commit_number)
			.await?;

		self.revision.remove_session(storage, &self.session_id).await?;
		if let Some(start) = &self.start_revision {
			start.remove_session(storage, &self.session_id).await?;
		}

		storage.flush().await
	}

	/// Ends the session without committing; a read-write session's revision
	/// is discarded and reclaimed by the next cleanup pass.
	#[instrument(skip(self), fields(session_id = %self.session_id), err)]
	pub async fn close(self) -> Result<()> {
		let storage = &self.inner.session;

		let released = async {
			self.revision.remove_session(storage, &self.session_id).await?;
			if let Some(start) = &self.start_revision {
				start.remove_session(storage, &self.session_id).await?;
			}
			storage.flush().await
		}
		.await;

		self.inner
			.state
			.lock()
			.expect("storage state mutex poisoned")
			.active
			.remove(&self.session_id);

		if self.mode == Mode::ReadWrite {
			spawn_cleanup(&self.inner);
		}

		info!("session closed;");
		released
	}
}

fn filter_tombstone(item: Item) -> Option<Item> {
	(item.kind() != Some(KIND_TOMBSTONE)).then_some(item)
}

fn new_session_id() -> String {
	format!("session.{}", Uuid::new_v4())
}

fn corrupt_no_committed_revisions() -> Error {
	error!("no committed revisions exist;");
	Error::StorageCorrupt("there do not appear to be any committed revisions".to_string())
}

fn spawn_cleanup(inner: &Arc<StorageInner>) {
	let owned = Arc::clone(inner);
	inner.cleanups.go(async move {
		if let Err(e) = run_cleanup(&owned).await {
			error!(?e, "storage cleanup failed;");
		}
		Ok(())
	});
}

/// Deletes revision folders that are invisible to every present and future
/// session: committed ones older than the last commit, and abandoned
/// uncommitted ones, unless a live lease holds them. Runs under the root
/// lock so no session can be mid-open while revisions disappear.
async fn run_cleanup(inner: &Arc<StorageInner>) -> Result<()> {
	let storage = &inner.session;
	let root = &inner.root;
	let process_id = format!("cleanup.{}", Uuid::new_v4());

	root.lock(storage, &process_id).await?;
	let swept = async {
		let revisions = root.revision_folders(storage).await?;
		let ranked = sort_by_descending_commit_number(storage, revisions).await?;
		let Some(last_commit) = ranked.iter().find_map(|(_, commit)| *commit) else {
			return Ok(());
		};

		for (revision, commit) in &ranked {
			let reclaimable = commit.map_or(true, |commit| commit < last_commit);
			if !reclaimable || revision.has_live_sessions(storage).await? {
				continue;
			}

			debug!(revision = revision.revision_number(), "reclaiming revision;");
			root.mark_revision_for_deletion(storage, revision.revision_number())
				.await?;
			storage
				.delete(revision.id())
				.get()
				.await
				.map_err(Error::from)?;
			// Tombstones of never-committed revisions are kept: together
			// with the commit log they stop revision numbers from being
			// reused.
			if commit.is_some() {
				root.clear_deletion_mark(storage, revision.revision_number())
					.await?;
			}
		}
		storage.flush().await
	}
	.await;
	let unlocked = root.unlock(storage, &process_id).await;

	swept?;
	unlocked
}
