//! Local-filesystem storage provider.
//!
//! Each identifier maps to a directory under the provider root, with the
//! blob in a `.content` file and children as subdirectories. A naive layout
//! for a database, but a fast one, and it makes incremental backups work
//! with off-the-shelf tooling.
//!
//! Ordering comes from an internal [`Conductor`]; a second file-guard
//! conductor serialises the exists/create pair of CREATE and the removal of
//! DELETE within this process. Across processes, CREATE leans on the
//! filesystem's atomic create-new behaviour for the `.content` file.

use std::{
	io,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use contrail_id::Identifier;
use contrail_task_system::{Conductor, Operation};
use contrail_utils::FileIOError;
use tokio::{
	fs::{self, OpenOptions},
	io::AsyncWriteExt,
	time::{sleep, Instant},
};
use tracing::trace;

use super::{StorageProvider, StorageSession};
use crate::{Error, Result};

const CONTENT_FILE: &str = ".content";

/// How long a losing `create` sleeps before rechecking the path.
const CREATE_RETRY_INTERVAL: Duration = Duration::from_millis(25);

pub struct FileStorageProvider {
	root: PathBuf,
	conductor: Conductor,
	file_guard: Conductor,
}

impl FileStorageProvider {
	/// Opens (and with `clean`, first erases) a store rooted at `root`.
	pub async fn new(root: impl AsRef<Path>, clean: bool) -> Result<Self> {
		let root = root.as_ref().to_path_buf();

		if clean {
			if let Err(e) = fs::remove_dir_all(&root).await {
				if e.kind() != io::ErrorKind::NotFound {
					return Err(
						FileIOError::from((&root, e, "Failed to clean storage root")).into()
					);
				}
			}
		}
		fs::create_dir_all(&root)
			.await
			.map_err(|e| FileIOError::from((&root, e, "Failed to create storage root")))?;

		Ok(Self {
			root,
			conductor: Conductor::new(),
			file_guard: Conductor::new(),
		})
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Waits for all in-flight work across every session of this provider.
	pub async fn close(&self) {
		self.conductor.close().await;
		self.file_guard.close().await;
	}
}

impl StorageProvider for FileStorageProvider {
	fn connect(&self) -> Arc<dyn StorageSession> {
		Arc::new(FileStorageSession {
			root: self.root.clone(),
			conductor: self.conductor.clone(),
			file_guard: self.file_guard.clone(),
		})
	}
}

pub struct FileStorageSession {
	root: PathBuf,
	conductor: Conductor,
	file_guard: Conductor,
}

impl FileStorageSession {
	/// Directory backing `path`.
	fn dir_path(&self, path: &Identifier) -> PathBuf {
		let mut dir = self.root.clone();
		if !path.path().is_empty() {
			for segment in path.path().split('/') {
				dir.push(segment);
			}
		}
		dir
	}

	/// `.content` file backing `path`.
	fn blob_path(&self, path: &Identifier) -> PathBuf {
		self.dir_path(path).join(CONTENT_FILE)
	}
}

/// One guarded create-if-absent attempt; the file-guard conductor makes the
/// exists-check and creation indivisible within this process.
async fn try_create(dir: PathBuf, file: PathBuf, content: Arc<[u8]>) -> Result<bool> {
	fs::create_dir_all(&dir)
		.await
		.map_err(|e| FileIOError::from((&dir, e, "Failed to create parent directories")))?;

	match OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(&file)
		.await
	{
		Ok(mut blob) => {
			blob.write_all(&content)
				.await
				.map_err(|e| FileIOError::from((&file, e, "Failed to write created blob")))?;
			Ok(true)
		}
		Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
		Err(e) => Err(FileIOError::from((&file, e, "Failed to create blob")).into()),
	}
}

#[async_trait]
impl StorageSession for FileStorageSession {
	async fn list_children(&self, path: &Identifier) -> Result<Vec<Identifier>> {
		let parent = path.clone();
		let dir = self.dir_path(path);

		self.conductor
			.submit(Operation::List, path, async move {
				let mut entries = match fs::read_dir(&dir).await {
					Ok(entries) => entries,
					Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
					Err(e) => {
						return Err(FileIOError::from((&dir, e, "Failed to list children"))
							.into())
					}
				};

				let mut children = Vec::new();
				loop {
					let entry = entries.next_entry().await.map_err(|e| {
						FileIOError::from((&dir, e, "Failed to read directory entry"))
					})?;
					let Some(entry) = entry else { break };

					let is_dir = entry
						.file_type()
						.await
						.map_err(|e| {
							FileIOError::from((
								entry.path(),
								e,
								"Failed to read entry file type",
							))
						})?
						.is_dir();
					if is_dir {
						children.push(parent.child(&entry.file_name().to_string_lossy()));
					}
				}
				Ok(children)
			})
			.get()
			.await
			.map_err(Error::from)
	}

	async fn fetch(&self, path: &Identifier) -> Result<Option<Vec<u8>>> {
		let file = self.blob_path(path);

		self.conductor
			.submit(Operation::Read, path, async move {
				match fs::read(&file).await {
					Ok(bytes) => Ok(Some(bytes)),
					Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
					Err(e) => {
						Err(FileIOError::from((&file, e, "Failed to fetch blob")).into())
					}
				}
			})
			.get()
			.await
			.map_err(Error::from)
	}

	async fn store(&self, path: &Identifier, content: Vec<u8>) -> Result<()> {
		let dir = self.dir_path(path);
		let file = self.blob_path(path);

		self.conductor
			.submit(Operation::Write, path, async move {
				fs::create_dir_all(&dir).await.map_err(|e| {
					FileIOError::from((&dir, e, "Failed to create parent directories"))
				})?;
				fs::write(&file, &content)
					.await
					.map_err(|e| FileIOError::from((&file, e, "Failed to store blob")))?;
				Ok(())
			})
			.get()
			.await
			.map_err(Error::from)
	}

	async fn create(&self, path: &Identifier, content: Vec<u8>, wait: Duration) -> Result<bool> {
		let dir = self.dir_path(path);
		let file = self.blob_path(path);
		let content: Arc<[u8]> = content.into();

		// The retry loop lives outside the scheduler on purpose: each
		// attempt is its own short CREATE task, so a DELETE releasing the
		// path can interleave between attempts instead of queueing behind
		// the whole wait.
		let deadline = Instant::now() + wait;
		loop {
			let id = path.clone();
			let file_guard = self.file_guard.clone();
			let created = self
				.conductor
				.submit(Operation::Create, path, {
					let dir = dir.clone();
					let file = file.clone();
					let content = Arc::clone(&content);
					async move {
						file_guard
							.submit(Operation::Write, &id, async move {
								try_create(dir, file, content).await
							})
							.get()
							.await
							.map_err(Error::from)
					}
				})
				.get()
				.await
				.map_err(Error::from)?;

			if created {
				return Ok(true);
			}
			if wait.is_zero() || Instant::now() >= deadline {
				trace!(path = %path, "create-if-absent lost the race;");
				return Ok(false);
			}
			sleep(CREATE_RETRY_INTERVAL).await;
		}
	}

	async fn delete(&self, path: &Identifier) -> Result<()> {
		let id = path.clone();
		let dir = self.dir_path(path);
		let file_guard = self.file_guard.clone();

		self.conductor
			.submit(Operation::Delete, path, async move {
				file_guard
					.submit(Operation::Delete, &id, async move {
						match fs::remove_dir_all(&dir).await {
							Ok(()) => Ok(()),
							Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
							Err(e) => Err(FileIOError::from((
								&dir,
								e,
								"Failed to delete blob directory",
							))
							.into()),
						}
					})
					.get()
					.await
					.map_err(Error::from)
			})
			.get()
			.await
			.map_err(Error::from)
	}

	async fn flush(&self) -> Result<()> {
		self.conductor.join().await;
		self.file_guard.join().await;
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		self.flush().await
	}
}
