use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use contrail_core::{
	object::{Lifecycle, ObjectStorage, ObjectStorageSession},
	provider::FileStorageProvider,
	Item, Result,
};
use contrail_id::Identifier;
use tempfile::tempdir;
use tracing_test::traced_test;

async fn open_storage(dir: &std::path::Path) -> ObjectStorage {
	ObjectStorage::new(Arc::new(
		FileStorageProvider::new(dir.join("store"), true)
			.await
			.unwrap(),
	))
}

fn sample_item(id: &Identifier, marker: i64) -> Item {
	let mut item = Item::of_kind(id, "sample");
	item.set_property("marker", marker);
	item
}

/// Records every lifecycle event it sees, with the path it fired for.
#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<(&'static str, String)>>,
}

impl Recorder {
	fn events(&self) -> Vec<(&'static str, String)> {
		self.events.lock().unwrap().clone()
	}
}

#[async_trait]
impl Lifecycle for Recorder {
	async fn on_insert(
		&self,
		_storage: &ObjectStorageSession,
		path: &Identifier,
		_item: &Item,
	) -> Result<()> {
		self.events
			.lock()
			.unwrap()
			.push(("insert", path.path().to_string()));
		Ok(())
	}

	async fn on_load(
		&self,
		_storage: &ObjectStorageSession,
		path: &Identifier,
		_item: &Item,
	) -> Result<()> {
		self.events
			.lock()
			.unwrap()
			.push(("load", path.path().to_string()));
		Ok(())
	}

	async fn on_delete(
		&self,
		_storage: &ObjectStorageSession,
		path: &Identifier,
		_item: Option<&Item>,
	) -> Result<()> {
		self.events
			.lock()
			.unwrap()
			.push(("delete", path.path().to_string()));
		Ok(())
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn store_then_fetch_returns_the_stored_item() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let session = storage.connect();
	let id = Identifier::new("objects/config");
	let item = sample_item(&id, 7);

	session.store(&id, item.clone()).get().await.unwrap();
	assert_eq!(session.fetch(&id).await.unwrap(), Some(item));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn fetch_is_served_from_the_cache() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let session = storage.connect();
	let id = Identifier::new("objects/cached");
	let item = sample_item(&id, 1);

	session.store(&id, item.clone()).get().await.unwrap();
	session.flush().await.unwrap();

	// Remove the blob behind the session's back; a cached read must not
	// notice.
	session.raw().delete(&id).await.unwrap();
	assert_eq!(session.fetch(&id).await.unwrap(), Some(item));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn items_round_trip_across_sessions() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let id = Identifier::new("objects/durable");
	let item = sample_item(&id, 3);

	let writer = storage.connect();
	writer.store(&id, item.clone()).get().await.unwrap();
	writer.close().await.unwrap();

	let reader = storage.connect();
	assert_eq!(reader.fetch(&id).await.unwrap(), Some(item));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn lifecycle_hooks_fire_at_the_right_points() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let recorder = Arc::new(Recorder::default());
	let id = Identifier::new("objects/tracked");

	{
		let session = storage.connect_with_lifecycle(recorder.clone());
		session.store(&id, sample_item(&id, 1)).get().await.unwrap();
		session.close().await.unwrap();
	}
	assert_eq!(
		recorder.events(),
		[("insert", "objects/tracked".to_string())]
	);

	{
		// A fresh session has a cold cache, so the fetch deserializes and
		// fires on_load.
		let session = storage.connect_with_lifecycle(recorder.clone());
		session.fetch(&id).await.unwrap().unwrap();
		session.delete(&id).get().await.unwrap();
		session.close().await.unwrap();
	}
	let events = recorder.events();
	assert_eq!(
		events[1..].to_vec(),
		vec![
			("load", "objects/tracked".to_string()),
			("delete", "objects/tracked".to_string())
		]
	);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn create_installs_into_cache_only_on_success() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let recorder = Arc::new(Recorder::default());
	let session = storage.connect_with_lifecycle(recorder.clone());
	let id = Identifier::new("objects/slot");

	assert!(session
		.create(&id, sample_item(&id, 1), Duration::ZERO)
		.await
		.unwrap());
	assert!(!session
		.create(&id, sample_item(&id, 2), Duration::ZERO)
		.await
		.unwrap());

	assert_eq!(
		session.fetch(&id).await.unwrap().unwrap().get_i64("marker"),
		Some(1)
	);
	// Only the winning create fired a lifecycle event.
	assert_eq!(recorder.events(), [("insert", "objects/slot".to_string())]);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn fetch_children_fans_out() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let session = storage.connect();
	let parent = Identifier::new("objects/family");

	for name in ["a", "b", "c"] {
		let child = parent.child(name);
		session
			.store(&child, sample_item(&child, 1))
			.get()
			.await
			.unwrap();
	}
	session.flush().await.unwrap();

	let children = session.fetch_children(&parent).await.unwrap();
	assert_eq!(children.len(), 3);
	for name in ["a", "b", "c"] {
		assert!(children.fetch(&parent.child(name)).is_some());
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn delete_all_children_clears_the_folder() {
	let dir = tempdir().unwrap();
	let storage = open_storage(dir.path()).await;
	let session = storage.connect();
	let parent = Identifier::new("objects/emptied");

	for n in 0..5_i64 {
		let child = parent.child(&format!("c{n}"));
		session
			.store(&child, sample_item(&child, n))
			.get()
			.await
			.unwrap();
	}
	session.flush().await.unwrap();

	session.delete_all_children(&parent).await.unwrap();
	assert_eq!(
		session.list_children(&parent).await.unwrap(),
		Vec::<Identifier>::new()
	);
}
