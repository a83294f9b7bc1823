use std::{sync::Arc, time::Duration};

use contrail_core::provider::{FileStorageProvider, StorageProvider};
use contrail_id::Identifier;
use contrail_task_system::pool;
use tempfile::tempdir;
use tracing_test::traced_test;

async fn open_provider(dir: &std::path::Path) -> Arc<FileStorageProvider> {
	Arc::new(
		FileStorageProvider::new(dir.join("store"), true)
			.await
			.unwrap(),
	)
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn store_flush_fetch_round_trips() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();
	let id = Identifier::new("round/trip");

	session.store(&id, b"payload".to_vec()).await.unwrap();
	session.flush().await.unwrap();

	assert_eq!(session.fetch(&id).await.unwrap(), Some(b"payload".to_vec()));
	session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn fetch_missing_returns_none() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();

	assert_eq!(session.fetch(&Identifier::new("no/such/blob")).await.unwrap(), None);

	// A directory without a content blob is still "absent", even when
	// children exist below it.
	let child = Identifier::new("hollow/parent/leaf");
	session.store(&child, b"x".to_vec()).await.unwrap();
	assert_eq!(
		session
			.fetch(&Identifier::new("hollow/parent"))
			.await
			.unwrap(),
		None
	);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn list_children_sees_only_direct_subdirectories() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();
	let parent = Identifier::new("listing");

	session
		.store(&parent.child("a"), b"1".to_vec())
		.await
		.unwrap();
	session
		.store(&parent.child("b"), b"2".to_vec())
		.await
		.unwrap();
	session
		.store(&Identifier::new("listing/b/deeper"), b"3".to_vec())
		.await
		.unwrap();

	let mut children = session.list_children(&parent).await.unwrap();
	children.sort();
	assert_eq!(children, [parent.child("a"), parent.child("b")]);

	assert_eq!(
		session
			.list_children(&Identifier::new("listing/missing"))
			.await
			.unwrap(),
		Vec::<Identifier>::new()
	);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn create_is_create_if_absent() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();
	let id = Identifier::new("exclusive/slot");

	assert!(session
		.create(&id, b"first".to_vec(), Duration::ZERO)
		.await
		.unwrap());
	assert!(!session
		.create(&id, b"second".to_vec(), Duration::ZERO)
		.await
		.unwrap());
	assert_eq!(session.fetch(&id).await.unwrap(), Some(b"first".to_vec()));

	session.delete(&id).await.unwrap();
	assert!(session
		.create(&id, b"third".to_vec(), Duration::ZERO)
		.await
		.unwrap());
	assert_eq!(session.fetch(&id).await.unwrap(), Some(b"third".to_vec()));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn exactly_one_concurrent_create_wins() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let id = Identifier::new("contended/slot");

	let attempts = (0..20)
		.map(|n| {
			let session = provider.connect();
			let id = id.clone();
			pool::spawn(async move {
				session
					.create(&id, vec![n], Duration::from_millis(300))
					.await
			})
		})
		.collect::<Vec<_>>();

	let mut winners = 0;
	for attempt in &attempts {
		if attempt.get().await.unwrap() {
			winners += 1;
		}
	}
	assert_eq!(winners, 1, "exactly one create must observe true");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn waiting_create_wins_once_the_holder_deletes() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();
	let id = Identifier::new("handoff/slot");

	assert!(session
		.create(&id, b"holder".to_vec(), Duration::ZERO)
		.await
		.unwrap());

	let waiter = {
		let session = provider.connect();
		let id = id.clone();
		pool::spawn(async move {
			session
				.create(&id, b"waiter".to_vec(), Duration::from_secs(5))
				.await
		})
	};

	tokio::time::sleep(Duration::from_millis(100)).await;
	session.delete(&id).await.unwrap();

	assert!(waiter.get().await.unwrap(), "waiter must win after the delete");
	assert_eq!(session.fetch(&id).await.unwrap(), Some(b"waiter".to_vec()));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn delete_is_idempotent() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();
	let id = Identifier::new("gone/soon");

	session.store(&id, b"x".to_vec()).await.unwrap();
	session.delete(&id).await.unwrap();
	session.delete(&id).await.unwrap();
	assert_eq!(session.fetch(&id).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn delete_takes_the_subtree() {
	let dir = tempdir().unwrap();
	let provider = open_provider(dir.path()).await;
	let session = provider.connect();
	let parent = Identifier::new("subtree");

	session.store(&parent, b"p".to_vec()).await.unwrap();
	session
		.store(&parent.child("leaf"), b"l".to_vec())
		.await
		.unwrap();
	session.delete(&parent).await.unwrap();

	assert_eq!(session.fetch(&parent).await.unwrap(), None);
	assert_eq!(session.fetch(&parent.child("leaf")).await.unwrap(), None);
	assert_eq!(session.list_children(&parent).await.unwrap(), Vec::<Identifier>::new());
}
