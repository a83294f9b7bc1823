use std::{
	convert::Infallible,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use contrail_id::Identifier;
use contrail_task_system::{Conductor, Operation, TaskError};
use tokio::{
	sync::Barrier,
	time::{sleep, timeout},
};
use tracing_test::traced_test;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn log() -> Log {
	Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: &'static str) {
	log.lock().unwrap().push(entry);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn write_then_read_runs_in_arrival_order() {
	let conductor = Conductor::new();
	let id = Identifier::new("orders/write-then-read");
	let events = log();

	let write = conductor.submit(Operation::Write, &id, {
		let events = Arc::clone(&events);
		async move {
			sleep(Duration::from_millis(50)).await;
			push(&events, "write done");
			Ok::<_, Infallible>(())
		}
	});

	let read = conductor.submit(Operation::Read, &id, {
		let write = write.clone();
		let events = Arc::clone(&events);
		async move {
			assert!(write.done(), "read started before the write completed");
			push(&events, "read ran");
			Ok::<_, Infallible>(())
		}
	});

	read.get().await.unwrap();
	assert_eq!(*events.lock().unwrap(), ["write done", "read ran"]);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn independent_identifiers_run_in_parallel() {
	let conductor = Conductor::new();
	let barrier = Arc::new(Barrier::new(2));

	let futures = ["parallel/a", "parallel/b"].map(|path| {
		conductor.submit(Operation::Write, &Identifier::new(path), {
			let barrier = Arc::clone(&barrier);
			async move {
				// Both bodies must be running at once to get past this.
				barrier.wait().await;
				Ok::<_, Infallible>(())
			}
		})
	});

	timeout(Duration::from_secs(5), async {
		for future in &futures {
			future.get().await.unwrap();
		}
	})
	.await
	.expect("independent writes did not run concurrently");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn writes_at_the_same_identifier_serialise() {
	let conductor = Conductor::new();
	let id = Identifier::new("serialise/hot");
	let running = Arc::new(AtomicUsize::new(0));

	// READs interleaved between the writes keep coalescing out of the
	// picture; every task checks it is the only one executing.
	let mut futures = Vec::new();
	for n in 0..10 {
		let op = if n % 2 == 0 {
			Operation::Write
		} else {
			Operation::Read
		};
		futures.push(conductor.submit(op, &id, {
			let running = Arc::clone(&running);
			async move {
				assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
				sleep(Duration::from_millis(5)).await;
				running.fetch_sub(1, Ordering::SeqCst);
				Ok::<_, Infallible>(())
			}
		}));
	}

	for future in futures {
		future.get().await.unwrap();
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn list_waits_for_descendant_mutations() {
	let conductor = Conductor::new();
	let parent = Identifier::new("catalog");
	let child = parent.child("entry");
	let events = log();

	let write = conductor.submit(Operation::Write, &child, {
		let events = Arc::clone(&events);
		async move {
			sleep(Duration::from_millis(50)).await;
			push(&events, "child write");
			Ok::<_, Infallible>(())
		}
	});

	let list = conductor.submit(Operation::List, &parent, {
		let write = write.clone();
		let events = Arc::clone(&events);
		async move {
			assert!(write.done(), "list ran before the child write drained");
			push(&events, "list");
			Ok::<_, Infallible>(())
		}
	});

	list.get().await.unwrap();
	assert_eq!(*events.lock().unwrap(), ["child write", "list"]);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn ancestor_delete_blocks_descendant_delete() {
	let conductor = Conductor::new();
	let parent = Identifier::new("doomed");
	let child = parent.child("leaf");

	let parent_delete = conductor.submit(Operation::Delete, &parent, async {
		sleep(Duration::from_millis(80)).await;
		Ok::<_, Infallible>(())
	});

	let child_delete = conductor.submit(Operation::Delete, &child, {
		let parent_delete = parent_delete.clone();
		async move {
			assert!(
				parent_delete.done(),
				"descendant delete ran under a pending ancestor delete"
			);
			Ok::<_, Infallible>(())
		}
	});

	sleep(Duration::from_millis(20)).await;
	assert!(
		!child_delete.done(),
		"descendant delete completed while the ancestor delete was pending"
	);

	child_delete.get().await.unwrap();
	assert!(parent_delete.done());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn delete_waits_for_descendant_work() {
	let conductor = Conductor::new();
	let parent = Identifier::new("drained");
	let child = parent.child("busy");

	let write = conductor.submit(Operation::Write, &child, async {
		sleep(Duration::from_millis(50)).await;
		Ok::<_, Infallible>(())
	});

	let delete = conductor.submit(Operation::Delete, &parent, {
		let write = write.clone();
		async move {
			assert!(write.done(), "delete ran before descendant work drained");
			Ok::<_, Infallible>(())
		}
	});

	delete.get().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn queued_writes_are_coalesced() {
	let conductor = Conductor::new();
	let id = Identifier::new("coalesce/plain");
	let ran = Arc::new(AtomicUsize::new(0));

	let (started_tx, started_rx) = tokio::sync::oneshot::channel();
	let first = conductor.submit(Operation::Write, &id, {
		let ran = Arc::clone(&ran);
		async move {
			let _ = started_tx.send(());
			sleep(Duration::from_millis(50)).await;
			ran.fetch_add(1, Ordering::SeqCst);
			Ok::<_, Infallible>(())
		}
	});
	// Only a write that has not begun executing may be superseded.
	started_rx.await.unwrap();

	let submit_write = || {
		conductor.submit(Operation::Write, &id, {
			let ran = Arc::clone(&ran);
			async move {
				ran.fetch_add(1, Ordering::SeqCst);
				Ok::<_, Infallible>(())
			}
		})
	};

	// Queued behind `first`, then superseded before it ever starts.
	let second = submit_write();
	let third = submit_write();

	third.get().await.unwrap();
	first.join().await;
	second.join().await;

	assert!(second.cancelled(), "superseded write was not cancelled");
	assert!(matches!(second.get().await, Err(TaskError::Cancelled)));
	assert_eq!(ran.load(Ordering::SeqCst), 2, "only first and last writes run");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn pending_reads_prevent_coalescing() {
	let conductor = Conductor::new();
	let id = Identifier::new("coalesce/guarded");

	let first = conductor.submit(Operation::Write, &id, async {
		sleep(Duration::from_millis(50)).await;
		Ok::<_, Infallible>(1)
	});
	let read = conductor.submit(Operation::Read, &id, async { Ok::<_, Infallible>(()) });
	let second = conductor.submit(Operation::Write, &id, async { Ok::<_, Infallible>(2) });

	second.get().await.unwrap();
	read.get().await.unwrap();

	assert!(
		!first.cancelled(),
		"a write with a pending read must not be coalesced away"
	);
	assert_eq!(first.get().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn creates_do_not_serialise_against_each_other() {
	let conductor = Conductor::new();
	let id = Identifier::new("racing/create");
	let barrier = Arc::new(Barrier::new(2));

	let futures: Vec<_> = (0..2)
		.map(|_| {
			conductor.submit(Operation::Create, &id, {
				let barrier = Arc::clone(&barrier);
				async move {
					barrier.wait().await;
					Ok::<_, Infallible>(())
				}
			})
		})
		.collect();

	timeout(Duration::from_secs(5), async {
		for future in futures {
			future.get().await.unwrap();
		}
	})
	.await
	.expect("concurrent creates serialised against each other");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn panics_surface_through_the_future() {
	let conductor = Conductor::new();
	let id = Identifier::new("broken/task");

	let future = conductor.submit::<(), Infallible, _>(Operation::Read, &id, async {
		panic!("task exploded");
	});

	assert!(matches!(
		future.get().await,
		Err(TaskError::Panicked(message)) if message.contains("task exploded")
	));

	// The scheduler keeps working after a panic.
	conductor
		.submit(Operation::Read, &id, async { Ok::<_, Infallible>(()) })
		.get()
		.await
		.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn join_drains_every_submission() {
	let conductor = Conductor::new();
	let done = Arc::new(AtomicUsize::new(0));

	for n in 0..20 {
		conductor.submit(
			Operation::Write,
			&Identifier::new(format!("drain/{n}")),
			{
				let done = Arc::clone(&done);
				async move {
					sleep(Duration::from_millis(5)).await;
					done.fetch_add(1, Ordering::SeqCst);
					Ok::<_, Infallible>(())
				}
			},
		);
	}

	conductor.join().await;
	assert_eq!(done.load(Ordering::SeqCst), 20);
	assert_eq!(conductor.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn close_leaves_an_empty_scheduler() {
	let conductor = Conductor::new();
	conductor.submit(
		Operation::Write,
		&Identifier::new("closing/x"),
		async { Ok::<_, Infallible>(()) },
	);

	conductor.close().await;
	assert_eq!(conductor.in_flight(), 0);
}
