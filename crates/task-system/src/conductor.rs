use std::sync::{
	atomic::{AtomicBool, AtomicUsize, Ordering},
	Arc, Mutex, MutexGuard,
};

use contrail_id::{Identifier, IdTree};
use futures::future::BoxFuture;
use futures_concurrency::future::Join;
use tracing::trace;

use crate::future::{drive, Future, RunError};

/// The kind of storage operation a task performs, which decides what it must
/// wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
	Read,
	Write,
	Delete,
	List,
	Create,
}

impl Operation {
	/// Whether a newly arriving operation must wait for a pending one at the
	/// same identifier.
	///
	/// DELETE waits for everything and blocks everything. READ waits for
	/// mutations. LIST waits for mutations and creations. WRITE additionally
	/// waits for READs so readers observe values in arrival order. CREATE
	/// waits for everything except other CREATEs: racing creations are
	/// arbitrated atomically by the storage provider, not serialised here.
	#[must_use]
	pub const fn depends_on(self, previous: Self) -> bool {
		match self {
			Self::Read => matches!(previous, Self::Write | Self::Delete),
			Self::Write => matches!(
				previous,
				Self::Read | Self::Write | Self::Delete | Self::Create
			),
			Self::Delete => true,
			Self::List => matches!(
				previous,
				Self::Write | Self::Delete | Self::Create
			),
			Self::Create => !matches!(previous, Self::Create),
		}
	}
}

struct TaskRecord {
	op: Operation,
	/// Set just before the task body begins executing; a task that has
	/// started is no longer eligible for write-coalescing cancellation.
	started: AtomicBool,
	observer: Arc<dyn TaskObserver>,
}

/// Type-erased view of a task's [`Future`], enough for scheduling.
trait TaskObserver: Send + Sync {
	fn is_done(&self) -> bool;
	fn set_cancel(&self);
	fn on_done(&self, listener: Box<dyn FnOnce() + Send>);
	fn wait(&self) -> BoxFuture<'static, ()>;
}

impl<T: Send + Sync + 'static, E: RunError> TaskObserver for Future<T, E> {
	fn is_done(&self) -> bool {
		self.done()
	}

	fn set_cancel(&self) {
		Self::set_cancel(self);
	}

	fn on_done(&self, listener: Box<dyn FnOnce() + Send>) {
		Self::on_done(self, listener);
	}

	fn wait(&self) -> BoxFuture<'static, ()> {
		let this = self.clone();
		Box::pin(async move { this.join().await })
	}
}

type TaskSet = Vec<Arc<TaskRecord>>;

/// Holds a task's body until its dependencies drain, then spawns it exactly
/// once.
#[derive(Clone)]
struct Launch {
	slot: Arc<Mutex<Option<BoxFuture<'static, ()>>>>,
}

impl Launch {
	fn new(body: BoxFuture<'static, ()>) -> Self {
		Self {
			slot: Arc::new(Mutex::new(Some(body))),
		}
	}

	fn fire(&self) {
		let body = self
			.slot
			.lock()
			.expect("task launch slot mutex poisoned")
			.take();
		if let Some(body) = body {
			tokio::spawn(body);
		}
	}
}

/// Schedules per-identifier storage operations so their observable effect is
/// that of a sequential execution in arrival order, while independent
/// operations run in parallel.
///
/// Each submission is dispatched onto its own tokio task once every pending
/// task it depends on has completed; parallelism is bounded only by the
/// dependency graph. Cloning is cheap and shares the scheduler.
#[derive(Clone)]
pub struct Conductor {
	inner: Arc<Inner>,
}

struct Inner {
	tasks: IdTree<TaskSet>,
	/// Serialises dependency analysis + registration so two submissions
	/// cannot interleave between finding pending work and recording
	/// themselves.
	submit: Mutex<()>,
}

impl Default for Conductor {
	fn default() -> Self {
		Self::new()
	}
}

impl Conductor {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				tasks: IdTree::new(),
				submit: Mutex::new(()),
			}),
		}
	}

	fn submit_guard(&self) -> MutexGuard<'_, ()> {
		self.inner
			.submit
			.lock()
			.expect("conductor submit mutex poisoned")
	}

	/// Submits `fut` to run as an `op` on `id` once it is safe to do so, and
	/// returns the [`Future`] bound to it. Panics in the body are captured
	/// into the future.
	///
	/// Contract: the body must not submit another task to this same
	/// conductor and then block on its result when the dependency rules
	/// order that task after this one — there is no deadlock detection, and
	/// such a cycle hangs both tasks.
	pub fn submit<T, E, F>(&self, op: Operation, id: &Identifier, fut: F) -> Future<T, E>
	where
		T: Clone + Send + Sync + 'static,
		E: RunError,
		F: std::future::Future<Output = Result<T, E>> + Send + 'static,
	{
		let future = Future::<T, E>::new();
		let record = Arc::new(TaskRecord {
			op,
			started: AtomicBool::new(false),
			observer: Arc::new(future.clone()),
		});

		let body: BoxFuture<'static, ()> = Box::pin({
			let future = future.clone();
			let record = Arc::clone(&record);
			async move {
				// A cancelled task completes without ever executing.
				if future.done() {
					return;
				}
				record.started.store(true, Ordering::Release);
				drive(fut, future).await;
			}
		});
		let launch = Launch::new(body);

		let (pending, superseded) = {
			let _guard = self.submit_guard();

			let (pending, superseded) = self.find_pending(op, id);

			let mut set = self.inner.tasks.fetch(id).unwrap_or_default();
			set.push(Arc::clone(&record));
			self.inner.tasks.store(id, set);

			(pending, superseded)
		};

		trace!(%id, ?op, pending = pending.len(), "task submitted;");

		// Completed tasks leave the in-flight tree.
		record.observer.on_done(Box::new({
			let inner = Arc::clone(&self.inner);
			let id = id.clone();
			let record = Arc::clone(&record);
			move || Inner::remove_task(&inner, &id, &record)
		}));

		// Cancelled outside the submit lock: completing a superseded write
		// fires its listeners, which re-enter the scheduler to deregister it
		// and to unblock dependents.
		for stale in superseded {
			stale.observer.set_cancel();
		}

		if pending.is_empty() {
			launch.fire();
		} else {
			let remaining = Arc::new(AtomicUsize::new(pending.len()));
			for task in &pending {
				task.observer.on_done(Box::new({
					let launch = launch.clone();
					let remaining = Arc::clone(&remaining);
					move || {
						if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
							launch.fire();
						}
					}
				}));
			}
		}

		future
	}

	/// Pending tasks the new `(op, id)` must wait for, plus the writes it
	/// supersedes.
	fn find_pending(
		&self,
		op: Operation,
		id: &Identifier,
	) -> (Vec<Arc<TaskRecord>>, Vec<Arc<TaskRecord>>) {
		let tasks = &self.inner.tasks;
		let mut pending: Vec<Arc<TaskRecord>> = Vec::new();

		let depends = |task: &Arc<TaskRecord>| !task.observer.is_done() && op.depends_on(task.op);

		tasks.visit_node(id, |_, set: &TaskSet| {
			pending.extend(set.iter().filter(|task| depends(task)).cloned());
		});

		// An incoming write supersedes queued writes at the same identifier,
		// unless a pending read is waiting to observe one of them in arrival
		// order. Writes that already started executing are left alone.
		let mut superseded = Vec::new();
		if op == Operation::Write
			&& !pending.iter().any(|task| task.op == Operation::Read)
		{
			superseded = pending
				.iter()
				.filter(|task| {
					task.op == Operation::Write
						&& !task.started.load(Ordering::Acquire)
				})
				.cloned()
				.collect();
		}

		// Work below must drain before a LIST sees the children or a DELETE
		// takes the subtree.
		if matches!(op, Operation::List | Operation::Delete) {
			tasks.visit_descendents(id, |_, set: &TaskSet| {
				pending.extend(set.iter().filter(|task| depends(task)).cloned());
			});
		}

		// A pending DELETE anywhere above blocks everything below it.
		tasks.visit_parents(id, |_, set: &TaskSet| {
			pending.extend(
				set.iter()
					.filter(|task| {
						!task.observer.is_done() && task.op == Operation::Delete
					})
					.cloned(),
			);
		});

		(pending, superseded)
	}

	/// Blocks until every task currently reachable from the in-flight tree
	/// has completed, including tasks submitted while waiting.
	pub async fn join(&self) {
		loop {
			let waits: Vec<BoxFuture<'static, ()>> = {
				let _guard = self.submit_guard();
				self.inner
					.tasks
					.list_all()
					.iter()
					.filter_map(|id| self.inner.tasks.fetch(id))
					.flatten()
					.map(|task| task.observer.wait())
					.collect()
			};

			if waits.is_empty() {
				break;
			}
			waits.join().await;
		}
	}

	/// [`Self::join`], then releases internal state.
	pub async fn close(&self) {
		self.join().await;
		self.inner.tasks.clear();
	}

	/// Number of tasks currently in flight.
	#[must_use]
	pub fn in_flight(&self) -> usize {
		self.inner
			.tasks
			.list_all()
			.iter()
			.filter_map(|id| self.inner.tasks.fetch(id))
			.map(|set| set.len())
			.sum()
	}
}

impl Inner {
	fn remove_task(inner: &Arc<Self>, id: &Identifier, record: &Arc<TaskRecord>) {
		let _guard = inner
			.submit
			.lock()
			.expect("conductor submit mutex poisoned");

		let Some(mut set) = inner.tasks.fetch(id) else {
			return;
		};
		set.retain(|task| !Arc::ptr_eq(task, record));
		if set.is_empty() {
			inner.tasks.delete(id);
		} else {
			inner.tasks.store(id, set);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dependency_table() {
		use Operation::{Create, Delete, List, Read, Write};

		// (incoming, previous) pairs that must serialise.
		for (incoming, previous) in [
			(Read, Write),
			(Read, Delete),
			(Write, Read),
			(Write, Write),
			(Write, Delete),
			(Write, Create),
			(Delete, Read),
			(Delete, Write),
			(Delete, Delete),
			(Delete, List),
			(Delete, Create),
			(List, Write),
			(List, Delete),
			(List, Create),
			(Create, Read),
			(Create, Write),
			(Create, Delete),
			(Create, List),
		] {
			assert!(
				incoming.depends_on(previous),
				"{incoming:?} must wait for {previous:?}"
			);
		}

		// Pairs that run concurrently.
		for (incoming, previous) in [
			(Read, Read),
			(Read, List),
			(Read, Create),
			(List, Read),
			(List, List),
			(Create, Create),
		] {
			assert!(
				!incoming.depends_on(previous),
				"{incoming:?} must not wait for {previous:?}"
			);
		}
	}
}
