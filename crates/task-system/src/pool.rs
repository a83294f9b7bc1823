use std::sync::{Mutex, MutexGuard};

use crate::future::{drive, Future, RunError, TaskError};

/// Runs `fut` on its own tokio task immediately, with no scheduling rules,
/// and returns the [`Future`] bound to it. Panics are captured into the
/// future.
pub fn spawn<T, E, F>(fut: F) -> Future<T, E>
where
	T: Clone + Send + Sync + 'static,
	E: RunError,
	F: std::future::Future<Output = Result<T, E>> + Send + 'static,
{
	let future = Future::<T, E>::new();
	tokio::spawn({
		let future = future.clone();
		async move { drive(fut, future).await }
	});
	future
}

/// Blocks until all futures are complete, without raising.
pub async fn join_all<T, E: RunError>(futures: &[Future<T, E>]) {
	for future in futures {
		future.join().await;
	}
}

/// Blocks until all futures are complete, then re-raises the first
/// non-cancelled failure.
pub async fn wait_all<T, E: RunError>(futures: &[Future<T, E>]) -> Result<(), TaskError<E>> {
	join_all(futures).await;

	for future in futures {
		match future.error() {
			None | Some(TaskError::Cancelled) => {}
			Some(error) => return Err(error),
		}
	}
	Ok(())
}

/// Accumulates concurrently spawned units of work so they can be joined as a
/// group.
pub struct TaskPool<E: RunError> {
	futures: Mutex<Vec<Future<(), E>>>,
}

impl<E: RunError> Default for TaskPool<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E: RunError> TaskPool<E> {
	#[must_use]
	pub fn new() -> Self {
		Self {
			futures: Mutex::new(Vec::new()),
		}
	}

	fn futures(&self) -> MutexGuard<'_, Vec<Future<(), E>>> {
		self.futures.lock().expect("task pool mutex poisoned")
	}

	/// Spawns `fut` immediately and tracks it in the pool.
	pub fn go(&self, fut: impl std::future::Future<Output = Result<(), E>> + Send + 'static) {
		let future = spawn(fut);
		self.futures().push(future);
	}

	/// Waits for every spawned unit, re-raising the first non-cancelled
	/// failure.
	pub async fn wait(&self) -> Result<(), TaskError<E>> {
		let futures = std::mem::take(&mut *self.futures());
		wait_all(&futures).await
	}
}
