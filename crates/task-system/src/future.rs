use std::{
	any::Any,
	panic::AssertUnwindSafe,
	sync::{Arc, Mutex, MutexGuard},
};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;

/// Bound for errors produced by task bodies. `Clone` is required because a
/// task's result can be observed by any number of waiters.
pub trait RunError: std::error::Error + Clone + Send + Sync + 'static {}

impl<E: std::error::Error + Clone + Send + Sync + 'static> RunError for E {}

/// How a task can finish without a success value.
#[derive(Debug, Clone, Error)]
pub enum TaskError<E: RunError> {
	/// The task was superseded before it started executing.
	#[error("task was cancelled")]
	Cancelled,
	/// The task body panicked; the payload is preserved as a message.
	#[error("task panicked: {0}")]
	Panicked(String),
	#[error(transparent)]
	Run(E),
}

/// A single-assignment result cell for an asynchronous computation.
///
/// The cell starts out pending and reaches exactly one terminal state:
/// succeeded, failed, or cancelled. The first of [`Self::set_success`],
/// [`Self::set_error`] and [`Self::set_cancel`] wins; later calls are no-ops.
/// Completion listeners registered before the terminal state fire on
/// completion; listeners registered after it are run on a fresh tokio task.
///
/// Cloning is cheap and shares the underlying cell.
pub struct Future<T, E: RunError> {
	inner: Arc<Inner<T, E>>,
}

struct Inner<T, E: RunError> {
	state: Mutex<State<T, E>>,
	done: watch::Sender<bool>,
}

enum State<T, E: RunError> {
	Pending {
		listeners: Vec<Box<dyn FnOnce() + Send>>,
	},
	Done(Result<T, TaskError<E>>),
}

impl<T, E: RunError> Clone for Future<T, E> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T, E: RunError> Default for Future<T, E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T, E: RunError> Future<T, E> {
	#[must_use]
	pub fn new() -> Self {
		let (done, _) = watch::channel(false);
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(State::Pending {
					listeners: Vec::new(),
				}),
				done,
			}),
		}
	}

	fn state(&self) -> MutexGuard<'_, State<T, E>> {
		self.inner.state.lock().expect("future state mutex poisoned")
	}

	/// Completes the cell. Listeners fire synchronously in the caller before
	/// joiners are released, so bookkeeping attached via listeners is settled
	/// by the time a `join` returns.
	pub(crate) fn complete(&self, result: Result<T, TaskError<E>>) {
		let listeners = {
			let mut state = self.state();
			match &mut *state {
				State::Pending { listeners } => {
					let listeners = std::mem::take(listeners);
					*state = State::Done(result);
					listeners
				}
				State::Done(_) => return,
			}
		};

		for listener in listeners {
			listener();
		}

		let _ = self.inner.done.send(true);
	}

	pub fn set_success(&self, value: T) {
		self.complete(Ok(value));
	}

	pub fn set_error(&self, error: E) {
		self.complete(Err(TaskError::Run(error)));
	}

	pub fn set_cancel(&self) {
		self.complete(Err(TaskError::Cancelled));
	}

	/// True once the cell reached any terminal state.
	#[must_use]
	pub fn done(&self) -> bool {
		matches!(&*self.state(), State::Done(_))
	}

	#[must_use]
	pub fn success(&self) -> bool {
		matches!(&*self.state(), State::Done(Ok(_)))
	}

	#[must_use]
	pub fn cancelled(&self) -> bool {
		matches!(
			&*self.state(),
			State::Done(Err(TaskError::Cancelled))
		)
	}

	/// The terminal error, if the cell failed or was cancelled.
	#[must_use]
	pub fn error(&self) -> Option<TaskError<E>> {
		match &*self.state() {
			State::Done(Err(error)) => Some(error.clone()),
			_ => None,
		}
	}

	/// Registers a raw completion listener; used by the scheduler for its
	/// dependency bookkeeping.
	pub(crate) fn on_done(&self, listener: Box<dyn FnOnce() + Send>) {
		let run_now = {
			let mut state = self.state();
			match &mut *state {
				State::Pending { listeners } => {
					listeners.push(listener);
					None
				}
				State::Done(_) => Some(listener),
			}
		};

		if let Some(listener) = run_now {
			// Already complete: the listener still runs, just not inline.
			tokio::spawn(async move { listener() });
		}
	}

	/// Blocks until the cell is done. Never fails and never consumes the
	/// result; use [`Self::get`] to retrieve it.
	pub async fn join(&self) {
		let mut done = self.inner.done.subscribe();
		done.wait_for(|done| *done)
			.await
			.expect("future completion channel closed while its cell is alive");
	}
}

impl<T: Clone, E: RunError> Future<T, E> {
	/// The success value, if the cell succeeded.
	#[must_use]
	pub fn result(&self) -> Option<T> {
		match &*self.state() {
			State::Done(Ok(value)) => Some(value.clone()),
			_ => None,
		}
	}

	/// Blocks until done, then yields the result. A failed cell re-raises
	/// its error; a cancelled cell fails with [`TaskError::Cancelled`].
	pub async fn get(&self) -> Result<T, TaskError<E>> {
		self.join().await;
		match &*self.state() {
			State::Done(result) => result.clone(),
			State::Pending { .. } => {
				unreachable!("future observed pending after join returned")
			}
		}
	}
}

impl<T: Clone + Send + Sync + 'static, E: RunError> Future<T, E> {
	/// Registers a handler invoked with this future once it completes.
	/// Handlers run in no particular order and must not assume mutual
	/// exclusion; a handler registered after completion runs on a fresh
	/// tokio task.
	pub fn on_complete(&self, handler: impl FnOnce(Self) + Send + 'static) {
		let this = self.clone();
		self.on_done(Box::new(move || handler(this)));
	}
}

/// Runs `fut` to completion and settles `future` with its outcome, turning a
/// panic into [`TaskError::Panicked`].
pub(crate) async fn drive<T, E, F>(fut: F, future: Future<T, E>)
where
	T: Send + 'static,
	E: RunError,
	F: std::future::Future<Output = Result<T, E>> + Send,
{
	match AssertUnwindSafe(fut).catch_unwind().await {
		Ok(Ok(value)) => future.set_success(value),
		Ok(Err(error)) => future.set_error(error),
		Err(panic) => future.complete(Err(TaskError::Panicked(panic_message(&panic)))),
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	panic
		.downcast_ref::<&str>()
		.map(ToString::to_string)
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "opaque panic payload".to_string())
}
