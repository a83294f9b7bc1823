#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! An identifier-indexed task scheduler.
//!
//! Work is submitted as `(operation, identifier, future)` triples to a
//! [`Conductor`], which tracks the in-flight tasks in an identifier tree and
//! only starts a task once everything it depends on has finished. The
//! observable effect is that of a sequential execution in arrival order,
//! while independent operations run in parallel, each on its own tokio task.
//!
//! Every submission returns a [`Future`]: a single-assignment result cell
//! that can be joined, inspected, and subscribed to.

pub mod conductor;
pub mod future;
pub mod pool;

pub use conductor::{Conductor, Operation};
pub use future::{Future, RunError, TaskError};
pub use pool::{join_all, spawn, wait_all, TaskPool};
