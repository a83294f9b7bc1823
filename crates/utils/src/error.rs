use std::{io, path::Path, sync::Arc};

use thiserror::Error;

/// A filesystem failure annotated with the path it happened on and a short
/// static description of what was being attempted.
///
/// The underlying [`io::Error`] is held behind an [`Arc`] so the whole error
/// is `Clone`; task results can be observed by multiple waiters.
#[derive(Debug, Clone, Error)]
#[error("{context}: <path='{}'> ({source})", .path.display())]
pub struct FileIOError {
	pub path: Box<Path>,
	pub source: Arc<io::Error>,
	pub context: &'static str,
}

impl<P: AsRef<Path>> From<(P, io::Error, &'static str)> for FileIOError {
	fn from((path, source, context): (P, io::Error, &'static str)) -> Self {
		Self {
			path: path.as_ref().into(),
			source: Arc::new(source),
			context,
		}
	}
}
