use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::{Identifier, IdTree, LruCache};

/// An [`IdTree`] bounded by an LRU policy: every access touches the
/// identifier, and once more than `capacity` identifiers are live the least
/// recently used one is deleted from the tree. A capacity of zero leaves the
/// tree unbounded.
pub struct LruIdTree<V> {
	tree: Arc<IdTree<V>>,
	recent: Mutex<LruCache<String, Identifier>>,
}

impl<V: Send + Sync + 'static> LruIdTree<V> {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let tree = Arc::new(IdTree::new());

		let mut recent = LruCache::new(capacity);
		let weak: Weak<IdTree<V>> = Arc::downgrade(&tree);
		recent.on_evict(Box::new(move |_path: &String, id: &Identifier| {
			if let Some(tree) = weak.upgrade() {
				tree.delete(id);
			}
		}));

		Self {
			tree,
			recent: Mutex::new(recent),
		}
	}

	fn recent(&self) -> MutexGuard<'_, LruCache<String, Identifier>> {
		self.recent.lock().expect("LruIdTree recency mutex poisoned")
	}

	fn touch(&self, id: &Identifier) {
		self.recent().insert(id.path().to_string(), id.clone());
	}

	pub fn store(&self, id: &Identifier, content: V) {
		self.tree.store(id, content);
		self.touch(id);
	}

	#[must_use]
	pub fn exists(&self, id: &Identifier) -> bool {
		self.touch(id);
		self.tree.exists(id)
	}

	pub fn delete(&self, id: &Identifier) {
		self.recent().remove(&id.path().to_string());
		self.tree.delete(id);
	}

	pub fn delete_all(&self, ids: &[Identifier]) {
		let mut recent = self.recent();
		for id in ids {
			recent.remove(&id.path().to_string());
		}
		drop(recent);
		self.tree.delete_all(ids);
	}

	pub fn clear(&self) {
		self.recent().clear();
		self.tree.clear();
	}

	#[must_use]
	pub fn list_all(&self) -> Vec<Identifier> {
		self.tree.list_all()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.tree.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.tree.is_empty()
	}
}

impl<V: Clone + Send + Sync + 'static> LruIdTree<V> {
	#[must_use]
	pub fn fetch(&self, id: &Identifier) -> Option<V> {
		self.touch(id);
		self.tree.fetch(id)
	}

	#[must_use]
	pub fn values(&self) -> Vec<V> {
		self.tree.values()
	}

	#[must_use]
	pub fn fetch_all(&self, ids: &[Identifier]) -> IdTree<V> {
		for id in ids {
			self.touch(id);
		}
		self.tree.fetch_all(ids)
	}

	#[must_use]
	pub fn fetch_children(&self, id: &Identifier) -> IdTree<V> {
		self.touch(id);
		let children = self.tree.fetch_children(id);
		for child in children.list_all() {
			self.touch(&child);
		}
		children
	}

	#[must_use]
	pub fn fetch_descendents(&self, id: &Identifier) -> IdTree<V> {
		self.touch(id);
		let descendents = self.tree.fetch_descendents(id);
		for descendent in descendents.list_all() {
			self.touch(&descendent);
		}
		descendents
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(path: &str) -> Identifier {
		Identifier::new(path)
	}

	#[test]
	fn eviction_deletes_from_the_tree() {
		let tree = LruIdTree::new(2);
		tree.store(&id("lt1/a"), 1);
		tree.store(&id("lt1/b"), 2);
		tree.store(&id("lt1/c"), 3);

		assert_eq!(tree.fetch(&id("lt1/a")), None, "oldest entry evicted");
		assert_eq!(tree.fetch(&id("lt1/b")), Some(2));
		assert_eq!(tree.fetch(&id("lt1/c")), Some(3));
	}

	#[test]
	fn fetch_refreshes_recency() {
		let tree = LruIdTree::new(2);
		tree.store(&id("lt2/a"), 1);
		tree.store(&id("lt2/b"), 2);

		assert_eq!(tree.fetch(&id("lt2/a")), Some(1));
		tree.store(&id("lt2/c"), 3);

		assert_eq!(tree.fetch(&id("lt2/a")), Some(1));
		assert_eq!(tree.fetch(&id("lt2/b")), None);
	}

	#[test]
	fn unbounded_when_capacity_is_zero() {
		let tree = LruIdTree::new(0);
		for n in 0..64 {
			tree.store(&id(&format!("lt3/{n}")), n);
		}
		assert_eq!(tree.len(), 64);
	}
}
