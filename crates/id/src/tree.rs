use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::Identifier;

/// An in-memory tree of values keyed by [`Identifier`], with point lookup and
/// subtree visitation. Thread-safe; every operation serialises on one
/// internal mutex.
///
/// Interior nodes are materialised on demand with no content and removed
/// again once their last content-bearing descendant is deleted, so the tree
/// only ever holds paths that lead somewhere.
///
/// Visitor callbacks run while the internal mutex is held: they must not call
/// back into the same tree.
pub struct IdTree<V> {
	inner: Mutex<TreeInner<V>>,
}

struct TreeInner<V> {
	nodes: HashMap<String, Node<V>>,
}

struct Node<V> {
	id: Identifier,
	content: Option<V>,
	/// Full paths of direct children, ordered for deterministic traversal.
	children: BTreeSet<String>,
}

impl<V> Default for IdTree<V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<V: Clone> Clone for IdTree<V> {
	fn clone(&self) -> Self {
		let inner = self.lock();
		Self {
			inner: Mutex::new(TreeInner {
				nodes: inner
					.nodes
					.iter()
					.map(|(path, node)| {
						(
							path.clone(),
							Node {
								id: node.id.clone(),
								content: node.content.clone(),
								children: node.children.clone(),
							},
						)
					})
					.collect(),
			}),
		}
	}
}

impl<V> IdTree<V> {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(TreeInner {
				nodes: HashMap::new(),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, TreeInner<V>> {
		self.inner.lock().expect("IdTree mutex poisoned")
	}

	pub fn store(&self, id: &Identifier, content: V) {
		let mut inner = self.lock();
		inner.ensure_node(id);
		if let Some(node) = inner.nodes.get_mut(id.path()) {
			node.content = Some(content);
		}
	}

	/// True when a node exists at `id`, whether content-bearing or an
	/// interior placeholder.
	#[must_use]
	pub fn exists(&self, id: &Identifier) -> bool {
		self.lock().nodes.contains_key(id.path())
	}

	/// Removes the content at `id`. A node left with neither content nor
	/// children is removed, and the removal cascades upward through
	/// placeholder ancestors.
	pub fn delete(&self, id: &Identifier) {
		self.lock().delete_path(id.path());
	}

	pub fn delete_all(&self, ids: &[Identifier]) {
		let mut inner = self.lock();
		for id in ids.iter().rev() {
			inner.delete_path(id.path());
		}
	}

	pub fn clear(&self) {
		self.lock().nodes.clear();
	}

	/// Identifiers of every content-bearing node.
	#[must_use]
	pub fn list_all(&self) -> Vec<Identifier> {
		self.lock()
			.nodes
			.values()
			.filter(|node| node.content.is_some())
			.map(|node| node.id.clone())
			.collect()
	}

	/// Number of content-bearing nodes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.lock()
			.nodes
			.values()
			.filter(|node| node.content.is_some())
			.count()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Visits the content at `id`, if any.
	pub fn visit_node(&self, id: &Identifier, mut visitor: impl FnMut(&Identifier, &V)) {
		let inner = self.lock();
		if let Some(node) = inner.nodes.get(id.path()) {
			if let Some(content) = &node.content {
				visitor(&node.id, content);
			}
		}
	}

	/// Visits the content of each ancestor of `id`, nearest first. The node
	/// at `id` itself is not visited, and need not exist.
	pub fn visit_parents(&self, id: &Identifier, mut visitor: impl FnMut(&Identifier, &V)) {
		let inner = self.lock();
		for ancestor in id.ancestors().iter().rev() {
			if let Some(node) = inner.nodes.get(ancestor.path()) {
				if let Some(content) = &node.content {
					visitor(&node.id, content);
				}
			}
		}
	}

	/// Visits the content of each direct child of `id`.
	pub fn visit_children(&self, id: &Identifier, mut visitor: impl FnMut(&Identifier, &V)) {
		let inner = self.lock();
		let Some(node) = inner.nodes.get(id.path()) else {
			return;
		};
		for child in &node.children {
			if let Some(child_node) = inner.nodes.get(child) {
				if let Some(content) = &child_node.content {
					visitor(&child_node.id, content);
				}
			}
		}
	}

	/// Visits the content of every descendant of `id`, breadth-first. The
	/// node at `id` itself is not visited.
	pub fn visit_descendents(&self, id: &Identifier, mut visitor: impl FnMut(&Identifier, &V)) {
		let inner = self.lock();
		let Some(node) = inner.nodes.get(id.path()) else {
			return;
		};

		let mut todo: VecDeque<&String> = node.children.iter().collect();
		while let Some(path) = todo.pop_front() {
			if let Some(node) = inner.nodes.get(path) {
				if let Some(content) = &node.content {
					visitor(&node.id, content);
				}
				todo.extend(node.children.iter());
			}
		}
	}
}

impl<V: Clone> IdTree<V> {
	#[must_use]
	pub fn fetch(&self, id: &Identifier) -> Option<V> {
		self.lock()
			.nodes
			.get(id.path())
			.and_then(|node| node.content.clone())
	}

	/// Content of every content-bearing node.
	#[must_use]
	pub fn values(&self) -> Vec<V> {
		self.lock()
			.nodes
			.values()
			.filter_map(|node| node.content.clone())
			.collect()
	}

	/// Returns a new tree holding the found content for each of `ids`.
	#[must_use]
	pub fn fetch_all(&self, ids: &[Identifier]) -> Self {
		let found = Self::new();
		{
			let inner = self.lock();
			for id in ids {
				if let Some(content) =
					inner.nodes.get(id.path()).and_then(|node| node.content.as_ref())
				{
					found.store(id, content.clone());
				}
			}
		}
		found
	}

	/// Returns a new tree holding the content of each direct child of `id`.
	#[must_use]
	pub fn fetch_children(&self, id: &Identifier) -> Self {
		let found = Self::new();
		self.visit_children(id, |child, content| found.store(child, content.clone()));
		found
	}

	/// Returns a new tree holding the content of every descendant of `id`.
	#[must_use]
	pub fn fetch_descendents(&self, id: &Identifier) -> Self {
		let found = Self::new();
		self.visit_descendents(id, |descendant, content| {
			found.store(descendant, content.clone());
		});
		found
	}
}

impl<V> TreeInner<V> {
	fn ensure_node(&mut self, id: &Identifier) {
		if self.nodes.contains_key(id.path()) {
			return;
		}

		self.nodes.insert(
			id.path().to_string(),
			Node {
				id: id.clone(),
				content: None,
				children: BTreeSet::new(),
			},
		);

		if let Some(parent) = id.parent() {
			self.ensure_node(&parent);
			if let Some(parent_node) = self.nodes.get_mut(parent.path()) {
				parent_node.children.insert(id.path().to_string());
			}
		}
	}

	fn delete_path(&mut self, path: &str) {
		let Some(node) = self.nodes.get_mut(path) else {
			return;
		};
		node.content = None;
		if !node.children.is_empty() {
			return;
		}

		// Remove the now-empty node and walk up, pruning placeholder
		// ancestors left without children.
		let mut current = path.to_string();
		loop {
			let Some(node) = self.nodes.remove(&current) else {
				break;
			};
			let Some(parent) = node.id.parent() else {
				break;
			};
			let Some(parent_node) = self.nodes.get_mut(parent.path()) else {
				break;
			};
			parent_node.children.remove(&current);
			if parent_node.content.is_some() || !parent_node.children.is_empty() {
				break;
			}
			current = parent.path().to_string();
		}
	}
}
