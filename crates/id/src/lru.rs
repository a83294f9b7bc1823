use std::{
	collections::{BTreeMap, HashMap},
	hash::Hash,
};

/// Invoked with the evicted key and value. Listeners run while the owning
/// cache is being mutated, so they must not call back into it.
pub type EvictionListener<K, V> = Box<dyn Fn(&K, &V) + Send>;

/// A bounded map that evicts its least recently used entry once it grows past
/// capacity. A capacity of zero disables eviction.
///
/// Recency is tracked with a monotonic clock per entry plus an ordered index
/// from clock tick to key, so both touch and evict-oldest stay cheap without
/// an intrusive list.
pub struct LruCache<K, V> {
	capacity: usize,
	clock: u64,
	entries: HashMap<K, Entry<V>>,
	recency: BTreeMap<u64, K>,
	listeners: Vec<EvictionListener<K, V>>,
}

struct Entry<V> {
	value: V,
	stamp: u64,
}

impl<K: Eq + Hash + Clone + Ord, V> LruCache<K, V> {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			clock: 0,
			entries: HashMap::new(),
			recency: BTreeMap::new(),
			listeners: Vec::new(),
		}
	}

	/// Inserts or replaces the entry for `key`, marking it most recently
	/// used. Evicts the oldest entry when over capacity.
	pub fn insert(&mut self, key: K, value: V) {
		self.clock += 1;
		let stamp = self.clock;

		if let Some(entry) = self.entries.get_mut(&key) {
			self.recency.remove(&entry.stamp);
			entry.value = value;
			entry.stamp = stamp;
			self.recency.insert(stamp, key);
			return;
		}

		self.recency.insert(stamp, key.clone());
		self.entries.insert(key, Entry { value, stamp });

		if self.capacity > 0 && self.entries.len() > self.capacity {
			self.evict_oldest();
		}
	}

	/// Looks up `key`, marking it most recently used on a hit.
	pub fn get(&mut self, key: &K) -> Option<&V> {
		self.clock += 1;
		let stamp = self.clock;

		let entry = self.entries.get_mut(key)?;
		self.recency.remove(&entry.stamp);
		entry.stamp = stamp;
		self.recency.insert(stamp, key.clone());

		Some(&entry.value)
	}

	pub fn remove(&mut self, key: &K) -> Option<V> {
		let entry = self.entries.remove(key)?;
		self.recency.remove(&entry.stamp);
		Some(entry.value)
	}

	pub fn clear(&mut self) {
		self.entries.clear();
		self.recency.clear();
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	#[must_use]
	pub const fn capacity(&self) -> usize {
		self.capacity
	}

	/// Registers a callback invoked whenever an entry is evicted for
	/// capacity. Removals via [`Self::remove`] and [`Self::clear`] do not
	/// notify.
	pub fn on_evict(&mut self, listener: EvictionListener<K, V>) {
		self.listeners.push(listener);
	}

	fn evict_oldest(&mut self) {
		let Some((&stamp, _)) = self.recency.iter().next() else {
			return;
		};
		let Some(key) = self.recency.remove(&stamp) else {
			return;
		};
		let Some(entry) = self.entries.remove(&key) else {
			return;
		};

		for listener in &self.listeners {
			listener(&key, &entry.value);
		}
	}
}
