use std::{
	cmp::Ordering,
	fmt,
	hash::{Hash, Hasher},
	sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::lru::LruCache;

/// Bound on the process-wide intern table. Evicted paths are re-interned on
/// the next [`Identifier::new`], producing a value equal by path but not by
/// instance.
pub const INTERN_CAPACITY: usize = 1000;

static INTERN: Lazy<Mutex<LruCache<String, Identifier>>> =
	Lazy::new(|| Mutex::new(LruCache::new(INTERN_CAPACITY)));

/// Names a location in a hierarchy of stored objects.
///
/// A path is a `/`-separated sequence of names with leading and trailing
/// slashes trimmed; a name never contains `/`. Identifiers are interned:
/// while a path is resident in the intern table, every [`Identifier::new`]
/// for it yields the same instance. Because the table is bounded, equality,
/// ordering and hashing are defined over the path rather than the instance,
/// so holders are unaffected by eviction.
#[derive(Clone)]
pub struct Identifier(Arc<Inner>);

struct Inner {
	path: String,
	name: String,
	/// Root first, immediate parent last.
	ancestors: Vec<Identifier>,
}

impl Identifier {
	/// Returns the interned identifier for `path`.
	pub fn new(path: impl AsRef<str>) -> Self {
		let trimmed = path.as_ref().trim_matches('/');

		let mut table = INTERN
			.lock()
			.expect("identifier intern table mutex poisoned");

		if let Some(found) = table.get(&trimmed.to_string()) {
			return found.clone();
		}

		// Build the whole ancestor chain under the same lock so a partially
		// interned chain is never observable.
		let mut parent: Option<Self> = None;
		for end in segment_ends(trimmed) {
			let prefix = &trimmed[..end];

			let id = if let Some(found) = table.get(&prefix.to_string()) {
				found.clone()
			} else {
				let name = prefix
					.rsplit('/')
					.next()
					.unwrap_or(prefix)
					.to_string();
				let ancestors = parent.as_ref().map_or_else(Vec::new, |p| {
					let mut chain = p.ancestors().to_vec();
					chain.push(p.clone());
					chain
				});
				let id = Self(Arc::new(Inner {
					path: prefix.to_string(),
					name,
					ancestors,
				}));
				table.insert(prefix.to_string(), id.clone());
				id
			};

			parent = Some(id);
		}

		parent.expect("a trimmed path always yields at least one segment")
	}

	/// Returns an identifier with a random UUID for the path.
	#[must_use]
	pub fn unique() -> Self {
		Self::new(Uuid::new_v4().to_string())
	}

	#[must_use]
	pub fn path(&self) -> &str {
		&self.0.path
	}

	/// The last segment of the path.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.0.name
	}

	/// Ancestors from the root down to the immediate parent.
	#[must_use]
	pub fn ancestors(&self) -> &[Self] {
		&self.0.ancestors
	}

	#[must_use]
	pub fn parent(&self) -> Option<Self> {
		self.0.ancestors.last().cloned()
	}

	/// Returns the interned identifier for `<self>/<name>`.
	#[must_use]
	pub fn child(&self, name: &str) -> Self {
		if self.0.path.is_empty() {
			Self::new(name)
		} else {
			Self::new(format!("{}/{name}", self.0.path))
		}
	}

	#[must_use]
	pub fn is_ancestor_of(&self, other: &Self) -> bool {
		other.0.ancestors.iter().any(|ancestor| ancestor == self)
	}

	/// True when both values are the same interned instance. Equality by
	/// path survives intern-table eviction; instance identity does not.
	#[must_use]
	pub fn is_same_instance(a: &Self, b: &Self) -> bool {
		Arc::ptr_eq(&a.0, &b.0)
	}
}

/// Byte offsets of each segment boundary in `path`, ending with the full
/// length, so `&path[..end]` enumerates the prefix chain root-first.
fn segment_ends(path: &str) -> impl Iterator<Item = usize> + '_ {
	path.match_indices('/')
		.map(|(at, _)| at)
		.chain(std::iter::once(path.len()))
}

impl PartialEq for Identifier {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0) || self.0.path == other.0.path
	}
}

impl Eq for Identifier {}

impl Hash for Identifier {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.path.hash(state);
	}
}

impl PartialOrd for Identifier {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Identifier {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.path.cmp(&other.0.path)
	}
}

impl fmt::Display for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0.path)
	}
}

impl fmt::Debug for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Identifier({})", self.0.path)
	}
}

impl Serialize for Identifier {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0.path)
	}
}

impl<'de> Deserialize<'de> for Identifier {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct PathVisitor;

		impl de::Visitor<'_> for PathVisitor {
			type Value = Identifier;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("an identifier path")
			}

			fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
				Ok(Identifier::new(v))
			}
		}

		deserializer.deserialize_str(PathVisitor)
	}
}
