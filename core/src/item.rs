use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use contrail_id::Identifier;
use num_bigint::BigInt;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

use crate::{KEY_ID, KEY_KIND};

/// A value stored under a property name. These are the only kinds the codec
/// accepts; the enum is closed on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
	String(String),
	Timestamp(DateTime<Utc>),
	Long(i64),
	Double(f64),
	Byte(u8),
	BigInt(BigInt),
	BigRational(BigRational),
	Bool(bool),
	Id(Identifier),
	Item(Item),
	Seq(Vec<PropertyValue>),
	Map(BTreeMap<String, PropertyValue>),
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		Self::String(value.to_string())
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		Self::Long(value)
	}
}

impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		Self::Double(value)
	}
}

impl From<u8> for PropertyValue {
	fn from(value: u8) -> Self {
		Self::Byte(value)
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<DateTime<Utc>> for PropertyValue {
	fn from(value: DateTime<Utc>) -> Self {
		Self::Timestamp(value)
	}
}

impl From<BigInt> for PropertyValue {
	fn from(value: BigInt) -> Self {
		Self::BigInt(value)
	}
}

impl From<BigRational> for PropertyValue {
	fn from(value: BigRational) -> Self {
		Self::BigRational(value)
	}
}

impl From<Identifier> for PropertyValue {
	fn from(value: Identifier) -> Self {
		Self::Id(value)
	}
}

impl From<Item> for PropertyValue {
	fn from(value: Item) -> Self {
		Self::Item(value)
	}
}

impl From<Vec<PropertyValue>> for PropertyValue {
	fn from(value: Vec<PropertyValue>) -> Self {
		Self::Seq(value)
	}
}

impl From<BTreeMap<String, PropertyValue>> for PropertyValue {
	fn from(value: BTreeMap<String, PropertyValue>) -> Self {
		Self::Map(value)
	}
}

/// A storable object: a bag of named property values, split into an indexed
/// and an unindexed map. A property name lives in at most one of the two
/// maps at a time.
///
/// The reserved names [`KEY_ID`] and [`KEY_KIND`] carry the item's location
/// and kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
	indexed: BTreeMap<String, PropertyValue>,
	unindexed: BTreeMap<String, PropertyValue>,
}

impl Item {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// An item whose [`KEY_ID`] property is already set.
	#[must_use]
	pub fn with_id(id: &Identifier) -> Self {
		let mut item = Self::new();
		item.set_property(KEY_ID, id.clone());
		item
	}

	/// An item with both reserved properties set.
	#[must_use]
	pub fn of_kind(id: &Identifier, kind: &str) -> Self {
		let mut item = Self::with_id(id);
		item.set_property(KEY_KIND, kind);
		item
	}

	#[must_use]
	pub fn id(&self) -> Option<&Identifier> {
		self.get_identifier(KEY_ID)
	}

	#[must_use]
	pub fn kind(&self) -> Option<&str> {
		self.get_string(KEY_KIND)
	}

	/// Sets an indexed property, displacing any unindexed property of the
	/// same name.
	pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> &mut Self {
		self.unindexed.remove(name);
		self.indexed.insert(name.to_string(), value.into());
		self
	}

	/// Sets an unindexed property, displacing any indexed property of the
	/// same name.
	pub fn set_unindexed_property(
		&mut self,
		name: &str,
		value: impl Into<PropertyValue>,
	) -> &mut Self {
		self.indexed.remove(name);
		self.unindexed.insert(name.to_string(), value.into());
		self
	}

	pub fn remove_property(&mut self, name: &str) -> &mut Self {
		self.indexed.remove(name);
		self.unindexed.remove(name);
		self
	}

	/// True when the name is present in either map.
	#[must_use]
	pub fn has_property(&self, name: &str) -> bool {
		self.indexed.contains_key(name) || self.unindexed.contains_key(name)
	}

	/// Looks the name up in the indexed map first, then the unindexed one.
	#[must_use]
	pub fn property(&self, name: &str) -> Option<&PropertyValue> {
		self.indexed.get(name).or_else(|| self.unindexed.get(name))
	}

	/// A merged view of both maps.
	#[must_use]
	pub fn properties(&self) -> BTreeMap<&str, &PropertyValue> {
		self.unindexed
			.iter()
			.chain(self.indexed.iter())
			.map(|(name, value)| (name.as_str(), value))
			.collect()
	}

	#[must_use]
	pub const fn indexed_properties(&self) -> &BTreeMap<String, PropertyValue> {
		&self.indexed
	}

	#[must_use]
	pub const fn unindexed_properties(&self) -> &BTreeMap<String, PropertyValue> {
		&self.unindexed
	}

	#[must_use]
	pub fn get_string(&self, name: &str) -> Option<&str> {
		match self.property(name) {
			Some(PropertyValue::String(value)) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_i64(&self, name: &str) -> Option<i64> {
		match self.property(name) {
			Some(PropertyValue::Long(value)) => Some(*value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_f64(&self, name: &str) -> Option<f64> {
		match self.property(name) {
			Some(PropertyValue::Double(value)) => Some(*value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_byte(&self, name: &str) -> Option<u8> {
		match self.property(name) {
			Some(PropertyValue::Byte(value)) => Some(*value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_bool(&self, name: &str) -> Option<bool> {
		match self.property(name) {
			Some(PropertyValue::Bool(value)) => Some(*value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
		match self.property(name) {
			Some(PropertyValue::Timestamp(value)) => Some(*value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_big_int(&self, name: &str) -> Option<&BigInt> {
		match self.property(name) {
			Some(PropertyValue::BigInt(value)) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_big_rational(&self, name: &str) -> Option<&BigRational> {
		match self.property(name) {
			Some(PropertyValue::BigRational(value)) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_identifier(&self, name: &str) -> Option<&Identifier> {
		match self.property(name) {
			Some(PropertyValue::Id(value)) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_item(&self, name: &str) -> Option<&Self> {
		match self.property(name) {
			Some(PropertyValue::Item(value)) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_seq(&self, name: &str) -> Option<&[PropertyValue]> {
		match self.property(name) {
			Some(PropertyValue::Seq(value)) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn get_map(&self, name: &str) -> Option<&BTreeMap<String, PropertyValue>> {
		match self.property(name) {
			Some(PropertyValue::Map(value)) => Some(value),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn indexed_and_unindexed_are_exclusive() {
		let mut item = Item::new();
		item.set_property("name", "first");
		item.set_unindexed_property("name", "second");

		assert_eq!(item.indexed_properties().get("name"), None);
		assert_eq!(item.get_string("name"), Some("second"));

		item.set_property("name", "third");
		assert_eq!(item.unindexed_properties().get("name"), None);
		assert_eq!(item.get_string("name"), Some("third"));
	}

	#[test]
	fn has_property_checks_both_maps() {
		let mut item = Item::new();
		item.set_property("indexed", 1_i64);
		item.set_unindexed_property("unindexed", 2_i64);

		assert!(item.has_property("indexed"));
		assert!(item.has_property("unindexed"));
		assert!(!item.has_property("absent"));

		item.remove_property("indexed");
		assert!(!item.has_property("indexed"));
	}

	#[test]
	fn reserved_properties() {
		let id = Identifier::new("items/widget");
		let item = Item::of_kind(&id, "widget");
		assert_eq!(item.id(), Some(&id));
		assert_eq!(item.kind(), Some("widget"));
	}

	#[test]
	fn typed_getters_reject_other_kinds() {
		let mut item = Item::new();
		item.set_property("n", 1_i64);
		assert_eq!(item.get_i64("n"), Some(1));
		assert_eq!(item.get_string("n"), None);
		assert_eq!(item.get_bool("n"), None);
	}

	#[test]
	fn merged_view_prefers_indexed() {
		let mut item = Item::new();
		item.set_unindexed_property("a", 1_i64);
		item.set_property("b", 2_i64);

		let merged = item.properties();
		assert_eq!(merged.len(), 2);
		assert_eq!(merged["a"], &PropertyValue::Long(1));
		assert_eq!(merged["b"], &PropertyValue::Long(2));
	}
}
