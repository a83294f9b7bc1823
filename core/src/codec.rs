//! The entity codec: [`Item`] to bytes and back, via MessagePack.
//!
//! Property maps are ordered, so encoding is canonical: any byte string
//! produced by [`serialize`] re-encodes to itself after a round trip.

use crate::{Error, Item, Result};

pub fn serialize(item: &Item) -> Result<Vec<u8>> {
	rmp_serde::to_vec(item).map_err(|e| Error::Codec(e.to_string()))
}

pub fn deserialize(bytes: &[u8]) -> Result<Item> {
	rmp_serde::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
}
