// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helper for building event and profile properties.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::property::{PropertyValue, ValidationMode};

/// An ordered mapping of property names to values.
///
/// Keys are kept sorted so a snapshot re-serializes to identical bytes.
///
/// # Example
///
/// ```
/// use tally_core::Properties;
///
/// let props = Properties::new()
///     .insert("button_name", "checkout")
///     .insert("page", "/cart")
///     .insert("price", 99.99)
///     .insert("is_premium", true);
/// assert_eq!(props.len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
	inner: BTreeMap<String, PropertyValue>,
}

impl Properties {
	/// Creates a new empty Properties builder.
	pub fn new() -> Self {
		Self {
			inner: BTreeMap::new(),
		}
	}

	/// Inserts a key-value pair into the properties.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<PropertyValue>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Inserts an arbitrary serializable value, converting it under `mode`.
	///
	/// # Panics
	///
	/// Panics in [`ValidationMode::Strict`] when the value is outside the
	/// property domain.
	pub fn insert_serialized<K, V>(mut self, key: K, value: &V, mode: ValidationMode) -> Self
	where
		K: Into<String>,
		V: Serialize + fmt::Debug + ?Sized,
	{
		let key = key.into();
		let value = PropertyValue::convert(value, mode).into_value(&key);
		self.inner.insert(key, value);
		self
	}

	/// Sets a value in place, returning the previous one.
	pub fn set<K, V>(&mut self, key: K, value: V) -> Option<PropertyValue>
	where
		K: Into<String>,
		V: Into<PropertyValue>,
	{
		self.inner.insert(key.into(), value.into())
	}

	/// Merges another Properties into this one.
	///
	/// If both contain the same key, the value from `other` takes precedence.
	pub fn merge(mut self, other: Properties) -> Self {
		self.extend(other);
		self
	}

	/// Copies every entry of `other` over this one.
	pub fn extend(&mut self, other: Properties) {
		self.inner.extend(other.inner);
	}

	pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
		self.inner.remove(key)
	}

	pub fn clear(&mut self) {
		self.inner.clear();
	}

	/// Returns true if the properties are empty.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Returns the number of properties.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Gets a value by key.
	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.inner.get(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.inner.contains_key(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
		self.inner.iter()
	}

	pub fn keys(&self) -> impl Iterator<Item = &String> {
		self.inner.keys()
	}

	/// Renders the properties as a JSON object in the collector's format.
	pub fn to_wire(&self) -> serde_json::Map<String, serde_json::Value> {
		self
			.inner
			.iter()
			.map(|(k, v)| (k.clone(), v.to_wire()))
			.collect()
	}

	pub fn into_inner(self) -> BTreeMap<String, PropertyValue> {
		self.inner
	}
}

impl From<BTreeMap<String, PropertyValue>> for Properties {
	fn from(inner: BTreeMap<String, PropertyValue>) -> Self {
		Self { inner }
	}
}

impl From<Properties> for PropertyValue {
	fn from(props: Properties) -> Self {
		PropertyValue::Map(props.inner)
	}
}

impl<K, V> FromIterator<(K, V)> for Properties
where
	K: Into<String>,
	V: Into<PropertyValue>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			inner: iter
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		}
	}
}

impl IntoIterator for Properties {
	type Item = (String, PropertyValue);
	type IntoIter = std::collections::btree_map::IntoIter<String, PropertyValue>;

	fn into_iter(self) -> Self::IntoIter {
		self.inner.into_iter()
	}
}
