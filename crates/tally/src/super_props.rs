// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Super properties: defaults merged into every tracked event.

use tally_core::{Properties, PropertyValue};

/// The registered super properties.
///
/// Plain data; the client serializes access through its state lock, so each
/// call below is atomic with respect to concurrent `track` calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuperPropertyStore {
	props: Properties,
}

impl SuperPropertyStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_properties(props: Properties) -> Self {
		Self { props }
	}

	/// Registers properties, overwriting existing keys.
	pub fn register(&mut self, props: Properties) {
		self.props.extend(props);
	}

	/// Registers properties whose key is absent, or whose current value
	/// equals `default_value` when one is given.
	///
	/// Returns how many keys were written.
	pub fn register_once(&mut self, props: Properties, default_value: Option<&PropertyValue>) -> usize {
		let mut written = 0;
		for (key, value) in props {
			let replaceable = match self.props.get(&key) {
				None => true,
				Some(current) => default_value.is_some_and(|default| current == default),
			};
			if replaceable {
				self.props.set(key, value);
				written += 1;
			}
		}
		written
	}

	/// Removes a property. Later events omit the key entirely.
	pub fn remove(&mut self, name: &str) -> bool {
		self.props.remove(name).is_some()
	}

	/// Removes several properties; unknown names are ignored.
	pub fn remove_all<I, S>(&mut self, names: I) -> usize
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		names
			.into_iter()
			.filter(|name| self.props.remove(name.as_ref()).is_some())
			.count()
	}

	pub fn clear(&mut self) {
		self.props.clear();
	}

	/// Returns a copy of the current properties.
	pub fn current(&self) -> Properties {
		self.props.clone()
	}

	pub fn is_empty(&self) -> bool {
		self.props.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn register_overwrites() {
		let mut store = SuperPropertyStore::new();
		store.register(Properties::new().insert("a", 1));
		store.register(Properties::new().insert("a", 2));
		assert_eq!(store.current().get("a"), Some(&PropertyValue::from(2)));
	}

	#[test]
	fn register_once_keeps_existing_value() {
		let mut store = SuperPropertyStore::new();
		assert_eq!(store.register_once(Properties::new().insert("a", 1), None), 1);
		assert_eq!(store.register_once(Properties::new().insert("a", 2), None), 0);
		assert_eq!(store.current().get("a"), Some(&PropertyValue::from(1)));
	}

	#[test]
	fn register_once_replaces_default_value() {
		let mut store = SuperPropertyStore::new();
		store.register_once(Properties::new().insert("a", 1), None);

		let default = PropertyValue::from(1);
		store.register_once(Properties::new().insert("a", 2), Some(&default));
		assert_eq!(store.current().get("a"), Some(&PropertyValue::from(2)));
	}

	#[test]
	fn register_once_with_other_default_keeps_value() {
		let mut store = SuperPropertyStore::new();
		store.register(Properties::new().insert("a", "x"));

		let default = PropertyValue::from("unknown");
		store.register_once(Properties::new().insert("a", "y"), Some(&default));
		assert_eq!(store.current().get("a"), Some(&PropertyValue::from("x")));
	}

	#[test]
	fn remove_deletes_keys() {
		let mut store = SuperPropertyStore::new();
		store.register(Properties::new().insert("a", 1).insert("b", 2).insert("c", 3));

		assert!(store.remove("a"));
		assert!(!store.remove("missing"));
		assert_eq!(store.remove_all(["b", "nope"]), 1);

		let current = store.current();
		assert!(!current.contains_key("a"));
		assert!(!current.contains_key("b"));
		assert!(current.contains_key("c"));
	}

	#[test]
	fn current_is_a_copy() {
		let mut store = SuperPropertyStore::new();
		store.register(Properties::new().insert("a", 1));
		let snapshot = store.current();
		store.clear();
		assert!(store.is_empty());
		assert_eq!(snapshot.len(), 1);
	}
}
