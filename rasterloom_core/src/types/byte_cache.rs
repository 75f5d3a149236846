//! A byte-budget LRU cache for raster tiles.
//!
//! `ByteCache` keeps key/value pairs within a total byte budget, evicting the
//! least-recently accessed entries when an insertion would exceed it. Entry
//! sizes are taken from the values themselves via [`ByteSized`], so large and
//! small tiles share one budget fairly.

use crate::RasterArray;
use anyhow::{Result, ensure};
use lru::LruCache;
use std::fmt::Debug;
use std::hash::Hash;

/// Values that know their in-memory payload size.
pub trait ByteSized {
	fn byte_size(&self) -> usize;
}

impl ByteSized for RasterArray {
	fn byte_size(&self) -> usize {
		RasterArray::byte_size(self)
	}
}

/// LRU cache bounded by the summed [`ByteSized::byte_size`] of its values.
///
/// A value larger than the whole budget is still admitted on its own (the
/// cache then holds exactly that one entry); the budget bounds the steady
/// state, not a single oversized tile.
///
/// # Example
/// ```
/// use rasterloom_core::{ByteCache, RasterArray, RasterDtype};
///
/// let mut cache: ByteCache<u32, RasterArray> = ByteCache::with_byte_budget(1024).unwrap();
/// cache.add(1, RasterArray::zeros(RasterDtype::U8, (8, 8, 1)));
/// assert!(cache.get(&1).is_some());
/// assert_eq!(cache.used_bytes(), 64);
/// ```
pub struct ByteCache<K: Clone + Debug + Eq + Hash, V: Clone + ByteSized> {
	cache: LruCache<K, V>,
	budget: usize,
	used: usize,
}

impl<K: Clone + Debug + Eq + Hash, V: Clone + ByteSized> ByteCache<K, V> {
	/// Creates a cache bounded by `budget` bytes of value payload.
	pub fn with_byte_budget(budget: usize) -> Result<Self> {
		ensure!(budget > 0, "cache byte budget must be positive");
		Ok(Self {
			cache: LruCache::unbounded(),
			budget,
			used: 0,
		})
	}

	/// Returns a clone of the cached value and marks it most recently used.
	pub fn get(&mut self, key: &K) -> Option<V> {
		self.cache.get(key).cloned()
	}

	/// Presence check that does not touch the LRU order.
	#[must_use]
	pub fn contains(&self, key: &K) -> bool {
		self.cache.peek(key).is_some()
	}

	/// Inserts `value`, evicting least-recently-used entries until the budget
	/// holds again. Replacing an existing key first releases its old size.
	pub fn add(&mut self, key: K, value: V) {
		if let Some(old) = self.cache.pop(&key) {
			self.used -= old.byte_size();
		}
		let size = value.byte_size();
		self.cache.put(key, value);
		self.used += size;

		while self.used > self.budget && self.cache.len() > 1 {
			if let Some((_, evicted)) = self.cache.pop_lru() {
				self.used -= evicted.byte_size();
			}
		}
	}

	/// Drops every entry.
	pub fn clear(&mut self) {
		self.cache.clear();
		self.used = 0;
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.cache.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.cache.is_empty()
	}

	/// Bytes currently held.
	#[must_use]
	pub fn used_bytes(&self) -> usize {
		self.used
	}

	/// The configured budget.
	#[must_use]
	pub fn byte_budget(&self) -> usize {
		self.budget
	}
}

impl<K: Clone + Debug + Eq + Hash, V: Clone + ByteSized> Debug for ByteCache<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ByteCache")
			.field("entries", &self.len())
			.field("used_bytes", &self.used)
			.field("byte_budget", &self.budget)
			.finish()
	}
}
