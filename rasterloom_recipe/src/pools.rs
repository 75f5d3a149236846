//! Named worker pools.
//!
//! A [`WorkerPool`] is a named, bounded lane of blocking work: a semaphore of
//! `size` permits over `tokio::task::spawn_blocking`. The scheduler never
//! blocks on a pool: tasks acquire a permit, run the closure on the blocking
//! pool, and post their result back.
//!
//! The per-role pool specification of a recipe resolves to a [`PoolHandle`]:
//! a registry pool looked up by name, a caller-owned pool, or
//! [`PoolHandle::Inline`], which runs the closure directly on the calling
//! task.

use anyhow::{Result, bail, ensure};
use rasterloom_core::ErrorKind;
use rasterloom_derive::context;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default pool names created lazily by the registry.
pub const POOL_CPU: &str = "cpu";
pub const POOL_IO: &str = "io";

/// A bounded lane of blocking work.
pub struct WorkerPool {
	name: String,
	size: usize,
	semaphore: Arc<Semaphore>,
}

impl WorkerPool {
	pub fn new(name: &str, size: usize) -> Result<Arc<WorkerPool>> {
		ensure!(
			size >= 1,
			ErrorKind::BadArgument(format!("pool '{name}' needs at least one worker"))
		);
		Ok(Arc::new(WorkerPool {
			name: name.to_string(),
			size,
			semaphore: Arc::new(Semaphore::new(size)),
		}))
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn size(&self) -> usize {
		self.size
	}

	/// Runs `work` on the blocking pool, bounded by this pool's permits.
	/// A panicking closure surfaces as [`ErrorKind::ProducerError`].
	pub async fn run<T: Send + 'static>(&self, work: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
		let permit = self
			.semaphore
			.acquire()
			.await
			.map_err(|_| ErrorKind::Closed)?;
		let result = tokio::task::spawn_blocking(work).await;
		drop(permit);
		match result {
			Ok(result) => result,
			Err(join_err) => bail!(ErrorKind::ProducerError(format!(
				"task on pool '{}' panicked: {join_err}",
				self.name
			))),
		}
	}

	/// Waits until every permit is idle; used while draining at close.
	pub async fn join(&self) {
		if let Ok(all) = self.semaphore.acquire_many(self.size as u32).await {
			drop(all);
		}
	}
}

impl Debug for WorkerPool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerPool")
			.field("name", &self.name)
			.field("size", &self.size)
			.finish()
	}
}

/// The resolved pool of one recipe role.
#[derive(Clone, Debug, Default)]
pub enum PoolHandle {
	/// Run the closure directly on the calling task.
	#[default]
	Inline,
	Pool(Arc<WorkerPool>),
}

impl PoolHandle {
	pub async fn run<T: Send + 'static>(&self, work: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
		match self {
			PoolHandle::Inline => work(),
			PoolHandle::Pool(pool) => pool.run(work).await,
		}
	}
}

/// Per-role pool specification, as accepted by the recipe constructors.
#[derive(Clone, Debug, Default)]
pub enum PoolSpec {
	/// A registry pool by name (`"cpu"`, `"io"`, or user-registered).
	Named(String),
	/// A caller-owned pool.
	Owned(Arc<WorkerPool>),
	/// The `None` sentinel: execute inline.
	#[default]
	Inline,
}

impl PoolSpec {
	#[must_use]
	pub fn named(name: &str) -> PoolSpec {
		PoolSpec::Named(name.to_string())
	}
}

/// Registry of named pools; defaults are created lazily on first resolve.
pub struct PoolRegistry {
	pools: parking_lot::Mutex<HashMap<String, Arc<WorkerPool>>>,
}

impl PoolRegistry {
	#[must_use]
	pub fn new() -> PoolRegistry {
		PoolRegistry {
			pools: parking_lot::Mutex::new(HashMap::new()),
		}
	}

	/// Registers a user pool under its name.
	#[context("registering worker pool")]
	pub fn register(&self, pool: Arc<WorkerPool>) -> Result<()> {
		let mut pools = self.pools.lock();
		ensure!(
			!pools.contains_key(pool.name()),
			ErrorKind::DuplicateKey(pool.name().to_string())
		);
		pools.insert(pool.name().to_string(), pool);
		Ok(())
	}

	/// Resolves a spec to a handle, creating the lazy defaults on demand.
	#[context("resolving worker pool specification {spec:?}")]
	pub fn resolve(&self, spec: &PoolSpec) -> Result<PoolHandle> {
		match spec {
			PoolSpec::Inline => Ok(PoolHandle::Inline),
			PoolSpec::Owned(pool) => Ok(PoolHandle::Pool(Arc::clone(pool))),
			PoolSpec::Named(name) => {
				let mut pools = self.pools.lock();
				if let Some(pool) = pools.get(name) {
					return Ok(PoolHandle::Pool(Arc::clone(pool)));
				}
				let cpus = num_cpus::get().max(1);
				let pool = match name.as_str() {
					POOL_CPU => WorkerPool::new(POOL_CPU, cpus)?,
					POOL_IO => WorkerPool::new(POOL_IO, cpus * 3)?,
					_ => bail!(ErrorKind::UnknownKey(name.clone())),
				};
				pools.insert(name.clone(), Arc::clone(&pool));
				Ok(PoolHandle::Pool(pool))
			}
		}
	}

	/// Joins every pool; part of the registry close order.
	pub async fn join_all(&self) {
		let pools: Vec<_> = self.pools.lock().values().cloned().collect();
		for pool in pools {
			pool.join().await;
		}
	}
}

impl Default for PoolRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for PoolRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let names: Vec<String> = self.pools.lock().keys().cloned().collect();
		f.debug_struct("PoolRegistry").field("pools", &names).finish()
	}
}
