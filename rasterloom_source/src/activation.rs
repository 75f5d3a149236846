//! The driver activation pool: a bounded LRU over live native handles.
//!
//! Opening a native dataset is expensive and file descriptors are finite, so
//! activatable sources do not own their driver object. They hold a `uid` and
//! an allocator closure; every read/write acquires a [`DriverLease`] from the
//! pool, which opens the driver lazily, evicts the least-recently-released
//! idle driver under pressure, and serializes concurrent acquires of the
//! same uid.
//!
//! All bookkeeping lives behind one mutex; waiting (same-uid contention,
//! pool exhaustion, deactivation of a leased driver) goes through a
//! [`Notify`] so the pool composes with async callers.

use crate::{RasterDriver, VectorDriver};
use anyhow::{Context, Result, ensure};
use rasterloom_core::ErrorKind;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// A live native handle, raster or vector.
pub enum DriverObject {
	Raster(Box<dyn RasterDriver>),
	Vector(Box<dyn VectorDriver>),
}

impl std::fmt::Debug for DriverObject {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DriverObject::Raster(_) => write!(f, "DriverObject::Raster"),
			DriverObject::Vector(_) => write!(f, "DriverObject::Vector"),
		}
	}
}

impl DriverObject {
	pub fn as_raster(&mut self) -> Result<&mut dyn RasterDriver> {
		match self {
			DriverObject::Raster(driver) => Ok(driver.as_mut()),
			DriverObject::Vector(_) => Err(ErrorKind::BadArgument("driver object is a vector driver".to_string()).into()),
		}
	}

	pub fn as_vector(&mut self) -> Result<&mut dyn VectorDriver> {
		match self {
			DriverObject::Vector(driver) => Ok(driver.as_mut()),
			DriverObject::Raster(_) => Err(ErrorKind::BadArgument("driver object is a raster driver".to_string()).into()),
		}
	}
}

/// Allocates a fresh driver object for a source; invoked by the pool on
/// (re-)activation.
pub type DriverAllocator = Arc<dyn Fn() -> Result<DriverObject> + Send + Sync>;

struct Entry {
	/// `None` while the driver is out on a lease (or being allocated).
	driver: Option<DriverObject>,
	leased: bool,
}

#[derive(Default)]
struct PoolState {
	entries: HashMap<Uuid, Entry>,
	/// Idle uids ordered by release time: front = least recently released.
	idle_order: Vec<Uuid>,
}

enum Step {
	Lease(DriverObject),
	Allocate,
	Wait,
}

/// Bounded LRU pool of live driver objects.
pub struct ActivationPool {
	max_active: Option<usize>,
	state: parking_lot::Mutex<PoolState>,
	changed: Notify,
}

impl ActivationPool {
	/// `max_active = None` leaves the pool unbounded.
	pub fn new(max_active: Option<usize>) -> Result<Arc<ActivationPool>> {
		ensure!(
			max_active != Some(0),
			ErrorKind::BadArgument("max_active must be at least 1".to_string())
		);
		Ok(Arc::new(ActivationPool {
			max_active,
			state: parking_lot::Mutex::new(PoolState::default()),
			changed: Notify::new(),
		}))
	}

	/// Acquires the driver of `uid`, allocating or reactivating it if needed.
	///
	/// Waits when the same uid is already leased, or when the pool is full of
	/// leased drivers. Under pressure the least-recently-released idle driver
	/// is deactivated first.
	pub async fn acquire(self: &Arc<Self>, uid: Uuid, allocator: &DriverAllocator) -> Result<DriverLease> {
		loop {
			let mut notified = pin!(self.changed.notified());
			notified.as_mut().enable();

			let step = {
				let mut state = self.state.lock();
				if let Some(entry) = state.entries.get_mut(&uid) {
					if entry.leased {
						Step::Wait
					} else {
						let driver = entry.driver.take();
						entry.leased = true;
						state.idle_order.retain(|u| u != &uid);
						match driver {
							Some(driver) => Step::Lease(driver),
							// reserved slot without driver cannot be unleased
							None => Step::Allocate,
						}
					}
				} else if self.max_active.is_some_and(|max| state.entries.len() >= max) {
					if let Some(lru) = state.idle_order.first().copied() {
						state.idle_order.remove(0);
						state.entries.remove(&lru);
						log::debug!("activation pool: deactivated LRU driver {lru}");
						state.entries.insert(
							uid,
							Entry {
								driver: None,
								leased: true,
							},
						);
						Step::Allocate
					} else {
						Step::Wait
					}
				} else {
					state.entries.insert(
						uid,
						Entry {
							driver: None,
							leased: true,
						},
					);
					Step::Allocate
				}
			};

			match step {
				Step::Lease(driver) => {
					return Ok(DriverLease {
						pool: Arc::clone(self),
						uid,
						driver: Some(driver),
						discard: false,
					});
				}
				Step::Allocate => match allocator() {
					Ok(driver) => {
						log::debug!("activation pool: activated driver {uid}");
						return Ok(DriverLease {
							pool: Arc::clone(self),
							uid,
							driver: Some(driver),
							discard: false,
						});
					}
					Err(err) => {
						let mut state = self.state.lock();
						state.entries.remove(&uid);
						drop(state);
						self.changed.notify_waiters();
						return Err(err).context("allocating driver object");
					}
				},
				Step::Wait => notified.await,
			}
		}
	}

	/// Deactivates one source, blocking while its driver is out on a lease.
	pub async fn deactivate(&self, uid: Uuid) {
		loop {
			let mut notified = pin!(self.changed.notified());
			notified.as_mut().enable();
			{
				let mut state = self.state.lock();
				match state.entries.get(&uid) {
					None => return,
					Some(entry) if entry.leased => {}
					Some(_) => {
						state.entries.remove(&uid);
						state.idle_order.retain(|u| u != &uid);
						drop(state);
						self.changed.notify_waiters();
						return;
					}
				}
			}
			notified.await;
		}
	}

	/// Deactivates every source, blocking until outstanding leases return.
	pub async fn deactivate_all(&self) {
		loop {
			let mut notified = pin!(self.changed.notified());
			notified.as_mut().enable();
			{
				let mut state = self.state.lock();
				if state.entries.values().all(|e| !e.leased) {
					state.entries.clear();
					state.idle_order.clear();
					drop(state);
					self.changed.notify_waiters();
					return;
				}
			}
			notified.await;
		}
	}

	/// Activates every listed source; on return all of them are live.
	///
	/// # Errors
	/// `TooMany` when the list exceeds `max_active`.
	pub async fn activate_all(self: &Arc<Self>, sources: &[(Uuid, DriverAllocator)]) -> Result<()> {
		if let Some(max) = self.max_active {
			ensure!(
				sources.len() <= max,
				ErrorKind::TooMany {
					requested: sources.len(),
					max_active: max,
				}
			);
		}
		for (uid, allocator) in sources {
			if !self.is_active(*uid) {
				drop(self.acquire(*uid, allocator).await?);
			}
		}
		Ok(())
	}

	/// Number of live driver objects (leased or idle).
	#[must_use]
	pub fn active_count(&self) -> usize {
		self.state.lock().entries.len()
	}

	#[must_use]
	pub fn is_active(&self, uid: Uuid) -> bool {
		self.state.lock().entries.contains_key(&uid)
	}

	fn release(&self, uid: Uuid, driver: Option<DriverObject>, discard: bool) {
		{
			let mut state = self.state.lock();
			if discard {
				state.entries.remove(&uid);
				state.idle_order.retain(|u| u != &uid);
			} else if let Some(entry) = state.entries.get_mut(&uid) {
				entry.driver = driver;
				entry.leased = false;
				state.idle_order.push(uid);
			}
		}
		self.changed.notify_waiters();
	}
}

impl std::fmt::Debug for ActivationPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ActivationPool")
			.field("max_active", &self.max_active)
			.field("active_count", &self.active_count())
			.finish()
	}
}

/// Scoped lease of one driver object; returning it to the pool (at MRU
/// position) happens on drop.
pub struct DriverLease {
	pool: Arc<ActivationPool>,
	uid: Uuid,
	driver: Option<DriverObject>,
	discard: bool,
}

impl DriverLease {
	/// The leased driver object.
	pub fn driver(&mut self) -> &mut DriverObject {
		self.driver.as_mut().expect("driver is present until drop")
	}

	/// Drops the driver instead of returning it to the pool; used after
	/// deleting the underlying dataset.
	pub fn discard(mut self) {
		self.discard = true;
	}
}

impl Drop for DriverLease {
	fn drop(&mut self) {
		let driver = if self.discard { None } else { self.driver.take() };
		self.pool.release(self.uid, driver, self.discard);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{RasterDriverInfo, drivers::RasterDriver};
	use rasterloom_core::{BandSchema, Footprint, RasterArray, RasterDtype};
	use std::ops::Range;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct FakeDriver {
		info: RasterDriverInfo,
	}

	impl RasterDriver for FakeDriver {
		fn info(&self) -> &RasterDriverInfo {
			&self.info
		}

		fn read_window(&mut self, _window: (Range<usize>, Range<usize>), bands: &[usize]) -> Result<RasterArray> {
			Ok(RasterArray::zeros(RasterDtype::U8, (1, 1, bands.len())))
		}

		fn write_window(&mut self, _origin: (usize, usize), _bands: &[usize], _data: &RasterArray) -> Result<()> {
			Ok(())
		}

		fn fill(&mut self, _value: f64, _bands: &[usize]) -> Result<()> {
			Ok(())
		}

		fn delete(&mut self) -> Result<()> {
			Ok(())
		}
	}

	fn fake_allocator(counter: Arc<AtomicUsize>) -> DriverAllocator {
		Arc::new(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(DriverObject::Raster(Box::new(FakeDriver {
				info: RasterDriverInfo {
					footprint: Footprint::north_up((0.0, 0.0), (1.0, 1.0), (4, 4)).unwrap(),
					dtype: RasterDtype::U8,
					band_count: 1,
					band_schema: BandSchema::all_default(1),
					sr_stored: None,
				},
			})))
		})
	}

	#[tokio::test]
	async fn acquire_allocates_lazily_and_reuses() {
		let pool = ActivationPool::new(Some(2)).unwrap();
		let allocations = Arc::new(AtomicUsize::new(0));
		let alloc = fake_allocator(allocations.clone());
		let uid = Uuid::new_v4();

		assert_eq!(pool.active_count(), 0);
		drop(pool.acquire(uid, &alloc).await.unwrap());
		drop(pool.acquire(uid, &alloc).await.unwrap());
		assert_eq!(allocations.load(Ordering::SeqCst), 1);
		assert_eq!(pool.active_count(), 1);
	}

	#[tokio::test]
	async fn lru_eviction_under_pressure() {
		let pool = ActivationPool::new(Some(2)).unwrap();
		let allocations = Arc::new(AtomicUsize::new(0));
		let alloc = fake_allocator(allocations.clone());
		let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

		drop(pool.acquire(u1, &alloc).await.unwrap());
		drop(pool.acquire(u2, &alloc).await.unwrap());
		assert_eq!(pool.active_count(), 2);

		// u1 is LRU and gets deactivated for u3
		drop(pool.acquire(u3, &alloc).await.unwrap());
		assert_eq!(pool.active_count(), 2);
		assert!(!pool.is_active(u1));
		assert!(pool.is_active(u2));
		assert!(pool.is_active(u3));

		// re-acquiring u1 allocates again (4 allocations total)
		drop(pool.acquire(u1, &alloc).await.unwrap());
		assert_eq!(allocations.load(Ordering::SeqCst), 4);
		assert!(pool.active_count() <= 2);
	}

	#[tokio::test]
	async fn same_uid_acquires_serialize() {
		let pool = ActivationPool::new(None).unwrap();
		let alloc = fake_allocator(Arc::new(AtomicUsize::new(0)));
		let uid = Uuid::new_v4();

		let lease = pool.acquire(uid, &alloc).await.unwrap();
		let pool2 = pool.clone();
		let alloc2 = alloc.clone();
		let second = tokio::spawn(async move { drop(pool2.acquire(uid, &alloc2).await.unwrap()) });

		tokio::task::yield_now().await;
		assert!(!second.is_finished());
		drop(lease);
		second.await.unwrap();
	}

	#[tokio::test]
	async fn deactivation_waits_for_outstanding_lease() {
		let pool = ActivationPool::new(None).unwrap();
		let alloc = fake_allocator(Arc::new(AtomicUsize::new(0)));
		let uid = Uuid::new_v4();

		let lease = pool.acquire(uid, &alloc).await.unwrap();
		let pool2 = pool.clone();
		let deactivation = tokio::spawn(async move { pool2.deactivate_all().await });

		tokio::task::yield_now().await;
		assert!(!deactivation.is_finished());
		drop(lease);
		deactivation.await.unwrap();
		assert_eq!(pool.active_count(), 0);
	}

	#[tokio::test]
	async fn activate_all_respects_max_active() {
		let pool = ActivationPool::new(Some(2)).unwrap();
		let alloc = fake_allocator(Arc::new(AtomicUsize::new(0)));
		let sources: Vec<_> = (0..3).map(|_| (Uuid::new_v4(), alloc.clone())).collect();

		let err = pool.activate_all(&sources).await.unwrap_err();
		assert!(matches!(
			ErrorKind::of(&err),
			Some(ErrorKind::TooMany {
				requested: 3,
				max_active: 2
			})
		));

		pool.activate_all(&sources[0..2]).await.unwrap();
		assert_eq!(pool.active_count(), 2);
	}

	#[test]
	fn zero_max_active_is_rejected() {
		assert!(ActivationPool::new(Some(0)).is_err());
	}

	#[tokio::test]
	async fn failed_allocation_releases_the_slot() {
		let pool = ActivationPool::new(Some(1)).unwrap();
		let failing: DriverAllocator = Arc::new(|| Err(ErrorKind::DriverError("no such file".to_string()).into()));
		let uid = Uuid::new_v4();

		assert!(pool.acquire(uid, &failing).await.is_err());
		assert_eq!(pool.active_count(), 0);

		// the slot is free again for another source
		let alloc = fake_allocator(Arc::new(AtomicUsize::new(0)));
		drop(pool.acquire(Uuid::new_v4(), &alloc).await.unwrap());
	}
}
