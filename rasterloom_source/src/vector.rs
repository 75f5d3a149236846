//! Vector source types.
//!
//! Vectors are a thin counterpart of the raster sources: features with an
//! optional geometry (the `geo` types) and string properties, read through a
//! pooled [`VectorDriver`](crate::VectorDriver) or held in memory. Geometry
//! coordinate conversion is delegated to the external SR library like the
//! raster footprints; this crate only routes the stored frame around.

use crate::{ActivationPool, DriverAllocator, OpenMode};
use anyhow::{Result, ensure};
use async_trait::async_trait;
use parking_lot::RwLock;
use rasterloom_core::ErrorKind;
use rasterloom_derive::context;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// One vector feature: an optional geometry plus string properties.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
	pub geometry: Option<geo::Geometry<f64>>,
	pub properties: BTreeMap<String, String>,
}

impl Feature {
	#[must_use]
	pub fn new(geometry: Option<geo::Geometry<f64>>) -> Feature {
		Feature {
			geometry,
			properties: BTreeMap::new(),
		}
	}
}

/// Common interface of vector variants.
#[async_trait]
pub trait VectorSource: Debug + Send + Sync {
	fn sr_stored(&self) -> Option<&str> {
		None
	}

	fn writable(&self) -> bool {
		false
	}

	async fn feature_count(&self) -> Result<usize>;

	async fn get_feature(&self, index: usize) -> Result<Feature>;

	async fn get_features(&self) -> Result<Vec<Feature>> {
		let count = self.feature_count().await?;
		let mut features = Vec::with_capacity(count);
		for index in 0..count {
			features.push(self.get_feature(index).await?);
		}
		Ok(features)
	}

	async fn insert_feature(&self, _feature: &Feature) -> Result<()> {
		Err(ErrorKind::BadArgument("vector is not writable".to_string()).into())
	}

	async fn delete(&self) -> Result<()> {
		Err(ErrorKind::BadArgument("vector cannot be deleted".to_string()).into())
	}

	async fn close(&self) -> Result<()> {
		Ok(())
	}
}

/// Shared handle to a vector source.
pub type SharedVectorSource = Arc<dyn VectorSource>;

struct FileVectorState {
	uid: Uuid,
	allocator: DriverAllocator,
	pool: Arc<ActivationPool>,
	path: PathBuf,
	mode: OpenMode,
	sr_stored: Option<String>,
	allow_none_geometry: bool,
	closed: AtomicBool,
}

/// A vector dataset stored in a file, accessed through a pooled driver.
#[derive(Clone)]
pub struct FileVector {
	state: Arc<FileVectorState>,
}

impl FileVector {
	#[context("opening vector '{}'", path.display())]
	pub async fn open(
		pool: Arc<ActivationPool>,
		allocator: DriverAllocator,
		path: &Path,
		mode: OpenMode,
		allow_none_geometry: bool,
	) -> Result<FileVector> {
		let uid = Uuid::new_v4();
		let sr_stored = {
			let mut lease = pool.acquire(uid, &allocator).await?;
			lease.driver().as_vector()?.sr_stored()
		};
		Ok(FileVector {
			state: Arc::new(FileVectorState {
				uid,
				allocator,
				pool,
				path: path.to_path_buf(),
				mode,
				sr_stored,
				allow_none_geometry,
				closed: AtomicBool::new(false),
			}),
		})
	}

	fn check_open(&self) -> Result<()> {
		ensure!(!self.state.closed.load(Ordering::SeqCst), ErrorKind::Closed);
		Ok(())
	}
}

#[async_trait]
impl VectorSource for FileVector {
	fn sr_stored(&self) -> Option<&str> {
		self.state.sr_stored.as_deref()
	}

	fn writable(&self) -> bool {
		self.state.mode.writable()
	}

	async fn feature_count(&self) -> Result<usize> {
		self.check_open()?;
		let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
		Ok(lease.driver().as_vector()?.len())
	}

	async fn get_feature(&self, index: usize) -> Result<Feature> {
		self.check_open()?;
		let feature = {
			let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
			lease.driver().as_vector()?.read_feature(index)?
		};
		ensure!(
			feature.geometry.is_some() || self.state.allow_none_geometry,
			ErrorKind::BadArgument(format!(
				"feature {index} has no geometry (pass allow_none_geometry=true to the data source)"
			))
		);
		Ok(feature)
	}

	async fn insert_feature(&self, feature: &Feature) -> Result<()> {
		self.check_open()?;
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("vector was opened read-only".to_string())
		);
		ensure!(
			feature.geometry.is_some() || self.state.allow_none_geometry,
			ErrorKind::BadArgument(
				"feature has no geometry (pass allow_none_geometry=true to the data source)".to_string()
			)
		);
		let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
		let driver = lease.driver().as_vector()?;
		driver.insert_feature(feature)?;
		driver.flush()
	}

	async fn delete(&self) -> Result<()> {
		self.check_open()?;
		ensure!(
			self.writable(),
			ErrorKind::BadArgument("vector was opened read-only".to_string())
		);
		let mut lease = self.state.pool.acquire(self.state.uid, &self.state.allocator).await?;
		lease.driver().as_vector()?.delete()?;
		lease.discard();
		self.state.closed.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		if !self.state.closed.swap(true, Ordering::SeqCst) {
			self.state.pool.deactivate(self.state.uid).await;
		}
		Ok(())
	}
}

#[async_trait]
impl crate::Activatable for FileVector {
	async fn activate(&self) -> Result<()> {
		self.check_open()?;
		drop(self.state.pool.acquire(self.state.uid, &self.state.allocator).await?);
		Ok(())
	}

	async fn deactivate(&self) {
		self.state.pool.deactivate(self.state.uid).await;
	}

	fn is_active(&self) -> bool {
		self.state.pool.is_active(self.state.uid)
	}
}

impl Debug for FileVector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FileVector")
			.field("path", &self.state.path)
			.field("mode", &self.state.mode)
			.finish()
	}
}

/// An in-memory vector dataset; the vector counterpart of
/// [`MemoryRaster`](crate::MemoryRaster).
#[derive(Clone)]
pub struct MemoryVector {
	features: Arc<RwLock<Vec<Feature>>>,
	sr: Option<String>,
	allow_none_geometry: bool,
}

impl MemoryVector {
	#[must_use]
	pub fn new(features: Vec<Feature>, sr: Option<String>, allow_none_geometry: bool) -> MemoryVector {
		MemoryVector {
			features: Arc::new(RwLock::new(features)),
			sr,
			allow_none_geometry,
		}
	}
}

#[async_trait]
impl VectorSource for MemoryVector {
	fn sr_stored(&self) -> Option<&str> {
		self.sr.as_deref()
	}

	fn writable(&self) -> bool {
		true
	}

	async fn feature_count(&self) -> Result<usize> {
		Ok(self.features.read().len())
	}

	async fn get_feature(&self, index: usize) -> Result<Feature> {
		let features = self.features.read();
		let feature = features.get(index).cloned().ok_or_else(|| {
			anyhow::Error::from(ErrorKind::BadArgument(format!(
				"feature index {index} out of range ({} features)",
				features.len()
			)))
		})?;
		ensure!(
			feature.geometry.is_some() || self.allow_none_geometry,
			ErrorKind::BadArgument(format!(
				"feature {index} has no geometry (pass allow_none_geometry=true to the data source)"
			))
		);
		Ok(feature)
	}

	async fn insert_feature(&self, feature: &Feature) -> Result<()> {
		ensure!(
			feature.geometry.is_some() || self.allow_none_geometry,
			ErrorKind::BadArgument(
				"feature has no geometry (pass allow_none_geometry=true to the data source)".to_string()
			)
		);
		self.features.write().push(feature.clone());
		Ok(())
	}
}

impl Debug for MemoryVector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryVector")
			.field("features", &self.features.read().len())
			.finish()
	}
}
