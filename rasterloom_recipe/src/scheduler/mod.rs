//! The recipe scheduler: one actor task owning every piece of mutable graph
//! state.
//!
//! Queries, tile states, subscriber lists and the recipe table are only ever
//! touched on the scheduler task. Workers (produce, write, read) receive an
//! immutable job description, run their heavy closures on the configured
//! pools, and post results back over the scheduler's channel. This is what
//! makes the claim point (`missing → building`) race-free: two concurrent
//! queries touching the same missing tile are two messages handled one after
//! the other, so exactly one produce task is spawned and both queries end up
//! subscribed.

mod produce;
mod state;

pub use state::*;

use crate::{
	QueryAdmitEvent, TaskEvent, TaskKind, TileState, TileStateEvent, read_tile,
	scheduler::produce::{ClaimedTile, ProduceJob, run_produce},
};
use anyhow::{Result, ensure};
use itertools::Itertools;
use rasterloom_core::{ErrorKind, Footprint, RasterArray};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

/// Messages posted to the scheduler task.
pub(crate) enum Msg {
	Register {
		id: RecipeId,
		setup: Box<RecipeSetup>,
		reply: oneshot::Sender<Result<()>>,
	},
	Query {
		id: QueryId,
		recipe: RecipeId,
		fp: Footprint,
		bands: Vec<usize>,
		dst_nodata: f64,
		reply: oneshot::Sender<Result<RasterArray>>,
	},
	Cancel {
		id: QueryId,
	},
	/// A produce task finished one cache tile (persisted for disk stores;
	/// the array rides along for memory stores).
	TileBuilt {
		recipe: RecipeId,
		tile: usize,
		array: Option<RasterArray>,
	},
	/// A produce task failed; every claimed tile reverts to missing.
	ProduceFailed {
		recipe: RecipeId,
		tiles: Vec<usize>,
		error: String,
	},
	/// A read task loaded a ready tile for one query.
	TileRead {
		query: QueryId,
		recipe: RecipeId,
		tile: usize,
		tile_fp: Footprint,
		result: Result<RasterArray>,
	},
	Invalidate {
		recipe: RecipeId,
		reply: oneshot::Sender<Result<()>>,
	},
	Close {
		reply: oneshot::Sender<()>,
	},
}

/// Cheap-to-clone handle used by recipe sources and the registry.
#[derive(Clone)]
pub struct SchedulerHandle {
	tx: mpsc::UnboundedSender<Msg>,
	ids: Arc<AtomicU64>,
}

impl SchedulerHandle {
	/// Spawns the scheduler actor on the current runtime.
	#[must_use]
	pub fn spawn() -> SchedulerHandle {
		let (tx, rx) = mpsc::unbounded_channel();
		let scheduler = Scheduler {
			tx: tx.clone(),
			recipes: HashMap::new(),
			queries: HashMap::new(),
			draining: false,
		};
		tokio::spawn(scheduler.run(rx));
		SchedulerHandle {
			tx,
			ids: Arc::new(AtomicU64::new(1)),
		}
	}

	fn next_id(&self) -> u64 {
		self.ids.fetch_add(1, Ordering::Relaxed)
	}

	/// Registers a prepared recipe and returns its id.
	pub async fn register(&self, setup: RecipeSetup) -> Result<RecipeId> {
		let id = self.next_id();
		let (reply, rx) = oneshot::channel();
		self
			.tx
			.send(Msg::Register {
				id,
				setup: Box::new(setup),
				reply,
			})
			.map_err(|_| ErrorKind::Closed)?;
		rx.await.map_err(|_| ErrorKind::Closed)??;
		Ok(id)
	}

	/// Runs one query to completion. The query footprint must share the
	/// recipe's grid; dropping the returned future cancels the query.
	pub async fn query(&self, recipe: RecipeId, fp: Footprint, bands: Vec<usize>, dst_nodata: f64) -> Result<RasterArray> {
		let id = self.next_id();
		let (reply, rx) = oneshot::channel();
		self
			.tx
			.send(Msg::Query {
				id,
				recipe,
				fp,
				bands,
				dst_nodata,
				reply,
			})
			.map_err(|_| ErrorKind::Closed)?;

		let guard = CancelGuard {
			handle: self.clone(),
			id,
			armed: true,
		};
		let result = rx.await.map_err(|_| anyhow::Error::from(ErrorKind::Closed))?;
		guard.disarm();
		result
	}

	/// Evicts every cached tile of a recipe. Fails while queries are in
	/// flight on it.
	pub async fn invalidate(&self, recipe: RecipeId) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self
			.tx
			.send(Msg::Invalidate { recipe, reply })
			.map_err(|_| ErrorKind::Closed)?;
		rx.await.map_err(|_| anyhow::Error::from(ErrorKind::Closed))?
	}

	/// Drains the scheduler: no new queries, in-flight queries cancelled.
	/// Running produce tasks still complete and populate the cache.
	pub async fn close(&self) {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(Msg::Close { reply }).is_ok() {
			let _ = rx.await;
		}
	}
}

impl std::fmt::Debug for SchedulerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("SchedulerHandle")
	}
}

/// Sends a cancel message when a query future is dropped before completion.
struct CancelGuard {
	handle: SchedulerHandle,
	id: QueryId,
	armed: bool,
}

impl CancelGuard {
	fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.armed {
			let _ = self.handle.tx.send(Msg::Cancel { id: self.id });
		}
	}
}

/// The actor. Lives on its own task; owns everything mutable.
struct Scheduler {
	tx: mpsc::UnboundedSender<Msg>,
	recipes: HashMap<RecipeId, RecipeRuntime>,
	queries: HashMap<QueryId, QueryState>,
	draining: bool,
}

impl Scheduler {
	async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
		while let Some(msg) = rx.recv().await {
			match msg {
				Msg::Register { id, setup, reply } => {
					let _ = reply.send(self.handle_register(id, *setup));
				}
				Msg::Query {
					id,
					recipe,
					fp,
					bands,
					dst_nodata,
					reply,
				} => self.handle_query(id, recipe, fp, bands, dst_nodata, reply),
				Msg::Cancel { id } => self.handle_cancel(id),
				Msg::TileBuilt { recipe, tile, array } => self.handle_tile_built(recipe, tile, array),
				Msg::ProduceFailed { recipe, tiles, error } => self.handle_produce_failed(recipe, &tiles, &error),
				Msg::TileRead {
					query,
					recipe,
					tile,
					tile_fp,
					result,
				} => self.handle_tile_read(query, recipe, tile, tile_fp, result),
				Msg::Invalidate { recipe, reply } => {
					let _ = reply.send(self.handle_invalidate(recipe));
				}
				Msg::Close { reply } => {
					self.handle_close();
					let _ = reply.send(());
				}
			}
		}
	}

	fn handle_register(&mut self, id: RecipeId, setup: RecipeSetup) -> Result<()> {
		ensure!(!self.draining, ErrorKind::Closed);
		setup.def.observers.object_allocated("recipe runtime");
		log::debug!(
			"scheduler: registered recipe {id} with {} cache tiles, {} computation tiles",
			setup.grid.len(),
			setup.comp_tiles.len()
		);
		self.recipes.insert(id, RecipeRuntime::new(setup));
		Ok(())
	}

	fn handle_query(
		&mut self,
		id: QueryId,
		recipe: RecipeId,
		fp: Footprint,
		bands: Vec<usize>,
		dst_nodata: f64,
		reply: oneshot::Sender<Result<RasterArray>>,
	) {
		if self.draining {
			let _ = reply.send(Err(ErrorKind::Closed.into()));
			return;
		}
		let Some(rt) = self.recipes.get_mut(&recipe) else {
			let _ = reply.send(Err(
				ErrorKind::BadArgument(format!("unknown recipe id {recipe}")).into()
			));
			return;
		};

		let tiles = match rt.grid.tiles_intersecting(&fp) {
			Ok(tiles) => tiles,
			Err(err) => {
				let _ = reply.send(Err(err));
				return;
			}
		};
		let dst = RasterArray::filled(
			rt.def.dtype,
			(fp.ry() as usize, fp.rx() as usize, bands.len()),
			dst_nodata,
		);
		rt.def.observers.query_admit(&QueryAdmitEvent {
			query: id,
			fp,
			tile_count: tiles.len(),
		});
		log::trace!("scheduler: query {id} on recipe {recipe} touches {} tiles", tiles.len());

		if tiles.is_empty() {
			let _ = reply.send(Ok(dst));
			return;
		}

		rt.in_flight += 1;
		self.queries.insert(
			id,
			QueryState {
				recipe,
				fp,
				bands,
				dst: Some(dst),
				remaining: tiles.len(),
				reply: Some(reply),
			},
		);
		for tile in tiles {
			self.admit_tile(recipe, id, tile);
		}
	}

	/// Routes one query onto one cache tile: subscribe, read, or claim.
	fn admit_tile(&mut self, recipe: RecipeId, query: QueryId, tile: usize) {
		let Some(rt) = self.recipes.get_mut(&recipe) else { return };

		match rt.states[tile] {
			SlotState::Building => {
				rt.subscribers[tile].push(query);
				return;
			}
			SlotState::Ready => {
				self.spawn_read(recipe, query, tile);
				return;
			}
			SlotState::Missing => {}
		}

		// A memory store keeps readiness in its cache, not the state.
		if let TileStore::Memory { cache } = &mut rt.store {
			if let Some(array) = cache.get(&tile) {
				let tile_fp = *rt.grid.tile(tile);
				self.apply_tile_to_query(query, tile_fp, array);
				return;
			}
		}

		self.claim_and_produce(recipe, query, tile);
	}

	/// The claim point: transitions every missing cache tile of the producing
	/// computation tile to building and spawns exactly one produce task.
	fn claim_and_produce(&mut self, recipe: RecipeId, query: QueryId, tile: usize) {
		let Some(rt) = self.recipes.get_mut(&recipe) else { return };
		let comp_idx = rt.comp_of_tile[tile];
		let comp_fp = rt.comp_tiles[comp_idx];

		let mut claimed = Vec::new();
		for index in 0..rt.states.len() {
			if rt.comp_of_tile[index] != comp_idx || !matches!(rt.states[index], SlotState::Missing) {
				continue;
			}
			if let TileStore::Memory { cache } = &rt.store {
				if cache.contains(&index) {
					continue;
				}
			}
			rt.states[index] = SlotState::Building;
			rt.def.observers.tile_state_change(&TileStateEvent {
				tile_fp: *rt.grid.tile(index),
				from: TileState::Missing,
				to: TileState::Building,
			});
			claimed.push(ClaimedTile {
				index,
				fp: *rt.grid.tile(index),
				path: rt.store.path_of(index),
			});
		}
		rt.subscribers[tile].push(query);

		if claimed.is_empty() {
			// every tile of this computation was already claimed or cached
			return;
		}

		rt.def.observers.task_dispatch(&TaskEvent {
			kind: TaskKind::Produce,
			query: Some(query),
		});
		log::debug!(
			"scheduler: producing computation tile {comp_idx} of recipe {recipe} ({} cache tiles)",
			claimed.len()
		);
		tokio::spawn(run_produce(ProduceJob {
			recipe,
			def: Arc::clone(&rt.def),
			comp_fp,
			claimed,
			tx: self.tx.clone(),
		}));
	}

	/// Loads a ready tile from disk on the io pool, for one query.
	fn spawn_read(&mut self, recipe: RecipeId, query: QueryId, tile: usize) {
		let Some(rt) = self.recipes.get_mut(&recipe) else { return };
		let Some(path) = rt.store.path_of(tile) else {
			// memory stores never mark tiles ready
			return;
		};
		let tile_fp = *rt.grid.tile(tile);
		let io = rt.def.io_pool.clone();
		let tx = self.tx.clone();
		rt.def.observers.task_dispatch(&TaskEvent {
			kind: TaskKind::Read,
			query: Some(query),
		});

		tokio::spawn(async move {
			let expected = tile_fp;
			let result = io
				.run(move || {
					let (header, array) = read_tile(&path)?;
					ensure!(
						header.fp == expected,
						"cache tile geometry {:?} contradicts the index ({:?})",
						header.fp,
						expected
					);
					Ok(array)
				})
				.await;
			let _ = tx.send(Msg::TileRead {
				query,
				recipe,
				tile,
				tile_fp,
				result,
			});
		});
	}

	fn handle_tile_built(&mut self, recipe: RecipeId, tile: usize, array: Option<RasterArray>) {
		let Some(rt) = self.recipes.get_mut(&recipe) else { return };
		let tile_fp = *rt.grid.tile(tile);
		let subscribers = std::mem::take(&mut rt.subscribers[tile]);
		rt.def.observers.task_complete(&TaskEvent {
			kind: TaskKind::Produce,
			query: None,
		});

		match (&mut rt.store, array) {
			(TileStore::Disk { .. }, _) => {
				rt.states[tile] = SlotState::Ready;
				rt.def.observers.tile_state_change(&TileStateEvent {
					tile_fp,
					from: TileState::Building,
					to: TileState::Ready,
				});
				for query in subscribers {
					if self.queries.contains_key(&query) {
						self.spawn_read(recipe, query, tile);
					}
				}
			}
			(TileStore::Memory { .. }, Some(array)) => {
				rt.states[tile] = SlotState::Missing;
				for query in &subscribers {
					if self.queries.contains_key(query) {
						self.apply_tile_to_query(*query, tile_fp, array.clone());
					}
				}
				// cache after serving the waiters, so an immediate eviction
				// cannot strand them
				if let Some(rt) = self.recipes.get_mut(&recipe) {
					if let TileStore::Memory { cache } = &mut rt.store {
						cache.add(tile, array);
					}
				}
			}
			(TileStore::Memory { .. }, None) => {
				log::warn!("scheduler: memory-backed tile {tile} arrived without its array");
				rt.states[tile] = SlotState::Missing;
			}
		}
	}

	fn handle_produce_failed(&mut self, recipe: RecipeId, tiles: &[usize], error: &str) {
		log::warn!("scheduler: production failed on recipe {recipe}: {error}");
		let Some(rt) = self.recipes.get_mut(&recipe) else { return };

		let mut affected = Vec::new();
		for &tile in tiles {
			// tiles persisted before the failure stay ready
			if !matches!(rt.states[tile], SlotState::Building) {
				continue;
			}
			rt.states[tile] = SlotState::Missing;
			rt.def.observers.tile_state_change(&TileStateEvent {
				tile_fp: *rt.grid.tile(tile),
				from: TileState::Building,
				to: TileState::Missing,
			});
			affected.extend(std::mem::take(&mut rt.subscribers[tile]));
		}
		for query in affected.into_iter().unique() {
			self.fail_query(query, ErrorKind::ProducerError(error.to_string()).into());
		}
	}

	fn handle_tile_read(
		&mut self,
		query: QueryId,
		recipe: RecipeId,
		tile: usize,
		tile_fp: Footprint,
		result: Result<RasterArray>,
	) {
		if let Some(rt) = self.recipes.get_mut(&recipe) {
			rt.def.observers.task_complete(&TaskEvent {
				kind: TaskKind::Read,
				query: Some(query),
			});
		}
		match result {
			Ok(array) => self.apply_tile_to_query(query, tile_fp, array),
			Err(err) => {
				// a ready tile that cannot be read is no longer ready
				if let Some(rt) = self.recipes.get_mut(&recipe) {
					if matches!(rt.states[tile], SlotState::Ready) {
						rt.states[tile] = SlotState::Missing;
					}
				}
				self.fail_query(query, err);
			}
		}
	}

	/// Copies a tile's pixels into a query's destination and completes the
	/// query when it was the last one.
	fn apply_tile_to_query(&mut self, query: QueryId, tile_fp: Footprint, array: RasterArray) {
		let Some(q) = self.queries.get_mut(&query) else { return };

		let copied = (|| -> Result<()> {
			let overlap = tile_fp.intersection(&q.fp)?;
			let (t_rows, t_cols) = overlap.slice_in(&tile_fp)?;
			let (q_rows, q_cols) = overlap.slice_in(&q.fp)?;
			let window = array.slice_window(t_rows, t_cols)?.select_bands(&q.bands)?;
			q.dst
				.as_mut()
				.ok_or_else(|| anyhow::anyhow!("query destination already taken"))?
				.copy_window_from(&window, q_rows.start, q_cols.start)
		})();

		match copied {
			Ok(()) => {
				q.remaining -= 1;
				if q.remaining == 0 {
					self.complete_query(query);
				}
			}
			Err(err) => self.fail_query(query, err),
		}
	}

	fn complete_query(&mut self, query: QueryId) {
		if let Some(mut q) = self.queries.remove(&query) {
			if let Some(rt) = self.recipes.get_mut(&q.recipe) {
				rt.in_flight -= 1;
			}
			let dst = q.dst.take().expect("destination present until completion");
			if let Some(reply) = q.reply.take() {
				let _ = reply.send(Ok(dst));
			}
		}
	}

	fn fail_query(&mut self, query: QueryId, err: anyhow::Error) {
		if let Some(mut q) = self.queries.remove(&query) {
			if let Some(rt) = self.recipes.get_mut(&q.recipe) {
				rt.in_flight -= 1;
				for subs in &mut rt.subscribers {
					subs.retain(|s| *s != query);
				}
			}
			if let Some(reply) = q.reply.take() {
				let _ = reply.send(Err(err));
			}
		}
	}

	/// Cancellation: O(tiles) unsubscription; building tiles keep building
	/// so their results still land in the cache.
	fn handle_cancel(&mut self, query: QueryId) {
		self.fail_query(query, ErrorKind::Cancelled.into());
	}

	fn handle_invalidate(&mut self, recipe: RecipeId) -> Result<()> {
		let Some(rt) = self.recipes.get_mut(&recipe) else {
			return Err(ErrorKind::BadArgument(format!("unknown recipe id {recipe}")).into());
		};
		ensure!(
			rt.in_flight == 0,
			ErrorKind::BadArgument("cannot invalidate a cache while queries are in flight".to_string())
		);
		match &mut rt.store {
			TileStore::Disk { paths } => {
				for (index, path) in paths.iter().enumerate() {
					if matches!(rt.states[index], SlotState::Ready) {
						if let Err(err) = std::fs::remove_file(path) {
							log::warn!("invalidate: cannot delete '{}': {err}", path.display());
						}
					}
					if !matches!(rt.states[index], SlotState::Building) {
						rt.states[index] = SlotState::Missing;
					}
				}
			}
			TileStore::Memory { cache } => cache.clear(),
		}
		Ok(())
	}

	fn handle_close(&mut self) {
		if self.draining {
			return;
		}
		self.draining = true;
		let in_flight: Vec<QueryId> = self.queries.keys().copied().collect();
		log::debug!("scheduler: draining, cancelling {} queries", in_flight.len());
		for query in in_flight {
			self.fail_query(query, ErrorKind::Cancelled.into());
		}
		for rt in self.recipes.values() {
			rt.def.observers.close();
		}
	}
}
