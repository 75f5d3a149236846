//! Debug observer hooks.
//!
//! Observers watch the scheduler from the inside: every hook is invoked
//! synchronously on the scheduler task, best-effort, and must not call back
//! into the registry. Useful for tests, tracing and debugging tools.

use rasterloom_core::Footprint;
use std::sync::Arc;

/// Lifecycle stage of a cache tile, as reported to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileState {
	Missing,
	Building,
	Ready,
}

/// Kind of work the scheduler dispatched to a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
	Produce,
	Write,
	Read,
	Resample,
}

#[derive(Clone, Debug)]
pub struct QueryAdmitEvent {
	pub query: u64,
	pub fp: Footprint,
	pub tile_count: usize,
}

#[derive(Clone, Debug)]
pub struct TileStateEvent {
	pub tile_fp: Footprint,
	pub from: TileState,
	pub to: TileState,
}

#[derive(Clone, Debug)]
pub struct TaskEvent {
	pub kind: TaskKind,
	pub query: Option<u64>,
}

/// Observer of scheduler internals; every hook defaults to a no-op.
#[allow(unused_variables)]
pub trait DebugObserver: Send + Sync {
	fn on_query_admit(&self, event: &QueryAdmitEvent) {}
	fn on_tile_state_change(&self, event: &TileStateEvent) {}
	fn on_task_dispatch(&self, event: &TaskEvent) {}
	fn on_task_complete(&self, event: &TaskEvent) {}
	fn on_object_allocated(&self, what: &str) {}
	fn on_close(&self) {}
}

/// The observers attached to one recipe (its own plus the registry-wide set).
#[derive(Clone, Default)]
pub struct ObserverSet {
	observers: Vec<Arc<dyn DebugObserver>>,
}

impl ObserverSet {
	#[must_use]
	pub fn new(observers: Vec<Arc<dyn DebugObserver>>) -> ObserverSet {
		ObserverSet { observers }
	}

	#[must_use]
	pub fn merged_with(&self, extra: &[Arc<dyn DebugObserver>]) -> ObserverSet {
		let mut observers = self.observers.clone();
		observers.extend(extra.iter().cloned());
		ObserverSet { observers }
	}

	pub fn query_admit(&self, event: &QueryAdmitEvent) {
		for o in &self.observers {
			o.on_query_admit(event);
		}
	}

	pub fn tile_state_change(&self, event: &TileStateEvent) {
		for o in &self.observers {
			o.on_tile_state_change(event);
		}
	}

	pub fn task_dispatch(&self, event: &TaskEvent) {
		for o in &self.observers {
			o.on_task_dispatch(event);
		}
	}

	pub fn task_complete(&self, event: &TaskEvent) {
		for o in &self.observers {
			o.on_task_complete(event);
		}
	}

	pub fn object_allocated(&self, what: &str) {
		for o in &self.observers {
			o.on_object_allocated(what);
		}
	}

	pub fn close(&self) {
		for o in &self.observers {
			o.on_close();
		}
	}
}

impl std::fmt::Debug for ObserverSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "ObserverSet({})", self.observers.len())
	}
}
