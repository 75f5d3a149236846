//! Backpressured streams of raster chunks.
//!
//! A [`ChunkStream`] is how sources deliver large reads piece by piece: a
//! lazy, finite sequence of `(Footprint, RasterArray)` pairs. Streams built
//! over a channel are **bounded**: the producer suspends once the consumer
//! has `capacity` undelivered chunks outstanding, which is the backpressure
//! contract of `queue_data`.

use crate::{Footprint, RasterArray};
use anyhow::Result;
use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::mpsc;

/// Default backpressure window of `queue_data`: the number of undelivered
/// chunks a producer may run ahead by.
pub const DEFAULT_QUEUE_SIZE: usize = 8;

/// One delivered piece of a larger read.
pub type Chunk = (Footprint, RasterArray);

/// A lazy, finite, possibly failing sequence of raster chunks.
pub struct ChunkStream {
	inner: BoxStream<'static, Result<Chunk>>,
}

impl ChunkStream {
	/// Wraps an arbitrary stream of chunk results.
	pub fn from_stream(stream: impl Stream<Item = Result<Chunk>> + Send + 'static) -> ChunkStream {
		ChunkStream { inner: stream.boxed() }
	}

	/// An already-materialized sequence of chunks.
	#[must_use]
	pub fn from_vec(chunks: Vec<Chunk>) -> ChunkStream {
		Self::from_stream(futures::stream::iter(chunks.into_iter().map(Ok)))
	}

	/// A bounded producer/consumer pair: the producer's `send` suspends once
	/// `capacity` chunks are undelivered.
	#[must_use]
	pub fn channel(capacity: usize) -> (ChunkSender, ChunkStream) {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
		(ChunkSender { inner: tx }, Self::from_stream(stream))
	}

	/// Next chunk, or `None` when the sequence is exhausted.
	pub async fn next(&mut self) -> Option<Result<Chunk>> {
		self.inner.next().await
	}

	/// Drains the stream, failing on the first failed chunk.
	pub async fn collect_all(mut self) -> Result<Vec<Chunk>> {
		let mut chunks = Vec::new();
		while let Some(chunk) = self.next().await {
			chunks.push(chunk?);
		}
		Ok(chunks)
	}
}

impl std::fmt::Debug for ChunkStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("ChunkStream(..)")
	}
}

/// Producer half of [`ChunkStream::channel`].
#[derive(Clone)]
pub struct ChunkSender {
	inner: mpsc::Sender<Result<Chunk>>,
}

impl ChunkSender {
	/// Delivers one chunk; suspends while the consumer's window is full.
	/// Returns `false` when the consumer is gone (the producer should stop).
	pub async fn send(&self, fp: Footprint, array: RasterArray) -> bool {
		self.inner.send(Ok((fp, array))).await.is_ok()
	}

	/// Delivers a failure, terminating the stream on the consumer side.
	pub async fn fail(&self, err: anyhow::Error) -> bool {
		self.inner.send(Err(err)).await.is_ok()
	}
}
