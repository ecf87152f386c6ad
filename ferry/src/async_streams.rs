// Copyright 2023 Strixpyrr
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Non-blocking streams.
//!
//! An [`AsyncStream`] runs every backend operation under its timeout and its
//! [`KillHandle`]: killing the stream from any thread completes the pending
//! operation with a `Killed` error. Operations take `&mut self`, so at most
//! one can be in flight on a stream at a time:
//!
//! ```compile_fail
//! # use ferry::AsyncStream;
//! # async fn run(mut stream: AsyncStream) {
//! let read = stream.read(16);
//! let write = stream.write(b"data");
//! let _ = tokio::join!(read, write);
//! # }
//! ```

mod data;
mod file;
mod filtered;
mod http;
mod sock;

use std::fmt;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::time::Duration;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::time;
use tracing::{debug, trace, warn};
use crate::BLOCK_SIZE;
use crate::control::{Attributes, Control, Reply};
use crate::filter::Filter;
use crate::options::StreamOptions;
use crate::state::{KillHandle, StreamState};
use crate::streams::{
	check_killed,
	DataBackend,
	Error,
	FileMode,
	HttpBackend,
	OperationKind,
	Result,
	SockType,
	StreamKind,
};
use crate::url::Url;
use file::AsyncFileBackend;
use filtered::AsyncFilterBackend;
use sock::AsyncSockBackend;

/// A non-blocking byte source and sink beneath an [`AsyncStream`].
///
/// `read` returns empty bytes when no data is currently available and a
/// `Closed` error at the end of the stream. Timeouts and kills are applied by
/// the stream; backends only need to be cancel-safe between operations.
#[async_trait]
pub trait AsyncBackend: Send {
	/// Returns the backend type.
	fn kind(&self) -> StreamKind;

	/// Opens the backend, returning the total size if known.
	async fn open(&mut self, url: &Url) -> Result<Option<u64>>;

	/// Closes the backend. Closing an already closed backend does nothing.
	async fn close(&mut self) -> Result;

	/// Reads at most `size` bytes.
	async fn read(&mut self, size: usize) -> Result<Bytes>;

	/// Writes at most `data.len()` bytes, returning the number written.
	async fn write(&mut self, data: &[u8]) -> Result<usize>;

	/// Seeks to an absolute offset.
	async fn seek(&mut self, offset: u64) -> Result {
		let _ = offset;
		Err(Error::unsupported(OperationKind::Seek, "stream is not seekable"))
	}

	/// Flushes written data. `closing` is set when this is the final sync
	/// before closing.
	async fn sync(&mut self, closing: bool) -> Result {
		let _ = closing;
		Ok(())
	}

	/// Handles a backend-specific control.
	fn control(&mut self, control: &Control) -> Result<Reply> {
		let _ = control;
		Err(Error::unsupported(OperationKind::Control, "unknown control for this stream"))
	}
}

/// Runs `future` until it completes, the timeout elapses, or the stream is
/// killed. A kill observed after the future completes still fails the
/// operation.
pub(crate) async fn guard<T>(
	handle: &KillHandle,
	timeout: Duration,
	op: OperationKind,
	future: impl Future<Output = Result<T>>,
) -> Result<T> {
	check_killed(handle.is_killed(), op)?;
	let result = tokio::select! {
		biased;
		_ = handle.killed() => return Err(Error::killed(op)),
		result = time::timeout(timeout, future) => result,
	};

	match result {
		Ok(result) => {
			check_killed(handle.is_killed(), op)?;
			result
		}
		Err(_) => Err(Error::timeout(op))
	}
}

/// A non-blocking stream over an [`AsyncBackend`], with optional read and
/// write caches.
///
/// Unlike a blocking stream, closing does not flush cached writes; call
/// [`sync`](Self::sync) first.
pub struct AsyncStream {
	url: Url,
	backend: Box<dyn AsyncBackend>,
	handle: KillHandle,
	options: StreamOptions,
	offset: u64,
	size: Option<u64>,
	read_cache: BytesMut,
	write_cache: BytesMut,
}

impl AsyncStream {
	/// Creates a stream for a URL.
	pub fn from_url(url: &str) -> Result<Self> {
		Self::with_url(Url::parse(url)?, StreamOptions::new())
	}

	/// Creates a stream for a parsed URL.
	pub fn with_url(url: Url, options: StreamOptions) -> Result<Self> {
		let backend: Box<dyn AsyncBackend> = match url.kind() {
			StreamKind::Data => Box::new(DataBackend::new(None)),
			StreamKind::File => Box::new(AsyncFileBackend::new(FileMode::RO)),
			StreamKind::Sock => Box::new(AsyncSockBackend::new(None)),
			StreamKind::Http => Box::<HttpBackend>::default(),
			StreamKind::Filter => return Err(Error::url("filter streams are created over another stream"))
		};
		Ok(Self::with_backend(url, backend, options))
	}

	/// Creates a stream writing to a parsed URL. Unlike [`with_url`](Self::with_url),
	/// files are created or truncated.
	pub fn with_output_url(url: Url, options: StreamOptions) -> Result<Self> {
		if url.kind() == StreamKind::File {
			let mode = FileMode::RW | FileMode::CREAT | FileMode::TRUNC;
			Ok(Self::with_backend(url, Box::new(AsyncFileBackend::new(mode)), options))
		} else {
			Self::with_url(url, options)
		}
	}

	/// Creates a stream reading from and writing to memory.
	pub fn from_data(data: &[u8]) -> Self {
		Self::with_backend(
			Url::from_data(&[]),
			Box::new(DataBackend::new(Some(data))),
			StreamOptions::new()
		)
	}

	/// Creates a file stream opened with `mode`.
	pub fn from_file(path: &str, mode: FileMode) -> Result<Self> {
		let url = Url::parse(path)?;
		if url.kind() != StreamKind::File {
			return Err(Error::url(format!("\"{path}\" is not a file path")))
		}
		Ok(Self::with_backend(url, Box::new(AsyncFileBackend::new(mode)), StreamOptions::new()))
	}

	/// Creates a socket stream to a host.
	pub fn from_sock(host: &str, port: u16, kind: SockType) -> Result<Self> {
		let url = Url::parse(&format!("sock://{host}:{port}"))?;
		Ok(Self::with_backend(url, Box::new(AsyncSockBackend::new(Some(kind))), StreamOptions::new()))
	}

	/// Creates a stream passing data from or to `inner` through `filter`. The
	/// direction is set by the first read or write, and killing the filter
	/// stream kills `inner`.
	pub fn from_filter(inner: AsyncStream, filter: Filter) -> Self {
		let url = inner.url.clone();
		let options = StreamOptions::new().with_timeout(inner.options.timeout);
		let handle = KillHandle::with_child(inner.kill_handle());
		Self {
			handle,
			..Self::with_backend(url, Box::new(AsyncFilterBackend::new(inner, filter)), options)
		}
	}

	/// Creates a stream over a custom backend.
	pub fn with_backend(url: Url, backend: Box<dyn AsyncBackend>, options: StreamOptions) -> Self {
		Self {
			url,
			backend,
			handle: KillHandle::default(),
			options,
			offset: 0,
			size: None,
			read_cache: BytesMut::new(),
			write_cache: BytesMut::new(),
		}
	}

	pub fn kind(&self) -> StreamKind { self.backend.kind() }

	pub fn url(&self) -> &Url { &self.url }

	pub fn options(&self) -> &StreamOptions { &self.options }

	/// Returns the number of bytes read or written since opening.
	pub fn offset(&self) -> u64 { self.offset }

	/// Returns the total size, if known.
	pub fn size(&self) -> Option<u64> { self.size }

	/// Returns the number of bytes left to read, if the size is known.
	pub fn left(&self) -> Option<u64> {
		self.size.map(|size| size.saturating_sub(self.offset))
	}

	pub fn state(&self) -> StreamState { self.handle.state() }

	pub fn is_opened(&self) -> bool { self.state() == StreamState::Opened }

	pub fn is_closed(&self) -> bool { self.state() == StreamState::Closed }

	pub fn is_killed(&self) -> bool { self.handle.is_killed() }

	/// Returns a handle that can kill the stream from any thread.
	pub fn kill_handle(&self) -> KillHandle { self.handle.clone() }

	pub fn kill(&self) { self.handle.kill() }

	pub fn timeout(&self) -> Duration { self.options.timeout }

	pub fn set_timeout(&mut self, value: Duration) { self.options.set_timeout(value) }

	/// Opens the stream. Opening an open stream does nothing.
	pub async fn open(&mut self) -> Result {
		let cell = self.handle.cell();
		match cell.transition(StreamState::Closed, StreamState::Opening) {
			Ok(_) => { }
			Err(StreamState::Opened) => return Ok(()),
			Err(state) if state.is_killed() => return Err(Error::killed(OperationKind::Open)),
			Err(_) => return Err(Error::state(OperationKind::Open, "stream is already opening"))
		}

		let op = OperationKind::Open;
		match guard(&self.handle, self.options.timeout, op, self.backend.open(&self.url)).await {
			Ok(size) => {
				self.offset = 0;
				self.size = size;
				self.read_cache.clear();
				self.write_cache.clear();
				if cell.transition(StreamState::Opening, StreamState::Opened).is_err() {
					let _ = self.backend.close().await;
					cell.store(StreamState::Killed);
					return Err(Error::killed(op))
				}
				debug!(url = %self.url, kind = %self.kind(), ?size, "async stream opened");
				Ok(())
			}
			Err(err) => {
				if cell.transition(StreamState::Opening, StreamState::Closed).is_err() {
					let _ = self.backend.close().await;
					cell.store(StreamState::Killed);
				}
				Err(err)
			}
		}
	}

	/// Opens the stream, then seeks to `offset` if it is nonzero.
	pub async fn open_seek(&mut self, offset: u64) -> Result {
		self.open().await?;
		if offset > 0 {
			self.seek(offset).await?;
		}
		Ok(())
	}

	/// Closes the stream, discarding cached data. Closing clears a kill, so the
	/// stream may be opened again. Closing a closed stream does nothing.
	pub async fn close(&mut self) -> Result {
		let state = self.handle.state();
		if state == StreamState::Closed {
			return Ok(())
		}

		if !self.write_cache.is_empty() {
			warn!(len = self.write_cache.len(), "discarding unsynced writes on close");
		}
		let result = if state == StreamState::Killed {
			Ok(())
		} else {
			let close = self.backend.close();
			time::timeout(self.options.timeout, close)
				.await
				.unwrap_or_else(|_| Err(Error::timeout(OperationKind::Close)))
		};

		self.read_cache.clear();
		self.write_cache.clear();
		self.handle.cell().store(StreamState::Closed);
		debug!(url = %self.url, offset = self.offset, "async stream closed");
		result
	}

	fn check(&self, op: OperationKind) -> Result {
		match self.handle.state() {
			StreamState::Opened => Ok(()),
			state => {
				check_killed(state.is_killed(), op)?;
				Err(Error::state(op, "stream is not open"))
			}
		}
	}

	async fn flush_write(&mut self) -> Result {
		let op = OperationKind::Write;
		while !self.write_cache.is_empty() {
			let write = self.backend.write(&self.write_cache);
			let n = guard(&self.handle, self.options.timeout, op, write).await?;
			if n == 0 {
				return Err(Error::closed(op))
			}
			let _ = self.write_cache.split_to(n);
		}
		Ok(())
	}

	/// Reads at most `size` bytes. Returns empty bytes if no data is ready yet,
	/// and a `Closed` error at the end of the stream. Streams of unknown size
	/// request at most the larger of the read cache and [`BLOCK_SIZE`] from
	/// their backend at once.
	pub async fn read(&mut self, size: usize) -> Result<Bytes> {
		let op = OperationKind::Read;
		self.check(op)?;
		if size == 0 {
			return Ok(Bytes::new())
		}
		if !self.write_cache.is_empty() {
			self.flush_write().await?;
		}

		if self.read_cache.is_empty() {
			let mut len = size.max(self.options.read_cache);
			if let Some(left) = self.left() {
				if left == 0 {
					return Err(Error::closed(op))
				}
				len = len.min(usize::try_from(left).unwrap_or(usize::MAX));
			} else {
				len = len.min(self.options.read_cache.max(BLOCK_SIZE));
			}

			let read = self.backend.read(len);
			let data = guard(&self.handle, self.options.timeout, op, read).await?;
			trace!(requested = len, read = data.len(), "async stream read");
			if data.len() <= size {
				self.offset += data.len() as u64;
				return Ok(data)
			}
			self.read_cache.extend_from_slice(&data);
		}

		let len = size.min(self.read_cache.len());
		self.offset += len as u64;
		Ok(self.read_cache.split_to(len).freeze())
	}

	/// Writes all of `data`. Data is held in the write cache while it stays
	/// under the watermark.
	pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
		let op = OperationKind::Write;
		self.check(op)?;
		if data.is_empty() {
			return Ok(0)
		}
		if !self.read_cache.is_empty() {
			if self.size.is_none() {
				return Err(Error::state(op, "cannot write after a buffered read on an unseekable stream"))
			}
			let seek = self.backend.seek(self.offset);
			guard(&self.handle, self.options.timeout, OperationKind::Seek, seek).await?;
			self.read_cache.clear();
		}

		let watermark = self.options.write_cache;
		if self.write_cache.len() + data.len() >= watermark {
			self.flush_write().await?;
		}

		if data.len() < watermark {
			self.write_cache.extend_from_slice(data);
		} else {
			let mut pos = 0;
			while pos < data.len() {
				let write = self.backend.write(&data[pos..]);
				let n = guard(&self.handle, self.options.timeout, op, write).await?;
				if n == 0 {
					return Err(Error::closed(op))
				}
				pos += n;
			}
		}

		self.offset += data.len() as u64;
		if self.size.is_some_and(|size| self.offset > size) {
			self.size = Some(self.offset);
		}
		Ok(data.len())
	}

	/// Seeks to an absolute offset. Only streams of known size are seekable.
	pub async fn seek(&mut self, offset: u64) -> Result {
		let op = OperationKind::Seek;
		self.check(op)?;
		let Some(size) = self.size else {
			return Err(Error::unsupported(op, "stream size is unknown"))
		};
		if offset > size {
			return Err(Error::other(op, "seek past the end of the stream", None))
		}

		let cached_end = self.offset + self.read_cache.len() as u64;
		if offset >= self.offset && offset <= cached_end {
			let _ = self.read_cache.split_to((offset - self.offset) as usize);
		} else {
			self.flush_write().await?;
			self.read_cache.clear();
			let seek = self.backend.seek(offset);
			guard(&self.handle, self.options.timeout, op, seek).await?;
		}
		self.offset = offset;
		Ok(())
	}

	/// Flushes cached writes and syncs the backend. `closing` marks the final
	/// sync before closing.
	pub async fn sync(&mut self, closing: bool) -> Result {
		let op = OperationKind::Sync;
		self.check(op)?;
		self.flush_write().await?;
		let sync = self.backend.sync(closing);
		guard(&self.handle, self.options.timeout, op, sync).await
	}

	/// Waits `delay` milliseconds, failing early if the stream is killed.
	pub async fn task(&mut self, delay: u64) -> Result {
		let op = OperationKind::Task;
		let sleep = async {
			time::sleep(Duration::from_millis(delay)).await;
			Ok(())
		};
		guard(&self.handle, Duration::MAX, op, sleep).await
	}

	/// Handles a stream control.
	pub fn control(&mut self, control: Control) -> Result<Reply> {
		let attributes = Attributes {
			kind: self.kind(),
			url: &mut self.url,
			timeout: &mut self.options.timeout,
			size: self.size,
			offset: self.offset,
			closed: self.handle.state() == StreamState::Closed,
		};
		if let Some(reply) = attributes.apply(&control)? {
			if matches!(control, Control::SetUrl(_)) && self.url.kind() == StreamKind::Data {
				let data = self.url.decode_data()?;
				self.backend.control(&Control::SetData(data.into()))?;
			}
			return Ok(reply)
		}
		self.backend.control(&control)
	}

	/// Returns the contents of a data stream.
	pub fn data(&mut self) -> Result<Bytes> {
		match self.backend.control(&Control::GetData)? {
			Reply::Bytes(data) => Ok(data),
			_ => Err(Error::unsupported(OperationKind::Control, "stream has no data"))
		}
	}
}

impl Debug for AsyncStream {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("AsyncStream")
		 .field("url", &self.url)
		 .field("kind", &self.kind())
		 .field("state", &self.state())
		 .field("offset", &self.offset)
		 .field("size", &self.size)
		 .finish_non_exhaustive()
	}
}
