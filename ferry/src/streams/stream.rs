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

use std::fmt;
use std::fmt::{Debug, Formatter};
use std::time::Duration;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};
use crate::BLOCK_SIZE;
use crate::control::{Attributes, Control, Reply};
use crate::filter::Filter;
use crate::options::StreamOptions;
use crate::state::{KillHandle, StreamState};
use crate::url::Url;
use super::{
	Backend,
	check_killed,
	DataBackend,
	Error,
	FileBackend,
	FileMode,
	FilterBackend,
	HttpBackend,
	OperationKind,
	Result,
	SockBackend,
	SockType,
	StreamKind,
};

/// A blocking stream over a [`Backend`], with optional read and write caches.
///
/// Reads return `Ok(0)` when no data is available yet and a `Closed` error at
/// the end of the stream. The offset counts bytes delivered to or accepted
/// from the caller, so cached data is invisible to it.
///
/// Dropping a stream closes it, flushing cached writes.
pub struct Stream {
	url: Url,
	backend: Box<dyn Backend>,
	handle: KillHandle,
	options: StreamOptions,
	offset: u64,
	size: Option<u64>,
	read_cache: BytesMut,
	write_cache: BytesMut,
	written: bool,
}

impl Stream {
	/// Creates a stream for a URL, with buffered options.
	pub fn from_url(url: &str) -> Result<Self> {
		Self::with_url(Url::parse(url)?, StreamOptions::buffered())
	}

	/// Creates a stream for a parsed URL.
	pub fn with_url(url: Url, options: StreamOptions) -> Result<Self> {
		let backend: Box<dyn Backend> = match url.kind() {
			StreamKind::Data => Box::new(DataBackend::new(None)),
			StreamKind::File => Box::new(FileBackend::new(FileMode::RO)),
			StreamKind::Sock => Box::new(SockBackend::new(None)),
			StreamKind::Http => Box::<HttpBackend>::default(),
			StreamKind::Filter => return Err(Error::url("filter streams are created over another stream"))
		};
		Ok(Self::with_backend(url, backend, options))
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
		Ok(Self::with_backend(url, Box::new(FileBackend::new(mode)), StreamOptions::buffered()))
	}

	/// Creates a socket stream to a host.
	pub fn from_sock(host: &str, port: u16, kind: SockType) -> Result<Self> {
		let url = Url::parse(&format!("sock://{host}:{port}"))?;
		Ok(Self::with_backend(url, Box::new(SockBackend::new(Some(kind))), StreamOptions::new()))
	}

	/// Creates a stream passing data from or to `inner` through `filter`. The
	/// direction is set by the first read or write.
	pub fn from_filter(inner: Stream, filter: Filter) -> Self {
		let url = inner.url.clone();
		let options = StreamOptions::new().with_timeout(inner.options.timeout);
		let handle = KillHandle::with_child(inner.kill_handle());
		let mut stream = Self::with_backend(url, Box::new(FilterBackend::new(inner, filter)), options);
		stream.handle = handle;
		stream
	}

	/// Creates a stream over a custom backend.
	pub fn with_backend(url: Url, backend: Box<dyn Backend>, options: StreamOptions) -> Self {
		Self {
			url,
			backend,
			handle: KillHandle::default(),
			options,
			offset: 0,
			size: None,
			read_cache: BytesMut::new(),
			write_cache: BytesMut::new(),
			written: false,
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

	/// Returns a handle that can kill the stream from another thread. Blocking
	/// backend calls are not interrupted; the kill is observed by the next
	/// operation.
	pub fn kill_handle(&self) -> KillHandle { self.handle.clone() }

	pub fn kill(&self) { self.handle.kill() }

	pub fn timeout(&self) -> Duration { self.options.timeout }

	pub fn set_timeout(&mut self, value: Duration) { self.options.set_timeout(value) }

	/// Returns `true` if the end of a stream of known size was reached.
	pub fn is_eof(&self) -> bool {
		self.read_cache.is_empty() && self.left() == Some(0)
	}

	/// Opens the stream. Opening an open stream does nothing.
	pub fn open(&mut self) -> Result {
		let cell = self.handle.cell();
		match cell.transition(StreamState::Closed, StreamState::Opening) {
			Ok(_) => { }
			Err(StreamState::Opened) => return Ok(()),
			Err(state) if state.is_killed() => return Err(Error::killed(OperationKind::Open)),
			Err(_) => return Err(Error::state(OperationKind::Open, "stream is already opening"))
		}

		match self.backend.open(&self.url, self.options.timeout) {
			Ok(size) => {
				self.offset = 0;
				self.size = size;
				self.read_cache.clear();
				self.write_cache.clear();
				self.written = false;
				if cell.transition(StreamState::Opening, StreamState::Opened).is_err() {
					let _ = self.backend.close();
					cell.store(StreamState::Killed);
					return Err(Error::killed(OperationKind::Open))
				}
				debug!(url = %self.url, kind = %self.kind(), ?size, "stream opened");
				Ok(())
			}
			Err(err) => {
				if cell.transition(StreamState::Opening, StreamState::Closed).is_err() {
					cell.store(StreamState::Killed);
				}
				Err(err)
			}
		}
	}

	/// Closes the stream, flushing cached writes unless it was killed. Closing
	/// clears a kill, so the stream may be opened again.
	pub fn close(&mut self) -> Result {
		let state = self.handle.state();
		if state == StreamState::Closed {
			return Ok(())
		}

		let flush = if state == StreamState::Opened && (self.written || !self.write_cache.is_empty()) {
			self.flush_write().and_then(|_| self.backend.sync(true))
		} else {
			if !self.write_cache.is_empty() {
				warn!(len = self.write_cache.len(), "discarding cached writes of a killed stream");
			}
			Ok(())
		};
		let close = if state == StreamState::Killed {
			Ok(())
		} else {
			self.backend.close()
		};

		self.read_cache.clear();
		self.write_cache.clear();
		self.handle.cell().store(StreamState::Closed);
		debug!(url = %self.url, offset = self.offset, "stream closed");
		flush?;
		close
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

	/// Returns the number of bytes the backend may still produce, if known.
	fn backend_left(&self) -> Option<u64> {
		self.size.map(|size| {
			size.saturating_sub(self.offset + self.read_cache.len() as u64)
		})
	}

	/// Reads once from the backend into the read cache, requesting at least
	/// `min` bytes.
	fn fill(&mut self, min: usize) -> Result<usize> {
		check_killed(self.is_killed(), OperationKind::Read)?;
		let mut len = min.max(self.options.read_cache).max(1);
		if let Some(left) = self.backend_left() {
			if left == 0 {
				return Err(Error::closed(OperationKind::Read))
			}
			len = len.min(usize::try_from(left).unwrap_or(usize::MAX));
		}

		let start = self.read_cache.len();
		self.read_cache.resize(start + len, 0);
		let result = self.backend.read(&mut self.read_cache[start..]);
		let n = *result.as_ref().unwrap_or(&0);
		self.read_cache.truncate(start + n);
		trace!(requested = len, read = n, "stream fill");
		result.map_err(|err| err.with_operation(OperationKind::Read))
	}

	fn prepare_read(&mut self) -> Result {
		self.check(OperationKind::Read)?;
		if !self.write_cache.is_empty() {
			self.flush_write()?;
		}
		Ok(())
	}

	fn prepare_write(&mut self) -> Result {
		self.check(OperationKind::Write)?;
		if !self.read_cache.is_empty() {
			if self.size.is_none() {
				return Err(Error::state(OperationKind::Write, "cannot write after a buffered read on an unseekable stream"))
			}
			self.backend.seek(self.offset)?;
			self.read_cache.clear();
		}
		Ok(())
	}

	fn flush_write(&mut self) -> Result {
		while !self.write_cache.is_empty() {
			check_killed(self.is_killed(), OperationKind::Write)?;
			let n = self.backend.write(&self.write_cache)?;
			if n == 0 {
				return Err(Error::closed(OperationKind::Write))
			}
			let _ = self.write_cache.split_to(n);
		}
		Ok(())
	}

	/// Reads at most `buf.len()` bytes, returning `Ok(0)` if no data is ready.
	pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
		if buf.is_empty() {
			return Ok(0)
		}
		self.prepare_read()?;

		if self.read_cache.is_empty() {
			if buf.len() >= self.options.read_cache {
				check_killed(self.is_killed(), OperationKind::Read)?;
				let mut len = buf.len();
				if let Some(left) = self.left() {
					if left == 0 {
						return Err(Error::closed(OperationKind::Read))
					}
					len = len.min(usize::try_from(left).unwrap_or(usize::MAX));
				}
				let n = self.backend.read(&mut buf[..len])?;
				self.offset += n as u64;
				return Ok(n)
			}
			self.fill(buf.len())?;
		}

		let n = buf.len().min(self.read_cache.len());
		buf[..n].copy_from_slice(&self.read_cache.split_to(n));
		self.offset += n as u64;
		Ok(n)
	}

	/// Writes at most `data.len()` bytes, returning the number accepted. Data is
	/// held in the write cache while it stays under the watermark.
	pub fn write(&mut self, data: &[u8]) -> Result<usize> {
		if data.is_empty() {
			return Ok(0)
		}
		self.prepare_write()?;
		self.written = true;

		let watermark = self.options.write_cache;
		let n = if self.write_cache.len() + data.len() < watermark {
			self.write_cache.extend_from_slice(data);
			data.len()
		} else {
			self.flush_write()?;
			if data.len() < watermark {
				self.write_cache.extend_from_slice(data);
				data.len()
			} else {
				check_killed(self.is_killed(), OperationKind::Write)?;
				self.backend.write(data)?
			}
		};

		self.offset += n as u64;
		if self.size.is_some_and(|size| self.offset > size) {
			self.size = Some(self.offset);
		}
		Ok(n)
	}

	/// Reads exactly `buf.len()` bytes, failing with a `Closed` error if the
	/// stream ends first.
	pub fn read_exact(&mut self, buf: &mut [u8]) -> Result {
		let mut pos = 0;
		while pos < buf.len() {
			pos += self.read(&mut buf[pos..])?;
		}
		Ok(())
	}

	/// Writes all of `data`.
	pub fn write_all(&mut self, mut data: &[u8]) -> Result {
		while !data.is_empty() {
			let n = self.write(data)?;
			if n == 0 {
				return Err(Error::closed(OperationKind::Write))
			}
			data = &data[n..];
		}
		Ok(())
	}

	/// Reads until the end of the stream.
	pub fn read_to_end(&mut self) -> Result<Bytes> {
		let mut data = BytesMut::new();
		let mut buf = [0; BLOCK_SIZE];
		loop {
			match self.read(&mut buf) {
				Ok(n) => data.extend_from_slice(&buf[..n]),
				Err(err) if err.is_closed() => break Ok(data.freeze()),
				Err(err) => break Err(err)
			}
		}
	}

	/// Reads a line ending in `\n` or `\r\n`, returning it without the line
	/// ending, or `None` at the end of the stream.
	pub fn read_line(&mut self) -> Result<Option<String>> {
		self.prepare_read()?;
		let mut searched = 0;
		let (line, skip) = loop {
			if let Some(pos) = self.read_cache[searched..].iter().position(|&b| b == b'\n') {
				break (searched + pos, 1)
			}
			searched = self.read_cache.len();

			match self.fill(BLOCK_SIZE) {
				Ok(_) => { }
				Err(err) if err.is_closed() => {
					if self.read_cache.is_empty() {
						return Ok(None)
					}
					break (self.read_cache.len(), 0)
				}
				Err(err) => return Err(err)
			}
		};

		let bytes = self.read_cache.split_to(line + skip);
		self.offset += bytes.len() as u64;
		let mut line = &bytes[..line];
		if let [rest @ .., b'\r'] = line {
			line = rest;
		}

		simdutf8::basic::from_utf8(line)
			.map(str::to_owned)
			.map(Some)
			.map_err(|_| Error::other(OperationKind::Read, "line is not valid UTF-8", None))
	}

	/// Writes `line` followed by `\n`.
	pub fn write_line(&mut self, line: &str) -> Result {
		self.write_all(line.as_bytes())?;
		self.write_all(b"\n")
	}

	/// Returns the next `count` bytes without consuming them, reading from the
	/// backend as needed.
	pub fn peek(&mut self, count: usize) -> Result<&[u8]> {
		self.prepare_read()?;
		while self.read_cache.len() < count {
			self.fill(count - self.read_cache.len())?;
		}
		Ok(&self.read_cache[..count])
	}

	/// Skips `count` bytes, seeking if possible.
	pub fn skip(&mut self, count: u64) -> Result {
		if self.size.is_some() && self.write_cache.is_empty() {
			return self.seek(self.offset + count)
		}

		let mut buf = [0; BLOCK_SIZE];
		let mut left = count;
		while left > 0 {
			let len = left.min(BLOCK_SIZE as u64) as usize;
			left -= self.read(&mut buf[..len])? as u64;
		}
		Ok(())
	}

	/// Seeks to an absolute offset. Only streams of known size are seekable.
	pub fn seek(&mut self, offset: u64) -> Result {
		self.check(OperationKind::Seek)?;
		let Some(size) = self.size else {
			return Err(Error::unsupported(OperationKind::Seek, "stream size is unknown"))
		};
		if offset > size {
			return Err(Error::other(OperationKind::Seek, "seek past the end of the stream", None))
		}
		if offset == self.offset {
			return Ok(())
		}

		let cached_end = self.offset + self.read_cache.len() as u64;
		if offset > self.offset && offset <= cached_end {
			let _ = self.read_cache.split_to((offset - self.offset) as usize);
		} else {
			self.flush_write()?;
			self.read_cache.clear();
			self.backend.seek(offset)?;
		}
		self.offset = offset;
		Ok(())
	}

	/// Flushes cached writes and syncs the backend.
	pub fn sync(&mut self, closing: bool) -> Result {
		self.check(OperationKind::Sync)?;
		self.flush_write()?;
		self.backend.sync(closing)
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

impl Drop for Stream {
	fn drop(&mut self) {
		let _ = self.close();
	}
}

impl Debug for Stream {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Stream")
		 .field("url", &self.url)
		 .field("kind", &self.kind())
		 .field("state", &self.state())
		 .field("offset", &self.offset)
		 .field("size", &self.size)
		 .finish_non_exhaustive()
	}
}
