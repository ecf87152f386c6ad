// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use bytes::{Bytes, BytesMut};
use crate::control::{Control, Reply};
use crate::url::Url;
use super::{Backend, Error, OperationKind, Result, StreamKind};

/// A growable in-memory byte buffer with a cursor.
#[derive(Clone, Debug, Default)]
pub struct DataBuffer {
	data: BytesMut,
	pos: usize,
}

impl DataBuffer {
	pub fn new(data: &[u8]) -> Self {
		Self { data: BytesMut::from(data), pos: 0 }
	}

	/// Returns the buffer length.
	pub fn len(&self) -> usize { self.data.len() }

	pub fn is_empty(&self) -> bool { self.data.is_empty() }

	/// Returns the cursor position.
	pub fn position(&self) -> usize { self.pos }

	/// Returns a copy of the contents.
	pub fn bytes(&self) -> Bytes { Bytes::copy_from_slice(&self.data) }

	/// Replaces the contents, rewinding the cursor.
	pub fn set(&mut self, data: &[u8]) {
		self.data.clear();
		self.data.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn rewind(&mut self) { self.pos = 0 }

	/// Reads from the cursor into `buf`, returning a `Closed` error once the
	/// cursor reaches the end.
	pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
		let left = &self.data[self.pos..];
		if left.is_empty() && !buf.is_empty() {
			return Err(Error::closed(OperationKind::Read))
		}

		let len = left.len().min(buf.len());
		buf[..len].copy_from_slice(&left[..len]);
		self.pos += len;
		Ok(len)
	}

	/// Writes at the cursor, overwriting existing data and growing the buffer as
	/// needed.
	pub fn write(&mut self, data: &[u8]) -> usize {
		let end = self.pos + data.len();
		if end > self.data.len() {
			self.data.resize(end, 0);
		}
		self.data[self.pos..end].copy_from_slice(data);
		self.pos = end;
		data.len()
	}

	pub fn seek(&mut self, offset: u64) -> Result {
		match usize::try_from(offset) {
			Ok(pos) if pos <= self.data.len() => {
				self.pos = pos;
				Ok(())
			}
			_ => Err(Error::other(OperationKind::Seek, "seek past the end of the data", None))
		}
	}
}

/// A memory backend. Without explicit data, the payload of the `data://` URL is
/// decoded when the stream is opened.
#[derive(Debug, Default)]
pub(crate) struct DataBackend {
	buffer: DataBuffer,
	explicit: bool,
}

impl DataBackend {
	pub fn new(data: Option<&[u8]>) -> Self {
		match data {
			Some(data) => Self { buffer: DataBuffer::new(data), explicit: true },
			None => Self::default()
		}
	}

	pub fn open_data(&mut self, url: &Url) -> Result<Option<u64>> {
		if !self.explicit && url.kind() == StreamKind::Data {
			let data = url.decode_data()?;
			self.buffer.set(&data);
		}
		self.buffer.rewind();
		Ok(Some(self.buffer.len() as u64))
	}

	pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> { self.buffer.read(buf) }

	pub fn write_data(&mut self, data: &[u8]) -> usize { self.buffer.write(data) }

	pub fn seek_data(&mut self, offset: u64) -> Result { self.buffer.seek(offset) }

	pub fn control_data(&mut self, control: &Control) -> Result<Reply> {
		match control {
			Control::SetData(data) => {
				self.buffer.set(data);
				self.explicit = true;
				Ok(Reply::Done)
			}
			Control::GetData => Ok(Reply::Bytes(self.buffer.bytes())),
			_ => Err(Error::unsupported(OperationKind::Control, "unknown control for a data stream"))
		}
	}
}

impl Backend for DataBackend {
	fn kind(&self) -> StreamKind { StreamKind::Data }

	fn open(&mut self, url: &Url, _: Duration) -> Result<Option<u64>> { self.open_data(url) }

	fn close(&mut self) -> Result { Ok(()) }

	fn read(&mut self, buf: &mut [u8]) -> Result<usize> { self.read_data(buf) }

	fn write(&mut self, data: &[u8]) -> Result<usize> { Ok(self.write_data(data)) }

	fn seek(&mut self, offset: u64) -> Result { self.seek_data(offset) }

	fn control(&mut self, control: &Control) -> Result<Reply> { self.control_data(control) }
}
