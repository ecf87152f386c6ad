// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;
use crate::control::{Control, Reply};
use crate::filter::{Filter, Output, SyncMode};
use crate::streams::{pull, Direction, Error, OperationKind, Result, StreamKind};
use crate::url::Url;
use super::{AsyncBackend, AsyncStream};

/// A non-blocking filter backend over an owned stream.
pub(super) struct AsyncFilterBackend {
	inner: Box<AsyncStream>,
	filter: Filter,
	direction: Option<Direction>,
	eof: bool,
}

impl AsyncFilterBackend {
	pub fn new(inner: AsyncStream, filter: Filter) -> Self {
		Self {
			inner: Box::new(inner),
			filter,
			direction: None,
			eof: false,
		}
	}

	async fn flush(&mut self, sync: SyncMode) -> Result {
		loop {
			match self.filter.push(&[], 0, sync)? {
				Output::Data(data) => { self.inner.write(&data).await?; }
				Output::Pending |
				Output::End => break Ok(())
			}
		}
	}
}

#[async_trait]
impl AsyncBackend for AsyncFilterBackend {
	fn kind(&self) -> StreamKind { StreamKind::Filter }

	async fn open(&mut self, _: &Url) -> Result<Option<u64>> {
		self.inner.open().await?;
		self.filter.open()?;
		self.direction = None;
		self.eof = false;
		Ok(None)
	}

	async fn close(&mut self) -> Result {
		self.filter.close();
		self.direction = None;
		self.inner.close().await
	}

	async fn read(&mut self, size: usize) -> Result<Bytes> {
		if self.direction.is_none() {
			// Input ends with the inner stream when its size is known.
			if let Some(left) = self.inner.left() {
				self.filter.limit(left);
			}
		}
		Direction::claim(&mut self.direction, Direction::Read)?;

		let mut input = Bytes::new();
		if !self.eof {
			match self.inner.read(size).await {
				Ok(data) => input = data,
				Err(err) if err.is_closed() => self.eof = true,
				Err(err) => return Err(err)
			}
		}

		match pull(&mut self.filter, Some(&input[..]), size, self.eof)? {
			Some(Output::Data(data)) => {
				trace!(read = input.len(), produced = data.len(), "async filter stream read");
				Ok(data)
			}
			Some(_) => Ok(Bytes::new()),
			None => Err(Error::closed(OperationKind::Read))
		}
	}

	async fn write(&mut self, data: &[u8]) -> Result<usize> {
		Direction::claim(&mut self.direction, Direction::Write)?;
		if let Output::Data(output) = self.filter.push(data, data.len(), SyncMode::None)? {
			self.inner.write(&output).await?;
		}
		Ok(data.len())
	}

	async fn sync(&mut self, closing: bool) -> Result {
		if self.direction == Some(Direction::Write) {
			self.flush(if closing { SyncMode::End } else { SyncMode::Partial }).await?;
		}
		self.inner.sync(closing).await
	}

	fn control(&mut self, control: &Control) -> Result<Reply> {
		match control {
			Control::Filter(control) => Ok(Reply::Filter(self.filter.control(*control)?)),
			_ => self.inner.control(control.clone())
		}
	}
}
