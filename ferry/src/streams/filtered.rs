// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use bytes::BytesMut;
use tracing::trace;
use crate::control::{Control, Reply};
use crate::filter::{Filter, Output, SyncMode};
use crate::url::Url;
use super::{Backend, Error, OperationKind, Result, Stream, StreamKind};

/// The direction of a filter stream, fixed by its first operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Direction {
	Read,
	Write,
}

impl Direction {
	/// Fixes the direction to `op` if unset, failing if it was set otherwise.
	pub fn claim(current: &mut Option<Self>, op: Self) -> Result {
		match current {
			None => {
				*current = Some(op);
				Ok(())
			}
			Some(dir) if *dir == op => Ok(()),
			Some(_) => Err(Error::state(
				if op == Self::Read { OperationKind::Read } else { OperationKind::Write },
				"filter streams cannot mix reads and writes"
			))
		}
	}
}

/// Pulls filtered output after reading `read` bytes of input, or nothing if
/// `read` is `None`. Returns `None` once the filter has ended.
pub(crate) fn pull(
	filter: &mut Filter,
	input: Option<&[u8]>,
	need: usize,
	eof: bool,
) -> Result<Option<Output>> {
	let end_or = |sync| if eof { SyncMode::End } else { sync };
	let mut output = match input {
		Some(data) if !data.is_empty() => filter.push(data, need, end_or(SyncMode::None))?,
		_ => Output::Pending
	};
	if output == Output::Pending {
		output = filter.push(&[], need, end_or(SyncMode::Partial))?;
	}
	Ok((output != Output::End).then_some(output))
}

/// A blocking filter backend over an owned stream.
pub(crate) struct FilterBackend {
	inner: Box<Stream>,
	filter: Filter,
	direction: Option<Direction>,
	eof: bool,
	scratch: BytesMut,
}

impl FilterBackend {
	pub fn new(inner: Stream, filter: Filter) -> Self {
		Self {
			inner: Box::new(inner),
			filter,
			direction: None,
			eof: false,
			scratch: BytesMut::new(),
		}
	}

	fn flush(&mut self, sync: SyncMode) -> Result {
		loop {
			match self.filter.push(&[], 0, sync)? {
				Output::Data(data) => self.inner.write_all(&data)?,
				Output::Pending |
				Output::End => break Ok(())
			}
		}
	}
}

impl Backend for FilterBackend {
	fn kind(&self) -> StreamKind { StreamKind::Filter }

	fn open(&mut self, _: &Url, _: Duration) -> Result<Option<u64>> {
		self.inner.open()?;
		self.filter.open()?;
		self.direction = None;
		self.eof = false;
		Ok(None)
	}

	fn close(&mut self) -> Result {
		let flush = if self.direction == Some(Direction::Write) && !self.inner.is_killed() {
			self.flush(SyncMode::End)
		} else {
			Ok(())
		};
		self.filter.close();
		self.direction = None;
		let close = self.inner.close();
		flush?;
		close
	}

	fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
		if self.direction.is_none() {
			// Input ends with the inner stream when its size is known.
			if let Some(left) = self.inner.left() {
				self.filter.limit(left);
			}
		}
		Direction::claim(&mut self.direction, Direction::Read)?;

		let mut read = 0;
		if !self.eof {
			self.scratch.resize(buf.len(), 0);
			match self.inner.read(&mut self.scratch) {
				Ok(n) => read = n,
				Err(err) if err.is_closed() => self.eof = true,
				Err(err) => return Err(err)
			}
		}

		let input = &self.scratch[..read];
		match pull(&mut self.filter, Some(input), buf.len(), self.eof)? {
			Some(Output::Data(data)) => {
				buf[..data.len()].copy_from_slice(&data);
				trace!(read, produced = data.len(), "filter stream read");
				Ok(data.len())
			}
			Some(_) => Ok(0),
			None => Err(Error::closed(OperationKind::Read))
		}
	}

	fn write(&mut self, data: &[u8]) -> Result<usize> {
		Direction::claim(&mut self.direction, Direction::Write)?;
		if let Output::Data(output) = self.filter.push(data, data.len(), SyncMode::None)? {
			self.inner.write_all(&output)?;
		}
		Ok(data.len())
	}

	fn sync(&mut self, closing: bool) -> Result {
		if self.direction == Some(Direction::Write) {
			self.flush(if closing { SyncMode::End } else { SyncMode::Partial })?;
		}
		self.inner.sync(closing)
	}

	fn control(&mut self, control: &Control) -> Result<Reply> {
		match control {
			Control::Filter(control) => Ok(Reply::Filter(self.filter.control(*control)?)),
			_ => self.inner.control(control.clone())
		}
	}
}
