// SPDX-License-Identifier: Apache-2.0

//! [`std::io`] adapters for blocking streams.

use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use super::{Error, ErrorKind, Stream};

impl From<Error> for io::Error {
	fn from(value: Error) -> Self {
		let kind = match value.kind() {
			ErrorKind::Closed => io::ErrorKind::UnexpectedEof,
			ErrorKind::Killed => io::ErrorKind::Interrupted,
			ErrorKind::Timeout => io::ErrorKind::TimedOut,
			ErrorKind::Unsupported => io::ErrorKind::Unsupported,
			ErrorKind::Url => io::ErrorKind::InvalidInput,
			ErrorKind::Filter => io::ErrorKind::InvalidData,
			ErrorKind::Io => match value.io_source() {
				Some(err) => err.kind(),
				None => io::ErrorKind::Other
			},
			_ => io::ErrorKind::Other
		};
		io::Error::new(kind, value)
	}
}

impl Read for Stream {
	/// Reads into `buf`, returning zero at the end of the stream. Retries rather
	/// than returning zero when no data is ready.
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if buf.is_empty() {
			return Ok(0)
		}
		loop {
			match Stream::read(self, buf) {
				Ok(0) => continue,
				Ok(n) => break Ok(n),
				Err(err) if err.is_closed() => break Ok(0),
				Err(err) => break Err(err.into())
			}
		}
	}
}

impl Write for Stream {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		Ok(Stream::write(self, buf)?)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(self.sync(false)?)
	}
}

impl Seek for Stream {
	fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
		let target = match pos {
			SeekFrom::Start(offset) => Some(offset),
			SeekFrom::Current(delta) => self.offset().checked_add_signed(delta),
			SeekFrom::End(delta) => {
				let size = self.size().ok_or_else(|| io::Error::new(
					io::ErrorKind::Unsupported,
					"stream size is unknown"
				))?;
				size.checked_add_signed(delta)
			}
		};

		let offset = target.ok_or_else(|| io::Error::new(
			io::ErrorKind::InvalidInput,
			"seek to a negative offset"
		))?;
		Stream::seek(self, offset)?;
		Ok(offset)
	}
}
