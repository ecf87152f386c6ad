// SPDX-License-Identifier: Apache-2.0

//! The HTTP/1.1 chunked transfer coding.

use arrayvec::ArrayVec;
use bytes::BytesMut;
use tracing::debug;
use crate::streams::{Error, Result};
use super::{Codec, Step, SyncMode};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum State {
	/// Reading the hex chunk size.
	#[default]
	Size,
	/// Skipping a chunk extension.
	Extension,
	/// Expecting the line feed ending a size line.
	SizeLf,
	/// Copying chunk data, with the remaining length.
	Data(u64),
	/// Expecting the CRLF after chunk data.
	DataCr,
	DataLf,
	/// Skipping trailer lines after the last chunk. `empty` is set while the
	/// current line has no content.
	Trailer { empty: bool },
	TrailerLf { empty: bool },
	Done,
}

/// Decodes chunked data. Decoding ends after the zero-length last chunk and
/// its trailer.
#[derive(Default)]
pub(super) struct Decoder {
	state: State,
	digits: ArrayVec<u8, 16>,
}

fn chunk_size(digits: &[u8]) -> Result<u64> {
	if digits.is_empty() {
		return Err(Error::filter("missing chunk size"))
	}

	Ok(
		digits.iter().fold(0, |size, &digit| {
			let value = match digit {
				b'0'..=b'9' => digit - b'0',
				b'a'..=b'f' => digit - b'a' + 10,
				_ => digit - b'A' + 10,
			};
			size << 4 | value as u64
		})
	)
}

impl Decoder {
	fn start_chunk(digits: &mut ArrayVec<u8, 16>) -> Result<State> {
		let size = chunk_size(digits)?;
		digits.clear();
		Ok(if size == 0 {
			State::Trailer { empty: true }
		} else {
			State::Data(size)
		})
	}
}

impl Codec for Decoder {
	fn transcode(&mut self, input: &[u8], output: &mut BytesMut, sync: SyncMode) -> Result<Step> {
		use State::*;

		// Work on copies, committing only if the whole input parses.
		let mut state = self.state;
		let mut digits = self.digits.clone();
		let mut pos = 0;
		while pos < input.len() && state != Done {
			if let Data(left) = state {
				let len = left.min((input.len() - pos) as u64) as usize;
				output.extend_from_slice(&input[pos..pos + len]);
				pos += len;
				state = if left == len as u64 { DataCr } else { Data(left - len as u64) };
				continue
			}

			let byte = input[pos];
			pos += 1;
			state = match (state, byte) {
				(Size, b'\r') |
				(Extension, b'\r') => SizeLf,
				(Size | Extension | SizeLf, b'\n') => Self::start_chunk(&mut digits)?,
				(Size, b';') => Extension,
				(Size, b' ' | b'\t') |
				(Extension, _) => state,
				(Size, digit) if digit.is_ascii_hexdigit() => {
					digits.try_push(digit)
						  .map_err(|_| Error::filter("chunk size overflows 64 bits"))?;
					Size
				}
				(Size, _) => return Err(Error::filter("invalid chunk size")),
				(SizeLf, _) => return Err(Error::filter("expected line feed after chunk size")),
				(DataCr, b'\r') => DataLf,
				(DataCr | DataLf, b'\n') => Size,
				(DataCr | DataLf, _) => return Err(Error::filter("missing CRLF after chunk data")),
				(Trailer { empty }, b'\r') => TrailerLf { empty },
				(Trailer { empty } | TrailerLf { empty }, b'\n') =>
					if empty { Done } else { Trailer { empty: true } },
				(Trailer { .. }, _) => Trailer { empty: false },
				(TrailerLf { .. }, _) => return Err(Error::filter("expected line feed in trailer")),
				(Data(_) | Done, _) => state,
			};
		}

		if sync == SyncMode::End && state != Done {
			debug!(?state, "chunked data ended before the last chunk");
		}

		self.state = state;
		self.digits = digits;
		Ok(Step { consumed: pos, end: state == Done })
	}
}

/// Encodes data as chunks, one per push, writing the last chunk when the input
/// ends.
#[derive(Default)]
pub(super) struct Encoder {
	finished: bool,
}

impl Codec for Encoder {
	fn transcode(&mut self, input: &[u8], output: &mut BytesMut, sync: SyncMode) -> Result<Step> {
		if self.finished {
			return Ok(Step { consumed: input.len(), end: true })
		}

		if !input.is_empty() {
			output.extend_from_slice(format!("{:x}\r\n", input.len()).as_bytes());
			output.extend_from_slice(input);
			output.extend_from_slice(b"\r\n");
		}

		let end = sync == SyncMode::End;
		if end {
			output.extend_from_slice(b"0\r\n\r\n");
			self.finished = true;
		}
		Ok(Step { consumed: input.len(), end })
	}
}
