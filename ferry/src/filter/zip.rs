// SPDX-License-Identifier: Apache-2.0

use amplify_derive::Display;
use crate::streams::{Error, OperationKind, Result};
use super::Codec;

/// A compression algorithm.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum ZipAlgo {
	/// Raw deflate data, with no header or checksum.
	#[display("raw deflate")]
	ZlibRaw,
	#[display("zlib")]
	Zlib,
	#[display("gzip")]
	Gzip,
	#[display("zstd")]
	Zstd,
}

#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum ZipAction {
	#[display("compress")]
	Compress,
	#[display("decompress")]
	Decompress,
}

pub(super) fn codec(algo: ZipAlgo, action: ZipAction) -> Result<Box<dyn Codec>> {
	match algo {
		#[cfg(feature = "zstd")]
		ZipAlgo::Zstd => Ok(Box::new(zstd_codec::ZstdCodec::new(action)?)),
		#[cfg(feature = "flate2")]
		ZipAlgo::ZlibRaw |
		ZipAlgo::Zlib |
		ZipAlgo::Gzip => Ok(Box::new(flate_codec::FlateCodec::new(algo, action))),
		#[allow(unreachable_patterns)]
		_ => {
			let _ = action;
			Err(Error::unsupported(OperationKind::Filter, "compression algorithm is disabled"))
		}
	}
}

#[cfg(any(feature = "zstd", feature = "flate2"))]
fn zip_error(error: std::io::Error) -> Error {
	Error::new(OperationKind::Filter, crate::streams::ErrorKind::Filter, Some(error.into()))
}

#[cfg(feature = "flate2")]
mod flate_codec {
	use std::io;
	use std::io::Write;
	use bytes::BytesMut;
	use flate2::Compression;
	use flate2::write::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
	use crate::filter::{Step, SyncMode};
	use crate::streams::Result;
	use super::{Codec, ZipAction, ZipAlgo, zip_error};

	/// A flate2 writer collecting its output in a vector.
	trait Sink: Write + Send {
		fn sink(&mut self) -> &mut Vec<u8>;

		fn finish(&mut self) -> io::Result<()>;
	}

	macro_rules! sink {
		($($writer:ident),+) => {$(
			impl Sink for $writer<Vec<u8>> {
				fn sink(&mut self) -> &mut Vec<u8> { self.get_mut() }

				fn finish(&mut self) -> io::Result<()> { self.try_finish() }
			}
		)+};
	}

	sink!(DeflateEncoder, DeflateDecoder, ZlibEncoder, ZlibDecoder, GzEncoder, GzDecoder);

	pub(in super::super) struct FlateCodec {
		writer: Box<dyn Sink>,
		action: ZipAction,
		finished: bool,
	}

	impl FlateCodec {
		pub fn new(algo: ZipAlgo, action: ZipAction) -> Self {
			let level = Compression::default();
			let writer: Box<dyn Sink> = match (algo, action) {
				(ZipAlgo::Gzip, ZipAction::Compress) => Box::new(GzEncoder::new(Vec::new(), level)),
				(ZipAlgo::Gzip, ZipAction::Decompress) => Box::new(GzDecoder::new(Vec::new())),
				(ZipAlgo::Zlib, ZipAction::Compress) => Box::new(ZlibEncoder::new(Vec::new(), level)),
				(ZipAlgo::Zlib, ZipAction::Decompress) => Box::new(ZlibDecoder::new(Vec::new())),
				(_, ZipAction::Compress) => Box::new(DeflateEncoder::new(Vec::new(), level)),
				(_, ZipAction::Decompress) => Box::new(DeflateDecoder::new(Vec::new())),
			};
			Self { writer, action, finished: false }
		}

		/// Moves output the decoder holds internally into its sink. Empty
		/// writes release it; `flush` panics on a corrupt stream.
		fn pump(&mut self) -> io::Result<()> {
			loop {
				let before = self.writer.sink().len();
				self.writer.write(&[])?;
				if self.writer.sink().len() == before {
					break Ok(())
				}
			}
		}

		fn drain(&mut self, output: &mut BytesMut) {
			let sink = self.writer.sink();
			output.extend_from_slice(sink);
			sink.clear();
		}
	}

	impl Codec for FlateCodec {
		fn transcode(&mut self, input: &[u8], output: &mut BytesMut, sync: SyncMode) -> Result<Step> {
			if self.finished {
				return Ok(Step { consumed: input.len(), end: true })
			}

			// A decoder accepts nothing past the end of its stream.
			let mut consumed = 0;
			while consumed < input.len() {
				match self.writer.write(&input[consumed..]).map_err(zip_error)? {
					0 => {
						self.finished = true;
						break
					}
					n => consumed += n
				}
			}

			let synced = match (sync, self.action) {
				(SyncMode::End, _) => {
					self.finished = true;
					self.writer.finish()
				}
				(_, ZipAction::Decompress) => self.pump(),
				(SyncMode::Partial, ZipAction::Compress) => self.writer.flush(),
				(SyncMode::None, ZipAction::Compress) => Ok(()),
			};
			synced.map_err(zip_error)?;

			self.drain(output);
			Ok(Step { consumed, end: self.finished })
		}
	}
}

#[cfg(feature = "zstd")]
mod zstd_codec {
	use bytes::BytesMut;
	use zstd::stream::raw::{Decoder, Encoder, Operation, OutBuffer};
	use crate::BLOCK_SIZE;
	use crate::filter::{Step, SyncMode};
	use crate::streams::Result;
	use super::{Codec, ZipAction, zip_error};

	const LEVEL: i32 = 3;

	enum Context {
		Compress(Encoder<'static>),
		Decompress(Decoder<'static>),
	}

	pub(in super::super) struct ZstdCodec {
		context: Context,
		finished: bool,
	}

	impl ZstdCodec {
		pub fn new(action: ZipAction) -> Result<Self> {
			let context = match action {
				ZipAction::Compress => Context::Compress(Encoder::new(LEVEL).map_err(zip_error)?),
				ZipAction::Decompress => Context::Decompress(Decoder::new().map_err(zip_error)?),
			};
			Ok(Self { context, finished: false })
		}
	}

	/// Runs `op` over all of `input`, appending its output.
	fn run(op: &mut impl Operation, input: &[u8], output: &mut BytesMut) -> Result<usize> {
		let mut scratch = [0; BLOCK_SIZE];
		let mut pos = 0;
		loop {
			let status = op.run_on_buffers(&input[pos..], &mut scratch).map_err(zip_error)?;
			output.extend_from_slice(&scratch[..status.bytes_written]);
			pos += status.bytes_read;

			let stalled = status.bytes_read == 0 && status.bytes_written == 0;
			if stalled || pos == input.len() && status.bytes_written < scratch.len() {
				break Ok(pos)
			}
		}
	}

	/// Drains `op` with `drain` until it reports nothing left to write.
	fn drain<O: Operation>(
		op: &mut O,
		output: &mut BytesMut,
		mut drain: impl FnMut(&mut O, &mut OutBuffer<'_, [u8]>) -> std::io::Result<usize>
	) -> Result {
		let mut scratch = [0; BLOCK_SIZE];
		loop {
			let (left, written) = {
				let mut out = OutBuffer::around(&mut scratch[..]);
				let left = drain(op, &mut out).map_err(zip_error)?;
				(left, out.pos())
			};
			output.extend_from_slice(&scratch[..written]);
			if left == 0 || written == 0 {
				break Ok(())
			}
		}
	}

	impl Codec for ZstdCodec {
		fn transcode(&mut self, input: &[u8], output: &mut BytesMut, sync: SyncMode) -> Result<Step> {
			if self.finished {
				return Ok(Step { consumed: input.len(), end: true })
			}

			match self.context {
				Context::Decompress(ref mut decoder) => {
					let consumed = run(decoder, input, output)?;
					Ok(Step { consumed, end: false })
				}
				Context::Compress(ref mut encoder) => {
					let consumed = run(encoder, input, output)?;
					match sync {
						SyncMode::None => { }
						SyncMode::Partial => drain(encoder, output, |op, out| op.flush(out))?,
						SyncMode::End => {
							drain(encoder, output, |op, out| op.finish(out, true))?;
							self.finished = true;
						}
					}
					Ok(Step { consumed, end: self.finished })
				}
			}
		}
	}
}
