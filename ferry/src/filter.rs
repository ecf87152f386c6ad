// SPDX-License-Identifier: Apache-2.0

//! Stateful byte transducers.
//!
//! A [`Filter`] accepts input in arbitrary pieces through [`Filter::push`] and
//! produces transformed output. Input the transform cannot consume yet, such as
//! a partial character or an incomplete chunk header, is cached until the next
//! push. Output is buffered until at least the requested amount is available,
//! unless the push asks for a sync, in which case whatever is buffered is
//! returned.
//!
//! Once the end of input is known, either from a [`SyncMode::End`] push, from
//! reaching the input [limit](Filter::limit), or from the transform itself (a
//! terminating chunk), further input is rejected while remaining output can
//! still be drained. When nothing is left, push returns [`Output::End`], and
//! keeps returning it.

mod charset;
mod chunked;
mod identity;
mod zip;

use std::{fmt, mem};
use std::fmt::{Display, Formatter};
use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};
use crate::BLOCK_SIZE;
use crate::streams::{Error, Result};
pub use charset::Charset;
pub use zip::{ZipAction, ZipAlgo};

/// The transform applied by a [`Filter`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterKind {
	/// Passes data through unchanged.
	None,
	/// Compresses or decompresses data.
	Zip { algo: ZipAlgo, action: ZipAction },
	/// Passes data through, holding output until a read of the requested size
	/// can be satisfied.
	Cache(usize),
	/// Converts text between character sets.
	Charset { from: Charset, to: Charset },
	/// Decodes or encodes the HTTP chunked transfer coding.
	Chunked { decode: bool },
}

impl FilterKind {
	/// Returns the control sub-category of the kind.
	pub const fn code(&self) -> u32 {
		match self {
			Self::None           => 0,
			Self::Zip { .. }     => 1,
			Self::Cache(_)       => 2,
			Self::Charset { .. } => 3,
			Self::Chunked { .. } => 4,
		}
	}
}

impl Display for FilterKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::None => f.write_str("none"),
			Self::Zip { algo, action } => write!(f, "zip ({algo} {action})"),
			Self::Cache(size) => write!(f, "cache ({size}B)"),
			Self::Charset { from, to } => write!(f, "charset ({from} to {to})"),
			Self::Chunked { decode: true  } => f.write_str("chunked decode"),
			Self::Chunked { decode: false } => f.write_str("chunked encode"),
		}
	}
}

/// How much buffered output a push should release.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SyncMode {
	/// Release output only once the requested amount is available.
	#[default]
	None,
	/// Release whatever output is available.
	Partial,
	/// Signal the end of input, then release whatever output is available.
	End,
}

/// The result of a push.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Output {
	/// No output is ready yet.
	Pending,
	/// Output was produced.
	Data(Bytes),
	/// All input was consumed and all output was drained.
	End,
}

impl Output {
	/// Returns `true` if the output is [`End`](Self::End).
	pub fn is_end(&self) -> bool { matches!(self, Self::End) }

	/// Returns the data, or an empty slice.
	pub fn data(&self) -> &[u8] {
		match self {
			Self::Data(data) => data,
			_ => &[]
		}
	}
}

/// A filter-level control.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterControl {
	GetZipAlgo,
	GetZipAction,
	SetZipAlgo(ZipAlgo),
	SetZipAction(ZipAction),
	GetCharsetFrom,
	GetCharsetTo,
	SetCharsetFrom(Charset),
	SetCharsetTo(Charset),
}

impl FilterControl {
	/// Returns the filter kind code and operation of the control.
	pub const fn parts(&self) -> (u32, u32) {
		use FilterControl::*;
		match self {
			GetZipAlgo        => (1, 1),
			GetZipAction      => (1, 2),
			SetZipAlgo(_)     => (1, 3),
			SetZipAction(_)   => (1, 4),
			GetCharsetFrom    => (3, 1),
			GetCharsetTo      => (3, 2),
			SetCharsetFrom(_) => (3, 3),
			SetCharsetTo(_)   => (3, 4),
		}
	}

	/// Returns the numeric control code, `(kind << 16) | op`.
	pub const fn code(&self) -> u32 {
		let (kind, op) = self.parts();
		crate::control::code(kind, op)
	}

	/// Returns `true` for controls that change the filter.
	pub const fn is_set(&self) -> bool { self.parts().1 > 2 }
}

/// The answer to a [`FilterControl`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilterReply {
	Done,
	ZipAlgo(ZipAlgo),
	ZipAction(ZipAction),
	Charset(Charset),
}

/// The result of one transform pass.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Step {
	/// The number of input bytes consumed.
	pub consumed: usize,
	/// Set when the transform reached the end of its data.
	pub end: bool,
}

/// A byte transform. Implementations append output to `output` and report how
/// much input they consumed; unconsumed input is presented again on the next
/// call. On error, a transform must leave its own state as it was.
pub(crate) trait Codec: Send {
	fn transcode(&mut self, input: &[u8], output: &mut BytesMut, sync: SyncMode) -> Result<Step>;
}

fn codec(kind: FilterKind) -> Result<Box<dyn Codec>> {
	let codec: Box<dyn Codec> = match kind {
		FilterKind::None |
		FilterKind::Cache(_) => Box::new(identity::Identity),
		FilterKind::Zip { algo, action } => zip::codec(algo, action)?,
		FilterKind::Charset { from, to } => Box::new(charset::CharsetCodec::new(from, to)),
		FilterKind::Chunked { decode: true  } => Box::<chunked::Decoder>::default(),
		FilterKind::Chunked { decode: false } => Box::<chunked::Encoder>::default(),
	};
	Ok(codec)
}

/// A stateful byte transducer.
pub struct Filter {
	kind: FilterKind,
	codec: Box<dyn Codec>,
	input: BytesMut,
	output: BytesMut,
	hint: usize,
	offset: u64,
	limit: Option<u64>,
	eof: bool,
	ended: bool,
}

impl Filter {
	/// Creates a filter of `kind`.
	pub fn new(kind: FilterKind) -> Result<Self> {
		Ok(Self::from_codec(kind, codec(kind)?))
	}

	/// Creates a pass-through filter.
	pub fn none() -> Self {
		Self::from_codec(FilterKind::None, Box::new(identity::Identity))
	}

	/// Creates a read-ahead cache filter holding up to `size` bytes.
	pub fn cache(size: usize) -> Self {
		Self::from_codec(FilterKind::Cache(size), Box::new(identity::Identity))
	}

	/// Creates a chunked transfer coding decoder, or encoder if `decode` is
	/// `false`.
	pub fn chunked(decode: bool) -> Self {
		let codec: Box<dyn Codec> = if decode {
			Box::<chunked::Decoder>::default()
		} else {
			Box::<chunked::Encoder>::default()
		};
		Self::from_codec(FilterKind::Chunked { decode }, codec)
	}

	/// Creates a character set converter.
	pub fn charset(from: Charset, to: Charset) -> Self {
		Self::from_codec(
			FilterKind::Charset { from, to },
			Box::new(charset::CharsetCodec::new(from, to))
		)
	}

	/// Creates a compression filter.
	pub fn zip(algo: ZipAlgo, action: ZipAction) -> Result<Self> {
		Self::new(FilterKind::Zip { algo, action })
	}

	fn from_codec(kind: FilterKind, codec: Box<dyn Codec>) -> Self {
		let hint = match kind {
			FilterKind::Cache(size) => size.max(1),
			_ => BLOCK_SIZE
		};
		Self {
			kind,
			codec,
			input: BytesMut::new(),
			output: BytesMut::with_capacity(hint),
			hint,
			offset: 0,
			limit: None,
			eof: false,
			ended: false,
		}
	}

	/// Returns the filter kind.
	pub fn kind(&self) -> FilterKind { self.kind }

	/// Returns `true` once the end of input is known. Output may remain.
	pub fn is_eof(&self) -> bool { self.eof }

	/// Returns `true` once [`Output::End`] was returned.
	pub fn is_ended(&self) -> bool { self.ended }

	/// Returns the number of input bytes accepted so far.
	pub fn offset(&self) -> u64 { self.offset }

	/// Returns the number of output bytes buffered.
	pub fn buffered(&self) -> usize { self.output.len() }

	/// Caps the input at `limit` more bytes in total, counted from the start of
	/// input. Input past the limit is discarded and reaching it ends the input.
	pub fn limit(&mut self, limit: u64) {
		self.limit = Some(limit);
		if self.offset >= limit {
			self.eof = true;
		}
	}

	/// Resets the filter for a new stream of data.
	pub fn open(&mut self) -> Result {
		if !self.input.is_empty() || !self.output.is_empty() || self.offset > 0 {
			self.codec = codec(self.kind)?;
		}
		self.input.clear();
		self.output.clear();
		self.offset = 0;
		self.limit = None;
		self.eof = false;
		self.ended = false;
		Ok(())
	}

	/// Discards all cached data.
	pub fn close(&mut self) {
		if !self.input.is_empty() || !self.output.is_empty() {
			trace!(
				input = self.input.len(),
				output = self.output.len(),
				"discarding filter data on close"
			);
		}
		self.input.clear();
		self.output.clear();
	}

	/// Pushes `data` into the filter, returning up to `need` bytes of output.
	/// A `need` of zero requests the larger of the input length and the output
	/// hint of the filter. An empty `data` pushes nothing, flushing output when
	/// combined with a sync.
	///
	/// If an error is returned, the filter is left as it was before the call.
	pub fn push(&mut self, data: &[u8], need: usize, mut sync: SyncMode) -> Result<Output> {
		if self.ended {
			return Ok(Output::End)
		}

		let data = match self.limit {
			Some(limit) => {
				let left = limit.saturating_sub(self.offset);
				&data[..data.len().min(usize::try_from(left).unwrap_or(usize::MAX))]
			}
			None => data
		};

		if self.eof && !data.is_empty() {
			return Err(Error::filter("input pushed after the end of input"))
		}

		let need = if need == 0 { data.len().max(self.hint) } else { need };

		// Enough output is buffered already, just cache the input.
		if self.output.len() >= need {
			self.accept(data);
			return Ok(self.release(need))
		}

		let marks = (self.input.len(), self.output.len(), self.offset, self.eof);
		self.accept(data);
		if sync == SyncMode::End {
			self.eof = true;
		}
		if self.eof {
			sync = SyncMode::End;
		}

		let input = mem::take(&mut self.input);
		let output_len = self.output.len();
		let step = match self.codec.transcode(&input, &mut self.output, sync) {
			Ok(step) => step,
			Err(err) => {
				let (input_len, output_len, offset, eof) = marks;
				self.input = input;
				self.input.truncate(input_len);
				self.output.truncate(output_len);
				self.offset = offset;
				self.eof = eof;
				return Err(err)
			}
		};

		let produced = self.output.len() - output_len;
		self.input = input;
		let _ = self.input.split_to(step.consumed.min(self.input.len()));

		if step.end {
			self.eof = true;
			sync = SyncMode::End;
			if !self.input.is_empty() {
				warn!(
					kind = %self.kind,
					len = self.input.len(),
					"discarding input past the end of filtered data"
				);
				self.input.clear();
			}
		}

		trace!(
			kind = %self.kind,
			consumed = step.consumed,
			produced,
			input = self.input.len(),
			output = self.output.len(),
			offset = self.offset,
			eof = self.eof,
			"filter push"
		);

		// Input the transform could not make progress on can never be consumed
		// once the input has ended.
		if self.eof && step.consumed == 0 && produced == 0 && !self.input.is_empty() {
			warn!(
				kind = %self.kind,
				len = self.input.len(),
				"discarding incomplete input at the end of filtered data"
			);
			self.input.clear();
		}

		if sync == SyncMode::None {
			return Ok(
				if self.output.len() >= need {
					self.release(need)
				} else {
					Output::Pending
				}
			)
		}

		if !self.output.is_empty() {
			let len = self.output.len().min(need);
			return Ok(self.release(len))
		}

		if self.eof && self.input.is_empty() {
			self.ended = true;
			Ok(Output::End)
		} else {
			Ok(Output::Pending)
		}
	}

	/// Pushes all of `data`, then drains the remaining output, returning all
	/// output produced.
	pub fn push_all(&mut self, data: &[u8]) -> Result<Bytes> {
		let mut output = BytesMut::new();
		let mut data = data;
		loop {
			match self.push(data, 0, SyncMode::End)? {
				Output::Data(chunk) => output.extend_from_slice(&chunk),
				Output::Pending => { }
				Output::End => break
			}
			data = &[];
		}
		Ok(output.freeze())
	}

	/// Handles a filter control.
	pub fn control(&mut self, control: FilterControl) -> Result<FilterReply> {
		let kind = match (self.kind, control) {
			(FilterKind::Zip { algo, .. }, FilterControl::GetZipAlgo) =>
				return Ok(FilterReply::ZipAlgo(algo)),
			(FilterKind::Zip { action, .. }, FilterControl::GetZipAction) =>
				return Ok(FilterReply::ZipAction(action)),
			(FilterKind::Charset { from, .. }, FilterControl::GetCharsetFrom) =>
				return Ok(FilterReply::Charset(from)),
			(FilterKind::Charset { to, .. }, FilterControl::GetCharsetTo) =>
				return Ok(FilterReply::Charset(to)),
			(FilterKind::Zip { action, .. }, FilterControl::SetZipAlgo(algo)) =>
				FilterKind::Zip { algo, action },
			(FilterKind::Zip { algo, .. }, FilterControl::SetZipAction(action)) =>
				FilterKind::Zip { algo, action },
			(FilterKind::Charset { to, .. }, FilterControl::SetCharsetFrom(from)) =>
				FilterKind::Charset { from, to },
			(FilterKind::Charset { from, .. }, FilterControl::SetCharsetTo(to)) =>
				FilterKind::Charset { from, to },
			_ => return Err(Error::unsupported(
				crate::streams::OperationKind::Control,
				"control does not apply to this filter"
			))
		};

		self.codec = codec(kind)?;
		self.kind = kind;
		Ok(FilterReply::Done)
	}

	fn accept(&mut self, data: &[u8]) {
		self.input.extend_from_slice(data);
		self.offset += data.len() as u64;
		if self.limit.is_some_and(|limit| self.offset >= limit) {
			self.eof = true;
		}
	}

	fn release(&mut self, len: usize) -> Output {
		Output::Data(self.output.split_to(len).freeze())
	}
}
