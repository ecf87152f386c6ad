// SPDX-License-Identifier: Apache-2.0

//! Character set conversion. Undecodable input becomes U+FFFD, and characters
//! the target set cannot represent become `?`.

use amplify_derive::Display;
use bytes::{BufMut, BytesMut};
use simdutf8::compat::from_utf8;
use crate::streams::Result;
use super::{Codec, Step, SyncMode};

/// A character set.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum Charset {
	#[display("ASCII")]
	Ascii,
	#[display("UTF-8")]
	Utf8,
	#[display("UTF-16LE")]
	Utf16Le,
	#[display("UTF-16BE")]
	Utf16Be,
	#[display("UTF-32LE")]
	Utf32Le,
	#[display("UTF-32BE")]
	Utf32Be,
	#[display("ISO-8859-1")]
	Latin1,
}

impl Charset {
	fn encode(self, char: char, output: &mut BytesMut) {
		match self {
			Self::Ascii => output.put_u8(if char.is_ascii() { char as u8 } else { b'?' }),
			Self::Latin1 => output.put_u8(u8::try_from(char).unwrap_or(b'?')),
			Self::Utf8 => {
				let mut buf = [0; 4];
				output.extend_from_slice(char.encode_utf8(&mut buf).as_bytes());
			}
			Self::Utf16Le | Self::Utf16Be => {
				let mut buf = [0; 2];
				for &unit in char.encode_utf16(&mut buf).iter() {
					if self == Self::Utf16Le {
						output.put_u16_le(unit)
					} else {
						output.put_u16(unit)
					}
				}
			}
			Self::Utf32Le => output.put_u32_le(char as u32),
			Self::Utf32Be => output.put_u32(char as u32),
		}
	}
}

pub(super) struct CharsetCodec {
	from: Charset,
	to: Charset,
}

impl CharsetCodec {
	pub fn new(from: Charset, to: Charset) -> Self {
		Self { from, to }
	}

	/// Decodes UTF-8, returning the number of bytes consumed. An incomplete
	/// sequence at the end of the input is left unless `end` is set.
	fn decode_utf8(&self, mut input: &[u8], end: bool, output: &mut BytesMut) -> usize {
		let len = input.len();
		loop {
			match from_utf8(input) {
				Ok(valid) => {
					self.encode_str(valid, output);
					return len
				}
				Err(err) => {
					let (valid, rest) = input.split_at(err.valid_up_to());
					// Validated by from_utf8.
					if let Ok(valid) = std::str::from_utf8(valid) {
						self.encode_str(valid, output);
					}

					match err.error_len() {
						Some(invalid) => {
							self.to.encode(char::REPLACEMENT_CHARACTER, output);
							input = &rest[invalid..];
						}
						None if end => {
							self.to.encode(char::REPLACEMENT_CHARACTER, output);
							return len
						}
						None => return len - rest.len()
					}
				}
			}
		}
	}

	fn encode_str(&self, str: &str, output: &mut BytesMut) {
		if self.to == Charset::Utf8 {
			output.extend_from_slice(str.as_bytes())
		} else {
			for char in str.chars() {
				self.to.encode(char, output)
			}
		}
	}

	fn decode_utf16(&self, input: &[u8], end: bool, output: &mut BytesMut) -> usize {
		let le = self.from == Charset::Utf16Le;
		let unit = |i: usize| {
			let bytes = [input[i], input[i + 1]];
			if le { u16::from_le_bytes(bytes) } else { u16::from_be_bytes(bytes) }
		};

		let mut pos = 0;
		while pos + 2 <= input.len() {
			let high = unit(pos);
			match high {
				0xD800..=0xDBFF => {
					if pos + 4 > input.len() {
						break
					}

					let low = unit(pos + 2);
					if let 0xDC00..=0xDFFF = low {
						let code = 0x10000 + ((high as u32 - 0xD800) << 10 | (low as u32 - 0xDC00));
						self.to.encode(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER), output);
						pos += 4;
					} else {
						self.to.encode(char::REPLACEMENT_CHARACTER, output);
						pos += 2;
					}
				}
				0xDC00..=0xDFFF => {
					self.to.encode(char::REPLACEMENT_CHARACTER, output);
					pos += 2;
				}
				_ => {
					self.to.encode(char::from_u32(high as u32).unwrap_or(char::REPLACEMENT_CHARACTER), output);
					pos += 2;
				}
			}
		}

		if end && pos < input.len() {
			self.to.encode(char::REPLACEMENT_CHARACTER, output);
			pos = input.len();
		}
		pos
	}

	fn decode_utf32(&self, input: &[u8], end: bool, output: &mut BytesMut) -> usize {
		let chunks = input.chunks_exact(4);
		let rest = chunks.remainder().len();
		for chunk in chunks {
			let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
			let code = if self.from == Charset::Utf32Le {
				u32::from_le_bytes(bytes)
			} else {
				u32::from_be_bytes(bytes)
			};
			self.to.encode(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER), output);
		}

		if end && rest > 0 {
			self.to.encode(char::REPLACEMENT_CHARACTER, output);
			input.len()
		} else {
			input.len() - rest
		}
	}
}

impl Codec for CharsetCodec {
	fn transcode(&mut self, input: &[u8], output: &mut BytesMut, sync: SyncMode) -> Result<Step> {
		let end = sync == SyncMode::End;
		let consumed = match self.from {
			Charset::Ascii => {
				for &byte in input {
					let char = if byte.is_ascii() { byte as char } else { char::REPLACEMENT_CHARACTER };
					self.to.encode(char, output);
				}
				input.len()
			}
			Charset::Latin1 => {
				for &byte in input {
					self.to.encode(byte as char, output);
				}
				input.len()
			}
			Charset::Utf8 => self.decode_utf8(input, end, output),
			Charset::Utf16Le | Charset::Utf16Be => self.decode_utf16(input, end, output),
			Charset::Utf32Le | Charset::Utf32Be => self.decode_utf32(input, end, output),
		};
		Ok(Step { consumed, end: false })
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn convert(from: Charset, to: Charset, input: &[u8], end: bool) -> (Vec<u8>, usize) {
		let mut codec = CharsetCodec::new(from, to);
		let mut output = BytesMut::new();
		let sync = if end { SyncMode::End } else { SyncMode::None };
		let step = codec.transcode(input, &mut output, sync).unwrap();
		(output.to_vec(), step.consumed)
	}

	#[test]
	fn utf8_to_utf16() {
		let (output, consumed) = convert(Charset::Utf8, Charset::Utf16Le, "hé".as_bytes(), false);
		assert_eq!(output, [b'h', 0, 0xE9, 0]);
		assert_eq!(consumed, 3);
	}

	#[test]
	fn partial_utf8_is_left() {
		// U+2014 is E2 80 94
		let input = b"a\xE2\x80";
		let (output, consumed) = convert(Charset::Utf8, Charset::Utf8, input, false);
		assert_eq!(output, b"a");
		assert_eq!(consumed, 1);

		let (output, consumed) = convert(Charset::Utf8, Charset::Utf8, input, true);
		assert_eq!(output, "a\u{FFFD}".as_bytes());
		assert_eq!(consumed, 3);
	}

	#[test]
	fn surrogate_pair() {
		let (output, _) = convert(Charset::Utf16Be, Charset::Utf8, &[0xD8, 0x3D, 0xDE, 0x00], false);
		assert_eq!(output, "😀".as_bytes());
	}

	#[test]
	fn unrepresentable() {
		let (output, _) = convert(Charset::Utf8, Charset::Latin1, "é😀".as_bytes(), false);
		assert_eq!(output, [0xE9, b'?']);
	}
}
