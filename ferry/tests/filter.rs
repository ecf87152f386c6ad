// SPDX-License-Identifier: Apache-2.0

use pretty_assertions::assert_eq;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use ferry::filter::{Charset, Filter, FilterControl, FilterKind, FilterReply, Output, SyncMode};
use ferry::streams::Result;

#[macro_use]
mod common;

fn drain(filter: &mut Filter) -> Result<Vec<u8>> {
	let mut output = Vec::new();
	loop {
		match filter.push(&[], 0, SyncMode::End)? {
			Output::Data(data) => output.extend_from_slice(&data),
			Output::Pending => { }
			Output::End => break Ok(output)
		}
	}
}

#[quickcheck]
fn identity(data: Vec<u8>) -> TestResult {
	let mut filter = Filter::none();
	match filter.push_all(&data) {
		Ok(output) => qc_assert_eq!(output.to_vec(), data),
		Err(err) => TestResult::error(err.to_string())
	}
}

#[quickcheck]
fn limit_truncates(data: Vec<u8>, limit: u8) -> TestResult {
	let mut filter = Filter::none();
	filter.limit(limit as u64);
	let expected = &data[..data.len().min(limit as usize)];
	match filter.push_all(&data) {
		Ok(output) => qc_assert_eq!(&output[..], expected, "limit {limit}"),
		Err(err) => TestResult::error(err.to_string())
	}
}

#[quickcheck]
fn chunked_round_trip(chunks: Vec<Vec<u8>>) -> TestResult {
	let result = (|| -> Result<Vec<u8>> {
		let mut encoder = Filter::chunked(false);
		let mut encoded = Vec::new();
		for chunk in &chunks {
			if let Output::Data(data) = encoder.push(chunk, 0, SyncMode::Partial)? {
				encoded.extend_from_slice(&data);
			}
		}
		encoded.extend(drain(&mut encoder)?);

		Ok(Filter::chunked(true).push_all(&encoded)?.to_vec())
	})();

	match result {
		Ok(decoded) => qc_assert_eq!(decoded, chunks.concat()),
		Err(err) => TestResult::error(err.to_string())
	}
}

#[test]
fn pending_until_need() -> Result {
	let mut filter = Filter::none();
	assert_eq!(filter.push(b"abc", 5, SyncMode::None)?, Output::Pending);
	assert_eq!(filter.push(b"def", 5, SyncMode::None)?, Output::Data("abcde".into()));
	assert_eq!(filter.push(&[], 5, SyncMode::Partial)?, Output::Data("f".into()));
	assert_eq!(filter.push(&[], 5, SyncMode::Partial)?, Output::Pending);
	Ok(())
}

#[test]
fn chunked_last_chunk_ends_once() -> Result {
	let mut filter = Filter::chunked(true);
	let output = filter.push(b"5;ext=1\r\nhello\r\n0\r\nTrailer: x\r\n\r\n", 0, SyncMode::None)?;
	assert_eq!(output, Output::Data("hello".into()));
	assert!(filter.is_eof());
	assert!(!filter.is_ended());

	assert_eq!(filter.push(&[], 0, SyncMode::None)?, Output::End);
	assert!(filter.is_ended());
	for _ in 0..3 {
		assert_eq!(filter.push(&[], 0, SyncMode::End)?, Output::End);
	}
	Ok(())
}

#[test]
fn chunked_zero_length_body() -> Result {
	let mut filter = Filter::chunked(true);
	assert_eq!(filter.push_all(b"0\r\n\r\n")?.len(), 0);
	assert!(filter.is_ended());
	Ok(())
}

#[test]
fn failed_push_leaves_filter_unchanged() -> Result {
	let mut filter = Filter::chunked(true);
	assert_eq!(filter.push(b"5\r\nhel", 0, SyncMode::None)?, Output::Pending);
	let offset = filter.offset();
	let buffered = filter.buffered();

	assert!(filter.push(b"lo\r\nzz", 0, SyncMode::None).is_err());
	assert_eq!(filter.offset(), offset);
	assert_eq!(filter.buffered(), buffered);
	assert!(!filter.is_eof());

	assert_eq!(&filter.push_all(b"lo\r\n0\r\n\r\n")?[..], b"hello");
	Ok(())
}

#[test]
fn input_after_eof_is_rejected() -> Result {
	let mut filter = Filter::none();
	assert_eq!(filter.push(b"data", 0, SyncMode::End)?, Output::Data("data".into()));
	assert!(filter.push(b"more", 0, SyncMode::None).is_err());
	assert_eq!(filter.push(&[], 0, SyncMode::None)?, Output::End);
	Ok(())
}

#[test]
fn reopen_resets() -> Result {
	let mut filter = Filter::chunked(true);
	filter.push_all(b"3\r\nabc\r\n0\r\n\r\n")?;
	assert!(filter.is_ended());

	filter.open()?;
	assert!(!filter.is_ended());
	assert_eq!(filter.offset(), 0);
	assert_eq!(&filter.push_all(b"2\r\nde\r\n0\r\n\r\n")?[..], b"de");
	Ok(())
}

#[test]
fn cache_holds_until_capacity() -> Result {
	let mut filter = Filter::cache(4);
	assert_eq!(filter.kind(), FilterKind::Cache(4));
	assert_eq!(filter.push(b"ab", 0, SyncMode::None)?, Output::Pending);
	assert_eq!(filter.push(b"cdef", 0, SyncMode::None)?, Output::Data("abcd".into()));
	assert_eq!(drain(&mut filter)?, b"ef");
	Ok(())
}

#[test]
fn charset_latin1_to_utf8() -> Result {
	let mut filter = Filter::charset(Charset::Latin1, Charset::Utf8);
	assert_eq!(&filter.push_all(b"caf\xE9")?[..], "café".as_bytes());
	Ok(())
}

#[test]
fn charset_utf8_to_utf16() -> Result {
	let mut filter = Filter::charset(Charset::Utf8, Charset::Utf16Le);
	let expected: Vec<u8> = "hé".encode_utf16().flat_map(u16::to_le_bytes).collect();
	assert_eq!(filter.push_all("hé".as_bytes())?.to_vec(), expected);
	Ok(())
}

#[test]
fn charset_unrepresentable() -> Result {
	let mut filter = Filter::charset(Charset::Utf8, Charset::Ascii);
	assert_eq!(&filter.push_all("naïve".as_bytes())?[..], b"na?ve");
	Ok(())
}

#[test]
fn charset_split_sequence() -> Result {
	let mut filter = Filter::charset(Charset::Utf8, Charset::Latin1);
	let bytes = "é".as_bytes();
	assert_eq!(filter.push(&bytes[..1], 0, SyncMode::Partial)?, Output::Pending);
	assert_eq!(filter.push(&bytes[1..], 0, SyncMode::Partial)?, Output::Data(vec![0xE9].into()));
	Ok(())
}

#[test]
fn charset_control() -> Result {
	let mut filter = Filter::charset(Charset::Utf8, Charset::Latin1);
	assert_eq!(
		filter.control(FilterControl::GetCharsetTo)?,
		FilterReply::Charset(Charset::Latin1)
	);
	assert_eq!(filter.control(FilterControl::SetCharsetTo(Charset::Utf16Be))?, FilterReply::Done);
	assert_eq!(filter.kind(), FilterKind::Charset { from: Charset::Utf8, to: Charset::Utf16Be });
	assert!(filter.control(FilterControl::GetZipAlgo).is_err());
	Ok(())
}

#[cfg(feature = "zstd")]
mod zstd {
	use pretty_assertions::assert_eq;
	use ferry::filter::{Filter, FilterControl, FilterReply, ZipAction, ZipAlgo};
	use ferry::streams::Result;
	use super::common::sample;

	#[test]
	fn round_trip() -> Result {
		let data = [sample(20000), vec![b'a'; 50000]].concat();
		let compressed = Filter::zip(ZipAlgo::Zstd, ZipAction::Compress)?.push_all(&data)?;
		assert!(compressed.len() < data.len());

		let decompressed = Filter::zip(ZipAlgo::Zstd, ZipAction::Decompress)?.push_all(&compressed)?;
		assert_eq!(decompressed.len(), data.len());
		assert!(decompressed == data);
		Ok(())
	}

	#[test]
	fn switch_action() -> Result {
		let mut filter = Filter::zip(ZipAlgo::Zstd, ZipAction::Compress)?;
		assert_eq!(
			filter.control(FilterControl::SetZipAction(ZipAction::Decompress))?,
			FilterReply::Done
		);
		assert_eq!(
			filter.control(FilterControl::GetZipAction)?,
			FilterReply::ZipAction(ZipAction::Decompress)
		);
		Ok(())
	}
}

#[cfg(feature = "flate2")]
mod flate {
	use std::io::Write;
	use flate2::Compression;
	use flate2::write::GzEncoder;
	use pretty_assertions::assert_eq;
	use ferry::filter::{Filter, FilterControl, FilterKind, FilterReply, Output, SyncMode, ZipAction, ZipAlgo};
	use ferry::streams::Result;
	use super::common::sample;

	fn data() -> Vec<u8> {
		[sample(20000), vec![b'a'; 50000]].concat()
	}

	/// Pushes `data` in pieces of `len` bytes, then ends the input.
	fn push_pieces(filter: &mut Filter, data: &[u8], len: usize) -> Result<Vec<u8>> {
		let mut output = Vec::new();
		for piece in data.chunks(len) {
			output.extend_from_slice(filter.push(piece, 0, SyncMode::None)?.data());
		}
		loop {
			match filter.push(&[], 0, SyncMode::End)? {
				Output::End => break Ok(output),
				chunk => output.extend_from_slice(chunk.data())
			}
		}
	}

	#[test]
	fn round_trip() -> Result {
		let data = data();
		for algo in [ZipAlgo::ZlibRaw, ZipAlgo::Zlib, ZipAlgo::Gzip] {
			let compressed = Filter::zip(algo, ZipAction::Compress)?.push_all(&data)?;
			assert!(compressed.len() < data.len(), "{algo} did not compress");

			let mut unzip = Filter::zip(algo, ZipAction::Decompress)?;
			let decompressed = push_pieces(&mut unzip, &compressed, 1000)?;
			assert_eq!(decompressed.len(), data.len(), "{algo}");
			assert!(decompressed == data, "{algo} output differs");
		}
		Ok(())
	}

	#[test]
	fn inflate_gzip_body() -> std::result::Result<(), Box<dyn std::error::Error>> {
		let data = data();
		let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
		encoder.write_all(&data)?;
		let body = encoder.finish()?;

		let mut unzip = Filter::zip(ZipAlgo::Gzip, ZipAction::Decompress)?;
		assert!(push_pieces(&mut unzip, &body, 7)? == data);
		Ok(())
	}

	#[test]
	fn input_past_the_end_is_dropped() -> Result {
		let mut body = Filter::zip(ZipAlgo::Zlib, ZipAction::Compress)?.push_all(b"hello zlib")?.to_vec();
		body.extend_from_slice(b"trailing garbage");
		let decompressed = Filter::zip(ZipAlgo::Zlib, ZipAction::Decompress)?.push_all(&body)?;
		assert_eq!(&decompressed[..], b"hello zlib");
		Ok(())
	}

	#[test]
	fn truncated_gzip_fails() -> Result {
		let body = Filter::zip(ZipAlgo::Gzip, ZipAction::Compress)?.push_all(&data())?;
		let mut unzip = Filter::zip(ZipAlgo::Gzip, ZipAction::Decompress)?;
		assert!(unzip.push_all(&body[..body.len() - 4]).is_err());
		Ok(())
	}

	#[test]
	fn corrupt_input_fails() -> Result {
		let mut unzip = Filter::zip(ZipAlgo::Zlib, ZipAction::Decompress)?;
		assert!(unzip.push_all(&[0xFF; 64]).is_err());
		Ok(())
	}

	#[test]
	fn switch_algo() -> Result {
		let body = Filter::zip(ZipAlgo::Gzip, ZipAction::Compress)?.push_all(b"switched")?;

		let mut filter = Filter::zip(ZipAlgo::Zlib, ZipAction::Decompress)?;
		assert_eq!(filter.control(FilterControl::SetZipAlgo(ZipAlgo::Gzip))?, FilterReply::Done);
		assert_eq!(filter.control(FilterControl::GetZipAlgo)?, FilterReply::ZipAlgo(ZipAlgo::Gzip));
		assert_eq!(filter.kind(), FilterKind::Zip { algo: ZipAlgo::Gzip, action: ZipAction::Decompress });
		assert_eq!(&filter.push_all(&body)?[..], b"switched");
		Ok(())
	}
}
