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

use std::io::{Read, Seek, SeekFrom, Write};
use pretty_assertions::assert_eq;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use ferry::{Action, Filter, Stream, StreamKind, StreamOptions, StreamState};
use ferry::control::{Control, Reply};
use ferry::streams::{self, Result, transfer_url_to_data};

#[macro_use]
mod common;

fn opened(data: &[u8]) -> Result<Stream> {
	let mut stream = Stream::from_data(data);
	stream.open()?;
	Ok(stream)
}

#[test]
fn read_data() -> Result {
	let mut stream = opened(b"hello world")?;
	assert_eq!(stream.size(), Some(11));

	let mut buf = [0; 5];
	assert_eq!(stream.read(&mut buf)?, 5);
	assert_eq!(&buf, b"hello");
	assert_eq!(stream.offset(), 5);
	assert_eq!(stream.left(), Some(6));
	assert_eq!(&stream.read_to_end()?[..], b" world");
	assert!(stream.is_eof());
	assert!(stream.read(&mut buf).unwrap_err().is_closed());
	Ok(())
}

#[quickcheck]
fn offset_is_sum_of_reads(data: Vec<u8>, sizes: Vec<u8>) -> TestResult {
	let result = (|| -> Result<(u64, u64)> {
		let mut stream = opened(&data)?;
		let mut total = 0;
		let mut buf = [0; 256];
		for size in sizes {
			match stream.read(&mut buf[..size as usize]) {
				Ok(n) => total += n as u64,
				Err(err) if err.is_closed() => break,
				Err(err) => return Err(err)
			}
			assert!(stream.offset() <= data.len() as u64);
		}
		Ok((stream.offset(), total))
	})();

	match result {
		Ok((offset, total)) => qc_assert_eq!(offset, total),
		Err(err) => TestResult::error(err.to_string())
	}
}

#[test]
fn write_data() -> Result {
	let mut stream = opened(&[])?;
	stream.write_all(b"abc")?;
	stream.write_line("def")?;
	stream.sync(false)?;
	assert_eq!(stream.offset(), 7);
	assert_eq!(&stream.data()?[..], b"abcdef\n");
	Ok(())
}

#[test]
fn write_cache_holds_until_sync() -> Result {
	let mut stream = Stream::from_url("data://")?;
	stream.open()?;
	stream.write_all(b"cached")?;
	assert_eq!(stream.data()?.len(), 0);
	stream.sync(false)?;
	assert_eq!(&stream.data()?[..], b"cached");
	Ok(())
}

#[test]
fn lines() -> Result {
	let mut stream = Stream::with_url(
		ferry::Url::parse("data://b25lCnR3bw0KdGhyZWU=")?,
		StreamOptions::buffered()
	)?;
	stream.open()?;
	assert_eq!(stream.read_line()?.as_deref(), Some("one"));
	assert_eq!(stream.read_line()?.as_deref(), Some("two"));
	assert_eq!(stream.read_line()?.as_deref(), Some("three"));
	assert_eq!(stream.read_line()?, None);
	Ok(())
}

#[test]
fn numbers() -> Result {
	let mut stream = opened(&[])?;
	stream.write_u8(0xFE)?;
	stream.write_i16_be(-2)?;
	stream.write_u24_le(0x123456)?;
	stream.write_i24_be(-5)?;
	stream.write_u32_le(0xDEADBEEF)?;
	stream.write_i64_be(i64::MIN)?;
	stream.write_f32_le(1.5)?;
	stream.write_f64_be(-0.25)?;
	stream.sync(false)?;

	let data = stream.data()?;
	let mut stream = opened(&data)?;
	assert_eq!(stream.read_u8()?, 0xFE);
	assert_eq!(stream.read_i16_be()?, -2);
	assert_eq!(stream.read_u24_le()?, 0x123456);
	assert_eq!(stream.read_i24_be()?, -5);
	assert_eq!(stream.read_u32_le()?, 0xDEADBEEF);
	assert_eq!(stream.read_i64_be()?, i64::MIN);
	assert_eq!(stream.read_f32_le()?, 1.5);
	assert_eq!(stream.read_f64_be()?, -0.25);
	assert!(stream.read_u8().unwrap_err().is_closed());
	Ok(())
}

#[test]
fn seek_and_peek() -> Result {
	let mut stream = opened(b"0123456789")?;
	stream.seek(4)?;
	assert_eq!(stream.peek(3)?, b"456");
	assert_eq!(stream.offset(), 4);
	stream.skip(2)?;
	assert_eq!(stream.read_u8()?, b'6');
	stream.seek(1)?;
	assert_eq!(stream.read_u8()?, b'1');
	assert!(stream.seek(11).is_err());
	Ok(())
}

#[test]
fn closed_stream_rejects_io() {
	let mut stream = Stream::from_data(b"data");
	let mut buf = [0; 4];
	assert!(stream.read(&mut buf).is_err());
	assert!(stream.write(b"x").is_err());
	assert!(stream.close().is_ok());
	assert!(stream.close().is_ok());
}

#[test]
fn kill() -> Result {
	let mut stream = opened(b"data")?;
	let handle = stream.kill_handle();
	handle.kill();
	assert_eq!(stream.state(), StreamState::Killing);
	assert!(stream.read_u8().unwrap_err().is_killed());

	stream.close()?;
	assert_eq!(stream.state(), StreamState::Closed);
	stream.open()?;
	assert_eq!(stream.read_u8()?, b'd');
	Ok(())
}

#[test]
fn kill_closed() {
	let mut stream = Stream::from_data(b"data");
	stream.kill();
	assert_eq!(stream.state(), StreamState::Killed);
	assert!(stream.open().unwrap_err().is_killed());
}

#[test]
fn controls() -> Result {
	let mut stream = Stream::from_url("data://YWJj")?;
	assert_eq!(stream.control(Control::GetUrl)?, Reply::Text("data://YWJj".into()));
	stream.control(Control::SetUrl("data://eHl6".into()))?;
	assert!(stream.control(Control::SetUrl("file.txt".into())).is_err());

	stream.open()?;
	assert_eq!(&stream.read_to_end()?[..], b"xyz");
	assert_eq!(stream.control(Control::GetSize)?, Reply::Size(Some(3)));
	assert_eq!(stream.control(Control::GetOffset)?, Reply::Int(3));
	assert!(stream.control(Control::SetUrl("data://".into())).is_err());
	assert!(stream.control(Control::GetFileMode).is_err());
	Ok(())
}

#[test]
fn read_through_filter() -> Result {
	let inner = Stream::from_data(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
	let mut stream = Stream::from_filter(inner, Filter::chunked(true));
	assert_eq!(stream.kind(), StreamKind::Filter);
	stream.open()?;
	assert_eq!(stream.size(), None);
	assert_eq!(&stream.read_to_end()?[..], b"Wikipedia");
	assert!(stream.write(b"x").is_err());
	Ok(())
}

#[test]
fn write_through_filter() -> Result {
	let mut stream = Stream::from_filter(Stream::from_data(&[]), Filter::chunked(false));
	stream.open()?;
	stream.write_all(b"Wiki")?;
	stream.write_all(b"pedia")?;
	stream.close()?;
	assert_eq!(&stream.data()?[..], b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
	Ok(())
}

#[test]
fn kill_through_filter() -> Result {
	let inner = Stream::from_data(b"data");
	let inner_handle = inner.kill_handle();
	let mut stream = Stream::from_filter(inner, Filter::none());
	stream.open()?;
	stream.kill();
	assert!(inner_handle.is_killed());
	Ok(())
}

#[test]
fn std_io() -> std::result::Result<(), std::io::Error> {
	let mut stream = opened(&[])?;
	stream.write_all(b"hello std")?;
	stream.flush()?;
	Seek::seek(&mut stream, SeekFrom::Start(6))?;

	let mut text = String::new();
	Read::read_to_string(&mut stream, &mut text)?;
	assert_eq!(text, "std");
	assert_eq!(Seek::seek(&mut stream, SeekFrom::End(-3))?, 6);
	Ok(())
}

#[test]
fn copy() -> Result {
	let data = common::sample(50000);
	let mut istream = Stream::from_data(&data);
	let mut ostream = Stream::from_data(&[]);
	let mut reports = Vec::new();
	let saved = streams::transfer(&mut istream, &mut ostream, 0, |progress| {
		reports.push((progress.status.to_string(), progress.saved));
		Action::Continue
	})?;

	assert_eq!(saved, 50000);
	assert!(ostream.data()? == data);
	assert_eq!(reports.first().map(|(status, _)| status.as_str()), Some("ok"));
	assert_eq!(reports.last(), Some(&("closed".to_owned(), 50000)));
	Ok(())
}

#[test]
fn copy_stop() -> Result {
	let mut istream = Stream::from_data(&common::sample(50000));
	let mut ostream = Stream::from_data(&[]);
	let err = streams::transfer(&mut istream, &mut ostream, 0, |_| Action::Stop).unwrap_err();
	assert!(err.is_killed());
	Ok(())
}

#[test]
fn copy_url_to_data() -> Result {
	let data = transfer_url_to_data("data://aGVsbG8=", 0, |_| Action::Continue)?;
	assert_eq!(&data[..], b"hello");
	Ok(())
}
