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

use std::error::Error;
use std::fs;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use ferry::{Action, Stream};
use ferry::control::{Control, Reply};
use ferry::streams::{transfer_url, transfer_to_url, FileMode};

mod common;

type Result<T = ()> = std::result::Result<T, Box<dyn Error>>;

#[test]
fn file_source() -> Result {
	let dir = tempdir()?;
	let path = dir.path().join("source.txt");
	fs::write(&path, "first line\nsecond line\n")?;

	let mut stream = Stream::from_url(path.to_str().ok_or("path is not UTF-8")?)?;
	stream.open()?;
	assert_eq!(stream.size(), Some(23));
	assert_eq!(stream.control(Control::IsFileStream)?, Reply::Bool(false));
	assert_eq!(stream.read_line()?.as_deref(), Some("first line"));
	stream.seek(18)?;
	assert_eq!(stream.read_line()?.as_deref(), Some("line"));
	assert_eq!(stream.read_line()?, None);
	Ok(())
}

#[test]
fn file_sink() -> Result {
	let dir = tempdir()?;
	let path = dir.path().join("sink.bin");
	let path = path.to_str().ok_or("path is not UTF-8")?;
	let data = common::sample(20000);

	let mut stream = Stream::from_file(path, FileMode::WO | FileMode::CREAT)?;
	assert_eq!(
		stream.control(Control::GetFileMode)?,
		Reply::FileMode(FileMode::WO | FileMode::CREAT)
	);
	stream.open()?;
	stream.write_all(&data)?;
	stream.write_u32_be(0xCAFEBABE)?;
	stream.close()?;

	let written = fs::read(path)?;
	assert_eq!(written.len(), 20004);
	assert!(written[..20000] == data[..]);
	assert_eq!(&written[20000..], &[0xCA, 0xFE, 0xBA, 0xBE]);
	Ok(())
}

#[test]
fn missing_file() {
	let mut stream = Stream::from_file("does/not/exist.txt", FileMode::RO).unwrap();
	let err = stream.open().unwrap_err();
	assert!(err.io_source().is_some());
	assert!(stream.is_closed());
}

#[test]
fn append() -> Result {
	let dir = tempdir()?;
	let path = dir.path().join("log.txt");
	fs::write(&path, "one\n")?;

	let mut stream = Stream::from_file(path.to_str().ok_or("path is not UTF-8")?, FileMode::APPEND)?;
	stream.open()?;
	stream.write_line("two")?;
	stream.close()?;
	assert_eq!(fs::read_to_string(&path)?, "one\ntwo\n");
	Ok(())
}

#[test]
fn copy_files() -> Result {
	let dir = tempdir()?;
	let source = dir.path().join("source.bin");
	let target = dir.path().join("target.bin");
	let data = common::sample(100_000);
	fs::write(&source, &data)?;

	let mut last = None;
	let saved = transfer_url(
		source.to_str().ok_or("path is not UTF-8")?,
		target.to_str().ok_or("path is not UTF-8")?,
		0,
		|progress| {
			last = Some((progress.offset, progress.size, progress.percent()));
			Action::Continue
		}
	)?;
	assert_eq!(saved, 100_000);
	assert_eq!(last, Some((100_000, Some(100_000), Some(100))));
	assert!(fs::read(&target)? == data);
	Ok(())
}

#[test]
fn copy_truncates_target() -> Result {
	let dir = tempdir()?;
	let target = dir.path().join("target.txt");
	fs::write(&target, "previous contents, longer than the new ones")?;

	let mut istream = Stream::from_data(b"new");
	transfer_to_url(&mut istream, target.to_str().ok_or("path is not UTF-8")?, 0, |_| Action::Continue)?;
	assert_eq!(fs::read_to_string(&target)?, "new");
	Ok(())
}
