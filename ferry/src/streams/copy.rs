// SPDX-License-Identifier: Apache-2.0

//! Blocking stream-to-stream copies.

use std::thread;
use std::time::{Duration, Instant};
use bytes::Bytes;
use tracing::debug;
use crate::BLOCK_SIZE;
use crate::options::StreamOptions;
use crate::transfer::{Action, Progress, Status};
use crate::transfer::window::Window;
use crate::url::Url;
use super::{Error, FileMode, OperationKind, Result, Stream, StreamKind};

/// Copies `istream` into `ostream` on the current thread, opening both if
/// needed, until the input ends. With a nonzero `rate`, at most `rate` bytes
/// are moved per second.
///
/// `progress` is called after the first write, about once per second after
/// that, and once more with the final status. Returning [`Action::Stop`] ends
/// the copy with a `Killed` error. Returns the number of bytes copied.
pub fn transfer(
	istream: &mut Stream,
	ostream: &mut Stream,
	rate: usize,
	mut progress: impl FnMut(&Progress) -> Action,
) -> Result<u64> {
	istream.open()?;
	ostream.open()?;

	let clock = Instant::now();
	let now = || clock.elapsed().as_millis() as u64;
	let mut window = Window::new(now());
	let mut buf = [0; BLOCK_SIZE];

	let result = loop {
		if let Some(delay) = window.delay(now(), rate) {
			thread::sleep(Duration::from_millis(delay));
		}

		let len = window.budget(now(), rate).min(buf.len());
		let read = match istream.read(&mut buf[..len]) {
			Ok(0) => {
				thread::yield_now();
				continue
			}
			Ok(n) => n,
			Err(err) if err.is_closed() => break Ok(Status::Closed),
			Err(err) => break Err(err)
		};

		if let Err(err) = ostream.write_all(&buf[..read]) {
			break Err(err)
		}

		if window.record(now(), read) {
			let report = window.progress(Status::Ok, istream.offset(), istream.size());
			if progress(&report) == Action::Stop {
				break Ok(Status::Killed)
			}
		}

		if istream.left() == Some(0) {
			break Ok(Status::Closed)
		}
	};

	let mut status = match result {
		Ok(status) => status,
		Err(err) if err.is_killed() => Status::Killed,
		Err(err) => Status::Failed(err)
	};
	if matches!(status, Status::Closed) {
		if let Err(err) = ostream.sync(true) {
			status = Status::Failed(err);
		}
	}

	let mut report = window.progress(status, istream.offset(), istream.size());
	report.rate = window.average(now());
	debug!(saved = report.saved, rate = report.rate, status = %report.status, "copy finished");
	progress(&report);

	match report.status {
		Status::Failed(err) => Err(err),
		Status::Killed => Err(Error::killed(OperationKind::Other("copy"))),
		_ => Ok(report.saved)
	}
}

/// Creates a stream for writing to a URL. Files are created or truncated.
fn output_url(url: Url, options: StreamOptions) -> Result<Stream> {
	if url.kind() == StreamKind::File {
		let mut stream = Stream::from_file(url.path(), FileMode::RW | FileMode::CREAT | FileMode::TRUNC)?;
		stream.set_timeout(options.timeout);
		Ok(stream)
	} else {
		Stream::with_url(url, options)
	}
}

/// Copies from `iurl` to `ourl`, closing both streams afterward.
pub fn transfer_url(
	iurl: &str,
	ourl: &str,
	rate: usize,
	progress: impl FnMut(&Progress) -> Action,
) -> Result<u64> {
	let mut istream = Stream::from_url(iurl)?;
	let mut ostream = output_url(Url::parse(ourl)?, StreamOptions::buffered())?;
	let result = transfer(&mut istream, &mut ostream, rate, progress);
	let closed = istream.close().and(ostream.close());
	let saved = result?;
	closed?;
	Ok(saved)
}

/// Copies from `istream` to `ourl`, closing the output afterward.
pub fn transfer_to_url(
	istream: &mut Stream,
	ourl: &str,
	rate: usize,
	progress: impl FnMut(&Progress) -> Action,
) -> Result<u64> {
	let mut ostream = output_url(Url::parse(ourl)?, StreamOptions::buffered())?;
	let result = transfer(istream, &mut ostream, rate, progress);
	let closed = ostream.close();
	let saved = result?;
	closed?;
	Ok(saved)
}

/// Reads all data from `iurl` into memory.
pub fn transfer_url_to_data(
	iurl: &str,
	rate: usize,
	progress: impl FnMut(&Progress) -> Action,
) -> Result<Bytes> {
	let mut istream = Stream::from_url(iurl)?;
	let mut ostream = Stream::from_data(&[]);
	let result = transfer(&mut istream, &mut ostream, rate, progress);
	let closed = istream.close();
	result?;
	closed?;
	ostream.data()
}
