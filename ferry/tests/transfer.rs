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

use std::{fs, io};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use ferry::{
	Action,
	AsyncBackend,
	AsyncStream,
	BLOCK_SIZE,
	Scheduler,
	Status,
	StreamKind,
	StreamOptions,
	Transfer,
	TransferHandle,
	TransferOptions,
	TransferState,
	Url,
};
use ferry::streams::{Error, OperationKind, Result};

mod common;

/// A progress report, reduced to what tests compare.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Report {
	status: String,
	time: u64,
	offset: u64,
	saved: u64,
}

fn data_transfer(data: &[u8], rate: usize) -> Result<Transfer<'static>> {
	let mut transfer = Transfer::with_options(
		Scheduler::current()?,
		TransferOptions::new().with_rate(rate)
	);
	transfer.set_istream_data(data)?;
	transfer.set_ostream_data()?;
	Ok(transfer)
}

fn output(transfer: &mut Transfer) -> Result<Vec<u8>> {
	Ok(transfer.ostream_mut().map(AsyncStream::data).transpose()?.unwrap_or_default().to_vec())
}

/// A source of unknown size handing out `data` at most 100 bytes at a time,
/// recording the largest read size requested.
struct Source {
	data: Bytes,
	largest: Arc<Mutex<usize>>,
}

#[async_trait]
impl AsyncBackend for Source {
	fn kind(&self) -> StreamKind { StreamKind::Sock }

	async fn open(&mut self, _: &Url) -> Result<Option<u64>> { Ok(None) }

	async fn close(&mut self) -> Result { Ok(()) }

	async fn read(&mut self, size: usize) -> Result<Bytes> {
		if let Ok(mut largest) = self.largest.lock() {
			*largest = (*largest).max(size);
		}
		if self.data.is_empty() {
			return Err(Error::closed(OperationKind::Read))
		}
		let len = size.min(self.data.len()).min(100);
		Ok(self.data.split_to(len))
	}

	async fn write(&mut self, _: &[u8]) -> Result<usize> {
		Err(Error::unsupported(OperationKind::Write, "source is read-only"))
	}
}

/// A sink accepting `accept` writes before failing every write after. A set
/// `kill` handle is killed inside each accepted write, before it reports
/// success.
#[derive(Default)]
struct Sink {
	accept: Option<usize>,
	accepted: usize,
	kill: Option<TransferHandle>,
}

#[async_trait]
impl AsyncBackend for Sink {
	fn kind(&self) -> StreamKind { StreamKind::Sock }

	async fn open(&mut self, _: &Url) -> Result<Option<u64>> { Ok(None) }

	async fn close(&mut self) -> Result { Ok(()) }

	async fn read(&mut self, _: usize) -> Result<Bytes> {
		Err(Error::unsupported(OperationKind::Read, "sink is write-only"))
	}

	async fn write(&mut self, data: &[u8]) -> Result<usize> {
		if self.accept.is_some_and(|accept| self.accepted >= accept) {
			return Err(Error::io(OperationKind::Write, io::Error::from(io::ErrorKind::BrokenPipe)))
		}
		self.accepted += 1;
		if let Some(handle) = &self.kill {
			handle.kill();
		}
		Ok(data.len())
	}
}

fn sink(sink: Sink, options: StreamOptions) -> AsyncStream {
	AsyncStream::with_backend(Url::from_data(&[]), Box::new(sink), options)
}

#[tokio::test(start_paused = true)]
async fn rate_limited() -> Result {
	common::trace();
	let data = common::sample(65536);
	let mut transfer = data_transfer(&data, 16384)?;
	let scheduler = transfer.scheduler().clone();

	assert_eq!(transfer.open(0).await?, (0, Some(65536)));
	assert_eq!(transfer.state(), TransferState::Opened);

	let mut reports = Vec::new();
	let status = transfer.done(|progress| {
		reports.push(Report {
			status: progress.status.to_string(),
			time: scheduler.time(),
			offset: progress.offset,
			saved: progress.saved,
		});
		Action::Continue
	}).await?;

	assert!(matches!(status, Status::Closed));
	let expected: Vec<_> = (0..4).map(|i| Report {
		status: "ok".into(),
		time: i * 1000,
		offset: (i + 1) * 16384,
		saved: (i + 1) * 16384,
	}).chain([Report {
		status: "closed".into(),
		time: 3000,
		offset: 65536,
		saved: 65536,
	}]).collect();
	assert_eq!(reports, expected);
	assert!(scheduler.time() >= 3000);
	assert!(output(&mut transfer)? == data);

	transfer.close().await?;
	assert_eq!(transfer.state(), TransferState::Closed);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_never_exceeded() -> Result {
	let data = common::sample(100_000);
	let mut transfer = data_transfer(&data, 30000)?;
	let scheduler = transfer.scheduler().clone();
	transfer.open(0).await?;

	let mut saved = Vec::new();
	transfer.done(|progress| {
		saved.push((scheduler.time(), progress.saved));
		Action::Continue
	}).await?;

	for &(time, saved) in &saved {
		let windows = time / 1000 + 1;
		assert!(saved <= windows * 30000, "{saved} bytes moved by {time}ms");
	}
	assert_eq!(saved.last().map(|&(_, saved)| saved), Some(100_000));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn unlimited() -> Result {
	let data = common::sample(1_000_000);
	let mut transfer = data_transfer(&data, 0)?;
	transfer.open(0).await?;

	let mut last = None;
	let status = transfer.done(|progress| {
		last = Some((progress.saved, progress.rate));
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Closed));
	assert_eq!(last.map(|(saved, _)| saved), Some(1_000_000));
	assert!(output(&mut transfer)? == data);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn open_at_offset() -> Result {
	let mut transfer = data_transfer(b"0123456789", 0)?;
	assert_eq!(transfer.open(4).await?, (4, Some(10)));
	transfer.done(|_| Action::Continue).await?;
	assert_eq!(output(&mut transfer)?, b"456789");
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume() -> Result {
	let data = common::sample(1_000_000);
	let mut transfer = data_transfer(&data, 0)?;
	let handle = transfer.handle();
	transfer.open(0).await?;

	let mut statuses = Vec::new();
	let status = transfer.done(|progress| {
		statuses.push(progress.status.to_string());
		handle.pause();
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Paused));
	assert!(handle.is_paused());
	assert_eq!(statuses, ["ok", "paused"]);
	assert_eq!(transfer.state(), TransferState::Opened);

	let paused_at = transfer.istream().map(AsyncStream::offset);
	assert!(paused_at < Some(1_000_000));
	assert!(transfer.done(|_| Action::Continue).await.is_err());

	let mut last = None;
	let status = transfer.resume(|progress| {
		last = Some(progress.saved);
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Closed));
	assert!(!handle.is_paused());
	assert_eq!(last, Some(1_000_000));
	assert!(output(&mut transfer)? == data);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn resume_without_pause() -> Result {
	let mut transfer = data_transfer(b"data", 0)?;
	assert!(transfer.resume(|_| Action::Continue).await.is_err());
	transfer.open(0).await?;
	assert!(matches!(transfer.resume(|_| Action::Continue).await?, Status::Ok));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn kill_during_delay() -> Result {
	let data = common::sample(65536);
	let mut transfer = data_transfer(&data, 16384)?;
	let handle = transfer.handle();
	transfer.open(0).await?;

	tokio::spawn(async move {
		tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
		handle.kill();
	});

	let mut last = None;
	let status = transfer.done(|progress| {
		last = Some((progress.status.to_string(), progress.saved));
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Killed));
	assert_eq!(last, Some(("killed".to_owned(), 32768)));
	assert_eq!(transfer.state(), TransferState::Killing);

	transfer.close().await?;
	assert_eq!(transfer.state(), TransferState::Closed);
	transfer.close().await?;
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_is_kill() -> Result {
	let mut transfer = data_transfer(&common::sample(100_000), 0)?;
	transfer.open(0).await?;

	let mut calls = 0;
	let status = transfer.done(|_| {
		calls += 1;
		Action::Stop
	}).await?;
	assert!(matches!(status, Status::Killed));
	assert_eq!(calls, 2);
	transfer.exit().await
}

#[tokio::test(start_paused = true)]
async fn kill_before_open() -> Result {
	let mut transfer = data_transfer(b"data", 0)?;
	transfer.kill();
	assert!(transfer.open(0).await.unwrap_err().is_killed());

	transfer.close().await?;
	transfer.open(0).await?;
	assert!(matches!(transfer.done(|_| Action::Continue).await?, Status::Closed));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn setup_requires_closed() -> Result {
	let mut transfer = data_transfer(b"data", 0)?;
	transfer.open(0).await?;
	assert!(transfer.set_istream_data(b"other").is_err());
	assert!(transfer.open(0).await.is_err());
	transfer.close().await?;
	transfer.set_istream_data(b"other")
}

#[tokio::test(start_paused = true)]
async fn missing_streams() -> Result {
	let mut transfer = Transfer::new(Scheduler::current()?);
	assert!(transfer.open(0).await.is_err());
	assert_eq!(transfer.state(), TransferState::Closed);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn open_failure_is_reported() -> Result {
	let mut transfer = Transfer::new(Scheduler::current()?);
	transfer.set_istream_url("does/not/exist.bin")?;
	transfer.set_ostream_data()?;

	let mut reports = Vec::new();
	let status = transfer.open_done(0, |progress| {
		reports.push(progress.status.to_string());
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Failed(_)));
	assert_eq!(reports.len(), 1);
	assert!(reports[0].starts_with("failed"));
	assert_eq!(transfer.state(), TransferState::Closed);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn ctrl_runs_before_open() -> Result {
	let mut transfer = data_transfer(b"data", 0)?;
	transfer.set_ctrl(|istream, _| {
		istream.set_timeout(std::time::Duration::from_secs(1));
		Ok(())
	})?;
	transfer.open(0).await?;
	assert_eq!(transfer.istream().map(AsyncStream::timeout), Some(std::time::Duration::from_secs(1)));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn borrowed_streams_outlive_transfer() -> Result {
	let mut istream = AsyncStream::from_data(b"borrowed");
	let mut ostream = AsyncStream::from_data(&[]);
	{
		let mut transfer = Transfer::new(Scheduler::current()?);
		transfer.set_istream_ref(&mut istream)?;
		transfer.set_ostream_ref(&mut ostream)?;
		transfer.open(0).await?;
		transfer.done(|_| Action::Continue).await?;
		transfer.close().await?;
	}

	assert!(istream.is_closed());
	assert_eq!(&ostream.data()?[..], b"borrowed");
	istream.open().await?;
	assert_eq!(&istream.read(8).await?[..], b"borrowed");
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn autoclose() -> Result {
	let mut transfer = Transfer::with_options(
		Scheduler::current()?,
		TransferOptions::new().with_autoclose(true)
	);
	transfer.set_istream_data(b"data")?;
	transfer.set_ostream_data()?;
	transfer.open(0).await?;

	let mut closed_first = false;
	let handle = transfer.handle();
	transfer.done(|progress| {
		if progress.status.is_terminal() {
			closed_first = handle.state() == TransferState::Closed;
		}
		Action::Continue
	}).await?;
	assert!(closed_first);
	assert!(transfer.istream().is_some_and(AsyncStream::is_closed));
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn huge_rate_on_unsized_input() -> Result {
	let data = common::sample(1000);
	let largest = Arc::new(Mutex::new(0));
	let mut transfer = Transfer::with_options(
		Scheduler::current()?,
		TransferOptions::new().with_rate(1 << 42)
	);
	transfer.set_istream(AsyncStream::with_backend(
		Url::from_data(&[]),
		Box::new(Source { data: data.clone().into(), largest: largest.clone() }),
		StreamOptions::new()
	))?;
	transfer.set_ostream_data()?;

	let status = transfer.open_done(0, |_| Action::Continue).await?;
	assert!(matches!(status, Status::Closed));
	assert!(output(&mut transfer)? == data);
	let largest = *largest.lock().map_err(|_| Error::from("poisoned lock"))?;
	assert!(largest > 0 && largest <= BLOCK_SIZE, "requested {largest} bytes");
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_reports_failed_sync() -> Result {
	let mut transfer = Transfer::new(Scheduler::current()?);
	let handle = transfer.handle();
	transfer.set_istream_data(&common::sample(100))?;
	transfer.set_ostream(sink(
		Sink { accept: Some(0), ..Sink::default() },
		StreamOptions::new().with_write_cache(4096)
	))?;
	transfer.open(0).await?;

	let status = transfer.done(|_| {
		handle.pause();
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Paused));

	let err = transfer.close().await.unwrap_err();
	assert_eq!(err.operation(), OperationKind::Write);
	assert_eq!(transfer.state(), TransferState::Closed);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn kill_during_successful_write() -> Result {
	let mut transfer = data_transfer(&common::sample(100_000), 0)?;
	let handle = transfer.handle();
	transfer.set_ostream(sink(Sink { kill: Some(handle), ..Sink::default() }, StreamOptions::new()))?;
	transfer.open(0).await?;

	let mut last = None;
	let status = transfer.done(|progress| {
		last = Some((progress.status.to_string(), progress.saved));
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Killed));
	assert_eq!(last, Some(("killed".to_owned(), 0)));
	assert_eq!(transfer.state(), TransferState::Killing);

	transfer.close().await?;
	assert_eq!(transfer.state(), TransferState::Closed);
	Ok(())
}

#[tokio::test(start_paused = true)]
async fn partial_failure_counts_confirmed_writes() -> Result {
	let mut transfer = data_transfer(&common::sample(3 * BLOCK_SIZE), 0)?;
	transfer.set_ostream(sink(Sink { accept: Some(1), ..Sink::default() }, StreamOptions::new()))?;
	transfer.open(0).await?;

	let mut reports = Vec::new();
	let status = transfer.done(|progress| {
		reports.push((progress.status.is_terminal(), progress.offset, progress.saved));
		Action::Continue
	}).await?;
	assert!(matches!(status, Status::Failed(_)));
	assert_eq!(
		reports,
		[
			(false, BLOCK_SIZE as u64, BLOCK_SIZE as u64),
			(true, 2 * BLOCK_SIZE as u64, BLOCK_SIZE as u64),
		]
	);
	Ok(())
}

#[tokio::test]
async fn file_to_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
	let dir = tempdir()?;
	let source = dir.path().join("source.bin");
	let target = dir.path().join("target.bin");
	let data = common::sample(200_000);
	fs::write(&source, &data)?;
	fs::write(&target, "stale")?;

	let mut transfer = Transfer::new(Scheduler::current()?);
	transfer.set_istream_url(source.to_str().ok_or("path is not UTF-8")?)?;
	transfer.set_ostream_url(target.to_str().ok_or("path is not UTF-8")?)?;
	let status = transfer.open_done(0, |_| Action::Continue).await?;
	assert!(matches!(status, Status::Closed));
	transfer.close().await?;

	assert!(fs::read(&target)? == data);
	Ok(())
}
