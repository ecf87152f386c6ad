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

//! Rate-limited, pausable and killable copies between async streams.
//!
//! A [`Transfer`] moves bytes from an input stream to an output stream. Once
//! opened, [`Transfer::done`] runs the copy loop to completion, reporting
//! [`Progress`] after the first write, about once per second, and once more
//! with a terminal status. A [`TransferHandle`] kills, pauses, or limits the
//! rate of a running transfer from any thread.
//!
//! Rate limits are applied over whole one-second windows: once the limit is
//! reached within a window, the next read waits for the window to end.

pub(crate) mod window;

use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use amplify_derive::Display;
use tracing::{debug, trace, warn};
use crate::async_streams::AsyncStream;
use crate::options::{StreamOptions, TransferOptions};
use crate::scheduler::Scheduler;
use crate::state::{atomic_state, KillHandle, StateCell};
use crate::streams::{Error, OperationKind, Result};
use crate::url::Url;
use window::Window;

/// A stream attached to a transfer, either owned by it or borrowed.
pub enum Held<'s> {
	Owned(Box<AsyncStream>),
	Borrowed(&'s mut AsyncStream),
}

impl Deref for Held<'_> {
	type Target = AsyncStream;

	fn deref(&self) -> &AsyncStream {
		match self {
			Self::Owned(stream) => stream,
			Self::Borrowed(stream) => stream,
		}
	}
}

impl DerefMut for Held<'_> {
	fn deref_mut(&mut self) -> &mut AsyncStream {
		match self {
			Self::Owned(stream) => stream,
			Self::Borrowed(stream) => stream,
		}
	}
}

impl Held<'_> {
	/// Returns `true` if the transfer owns the stream.
	pub fn is_owned(&self) -> bool { matches!(self, Self::Owned(_)) }
}

#[derive(Copy, Clone, Debug, Default, Display, Eq, PartialEq)]
#[repr(u8)]
pub enum TransferState {
	#[default]
	#[display("closed")]
	Closed = 0,
	#[display("opening")]
	Opening = 1,
	#[display("opened")]
	Opened = 2,
	#[display("killing")]
	Killing = 3,
}

atomic_state!(TransferState { Closed = 0, Opening = 1, Opened = 2, Killing = 3 });

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
enum Pause {
	Running = 0,
	Pausing = 1,
	Paused = 2,
}

atomic_state!(Pause { Running = 0, Pausing = 1, Paused = 2 });

/// The status carried by a progress report.
#[derive(Debug)]
pub enum Status {
	/// The transfer is running.
	Ok,
	/// The transfer paused and can be resumed.
	Paused,
	/// The input ended and all data was written.
	Closed,
	Killed,
	Timeout,
	Failed(Error),
}

impl Status {
	/// Returns `true` if the transfer stopped for good.
	pub fn is_terminal(&self) -> bool { !matches!(self, Self::Ok | Self::Paused) }

	fn from_error(error: Error) -> Self {
		if error.is_killed() {
			Self::Killed
		} else if error.is_timeout() {
			Self::Timeout
		} else {
			Self::Failed(error)
		}
	}
}

impl Display for Status {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Ok => f.write_str("ok"),
			Self::Paused => f.write_str("paused"),
			Self::Closed => f.write_str("closed"),
			Self::Killed => f.write_str("killed"),
			Self::Timeout => f.write_str("timed out"),
			Self::Failed(error) => write!(f, "failed ({error})"),
		}
	}
}

/// A progress report.
#[derive(Debug)]
pub struct Progress {
	pub status: Status,
	/// The input stream offset.
	pub offset: u64,
	/// The input stream size, if known.
	pub size: Option<u64>,
	/// The number of bytes moved since the transfer started.
	pub saved: u64,
	/// Bytes per second over the last window, or the average over the whole
	/// transfer in a terminal report.
	pub rate: usize,
}

impl Progress {
	/// Returns the completion percentage, if the size is known.
	pub fn percent(&self) -> Option<u64> {
		self.size.map(|size| if size == 0 { 100 } else { self.offset * 100 / size })
	}
}

/// What to do after a progress report.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Action {
	#[default]
	Continue,
	/// Stops the transfer as if it were killed.
	Stop,
}

struct Shared {
	state: StateCell<TransferState>,
	pause: StateCell<Pause>,
	rate: AtomicUsize,
	streams: Mutex<[Option<KillHandle>; 2]>,
}

impl Shared {
	fn kill(&self) {
		let killed =
			self.state.transition(TransferState::Opened, TransferState::Killing).is_ok() ||
			self.state.transition(TransferState::Opening, TransferState::Killing).is_ok() ||
			self.state.transition(TransferState::Closed, TransferState::Killing).is_ok();
		if killed {
			debug!("transfer killed");
			let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
			for stream in streams.iter().flatten() {
				stream.kill();
			}
		}
	}

	fn is_killed(&self) -> bool { self.state.load() == TransferState::Killing }

	fn set_streams(&self, streams: [Option<KillHandle>; 2]) {
		*self.streams.lock().unwrap_or_else(PoisonError::into_inner) = streams;
	}
}

/// A cloneable handle controlling a transfer from any thread.
#[derive(Clone)]
pub struct TransferHandle(Arc<Shared>);

impl TransferHandle {
	pub fn state(&self) -> TransferState { self.0.state.load() }

	/// Returns `true` if the transfer stopped on a pause request.
	pub fn is_paused(&self) -> bool { self.0.pause.load() == Pause::Paused }

	/// Kills the transfer, failing any pending stream operation. A closed
	/// transfer fails its next open instead, until it is closed again. Killing
	/// is idempotent.
	pub fn kill(&self) { self.0.kill() }

	/// Requests an opened transfer to pause after its current write.
	pub fn pause(&self) {
		if self.state() == TransferState::Opened {
			let _ = self.0.pause.transition(Pause::Running, Pause::Pausing);
		}
	}

	/// Sets the rate limit in bytes per second, or zero for no limit. Takes
	/// effect at the next read.
	pub fn limit_rate(&self, rate: usize) {
		self.0.rate.store(rate, Ordering::Relaxed)
	}

	pub fn rate(&self) -> usize { self.0.rate.load(Ordering::Relaxed) }
}

impl Debug for TransferHandle {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransferHandle")
		 .field("state", &self.state())
		 .field("rate", &self.rate())
		 .finish_non_exhaustive()
	}
}

type Ctrl<'s> = Box<dyn FnMut(&mut AsyncStream, &mut AsyncStream) -> Result + Send + 's>;

/// A copy from one async stream to another.
pub struct Transfer<'s> {
	shared: Arc<Shared>,
	scheduler: Scheduler,
	istream: Option<Held<'s>>,
	ostream: Option<Held<'s>>,
	ctrl: Option<Ctrl<'s>>,
	autoclose: bool,
	window: Window,
}

fn not_closed() -> Error {
	Error::state(OperationKind::Other("set up transfer"), "transfer must be closed")
}

impl<'s> Transfer<'s> {
	pub fn new(scheduler: Scheduler) -> Self {
		Self::with_options(scheduler, TransferOptions::new())
	}

	pub fn with_options(scheduler: Scheduler, options: TransferOptions) -> Self {
		let TransferOptions { rate, autoclose } = options;
		Self {
			shared: Arc::new(Shared {
				state: StateCell::new(TransferState::Closed),
				pause: StateCell::new(Pause::Running),
				rate: AtomicUsize::new(rate),
				streams: Mutex::new([None, None]),
			}),
			scheduler,
			istream: None,
			ostream: None,
			ctrl: None,
			autoclose,
			window: Window::new(0),
		}
	}

	/// Returns a handle controlling this transfer.
	pub fn handle(&self) -> TransferHandle { TransferHandle(self.shared.clone()) }

	pub fn state(&self) -> TransferState { self.shared.state.load() }

	pub fn scheduler(&self) -> &Scheduler { &self.scheduler }

	pub fn istream(&self) -> Option<&AsyncStream> { self.istream.as_deref() }

	pub fn ostream(&self) -> Option<&AsyncStream> { self.ostream.as_deref() }

	pub fn istream_mut(&mut self) -> Option<&mut AsyncStream> { self.istream.as_deref_mut() }

	pub fn ostream_mut(&mut self) -> Option<&mut AsyncStream> { self.ostream.as_deref_mut() }

	fn set_stream(&mut self, output: bool, stream: Held<'s>) -> Result {
		if self.state() != TransferState::Closed {
			return Err(not_closed())
		}
		if output {
			self.ostream = Some(stream);
		} else {
			self.istream = Some(stream);
		}
		Ok(())
	}

	/// Sets an owned input stream.
	pub fn set_istream(&mut self, stream: AsyncStream) -> Result {
		self.set_stream(false, Held::Owned(Box::new(stream)))
	}

	/// Sets a borrowed input stream. Closing the transfer still closes it.
	pub fn set_istream_ref(&mut self, stream: &'s mut AsyncStream) -> Result {
		self.set_stream(false, Held::Borrowed(stream))
	}

	/// Sets the input stream to a new stream for `url`.
	pub fn set_istream_url(&mut self, url: &str) -> Result {
		let stream = AsyncStream::with_url(Url::parse(url)?, StreamOptions::new())?;
		self.set_istream(stream)
	}

	/// Sets the input stream to read from `data`.
	pub fn set_istream_data(&mut self, data: &[u8]) -> Result {
		self.set_istream(AsyncStream::from_data(data))
	}

	/// Sets an owned output stream.
	pub fn set_ostream(&mut self, stream: AsyncStream) -> Result {
		self.set_stream(true, Held::Owned(Box::new(stream)))
	}

	/// Sets a borrowed output stream.
	pub fn set_ostream_ref(&mut self, stream: &'s mut AsyncStream) -> Result {
		self.set_stream(true, Held::Borrowed(stream))
	}

	/// Sets the output stream to a new stream for `url`. Files are created or
	/// truncated.
	pub fn set_ostream_url(&mut self, url: &str) -> Result {
		let stream = AsyncStream::with_output_url(Url::parse(url)?, StreamOptions::new())?;
		self.set_ostream(stream)
	}

	/// Sets the output stream to write into memory.
	pub fn set_ostream_data(&mut self) -> Result {
		self.set_ostream(AsyncStream::from_data(&[]))
	}

	/// Installs a callback run with both streams before each open.
	pub fn set_ctrl<F>(&mut self, ctrl: F) -> Result
	where F: FnMut(&mut AsyncStream, &mut AsyncStream) -> Result + Send + 's {
		if self.state() != TransferState::Closed {
			return Err(not_closed())
		}
		self.ctrl = Some(Box::new(ctrl));
		Ok(())
	}

	/// Sets whether both streams close before the terminal progress report.
	pub fn set_autoclose(&mut self, value: bool) { self.autoclose = value }

	/// Sets the rate limit in bytes per second, or zero for no limit.
	pub fn limit_rate(&self, rate: usize) { self.handle().limit_rate(rate) }

	pub fn pause(&self) { self.handle().pause() }

	pub fn kill(&self) { self.shared.kill() }

	/// Opens both streams, seeking the input to `offset`. Returns the input
	/// offset and size.
	pub async fn open(&mut self, offset: u64) -> Result<(u64, Option<u64>)> {
		let op = OperationKind::Open;
		if let Err(state) = self.shared.state.transition(TransferState::Closed, TransferState::Opening) {
			return Err(if state == TransferState::Killing {
				Error::killed(op)
			} else {
				Error::state(op, "transfer is not closed")
			})
		}

		let Self { shared, istream, ostream, ctrl, .. } = self;
		let (Some(istream), Some(ostream)) = (istream.as_deref_mut(), ostream.as_deref_mut()) else {
			shared.state.store(TransferState::Closed);
			return Err(Error::state(op, "transfer streams are not set"))
		};
		shared.set_streams([Some(istream.kill_handle()), Some(ostream.kill_handle())]);

		let opened = async {
			if let Some(ctrl) = ctrl {
				ctrl(istream, ostream)?;
			}
			istream.open_seek(offset).await?;
			ostream.open().await
		}.await;

		let opened = opened.and_then(|_| {
			shared.state
				  .transition(TransferState::Opening, TransferState::Opened)
				  .map(drop)
				  .map_err(|_| Error::killed(op))
		});
		if let Err(err) = opened {
			let _ = istream.close().await;
			let _ = ostream.close().await;
			shared.set_streams([None, None]);
			shared.state.store(TransferState::Closed);
			debug!(%err, "transfer failed to open");
			return Err(err)
		}

		shared.pause.store(Pause::Running);
		debug!(
			istream = %istream.url(),
			ostream = %ostream.url(),
			offset = istream.offset(),
			size = ?istream.size(),
			"transfer opened"
		);
		Ok((istream.offset(), istream.size()))
	}

	/// Runs the copy loop until the input ends, the transfer fails, is killed,
	/// or pauses. Returns the status of the final progress report.
	pub async fn done(&mut self, mut progress: impl FnMut(&Progress) -> Action + Send) -> Result<Status> {
		let op = OperationKind::Other("run transfer");
		if self.state() != TransferState::Opened {
			return Err(Error::state(op, "transfer is not open"))
		}
		if self.shared.pause.load() == Pause::Paused {
			return Err(Error::state(op, "transfer is paused"))
		}

		self.window = Window::new(self.scheduler.time());
		self.run(&mut progress).await
	}

	/// Opens the transfer at `offset`, then runs it. An open failure is also
	/// reported to `progress` as a terminal status.
	pub async fn open_done(&mut self, offset: u64, mut progress: impl FnMut(&Progress) -> Action + Send) -> Result<Status> {
		if let Err(err) = self.open(offset).await {
			let report = Window::new(0).progress(Status::from_error(err), offset, None);
			progress(&report);
			return Ok(report.status)
		}
		self.done(progress).await
	}

	/// Resumes a paused transfer with a fresh rate window. Resuming a transfer
	/// that is not paused cancels a pending pause request and returns
	/// [`Status::Ok`].
	pub async fn resume(&mut self, mut progress: impl FnMut(&Progress) -> Action + Send) -> Result<Status> {
		if self.state() != TransferState::Opened {
			return Err(Error::state(OperationKind::Other("resume transfer"), "transfer is not open"))
		}
		if self.shared.pause.swap(Pause::Running) != Pause::Paused {
			return Ok(Status::Ok)
		}

		self.window.reset(self.scheduler.time());
		debug!(saved = self.window.saved(), "transfer resumed");
		self.run(&mut progress).await
	}

	async fn run(&mut self, progress: &mut (dyn FnMut(&Progress) -> Action + Send)) -> Result<Status> {
		let Self { shared, scheduler, istream, ostream, window, autoclose, .. } = self;
		let (Some(istream), Some(ostream)) = (istream.as_deref_mut(), ostream.as_deref_mut()) else {
			return Err(Error::state(OperationKind::Other("run transfer"), "transfer streams are not set"))
		};

		enum Ending {
			Closed,
			Killed,
			Read(Error),
			Write(Error),
		}

		let ending = loop {
			if shared.is_killed() {
				break Ending::Killed
			}

			let limit = shared.rate.load(Ordering::Relaxed);
			if let Some(delay) = window.delay(scheduler.time(), limit) {
				trace!(delay, "transfer rate limited");
				if let Err(err) = istream.task(delay).await {
					break Ending::Read(err)
				}
			}

			let size = window.budget(scheduler.time(), limit);
			let data = match istream.read(size).await {
				Ok(data) if data.is_empty() => {
					tokio::task::yield_now().await;
					continue
				}
				Ok(data) => data,
				Err(err) if err.is_closed() => break Ending::Closed,
				Err(err) => break Ending::Read(err)
			};

			if shared.is_killed() {
				break Ending::Killed
			}
			if let Err(err) = ostream.write(&data).await {
				break Ending::Write(err)
			}
			if shared.is_killed() {
				break Ending::Killed
			}

			if window.record(scheduler.time(), data.len()) {
				let report = window.progress(Status::Ok, istream.offset(), istream.size());
				if progress(&report) == Action::Stop {
					shared.kill();
					break Ending::Killed
				}
			}

			if shared.pause.transition(Pause::Pausing, Pause::Paused).is_ok() {
				debug!(saved = window.saved(), "transfer paused");
				progress(&window.progress(Status::Paused, istream.offset(), istream.size()));
				return Ok(Status::Paused)
			}

			if istream.left() == Some(0) {
				break Ending::Closed
			}
		};

		let status = match ending {
			Ending::Closed => match ostream.sync(true).await {
				Ok(()) => Status::Closed,
				Err(err) => Status::from_error(err),
			},
			Ending::Killed => Status::Killed,
			Ending::Read(err) => {
				if !err.is_killed() {
					let _ = ostream.sync(true).await;
				}
				Status::from_error(err)
			}
			Ending::Write(err) => Status::from_error(err),
		};
		let status = if shared.is_killed() && !matches!(status, Status::Closed) {
			Status::Killed
		} else {
			status
		};

		if *autoclose {
			let closed = close_streams(istream, ostream).await;
			shared.set_streams([None, None]);
			shared.state.store(TransferState::Closed);
			if let Err(err) = closed {
				debug!(%err, "transfer streams failed to close");
			}
		}

		let mut report = window.progress(status, istream.offset(), istream.size());
		report.rate = window.average(scheduler.time());
		debug!(saved = report.saved, rate = report.rate, status = %report.status, "transfer finished");
		progress(&report);
		Ok(report.status)
	}

	/// Closes both streams, syncing the output first if the transfer is open.
	/// The transfer is closed even if the sync fails, but the sync error is
	/// returned. Closing a closed transfer does nothing.
	pub async fn close(&mut self) -> Result {
		let state = self.state();
		if state == TransferState::Closed {
			return Ok(())
		}

		let Self { shared, istream, ostream, .. } = self;
		let result = match (istream.as_deref_mut(), ostream.as_deref_mut()) {
			(Some(istream), Some(ostream)) => {
				let synced = if state == TransferState::Opened && ostream.is_opened() {
					ostream.sync(true).await
				} else {
					Ok(())
				};
				if let Err(err) = &synced {
					warn!(%err, "transfer output failed to sync before closing");
				}
				close_streams(istream, ostream).await.and(synced)
			}
			_ => Ok(())
		};

		shared.set_streams([None, None]);
		shared.pause.store(Pause::Running);
		shared.state.store(TransferState::Closed);
		debug!("transfer closed");
		result
	}

	/// Kills the transfer, then closes it.
	pub async fn exit(&mut self) -> Result {
		self.kill();
		self.close().await
	}

	/// Takes the owned output stream, leaving none. Fails unless closed.
	pub fn take_ostream(&mut self) -> Result<Option<Held<'s>>> {
		if self.state() != TransferState::Closed {
			return Err(not_closed())
		}
		Ok(self.ostream.take())
	}
}

async fn close_streams(istream: &mut AsyncStream, ostream: &mut AsyncStream) -> Result {
	let input = istream.close().await;
	let output = ostream.close().await;
	input.and(output)
}

impl Drop for Transfer<'_> {
	fn drop(&mut self) {
		let state = self.state();
		if matches!(state, TransferState::Opening | TransferState::Opened) {
			warn!(%state, "transfer dropped while open");
			self.shared.kill();
		}
	}
}

impl Debug for Transfer<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Transfer")
		 .field("state", &self.state())
		 .field("istream", &self.istream.as_deref())
		 .field("ostream", &self.ostream.as_deref())
		 .field("saved", &self.window.saved())
		 .finish_non_exhaustive()
	}
}
