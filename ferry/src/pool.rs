// SPDX-License-Identifier: Apache-2.0

//! A bounded set of transfers running on one scheduler.

use std::collections::HashMap;
use std::result;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use amplify_derive::Display;
use itertools::Itertools;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use crate::async_streams::AsyncStream;
use crate::options::{PoolOptions, TransferOptions};
use crate::scheduler::Scheduler;
use crate::streams;
use crate::transfer::{Action, Progress, Transfer, TransferHandle};
use crate::url::Url;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("the pool is full ({max} tasks)")]
	Full { max: usize },
	#[error("the pool is shutting down")]
	Killing,
	#[error(transparent)]
	Stream(#[from] streams::Error),
	#[error("the pool lock was poisoned")]
	Poisoned,
}

pub type Result<T = ()> = result::Result<T, Error>;

impl<T> From<PoisonError<T>> for Error {
	fn from(_: PoisonError<T>) -> Self { Self::Poisoned }
}

/// Identifies a task submitted to a pool.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("#{0}")]
pub struct TaskId(u64);

impl TaskId {
	pub fn get(self) -> u64 { self.0 }
}

/// How [`TransferPool::wait_all`] ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitStatus {
	/// Every task finished.
	Completed,
	/// The timeout elapsed with tasks still running.
	TimedOut { remaining: usize },
}

type ProgressFn = Box<dyn FnMut(&Progress) -> Action + Send>;
type CtrlFn = Box<dyn FnMut(&mut AsyncStream, &mut AsyncStream) -> streams::Result + Send>;

/// A copy from one URL to another, to be submitted to a pool.
pub struct Job {
	input: Url,
	output: Url,
	offset: u64,
	rate: usize,
	progress: Option<ProgressFn>,
	ctrl: Option<CtrlFn>,
}

impl Job {
	/// Creates a job copying `input` to `output`. Output files are created or
	/// truncated.
	pub fn new(input: &str, output: &str) -> streams::Result<Self> {
		Ok(Self {
			input: Url::parse(input)?,
			output: Url::parse(output)?,
			offset: 0,
			rate: 0,
			progress: None,
			ctrl: None,
		})
	}

	/// Starts reading the input at `offset`.
	pub fn with_offset(mut self, offset: u64) -> Self {
		self.offset = offset;
		self
	}

	/// Limits the rate in bytes per second.
	pub fn with_rate(mut self, rate: usize) -> Self {
		self.rate = rate;
		self
	}

	/// Sets the progress callback. It receives the terminal report too.
	pub fn on_progress<F>(mut self, progress: F) -> Self
	where F: FnMut(&Progress) -> Action + Send + 'static {
		self.progress = Some(Box::new(progress));
		self
	}

	/// Sets a callback run with both streams before they open.
	pub fn with_ctrl<F>(mut self, ctrl: F) -> Self
	where F: FnMut(&mut AsyncStream, &mut AsyncStream) -> streams::Result + Send + 'static {
		self.ctrl = Some(Box::new(ctrl));
		self
	}
}

#[derive(Default)]
struct Tasks {
	running: HashMap<TaskId, TransferHandle>,
	next: u64,
	closing: bool,
}

#[derive(Default)]
struct Shared {
	tasks: Mutex<Tasks>,
	empty: Condvar,
}

impl Shared {
	fn lock(&self) -> Result<MutexGuard<'_, Tasks>> { Ok(self.tasks.lock()?) }

	fn remove(&self, id: TaskId) {
		let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
		tasks.running.remove(&id);
		if tasks.running.is_empty() {
			self.empty.notify_all();
		}
	}
}

/// Runs up to a maximum number of transfers at once, rejecting submissions
/// past that. Finished transfers leave the pool on their own.
pub struct TransferPool {
	shared: Arc<Shared>,
	scheduler: Scheduler,
	options: PoolOptions,
}

impl TransferPool {
	pub fn new(scheduler: Scheduler, options: PoolOptions) -> Self {
		Self {
			shared: Arc::default(),
			scheduler,
			options,
		}
	}

	pub fn scheduler(&self) -> &Scheduler { &self.scheduler }

	pub fn options(&self) -> &PoolOptions { &self.options }

	/// Starts a transfer for `job`, returning its task id.
	pub fn submit(&self, job: Job) -> Result<TaskId> {
		let Job { input, output, offset, rate, progress, ctrl } = job;
		let mut tasks = self.shared.lock()?;
		if tasks.closing {
			return Err(Error::Killing)
		}
		let max = self.options.max_tasks;
		if tasks.running.len() >= max {
			return Err(Error::Full { max })
		}

		let options = TransferOptions::new().with_rate(rate).with_autoclose(true);
		let mut transfer = Transfer::with_options(self.scheduler.clone(), options);
		transfer.set_istream(AsyncStream::with_url(input, self.options.stream)?)?;
		transfer.set_ostream(AsyncStream::with_output_url(output, self.options.stream)?)?;
		if let Some(ctrl) = ctrl {
			transfer.set_ctrl(ctrl)?;
		}

		let id = TaskId(tasks.next);
		tasks.next += 1;
		tasks.running.insert(id, transfer.handle());
		drop(tasks);

		debug!(%id, offset, rate, "task submitted");
		let shared = self.shared.clone();
		let mut progress = progress.unwrap_or_else(|| Box::new(|_| Action::Continue));
		self.scheduler.spawn(async move {
			match transfer.open_done(offset, &mut progress).await {
				Ok(status) => debug!(%id, %status, "task finished"),
				Err(err) => warn!(%id, %err, "task failed"),
			}
			if let Err(err) = transfer.close().await {
				debug!(%id, %err, "task failed to close");
			}
			drop(transfer);
			shared.remove(id);
		});
		Ok(id)
	}

	/// Kills a running task. Returns `false` if no task has the id.
	pub fn kill_task(&self, id: TaskId) -> Result<bool> {
		let tasks = self.shared.lock()?;
		Ok(if let Some(handle) = tasks.running.get(&id) {
			debug!(%id, "killing task");
			handle.kill();
			true
		} else {
			false
		})
	}

	/// Kills every running task, returning how many were killed.
	pub fn kill_all(&self) -> Result<usize> {
		let tasks = self.shared.lock()?;
		if !tasks.running.is_empty() {
			debug!(tasks = %tasks.running.keys().sorted().join(", "), "killing all tasks");
		}
		for handle in tasks.running.values() {
			handle.kill();
		}
		Ok(tasks.running.len())
	}

	/// Stops accepting tasks, then kills every running task.
	pub fn kill(&self) -> Result<usize> {
		self.shared.lock()?.closing = true;
		self.kill_all()
	}

	/// Blocks the calling thread until every task finishes or `timeout`
	/// elapses. This must not be called from a thread running the pool's
	/// scheduler.
	pub fn wait_all(&self, timeout: Duration) -> Result<WaitStatus> {
		let tasks = self.shared.lock()?;
		let (tasks, _) = self.shared.empty.wait_timeout_while(
			tasks,
			timeout,
			|tasks| !tasks.running.is_empty()
		)?;
		Ok(match tasks.running.len() {
			0 => WaitStatus::Completed,
			remaining => WaitStatus::TimedOut { remaining }
		})
	}

	/// Returns the number of running tasks.
	pub fn len(&self) -> usize {
		self.shared
			.tasks
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.running
			.len()
	}

	pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Drop for TransferPool {
	fn drop(&mut self) {
		match self.kill() {
			Ok(0) => return,
			Ok(_) => { }
			Err(err) => {
				warn!(%err, "failed to kill pool tasks");
				return
			}
		}

		// Waiting on a runtime thread could block the tasks being waited on.
		if Handle::try_current().is_ok() {
			return
		}
		match self.wait_all(self.options.exit_timeout) {
			Ok(WaitStatus::Completed) => { }
			Ok(WaitStatus::TimedOut { remaining }) =>
				warn!(remaining, "pool dropped with tasks still running"),
			Err(err) => warn!(%err, "failed to wait for pool tasks"),
		}
	}
}
