// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;
use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use crate::streams::{Error, OperationKind, Result};

static GLOBAL: Lazy<std::result::Result<Runtime, String>> = Lazy::new(|| {
	Builder::new_multi_thread()
		.thread_name("ferry-worker")
		.enable_all()
		.build()
		.map_err(|err| err.to_string())
});

/// The execution context of async streams and transfers: a runtime handle and
/// a monotonic clock.
///
/// Time is measured from the scheduler's epoch with [`tokio::time::Instant`],
/// so a paused test clock applies to it.
#[derive(Clone, Debug)]
pub struct Scheduler {
	handle: Handle,
	epoch: Instant,
}

impl Scheduler {
	/// Creates a scheduler spawning onto `handle`.
	pub fn from_handle(handle: Handle) -> Self {
		let epoch = {
			let _guard = handle.enter();
			Instant::now()
		};
		Self { handle, epoch }
	}

	/// Returns a scheduler for the current runtime, or the process-wide
	/// default outside of one.
	pub fn current() -> Result<Self> {
		match Handle::try_current() {
			Ok(handle) => Ok(Self::from_handle(handle)),
			Err(_) => Self::global()
		}
	}

	/// Returns a scheduler for the process-wide default runtime, starting it on
	/// first use.
	pub fn global() -> Result<Self> {
		match &*GLOBAL {
			Ok(runtime) => Ok(Self::from_handle(runtime.handle().clone())),
			Err(err) => Err(Error::new(
				OperationKind::Task,
				crate::streams::ErrorKind::Other("default runtime failed to start"),
				Some(err.clone().into())
			))
		}
	}

	/// Returns the runtime handle.
	pub fn handle(&self) -> &Handle { &self.handle }

	/// Returns the milliseconds elapsed since the scheduler was created.
	pub fn time(&self) -> u64 {
		let _guard = self.handle.enter();
		self.epoch.elapsed().as_millis() as u64
	}

	/// Sleeps for `ms` milliseconds.
	pub async fn delay(&self, ms: u64) {
		time::sleep(Duration::from_millis(ms)).await
	}

	/// Spawns a task.
	pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
	where F: Future + Send + 'static, F::Output: Send + 'static {
		self.handle.spawn(future)
	}
}
