// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use crate::{BLOCK_SIZE, DEFAULT_TIMEOUT};

/// Options for tuning stream behavior.
///
/// # Timeout
///
/// The maximum time a single backend operation may take before failing with a
/// timeout. Defaults to 10s.
///
/// # Read cache
///
/// The minimum size of reads from the backend. Surplus data is held for later
/// reads, trading memory for fewer backend calls. Zero disables the cache.
///
/// # Write cache
///
/// The watermark below which writes are held rather than passed to the
/// backend. The cache is flushed when a write would reach it, and by `sync`.
/// Zero disables the cache.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct StreamOptions {
	pub timeout: Duration,
	pub read_cache: usize,
	pub write_cache: usize,
}

impl Default for StreamOptions {
	fn default() -> Self { Self::new() }
}

impl StreamOptions {
	/// Creates a new set of stream options, with caching disabled.
	pub const fn new() -> Self {
		Self {
			timeout: DEFAULT_TIMEOUT,
			read_cache: 0,
			write_cache: 0,
		}
	}

	/// Presets the options to cache one block in each direction.
	pub const fn buffered() -> Self {
		Self {
			read_cache: BLOCK_SIZE,
			write_cache: BLOCK_SIZE,
			..Self::new()
		}
	}

	/// Returns the operation timeout.
	#[inline]
	pub const fn timeout(&self) -> Duration { self.timeout }

	/// Returns the read cache size.
	#[inline]
	pub const fn read_cache(&self) -> usize { self.read_cache }

	/// Returns the write cache watermark.
	#[inline]
	pub const fn write_cache(&self) -> usize { self.write_cache }

	/// Sets the operation timeout.
	#[inline]
	pub fn set_timeout(&mut self, value: Duration) {
		self.timeout = value;
	}

	/// Sets the read cache size.
	#[inline]
	pub fn set_read_cache(&mut self, value: usize) {
		self.read_cache = value;
	}

	/// Sets the write cache watermark.
	#[inline]
	pub fn set_write_cache(&mut self, value: usize) {
		self.write_cache = value;
	}

	/// Sets the operation timeout.
	#[inline]
	pub const fn with_timeout(mut self, value: Duration) -> Self {
		self.timeout = value;
		self
	}

	/// Sets the read cache size.
	#[inline]
	pub const fn with_read_cache(mut self, value: usize) -> Self {
		self.read_cache = value;
		self
	}

	/// Sets the write cache watermark.
	#[inline]
	pub const fn with_write_cache(mut self, value: usize) -> Self {
		self.write_cache = value;
		self
	}
}

/// Options for a [`Transfer`](crate::Transfer).
///
/// # Rate
///
/// The maximum number of bytes moved per second, or zero for no limit. The
/// limit is applied over whole one-second windows.
///
/// # Autoclose
///
/// Closes both streams before the final progress report, rather than leaving
/// them open until the transfer is closed explicitly.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct TransferOptions {
	pub rate: usize,
	pub autoclose: bool,
}

impl TransferOptions {
	pub const fn new() -> Self {
		Self { rate: 0, autoclose: false }
	}

	#[inline]
	pub const fn with_rate(mut self, value: usize) -> Self {
		self.rate = value;
		self
	}

	#[inline]
	pub const fn with_autoclose(mut self, value: bool) -> Self {
		self.autoclose = value;
		self
	}
}

/// Options for a [`TransferPool`](crate::TransferPool).
///
/// # Max tasks
///
/// The number of transfers allowed to run at once. Submissions past this are
/// rejected. Defaults to 256.
///
/// # Stream
///
/// Options applied to every stream the pool creates.
///
/// # Exit timeout
///
/// How long dropping the pool waits for killed transfers to finish. Defaults to
/// 5s.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolOptions {
	pub max_tasks: usize,
	pub stream: StreamOptions,
	pub exit_timeout: Duration,
}

impl Default for PoolOptions {
	fn default() -> Self { Self::new() }
}

impl PoolOptions {
	pub const fn new() -> Self {
		Self {
			max_tasks: 256,
			stream: StreamOptions::new(),
			exit_timeout: Duration::from_secs(5),
		}
	}

	#[inline]
	pub const fn max_tasks(&self) -> usize { self.max_tasks }

	#[inline]
	pub const fn with_max_tasks(mut self, value: usize) -> Self {
		self.max_tasks = value;
		self
	}

	#[inline]
	pub const fn with_stream(mut self, value: StreamOptions) -> Self {
		self.stream = value;
		self
	}

	#[inline]
	pub const fn with_exit_timeout(mut self, value: Duration) -> Self {
		self.exit_timeout = value;
		self
	}
}
