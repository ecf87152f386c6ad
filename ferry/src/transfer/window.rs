// SPDX-License-Identifier: Apache-2.0

//! One-second throughput windows for rate limiting and progress reports.

use crate::BLOCK_SIZE;
use super::{Progress, Status};

const WINDOW_MS: u64 = 1000;

/// Tracks bytes moved in whole-second windows. Times are milliseconds on any
/// monotonic clock.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Window {
	/// The time the transfer started or last resumed.
	base: u64,
	/// The start of the current window.
	base1s: u64,
	saved: u64,
	saved1s: u64,
	rate: usize,
}

impl Window {
	pub fn new(now: u64) -> Self {
		Self { base: now, base1s: now, saved: 0, saved1s: 0, rate: 0 }
	}

	/// Starts a fresh window, keeping the total.
	pub fn reset(&mut self, now: u64) {
		*self = Self { saved: self.saved, ..Self::new(now) }
	}

	/// Returns the total bytes moved.
	pub fn saved(&self) -> u64 { self.saved }

	/// Returns the rate over the last completed window, or the bytes moved so
	/// far in the first one.
	pub fn rate(&self) -> usize { self.rate }

	/// Returns the average rate since the transfer started or resumed.
	pub fn average(&self, now: u64) -> usize {
		let elapsed = now.saturating_sub(self.base);
		if elapsed > 0 {
			(self.saved.saturating_mul(WINDOW_MS) / elapsed) as usize
		} else {
			self.saved as usize
		}
	}

	fn elapsed(&self, now: u64) -> bool { now >= self.base1s + WINDOW_MS }

	/// Returns the number of bytes to read next under `limit` bytes per
	/// second, or a block if unlimited.
	pub fn budget(&self, now: u64, limit: usize) -> usize {
		if limit == 0 {
			return BLOCK_SIZE
		}
		let used = if self.elapsed(now) { 0 } else { self.saved1s as usize };
		limit.saturating_sub(used).max(1)
	}

	/// Returns the milliseconds to wait before the window resets, if `limit`
	/// was reached within it.
	pub fn delay(&self, now: u64, limit: usize) -> Option<u64> {
		let reached = limit > 0 && self.saved1s >= limit as u64;
		(reached && !self.elapsed(now)).then(|| self.base1s + WINDOW_MS - now)
	}

	/// Records `len` bytes written at `now`. Returns `true` if progress should
	/// be reported: after the first write, and whenever a window closes.
	pub fn record(&mut self, now: u64, len: usize) -> bool {
		let first = self.saved == 0;
		self.saved += len as u64;
		if self.elapsed(now) {
			let elapsed = now - self.base1s;
			self.rate = (self.saved1s.saturating_mul(WINDOW_MS) / elapsed) as usize;
			self.base1s = now;
			self.saved1s = len as u64;
			true
		} else {
			self.saved1s += len as u64;
			if now < self.base + WINDOW_MS {
				self.rate = self.saved1s as usize;
			}
			first
		}
	}

	/// Builds a progress report.
	pub fn progress(&self, status: Status, offset: u64, size: Option<u64>) -> Progress {
		Progress {
			status,
			offset,
			size,
			saved: self.saved,
			rate: self.rate,
		}
	}
}

#[cfg(test)]
mod test {
	use super::Window;

	#[test]
	fn limited_windows() {
		let mut window = Window::new(0);
		assert_eq!(window.budget(0, 100), 100);
		assert!(window.record(0, 100));
		assert_eq!(window.delay(0, 100), Some(1000));
		assert_eq!(window.delay(400, 100), Some(600));
		assert_eq!(window.budget(1000, 100), 100);

		assert!(window.record(1000, 100));
		assert_eq!(window.rate(), 100);
		assert_eq!(window.saved(), 200);
		assert_eq!(window.average(2000), 100);
	}

	#[test]
	fn unlimited() {
		let mut window = Window::new(0);
		assert_eq!(window.delay(0, 0), None);
		assert!(window.record(10, 10));
		assert!(!window.record(20, 10));
		assert_eq!(window.rate(), 20);
		assert_eq!(window.budget(20, 0), crate::BLOCK_SIZE);
	}

	#[test]
	fn reset_keeps_total() {
		let mut window = Window::new(0);
		window.record(0, 50);
		window.reset(5000);
		assert_eq!(window.saved(), 50);
		assert_eq!(window.delay(5000, 50), None);
		assert_eq!(window.budget(5000, 50), 50);
	}
}
