// SPDX-License-Identifier: Apache-2.0

//! Lock-free state cells shared between a stream or transfer and the contexts
//! allowed to kill or pause it.

use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::{fmt, result};
use amplify_derive::Display;
use tokio::sync::Notify;
use tracing::debug;

/// A small state enum that can live in an [`AtomicU8`].
pub(crate) trait AtomicState: Copy + Eq {
	fn into_u8(self) -> u8;
	fn from_u8(value: u8) -> Self;
}

/// An atomic cell holding a state enum.
pub(crate) struct StateCell<S> {
	value: AtomicU8,
	_state: PhantomData<S>,
}

impl<S: AtomicState> StateCell<S> {
	pub fn new(state: S) -> Self {
		Self {
			value: AtomicU8::new(state.into_u8()),
			_state: PhantomData,
		}
	}

	#[inline]
	pub fn load(&self) -> S { S::from_u8(self.value.load(Ordering::Acquire)) }

	#[inline]
	pub fn store(&self, state: S) {
		self.value.store(state.into_u8(), Ordering::Release)
	}

	#[inline]
	pub fn swap(&self, state: S) -> S {
		S::from_u8(self.value.swap(state.into_u8(), Ordering::AcqRel))
	}

	/// Sets the state to `new` if it is currently `current`, returning the
	/// previous state on success and the actual state on failure.
	#[inline]
	pub fn transition(&self, current: S, new: S) -> result::Result<S, S> {
		self.value
			.compare_exchange(
				current.into_u8(),
				new.into_u8(),
				Ordering::AcqRel,
				Ordering::Acquire
			)
			.map(S::from_u8)
			.map_err(S::from_u8)
	}
}

impl<S: AtomicState + Debug> Debug for StateCell<S> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("StateCell").field(&self.load()).finish()
	}
}

macro_rules! atomic_state {
	($ty:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
		impl $crate::state::AtomicState for $ty {
			#[inline]
			fn into_u8(self) -> u8 { self as u8 }

			#[inline]
			fn from_u8(value: u8) -> Self {
				match value {
					$($value => Self::$variant,)+
					_ => unreachable!("invalid {} value {value}", stringify!($ty)),
				}
			}
		}
	};
}

pub(crate) use atomic_state;

/// The lifecycle state of a stream.
#[derive(Copy, Clone, Debug, Default, Display, Eq, PartialEq)]
#[repr(u8)]
pub enum StreamState {
	#[default]
	#[display("closed")]
	Closed = 0,
	#[display("opening")]
	Opening = 1,
	#[display("opened")]
	Opened = 2,
	#[display("killing")]
	Killing = 3,
	#[display("killed")]
	Killed = 4,
}

atomic_state!(StreamState { Closed = 0, Opening = 1, Opened = 2, Killing = 3, Killed = 4 });

impl StreamState {
	/// Returns `true` if the state is [`Killing`](Self::Killing) or
	/// [`Killed`](Self::Killed).
	pub fn is_killed(&self) -> bool {
		matches!(self, Self::Killing | Self::Killed)
	}
}

struct Shared {
	state: StateCell<StreamState>,
	notify: Notify,
	/// The handle of a stream this one reads or writes through, killed along
	/// with it.
	child: Option<KillHandle>,
}

/// A cloneable handle to a stream's state, used to kill it from any thread.
#[derive(Clone)]
pub struct KillHandle(Arc<Shared>);

impl Default for KillHandle {
	fn default() -> Self { Self::new(None) }
}

impl Debug for KillHandle {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("KillHandle").field(&self.state()).finish()
	}
}

impl KillHandle {
	fn new(child: Option<KillHandle>) -> Self {
		Self(Arc::new(Shared {
			state: StateCell::new(StreamState::Closed),
			notify: Notify::new(),
			child,
		}))
	}

	/// Creates a handle that kills `child` when killed.
	pub(crate) fn with_child(child: KillHandle) -> Self { Self::new(Some(child)) }

	/// Returns the current state.
	pub fn state(&self) -> StreamState { self.0.state.load() }

	/// Returns `true` if the stream was killed.
	pub fn is_killed(&self) -> bool { self.state().is_killed() }

	/// Kills the stream. An open or opening stream moves to `Killing`, waking any
	/// pending operation; a closed stream moves to `Killed`. Killing is
	/// idempotent.
	pub fn kill(&self) {
		let cell = &self.0.state;
		let killed =
			cell.transition(StreamState::Opened, StreamState::Killing).is_ok() ||
			cell.transition(StreamState::Opening, StreamState::Killing).is_ok() ||
			cell.transition(StreamState::Closed, StreamState::Killed).is_ok();
		if killed {
			debug!(state = %self.state(), "stream killed");
			self.0.notify.notify_waiters();
		}
		if let Some(child) = &self.0.child {
			child.kill();
		}
	}

	/// Completes once the stream is killed.
	pub(crate) async fn killed(&self) {
		loop {
			let notified = self.0.notify.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.is_killed() {
				return
			}
			notified.await;
		}
	}

	pub(crate) fn cell(&self) -> &StateCell<StreamState> { &self.0.state }
}
