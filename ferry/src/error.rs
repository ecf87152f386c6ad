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

//! Stream errors. Every fallible stream, filter, and transfer operation fails
//! with an [`Error`] naming the operation and what went wrong. A `Closed` error
//! is not a failure: it marks the normal end of a stream.

use std::{fmt, io, result};
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use amplify_derive::Display;
use ErrorKind::{Closed, Io, Killed, State, Timeout, Unsupported};

pub type ErrorBox = Box<dyn StdError + Send + Sync>;
pub type Result<T = ()> = result::Result<T, Error>;

#[derive(Copy, Clone, Debug, Default, Display, Eq, PartialEq)]
pub enum OperationKind {
	#[default]
	#[display("unknown operation")]
	Unknown,
	#[display("open stream")]
	Open,
	#[display("close stream")]
	Close,
	#[display("read from stream")]
	Read,
	#[display("write to stream")]
	Write,
	#[display("seek stream")]
	Seek,
	#[display("sync stream")]
	Sync,
	#[display("control stream")]
	Control,
	#[display("filter data")]
	Filter,
	#[display("schedule task")]
	Task,
	#[display("{0}")]
	Other(&'static str)
}

#[derive(Copy, Clone, Debug, Display, Eq, PartialEq)]
pub enum ErrorKind {
	#[display("stream closed")]
	Closed,
	#[display("stream killed")]
	Killed,
	#[display("timed out")]
	Timeout,
	#[display("IO error")]
	Io,
	#[display("invalid url")]
	Url,
	#[display("unsupported operation")]
	Unsupported,
	#[display("invalid stream state")]
	State,
	#[display("filter error")]
	Filter,
	#[display("{0}")]
	Other(&'static str),
}

/// An error raised by a stream operation, optionally carrying the backend
/// error that caused it.
#[derive(Debug)]
pub struct Error {
	op: OperationKind,
	kind: ErrorKind,
	source: Option<ErrorBox>,
}

impl Display for Error {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{} failed; {}", self.op, self.kind)?;
		match &self.source {
			Some(source) => write!(f, " ({source})"),
			None => Ok(())
		}
	}
}

impl StdError for Error {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		self.source.as_deref().map(|source| source as _)
	}
}

impl From<io::Error> for Error {
	fn from(value: io::Error) -> Self {
		match value.kind() {
			io::ErrorKind::UnexpectedEof => Self::closed(OperationKind::Unknown),
			io::ErrorKind::TimedOut |
			io::ErrorKind::WouldBlock => Self::new(OperationKind::Unknown, Timeout, Some(value.into())),
			_ => Self::io(OperationKind::Unknown, value)
		}
	}
}

impl From<&'static str> for Error {
	fn from(value: &'static str) -> Self {
		Self::other(OperationKind::Unknown, value, None)
	}
}

impl Error {
	pub fn new(op: OperationKind, kind: ErrorKind, source: Option<ErrorBox>) -> Self {
		Self { op, kind, source }
	}

	/// Creates an error with a custom message.
	pub fn other(op: OperationKind, message: &'static str, source: Option<ErrorBox>) -> Self {
		Self::new(op, ErrorKind::Other(message), source)
	}

	/// Creates a "closed" error, signaling the normal end of a stream.
	pub fn closed(op: OperationKind) -> Self { Self::new(op, Closed, None) }

	pub fn killed(op: OperationKind) -> Self { Self::new(op, Killed, None) }

	pub fn timeout(op: OperationKind) -> Self { Self::new(op, Timeout, None) }

	pub fn io(op: OperationKind, error: io::Error) -> Self {
		Self::new(op, Io, Some(error.into()))
	}

	/// Creates an error for an operation the stream's state doesn't allow.
	pub fn state(op: OperationKind, message: &'static str) -> Self {
		Self::new(op, State, Some(message.into()))
	}

	pub fn unsupported(op: OperationKind, message: &'static str) -> Self {
		Self::new(op, Unsupported, Some(message.into()))
	}

	/// Creates an error for a URL that failed to parse.
	pub fn url(message: impl Into<String>) -> Self {
		Self::new(OperationKind::Open, ErrorKind::Url, Some(message.into().into()))
	}

	/// Creates an error for malformed filter input.
	pub fn filter(message: &'static str) -> Self {
		Self::new(OperationKind::Filter, ErrorKind::Filter, Some(message.into()))
	}

	pub fn operation(&self) -> OperationKind { self.op }

	/// Replaces the operation, keeping the kind and source.
	pub fn with_operation(mut self, op: OperationKind) -> Self {
		self.op = op;
		self
	}

	pub fn kind(&self) -> ErrorKind { self.kind }

	/// Returns `true` if the error has kind `kind`.
	pub fn is(&self, kind: ErrorKind) -> bool { self.kind == kind }

	/// Returns `true` if the stream ended or was closed.
	pub fn is_closed(&self) -> bool { self.is(Closed) }

	pub fn is_killed(&self) -> bool { self.is(Killed) }

	pub fn is_timeout(&self) -> bool { self.is(Timeout) }

	/// Returns the source downcast into an IO error, if it is one.
	pub fn io_source(&self) -> Option<&io::Error> {
		self.source.as_deref()?.downcast_ref()
	}

	/// Takes the source error, if any.
	pub fn into_source(self) -> Option<ErrorBox> { self.source }
}

/// Maps IO errors into stream errors for an operation.
pub(crate) trait ResultContext<T> {
	fn context(self, op: OperationKind) -> Result<T>;
}

impl<T> ResultContext<T> for result::Result<T, io::Error> {
	fn context(self, op: OperationKind) -> Result<T> {
		self.map_err(|err| Error::from(err).with_operation(op))
	}
}

/// Fails with a "killed" error if `killed` is set.
#[inline]
pub(crate) fn check_killed(killed: bool, op: OperationKind) -> Result {
	if killed {
		Err(Error::killed(op))
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::io;
	use super::{Error, ErrorKind, OperationKind, ResultContext};

	#[test]
	fn io_conversion() {
		let eof: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
		assert!(eof.is_closed());

		let timeout = Err::<(), _>(io::Error::from(io::ErrorKind::TimedOut)).context(OperationKind::Read);
		let timeout = timeout.unwrap_err();
		assert!(timeout.is_timeout());
		assert_eq!(timeout.operation(), OperationKind::Read);

		let other: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
		assert_eq!(other.kind(), ErrorKind::Io);
		assert_eq!(other.io_source().map(io::Error::kind), Some(io::ErrorKind::PermissionDenied));
	}

	#[test]
	fn display() {
		assert_eq!(Error::killed(OperationKind::Write).to_string(), "write to stream failed; stream killed");
		assert_eq!(
			Error::state(OperationKind::Open, "transfer is not closed").to_string(),
			"open stream failed; invalid stream state (transfer is not closed)"
		);
	}
}
