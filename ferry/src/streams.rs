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

mod codec;
mod copy;
mod data;
mod file;
mod filtered;
mod http;
mod sock;
mod std_io;
mod stream;

use std::time::Duration;
use amplify_derive::Display;
use crate::control::{Control, Reply};
use crate::url::Url;

pub use crate::error::{Error, ErrorKind, OperationKind, Result};
pub use copy::*;
pub use data::DataBuffer;
pub use file::FileMode;
pub use http::{HttpMethod, HttpOptions};
pub use sock::SockType;
pub use stream::Stream;
pub(crate) use crate::error::{check_killed, ResultContext};
pub(crate) use data::DataBackend;
pub(crate) use file::{control_file, FileBackend};
pub(crate) use filtered::{pull, Direction, FilterBackend};
pub(crate) use http::HttpBackend;
pub(crate) use sock::{udp_bind_addr, SockBackend, SockConfig};

/// The backend type of a stream. The discriminant is the control category of
/// the type.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[repr(u32)]
pub enum StreamKind {
	#[display("file")]
	File = 1,
	#[display("socket")]
	Sock = 2,
	#[display("http")]
	Http = 3,
	#[display("data")]
	Data = 4,
	#[display("filter")]
	Filter = 5,
}

impl StreamKind {
	/// Returns the control category of this kind.
	pub const fn category(self) -> u32 { self as u32 }
}

/// A blocking byte source and sink beneath a [`Stream`].
///
/// `read` returns `Ok(0)` when no data is currently available and a `Closed`
/// error at the end of the stream. Backends never retry internally.
pub trait Backend: Send {
	/// Returns the backend type.
	fn kind(&self) -> StreamKind;

	/// Opens the backend, returning the total size if known.
	fn open(&mut self, url: &Url, timeout: Duration) -> Result<Option<u64>>;

	/// Closes the backend. Closing an already closed backend does nothing.
	fn close(&mut self) -> Result;

	/// Reads at most `buf.len()` bytes into `buf`.
	fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

	/// Writes at most `data.len()` bytes, returning the number written.
	fn write(&mut self, data: &[u8]) -> Result<usize>;

	/// Seeks to an absolute offset.
	fn seek(&mut self, offset: u64) -> Result {
		let _ = offset;
		Err(Error::unsupported(OperationKind::Seek, "stream is not seekable"))
	}

	/// Flushes data written to the backend. `closing` is set when this is the
	/// final sync before closing.
	fn sync(&mut self, closing: bool) -> Result {
		let _ = closing;
		Ok(())
	}

	/// Handles a backend-specific control.
	fn control(&mut self, control: &Control) -> Result<Reply> {
		let _ = control;
		Err(Error::unsupported(OperationKind::Control, "unknown control for this stream"))
	}
}
