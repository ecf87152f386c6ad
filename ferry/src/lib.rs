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

//! ## How it works
//!
//! Bytes move through *streams*. A stream is a uniform front over a *backend*,
//! the concrete source or sink: memory, a file, a socket, or another stream
//! seen through a *filter*. Streams are picked by URL (`data://`, `file://` or a
//! bare path, `sock://`, `http://`), and tuned through a generic control
//! interface.
//!
//! Streams come in two flavors. A blocking [`Stream`] reads and writes on the
//! calling thread, with an optional read cache and a watermark write cache. An
//! [`AsyncStream`] runs on a [`Scheduler`]; a read returns empty bytes when no
//! data is ready yet rather than blocking, and only one operation can be in
//! flight at a time.
//!
//! ### Filters
//!
//! Filters transform bytes as they pass: pass-through, caching, zstd
//! compression, charset conversion, and HTTP chunked coding. Input a filter
//! cannot consume yet is held for the next push. Once a filter sees the end of
//! its input, it drains what it has buffered and then reports the end, every
//! time it is pushed after that. A failed push leaves the filter as it was.
//!
//! ### Transfers
//!
//! A [`Transfer`] copies an async input stream into an async output stream.
//! Progress is reported after the first write, then about once a second, then
//! once more with a terminal [`Status`]. The rate can be limited; once the limit
//! is reached within a one-second window, the next read waits for the window to
//! end. Transfers can be paused, resumed and killed from any thread through a
//! [`TransferHandle`].
//!
//! A [`TransferPool`] runs many transfers on one scheduler, up to a fixed
//! number at a time.
//!
//! ```no_run
//! # async fn run() -> ferry::streams::Result {
//! use ferry::{Action, Scheduler, Transfer};
//!
//! let mut transfer = Transfer::new(Scheduler::current()?);
//! transfer.set_istream_url("data://aGVsbG8=")?;
//! transfer.set_ostream_url("copy.txt")?;
//! transfer.limit_rate(16 * 1024);
//! transfer.open(0).await?;
//! let status = transfer.done(|progress| {
//! 	println!("{} bytes at {}B/s", progress.saved, progress.rate);
//! 	Action::Continue
//! }).await?;
//! transfer.close().await?;
//! println!("transfer {status}");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

mod error;
mod state;
pub mod streams;
mod url;
pub mod control;
pub mod filter;
mod options;
mod scheduler;
pub mod async_streams;
pub mod transfer;
pub mod pool;

pub use async_streams::{AsyncBackend, AsyncStream};
pub use error::{Error, ErrorBox};
pub use filter::Filter;
pub use options::*;
pub use pool::{Job, TaskId, TransferPool, WaitStatus};
pub use scheduler::Scheduler;
pub use state::{KillHandle, StreamState};
pub use streams::{Stream, StreamKind};
pub use transfer::{Action, Held, Progress, Status, Transfer, TransferHandle, TransferState};
pub use url::Url;

/// The default read size, and the output hint of filters.
pub const BLOCK_SIZE: usize = 8192;

/// The default timeout of a single stream operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
