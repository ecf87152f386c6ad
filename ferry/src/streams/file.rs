// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::fmt::{Debug, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::BitOr;
use std::time::Duration;
use crate::control::{Control, Reply};
use crate::url::Url;
use super::{Backend, Error, OperationKind, Result, ResultContext, StreamKind};

/// File open mode flags.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct FileMode(u16);

impl FileMode {
	/// Read-only.
	pub const RO: Self = Self(1);
	/// Write-only.
	pub const WO: Self = Self(2);
	/// Read and write.
	pub const RW: Self = Self(4);
	/// Create the file if missing.
	pub const CREAT: Self = Self(8);
	/// Append writes to the end.
	pub const APPEND: Self = Self(16);
	/// Truncate the file on open.
	pub const TRUNC: Self = Self(32);
	pub const BINARY: Self = Self(64);
	/// Bypass the system cache. Accepted but not applied.
	pub const DIRECT: Self = Self(128);

	/// Returns the raw bits.
	pub const fn bits(self) -> u16 { self.0 }

	/// Creates a mode from raw bits, ignoring unknown bits.
	pub const fn from_bits(bits: u16) -> Self { Self(bits & 0xFF) }

	/// Returns `true` if all flags in `other` are set.
	pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

	/// Returns `true` if the mode allows writing.
	pub const fn is_writable(self) -> bool {
		self.contains(Self::WO) || self.contains(Self::RW) || self.contains(Self::APPEND)
	}

	pub(crate) fn options(self) -> OpenOptions {
		let mut options = OpenOptions::new();
		let write = self.is_writable();
		options.read(self.contains(Self::RW) || !write)
			   .write(write)
			   .append(self.contains(Self::APPEND))
			   .truncate(self.contains(Self::TRUNC))
			   .create(self.contains(Self::CREAT));
		options
	}
}

impl Default for FileMode {
	fn default() -> Self { Self::RO }
}

impl BitOr for FileMode {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl Debug for FileMode {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		const NAMES: [&str; 8] = ["RO", "WO", "RW", "CREAT", "APPEND", "TRUNC", "BINARY", "DIRECT"];
		let mut first = true;
		for (bit, name) in NAMES.iter().enumerate() {
			if self.0 & 1 << bit != 0 {
				if !first {
					f.write_str(" | ")?;
				}
				f.write_str(name)?;
				first = false;
			}
		}
		if first {
			f.write_str("(empty)")?;
		}
		Ok(())
	}
}

/// Opens the file at a URL path with `mode`, returning the file and its size
/// if it is a regular file.
pub(crate) fn open_file(url: &Url, mode: FileMode) -> Result<(File, Option<u64>)> {
	let file = mode.options().open(url.path()).context(OperationKind::Open)?;
	let meta = file.metadata().context(OperationKind::Open)?;
	let size = meta.is_file().then(|| meta.len());
	Ok((file, size))
}

/// A blocking file backend.
#[derive(Default)]
pub(crate) struct FileBackend {
	file: Option<File>,
	mode: FileMode,
	regular: bool,
}

impl FileBackend {
	pub fn new(mode: FileMode) -> Self {
		Self { mode, ..Self::default() }
	}

	fn file(&mut self, op: OperationKind) -> Result<&mut File> {
		self.file.as_mut().ok_or_else(|| Error::state(op, "file is not open"))
	}
}

/// Handles the controls shared by the blocking and async file backends.
pub(crate) fn control_file(mode: &mut FileMode, regular: bool, control: &Control) -> Result<Reply> {
	match control {
		Control::GetFileMode => Ok(Reply::FileMode(*mode)),
		Control::SetFileMode(value) => {
			*mode = *value;
			Ok(Reply::Done)
		}
		Control::IsFileStream => Ok(Reply::Bool(!regular)),
		_ => Err(Error::unsupported(OperationKind::Control, "unknown control for a file stream"))
	}
}

impl Backend for FileBackend {
	fn kind(&self) -> StreamKind { StreamKind::File }

	fn open(&mut self, url: &Url, _: Duration) -> Result<Option<u64>> {
		let (file, size) = open_file(url, self.mode)?;
		self.file = Some(file);
		self.regular = size.is_some();
		Ok(size)
	}

	fn close(&mut self) -> Result {
		self.file = None;
		Ok(())
	}

	fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
		let n = self.file(OperationKind::Read)?.read(buf).context(OperationKind::Read)?;
		if n == 0 && !buf.is_empty() {
			Err(Error::closed(OperationKind::Read))
		} else {
			Ok(n)
		}
	}

	fn write(&mut self, data: &[u8]) -> Result<usize> {
		self.file(OperationKind::Write)?.write(data).context(OperationKind::Write)
	}

	fn seek(&mut self, offset: u64) -> Result {
		if !self.regular {
			return Err(Error::unsupported(OperationKind::Seek, "file is not seekable"))
		}
		self.file(OperationKind::Seek)?
			.seek(SeekFrom::Start(offset))
			.context(OperationKind::Seek)?;
		Ok(())
	}

	fn sync(&mut self, closing: bool) -> Result {
		let writable = self.mode.is_writable();
		let file = self.file(OperationKind::Sync)?;
		file.flush().context(OperationKind::Sync)?;
		if closing && writable {
			file.sync_data().context(OperationKind::Sync)?;
		}
		Ok(())
	}

	fn control(&mut self, control: &Control) -> Result<Reply> {
		control_file(&mut self.mode, self.regular, control)
	}
}
