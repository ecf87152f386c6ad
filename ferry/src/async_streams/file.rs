// SPDX-License-Identifier: Apache-2.0

use std::io::SeekFrom;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use crate::control::{Control, Reply};
use crate::streams::{control_file, Error, FileMode, OperationKind, Result, ResultContext, StreamKind};
use crate::url::Url;
use super::AsyncBackend;

/// A file backend running on the runtime's blocking pool.
#[derive(Default)]
pub(super) struct AsyncFileBackend {
	file: Option<File>,
	mode: FileMode,
	regular: bool,
}

impl AsyncFileBackend {
	pub fn new(mode: FileMode) -> Self {
		Self { mode, ..Self::default() }
	}

	fn file(&mut self, op: OperationKind) -> Result<&mut File> {
		self.file.as_mut().ok_or_else(|| Error::state(op, "file is not open"))
	}
}

#[async_trait]
impl AsyncBackend for AsyncFileBackend {
	fn kind(&self) -> StreamKind { StreamKind::File }

	async fn open(&mut self, url: &Url) -> Result<Option<u64>> {
		let file = OpenOptions::from(self.mode.options())
			.open(url.path())
			.await
			.context(OperationKind::Open)?;
		let meta = file.metadata().await.context(OperationKind::Open)?;
		let size = meta.is_file().then(|| meta.len());
		self.file = Some(file);
		self.regular = size.is_some();
		Ok(size)
	}

	async fn close(&mut self) -> Result {
		self.file = None;
		Ok(())
	}

	async fn read(&mut self, size: usize) -> Result<Bytes> {
		let mut buf = vec![0; size];
		let n = self.file(OperationKind::Read)?
					.read(&mut buf)
					.await
					.context(OperationKind::Read)?;
		if n == 0 && size > 0 {
			return Err(Error::closed(OperationKind::Read))
		}
		buf.truncate(n);
		Ok(buf.into())
	}

	async fn write(&mut self, data: &[u8]) -> Result<usize> {
		self.file(OperationKind::Write)?
			.write(data)
			.await
			.context(OperationKind::Write)
	}

	async fn seek(&mut self, offset: u64) -> Result {
		if !self.regular {
			return Err(Error::unsupported(OperationKind::Seek, "file is not seekable"))
		}
		self.file(OperationKind::Seek)?
			.seek(SeekFrom::Start(offset))
			.await
			.context(OperationKind::Seek)?;
		Ok(())
	}

	async fn sync(&mut self, closing: bool) -> Result {
		let writable = self.mode.is_writable();
		let file = self.file(OperationKind::Sync)?;
		file.flush().await.context(OperationKind::Sync)?;
		if closing && writable {
			file.sync_data().await.context(OperationKind::Sync)?;
		}
		Ok(())
	}

	fn control(&mut self, control: &Control) -> Result<Reply> {
		control_file(&mut self.mode, self.regular, control)
	}
}
