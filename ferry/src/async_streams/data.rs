// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use crate::control::{Control, Reply};
use crate::streams::{DataBackend, Result, StreamKind};
use crate::url::Url;
use super::AsyncBackend;

#[async_trait]
impl AsyncBackend for DataBackend {
	fn kind(&self) -> StreamKind { StreamKind::Data }

	async fn open(&mut self, url: &Url) -> Result<Option<u64>> { self.open_data(url) }

	async fn close(&mut self) -> Result { Ok(()) }

	async fn read(&mut self, size: usize) -> Result<Bytes> {
		let mut buf = vec![0; size];
		let n = self.read_data(&mut buf)?;
		buf.truncate(n);
		Ok(buf.into())
	}

	async fn write(&mut self, data: &[u8]) -> Result<usize> { Ok(self.write_data(data)) }

	async fn seek(&mut self, offset: u64) -> Result { self.seek_data(offset) }

	fn control(&mut self, control: &Control) -> Result<Reply> { self.control_data(control) }
}
