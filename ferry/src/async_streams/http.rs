// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use crate::control::{Control, Reply};
use crate::streams::{Error, HttpBackend, OperationKind, Result, StreamKind};
use crate::url::Url;
use super::AsyncBackend;

#[async_trait]
impl AsyncBackend for HttpBackend {
	fn kind(&self) -> StreamKind { StreamKind::Http }

	async fn open(&mut self, _: &Url) -> Result<Option<u64>> { self.open_http() }

	async fn close(&mut self) -> Result { Ok(()) }

	async fn read(&mut self, _: usize) -> Result<Bytes> {
		Err(Error::state(OperationKind::Read, "http stream is not open"))
	}

	async fn write(&mut self, _: &[u8]) -> Result<usize> {
		Err(Error::state(OperationKind::Write, "http stream is not open"))
	}

	fn control(&mut self, control: &Control) -> Result<Reply> { self.control_http(control) }
}
