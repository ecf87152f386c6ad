// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::debug;
use crate::control::{Control, Reply};
use crate::streams::{udp_bind_addr, Error, OperationKind, Result, ResultContext, SockConfig, SockType, StreamKind};
use crate::url::Url;
use super::AsyncBackend;

enum Socket {
	Tcp(TcpStream),
	Udp(UdpSocket),
}

/// A non-blocking socket backend.
#[derive(Default)]
pub(super) struct AsyncSockBackend {
	socket: Option<Socket>,
	config: SockConfig,
	url_type: SockType,
}

impl AsyncSockBackend {
	pub fn new(kind: Option<SockType>) -> Self {
		Self {
			config: SockConfig { kind, keep_alive: false },
			..Self::default()
		}
	}

	fn socket(&mut self, op: OperationKind) -> Result<&mut Socket> {
		self.socket.as_mut().ok_or_else(|| Error::state(op, "socket is not connected"))
	}
}

#[async_trait]
impl AsyncBackend for AsyncSockBackend {
	fn kind(&self) -> StreamKind { StreamKind::Sock }

	async fn open(&mut self, url: &Url) -> Result<Option<u64>> {
		if url.ssl() {
			return Err(Error::unsupported(OperationKind::Open, "encrypted sockets are not supported"))
		}

		self.url_type = url.sock_type();
		let kind = self.config.sock_type(url);
		let addrs = lookup_host((url.host(), url.port())).await.context(OperationKind::Open)?;

		let mut last = None;
		for addr in addrs {
			let socket = match kind {
				SockType::Tcp => TcpStream::connect(addr).await.and_then(|tcp| {
					tcp.set_nodelay(true)?;
					Ok(Socket::Tcp(tcp))
				}),
				SockType::Udp => match UdpSocket::bind(udp_bind_addr(&addr)).await {
					Ok(udp) => udp.connect(addr).await.map(|_| Socket::Udp(udp)),
					Err(err) => Err(err)
				}
			};

			match socket {
				Ok(socket) => {
					debug!(%url, %kind, %addr, "socket connected");
					self.socket = Some(socket);
					return Ok(None)
				}
				Err(err) => {
					debug!(%addr, %err, "connection attempt failed");
					last = Some(err);
				}
			}
		}

		Err(last.map_or_else(
			|| Error::url(format!("no addresses found for {}", url.host())),
			|err| Error::from(err).with_operation(OperationKind::Open)
		))
	}

	async fn close(&mut self) -> Result {
		if let Some(Socket::Tcp(mut tcp)) = self.socket.take() {
			let _ = tcp.shutdown().await;
		}
		Ok(())
	}

	async fn read(&mut self, size: usize) -> Result<Bytes> {
		let mut buf = vec![0; size];
		let n = match self.socket(OperationKind::Read)? {
			Socket::Tcp(tcp) => tcp.read(&mut buf).await,
			Socket::Udp(udp) => udp.recv(&mut buf).await,
		}.context(OperationKind::Read)?;

		if n == 0 && size > 0 {
			return Err(Error::closed(OperationKind::Read))
		}
		buf.truncate(n);
		Ok(buf.into())
	}

	async fn write(&mut self, data: &[u8]) -> Result<usize> {
		match self.socket(OperationKind::Write)? {
			Socket::Tcp(tcp) => tcp.write(data).await,
			Socket::Udp(udp) => udp.send(data).await,
		}.context(OperationKind::Write)
	}

	async fn sync(&mut self, _: bool) -> Result {
		if let Socket::Tcp(tcp) = self.socket(OperationKind::Sync)? {
			tcp.flush().await.context(OperationKind::Sync)?;
		}
		Ok(())
	}

	fn control(&mut self, control: &Control) -> Result<Reply> {
		self.config.control(self.url_type, control)
	}
}
