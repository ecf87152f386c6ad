// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use amplify_derive::Display;
use tracing::debug;
use crate::control::{Control, Reply};
use crate::url::Url;
use super::{Backend, Error, OperationKind, Result, ResultContext, StreamKind};

/// A socket transport.
#[derive(Copy, Clone, Debug, Default, Display, Eq, Hash, PartialEq)]
pub enum SockType {
	#[default]
	#[display("tcp")]
	Tcp,
	#[display("udp")]
	Udp,
}

/// Socket settings common to the blocking and async backends.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct SockConfig {
	pub kind: Option<SockType>,
	pub keep_alive: bool,
}

impl SockConfig {
	/// Returns the socket type, set explicitly or requested by the URL.
	pub fn sock_type(&self, url: &Url) -> SockType {
		self.kind.unwrap_or_else(|| url.sock_type())
	}

	pub fn control(&mut self, url_type: SockType, control: &Control) -> Result<Reply> {
		match control {
			Control::GetSockType => Ok(Reply::SockType(self.kind.unwrap_or(url_type))),
			Control::SetSockType(kind) => {
				self.kind = Some(*kind);
				Ok(Reply::Done)
			}
			Control::SetKeepAlive(value) => {
				self.keep_alive = *value;
				Ok(Reply::Done)
			}
			_ => Err(Error::unsupported(OperationKind::Control, "unknown control for a socket stream"))
		}
	}
}

/// Resolves the host and port of a URL.
pub(crate) fn resolve(url: &Url) -> Result<Vec<SocketAddr>> {
	let addrs: Vec<_> = (url.host(), url.port()).to_socket_addrs()
												.context(OperationKind::Open)?
												.collect();
	if addrs.is_empty() {
		Err(Error::url(format!("no addresses found for {}", url.host())))
	} else {
		Ok(addrs)
	}
}

/// Returns the wildcard address to bind a UDP socket talking to `addr`.
pub(crate) fn udp_bind_addr(addr: &SocketAddr) -> SocketAddr {
	if addr.is_ipv4() {
		SocketAddr::from(([0, 0, 0, 0], 0))
	} else {
		SocketAddr::from(([0u16; 8], 0))
	}
}

enum Socket {
	Tcp(TcpStream),
	Udp(UdpSocket),
}

/// A blocking socket backend.
#[derive(Default)]
pub(crate) struct SockBackend {
	socket: Option<Socket>,
	config: SockConfig,
	url_type: SockType,
}

impl SockBackend {
	pub fn new(kind: Option<SockType>) -> Self {
		Self {
			config: SockConfig { kind, keep_alive: false },
			..Self::default()
		}
	}

	fn socket(&mut self, op: OperationKind) -> Result<&mut Socket> {
		self.socket.as_mut().ok_or_else(|| Error::state(op, "socket is not connected"))
	}

	fn connect(kind: SockType, addrs: &[SocketAddr], timeout: Duration) -> Result<Socket> {
		let mut last = None;
		for addr in addrs {
			let socket = match kind {
				SockType::Tcp => TcpStream::connect_timeout(addr, timeout).and_then(|tcp| {
					tcp.set_read_timeout(Some(timeout))?;
					tcp.set_write_timeout(Some(timeout))?;
					tcp.set_nodelay(true)?;
					Ok(Socket::Tcp(tcp))
				}),
				SockType::Udp => UdpSocket::bind(udp_bind_addr(addr)).and_then(|udp| {
					udp.connect(addr)?;
					udp.set_read_timeout(Some(timeout))?;
					udp.set_write_timeout(Some(timeout))?;
					Ok(Socket::Udp(udp))
				}),
			};

			match socket {
				Ok(socket) => return Ok(socket),
				Err(err) => {
					debug!(%addr, %err, "connection attempt failed");
					last = Some(err);
				}
			}
		}

		Err(last.map_or_else(
			|| Error::url("no addresses to connect to"),
			|err| Error::from(err).with_operation(OperationKind::Open)
		))
	}
}

impl Backend for SockBackend {
	fn kind(&self) -> StreamKind { StreamKind::Sock }

	fn open(&mut self, url: &Url, timeout: Duration) -> Result<Option<u64>> {
		if url.ssl() {
			return Err(Error::unsupported(OperationKind::Open, "encrypted sockets are not supported"))
		}

		self.url_type = url.sock_type();
		let kind = self.config.sock_type(url);
		let addrs = resolve(url)?;
		self.socket = Some(Self::connect(kind, &addrs, timeout)?);
		debug!(%url, %kind, "socket connected");
		Ok(None)
	}

	fn close(&mut self) -> Result {
		self.socket = None;
		Ok(())
	}

	fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
		let n = match self.socket(OperationKind::Read)? {
			Socket::Tcp(tcp) => tcp.read(buf),
			Socket::Udp(udp) => udp.recv(buf),
		}.context(OperationKind::Read)?;

		if n == 0 && !buf.is_empty() {
			Err(Error::closed(OperationKind::Read))
		} else {
			Ok(n)
		}
	}

	fn write(&mut self, data: &[u8]) -> Result<usize> {
		match self.socket(OperationKind::Write)? {
			Socket::Tcp(tcp) => tcp.write(data),
			Socket::Udp(udp) => udp.send(data),
		}.context(OperationKind::Write)
	}

	fn sync(&mut self, _: bool) -> Result {
		if let Socket::Tcp(tcp) = self.socket(OperationKind::Sync)? {
			tcp.flush().context(OperationKind::Sync)?;
		}
		Ok(())
	}

	fn control(&mut self, control: &Control) -> Result<Reply> {
		self.config.control(self.url_type, control)
	}
}
