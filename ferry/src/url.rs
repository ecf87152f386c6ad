// SPDX-License-Identifier: Apache-2.0

//! Stream URL descriptors. Parsing is pure: the stream type selected for a URL
//! depends on nothing but the URL string.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crate::streams::{Error, Result, SockType, StreamKind};

/// A parsed stream URL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Url {
	kind: StreamKind,
	ssl: bool,
	host: String,
	port: u16,
	path: String,
	query: Option<String>,
}

impl Url {
	/// Parses a URL. `data://`, `file://`, `sock://`, `socks://`, `http://` and
	/// `https://` are recognized; a string without a scheme is a file path.
	pub fn parse(url: &str) -> Result<Self> {
		let Some((scheme, rest)) = url.split_once("://") else {
			return Self::file(url)
		};

		match scheme.to_ascii_lowercase().as_str() {
			"data" => Ok(Self::data(rest)),
			"file" => Self::file(rest),
			"sock" => Self::network(StreamKind::Sock, false, None, rest),
			"socks" => Self::network(StreamKind::Sock, true, None, rest),
			"http" => Self::network(StreamKind::Http, false, Some(80), rest),
			"https" => Self::network(StreamKind::Http, true, Some(443), rest),
			_ => Err(Error::url(format!("unknown url scheme \"{scheme}\"")))
		}
	}

	/// Creates a data URL from bytes.
	pub fn from_data(data: &[u8]) -> Self {
		Self::data(&STANDARD.encode(data))
	}

	fn data(encoded: &str) -> Self {
		Self {
			kind: StreamKind::Data,
			ssl: false,
			host: String::new(),
			port: 0,
			path: encoded.to_owned(),
			query: None,
		}
	}

	fn file(path: &str) -> Result<Self> {
		if path.is_empty() {
			return Err(Error::url("empty file path"))
		}

		Ok(Self {
			kind: StreamKind::File,
			ssl: false,
			host: String::new(),
			port: 0,
			path: path.to_owned(),
			query: None,
		})
	}

	fn network(
		kind: StreamKind,
		ssl: bool,
		default_port: Option<u16>,
		rest: &str
	) -> Result<Self> {
		let (rest, query) = match rest.split_once('?') {
			Some((rest, query)) => (rest, Some(query.to_owned())),
			None => (rest, None)
		};
		let (authority, path) = match rest.find('/') {
			Some(i) => rest.split_at(i),
			None => (rest, "/")
		};
		let (host, port) = match authority.rsplit_once(':') {
			Some((host, port)) => {
				let port = port.parse().map_err(|_|
					Error::url(format!("invalid port \"{port}\""))
				)?;
				(host, port)
			}
			None => {
				let port = default_port.ok_or_else(||
					Error::url(format!("missing port in \"{authority}\""))
				)?;
				(authority, port)
			}
		};

		if host.is_empty() {
			return Err(Error::url("missing host"))
		}

		Ok(Self {
			kind,
			ssl,
			host: host.to_owned(),
			port,
			path: path.to_owned(),
			query,
		})
	}

	/// Returns the stream type this URL selects.
	pub fn kind(&self) -> StreamKind { self.kind }

	/// Returns `true` if the URL requests an encrypted transport.
	pub fn ssl(&self) -> bool { self.ssl }

	pub fn host(&self) -> &str { &self.host }

	pub fn port(&self) -> u16 { self.port }

	/// Returns the path. For data URLs this is the encoded payload.
	pub fn path(&self) -> &str { &self.path }

	pub fn query(&self) -> Option<&str> { self.query.as_deref() }

	/// Returns the socket type requested by the query, TCP by default.
	pub fn sock_type(&self) -> SockType {
		let udp = self.query
					  .as_deref()
					  .into_iter()
					  .flat_map(|query| query.split('&'))
					  .any(|param| param == "udp" || param.starts_with("udp="));
		if udp { SockType::Udp } else { SockType::Tcp }
	}

	/// Decodes the payload of a data URL.
	pub fn decode_data(&self) -> Result<Vec<u8>> {
		if self.kind != StreamKind::Data {
			return Err(Error::url("not a data url"))
		}

		STANDARD.decode(self.path.trim())
				.map_err(|err| Error::url(format!("invalid base64 data: {err}")))
	}

	pub fn set_host(&mut self, host: impl Into<String>) { self.host = host.into() }

	pub fn set_port(&mut self, port: u16) { self.port = port }

	pub fn set_path(&mut self, path: impl Into<String>) { self.path = path.into() }

	pub fn set_ssl(&mut self, ssl: bool) { self.ssl = ssl }
}

impl FromStr for Url {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl Display for Url {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let Self { kind, ssl, host, port, path, query } = self;
		match kind {
			StreamKind::Data => write!(f, "data://{path}"),
			StreamKind::File | StreamKind::Filter => write!(f, "file://{path}"),
			StreamKind::Sock | StreamKind::Http => {
				let scheme = match (kind, ssl) {
					(StreamKind::Sock, false) => "sock",
					(StreamKind::Sock, true ) => "socks",
					(_,                false) => "http",
					(_,                true ) => "https",
				};
				write!(f, "{scheme}://{host}:{port}")?;
				if *kind == StreamKind::Http {
					write!(f, "{path}")?;
				}
				if let Some(query) = query {
					write!(f, "?{query}")?;
				}
				Ok(())
			}
		}
	}
}
