// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use amplify_derive::Display;
use bytes::Bytes;
use crate::control::{Control, Reply};
use crate::url::Url;
use super::{Backend, Error, OperationKind, Result, StreamKind};

#[derive(Copy, Clone, Debug, Default, Display, Eq, Hash, PartialEq)]
pub enum HttpMethod {
	#[default]
	#[display("GET")]
	Get,
	#[display("POST")]
	Post,
	#[display("HEAD")]
	Head,
	#[display("PUT")]
	Put,
	#[display("OPTIONS")]
	Options,
	#[display("DELETE")]
	Delete,
	#[display("TRACE")]
	Trace,
	#[display("CONNECT")]
	Connect,
}

/// Request settings of an HTTP stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpOptions {
	pub method: HttpMethod,
	/// The minor version of HTTP/1.x.
	pub version: u8,
	pub headers: Vec<(String, String)>,
	pub range: (u64, Option<u64>),
	pub cookies: bool,
	pub redirect: u8,
	pub auto_unzip: bool,
	pub post_url: Option<String>,
	pub post_data: Bytes,
	pub post_rate: usize,
}

impl Default for HttpOptions {
	fn default() -> Self {
		Self {
			method: HttpMethod::Get,
			version: 1,
			headers: Vec::new(),
			range: (0, None),
			cookies: false,
			redirect: 10,
			auto_unzip: false,
			post_url: None,
			post_data: Bytes::new(),
			post_rate: 0,
		}
	}
}

impl HttpOptions {
	/// Returns the value of a request header, matching the name without case.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Sets a request header, replacing any previous value.
	pub fn set_header(&mut self, name: &str, value: &str) {
		match self.headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
			Some((_, old)) => *old = value.to_owned(),
			None => self.headers.push((name.to_owned(), value.to_owned()))
		}
	}

	pub(crate) fn control(&mut self, control: &Control) -> Result<Reply> {
		use Control::*;
		Ok(match control {
			GetHttpHead(name) => Reply::Text(self.header(name).unwrap_or_default().to_owned()),
			GetHttpRange => Reply::Range(self.range.0, self.range.1),
			GetHttpMethod => Reply::Method(self.method),
			GetHttpVersion => Reply::Int(self.version.into()),
			GetHttpCookies => Reply::Bool(self.cookies),
			GetHttpRedirect => Reply::Int(self.redirect.into()),
			GetHttpAutoUnzip => Reply::Bool(self.auto_unzip),
			GetHttpPostUrl => Reply::Text(self.post_url.clone().unwrap_or_default()),
			GetHttpPostData => Reply::Bytes(self.post_data.clone()),
			GetHttpPostRate => Reply::Int(self.post_rate as u64),
			SetHttpHead(name, value) => {
				self.set_header(name, value);
				Reply::Done
			}
			SetHttpRange(start, end) => {
				if end.is_some_and(|end| end < *start) {
					return Err(Error::other(OperationKind::Control, "invalid http range", None))
				}
				self.range = (*start, *end);
				Reply::Done
			}
			SetHttpMethod(method) => {
				self.method = *method;
				Reply::Done
			}
			SetHttpVersion(version) => {
				self.version = *version;
				Reply::Done
			}
			SetHttpCookies(value) => {
				self.cookies = *value;
				Reply::Done
			}
			SetHttpRedirect(value) => {
				self.redirect = *value;
				Reply::Done
			}
			SetHttpAutoUnzip(value) => {
				self.auto_unzip = *value;
				Reply::Done
			}
			SetHttpPostUrl(url) => {
				self.post_url = Some(url.clone());
				Reply::Done
			}
			SetHttpPostData(data) => {
				self.post_data = data.clone();
				Reply::Done
			}
			SetHttpPostRate(rate) => {
				self.post_rate = *rate;
				Reply::Done
			}
			_ => return Err(Error::unsupported(OperationKind::Control, "unknown control for an http stream"))
		})
	}
}

/// An HTTP backend that records request settings. Requests themselves are not
/// implemented; opening always fails.
#[derive(Debug, Default)]
pub(crate) struct HttpBackend {
	options: HttpOptions,
}

impl HttpBackend {
	pub fn open_http(&self) -> Result<Option<u64>> {
		Err(Error::unsupported(OperationKind::Open, "http requests are not supported"))
	}

	pub fn control_http(&mut self, control: &Control) -> Result<Reply> {
		self.options.control(control)
	}
}

fn not_open(op: OperationKind) -> Error {
	Error::state(op, "http stream is not open")
}

impl Backend for HttpBackend {
	fn kind(&self) -> StreamKind { StreamKind::Http }

	fn open(&mut self, _: &Url, _: Duration) -> Result<Option<u64>> { self.open_http() }

	fn close(&mut self) -> Result { Ok(()) }

	fn read(&mut self, _: &mut [u8]) -> Result<usize> { Err(not_open(OperationKind::Read)) }

	fn write(&mut self, _: &[u8]) -> Result<usize> { Err(not_open(OperationKind::Write)) }

	fn control(&mut self, control: &Control) -> Result<Reply> { self.control_http(control) }
}
