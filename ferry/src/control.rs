// SPDX-License-Identifier: Apache-2.0

//! The generic stream control interface. Every control has a numeric code of
//! the form `(category << 16) | op`, where the category is zero for controls
//! understood by every stream and the [`StreamKind`] category otherwise.

use std::time::Duration;
use bytes::Bytes;
use crate::filter::FilterControl;
use crate::streams::{Error, FileMode, HttpMethod, OperationKind, Result, SockType, StreamKind};
use crate::url::Url;

/// Builds a control code from a category and an operation.
pub const fn code(category: u32, op: u32) -> u32 { (category << 16) | op }

/// A stream control request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Control {
	GetUrl,
	GetHost,
	GetPort,
	GetPath,
	GetSsl,
	GetTimeout,
	GetSize,
	GetOffset,
	SetUrl(String),
	SetHost(String),
	SetPort(u16),
	SetPath(String),
	SetSsl(bool),
	SetTimeout(Duration),

	/// Replaces the contents of a data stream.
	SetData(Bytes),
	/// Returns the contents of a data stream.
	GetData,

	GetFileMode,
	SetFileMode(FileMode),
	/// Returns `true` if the file is a pipe or other non-seekable stream.
	IsFileStream,

	GetSockType,
	SetSockType(SockType),
	SetKeepAlive(bool),

	GetHttpHead(String),
	GetHttpRange,
	GetHttpMethod,
	GetHttpVersion,
	GetHttpCookies,
	GetHttpRedirect,
	GetHttpAutoUnzip,
	GetHttpPostUrl,
	GetHttpPostData,
	GetHttpPostRate,
	SetHttpHead(String, String),
	SetHttpRange(u64, Option<u64>),
	SetHttpMethod(HttpMethod),
	SetHttpVersion(u8),
	SetHttpCookies(bool),
	SetHttpRedirect(u8),
	SetHttpAutoUnzip(bool),
	SetHttpPostUrl(String),
	SetHttpPostData(Bytes),
	SetHttpPostRate(usize),

	/// A control forwarded to the filter of a filter stream.
	Filter(FilterControl),
}

impl Control {
	/// Returns the category of the control: `None` for generic controls, or the
	/// stream type it applies to.
	pub fn category(&self) -> Option<StreamKind> {
		use Control::*;
		match self {
			GetUrl | GetHost | GetPort | GetPath | GetSsl | GetTimeout | GetSize |
			GetOffset | SetUrl(_) | SetHost(_) | SetPort(_) | SetPath(_) |
			SetSsl(_) | SetTimeout(_) => None,
			SetData(_) | GetData => Some(StreamKind::Data),
			GetFileMode | SetFileMode(_) | IsFileStream => Some(StreamKind::File),
			GetSockType | SetSockType(_) | SetKeepAlive(_) => Some(StreamKind::Sock),
			Filter(_) => Some(StreamKind::Filter),
			_ => Some(StreamKind::Http)
		}
	}

	/// Returns the numeric control code.
	pub fn code(&self) -> u32 {
		use Control::*;
		let op = match self {
			GetUrl              => 1,
			GetHost             => 2,
			GetPort             => 3,
			GetPath             => 4,
			GetSsl              => 5,
			GetTimeout          => 6,
			GetSize             => 7,
			GetOffset           => 8,
			SetUrl(_)           => 11,
			SetHost(_)          => 12,
			SetPort(_)          => 13,
			SetPath(_)          => 14,
			SetSsl(_)           => 15,
			SetTimeout(_)       => 16,
			SetData(_)          => 1,
			GetData             => 2,
			GetFileMode         => 1,
			SetFileMode(_)      => 2,
			IsFileStream        => 3,
			GetSockType         => 1,
			SetSockType(_)      => 2,
			SetKeepAlive(_)     => 3,
			GetHttpHead(_)      => 1,
			GetHttpRange        => 2,
			GetHttpMethod       => 3,
			GetHttpVersion      => 4,
			GetHttpCookies      => 5,
			GetHttpRedirect     => 6,
			GetHttpAutoUnzip    => 9,
			GetHttpPostUrl      => 10,
			GetHttpPostData     => 11,
			GetHttpPostRate     => 14,
			SetHttpHead(..)     => 20,
			SetHttpRange(..)    => 21,
			SetHttpMethod(_)    => 22,
			SetHttpVersion(_)   => 23,
			SetHttpCookies(_)   => 24,
			SetHttpRedirect(_)  => 25,
			SetHttpAutoUnzip(_) => 28,
			SetHttpPostUrl(_)   => 29,
			SetHttpPostData(_)  => 30,
			SetHttpPostRate(_)  => 33,
			Filter(control) => {
				let (kind, op) = control.parts();
				kind << 8 | op
			}
		};
		code(self.category().map_or(0, StreamKind::category), op)
	}

	/// Returns `true` if the control changes where or how a stream connects,
	/// which is only allowed while it is closed.
	pub fn is_endpoint_change(&self) -> bool {
		use Control::*;
		match self {
			SetUrl(_) | SetHost(_) | SetPort(_) | SetPath(_) | SetSsl(_) |
			SetData(_) | SetFileMode(_) | SetSockType(_) => true,
			Filter(control) => control.is_set(),
			_ => self.category() == Some(StreamKind::Http) && self.code() & 0xFFFF >= 20
		}
	}
}

/// The answer to a [`Control`] request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
	/// A set control succeeded.
	Done,
	Bool(bool),
	Int(u64),
	/// A total size, `None` if unknown.
	Size(Option<u64>),
	Text(String),
	Bytes(Bytes),
	Duration(Duration),
	FileMode(FileMode),
	SockType(SockType),
	Method(HttpMethod),
	Range(u64, Option<u64>),
	Filter(crate::filter::FilterReply),
}

/// The stream attributes generic controls read and write.
pub(crate) struct Attributes<'a> {
	pub kind: StreamKind,
	pub url: &'a mut Url,
	pub timeout: &'a mut Duration,
	pub size: Option<u64>,
	pub offset: u64,
	pub closed: bool,
}

impl Attributes<'_> {
	/// Handles a generic control, returning `None` if the control should be
	/// passed to the backend. For a data stream, a new URL is followed by a
	/// `SetData` with its payload.
	pub fn apply(self, control: &Control) -> Result<Option<Reply>> {
		use Control::*;
		let Self { kind, url, timeout, size, offset, closed } = self;
		if control.is_endpoint_change() && !closed {
			return Err(Error::state(OperationKind::Control, "stream must be closed to change its endpoint"))
		}

		Ok(Some(match control {
			GetUrl => Reply::Text(url.to_string()),
			GetHost => Reply::Text(url.host().to_owned()),
			GetPort => Reply::Int(url.port().into()),
			GetPath => Reply::Text(url.path().to_owned()),
			GetSsl => Reply::Bool(url.ssl()),
			GetTimeout => Reply::Duration(*timeout),
			GetSize => Reply::Size(size),
			GetOffset => Reply::Int(offset),
			SetUrl(value) => {
				let value = Url::parse(value)?;
				if value.kind() != kind {
					return Err(Error::url(format!("url selects a {} stream, not {kind}", value.kind())))
				}
				*url = value;
				Reply::Done
			}
			SetHost(host) => {
				url.set_host(host.as_str());
				Reply::Done
			}
			SetPort(port) => {
				url.set_port(*port);
				Reply::Done
			}
			SetPath(path) => {
				url.set_path(path.as_str());
				Reply::Done
			}
			SetSsl(ssl) => {
				url.set_ssl(*ssl);
				Reply::Done
			}
			SetTimeout(value) => {
				*timeout = *value;
				Reply::Done
			}
			_ => return Ok(None)
		}))
	}
}
