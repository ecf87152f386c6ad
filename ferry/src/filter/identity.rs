// SPDX-License-Identifier: Apache-2.0

use bytes::BytesMut;
use crate::streams::Result;
use super::{Codec, Step, SyncMode};

/// Copies input to output.
pub(super) struct Identity;

impl Codec for Identity {
	fn transcode(&mut self, input: &[u8], output: &mut BytesMut, _: SyncMode) -> Result<Step> {
		output.extend_from_slice(input);
		Ok(Step { consumed: input.len(), end: false })
	}
}
