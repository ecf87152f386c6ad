// Copyright 2023 Strixpyrr
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-width number readers and writers for blocking streams.

use std::mem;
use super::{Result, Stream};

macro_rules! gen_num_codec {
	($($wfn_le:ident$rfn_le:ident$wfn_be:ident$rfn_be:ident->$ty:ident,)+) => {
		impl Stream {$(
			#[doc = concat!("Reads a little-endian `", stringify!($ty), "`.")]
			pub fn $rfn_le(&mut self) -> Result<$ty> {
				let mut bytes = [0; mem::size_of::<$ty>()];
				self.read_exact(&mut bytes)?;
				Ok($ty::from_le_bytes(bytes))
			}

			#[doc = concat!("Reads a big-endian `", stringify!($ty), "`.")]
			pub fn $rfn_be(&mut self) -> Result<$ty> {
				let mut bytes = [0; mem::size_of::<$ty>()];
				self.read_exact(&mut bytes)?;
				Ok($ty::from_be_bytes(bytes))
			}

			#[doc = concat!("Writes a little-endian `", stringify!($ty), "`.")]
			pub fn $wfn_le(&mut self, value: $ty) -> Result {
				self.write_all(&value.to_le_bytes())
			}

			#[doc = concat!("Writes a big-endian `", stringify!($ty), "`.")]
			pub fn $wfn_be(&mut self, value: $ty) -> Result {
				self.write_all(&value.to_be_bytes())
			}
		)+}
	};
}

gen_num_codec! {
	write_u16_le read_u16_le write_u16_be read_u16_be -> u16,
	write_i16_le read_i16_le write_i16_be read_i16_be -> i16,
	write_u32_le read_u32_le write_u32_be read_u32_be -> u32,
	write_i32_le read_i32_le write_i32_be read_i32_be -> i32,
	write_u64_le read_u64_le write_u64_be read_u64_be -> u64,
	write_i64_le read_i64_le write_i64_be read_i64_be -> i64,
	write_f32_le read_f32_le write_f32_be read_f32_be -> f32,
	write_f64_le read_f64_le write_f64_be read_f64_be -> f64,
}

impl Stream {
	pub fn read_u8(&mut self) -> Result<u8> {
		let mut byte = [0];
		self.read_exact(&mut byte)?;
		Ok(byte[0])
	}

	pub fn read_i8(&mut self) -> Result<i8> {
		self.read_u8().map(|byte| byte as i8)
	}

	pub fn write_u8(&mut self, value: u8) -> Result {
		self.write_all(&[value])
	}

	pub fn write_i8(&mut self, value: i8) -> Result {
		self.write_u8(value as u8)
	}

	/// Reads a little-endian 24-bit unsigned integer.
	pub fn read_u24_le(&mut self) -> Result<u32> {
		let mut bytes = [0; 4];
		self.read_exact(&mut bytes[..3])?;
		Ok(u32::from_le_bytes(bytes))
	}

	/// Reads a big-endian 24-bit unsigned integer.
	pub fn read_u24_be(&mut self) -> Result<u32> {
		let mut bytes = [0; 4];
		self.read_exact(&mut bytes[1..])?;
		Ok(u32::from_be_bytes(bytes))
	}

	/// Reads a little-endian 24-bit signed integer, sign-extending it.
	pub fn read_i24_le(&mut self) -> Result<i32> {
		self.read_u24_le().map(sign_extend_24)
	}

	/// Reads a big-endian 24-bit signed integer, sign-extending it.
	pub fn read_i24_be(&mut self) -> Result<i32> {
		self.read_u24_be().map(sign_extend_24)
	}

	/// Writes the low 24 bits of `value` in little-endian order.
	pub fn write_u24_le(&mut self, value: u32) -> Result {
		self.write_all(&value.to_le_bytes()[..3])
	}

	/// Writes the low 24 bits of `value` in big-endian order.
	pub fn write_u24_be(&mut self, value: u32) -> Result {
		self.write_all(&value.to_be_bytes()[1..])
	}

	pub fn write_i24_le(&mut self, value: i32) -> Result {
		self.write_u24_le(value as u32)
	}

	pub fn write_i24_be(&mut self, value: i32) -> Result {
		self.write_u24_be(value as u32)
	}
}

fn sign_extend_24(value: u32) -> i32 { ((value << 8) as i32) >> 8 }
