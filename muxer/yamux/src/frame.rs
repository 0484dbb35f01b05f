// This file is part of Skiff.

// Copyright (C) 2021 Skiff Developers.
// SPDX-License-Identifier: Apache-2.0

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// 	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Yamux wire frames.
//!
//! Every frame starts with a fixed 12-byte big-endian header:
//! `{version u8, type u8, flags u16, stream_id u32, length u32}`. Only DATA
//! frames carry a body of `length` bytes; for WINDOW_UPDATE the length field
//! is the credited byte count, for PING the opaque nonce, for GO_AWAY the
//! termination code.

pub mod io;

use crate::error::FrameDecodeError;
use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Wire size of a frame header.
pub const HEADER_LEN: usize = 12;

/// The protocol version this implementation speaks.
pub const PROTO_VERSION: u8 = 0;

const_assert_eq!(HEADER_LEN, 1 + 1 + 2 + 4 + 4);

/// Identifier of a stream within one connection. Stream 0 addresses the
/// connection itself (PING and GO_AWAY frames).
pub type StreamId = u32;

/// Frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
	Data = 0,
	WindowUpdate = 1,
	Ping = 2,
	GoAway = 3,
}

bitflags! {
	/// Header flags.
	pub struct Flags: u16 {
		/// First frame of a new stream.
		const SYN = 1;
		/// Acknowledges a new stream.
		const ACK = 2;
		/// Closes the sender's write half.
		const FIN = 4;
		/// Aborts the stream in both directions.
		const RST = 8;
	}
}

/// Termination codes carried by GO_AWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoAwayCode {
	Normal = 0,
	ProtocolError = 1,
	InternalError = 2,
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub tag: Tag,
	pub flags: Flags,
	pub stream_id: StreamId,
	pub length: u32,
}

impl Header {
	pub fn new(tag: Tag, flags: Flags, stream_id: StreamId, length: u32) -> Self {
		Header { tag, flags, stream_id, length }
	}

	/// Encodes the header into its 12-byte wire form.
	pub fn encode(&self) -> [u8; HEADER_LEN] {
		let mut buf = [0u8; HEADER_LEN];
		buf[0] = PROTO_VERSION;
		buf[1] = self.tag as u8;
		buf[2..4].copy_from_slice(&self.flags.bits().to_be_bytes());
		buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
		buf[8..12].copy_from_slice(&self.length.to_be_bytes());
		buf
	}

	/// Decodes a header from its 12-byte wire form.
	pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Header, FrameDecodeError> {
		if buf[0] != PROTO_VERSION {
			return Err(FrameDecodeError::Version(buf[0]));
		}
		let tag = match buf[1] {
			0 => Tag::Data,
			1 => Tag::WindowUpdate,
			2 => Tag::Ping,
			3 => Tag::GoAway,
			other => return Err(FrameDecodeError::Type(other)),
		};
		let flags = Flags::from_bits_truncate(u16::from_be_bytes([buf[2], buf[3]]));
		let stream_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
		let length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
		Ok(Header { tag, flags, stream_id, length })
	}
}

/// A full frame: header plus the body of DATA frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub header: Header,
	pub body: Vec<u8>,
}

impl Frame {
	/// A DATA frame carrying `body`.
	pub fn data(stream_id: StreamId, flags: Flags, body: Vec<u8>) -> Frame {
		Frame {
			header: Header::new(Tag::Data, flags, stream_id, body.len() as u32),
			body,
		}
	}

	/// A WINDOW_UPDATE frame crediting `credit` bytes.
	pub fn window_update(stream_id: StreamId, flags: Flags, credit: u32) -> Frame {
		Frame { header: Header::new(Tag::WindowUpdate, flags, stream_id, credit), body: Vec::new() }
	}

	/// A PING frame. The opaque `nonce` travels in the length field.
	pub fn ping(flags: Flags, nonce: u32) -> Frame {
		Frame { header: Header::new(Tag::Ping, flags, 0, nonce), body: Vec::new() }
	}

	/// A GO_AWAY frame with the given termination code.
	pub fn go_away(code: GoAwayCode) -> Frame {
		Frame { header: Header::new(Tag::GoAway, Flags::empty(), 0, code as u32), body: Vec::new() }
	}

	/// An RST frame aborting `stream_id`.
	pub fn reset(stream_id: StreamId) -> Frame {
		Frame { header: Header::new(Tag::Data, Flags::RST, stream_id, 0), body: Vec::new() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use quickcheck::{quickcheck, Arbitrary, Gen};

	impl Arbitrary for Header {
		fn arbitrary(g: &mut Gen) -> Header {
			let tag = match u8::arbitrary(g) % 4 {
				0 => Tag::Data,
				1 => Tag::WindowUpdate,
				2 => Tag::Ping,
				_ => Tag::GoAway,
			};
			Header {
				tag,
				flags: Flags::from_bits_truncate(u16::arbitrary(g)),
				stream_id: u32::arbitrary(g),
				length: u32::arbitrary(g),
			}
		}
	}

	quickcheck! {
		fn header_round_trip(header: Header) -> bool {
			Header::decode(&header.encode()).ok() == Some(header)
		}
	}

	#[test]
	fn known_header_layout() {
		let header = Header::new(Tag::WindowUpdate, Flags::SYN | Flags::ACK, 3, 256 * 1024);
		assert_eq!(
			header.encode(),
			[0, 1, 0, 3, 0, 0, 0, 3, 0, 4, 0, 0],
		);
	}

	#[test]
	fn bad_version_and_type_rejected() {
		let mut buf = Header::new(Tag::Data, Flags::empty(), 1, 0).encode();
		buf[0] = 9;
		assert!(matches!(Header::decode(&buf), Err(FrameDecodeError::Version(9))));
		buf[0] = 0;
		buf[1] = 7;
		assert!(matches!(Header::decode(&buf), Err(FrameDecodeError::Type(7))));
	}
}
