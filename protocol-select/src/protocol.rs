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

//! Wire messages of multistream-select.
//!
//! Every message is a UTF-8 line terminated by `\n`, sent with a uvarint
//! length prefix covering the line including the terminator.

use crate::MultistreamError;
use skiff_core::varint;
use skiff_core::ProtocolName;

/// The multistream-select protocol identifier, exchanged as a greeting by
/// both sides.
pub const MSS_HEADER: &str = "/multistream/1.0.0";

/// Reply meaning "protocol not available".
const NA: &str = "na";

/// Request to list the supported protocols.
const LS: &str = "ls";

/// A single multistream-select message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// The `/multistream/1.0.0` greeting line.
	Header,
	/// A protocol proposal or acceptance.
	Protocol(ProtocolName),
	/// Reply to [`Message::ListProtocols`]: the supported protocols.
	Protocols(Vec<ProtocolName>),
	/// The `na` rejection.
	NotAvailable,
	/// The `ls` listing request.
	ListProtocols,
}

impl Message {
	/// Encodes this message, including its outer length prefix.
	pub fn encode(&self) -> Vec<u8> {
		fn line(out: &mut Vec<u8>, text: &str) {
			varint::write_uvarint(out, text.len() as u64 + 1);
			out.extend_from_slice(text.as_bytes());
			out.push(b'\n');
		}

		let mut out = Vec::new();
		match self {
			Message::Header => line(&mut out, MSS_HEADER),
			Message::Protocol(name) => line(&mut out, name),
			Message::NotAvailable => line(&mut out, NA),
			Message::ListProtocols => line(&mut out, LS),
			Message::Protocols(protocols) => {
				// A listing is the concatenation of one line per protocol,
				// itself sent as a single length-prefixed message.
				let mut inner = Vec::new();
				for name in protocols {
					line(&mut inner, name);
				}
				varint::write_uvarint(&mut out, inner.len() as u64);
				out.extend_from_slice(&inner);
			}
		}
		out
	}

	/// Decodes a message from the payload of one length-prefixed frame.
	pub fn decode(payload: &[u8]) -> Result<Message, MultistreamError> {
		if let Ok(line) = strip_line(payload) {
			match line {
				MSS_HEADER => return Ok(Message::Header),
				NA => return Ok(Message::NotAvailable),
				LS => return Ok(Message::ListProtocols),
				_ if line.starts_with('/') && !line.contains('\n') => {
					return Ok(Message::Protocol(ProtocolName::from(line.to_string())));
				}
				_ => {}
			}
		}
		// Not a single line: perhaps a protocol listing of nested
		// length-prefixed entries.
		Message::decode_listing(payload)
	}

	fn decode_listing(mut payload: &[u8]) -> Result<Message, MultistreamError> {
		let mut protocols = Vec::new();
		while !payload.is_empty() {
			let (len, used) = varint::decode_uvarint(payload)
				.map_err(|_| MultistreamError::ProtocolViolation)?;
			payload = &payload[used..];
			if payload.len() < len as usize {
				return Err(MultistreamError::ProtocolViolation);
			}
			let (entry, rest) = payload.split_at(len as usize);
			let line = strip_line(entry)?;
			if !line.starts_with('/') {
				return Err(MultistreamError::ProtocolViolation);
			}
			protocols.push(ProtocolName::from(line.to_string()));
			payload = rest;
		}
		Ok(Message::Protocols(protocols))
	}
}

/// Checks the trailing newline and UTF-8, returning the line body.
fn strip_line(payload: &[u8]) -> Result<&str, MultistreamError> {
	if payload.last() != Some(&b'\n') {
		return Err(MultistreamError::ProtocolViolation);
	}
	std::str::from_utf8(&payload[..payload.len() - 1])
		.map_err(|_| MultistreamError::ProtocolViolation)
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;

	fn round_trip(message: Message) {
		let encoded = message.encode();
		// Strip the outer length prefix the way the reader would.
		let (len, used) = varint::decode_uvarint(&encoded).unwrap();
		assert_eq!(encoded.len(), used + len as usize);
		assert_eq!(Message::decode(&encoded[used..]).unwrap(), message);
	}

	#[test]
	fn messages_round_trip() {
		round_trip(Message::Header);
		round_trip(Message::NotAvailable);
		round_trip(Message::ListProtocols);
		round_trip(Message::Protocol("/echo/1.0.0".into()));
		round_trip(Message::Protocols(vec!["/echo/1.0.0".into(), "/chat/2.0.0".into()]));
		round_trip(Message::Protocols(Vec::new()));
	}

	#[test]
	fn missing_newline_rejected() {
		assert_matches!(
			Message::decode(b"/echo/1.0.0"),
			Err(MultistreamError::ProtocolViolation)
		);
	}

	#[test]
	fn non_utf8_rejected() {
		assert_matches!(
			Message::decode(b"\xff\xfe\n"),
			Err(MultistreamError::ProtocolViolation)
		);
	}
}
