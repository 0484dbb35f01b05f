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

//! Length-prefixed message I/O.
//!
//! A message on the wire is `uvarint(len) || payload`. The reader consumes
//! the prefix one byte at a time so that a varint split across packet
//! boundaries is handled transparently.

use crate::varint::{self, State, VarintDecoder, VarintError};
use futures::prelude::*;
use std::io;
use thiserror::Error;

/// Errors of length-prefixed reads.
#[derive(Debug, Error)]
pub enum FramingError {
	#[error("invalid length prefix: {0}")]
	Varint(#[from] VarintError),
	#[error("message of {actual} bytes exceeds limit of {limit}")]
	MessageTooLarge { actual: u64, limit: usize },
	/// The remote closed the stream in the middle of a message.
	#[error("unexpected end of stream")]
	UnexpectedEof,
	#[error(transparent)]
	Io(io::Error),
}

impl From<io::Error> for FramingError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			FramingError::UnexpectedEof
		} else {
			FramingError::Io(e)
		}
	}
}

/// Writes `uvarint(len) || payload` to `io`. Does not flush.
pub async fn write_length_prefixed<W>(io: &mut W, payload: &[u8]) -> io::Result<()>
where
	W: AsyncWrite + Unpin,
{
	let mut prefix = Vec::with_capacity(varint::MAX_VARINT_LEN);
	varint::write_uvarint(&mut prefix, payload.len() as u64);
	io.write_all(&prefix).await?;
	io.write_all(payload).await?;
	Ok(())
}

/// Reads one length-prefixed message from `io`.
///
/// A message longer than `max_len` is rejected before its payload is read.
pub async fn read_length_prefixed<R>(io: &mut R, max_len: usize) -> Result<Vec<u8>, FramingError>
where
	R: AsyncRead + Unpin,
{
	let mut decoder = VarintDecoder::new();
	let len = loop {
		let mut byte = [0u8; 1];
		io.read_exact(&mut byte).await?;
		match decoder.consume(byte[0]) {
			State::Ready => break decoder.value(),
			State::Underflow => {}
			State::Overflow => return Err(VarintError::Overflow.into()),
			State::Error => return Err(VarintError::Internal.into()),
		}
	};

	if len > max_len as u64 {
		return Err(FramingError::MessageTooLarge { actual: len, limit: max_len });
	}

	let mut payload = vec![0u8; len as usize];
	io.read_exact(&mut payload).await?;
	Ok(payload)
}
