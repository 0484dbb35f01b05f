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

//! Multihash: a self-describing digest.
//!
//! Wire form: `varint(code) || varint(length) || digest`.

use crate::varint::{self, VarintError};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use thiserror::Error;

/// Hash algorithm codes recognized by the stack.
pub mod code {
	pub const IDENTITY: u64 = 0x00;
	pub const SHA1: u64 = 0x11;
	pub const SHA2_256: u64 = 0x12;
	pub const SHA2_512: u64 = 0x13;
}

/// Errors of multihash construction and parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultihashError {
	#[error("unknown multihash code {0:#x}")]
	UnknownCode(u64),
	#[error("digest length {actual} does not match declared {declared}")]
	LengthMismatch { declared: u64, actual: usize },
	#[error("truncated multihash")]
	Truncated,
	#[error("invalid varint in multihash: {0}")]
	Varint(#[from] VarintError),
}

/// A tagged digest: algorithm code plus digest bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Multihash {
	code: u64,
	digest: Vec<u8>,
}

impl Multihash {
	/// Wraps an already-computed digest. Rejects unknown algorithm codes.
	pub fn wrap(code: u64, digest: impl Into<Vec<u8>>) -> Result<Self, MultihashError> {
		match code {
			code::IDENTITY | code::SHA1 | code::SHA2_256 | code::SHA2_512 => {}
			other => return Err(MultihashError::UnknownCode(other)),
		}
		Ok(Multihash { code, digest: digest.into() })
	}

	/// The identity multihash embeds `data` verbatim.
	pub fn identity(data: impl Into<Vec<u8>>) -> Self {
		Multihash { code: code::IDENTITY, digest: data.into() }
	}

	/// Hashes `data` with SHA-256.
	pub fn sha2_256(data: &[u8]) -> Self {
		Multihash { code: code::SHA2_256, digest: Sha256::digest(data).to_vec() }
	}

	/// Hashes `data` with SHA-512.
	pub fn sha2_512(data: &[u8]) -> Self {
		Multihash { code: code::SHA2_512, digest: Sha512::digest(data).to_vec() }
	}

	/// Hashes `data` with SHA-1.
	pub fn sha1(data: &[u8]) -> Self {
		Multihash { code: code::SHA1, digest: Sha1::digest(data).to_vec() }
	}

	/// The algorithm code.
	pub fn code(&self) -> u64 {
		self.code
	}

	/// The digest bytes.
	pub fn digest(&self) -> &[u8] {
		&self.digest
	}

	/// Serializes to `varint(code) || varint(length) || digest`.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(2 * varint::MAX_VARINT_LEN + self.digest.len());
		varint::write_uvarint(&mut out, self.code);
		varint::write_uvarint(&mut out, self.digest.len() as u64);
		out.extend_from_slice(&self.digest);
		out
	}

	/// Parses a multihash occupying the entire input.
	pub fn from_bytes(input: &[u8]) -> Result<Self, MultihashError> {
		let (hash, consumed) = Self::read_from(input)?;
		if consumed != input.len() {
			return Err(MultihashError::LengthMismatch {
				declared: hash.digest.len() as u64,
				actual: input.len() - (consumed - hash.digest.len()),
			});
		}
		Ok(hash)
	}

	/// Parses a multihash from the front of `input`, returning it together
	/// with the number of bytes consumed.
	pub fn read_from(input: &[u8]) -> Result<(Self, usize), MultihashError> {
		let (code, n1) = varint::decode_uvarint(input).map_err(|e| match e {
			VarintError::BufferEmpty | VarintError::VarintExpected => MultihashError::Truncated,
			other => MultihashError::Varint(other),
		})?;
		let (len, n2) = varint::decode_uvarint(&input[n1..]).map_err(|e| match e {
			VarintError::BufferEmpty | VarintError::VarintExpected => MultihashError::Truncated,
			other => MultihashError::Varint(other),
		})?;
		let start = n1 + n2;
		let remaining = input.len() - start;
		if (remaining as u64) < len {
			return Err(MultihashError::Truncated);
		}
		let digest = input[start..start + len as usize].to_vec();
		let hash = Multihash::wrap(code, digest)?;
		Ok((hash, start + len as usize))
	}

	/// Base58btc encoding of the wire form.
	pub fn to_base58(&self) -> String {
		bs58::encode(self.to_bytes()).into_string()
	}
}

impl fmt::Debug for Multihash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Multihash({:#x}, {})", self.code, self.to_base58())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;

	#[test]
	fn round_trip_all_codes() {
		let samples: Vec<Multihash> = vec![
			Multihash::identity(b"short".to_vec()),
			Multihash::sha1(b"some data"),
			Multihash::sha2_256(b"some data"),
			Multihash::sha2_512(b"some data"),
		];
		for hash in samples {
			let bytes = hash.to_bytes();
			let parsed = Multihash::from_bytes(&bytes).unwrap();
			assert_eq!(parsed, hash);
			// The varint header declares exactly the trailing digest length.
			let (_, n1) = varint::decode_uvarint(&bytes).unwrap();
			let (len, n2) = varint::decode_uvarint(&bytes[n1..]).unwrap();
			assert_eq!(len as usize, bytes.len() - n1 - n2);
		}
	}

	#[test]
	fn digest_lengths() {
		assert_eq!(Multihash::sha1(b"x").digest().len(), 20);
		assert_eq!(Multihash::sha2_256(b"x").digest().len(), 32);
		assert_eq!(Multihash::sha2_512(b"x").digest().len(), 64);
	}

	#[test]
	fn unknown_code_rejected() {
		assert_matches!(Multihash::wrap(0x42, vec![0u8; 4]), Err(MultihashError::UnknownCode(0x42)));
	}

	#[test]
	fn truncated_input_rejected() {
		let bytes = Multihash::sha2_256(b"payload").to_bytes();
		assert_matches!(Multihash::from_bytes(&bytes[..bytes.len() - 1]), Err(MultihashError::Truncated));
		assert_matches!(Multihash::from_bytes(&bytes[..1]), Err(MultihashError::Truncated));
	}

	#[test]
	fn trailing_garbage_rejected() {
		let mut bytes = Multihash::sha2_256(b"payload").to_bytes();
		bytes.push(0xaa);
		assert!(Multihash::from_bytes(&bytes).is_err());
		// But read_from reports the proper boundary.
		let (hash, consumed) = Multihash::read_from(&bytes).unwrap();
		assert_eq!(consumed, bytes.len() - 1);
		assert_eq!(hash.code(), code::SHA2_256);
	}

	#[test]
	fn known_sha256_vector() {
		// sha2-256 of empty input.
		let hash = Multihash::sha2_256(b"");
		let bytes = hash.to_bytes();
		assert_eq!(bytes[0], 0x12);
		assert_eq!(bytes[1], 32);
		assert_eq!(
			hex(&bytes[2..]),
			"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
		);
	}

	fn hex(data: &[u8]) -> String {
		data.iter().map(|b| format!("{:02x}", b)).collect()
	}
}
