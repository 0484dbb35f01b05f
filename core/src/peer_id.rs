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

//! Content-addressed peer identifiers.

use crate::keys::{KeyType, PublicKey};
use crate::multihash::{code, Multihash, MultihashError};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Keys whose protobuf envelope does not exceed this length are inlined into
/// the peer id with the identity hash.
pub const MAX_INLINE_KEY_LENGTH: usize = 42;

/// Errors of peer-id construction and parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerIdError {
	#[error("multihash is not a valid peer id")]
	UnsupportedMultihash,
	#[error("invalid base58: {0}")]
	InvalidBase58(String),
	#[error(transparent)]
	Multihash(#[from] MultihashError),
}

/// A peer identifier: the multihash of the peer's public key envelope.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
	bytes: Vec<u8>,
}

impl PeerId {
	/// Derives the peer id of `key`.
	///
	/// Ed25519, secp256k1 and ECDSA keys small enough to inline (envelope
	/// of at most [`MAX_INLINE_KEY_LENGTH`] bytes) use the identity hash;
	/// everything else is hashed with SHA-256.
	pub fn from_public_key(key: &PublicKey) -> PeerId {
		let envelope = key.to_protobuf_encoding();
		let inline = key.key_type() != KeyType::Rsa && envelope.len() <= MAX_INLINE_KEY_LENGTH;
		let hash = if inline {
			Multihash::identity(envelope)
		} else {
			Multihash::sha2_256(&envelope)
		};
		PeerId { bytes: hash.to_bytes() }
	}

	/// Wraps a multihash. Only identity and 32-byte SHA-256 hashes are valid
	/// peer ids.
	pub fn from_multihash(hash: Multihash) -> Result<PeerId, PeerIdError> {
		match hash.code() {
			code::IDENTITY => {}
			code::SHA2_256 if hash.digest().len() == 32 => {}
			_ => return Err(PeerIdError::UnsupportedMultihash),
		}
		Ok(PeerId { bytes: hash.to_bytes() })
	}

	/// Parses a peer id from its multihash wire bytes.
	pub fn from_bytes(bytes: &[u8]) -> Result<PeerId, PeerIdError> {
		let hash = Multihash::from_bytes(bytes)?;
		PeerId::from_multihash(hash)
	}

	/// The multihash wire bytes.
	pub fn to_bytes(&self) -> Vec<u8> {
		self.bytes.clone()
	}

	/// The multihash wire bytes, borrowed.
	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// The multihash view of this peer id.
	pub fn as_multihash(&self) -> Multihash {
		Multihash::from_bytes(&self.bytes).expect("constructed from a valid multihash; qed")
	}

	/// Base58btc text form.
	pub fn to_base58(&self) -> String {
		bs58::encode(&self.bytes).into_string()
	}
}

impl FromStr for PeerId {
	type Err = PeerIdError;

	fn from_str(s: &str) -> Result<PeerId, PeerIdError> {
		let bytes = bs58::decode(s)
			.into_vec()
			.map_err(|e| PeerIdError::InvalidBase58(e.to_string()))?;
		PeerId::from_bytes(&bytes)
	}
}

impl fmt::Display for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base58())
	}
}

impl fmt::Debug for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("PeerId").field(&self.to_base58()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::Keypair;
	use assert_matches::assert_matches;

	#[test]
	fn ed25519_peer_id_is_inlined() {
		// 32-byte key + envelope overhead stays within the inline bound.
		let pair = Keypair::generate_ed25519();
		let peer = PeerId::from_public_key(&pair.public());
		let hash = peer.as_multihash();
		assert_eq!(hash.code(), code::IDENTITY);
		assert_eq!(hash.digest(), &pair.public().to_protobuf_encoding()[..]);
		// Inline ed25519 peer ids render with the familiar "12D3Koo" prefix.
		assert!(peer.to_base58().starts_with("12D3Koo"), "{}", peer);
	}

	#[test]
	fn secp256k1_peer_id_is_inlined() {
		let pair = Keypair::generate_secp256k1();
		let peer = PeerId::from_public_key(&pair.public());
		assert_eq!(peer.as_multihash().code(), code::IDENTITY);
	}

	#[test]
	fn large_keys_are_hashed() {
		// An RSA key envelope always exceeds the inline bound.
		let key = PublicKey::Rsa(vec![0u8; 270]);
		let peer = PeerId::from_public_key(&key);
		let hash = peer.as_multihash();
		assert_eq!(hash.code(), code::SHA2_256);
		assert_eq!(hash.digest().len(), 32);
		assert!(peer.to_base58().starts_with("Qm"), "{}", peer);
	}

	#[test]
	fn base58_round_trip() {
		let pair = Keypair::generate_ed25519();
		let peer = PeerId::from_public_key(&pair.public());
		let parsed: PeerId = peer.to_base58().parse().unwrap();
		assert_eq!(parsed, peer);
	}

	#[test]
	fn derivation_fixture() {
		// A fixed all-zero ed25519 public key must always map to the same id.
		let key = PublicKey::Ed25519(ed25519_dalek::PublicKey::from_bytes(&[0u8; 32]).unwrap());
		let peer = PeerId::from_public_key(&key);
		assert_eq!(
			peer.to_base58(),
			"12D3KooW9pNAk8aiBuGVQtWRdbkLmo5qVL3e2h5UxbN2Nz9ttwiw",
		);
	}

	#[test]
	fn sha1_multihash_is_not_a_peer_id() {
		let hash = Multihash::sha1(b"whatever");
		assert_matches!(PeerId::from_multihash(hash), Err(PeerIdError::UnsupportedMultihash));
	}

	#[test]
	fn bad_base58_rejected() {
		assert_matches!("0OIl".parse::<PeerId>(), Err(PeerIdError::InvalidBase58(_)));
	}
}
