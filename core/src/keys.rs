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

//! Identity keys.
//!
//! Public keys travel in a protobuf envelope carrying the key type and the
//! raw key bytes; that envelope is the input to peer-id derivation. Signing
//! and verification are implemented for Ed25519 and secp256k1; RSA and ECDSA
//! keys are carried opaquely (they parse and produce peer ids, but signing
//! with them is not supported by this implementation).

use ed25519_dalek::{Signer as _, Verifier as _};
use prost::Message as _;
use sha2::{Digest, Sha256};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Protobuf envelopes for keys.
mod proto {
	#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
	#[repr(i32)]
	pub enum KeyType {
		Rsa = 0,
		Ed25519 = 1,
		Secp256k1 = 2,
		Ecdsa = 3,
	}

	#[derive(Clone, PartialEq, ::prost::Message)]
	pub struct PublicKey {
		#[prost(enumeration = "KeyType", required, tag = "1")]
		pub key_type: i32,
		#[prost(bytes, required, tag = "2")]
		pub data: Vec<u8>,
	}

	#[derive(Clone, PartialEq, ::prost::Message)]
	pub struct PrivateKey {
		#[prost(enumeration = "KeyType", required, tag = "1")]
		pub key_type: i32,
		#[prost(bytes, required, tag = "2")]
		pub data: Vec<u8>,
	}
}

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
	Rsa,
	Ed25519,
	Secp256k1,
	Ecdsa,
}

/// Errors of key handling.
#[derive(Debug, Error)]
pub enum KeyError {
	#[error("operation is not supported for {0:?} keys")]
	UnsupportedKeyType(KeyType),
	#[error("malformed key material")]
	InvalidKey,
	#[error("malformed signature")]
	InvalidSignature,
	#[error("failed to decode key envelope: {0}")]
	Marshalling(#[from] prost::DecodeError),
	#[error("unknown key type tag {0}")]
	UnknownKeyType(i32),
}

impl KeyError {
	/// Stable numeric value within the security namespace.
	pub fn code(&self) -> u32 {
		match self {
			KeyError::UnsupportedKeyType(_) => 1,
			KeyError::InvalidKey => 2,
			KeyError::InvalidSignature => 3,
			KeyError::Marshalling(_) => 4,
			KeyError::UnknownKeyType(_) => 5,
		}
	}
}

/// A peer's public identity key.
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
	Ed25519(ed25519_dalek::PublicKey),
	Secp256k1(secp256k1::PublicKey),
	/// DER-encoded RSA public key, carried opaquely.
	Rsa(Vec<u8>),
	/// DER-encoded ECDSA public key, carried opaquely.
	Ecdsa(Vec<u8>),
}

impl PublicKey {
	/// The type tag of this key.
	pub fn key_type(&self) -> KeyType {
		match self {
			PublicKey::Ed25519(_) => KeyType::Ed25519,
			PublicKey::Secp256k1(_) => KeyType::Secp256k1,
			PublicKey::Rsa(_) => KeyType::Rsa,
			PublicKey::Ecdsa(_) => KeyType::Ecdsa,
		}
	}

	/// Verifies `signature` over `message`.
	pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
		match self {
			PublicKey::Ed25519(key) => {
				let signature = ed25519_dalek::Signature::try_from(signature)
					.map_err(|_| KeyError::InvalidSignature)?;
				Ok(key.verify(message, &signature).is_ok())
			}
			PublicKey::Secp256k1(key) => {
				let digest = Sha256::digest(message);
				let message = secp256k1::Message::parse_slice(&digest)
					.map_err(|_| KeyError::InvalidSignature)?;
				let signature = secp256k1::Signature::parse_der(signature)
					.map_err(|_| KeyError::InvalidSignature)?;
				Ok(secp256k1::verify(&message, &signature, key))
			}
			other => Err(KeyError::UnsupportedKeyType(other.key_type())),
		}
	}

	/// Canonical protobuf serialization: the input to peer-id derivation.
	pub fn to_protobuf_encoding(&self) -> Vec<u8> {
		let (key_type, data) = match self {
			PublicKey::Ed25519(key) => (proto::KeyType::Ed25519, key.as_bytes().to_vec()),
			PublicKey::Secp256k1(key) => {
				(proto::KeyType::Secp256k1, key.serialize_compressed().to_vec())
			}
			PublicKey::Rsa(der) => (proto::KeyType::Rsa, der.clone()),
			PublicKey::Ecdsa(der) => (proto::KeyType::Ecdsa, der.clone()),
		};
		let envelope = proto::PublicKey { key_type: key_type as i32, data };
		let mut out = Vec::with_capacity(envelope.encoded_len());
		envelope
			.encode(&mut out)
			.expect("buffer is a Vec with sufficient capacity; qed");
		out
	}

	/// Parses the canonical protobuf serialization.
	pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<PublicKey, KeyError> {
		let envelope = proto::PublicKey::decode(bytes)?;
		match proto::KeyType::from_i32(envelope.key_type) {
			Some(proto::KeyType::Ed25519) => {
				let key = ed25519_dalek::PublicKey::from_bytes(&envelope.data)
					.map_err(|_| KeyError::InvalidKey)?;
				Ok(PublicKey::Ed25519(key))
			}
			Some(proto::KeyType::Secp256k1) => {
				let key = secp256k1::PublicKey::parse_slice(
					&envelope.data,
					Some(secp256k1::PublicKeyFormat::Compressed),
				)
				.map_err(|_| KeyError::InvalidKey)?;
				Ok(PublicKey::Secp256k1(key))
			}
			Some(proto::KeyType::Rsa) => Ok(PublicKey::Rsa(envelope.data)),
			Some(proto::KeyType::Ecdsa) => Ok(PublicKey::Ecdsa(envelope.data)),
			None => Err(KeyError::UnknownKeyType(envelope.key_type)),
		}
	}
}

impl fmt::Debug for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PublicKey::{:?}", self.key_type())
	}
}

/// A local identity keypair.
pub enum Keypair {
	Ed25519(ed25519_dalek::Keypair),
	Secp256k1 { secret: secp256k1::SecretKey, public: secp256k1::PublicKey },
}

impl Keypair {
	/// Generates a fresh Ed25519 keypair.
	pub fn generate_ed25519() -> Keypair {
		let mut csprng = rand::rngs::OsRng;
		Keypair::Ed25519(ed25519_dalek::Keypair::generate(&mut csprng))
	}

	/// Generates a fresh secp256k1 keypair.
	pub fn generate_secp256k1() -> Keypair {
		let mut csprng = rand::rngs::OsRng;
		let secret = secp256k1::SecretKey::random(&mut csprng);
		let public = secp256k1::PublicKey::from_secret_key(&secret);
		Keypair::Secp256k1 { secret, public }
	}

	/// The type tag of this keypair.
	pub fn key_type(&self) -> KeyType {
		match self {
			Keypair::Ed25519(_) => KeyType::Ed25519,
			Keypair::Secp256k1 { .. } => KeyType::Secp256k1,
		}
	}

	/// The public half.
	pub fn public(&self) -> PublicKey {
		match self {
			Keypair::Ed25519(pair) => PublicKey::Ed25519(pair.public),
			Keypair::Secp256k1 { public, .. } => PublicKey::Secp256k1(public.clone()),
		}
	}

	/// Signs `message` with this key.
	pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
		match self {
			Keypair::Ed25519(pair) => Ok(pair.sign(message).to_bytes().to_vec()),
			Keypair::Secp256k1 { secret, .. } => {
				let digest = Sha256::digest(message);
				let message = secp256k1::Message::parse_slice(&digest)
					.map_err(|_| KeyError::InvalidKey)?;
				let (signature, _) = secp256k1::sign(&message, secret);
				Ok(signature.serialize_der().as_ref().to_vec())
			}
		}
	}

	/// Serializes the keypair into the protobuf private-key envelope.
	pub fn to_protobuf_encoding(&self) -> Vec<u8> {
		let (key_type, data) = match self {
			Keypair::Ed25519(pair) => (proto::KeyType::Ed25519, pair.to_bytes().to_vec()),
			Keypair::Secp256k1 { secret, .. } => {
				(proto::KeyType::Secp256k1, secret.serialize().to_vec())
			}
		};
		let envelope = proto::PrivateKey { key_type: key_type as i32, data };
		let mut out = Vec::with_capacity(envelope.encoded_len());
		envelope
			.encode(&mut out)
			.expect("buffer is a Vec with sufficient capacity; qed");
		out
	}

	/// Parses a keypair from the protobuf private-key envelope.
	pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<Keypair, KeyError> {
		let mut envelope = proto::PrivateKey::decode(bytes)?;
		let result = match proto::KeyType::from_i32(envelope.key_type) {
			Some(proto::KeyType::Ed25519) => ed25519_dalek::Keypair::from_bytes(&envelope.data)
				.map(Keypair::Ed25519)
				.map_err(|_| KeyError::InvalidKey),
			Some(proto::KeyType::Secp256k1) => {
				secp256k1::SecretKey::parse_slice(&envelope.data)
					.map(|secret| {
						let public = secp256k1::PublicKey::from_secret_key(&secret);
						Keypair::Secp256k1 { secret, public }
					})
					.map_err(|_| KeyError::InvalidKey)
			}
			Some(proto::KeyType::Rsa) => Err(KeyError::UnsupportedKeyType(KeyType::Rsa)),
			Some(proto::KeyType::Ecdsa) => Err(KeyError::UnsupportedKeyType(KeyType::Ecdsa)),
			None => Err(KeyError::UnknownKeyType(envelope.key_type)),
		};
		envelope.data.zeroize();
		result
	}
}

impl Clone for Keypair {
	fn clone(&self) -> Self {
		match self {
			Keypair::Ed25519(pair) => {
				let bytes = pair.to_bytes();
				Keypair::Ed25519(
					ed25519_dalek::Keypair::from_bytes(&bytes)
						.expect("round-trip of a valid keypair cannot fail; qed"),
				)
			}
			Keypair::Secp256k1 { secret, public } => {
				Keypair::Secp256k1 { secret: secret.clone(), public: public.clone() }
			}
		}
	}
}

impl fmt::Debug for Keypair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Keypair::{:?}", self.key_type())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;

	#[test]
	fn ed25519_sign_verify() {
		let pair = Keypair::generate_ed25519();
		let signature = pair.sign(b"a message").unwrap();
		assert!(pair.public().verify(b"a message", &signature).unwrap());
		assert!(!pair.public().verify(b"another message", &signature).unwrap());
	}

	#[test]
	fn secp256k1_sign_verify() {
		let pair = Keypair::generate_secp256k1();
		let signature = pair.sign(b"a message").unwrap();
		assert!(pair.public().verify(b"a message", &signature).unwrap());
		assert!(!pair.public().verify(b"another message", &signature).unwrap());
	}

	#[test]
	fn public_key_envelope_round_trip() {
		for pair in &[Keypair::generate_ed25519(), Keypair::generate_secp256k1()] {
			let public = pair.public();
			let bytes = public.to_protobuf_encoding();
			let decoded = PublicKey::from_protobuf_encoding(&bytes).unwrap();
			assert_eq!(decoded, public);
		}
	}

	#[test]
	fn keypair_envelope_round_trip() {
		let pair = Keypair::generate_ed25519();
		let decoded = Keypair::from_protobuf_encoding(&pair.to_protobuf_encoding()).unwrap();
		// Same identity: the public halves agree and signatures interverify.
		assert_eq!(decoded.public(), pair.public());
		let signature = decoded.sign(b"msg").unwrap();
		assert!(pair.public().verify(b"msg", &signature).unwrap());
	}

	#[test]
	fn opaque_keys_cannot_verify() {
		let key = PublicKey::Rsa(vec![0x30, 0x82]);
		assert_matches!(
			key.verify(b"m", b"s"),
			Err(KeyError::UnsupportedKeyType(KeyType::Rsa))
		);
	}

	#[test]
	fn garbage_envelope_rejected() {
		assert!(PublicKey::from_protobuf_encoding(b"not protobuf").is_err());
	}
}
