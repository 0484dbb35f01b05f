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

use skiff_core::keys::KeyError;
use skiff_core::peer_id::PeerId;
use std::io;
use thiserror::Error;

/// Errors of the Noise secure channel.
#[derive(Debug, Error)]
pub enum NoiseError {
	/// The remote failed to prove its identity: a bad AEAD tag during the
	/// handshake or an identity signature that does not verify.
	#[error("noise authentication failed")]
	Authentication,
	/// The handshake did not complete: unexpected close, oversized message,
	/// or a Noise-level protocol error.
	#[error("noise handshake failed: {0}")]
	Handshake(String),
	/// The handshake payload could not be encoded or decoded.
	#[error("malformed handshake payload")]
	Marshalling,
	/// The remote identified itself with a key type this stack cannot verify.
	#[error("unsupported identity key type")]
	UnsupportedKeyType,
	/// The authenticated peer is not the peer the caller intended to reach.
	#[error("remote identified as {actual}, expected {expected}")]
	PeerIdMismatch { expected: PeerId, actual: PeerId },
	#[error(transparent)]
	Io(#[from] io::Error),
}

impl NoiseError {
	/// Stable numeric value within the security namespace.
	pub fn code(&self) -> u32 {
		match self {
			NoiseError::Authentication | NoiseError::PeerIdMismatch { .. } => 1,
			NoiseError::Handshake(_) | NoiseError::Io(_) => 2,
			NoiseError::Marshalling => 3,
			NoiseError::UnsupportedKeyType => 4,
		}
	}
}

impl From<snow::Error> for NoiseError {
	fn from(e: snow::Error) -> Self {
		match e {
			snow::Error::Decrypt => NoiseError::Authentication,
			other => NoiseError::Handshake(other.to_string()),
		}
	}
}

impl From<KeyError> for NoiseError {
	fn from(e: KeyError) -> Self {
		match e {
			KeyError::UnsupportedKeyType(_) => NoiseError::UnsupportedKeyType,
			_ => NoiseError::Marshalling,
		}
	}
}
