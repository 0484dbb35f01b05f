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

use skiff_core::multiaddr::{AddressError, Multiaddr};
use skiff_core::peer_id::PeerId;
use skiff_core::transport::TransportError;
use skiff_multistream::MultistreamError;
use skiff_noise::NoiseError;
use skiff_yamux::YamuxError;
use thiserror::Error;

/// Errors of outbound dialing.
///
/// The error is clonable so that callers joined to one in-flight dial all
/// receive the outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialError {
	/// The caller-supplied deadline elapsed.
	#[error("dial timed out")]
	Timeout,
	/// The remote could not be reached on any known address.
	#[error("peer {0} is unreachable")]
	Unreachable(PeerId),
	/// No configured transport can handle the address.
	#[error("no transport for {0}")]
	NoTransport(Multiaddr),
	/// The dial was abandoned before completion.
	#[error("dial cancelled")]
	Cancelled,
	/// No addresses are known for the peer.
	#[error("no known addresses for {0}")]
	NoAddresses(PeerId),
	/// The connection was established but could not be upgraded.
	#[error("connection upgrade failed: {0}")]
	Upgrade(String),
}

impl DialError {
	/// Stable numeric value within the dialer namespace.
	pub fn code(&self) -> u32 {
		match self {
			DialError::Timeout => 1,
			DialError::Unreachable(_) => 2,
			DialError::NoTransport(_) => 3,
			DialError::Cancelled => 4,
			DialError::NoAddresses(_) => 5,
			DialError::Upgrade(_) => 6,
		}
	}
}

/// Errors of the connection upgrade pipeline.
#[derive(Debug, Error)]
pub enum UpgradeError {
	/// Protocol negotiation of the security or muxer stage failed.
	#[error("upgrade negotiation failed: {0}")]
	Negotiation(#[from] MultistreamError),
	/// The security handshake failed.
	#[error("security upgrade failed: {0}")]
	Security(#[from] NoiseError),
	/// The multiaddress names a layer this stack does not implement.
	#[error("layer adaptor `{0}` is not implemented")]
	LayerNotImplemented(String),
	/// The negotiated protocol has no registered implementation.
	#[error("no implementation for negotiated protocol `{0}`")]
	UnsupportedProtocol(String),
}

/// Top-level errors of network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
	#[error(transparent)]
	Dial(#[from] DialError),
	#[error(transparent)]
	Upgrade(#[from] UpgradeError),
	#[error(transparent)]
	Negotiation(#[from] MultistreamError),
	#[error(transparent)]
	Muxer(#[from] YamuxError),
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Address(#[from] AddressError),
}

/// Errors of the mplex muxer variant.
///
/// Mplex is an alternative to yamux that this stack enumerates but does not
/// implement; the namespace exists so that error codes stay stable across
/// implementations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MplexError {
	#[error("bad mplex frame format")]
	BadFrameFormat,
	#[error("too many mplex streams")]
	TooManyStreams,
}

impl MplexError {
	/// Stable numeric value within the mplex namespace.
	pub fn code(&self) -> u32 {
		match self {
			MplexError::BadFrameFormat => 1,
			MplexError::TooManyStreams => 2,
		}
	}
}
