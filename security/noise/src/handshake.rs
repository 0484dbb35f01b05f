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

//! The three-message Noise XX exchange with libp2p identity payloads.

use crate::error::NoiseError;
use crate::io::NoiseOutput;
use crate::payload::NoiseHandshakePayload;
use crate::MAX_FRAME_LEN;
use futures::prelude::*;
use log::{debug, trace};
use prost::Message as _;
use skiff_core::keys::{Keypair, PublicKey};
use skiff_core::peer_id::PeerId;

const LOG_TARGET: &str = "skiff-noise";

/// The Noise handshake pattern implemented by this crate.
pub const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Domain separator of the identity signature: the signed bytes are this
/// prefix followed by the Noise static public key.
const STATIC_KEY_DOMAIN: &[u8] = b"noise-libp2p-static-key:";

/// Identity of the authenticated remote, produced by a finished handshake.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
	pub peer: PeerId,
	pub public_key: PublicKey,
}

/// Reads one 2-byte big-endian length-prefixed handshake message.
pub(crate) async fn recv_frame<T>(io: &mut T) -> Result<Vec<u8>, NoiseError>
where
	T: AsyncRead + Unpin,
{
	let mut len = [0u8; 2];
	io.read_exact(&mut len).await?;
	let mut frame = vec![0u8; usize::from(u16::from_be_bytes(len))];
	io.read_exact(&mut frame).await?;
	Ok(frame)
}

/// Writes one 2-byte big-endian length-prefixed handshake message.
pub(crate) async fn send_frame<T>(io: &mut T, frame: &[u8]) -> Result<(), NoiseError>
where
	T: AsyncWrite + Unpin,
{
	debug_assert!(frame.len() <= MAX_FRAME_LEN);
	io.write_all(&(frame.len() as u16).to_be_bytes()).await?;
	io.write_all(frame).await?;
	io.flush().await?;
	Ok(())
}

/// Builds the identity payload proving ownership of `static_public`.
fn identity_payload(keypair: &Keypair, static_public: &[u8]) -> Result<Vec<u8>, NoiseError> {
	let mut signed = Vec::with_capacity(STATIC_KEY_DOMAIN.len() + static_public.len());
	signed.extend_from_slice(STATIC_KEY_DOMAIN);
	signed.extend_from_slice(static_public);
	let signature = keypair.sign(&signed)?;
	let payload = NoiseHandshakePayload {
		identity_key: Some(keypair.public().to_protobuf_encoding()),
		identity_sig: Some(signature),
		data: None,
	};
	let mut out = Vec::with_capacity(payload.encoded_len());
	payload.encode(&mut out).map_err(|_| NoiseError::Marshalling)?;
	Ok(out)
}

/// Verifies the remote's identity payload against its Noise static key.
fn verify_payload(
	payload: &[u8],
	remote_static: Option<&[u8]>,
) -> Result<RemoteIdentity, NoiseError> {
	let payload = NoiseHandshakePayload::decode(payload).map_err(|_| NoiseError::Marshalling)?;
	let identity_key = payload.identity_key.ok_or(NoiseError::Marshalling)?;
	let identity_sig = payload.identity_sig.ok_or(NoiseError::Authentication)?;
	let remote_static = remote_static
		.ok_or_else(|| NoiseError::Handshake("remote static key not yet known".into()))?;

	let public_key = PublicKey::from_protobuf_encoding(&identity_key)?;
	let mut signed = Vec::with_capacity(STATIC_KEY_DOMAIN.len() + remote_static.len());
	signed.extend_from_slice(STATIC_KEY_DOMAIN);
	signed.extend_from_slice(remote_static);
	if !public_key.verify(&signed, &identity_sig)? {
		return Err(NoiseError::Authentication);
	}

	let peer = PeerId::from_public_key(&public_key);
	trace!(target: LOG_TARGET, "authenticated remote peer {}", peer);
	Ok(RemoteIdentity { peer, public_key })
}

fn builder(static_keypair: &snow::Keypair) -> Result<snow::Builder<'_>, NoiseError> {
	let params = NOISE_PARAMS
		.parse()
		.map_err(|_| NoiseError::Handshake("invalid noise parameters".into()))?;
	Ok(snow::Builder::new(params).local_private_key(&static_keypair.private))
}

/// Generates the per-connection Noise static keypair.
pub(crate) fn generate_static_keypair() -> Result<snow::Keypair, NoiseError> {
	let params = NOISE_PARAMS
		.parse()
		.map_err(|_| NoiseError::Handshake("invalid noise parameters".into()))?;
	Ok(snow::Builder::new(params).generate_keypair()?)
}

/// Runs the XX handshake as the initiator.
///
/// When `expected_peer` is given (the dialer usually knows whom it dials)
/// the authenticated identity must match it.
pub async fn handshake_outbound<T>(
	mut io: T,
	keypair: &Keypair,
	expected_peer: Option<PeerId>,
) -> Result<NoiseOutput<T>, NoiseError>
where
	T: AsyncRead + AsyncWrite + Unpin,
{
	let static_keypair = generate_static_keypair()?;
	let mut state = builder(&static_keypair)?.build_initiator()?;
	let payload = identity_payload(keypair, &static_keypair.public)?;
	let mut buffer = vec![0u8; MAX_FRAME_LEN];

	// -> e
	let n = state.write_message(&[], &mut buffer)?;
	send_frame(&mut io, &buffer[..n]).await?;

	// <- e, ee, s, es, payload
	let message = recv_frame(&mut io).await?;
	let n = state.read_message(&message, &mut buffer)?;
	let remote = verify_payload(&buffer[..n], state.get_remote_static())?;
	if let Some(expected) = expected_peer {
		if expected != remote.peer {
			return Err(NoiseError::PeerIdMismatch { expected, actual: remote.peer });
		}
	}

	// -> s, se, payload
	let n = state.write_message(&payload, &mut buffer)?;
	send_frame(&mut io, &buffer[..n]).await?;

	let session = state.into_transport_mode()?;
	let local_peer = PeerId::from_public_key(&keypair.public());
	debug!(
		target: LOG_TARGET,
		"outbound handshake complete: {} -> {}", local_peer, remote.peer,
	);
	Ok(NoiseOutput::new(io, session, local_peer, remote))
}

/// Runs the XX handshake as the responder.
pub async fn handshake_inbound<T>(mut io: T, keypair: &Keypair) -> Result<NoiseOutput<T>, NoiseError>
where
	T: AsyncRead + AsyncWrite + Unpin,
{
	let static_keypair = generate_static_keypair()?;
	let mut state = builder(&static_keypair)?.build_responder()?;
	let payload = identity_payload(keypair, &static_keypair.public)?;
	let mut buffer = vec![0u8; MAX_FRAME_LEN];

	// <- e
	let message = recv_frame(&mut io).await?;
	state.read_message(&message, &mut buffer)?;

	// -> e, ee, s, es, payload
	let n = state.write_message(&payload, &mut buffer)?;
	send_frame(&mut io, &buffer[..n]).await?;

	// <- s, se, payload
	let message = recv_frame(&mut io).await?;
	let n = state.read_message(&message, &mut buffer)?;
	let remote = verify_payload(&buffer[..n], state.get_remote_static())?;

	let session = state.into_transport_mode()?;
	let local_peer = PeerId::from_public_key(&keypair.public());
	debug!(
		target: LOG_TARGET,
		"inbound handshake complete: {} <- {}", local_peer, remote.peer,
	);
	Ok(NoiseOutput::new(io, session, local_peer, remote))
}
