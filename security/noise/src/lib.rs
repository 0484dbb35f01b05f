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

//! The Noise XX secure channel.
//!
//! Upgrading a raw connection through [`NoiseConfig`] runs the
//! `Noise_XX_25519_ChaChaPoly_SHA256` handshake, during which both sides
//! prove ownership of their libp2p identity key by signing their Noise
//! static key. The result is an encrypted stream that knows the
//! authenticated [`PeerId`] of both endpoints.

mod error;
mod handshake;
mod io;
mod payload;

pub use error::NoiseError;
pub use handshake::{handshake_inbound, handshake_outbound, RemoteIdentity, NOISE_PARAMS};
pub use io::NoiseOutput;
pub use payload::NoiseHandshakePayload;

use futures::prelude::*;
use skiff_core::keys::Keypair;
use skiff_core::peer_id::PeerId;
use skiff_core::ProtocolName;

/// Handshake and transport frames are limited to this size, length prefix
/// excluded.
pub const MAX_FRAME_LEN: usize = 65535;

/// The protocol name under which this channel is negotiated.
pub const PROTOCOL_NAME: &str = "/noise";

/// Configuration of the Noise security upgrade.
#[derive(Clone)]
pub struct NoiseConfig {
	keypair: Keypair,
}

impl NoiseConfig {
	/// Creates the config for the given local identity.
	pub fn new(keypair: Keypair) -> Self {
		NoiseConfig { keypair }
	}

	/// The multistream-select name of this security protocol.
	pub fn protocol_name(&self) -> ProtocolName {
		ProtocolName::from(PROTOCOL_NAME)
	}

	/// Secures an outbound connection. If `expected_peer` is given, the
	/// handshake fails unless the remote proves exactly that identity.
	pub async fn upgrade_outbound<T>(
		&self,
		io: T,
		expected_peer: Option<PeerId>,
	) -> Result<NoiseOutput<T>, NoiseError>
	where
		T: AsyncRead + AsyncWrite + Unpin,
	{
		handshake_outbound(io, &self.keypair, expected_peer).await
	}

	/// Secures an inbound connection.
	pub async fn upgrade_inbound<T>(&self, io: T) -> Result<NoiseOutput<T>, NoiseError>
	where
		T: AsyncRead + AsyncWrite + Unpin,
	{
		handshake_inbound(io, &self.keypair).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;
	use prost::Message as _;
	use skiff_core::pipe::{pipe, PipeEnd};
	use skiff_core::secure::SecureInfo;
	use std::pin::Pin;
	use std::task::{Context, Poll};

	fn keypairs() -> (Keypair, Keypair) {
		(Keypair::generate_ed25519(), Keypair::generate_secp256k1())
	}

	#[test]
	fn handshake_authenticates_both_sides() {
		let (initiator_key, responder_key) = keypairs();
		let initiator_peer = PeerId::from_public_key(&initiator_key.public());
		let responder_peer = PeerId::from_public_key(&responder_key.public());
		let (a, b) = pipe();

		async_std::task::block_on(async move {
			let server_key = responder_key.clone();
			let server = async_std::task::spawn(async move {
				NoiseConfig::new(server_key).upgrade_inbound(b).await.unwrap()
			});
			let outbound = NoiseConfig::new(initiator_key)
				.upgrade_outbound(a, Some(responder_peer.clone()))
				.await
				.unwrap();
			let inbound = server.await;

			assert_eq!(outbound.remote_peer(), responder_peer);
			assert_eq!(inbound.remote_peer(), initiator_peer);
			assert_eq!(outbound.local_peer(), inbound.remote_peer());
			assert_eq!(inbound.remote_public_key().key_type(), skiff_core::KeyType::Ed25519);
		});
	}

	#[test]
	fn data_flows_encrypted() {
		let (initiator_key, responder_key) = keypairs();
		let (a, b) = pipe();

		async_std::task::block_on(async move {
			let server = async_std::task::spawn(async move {
				let mut secured =
					NoiseConfig::new(responder_key).upgrade_inbound(b).await.unwrap();
				let mut buf = [0u8; 13];
				secured.read_exact(&mut buf).await.unwrap();
				assert_eq!(&buf, b"hello, noise!");
				secured.write_all(b"and back").await.unwrap();
				secured.flush().await.unwrap();
			});
			let mut secured = NoiseConfig::new(initiator_key)
				.upgrade_outbound(a, None)
				.await
				.unwrap();
			secured.write_all(b"hello, noise!").await.unwrap();
			secured.flush().await.unwrap();
			let mut buf = [0u8; 8];
			secured.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"and back");
			server.await;
		});
	}

	#[test]
	fn large_transfers_span_frames() {
		let (initiator_key, responder_key) = keypairs();
		let (a, b) = pipe();
		// More than one 65519-byte plaintext frame.
		let payload: Vec<u8> = (0..200_000usize).map(|i| (i % 251) as u8).collect();
		let expected = payload.clone();

		async_std::task::block_on(async move {
			let server = async_std::task::spawn(async move {
				let mut secured =
					NoiseConfig::new(responder_key).upgrade_inbound(b).await.unwrap();
				let mut received = vec![0u8; expected.len()];
				secured.read_exact(&mut received).await.unwrap();
				assert_eq!(received, expected);
			});
			let mut secured = NoiseConfig::new(initiator_key)
				.upgrade_outbound(a, None)
				.await
				.unwrap();
			secured.write_all(&payload).await.unwrap();
			secured.flush().await.unwrap();
			server.await;
		});
	}

	#[test]
	fn wrong_peer_is_rejected() {
		let (initiator_key, responder_key) = keypairs();
		let other_peer = PeerId::from_public_key(&Keypair::generate_ed25519().public());
		let (a, b) = pipe();

		async_std::task::block_on(async move {
			let server = async_std::task::spawn(async move {
				// The responder's third read fails once the initiator hangs up.
				let _ = NoiseConfig::new(responder_key).upgrade_inbound(b).await;
			});
			let result = NoiseConfig::new(initiator_key)
				.upgrade_outbound(a, Some(other_peer))
				.await;
			assert_matches!(result, Err(NoiseError::PeerIdMismatch { .. }));
			server.await;
		});
	}

	/// Flips the last byte of the first length-prefixed frame read through it.
	struct TamperLastByte {
		inner: PipeEnd,
		frame_len: Option<usize>,
		len_read: usize,
		body_read: usize,
		done: bool,
	}

	impl TamperLastByte {
		fn new(inner: PipeEnd) -> Self {
			TamperLastByte { inner, frame_len: None, len_read: 0, body_read: 0, done: false }
		}
	}

	impl AsyncRead for TamperLastByte {
		fn poll_read(
			mut self: Pin<&mut Self>,
			cx: &mut Context<'_>,
			buf: &mut [u8],
		) -> Poll<std::io::Result<usize>> {
			let n = futures::ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
			if self.done || n == 0 {
				return Poll::Ready(Ok(n));
			}
			let mut len_buf = [0u8; 2];
			for i in 0..n {
				if self.frame_len.is_none() {
					len_buf[self.len_read] = buf[i];
					self.len_read += 1;
					if self.len_read == 2 {
						self.frame_len = Some(usize::from(u16::from_be_bytes(len_buf)));
					}
				} else if let Some(len) = self.frame_len {
					self.body_read += 1;
					if self.body_read == len {
						buf[i] ^= 0x01;
						self.done = true;
						break;
					}
				}
			}
			Poll::Ready(Ok(n))
		}
	}

	impl AsyncWrite for TamperLastByte {
		fn poll_write(
			mut self: Pin<&mut Self>,
			cx: &mut Context<'_>,
			buf: &[u8],
		) -> Poll<std::io::Result<usize>> {
			Pin::new(&mut self.inner).poll_write(cx, buf)
		}

		fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
			Pin::new(&mut self.inner).poll_flush(cx)
		}

		fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
			Pin::new(&mut self.inner).poll_close(cx)
		}
	}

	#[test]
	fn tampered_handshake_message_fails_authentication() {
		let (initiator_key, responder_key) = keypairs();
		let (a, b) = pipe();

		async_std::task::block_on(async move {
			let server = async_std::task::spawn(async move {
				// The responder cannot tell; its handshake simply never
				// completes once the initiator aborts.
				let _ = NoiseConfig::new(responder_key).upgrade_inbound(b).await;
			});
			// The initiator sees the responder's message 2 with one
			// ciphertext byte flipped.
			let tampered = TamperLastByte::new(a);
			let result = NoiseConfig::new(initiator_key)
				.upgrade_outbound(tampered, None)
				.await;
			assert_matches!(result, Err(NoiseError::Authentication));
			server.await;
		});
	}

	#[test]
	fn forged_identity_signature_is_rejected() {
		let (initiator_key, responder_key) = keypairs();
		let (a, mut b) = pipe();

		async_std::task::block_on(async move {
			// A malicious responder: a well-formed Noise handshake whose
			// identity signature covers garbage instead of its static key.
			let server = async_std::task::spawn(async move {
				let static_keypair = crate::handshake::generate_static_keypair().unwrap();
				let mut state = snow::Builder::new(NOISE_PARAMS.parse().unwrap())
					.local_private_key(&static_keypair.private)
					.build_responder()
					.unwrap();
				let mut buffer = vec![0u8; MAX_FRAME_LEN];

				let message = crate::handshake::recv_frame(&mut b).await.unwrap();
				state.read_message(&message, &mut buffer).unwrap();

				let payload = NoiseHandshakePayload {
					identity_key: Some(responder_key.public().to_protobuf_encoding()),
					identity_sig: Some(
						responder_key.sign(b"definitely not the static key").unwrap(),
					),
					data: None,
				};
				let mut payload_bytes = Vec::new();
				payload.encode(&mut payload_bytes).unwrap();
				let n = state.write_message(&payload_bytes, &mut buffer).unwrap();
				crate::handshake::send_frame(&mut b, &buffer[..n]).await.unwrap();
			});

			let result = NoiseConfig::new(initiator_key).upgrade_outbound(a, None).await;
			assert_matches!(result, Err(NoiseError::Authentication));
			server.await;
		});
	}
}
