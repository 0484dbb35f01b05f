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

//! The encrypted byte stream produced by a finished handshake.
//!
//! Every frame on the wire is `u16_be(len) || ciphertext`, with `len`
//! at most 65535 and the ciphertext carrying a 16-byte AEAD tag. Frame
//! nonces are implicit, starting at zero and incrementing per direction;
//! both nonce overflow and tag mismatch poison the stream.

use crate::handshake::RemoteIdentity;
use crate::MAX_FRAME_LEN;
use futures::prelude::*;
use futures::ready;
use skiff_core::keys::PublicKey;
use skiff_core::multiaddr::Multiaddr;
use skiff_core::peer_id::PeerId;
use skiff_core::secure::SecureInfo;
use skiff_core::transport::RawConnection;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// AEAD tag length of ChaCha20-Poly1305.
const TAG_LEN: usize = 16;

/// Largest plaintext that fits one frame.
const MAX_PLAINTEXT_LEN: usize = MAX_FRAME_LEN - TAG_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
	/// Reading the 2-byte length prefix.
	Len,
	/// Reading the ciphertext of the announced length.
	Frame { len: usize },
	/// Remote closed cleanly between frames.
	Eof,
	/// Decryption failed; the stream is unusable.
	Poisoned,
}

/// An authenticated, encrypted byte stream over `T`.
pub struct NoiseOutput<T> {
	io: T,
	session: snow::TransportState,
	local_peer: PeerId,
	remote: RemoteIdentity,

	read_state: ReadState,
	len_buf: [u8; 2],
	len_off: usize,
	frame_buf: Vec<u8>,
	frame_off: usize,
	decrypted: Vec<u8>,
	decrypted_off: usize,

	write_buf: Vec<u8>,
	encrypted: Vec<u8>,
	encrypted_off: usize,
}

impl<T> std::fmt::Debug for NoiseOutput<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NoiseOutput")
			.field("local_peer", &self.local_peer)
			.field("remote", &self.remote)
			.field("read_state", &self.read_state)
			.finish()
	}
}

impl<T> NoiseOutput<T> {
	pub(crate) fn new(
		io: T,
		session: snow::TransportState,
		local_peer: PeerId,
		remote: RemoteIdentity,
	) -> Self {
		NoiseOutput {
			io,
			session,
			local_peer,
			remote,
			read_state: ReadState::Len,
			len_buf: [0; 2],
			len_off: 0,
			frame_buf: Vec::new(),
			frame_off: 0,
			decrypted: Vec::new(),
			decrypted_off: 0,
			write_buf: Vec::new(),
			encrypted: Vec::new(),
			encrypted_off: 0,
		}
	}

	/// Gives back the underlying stream, discarding the session.
	pub fn into_inner(self) -> T {
		self.io
	}
}

impl<T> SecureInfo for NoiseOutput<T> {
	fn local_peer(&self) -> PeerId {
		self.local_peer.clone()
	}

	fn remote_peer(&self) -> PeerId {
		self.remote.peer.clone()
	}

	fn remote_public_key(&self) -> PublicKey {
		self.remote.public_key.clone()
	}
}

impl<T: RawConnection> RawConnection for NoiseOutput<T> {
	fn local_multiaddr(&self) -> Multiaddr {
		self.io.local_multiaddr()
	}

	fn remote_multiaddr(&self) -> Multiaddr {
		self.io.remote_multiaddr()
	}

	fn is_initiator(&self) -> bool {
		self.io.is_initiator()
	}
}

impl<T: AsyncRead + Unpin> AsyncRead for NoiseOutput<T> {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		let this = &mut *self;
		loop {
			// Serve decrypted bytes first.
			if this.decrypted_off < this.decrypted.len() {
				let n = std::cmp::min(buf.len(), this.decrypted.len() - this.decrypted_off);
				buf[..n].copy_from_slice(&this.decrypted[this.decrypted_off..this.decrypted_off + n]);
				this.decrypted_off += n;
				return Poll::Ready(Ok(n));
			}

			match this.read_state {
				ReadState::Len => {
					while this.len_off < 2 {
						let n = ready!(Pin::new(&mut this.io)
							.poll_read(cx, &mut this.len_buf[this.len_off..2]))?;
						if n == 0 {
							if this.len_off == 0 {
								this.read_state = ReadState::Eof;
								return Poll::Ready(Ok(0));
							}
							return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
						}
						this.len_off += n;
					}
					this.len_off = 0;
					let len = usize::from(u16::from_be_bytes(this.len_buf));
					if len == 0 {
						continue;
					}
					this.frame_buf.resize(len, 0);
					this.frame_off = 0;
					this.read_state = ReadState::Frame { len };
				}
				ReadState::Frame { len } => {
					while this.frame_off < len {
						let n = ready!(Pin::new(&mut this.io)
							.poll_read(cx, &mut this.frame_buf[this.frame_off..len]))?;
						if n == 0 {
							return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
						}
						this.frame_off += n;
					}
					this.decrypted.resize(len, 0);
					match this.session.read_message(&this.frame_buf[..len], &mut this.decrypted) {
						Ok(n) => {
							this.decrypted.truncate(n);
							this.decrypted_off = 0;
							this.read_state = ReadState::Len;
						}
						Err(_) => {
							this.read_state = ReadState::Poisoned;
							return Poll::Ready(Err(io::Error::new(
								io::ErrorKind::InvalidData,
								crate::NoiseError::Authentication,
							)));
						}
					}
				}
				ReadState::Eof => return Poll::Ready(Ok(0)),
				ReadState::Poisoned => {
					return Poll::Ready(Err(io::Error::new(
						io::ErrorKind::InvalidData,
						crate::NoiseError::Authentication,
					)))
				}
			}
		}
	}
}

impl<T: AsyncWrite + Unpin> NoiseOutput<T> {
	/// Encrypts buffered plaintext and drives the ciphertext out.
	fn poll_flush_buffer(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		loop {
			if self.encrypted_off < self.encrypted.len() {
				let n = ready!(
					Pin::new(&mut self.io).poll_write(cx, &self.encrypted[self.encrypted_off..])
				)?;
				if n == 0 {
					return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
				}
				self.encrypted_off += n;
				continue;
			}
			self.encrypted.clear();
			self.encrypted_off = 0;

			if self.write_buf.is_empty() {
				return Poll::Ready(Ok(()));
			}

			let mut ciphertext = vec![0u8; self.write_buf.len() + TAG_LEN];
			let n = self
				.session
				.write_message(&self.write_buf, &mut ciphertext)
				.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
			self.write_buf.clear();
			self.encrypted.reserve(2 + n);
			self.encrypted.extend_from_slice(&(n as u16).to_be_bytes());
			self.encrypted.extend_from_slice(&ciphertext[..n]);
		}
	}
}

impl<T: AsyncWrite + Unpin> AsyncWrite for NoiseOutput<T> {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let this = &mut *self;
		if this.write_buf.len() >= MAX_PLAINTEXT_LEN {
			ready!(this.poll_flush_buffer(cx))?;
		}
		let n = std::cmp::min(buf.len(), MAX_PLAINTEXT_LEN - this.write_buf.len());
		this.write_buf.extend_from_slice(&buf[..n]);
		Poll::Ready(Ok(n))
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let this = &mut *self;
		ready!(this.poll_flush_buffer(cx))?;
		Pin::new(&mut this.io).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let this = &mut *self;
		ready!(this.poll_flush_buffer(cx))?;
		Pin::new(&mut this.io).poll_close(cx)
	}
}
