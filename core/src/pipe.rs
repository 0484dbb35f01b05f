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

//! In-memory bidirectional byte pipe.
//!
//! [`pipe`] returns two connected ends, each implementing `AsyncRead` and
//! `AsyncWrite`. Closing one end makes reads on the other end return EOF once
//! buffered data is drained. Used throughout the test suites to connect two
//! protocol endpoints without a network.

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::prelude::*;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// One end of an in-memory duplex byte stream.
pub struct PipeEnd {
	tx: UnboundedSender<Vec<u8>>,
	rx: UnboundedReceiver<Vec<u8>>,
	/// Partially consumed inbound chunk.
	pending: Vec<u8>,
	offset: usize,
}

/// Creates a connected pair of in-memory byte streams.
pub fn pipe() -> (PipeEnd, PipeEnd) {
	let (a_tx, b_rx) = unbounded();
	let (b_tx, a_rx) = unbounded();
	(
		PipeEnd { tx: a_tx, rx: a_rx, pending: Vec::new(), offset: 0 },
		PipeEnd { tx: b_tx, rx: b_rx, pending: Vec::new(), offset: 0 },
	)
}

impl AsyncRead for PipeEnd {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		loop {
			if self.offset < self.pending.len() {
				let n = std::cmp::min(buf.len(), self.pending.len() - self.offset);
				let offset = self.offset;
				buf[..n].copy_from_slice(&self.pending[offset..offset + n]);
				self.offset += n;
				return Poll::Ready(Ok(n));
			}
			match Pin::new(&mut self.rx).poll_next(cx) {
				Poll::Ready(Some(chunk)) => {
					self.pending = chunk;
					self.offset = 0;
				}
				// Writer gone: EOF.
				Poll::Ready(None) => return Poll::Ready(Ok(0)),
				Poll::Pending => return Poll::Pending,
			}
		}
	}
}

impl AsyncWrite for PipeEnd {
	fn poll_write(
		self: Pin<&mut Self>,
		_cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		if buf.is_empty() {
			return Poll::Ready(Ok(0));
		}
		match self.tx.unbounded_send(buf.to_vec()) {
			Ok(()) => Poll::Ready(Ok(buf.len())),
			Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Poll::Ready(Ok(()))
	}

	fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.tx.close_channel();
		Poll::Ready(Ok(()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn data_flows_both_ways() {
		let (mut a, mut b) = pipe();
		async_std::task::block_on(async move {
			a.write_all(b"ping").await.unwrap();
			let mut buf = [0u8; 4];
			b.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"ping");

			b.write_all(b"pong").await.unwrap();
			a.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"pong");
		});
	}

	#[test]
	fn close_produces_eof_after_drain() {
		let (mut a, mut b) = pipe();
		async_std::task::block_on(async move {
			a.write_all(b"tail").await.unwrap();
			a.close().await.unwrap();
			let mut buf = Vec::new();
			b.read_to_end(&mut buf).await.unwrap();
			assert_eq!(buf, b"tail");
		});
	}
}
