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

//! A frame codec over an async byte stream.
//!
//! [`Io`] implements `futures::Stream` of decoded frames and `Sink` of
//! outgoing frames. All intermediate state lives in the codec itself, so the
//! owning task may drop and recreate its read future at any await point
//! without losing partially read bytes.

use super::{Frame, Header, Tag, HEADER_LEN};
use crate::error::FrameDecodeError;
use futures::prelude::*;
use futures::ready;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

enum ReadState {
	Header { offset: usize },
	Body { header: Header, offset: usize },
}

enum WriteState {
	Idle,
	Writing { buffer: Vec<u8>, offset: usize },
}

/// Frame-level reader/writer of one yamux connection.
pub struct Io<T> {
	io: T,
	max_body_len: usize,
	read_state: ReadState,
	header_buf: [u8; HEADER_LEN],
	body_buf: Vec<u8>,
	write_state: WriteState,
}

impl<T> Io<T> {
	pub fn new(io: T, max_body_len: usize) -> Self {
		Io {
			io,
			max_body_len,
			read_state: ReadState::Header { offset: 0 },
			header_buf: [0; HEADER_LEN],
			body_buf: Vec::new(),
			write_state: WriteState::Idle,
		}
	}
}

impl<T: AsyncRead + Unpin> futures::Stream for Io<T> {
	type Item = Result<Frame, FrameDecodeError>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();
		loop {
			match this.read_state {
				ReadState::Header { offset } => {
					let n = ready!(Pin::new(&mut this.io)
						.poll_read(cx, &mut this.header_buf[offset..HEADER_LEN]))
						.map_err(FrameDecodeError::Io)?;
					if n == 0 {
						if offset == 0 {
							// Clean close between frames.
							return Poll::Ready(None);
						}
						return Poll::Ready(Some(Err(FrameDecodeError::Io(
							io::ErrorKind::UnexpectedEof.into(),
						))));
					}
					let offset = offset + n;
					if offset < HEADER_LEN {
						this.read_state = ReadState::Header { offset };
						continue;
					}
					let header = match Header::decode(&this.header_buf) {
						Ok(header) => header,
						Err(e) => return Poll::Ready(Some(Err(e))),
					};
					this.read_state = ReadState::Header { offset: 0 };
					if header.tag == Tag::Data && header.length > 0 {
						let len = header.length as usize;
						if len > this.max_body_len {
							return Poll::Ready(Some(Err(FrameDecodeError::FrameTooLarge(len))));
						}
						this.body_buf.resize(len, 0);
						this.read_state = ReadState::Body { header, offset: 0 };
						continue;
					}
					return Poll::Ready(Some(Ok(Frame { header, body: Vec::new() })));
				}
				ReadState::Body { header, offset } => {
					let len = header.length as usize;
					let n = ready!(
						Pin::new(&mut this.io).poll_read(cx, &mut this.body_buf[offset..len])
					)
					.map_err(FrameDecodeError::Io)?;
					if n == 0 {
						return Poll::Ready(Some(Err(FrameDecodeError::Io(
							io::ErrorKind::UnexpectedEof.into(),
						))));
					}
					let offset = offset + n;
					if offset < len {
						this.read_state = ReadState::Body { header, offset };
						continue;
					}
					this.read_state = ReadState::Header { offset: 0 };
					let body = std::mem::take(&mut this.body_buf);
					return Poll::Ready(Some(Ok(Frame { header, body })));
				}
			}
		}
	}
}

impl<T: AsyncWrite + Unpin> Sink<Frame> for Io<T> {
	type Error = io::Error;

	fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let this = self.get_mut();
		this.poll_write_pending(cx)
	}

	fn start_send(self: Pin<&mut Self>, frame: Frame) -> io::Result<()> {
		let this = self.get_mut();
		debug_assert!(matches!(this.write_state, WriteState::Idle));
		let mut buffer = Vec::with_capacity(HEADER_LEN + frame.body.len());
		buffer.extend_from_slice(&frame.header.encode());
		buffer.extend_from_slice(&frame.body);
		this.write_state = WriteState::Writing { buffer, offset: 0 };
		Ok(())
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let this = self.get_mut();
		ready!(this.poll_write_pending(cx))?;
		Pin::new(&mut this.io).poll_flush(cx)
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let this = self.get_mut();
		ready!(this.poll_write_pending(cx))?;
		Pin::new(&mut this.io).poll_close(cx)
	}
}

impl<T: AsyncWrite + Unpin> Io<T> {
	fn poll_write_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		loop {
			match &mut self.write_state {
				WriteState::Idle => return Poll::Ready(Ok(())),
				WriteState::Writing { buffer, offset } => {
					while *offset < buffer.len() {
						let n =
							ready!(Pin::new(&mut self.io).poll_write(cx, &buffer[*offset..]))?;
						if n == 0 {
							return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
						}
						*offset += n;
					}
					self.write_state = WriteState::Idle;
				}
			}
		}
	}
}
