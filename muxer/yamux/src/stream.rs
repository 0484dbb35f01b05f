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

//! A single multiplexed stream.

use crate::connection::StreamCommand;
use crate::error::YamuxError;
use crate::frame::StreamId;
use futures::channel::mpsc;
use futures::prelude::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Lifecycle of a stream.
///
/// `Idle` is never materialized: a stream object only exists once its SYN
/// has been sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	/// We sent SYN and await the peer's first frame.
	SynSent,
	/// The peer sent SYN; our acknowledgement is pending.
	SynReceived,
	/// Both directions open.
	Established,
	/// We sent FIN; the peer may still send.
	HalfClosedLocal,
	/// The peer sent FIN; we may still send.
	HalfClosedRemote,
	/// Both directions closed.
	Closed,
	/// Aborted, by either side or by connection failure.
	Reset,
}

impl State {
	/// Whether the local side may still send data.
	pub fn can_write(self) -> bool {
		matches!(
			self,
			State::SynSent | State::SynReceived | State::Established | State::HalfClosedRemote
		)
	}

	/// Whether more data from the remote may still arrive.
	pub fn can_receive(self) -> bool {
		matches!(
			self,
			State::SynSent | State::SynReceived | State::Established | State::HalfClosedLocal
		)
	}
}

/// State shared between a [`Stream`] handle and its connection task.
pub(crate) struct Shared {
	pub(crate) state: State,
	/// Why the stream died, when it died abnormally.
	pub(crate) failure: Option<u32>,
	/// Data received but not yet read by the application.
	pub(crate) read_buffer: VecDeque<u8>,
	/// Data written by the application but not yet put on the wire.
	pub(crate) send_buffer: VecDeque<u8>,
	/// Credit granted by the remote: bytes we may still send.
	pub(crate) send_window: u32,
	/// Credit we granted the remote: bytes it may still send.
	pub(crate) recv_window: u32,
	/// Bytes consumed by the reader since the last credit was granted.
	pub(crate) consumed: u32,
	/// The receive window to maintain, from the connection config.
	pub(crate) window: u32,
	/// Aggregate send-buffer bound, from the connection config.
	pub(crate) max_buffer: usize,
	/// An inbound stream acknowledges the SYN with its first frame.
	pub(crate) ack_pending: bool,
	/// `close` was called; FIN goes out once the send buffer drains.
	pub(crate) fin_requested: bool,
	/// FIN has been put on the wire.
	pub(crate) fin_sent: bool,
	pub(crate) reader_waker: Option<Waker>,
	pub(crate) writer_wakers: Vec<Waker>,
	/// Aggregate send-buffer fill across all streams of the connection.
	pub(crate) buffered_total: Arc<AtomicUsize>,
}

impl Shared {
	pub(crate) fn new(
		state: State,
		send_window: u32,
		window: u32,
		max_buffer: usize,
		buffered_total: Arc<AtomicUsize>,
	) -> Self {
		Shared {
			state,
			failure: None,
			read_buffer: VecDeque::new(),
			send_buffer: VecDeque::new(),
			send_window,
			recv_window: window,
			consumed: 0,
			window,
			max_buffer,
			ack_pending: state == State::SynReceived,
			fin_requested: false,
			fin_sent: false,
			reader_waker: None,
			writer_wakers: Vec::new(),
			buffered_total,
		}
	}

	pub(crate) fn wake_all(&mut self) {
		if let Some(waker) = self.reader_waker.take() {
			waker.wake();
		}
		for waker in self.writer_wakers.drain(..) {
			waker.wake();
		}
	}

	/// Marks the local write half closed, collapsing to `Closed` when the
	/// remote half is closed too.
	pub(crate) fn on_local_fin(&mut self) {
		self.fin_sent = true;
		self.state = match self.state {
			State::HalfClosedRemote => State::Closed,
			State::Closed | State::Reset => self.state,
			_ => State::HalfClosedLocal,
		};
	}

	/// Marks the remote write half closed.
	pub(crate) fn on_remote_fin(&mut self) {
		self.state = match self.state {
			State::HalfClosedLocal => State::Closed,
			State::Closed | State::Reset => self.state,
			_ => State::HalfClosedRemote,
		};
	}

	/// Any non-RST frame from the peer acknowledges an outbound stream.
	pub(crate) fn on_peer_frame(&mut self) {
		if self.state == State::SynSent {
			self.state = State::Established;
		}
	}

	pub(crate) fn abort(&mut self, reason: u32) {
		if !matches!(self.state, State::Closed | State::Reset) {
			self.state = State::Reset;
		}
		if self.failure.is_none() {
			self.failure = Some(reason);
		}
		self.buffered_total.fetch_sub(self.send_buffer.len(), Ordering::Relaxed);
		self.send_buffer.clear();
		self.wake_all();
	}
}

fn reset_error(failure: Option<u32>) -> io::Error {
	let message = match failure {
		Some(code) if code == YamuxError::ConnectionClosedByPeer.code() => {
			"connection closed by peer"
		}
		Some(code) if code == YamuxError::ConnectionClosedByHost.code() => {
			"connection closed by host"
		}
		Some(code) if code == YamuxError::StreamResetByHost.code() => "stream reset by host",
		_ => "stream reset by peer",
	};
	io::Error::new(io::ErrorKind::ConnectionReset, message)
}

/// A bidirectional sub-channel of a multiplexed connection.
///
/// Reading and writing have independent half-close states: `poll_close`
/// closes only the write half (FIN), [`Stream::reset`] aborts both.
/// Dropping a stream that is not fully closed resets it.
pub struct Stream {
	id: StreamId,
	shared: Arc<Mutex<Shared>>,
	sender: mpsc::UnboundedSender<StreamCommand>,
}

impl Stream {
	pub(crate) fn new(
		id: StreamId,
		shared: Arc<Mutex<Shared>>,
		sender: mpsc::UnboundedSender<StreamCommand>,
	) -> Self {
		Stream { id, shared, sender }
	}

	/// The stream id within its connection.
	pub fn id(&self) -> StreamId {
		self.id
	}

	/// Current lifecycle state.
	pub fn state(&self) -> State {
		self.shared.lock().state
	}

	/// Aborts the stream in both directions. Pending reads and writes on
	/// the other side fail with a reset error.
	pub fn reset(&mut self) {
		let _ = self.sender.unbounded_send(StreamCommand::Reset(self.id));
		let mut shared = self.shared.lock();
		shared.abort(YamuxError::StreamResetByHost.code());
	}
}

impl std::fmt::Debug for Stream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Stream")
			.field("id", &self.id)
			.field("state", &self.state())
			.finish()
	}
}

impl AsyncRead for Stream {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		let mut credit = None;
		let result = {
			let mut shared = self.shared.lock();
			if !shared.read_buffer.is_empty() {
				let n = {
					let (front, _) = shared.read_buffer.as_slices();
					let n = std::cmp::min(buf.len(), front.len());
					buf[..n].copy_from_slice(&front[..n]);
					n
				};
				shared.read_buffer.drain(..n);
				shared.consumed += n as u32;
				// Grant the remote more credit once half the window has
				// been consumed.
				if shared.consumed >= shared.window / 2 && shared.state.can_receive() {
					let grant = shared.consumed;
					shared.consumed = 0;
					shared.recv_window += grant;
					credit = Some(grant);
				}
				Poll::Ready(Ok(n))
			} else {
				match shared.state {
					State::Reset => Poll::Ready(Err(reset_error(shared.failure))),
					State::HalfClosedRemote | State::Closed => Poll::Ready(Ok(0)),
					_ => {
						shared.reader_waker = Some(cx.waker().clone());
						Poll::Pending
					}
				}
			}
		};
		if let Some(grant) = credit {
			let _ = self.sender.unbounded_send(StreamCommand::Credit(self.id, grant));
		}
		result
	}
}

impl AsyncWrite for Stream {
	fn poll_write(
		self: Pin<&mut Self>,
		_cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		{
			let mut shared = self.shared.lock();
			if shared.state == State::Reset {
				return Poll::Ready(Err(reset_error(shared.failure)));
			}
			if !shared.state.can_write() || shared.fin_requested {
				return Poll::Ready(Err(io::Error::new(
					io::ErrorKind::NotConnected,
					YamuxError::StreamNotWritable.to_string(),
				)));
			}
			let buffered = shared.buffered_total.load(Ordering::Relaxed);
			if buffered + buf.len() > shared.max_buffer {
				return Poll::Ready(Err(io::Error::new(
					io::ErrorKind::Other,
					YamuxError::WriteBufferOverflow.to_string(),
				)));
			}
			shared.send_buffer.extend(buf);
			shared.buffered_total.fetch_add(buf.len(), Ordering::Relaxed);
		}
		if self.sender.unbounded_send(StreamCommand::Flush(self.id)).is_err() {
			return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
		}
		Poll::Ready(Ok(buf.len()))
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let mut shared = self.shared.lock();
		if shared.state == State::Reset {
			return Poll::Ready(Err(reset_error(shared.failure)));
		}
		if shared.send_buffer.is_empty() {
			return Poll::Ready(Ok(()));
		}
		shared.writer_wakers.push(cx.waker().clone());
		Poll::Pending
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let first_request = {
			let mut shared = self.shared.lock();
			// Close on an already-terminated stream is a no-op.
			if matches!(shared.state, State::Closed | State::Reset) {
				return Poll::Ready(Ok(()));
			}
			if shared.fin_sent && shared.send_buffer.is_empty() {
				return Poll::Ready(Ok(()));
			}
			let first_request = !shared.fin_requested;
			shared.fin_requested = true;
			shared.writer_wakers.push(cx.waker().clone());
			first_request
		};
		if first_request && self.sender.unbounded_send(StreamCommand::Close(self.id)).is_err() {
			return Poll::Ready(Ok(()));
		}
		Poll::Pending
	}
}

impl Drop for Stream {
	fn drop(&mut self) {
		let _ = self.sender.unbounded_send(StreamCommand::Dropped(self.id));
	}
}
