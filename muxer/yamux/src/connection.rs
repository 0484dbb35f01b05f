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

//! The per-connection multiplexing task.
//!
//! All connection state is owned by [`Connection::run`], which multiplexes
//! four event sources: frames from the socket, commands from [`Control`]
//! handles, commands from [`Stream`] handles and the keepalive timer.
//! Handles communicate with the task over channels only, so no state is
//! touched from outside the task.

use crate::error::YamuxError;
use crate::frame::io::Io;
use crate::frame::{Flags, Frame, GoAwayCode, Header, StreamId, Tag};
use crate::stream::{Shared, State, Stream};
use crate::{Config, DEFAULT_CREDIT};
use fnv::FnvHashMap;
use futures::channel::{mpsc, oneshot};
use futures::prelude::*;
use futures::stream::Fuse;
use futures_timer::Delay;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const LOG_TARGET: &str = "skiff-yamux";

/// Largest DATA body this implementation puts into a single frame.
const MAX_FRAME_BODY_LEN: usize = 64 * 1024;

/// Whether the local side of a connection is the transport initiator.
///
/// The mode decides the stream-id parity: clients allocate odd ids,
/// servers even ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Client,
	Server,
}

/// Random identifier of a connection, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id(u32);

impl std::fmt::Display for Id {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:08x}", self.0)
	}
}

/// Commands sent by [`Stream`] handles to the connection task.
#[derive(Debug)]
pub(crate) enum StreamCommand {
	/// New data sits in the stream's send buffer.
	Flush(StreamId),
	/// Close the write half once the send buffer drains.
	Close(StreamId),
	/// Abort the stream immediately.
	Reset(StreamId),
	/// Grant the remote additional receive credit.
	Credit(StreamId, u32),
	/// The stream handle was dropped.
	Dropped(StreamId),
}

/// Commands sent by [`Control`] handles.
enum ControlCommand {
	OpenStream(oneshot::Sender<Result<Stream, YamuxError>>),
	Close(oneshot::Sender<()>),
}

/// A clonable handle for opening streams and closing the connection.
#[derive(Clone)]
pub struct Control {
	sender: mpsc::UnboundedSender<ControlCommand>,
}

impl Control {
	/// Opens a new outbound stream.
	pub async fn open_stream(&self) -> Result<Stream, YamuxError> {
		let (reply, rx) = oneshot::channel();
		self.sender
			.unbounded_send(ControlCommand::OpenStream(reply))
			.map_err(|_| YamuxError::ConnectionStopped)?;
		rx.await.map_err(|_| YamuxError::ConnectionStopped)?
	}

	/// Closes the connection gracefully: GO_AWAY is sent, existing streams
	/// drain, and the call returns once the connection task has finished.
	pub async fn close(&self) -> Result<(), YamuxError> {
		let (reply, rx) = oneshot::channel();
		if self.sender.unbounded_send(ControlCommand::Close(reply)).is_err() {
			// Already stopped.
			return Ok(());
		}
		let _ = rx.await;
		Ok(())
	}
}

/// The stream of inbound streams accepted from the remote.
pub struct IncomingStreams {
	receiver: mpsc::UnboundedReceiver<Stream>,
}

impl futures::Stream for IncomingStreams {
	type Item = Stream;

	fn poll_next(
		mut self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<Option<Stream>> {
		std::pin::Pin::new(&mut self.receiver).poll_next(cx)
	}
}

/// A yamux connection over the byte stream `T`.
pub struct Connection<T> {
	id: Id,
	mode: Mode,
	config: Config,
	socket: Fuse<Io<T>>,
	control_tx: mpsc::UnboundedSender<ControlCommand>,
	control_rx: mpsc::UnboundedReceiver<ControlCommand>,
	stream_tx: mpsc::UnboundedSender<StreamCommand>,
	stream_rx: mpsc::UnboundedReceiver<StreamCommand>,
	incoming_tx: mpsc::UnboundedSender<Stream>,
	incoming_rx: Option<IncomingStreams>,
	streams: FnvHashMap<StreamId, Arc<Mutex<Shared>>>,
	buffered_total: Arc<AtomicUsize>,
	next_stream_id: u32,
	last_remote_id: u32,
	local_go_away: bool,
	remote_go_away: bool,
	shutdown_requested: bool,
	close_replies: Vec<oneshot::Sender<()>>,
	ping_timer: Delay,
	ping_nonce: u32,
	pings_outstanding: u32,
}

impl<T> Connection<T>
where
	T: AsyncRead + AsyncWrite + Unpin,
{
	/// Wraps `socket` into a yamux connection.
	///
	/// Nothing happens until [`Connection::run`] is polled; callers are
	/// expected to spawn it.
	pub fn new(socket: T, config: Config, mode: Mode) -> Self {
		let id = Id(rand::random());
		let (control_tx, control_rx) = mpsc::unbounded();
		let (stream_tx, stream_rx) = mpsc::unbounded();
		let (incoming_tx, incoming_rx) = mpsc::unbounded();
		let max_read_frame = std::cmp::max(config.receive_window as usize, MAX_FRAME_BODY_LEN);
		let ping_interval = config.ping_interval;
		debug!(target: LOG_TARGET, "{}: new {:?} connection", id, mode);
		Connection {
			id,
			mode,
			config,
			socket: Io::new(socket, max_read_frame).fuse(),
			control_tx,
			control_rx,
			stream_tx,
			stream_rx,
			incoming_tx,
			incoming_rx: Some(IncomingStreams { receiver: incoming_rx }),
			streams: FnvHashMap::default(),
			buffered_total: Arc::new(AtomicUsize::new(0)),
			next_stream_id: match mode {
				Mode::Client => 1,
				Mode::Server => 2,
			},
			last_remote_id: 0,
			local_go_away: false,
			remote_go_away: false,
			shutdown_requested: false,
			close_replies: Vec::new(),
			ping_timer: Delay::new(ping_interval),
			ping_nonce: 0,
			pings_outstanding: 0,
		}
	}

	/// The connection's log identifier.
	pub fn id(&self) -> Id {
		self.id
	}

	/// A control handle for this connection.
	pub fn control(&self) -> Control {
		Control { sender: self.control_tx.clone() }
	}

	/// Takes the stream of inbound streams. May be called once.
	pub fn take_incoming(&mut self) -> Option<IncomingStreams> {
		self.incoming_rx.take()
	}

	/// Drives the connection until it terminates.
	///
	/// On return, all live streams have been failed and the socket closed.
	pub async fn run(mut self) -> Result<(), YamuxError> {
		let result = self.run_inner().await;
		let reason = match &result {
			Ok(()) => YamuxError::ConnectionClosedByHost.code(),
			Err(e) => e.code(),
		};
		for shared in self.streams.values() {
			shared.lock().abort(reason);
		}
		self.streams.clear();
		let _ = self.socket.close().await;
		for reply in self.close_replies.drain(..) {
			let _ = reply.send(());
		}
		match &result {
			Ok(()) => debug!(target: LOG_TARGET, "{}: connection closed", self.id),
			Err(e) => debug!(target: LOG_TARGET, "{}: connection failed: {}", self.id, e),
		}
		result
	}

	async fn run_inner(&mut self) -> Result<(), YamuxError> {
		loop {
			if self.streams.is_empty() && (self.shutdown_requested || self.remote_go_away) {
				return Ok(());
			}
			futures::select! {
				frame = self.socket.next() => match frame {
					Some(frame) => self.on_frame(frame?).await?,
					None => return Err(YamuxError::ConnectionClosedByPeer),
				},
				command = self.control_rx.select_next_some() => {
					self.on_control_command(command).await?
				}
				command = self.stream_rx.select_next_some() => {
					self.on_stream_command(command).await?
				}
				_ = (&mut self.ping_timer).fuse() => self.on_ping_interval().await?,
			}
		}
	}

	async fn send(&mut self, frame: Frame) -> Result<(), YamuxError> {
		trace!(
			target: LOG_TARGET,
			"{}: sending {:?} id={} flags={:?} len={}",
			self.id,
			frame.header.tag,
			frame.header.stream_id,
			frame.header.flags,
			frame.header.length,
		);
		self.socket.send(frame).await?;
		Ok(())
	}

	fn is_valid_remote_id(&self, id: StreamId) -> bool {
		match self.mode {
			// We are the client, so remote ids are even.
			Mode::Client => id != 0 && id % 2 == 0,
			Mode::Server => id % 2 == 1,
		}
	}

	async fn on_frame(&mut self, frame: Frame) -> Result<(), YamuxError> {
		trace!(
			target: LOG_TARGET,
			"{}: received {:?} id={} flags={:?} len={}",
			self.id,
			frame.header.tag,
			frame.header.stream_id,
			frame.header.flags,
			frame.header.length,
		);
		match frame.header.tag {
			Tag::Data | Tag::WindowUpdate => self.on_stream_frame(frame).await,
			Tag::Ping => self.on_ping(frame.header).await,
			Tag::GoAway => {
				self.on_go_away(frame.header);
				Ok(())
			}
		}
	}

	async fn on_stream_frame(&mut self, frame: Frame) -> Result<(), YamuxError> {
		let header = frame.header;
		let id = header.stream_id;

		if header.flags.contains(Flags::RST) {
			if let Some(shared) = self.streams.remove(&id) {
				shared.lock().abort(YamuxError::StreamResetByPeer.code());
				debug!(target: LOG_TARGET, "{}: stream {} reset by peer", self.id, id);
			}
			return Ok(());
		}

		if header.flags.contains(Flags::SYN) {
			self.on_inbound_syn(id).await?;
		}

		let shared = match self.streams.get(&id) {
			Some(shared) => shared.clone(),
			None => {
				// Data for an unknown stream: most likely a stream we reset
				// recently. Discard.
				debug!(target: LOG_TARGET, "{}: frame for unknown stream {}", self.id, id);
				return Ok(());
			}
		};

		let mut credit_overflow = false;
		let mut window_overflow = false;
		{
			let mut shared = shared.lock();
			shared.on_peer_frame();
			match header.tag {
				Tag::Data => {
					let len = frame.body.len() as u32;
					if len > shared.recv_window {
						window_overflow = true;
					} else {
						shared.recv_window -= len;
						shared.read_buffer.extend(frame.body.iter().copied());
						if let Some(waker) = shared.reader_waker.take() {
							waker.wake();
						}
					}
				}
				Tag::WindowUpdate => {
					match shared.send_window.checked_add(header.length) {
						Some(window) => shared.send_window = window,
						None => credit_overflow = true,
					}
				}
				_ => {}
			}
			if !window_overflow && !credit_overflow && header.flags.contains(Flags::FIN) {
				shared.on_remote_fin();
				shared.wake_all();
			}
		}

		if window_overflow {
			warn!(target: LOG_TARGET, "{}: stream {} exceeded its receive window", self.id, id);
			let _ = self.send(Frame::go_away(GoAwayCode::ProtocolError)).await;
			return Err(YamuxError::ReceiveWindowOverflow);
		}
		if credit_overflow {
			warn!(target: LOG_TARGET, "{}: stream {} window credit overflow", self.id, id);
			let _ = self.send(Frame::go_away(GoAwayCode::ProtocolError)).await;
			return Err(YamuxError::InvalidWindowSize);
		}

		// A window update may have unblocked buffered writes.
		if header.tag == Tag::WindowUpdate {
			self.drain_stream(id).await?;
		}
		self.gc_stream(id);
		Ok(())
	}

	async fn on_inbound_syn(&mut self, id: StreamId) -> Result<(), YamuxError> {
		if !self.is_valid_remote_id(id) || id <= self.last_remote_id {
			warn!(target: LOG_TARGET, "{}: invalid remote stream id {}", self.id, id);
			let _ = self.send(Frame::go_away(GoAwayCode::ProtocolError)).await;
			return Err(YamuxError::ProtocolError);
		}
		self.last_remote_id = id;

		if self.local_go_away {
			// We said no new streams.
			return self.send(Frame::reset(id)).await;
		}
		if self.streams.len() >= self.config.max_num_streams {
			warn!(
				target: LOG_TARGET,
				"{}: maximum number of streams ({}) reached",
				self.id,
				self.config.max_num_streams,
			);
			return self.send(Frame::reset(id)).await;
		}

		let shared = Arc::new(Mutex::new(Shared::new(
			State::SynReceived,
			DEFAULT_CREDIT,
			self.config.receive_window,
			self.config.max_buffer_size,
			self.buffered_total.clone(),
		)));
		self.streams.insert(id, shared.clone());
		let stream = Stream::new(id, shared, self.stream_tx.clone());
		debug!(target: LOG_TARGET, "{}: new inbound stream {}", self.id, id);

		if self.incoming_tx.unbounded_send(stream).is_err() {
			// Nobody accepts inbound streams on this connection.
			self.streams.remove(&id);
			return self.send(Frame::reset(id)).await;
		}

		// Advertise a receive window larger than the protocol default
		// right away, so the sender can use it.
		if self.config.receive_window > DEFAULT_CREDIT {
			let credit = self.config.receive_window - DEFAULT_CREDIT;
			self.send_with_ack(id, Frame::window_update(id, Flags::empty(), credit)).await?;
		}
		Ok(())
	}

	async fn on_ping(&mut self, header: Header) -> Result<(), YamuxError> {
		if header.flags.contains(Flags::SYN) {
			return self.send(Frame::ping(Flags::ACK, header.length)).await;
		}
		if header.flags.contains(Flags::ACK) && header.length == self.ping_nonce {
			self.pings_outstanding = 0;
		}
		Ok(())
	}

	fn on_go_away(&mut self, header: Header) {
		debug!(target: LOG_TARGET, "{}: remote sent GO_AWAY (code {})", self.id, header.length);
		self.remote_go_away = true;
	}

	async fn on_ping_interval(&mut self) -> Result<(), YamuxError> {
		self.ping_timer.reset(self.config.ping_interval);
		if !self.config.enable_keepalive {
			return Ok(());
		}
		if self.pings_outstanding >= self.config.max_failed_pings {
			warn!(target: LOG_TARGET, "{}: keepalive failed, closing", self.id);
			return Err(YamuxError::ConnectionStopped);
		}
		self.ping_nonce = rand::random();
		self.pings_outstanding += 1;
		self.send(Frame::ping(Flags::SYN, self.ping_nonce)).await
	}

	async fn on_control_command(&mut self, command: ControlCommand) -> Result<(), YamuxError> {
		match command {
			ControlCommand::OpenStream(reply) => {
				let result = self.open_stream().await;
				let _ = reply.send(result);
			}
			ControlCommand::Close(reply) => {
				self.close_replies.push(reply);
				self.shutdown_requested = true;
				if !self.local_go_away {
					self.local_go_away = true;
					self.send(Frame::go_away(GoAwayCode::Normal)).await?;
				}
			}
		}
		Ok(())
	}

	async fn open_stream(&mut self) -> Result<Stream, YamuxError> {
		if self.local_go_away {
			return Err(YamuxError::ConnectionClosedByHost);
		}
		if self.remote_go_away {
			return Err(YamuxError::ConnectionClosedByPeer);
		}
		if self.streams.len() >= self.config.max_num_streams {
			return Err(YamuxError::TooManyStreams);
		}
		let id = self.next_stream_id;
		self.next_stream_id = self
			.next_stream_id
			.checked_add(2)
			.ok_or(YamuxError::InternalError)?;

		let shared = Arc::new(Mutex::new(Shared::new(
			State::SynSent,
			DEFAULT_CREDIT,
			self.config.receive_window,
			self.config.max_buffer_size,
			self.buffered_total.clone(),
		)));
		self.streams.insert(id, shared.clone());

		// Announce the stream; any extra receive window is advertised in
		// the same frame.
		let credit = self.config.receive_window.saturating_sub(DEFAULT_CREDIT);
		self.send(Frame::window_update(id, Flags::SYN, credit)).await?;
		debug!(target: LOG_TARGET, "{}: new outbound stream {}", self.id, id);
		Ok(Stream::new(id, shared, self.stream_tx.clone()))
	}

	async fn on_stream_command(&mut self, command: StreamCommand) -> Result<(), YamuxError> {
		let command_stream = command_id(&command);
		match command {
			StreamCommand::Flush(id) => self.drain_stream(id).await?,
			StreamCommand::Close(id) => self.drain_stream(id).await?,
			StreamCommand::Credit(id, credit) => {
				if self.streams.contains_key(&id) {
					self.send_with_ack(id, Frame::window_update(id, Flags::empty(), credit))
						.await?;
				}
			}
			StreamCommand::Reset(id) => {
				if let Some(shared) = self.streams.remove(&id) {
					shared.lock().abort(YamuxError::StreamResetByHost.code());
					self.send(Frame::reset(id)).await?;
					debug!(target: LOG_TARGET, "{}: stream {} reset by host", self.id, id);
				}
			}
			StreamCommand::Dropped(id) => {
				let reset = match self.streams.get(&id) {
					Some(shared) => {
						let shared = shared.lock();
						!matches!(shared.state, State::Closed | State::Reset)
					}
					None => false,
				};
				if reset {
					if let Some(shared) = self.streams.remove(&id) {
						shared.lock().abort(YamuxError::StreamResetByHost.code());
					}
					self.send(Frame::reset(id)).await?;
					debug!(target: LOG_TARGET, "{}: dropped stream {} reset", self.id, id);
				} else {
					self.streams.remove(&id);
				}
			}
		}
		self.gc_stream(command_stream);
		Ok(())
	}

	/// Moves as much buffered data as the send window allows onto the wire,
	/// appending FIN when a requested close drains the buffer.
	async fn drain_stream(&mut self, id: StreamId) -> Result<(), YamuxError> {
		let shared = match self.streams.get(&id) {
			Some(shared) => shared.clone(),
			None => return Ok(()),
		};

		loop {
			let (frame, done) = {
				let mut shared = shared.lock();
				if !shared.state.can_write() {
					(None, true)
				} else if shared.send_buffer.is_empty() || shared.send_window == 0 {
					// Nothing to send, or out of credit: maybe finish with
					// a FIN.
					let fin_due = shared.fin_requested
						&& !shared.fin_sent
						&& shared.send_buffer.is_empty();
					if fin_due {
						shared.on_local_fin();
						let flags = self.take_flags(&mut shared, Flags::FIN);
						(Some(Frame::data(id, flags, Vec::new())), true)
					} else {
						(None, true)
					}
				} else {
					let len = shared
						.send_buffer
						.len()
						.min(shared.send_window as usize)
						.min(MAX_FRAME_BODY_LEN);
					let body: Vec<u8> = shared.send_buffer.drain(..len).collect();
					shared.send_window -= len as u32;
					shared.buffered_total.fetch_sub(len, Ordering::Relaxed);
					let mut flags = self.take_flags(&mut shared, Flags::empty());
					let fin_due = shared.fin_requested
						&& !shared.fin_sent
						&& shared.send_buffer.is_empty();
					if fin_due {
						flags |= Flags::FIN;
						shared.on_local_fin();
					}
					if shared.send_buffer.is_empty() {
						shared.wake_all();
					}
					(Some(Frame::data(id, flags, body)), fin_due)
				}
			};

			if let Some(frame) = frame {
				self.send(frame).await?;
			}
			if done {
				break;
			}
		}
		shared.lock().wake_all();
		self.gc_stream(id);
		Ok(())
	}

	/// Folds a pending SYN acknowledgement into the flags of the next frame.
	/// Sending the acknowledgement establishes the stream.
	fn take_flags(&self, shared: &mut Shared, mut flags: Flags) -> Flags {
		if shared.ack_pending {
			shared.ack_pending = false;
			flags |= Flags::ACK;
			if shared.state == State::SynReceived {
				shared.state = State::Established;
			}
		}
		flags
	}

	async fn send_with_ack(&mut self, id: StreamId, mut frame: Frame) -> Result<(), YamuxError> {
		if let Some(shared) = self.streams.get(&id) {
			let mut shared = shared.lock();
			if shared.ack_pending {
				shared.ack_pending = false;
				frame.header.flags |= Flags::ACK;
				if shared.state == State::SynReceived {
					shared.state = State::Established;
				}
			}
		}
		self.send(frame).await
	}

	/// Forgets streams that have reached a terminal state.
	fn gc_stream(&mut self, id: StreamId) {
		let remove = match self.streams.get(&id) {
			Some(shared) => {
				let shared = shared.lock();
				matches!(shared.state, State::Closed | State::Reset)
			}
			None => false,
		};
		if remove {
			trace!(target: LOG_TARGET, "{}: releasing stream {}", self.id, id);
			self.streams.remove(&id);
		}
	}
}

fn command_id(command: &StreamCommand) -> StreamId {
	match command {
		StreamCommand::Flush(id)
		| StreamCommand::Close(id)
		| StreamCommand::Reset(id)
		| StreamCommand::Credit(id, _)
		| StreamCommand::Dropped(id) => *id,
	}
}
