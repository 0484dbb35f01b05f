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

//! The yamux stream multiplexer.
//!
//! Yamux runs any number of independent bidirectional streams over a single
//! reliable byte stream. Frames of the different streams interleave on the
//! wire; per-stream flow control keeps a fast sender from overwhelming a
//! slow reader, and periodic pings detect dead peers.

pub mod connection;
pub mod error;
pub mod frame;
pub mod stream;

pub use connection::{Connection, Control, Id, IncomingStreams, Mode};
pub use error::{FrameDecodeError, YamuxError};
pub use frame::{Flags, Frame, GoAwayCode, Header, StreamId, Tag};
pub use stream::{State, Stream};

use skiff_core::ProtocolName;
use std::time::Duration;

/// The protocol name under which this muxer is negotiated.
pub const PROTOCOL_NAME: &str = "/yamux/1.0.0";

/// The initial per-stream receive window mandated by the protocol.
pub const DEFAULT_CREDIT: u32 = 256 * 1024;

/// Yamux configuration.
///
/// Defaults: 256 KiB receive window, 48 MiB aggregate send buffer,
/// 1000 concurrent streams, 30 s keepalive with 2 tolerated misses.
#[derive(Debug, Clone)]
pub struct Config {
	receive_window: u32,
	max_buffer_size: usize,
	max_num_streams: usize,
	ping_interval: Duration,
	max_failed_pings: u32,
	enable_keepalive: bool,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			receive_window: DEFAULT_CREDIT,
			max_buffer_size: 48 * 1024 * 1024,
			max_num_streams: 1000,
			ping_interval: Duration::from_secs(30),
			max_failed_pings: 2,
			enable_keepalive: true,
		}
	}
}

impl Config {
	pub fn new() -> Self {
		Config::default()
	}

	/// Sets the per-stream receive window.
	///
	/// # Panics
	///
	/// If `n` is below the protocol's initial window of 256 KiB.
	pub fn set_receive_window(&mut self, n: u32) -> &mut Self {
		assert!(n >= DEFAULT_CREDIT);
		self.receive_window = n;
		self
	}

	/// Sets the aggregate send-buffer bound of a connection.
	pub fn set_max_buffer_size(&mut self, n: usize) -> &mut Self {
		self.max_buffer_size = n;
		self
	}

	/// Sets the maximum number of concurrently live streams.
	pub fn set_max_num_streams(&mut self, n: usize) -> &mut Self {
		self.max_num_streams = n;
		self
	}

	/// Sets the keepalive ping interval.
	pub fn set_ping_interval(&mut self, interval: Duration) -> &mut Self {
		self.ping_interval = interval;
		self
	}

	/// Sets how many unanswered pings fail the connection.
	pub fn set_max_failed_pings(&mut self, n: u32) -> &mut Self {
		self.max_failed_pings = n;
		self
	}

	/// Enables or disables keepalive pings.
	pub fn set_keepalive(&mut self, enabled: bool) -> &mut Self {
		self.enable_keepalive = enabled;
		self
	}

	/// The multistream-select name of this muxer.
	pub fn protocol_name(&self) -> ProtocolName {
		ProtocolName::from(PROTOCOL_NAME)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;
	use futures::prelude::*;
	use skiff_core::pipe::{pipe, PipeEnd};
	use std::time::Duration;

	fn connected(
		client_config: Config,
		server_config: Config,
	) -> (Control, IncomingStreams, Control, IncomingStreams) {
		let (a, b) = pipe();
		let mut client = Connection::new(a, client_config, Mode::Client);
		let mut server = Connection::new(b, server_config, Mode::Server);
		let client_control = client.control();
		let server_control = server.control();
		let client_incoming = client.take_incoming().unwrap();
		let server_incoming = server.take_incoming().unwrap();
		async_std::task::spawn(async move {
			let _ = client.run().await;
		});
		async_std::task::spawn(async move {
			let _ = server.run().await;
		});
		(client_control, client_incoming, server_control, server_incoming)
	}

	fn quiet_config() -> Config {
		let mut config = Config::new();
		config.set_keepalive(false);
		config
	}

	#[test]
	fn client_ids_odd_server_ids_even() {
		async_std::task::block_on(async {
			let (client, _ci, server, _si) = connected(quiet_config(), quiet_config());
			let s1 = client.open_stream().await.unwrap();
			let s3 = client.open_stream().await.unwrap();
			let s2 = server.open_stream().await.unwrap();
			let s4 = server.open_stream().await.unwrap();
			assert_eq!(s1.id(), 1);
			assert_eq!(s3.id(), 3);
			assert_eq!(s2.id(), 2);
			assert_eq!(s4.id(), 4);
		});
	}

	#[test]
	fn echo_over_one_stream() {
		async_std::task::block_on(async {
			let (client, _ci, _server, mut server_incoming) =
				connected(quiet_config(), quiet_config());

			let echo = async_std::task::spawn(async move {
				let mut stream = server_incoming.next().await.unwrap();
				let mut buf = Vec::new();
				stream.read_to_end(&mut buf).await.unwrap();
				stream.write_all(&buf).await.unwrap();
				stream.close().await.unwrap();
				assert_eq!(stream.state(), State::Closed);
			});

			let mut stream = client.open_stream().await.unwrap();
			stream.write_all(b"hello").await.unwrap();
			stream.close().await.unwrap();
			let mut reply = Vec::new();
			stream.read_to_end(&mut reply).await.unwrap();
			assert_eq!(reply, b"hello");
			assert_eq!(stream.state(), State::Closed);
			echo.await;
		});
	}

	#[test]
	fn half_close_keeps_reads_working() {
		async_std::task::block_on(async {
			let (client, _ci, _server, mut server_incoming) =
				connected(quiet_config(), quiet_config());

			let server_side = async_std::task::spawn(async move {
				let mut stream = server_incoming.next().await.unwrap();
				let mut buf = [0u8; 4];
				stream.read_exact(&mut buf).await.unwrap();
				assert_eq!(&buf, b"ping");
				// Our peer has closed its write half by now; sending to it
				// still works.
				stream.write_all(b"pong after fin").await.unwrap();
				stream.close().await.unwrap();
			});

			let mut stream = client.open_stream().await.unwrap();
			stream.write_all(b"ping").await.unwrap();
			stream.close().await.unwrap();
			assert_eq!(stream.state(), State::HalfClosedLocal);
			// Writes fail after local FIN.
			assert!(stream.write_all(b"nope").await.is_err());
			// Reads still complete until the remote FIN.
			let mut reply = Vec::new();
			stream.read_to_end(&mut reply).await.unwrap();
			assert_eq!(reply, b"pong after fin");
			server_side.await;
			assert_eq!(stream.state(), State::Closed);
		});
	}

	#[test]
	fn reset_aborts_both_halves() {
		async_std::task::block_on(async {
			let (client, _ci, _server, mut server_incoming) =
				connected(quiet_config(), quiet_config());

			let mut stream = client.open_stream().await.unwrap();
			stream.write_all(b"x").await.unwrap();
			let mut remote = server_incoming.next().await.unwrap();
			let mut buf = [0u8; 1];
			remote.read_exact(&mut buf).await.unwrap();

			stream.reset();
			assert_eq!(stream.state(), State::Reset);
			// The peer observes the reset on its next read.
			let err = remote.read_exact(&mut buf).await.unwrap_err();
			assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
			// And local operations fail too.
			assert!(stream.write_all(b"y").await.is_err());
		});
	}

	#[test]
	fn large_transfer_with_flow_control() {
		async_std::task::block_on(async {
			let (client, _ci, _server, mut server_incoming) =
				connected(quiet_config(), quiet_config());

			// Four windows' worth of data: completion requires the window
			// to be credited back repeatedly.
			let total = 4 * DEFAULT_CREDIT as usize;
			let payload: Vec<u8> = (0..total).map(|i| (i % 241) as u8).collect();
			let expected = payload.clone();

			let mut stream = client.open_stream().await.unwrap();
			let writer = async_std::task::spawn(async move {
				stream.write_all(&payload).await.unwrap();
				stream.close().await.unwrap();
			});

			let mut remote = server_incoming.next().await.unwrap();
			let mut received = Vec::new();
			remote.read_to_end(&mut received).await.unwrap();
			assert_eq!(received.len(), expected.len());
			assert_eq!(received, expected);
			writer.await;
		});
	}

	/// Drives a connection against a scripted bare-frame peer and checks
	/// that no DATA crosses the wire beyond the granted window.
	#[test]
	fn sender_never_exceeds_window() {
		use crate::frame::io::Io;
		use futures::future::{self, Either};
		use futures::pin_mut;
		use futures_timer::Delay;

		async fn read_data_until_silent(io: &mut Io<PipeEnd>) -> usize {
			let mut received = 0usize;
			loop {
				let next = io.next().fuse();
				let timeout = Delay::new(Duration::from_millis(150)).fuse();
				pin_mut!(next, timeout);
				match future::select(next, timeout).await {
					Either::Left((Some(Ok(frame)), _)) => {
						if frame.header.tag == Tag::Data {
							received += frame.body.len();
						}
					}
					Either::Left(_) => panic!("peer closed unexpectedly"),
					// Silence: the sender is out of credit.
					Either::Right(_) => return received,
				}
			}
		}

		async_std::task::block_on(async {
			let (a, b) = pipe();
			let connection = Connection::new(a, quiet_config(), Mode::Client);
			let control = connection.control();
			async_std::task::spawn(async move {
				let _ = connection.run().await;
			});
			let mut wire = Io::new(b, 1 << 20);

			let mut stream = control.open_stream().await.unwrap();
			// The stream announcement frame.
			let syn = wire.next().await.unwrap().unwrap();
			assert_eq!(syn.header.tag, Tag::WindowUpdate);
			assert!(syn.header.flags.contains(Flags::SYN));

			let writer = async_std::task::spawn(async move {
				let payload = vec![1u8; 2 * DEFAULT_CREDIT as usize];
				stream.write_all(&payload).await.unwrap();
				stream
			});

			// Exactly one window arrives, then the sender stalls.
			let received = read_data_until_silent(&mut wire).await;
			assert_eq!(received, DEFAULT_CREDIT as usize);

			// Credit half a window; exactly that much more arrives.
			wire.send(Frame::window_update(1, Flags::empty(), DEFAULT_CREDIT / 2))
				.await
				.unwrap();
			let received = read_data_until_silent(&mut wire).await;
			assert_eq!(received, DEFAULT_CREDIT as usize / 2);

			// Credit the rest.
			wire.send(Frame::window_update(1, Flags::empty(), DEFAULT_CREDIT)).await.unwrap();
			let received = read_data_until_silent(&mut wire).await;
			assert_eq!(received, DEFAULT_CREDIT as usize / 2);
			let _stream = writer.await;
		});
	}

	#[test]
	fn tiny_send_buffer_overflows() {
		async_std::task::block_on(async {
			let mut config = quiet_config();
			config.set_max_buffer_size(1024);
			let (client, _ci, _server, mut server_incoming) =
				connected(config, quiet_config());

			let mut stream = client.open_stream().await.unwrap();
			// The peer never reads, so everything beyond the window influx
			// accumulates locally until the bound trips.
			let err = loop {
				if let Err(e) = stream.write_all(&[0u8; 512]).await {
					break e;
				}
			};
			assert!(err.to_string().contains("write buffer overflow"), "{}", err);
			let _ = server_incoming.next().await;
		});
	}

	#[test]
	fn too_many_streams_rejected() {
		async_std::task::block_on(async {
			let mut config = quiet_config();
			config.set_max_num_streams(2);
			let (client, _ci, _server, _si) = connected(config, quiet_config());

			let _s1 = client.open_stream().await.unwrap();
			let _s2 = client.open_stream().await.unwrap();
			let result = client.open_stream().await;
			assert_matches!(result, Err(YamuxError::TooManyStreams));
		});
	}

	#[test]
	fn go_away_stops_new_streams() {
		async_std::task::block_on(async {
			let (client, _ci, server, _si) = connected(quiet_config(), quiet_config());
			client.close().await.unwrap();
			assert_matches!(client.open_stream().await, Err(YamuxError::ConnectionStopped));
			// The remote saw GO_AWAY; opening from its side fails as well.
			let result = server.open_stream().await;
			assert!(result.is_err());
		});
	}

	#[test]
	fn close_is_idempotent() {
		async_std::task::block_on(async {
			let (client, _ci, _server, _si) = connected(quiet_config(), quiet_config());
			client.close().await.unwrap();
			client.close().await.unwrap();
		});
	}

	#[test]
	fn keepalive_pings_are_answered() {
		async_std::task::block_on(async {
			let mut config = Config::new();
			config.set_ping_interval(Duration::from_millis(30));
			let (client, _ci, _server, mut server_incoming) =
				connected(config, quiet_config());

			// Survive several ping intervals, then verify the connection
			// still works.
			async_std::task::sleep(Duration::from_millis(200)).await;
			let mut stream = client.open_stream().await.unwrap();
			stream.write_all(b"alive").await.unwrap();
			let mut remote = server_incoming.next().await.unwrap();
			let mut buf = [0u8; 5];
			remote.read_exact(&mut buf).await.unwrap();
			assert_eq!(&buf, b"alive");
		});
	}

	#[test]
	fn unanswered_pings_fail_the_connection() {
		async_std::task::block_on(async {
			// The peer end of the pipe swallows bytes without speaking
			// yamux, so pings are never acknowledged.
			let (a, _b): (PipeEnd, PipeEnd) = pipe();
			let mut config = Config::new();
			config.set_ping_interval(Duration::from_millis(20)).set_max_failed_pings(1);
			let connection = Connection::new(a, config, Mode::Client);
			let result = connection.run().await;
			assert_matches!(result, Err(YamuxError::ConnectionStopped));
		});
	}

	#[test]
	fn dropping_a_stream_resets_it() {
		async_std::task::block_on(async {
			let (client, _ci, _server, mut server_incoming) =
				connected(quiet_config(), quiet_config());

			let mut stream = client.open_stream().await.unwrap();
			stream.write_all(b"z").await.unwrap();
			let mut remote = server_incoming.next().await.unwrap();
			let mut buf = [0u8; 1];
			remote.read_exact(&mut buf).await.unwrap();

			drop(stream);
			let err = remote.read_exact(&mut buf).await.unwrap_err();
			assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
		});
	}
}
