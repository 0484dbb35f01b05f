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

//! Established connections and their streams.

use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::upgrader::EstablishedConnection;
use futures::prelude::*;
use log::{debug, trace};
use skiff_core::keys::PublicKey;
use skiff_core::multiaddr::Multiaddr;
use skiff_core::peer_id::PeerId;
use skiff_core::ProtocolName;
use skiff_yamux as yamux;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

const LOG_TARGET: &str = "skiff-net";

/// Identity and addressing of one established connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
	pub local_peer: PeerId,
	pub remote_peer: PeerId,
	pub remote_public_key: PublicKey,
	pub local_multiaddr: Multiaddr,
	pub remote_multiaddr: Multiaddr,
	/// Whether the local side dialed the connection.
	pub initiator: bool,
}

/// Registry-internal connection identifier.
pub(crate) type ConnId = u64;

/// A live multiplexed connection as tracked by the registry.
#[derive(Clone)]
pub struct RegisteredConnection {
	pub(crate) id: ConnId,
	pub(crate) info: Arc<ConnectionInfo>,
	pub(crate) control: yamux::Control,
}

impl RegisteredConnection {
	/// Identity and addressing of the connection.
	pub fn info(&self) -> &ConnectionInfo {
		&self.info
	}

	/// Opens a new outbound stream on this connection. No protocol has been
	/// negotiated on the result yet.
	pub async fn open_stream(&self) -> Result<yamux::Stream, yamux::YamuxError> {
		self.control.open_stream().await
	}

	/// Closes the connection gracefully.
	pub async fn close(&self) {
		let _ = self.control.close().await;
	}
}

/// An application stream with its negotiated protocol and the identity of
/// the connection it runs on.
#[derive(Debug)]
pub struct Substream {
	io: yamux::Stream,
	protocol: ProtocolName,
	info: Arc<ConnectionInfo>,
}

impl Substream {
	pub(crate) fn new(io: yamux::Stream, protocol: ProtocolName, info: Arc<ConnectionInfo>) -> Self {
		Substream { io, protocol, info }
	}

	/// The protocol agreed for this stream.
	pub fn protocol(&self) -> &ProtocolName {
		&self.protocol
	}

	/// The yamux stream id.
	pub fn id(&self) -> yamux::StreamId {
		self.io.id()
	}

	pub fn local_peer(&self) -> PeerId {
		self.info.local_peer.clone()
	}

	pub fn remote_peer(&self) -> PeerId {
		self.info.remote_peer.clone()
	}

	pub fn remote_public_key(&self) -> PublicKey {
		self.info.remote_public_key.clone()
	}

	/// Addressing and identity of the parent connection.
	pub fn connection_info(&self) -> &ConnectionInfo {
		&self.info
	}

	/// Aborts the stream in both directions.
	pub fn reset(&mut self) {
		self.io.reset()
	}
}

impl AsyncRead for Substream {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.io).poll_read(cx, buf)
	}
}

impl AsyncWrite for Substream {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.io).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.io).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.io).poll_close(cx)
	}
}

/// Registers an upgraded connection and spawns its two service tasks: the
/// muxer event loop and the inbound-stream dispatcher.
///
/// Both run on the executor rather than the caller's stack, for inbound and
/// outbound connections alike.
pub(crate) fn install_connection(
	established: EstablishedConnection,
	registry: Arc<ConnectionRegistry>,
	router: Arc<Router>,
) -> RegisteredConnection {
	let EstablishedConnection { info, control, incoming, connection } = established;
	let registered = registry.add(info.clone(), control);

	let peer = info.remote_peer.clone();
	let conn_id = registered.id;
	let muxer_id = connection.id();
	async_std::task::spawn(async move {
		if let Err(e) = connection.run().await {
			debug!(target: LOG_TARGET, "connection {} to {} failed: {}", muxer_id, peer, e);
		}
		registry.on_connection_closed(&peer, conn_id);
	});

	let mut incoming = incoming;
	async_std::task::spawn(async move {
		while let Some(stream) = incoming.next().await {
			trace!(
				target: LOG_TARGET,
				"inbound stream {} from {}",
				stream.id(),
				info.remote_peer,
			);
			let router = router.clone();
			let info = info.clone();
			async_std::task::spawn(dispatch_inbound(stream, router, info));
		}
	});

	registered
}

/// Negotiates the protocol of one inbound stream and hands it to the
/// registered handler.
async fn dispatch_inbound(
	mut stream: yamux::Stream,
	router: Arc<Router>,
	info: Arc<ConnectionInfo>,
) {
	let listing = router.listing();
	let negotiated = skiff_multistream::listener_select(
		&mut stream,
		|name| router.supports(name),
		&listing,
	)
	.await;
	match negotiated {
		Ok(protocol) => match router.lookup(&protocol) {
			Some(handler) => handler(Substream::new(stream, protocol, info)),
			// The protocol was unregistered while negotiating.
			None => {
				let _ = stream.close().await;
			}
		},
		Err(e) => {
			debug!(
				target: LOG_TARGET,
				"inbound stream from {} negotiation failed: {}",
				info.remote_peer,
				e,
			);
			let _ = stream.close().await;
		}
	}
}
