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

//! TCP transport: dialing and accepting raw byte streams over
//! `/ip4/../tcp/..` and `/ip6/../tcp/..` multiaddresses.

mod bytes_counter;

pub use bytes_counter::BytesCounter;

use async_std::net::{TcpListener, TcpStream};
use async_trait::async_trait;
use futures::prelude::*;
use log::{debug, trace};
use skiff_core::multiaddr::{self, Multiaddr, Protocol};
use skiff_core::peer_id::PeerId;
use skiff_core::transport::{
	BoxRawConnection, RawConnection, Transport, TransportError, TransportListener,
};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

const LOG_TARGET: &str = "skiff-tcp";

/// Extracts a socket address, and the trailing peer id if present, from a
/// TCP multiaddress.
pub fn multiaddr_to_socketaddr(
	addr: &Multiaddr,
) -> Result<(SocketAddr, Option<PeerId>), TransportError> {
	let mut iter = addr.iter();
	let ip = match iter.next() {
		Some(Protocol::Ip4(ip)) => IpAddr::V4(ip),
		Some(Protocol::Ip6(ip)) => IpAddr::V6(ip),
		_ => return Err(TransportError::AddressNotSupported(addr.clone())),
	};
	let port = match iter.next() {
		Some(Protocol::Tcp(port)) => port,
		_ => return Err(TransportError::AddressNotSupported(addr.clone())),
	};
	let peer = match iter.next() {
		Some(Protocol::P2p(hash)) => Some(
			PeerId::from_multihash(hash)
				.map_err(|_| TransportError::AddressNotSupported(addr.clone()))?,
		),
		None => None,
		Some(_) => return Err(TransportError::AddressNotSupported(addr.clone())),
	};
	Ok((SocketAddr::new(ip, port), peer))
}

/// The TCP transport.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
	/// Whether to set `TCP_NODELAY` on new sockets.
	nodelay: bool,
}

impl TcpTransport {
	/// Creates the transport with Nagle's algorithm disabled, the
	/// configuration used by the stack's latency-sensitive protocols.
	pub fn new() -> Self {
		TcpTransport { nodelay: true }
	}
}

#[async_trait]
impl Transport for TcpTransport {
	fn can_handle(&self, addr: &Multiaddr) -> bool {
		multiaddr_to_socketaddr(addr).is_ok()
	}

	async fn dial(&self, addr: Multiaddr) -> Result<BoxRawConnection, TransportError> {
		let (socket_addr, _peer) = multiaddr_to_socketaddr(&addr)?;
		trace!(target: LOG_TARGET, "dialing {}", socket_addr);
		let stream = TcpStream::connect(socket_addr)
			.await
			.map_err(|e| match e.kind() {
				io::ErrorKind::ConnectionRefused
				| io::ErrorKind::AddrNotAvailable
				| io::ErrorKind::TimedOut => TransportError::Unreachable(addr.clone()),
				_ => TransportError::Io(e),
			})?;
		if self.nodelay {
			stream.set_nodelay(true)?;
		}
		let connection = TcpTransStream::new(stream, true)?;
		debug!(
			target: LOG_TARGET,
			"dialed {} from {}",
			connection.remote_addr,
			connection.local_addr,
		);
		Ok(Box::new(connection))
	}

	async fn listen_on(
		&self,
		addr: Multiaddr,
	) -> Result<Box<dyn TransportListener>, TransportError> {
		let (socket_addr, _) = multiaddr_to_socketaddr(&addr)?;
		let listener = TcpListener::bind(socket_addr).await?;
		let local = listener.local_addr()?;
		debug!(target: LOG_TARGET, "listening on {}", local);
		Ok(Box::new(TcpTransListener { listener, nodelay: self.nodelay }))
	}
}

/// An open TCP listening socket.
pub struct TcpTransListener {
	listener: TcpListener,
	nodelay: bool,
}

#[async_trait]
impl TransportListener for TcpTransListener {
	fn local_multiaddr(&self) -> Multiaddr {
		let addr = self
			.listener
			.local_addr()
			.expect("local_addr of a bound listener is always known; qed");
		Multiaddr::from_socket_addr(addr, multiaddr::TCP)
	}

	async fn accept(&mut self) -> Result<BoxRawConnection, TransportError> {
		let (stream, remote) = self.listener.accept().await?;
		trace!(target: LOG_TARGET, "accepted connection from {}", remote);
		if self.nodelay {
			stream.set_nodelay(true)?;
		}
		Ok(Box::new(TcpTransStream::new(stream, false)?))
	}
}

/// An established TCP connection.
pub struct TcpTransStream {
	inner: TcpStream,
	local_addr: Multiaddr,
	remote_addr: Multiaddr,
	initiator: bool,
}

impl TcpTransStream {
	fn new(inner: TcpStream, initiator: bool) -> io::Result<Self> {
		let local_addr = Multiaddr::from_socket_addr(inner.local_addr()?, multiaddr::TCP);
		let remote_addr = Multiaddr::from_socket_addr(inner.peer_addr()?, multiaddr::TCP);
		Ok(TcpTransStream { inner, local_addr, remote_addr, initiator })
	}
}

impl RawConnection for TcpTransStream {
	fn local_multiaddr(&self) -> Multiaddr {
		self.local_addr.clone()
	}

	fn remote_multiaddr(&self) -> Multiaddr {
		self.remote_addr.clone()
	}

	fn is_initiator(&self) -> bool {
		self.initiator
	}
}

impl AsyncRead for TcpTransStream {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<io::Result<usize>> {
		match Pin::new(&mut self.inner).poll_read(cx, buf) {
			Poll::Ready(Ok(n)) => {
				BytesCounter::note_read(n);
				Poll::Ready(Ok(n))
			}
			other => other,
		}
	}
}

impl AsyncWrite for TcpTransStream {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		match Pin::new(&mut self.inner).poll_write(cx, buf) {
			Poll::Ready(Ok(n)) => {
				BytesCounter::note_written(n);
				Poll::Ready(Ok(n))
			}
			other => other,
		}
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.inner).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.inner).poll_close(cx)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;

	#[test]
	fn multiaddr_to_socketaddr_accepts_tcp() {
		let addr: Multiaddr = "/ip4/127.0.0.1/tcp/8080".parse().unwrap();
		let (socket, peer) = multiaddr_to_socketaddr(&addr).unwrap();
		assert_eq!(socket, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
		assert!(peer.is_none());

		let addr: Multiaddr = "/ip6/::1/tcp/12345".parse().unwrap();
		let (socket, _) = multiaddr_to_socketaddr(&addr).unwrap();
		assert_eq!(socket, "[::1]:12345".parse::<SocketAddr>().unwrap());
	}

	#[test]
	fn multiaddr_to_socketaddr_extracts_peer() {
		let pair = skiff_core::Keypair::generate_ed25519();
		let peer = PeerId::from_public_key(&pair.public());
		let addr: Multiaddr =
			format!("/ip4/10.0.0.1/tcp/4001/p2p/{}", peer.to_base58()).parse().unwrap();
		let (_, parsed) = multiaddr_to_socketaddr(&addr).unwrap();
		assert_eq!(parsed, Some(peer));
	}

	#[test]
	fn multiaddr_to_socketaddr_rejects_others() {
		let addr: Multiaddr = "/ip4/127.0.0.1/udp/9000/quic".parse().unwrap();
		assert_matches!(
			multiaddr_to_socketaddr(&addr),
			Err(TransportError::AddressNotSupported(_))
		);
		let addr: Multiaddr = "/dns4/example.com/tcp/443".parse().unwrap();
		assert_matches!(
			multiaddr_to_socketaddr(&addr),
			Err(TransportError::AddressNotSupported(_))
		);
	}

	#[test]
	fn dial_and_accept() {
		async_std::task::block_on(async {
			let transport = TcpTransport::new();
			let mut listener =
				transport.listen_on("/ip4/127.0.0.1/tcp/0".parse().unwrap()).await.unwrap();
			let listen_addr = listener.local_multiaddr();

			let dial = async_std::task::spawn(async move {
				let transport = TcpTransport::new();
				let mut conn = transport.dial(listen_addr).await.unwrap();
				assert!(conn.is_initiator());
				conn.write_all(b"over tcp").await.unwrap();
				conn.close().await.unwrap();
			});

			let mut inbound = listener.accept().await.unwrap();
			assert!(!inbound.is_initiator());
			let mut buf = Vec::new();
			inbound.read_to_end(&mut buf).await.unwrap();
			assert_eq!(buf, b"over tcp");
			dial.await;

			assert!(BytesCounter::total_read() >= 8);
			assert!(BytesCounter::total_written() >= 8);
		});
	}
}
