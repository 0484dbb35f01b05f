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

//! The Skiff network plane.
//!
//! [`Network`] ties the stack together: it dials and accepts raw TCP
//! connections, upgrades them to authenticated, multiplexed connections
//! (Noise + yamux, agreed over multistream-select), indexes them by peer
//! and routes inbound streams to registered protocol handlers.

pub mod config;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod listener;
pub mod registry;
pub mod router;
pub mod upgrader;

pub use config::NetworkConfig;
pub use connection::{ConnectionInfo, RegisteredConnection, Substream};
pub use error::{DialError, MplexError, NetworkError, UpgradeError};
pub use registry::{ConnectionEvent, ConnectionRegistry};
pub use router::{Router, StreamHandler};
pub use upgrader::Upgrader;

use dialer::Dialer;
use listener::{Listener, ListenerHandle};
use log::debug;
use parking_lot::Mutex;
use skiff_core::keys::Keypair;
use skiff_core::multiaddr::Multiaddr;
use skiff_core::peer_id::PeerId;
use skiff_core::transport::Transport;
use skiff_core::ProtocolName;
use skiff_tcp::TcpTransport;
use std::sync::Arc;
use std::time::Duration;

const LOG_TARGET: &str = "skiff-net";

/// A network instance: one local identity, its listeners, dialer,
/// connection registry and protocol router.
pub struct Network {
	local_peer: PeerId,
	dial_timeout: Duration,
	listen_addresses: Vec<Multiaddr>,
	registry: Arc<ConnectionRegistry>,
	router: Arc<Router>,
	dialer: Arc<Dialer>,
	listener: Listener,
	listeners: Mutex<Vec<ListenerHandle>>,
}

impl Network {
	/// Builds a network over the TCP transport.
	pub fn new(config: NetworkConfig) -> Self {
		let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(TcpTransport::new())];
		Network::with_transports(config, transports)
	}

	/// Builds a network over a caller-supplied set of transports.
	pub fn with_transports(config: NetworkConfig, transports: Vec<Arc<dyn Transport>>) -> Self {
		let local_peer = PeerId::from_public_key(&config.keypair.public());
		let registry = Arc::new(ConnectionRegistry::new());
		let router = Arc::new(Router::new());
		let upgrader = Arc::new(Upgrader::new(&config));
		let dialer = Arc::new(Dialer::new(
			transports.clone(),
			upgrader.clone(),
			registry.clone(),
			router.clone(),
			config.dial_timeout,
		));
		let listener =
			Listener::new(transports, upgrader, registry.clone(), router.clone());
		debug!(target: LOG_TARGET, "local peer is {}", local_peer);
		Network {
			local_peer,
			dial_timeout: config.dial_timeout,
			listen_addresses: config.listen_addresses,
			registry,
			router,
			dialer,
			listener,
			listeners: Mutex::new(Vec::new()),
		}
	}

	/// The local peer id, derived from the configured keypair.
	pub fn local_peer(&self) -> &PeerId {
		&self.local_peer
	}

	/// The protocol router. Register handlers here before starting to
	/// listen.
	pub fn router(&self) -> &Router {
		&self.router
	}

	/// The connection registry, for event subscriptions and inspection.
	pub fn registry(&self) -> &ConnectionRegistry {
		&self.registry
	}

	/// Records an address under which `peer` is reachable.
	pub fn add_address(&self, peer: &PeerId, addr: Multiaddr) {
		self.dialer.add_address(peer, addr)
	}

	/// Starts listening on all configured addresses, returning the actual
	/// bound addresses.
	pub async fn start(&self) -> Result<Vec<Multiaddr>, NetworkError> {
		let mut bound = Vec::new();
		for addr in self.listen_addresses.clone() {
			bound.push(self.listen_on(addr).await?);
		}
		Ok(bound)
	}

	/// Binds one additional listen address, returning the bound address.
	pub async fn listen_on(&self, addr: Multiaddr) -> Result<Multiaddr, NetworkError> {
		let handle = self.listener.listen_on(addr).await?;
		let local_addr = handle.local_addr().clone();
		self.listeners.lock().push(handle);
		Ok(local_addr)
	}

	/// Opens a stream to `peer` under the first protocol of `protocols`
	/// both sides support, with the configured default deadline.
	pub async fn new_stream(
		&self,
		peer: &PeerId,
		protocols: &[ProtocolName],
	) -> Result<Substream, NetworkError> {
		self.dialer.new_stream(peer, protocols, self.dial_timeout).await
	}

	/// Like [`Network::new_stream`] with an explicit deadline.
	pub async fn new_stream_with_deadline(
		&self,
		peer: &PeerId,
		protocols: &[ProtocolName],
		deadline: Duration,
	) -> Result<Substream, NetworkError> {
		self.dialer.new_stream(peer, protocols, deadline).await
	}

	/// Closes every connection to `peer`.
	pub async fn disconnect(&self, peer: &PeerId) {
		self.registry.close_all(peer).await
	}

	/// Stops all listeners and closes every connection.
	pub async fn shutdown(&self) {
		let listeners = std::mem::take(&mut *self.listeners.lock());
		for listener in listeners {
			listener.stop().await;
		}
		for peer in self.registry.peers() {
			self.registry.close_all(&peer).await;
		}
	}
}

/// Convenience: a network configuration with a fresh Ed25519 identity.
pub fn ephemeral_config() -> NetworkConfig {
	NetworkConfig::new(Keypair::generate_ed25519())
}
