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

//! The index of live connections, keyed by peer.

use crate::connection::{ConnId, ConnectionInfo, RegisteredConnection};
use futures::channel::mpsc;
use log::debug;
use parking_lot::Mutex;
use skiff_core::peer_id::PeerId;
use skiff_yamux as yamux;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const LOG_TARGET: &str = "skiff-net";

/// Connection lifecycle events, published synchronously to subscribers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
	Connected { peer: PeerId },
	Disconnected { peer: PeerId },
}

/// Maps peers to their live multiplexed connections.
///
/// A connection is present exactly while it is established and not closed:
/// adding publishes [`ConnectionEvent::Connected`], removal publishes
/// [`ConnectionEvent::Disconnected`] exactly once per connection, however
/// the close was initiated.
pub struct ConnectionRegistry {
	connections: Mutex<HashMap<PeerId, Vec<RegisteredConnection>>>,
	subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
	next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
	fn default() -> Self {
		ConnectionRegistry::new()
	}
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		ConnectionRegistry {
			connections: Mutex::new(HashMap::new()),
			subscribers: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(1),
		}
	}

	/// Subscribes to connection events. Events are delivered to every
	/// subscriber alive at publish time.
	pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
		let (tx, rx) = mpsc::unbounded();
		self.subscribers.lock().push(tx);
		rx
	}

	fn publish(&self, event: ConnectionEvent) {
		self.subscribers.lock().retain(|sink| sink.unbounded_send(event.clone()).is_ok());
	}

	/// Registers an established connection and publishes `Connected`.
	pub(crate) fn add(
		&self,
		info: Arc<ConnectionInfo>,
		control: yamux::Control,
	) -> RegisteredConnection {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let peer = info.remote_peer.clone();
		let registered = RegisteredConnection { id, info, control };
		self.connections.lock().entry(peer.clone()).or_default().push(registered.clone());
		debug!(target: LOG_TARGET, "connection {} to {} registered", id, peer);
		self.publish(ConnectionEvent::Connected { peer });
		registered
	}

	/// All live connections to `peer`.
	pub fn get_all(&self, peer: &PeerId) -> Vec<RegisteredConnection> {
		self.connections.lock().get(peer).cloned().unwrap_or_default()
	}

	/// The number of live connections to `peer`.
	pub fn count(&self, peer: &PeerId) -> usize {
		self.connections.lock().get(peer).map_or(0, Vec::len)
	}

	/// The peers with at least one live connection.
	pub fn peers(&self) -> Vec<PeerId> {
		self.connections.lock().keys().cloned().collect()
	}

	/// The preferred connection to `peer`: initiator-side connections win
	/// over responder-side ones, most recently added wins within a side.
	pub fn best_for(&self, peer: &PeerId) -> Option<RegisteredConnection> {
		let connections = self.connections.lock();
		let connections = connections.get(peer)?;
		connections
			.iter()
			.max_by_key(|c| (c.info.initiator, c.id))
			.cloned()
	}

	/// Removes one connection, publishing `Disconnected` if it was still
	/// registered. Idempotent: later calls for the same connection are
	/// no-ops, as are calls racing with [`ConnectionRegistry::close_all`].
	pub(crate) fn on_connection_closed(&self, peer: &PeerId, id: ConnId) {
		let removed = {
			let mut connections = self.connections.lock();
			match connections.get_mut(peer) {
				Some(list) => {
					let before = list.len();
					list.retain(|c| c.id != id);
					let removed = list.len() != before;
					if list.is_empty() {
						connections.remove(peer);
					}
					removed
				}
				None => false,
			}
		};
		if removed {
			debug!(target: LOG_TARGET, "connection {} to {} closed", id, peer);
			self.publish(ConnectionEvent::Disconnected { peer: peer.clone() });
		}
	}

	/// Closes every connection to `peer`.
	///
	/// The entries are unregistered (and `Disconnected` published, once per
	/// connection) before the muxers shut down, so re-entrant close
	/// notifications cannot observe or double-remove them.
	pub async fn close_all(&self, peer: &PeerId) {
		let connections = self.connections.lock().remove(peer).unwrap_or_default();
		for connection in &connections {
			self.publish(ConnectionEvent::Disconnected { peer: peer.clone() });
			debug!(target: LOG_TARGET, "closing connection {} to {}", connection.id, peer);
		}
		for connection in connections {
			connection.close().await;
		}
	}
}
