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

//! Outbound dialing and stream opening.

use crate::connection::{install_connection, RegisteredConnection, Substream};
use crate::error::{DialError, NetworkError};
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::upgrader::Upgrader;
use futures::channel::oneshot;
use futures::future::{self, Either};
use futures::prelude::*;
use futures_timer::Delay;
use log::{debug, trace};
use parking_lot::Mutex;
use skiff_core::multiaddr::Multiaddr;
use skiff_core::peer_id::PeerId;
use skiff_core::transport::Transport;
use skiff_core::ProtocolName;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const LOG_TARGET: &str = "skiff-net";

type DialResult = Result<RegisteredConnection, DialError>;

/// Dials peers and opens negotiated streams to them.
///
/// At most one dial per peer is in flight at a time: concurrent callers are
/// joined onto the ongoing attempt and all receive its outcome.
pub struct Dialer {
	transports: Vec<Arc<dyn Transport>>,
	upgrader: Arc<Upgrader>,
	registry: Arc<ConnectionRegistry>,
	router: Arc<Router>,
	/// Bound on one dial attempt, independent of caller deadlines: dropping
	/// the attempt closes its outstanding sockets.
	attempt_timeout: Duration,
	addresses: Mutex<HashMap<PeerId, Vec<Multiaddr>>>,
	pending: Mutex<HashMap<PeerId, Vec<oneshot::Sender<DialResult>>>>,
}

impl Dialer {
	pub fn new(
		transports: Vec<Arc<dyn Transport>>,
		upgrader: Arc<Upgrader>,
		registry: Arc<ConnectionRegistry>,
		router: Arc<Router>,
		attempt_timeout: Duration,
	) -> Self {
		Dialer {
			transports,
			upgrader,
			registry,
			router,
			attempt_timeout,
			addresses: Mutex::new(HashMap::new()),
			pending: Mutex::new(HashMap::new()),
		}
	}

	/// Records an address under which `peer` is reachable. A trailing
	/// `/p2p/...` component is stripped.
	pub fn add_address(&self, peer: &PeerId, addr: Multiaddr) {
		let addr = addr.without_peer_id();
		let mut addresses = self.addresses.lock();
		let known = addresses.entry(peer.clone()).or_default();
		if !known.contains(&addr) {
			known.push(addr);
		}
	}

	/// The known addresses of `peer`.
	pub fn addresses_of(&self, peer: &PeerId) -> Vec<Multiaddr> {
		self.addresses.lock().get(peer).cloned().unwrap_or_default()
	}

	fn transport_for(&self, addr: &Multiaddr) -> Option<Arc<dyn Transport>> {
		self.transports.iter().find(|t| t.can_handle(addr)).cloned()
	}

	/// Opens a stream to `peer` under one of `protocols`, reusing the best
	/// live connection or dialing if there is none. The deadline bounds the
	/// entire sequence.
	pub async fn new_stream(
		self: &Arc<Self>,
		peer: &PeerId,
		protocols: &[ProtocolName],
		deadline: Duration,
	) -> Result<Substream, NetworkError> {
		let work = self.new_stream_inner(peer, protocols);
		futures::pin_mut!(work);
		match future::select(work, Delay::new(deadline)).await {
			Either::Left((result, _)) => result,
			Either::Right(((), _)) => {
				debug!(target: LOG_TARGET, "new_stream to {} timed out", peer);
				Err(DialError::Timeout.into())
			}
		}
	}

	async fn new_stream_inner(
		self: &Arc<Self>,
		peer: &PeerId,
		protocols: &[ProtocolName],
	) -> Result<Substream, NetworkError> {
		let connection = match self.registry.best_for(peer) {
			Some(connection) => connection,
			None => self.connect(peer).await?,
		};

		let mut stream = connection.open_stream().await?;
		match skiff_multistream::dialer_select(&mut stream, protocols).await {
			Ok(protocol) => {
				trace!(target: LOG_TARGET, "stream to {} speaks {}", peer, protocol);
				Ok(Substream::new(stream, protocol, connection.info.clone()))
			}
			Err(e) => {
				// The stream is abandoned; the connection stays usable.
				let _ = stream.close().await;
				Err(e.into())
			}
		}
	}

	/// Returns a connection to `peer`, dialing if needed. Concurrent calls
	/// for the same peer share one attempt.
	pub async fn connect(self: &Arc<Self>, peer: &PeerId) -> DialResult {
		let (reply, rx) = oneshot::channel();
		let is_driver = {
			let mut pending = self.pending.lock();
			match pending.get_mut(peer) {
				Some(waiters) => {
					trace!(target: LOG_TARGET, "joining in-flight dial to {}", peer);
					waiters.push(reply);
					false
				}
				None => {
					pending.insert(peer.clone(), vec![reply]);
					true
				}
			}
		};

		if is_driver {
			// The dial itself runs as its own task so that a caller
			// abandoning the wait (deadline) does not abort the attempt
			// other callers are joined to.
			let dialer = self.clone();
			let peer = peer.clone();
			async_std::task::spawn(async move {
				let attempt = dialer.dial(&peer);
				futures::pin_mut!(attempt);
				let result =
					match future::select(attempt, Delay::new(dialer.attempt_timeout)).await {
						Either::Left((result, _)) => result,
						Either::Right(((), _)) => Err(DialError::Timeout),
					};
				let waiters = dialer.pending.lock().remove(&peer).unwrap_or_default();
				for waiter in waiters {
					let _ = waiter.send(result.clone());
				}
			});
		}

		rx.await.map_err(|_| DialError::Cancelled)?
	}

	/// Dials `peer` on its known addresses, first compatible transport,
	/// each address tried at most once.
	async fn dial(self: &Arc<Self>, peer: &PeerId) -> DialResult {
		let addresses = self.addresses_of(peer);
		if addresses.is_empty() {
			return Err(DialError::NoAddresses(peer.clone()));
		}

		let mut last_error = DialError::Unreachable(peer.clone());
		for addr in addresses {
			let transport = match self.transport_for(&addr) {
				Some(transport) => transport,
				None => {
					last_error = DialError::NoTransport(addr);
					continue;
				}
			};
			debug!(target: LOG_TARGET, "dialing {} at {}", peer, addr);
			let raw = match transport.dial(addr.clone()).await {
				Ok(raw) => raw,
				Err(e) => {
					debug!(target: LOG_TARGET, "dial {} failed: {}", addr, e);
					last_error = DialError::Unreachable(peer.clone());
					continue;
				}
			};
			match self.upgrader.upgrade_outbound(raw, Some(peer.clone())).await {
				Ok(established) => {
					let registered = install_connection(
						established,
						self.registry.clone(),
						self.router.clone(),
					);
					return Ok(registered);
				}
				Err(e) => {
					debug!(target: LOG_TARGET, "upgrade of {} failed: {}", addr, e);
					last_error = DialError::Upgrade(e.to_string());
				}
			}
		}
		Err(last_error)
	}
}
