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

//! Inbound connection acceptance.

use crate::connection::install_connection;
use crate::error::{DialError, NetworkError};
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::upgrader::Upgrader;
use log::{debug, warn};
use skiff_core::multiaddr::Multiaddr;
use skiff_core::transport::Transport;
use std::sync::Arc;

const LOG_TARGET: &str = "skiff-net";

/// Binds listen addresses and services their accept loops.
pub struct Listener {
	transports: Vec<Arc<dyn Transport>>,
	upgrader: Arc<Upgrader>,
	registry: Arc<ConnectionRegistry>,
	router: Arc<Router>,
}

/// A bound listening socket being serviced in the background.
pub struct ListenerHandle {
	local_addr: Multiaddr,
	task: async_std::task::JoinHandle<()>,
}

impl ListenerHandle {
	/// The actual bound address, ports resolved.
	pub fn local_addr(&self) -> &Multiaddr {
		&self.local_addr
	}

	/// Stops accepting. Established connections are unaffected.
	pub async fn stop(self) {
		self.task.cancel().await;
	}
}

impl Listener {
	pub fn new(
		transports: Vec<Arc<dyn Transport>>,
		upgrader: Arc<Upgrader>,
		registry: Arc<ConnectionRegistry>,
		router: Arc<Router>,
	) -> Self {
		Listener { transports, upgrader, registry, router }
	}

	/// Binds `addr` and starts accepting, upgrading and registering
	/// inbound connections.
	pub async fn listen_on(&self, addr: Multiaddr) -> Result<ListenerHandle, NetworkError> {
		let transport = self
			.transports
			.iter()
			.find(|t| t.can_handle(&addr))
			.cloned()
			.ok_or_else(|| DialError::NoTransport(addr.clone()))?;
		let mut listener = transport.listen_on(addr).await?;
		let local_addr = listener.local_multiaddr();
		debug!(target: LOG_TARGET, "listening on {}", local_addr);

		let upgrader = self.upgrader.clone();
		let registry = self.registry.clone();
		let router = self.router.clone();
		let task = async_std::task::spawn(async move {
			loop {
				let raw = match listener.accept().await {
					Ok(raw) => raw,
					Err(e) => {
						warn!(target: LOG_TARGET, "accept failed: {}", e);
						break;
					}
				};
				let upgrader = upgrader.clone();
				let registry = registry.clone();
				let router = router.clone();
				async_std::task::spawn(async move {
					match upgrader.upgrade_inbound(raw).await {
						Ok(established) => {
							install_connection(established, registry, router);
						}
						Err(e) => {
							debug!(
								target: LOG_TARGET,
								"inbound connection upgrade failed: {}",
								e,
							);
						}
					}
				});
			}
		});

		Ok(ListenerHandle { local_addr, task })
	}
}
