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

//! The connection upgrade pipeline.
//!
//! A raw transport connection is upgraded in a strictly linear sequence:
//! layer adaptors named by the multiaddress, then the negotiated security
//! protocol, then the negotiated muxer:
//!
//! ```text
//! Raw -> [layers] -> Secure (Noise) -> Muxed (yamux)
//! ```
//!
//! Both the security and the muxer stage agree their protocol over
//! multistream-select before the stage runs. Failure at any stage closes
//! the underlying connection and surfaces a single error.

use crate::config::NetworkConfig;
use crate::connection::ConnectionInfo;
use crate::error::UpgradeError;
use log::{debug, trace};
use skiff_core::keys::Keypair;
use skiff_core::multiaddr::{Multiaddr, Protocol};
use skiff_core::peer_id::PeerId;
use skiff_core::secure::SecureInfo;
use skiff_core::transport::{BoxRawConnection, RawConnection};
use skiff_core::ProtocolName;
use skiff_multistream::{dialer_select, listener_select};
use skiff_noise::{NoiseConfig, NoiseOutput};
use skiff_yamux as yamux;
use std::sync::Arc;

const LOG_TARGET: &str = "skiff-net";

/// A fully upgraded connection, ready to be installed.
pub struct EstablishedConnection {
	pub info: Arc<ConnectionInfo>,
	pub control: yamux::Control,
	pub incoming: yamux::IncomingStreams,
	pub connection: yamux::Connection<NoiseOutput<BoxRawConnection>>,
}

/// Drives raw connections through the security and muxer upgrades.
pub struct Upgrader {
	noise: NoiseConfig,
	yamux_config: yamux::Config,
	security_protocols: Vec<ProtocolName>,
	muxer_protocols: Vec<ProtocolName>,
}

impl Upgrader {
	pub fn new(config: &NetworkConfig) -> Self {
		Upgrader {
			noise: NoiseConfig::new(config.keypair.clone()),
			yamux_config: config.yamux.clone(),
			security_protocols: config.security_protocols.clone(),
			muxer_protocols: config.muxer_protocols.clone(),
		}
	}

	/// Creates an upgrader directly from its parts, outside a full network
	/// configuration.
	pub fn from_parts(
		keypair: Keypair,
		yamux_config: yamux::Config,
		security_protocols: Vec<ProtocolName>,
		muxer_protocols: Vec<ProtocolName>,
	) -> Self {
		Upgrader {
			noise: NoiseConfig::new(keypair),
			yamux_config,
			security_protocols,
			muxer_protocols,
		}
	}

	/// Upgrades an outbound (dialed) connection.
	pub async fn upgrade_outbound(
		&self,
		mut raw: BoxRawConnection,
		expected_peer: Option<PeerId>,
	) -> Result<EstablishedConnection, UpgradeError> {
		check_layers(&raw.remote_multiaddr())?;

		let security = match dialer_select(&mut raw, &self.security_protocols).await {
			Ok(protocol) => protocol,
			Err(e) => {
				close_raw(raw).await;
				return Err(e.into());
			}
		};
		trace!(target: LOG_TARGET, "outbound security protocol: {}", security);
		let secured = match security.as_ref() {
			skiff_noise::PROTOCOL_NAME => {
				self.noise.upgrade_outbound(raw, expected_peer).await?
			}
			other => {
				close_raw(raw).await;
				return Err(UpgradeError::UnsupportedProtocol(other.to_string()));
			}
		};

		self.muxer_stage(secured, true).await
	}

	/// Upgrades an inbound (accepted) connection.
	pub async fn upgrade_inbound(
		&self,
		mut raw: BoxRawConnection,
	) -> Result<EstablishedConnection, UpgradeError> {
		check_layers(&raw.local_multiaddr())?;

		let supported = self.security_protocols.clone();
		let security =
			match listener_select(&mut raw, |name| supported.iter().any(|p| p == name), &supported)
				.await
			{
				Ok(protocol) => protocol,
				Err(e) => {
					close_raw(raw).await;
					return Err(e.into());
				}
			};
		trace!(target: LOG_TARGET, "inbound security protocol: {}", security);
		let secured = match security.as_ref() {
			skiff_noise::PROTOCOL_NAME => self.noise.upgrade_inbound(raw).await?,
			other => {
				close_raw(raw).await;
				return Err(UpgradeError::UnsupportedProtocol(other.to_string()));
			}
		};

		self.muxer_stage(secured, false).await
	}

	/// The muxer negotiation and setup stage, common to both directions.
	async fn muxer_stage(
		&self,
		mut secured: NoiseOutput<BoxRawConnection>,
		initiator: bool,
	) -> Result<EstablishedConnection, UpgradeError> {
		let muxer = if initiator {
			dialer_select(&mut secured, &self.muxer_protocols).await
		} else {
			let supported = self.muxer_protocols.clone();
			listener_select(&mut secured, |name| supported.iter().any(|p| p == name), &supported)
				.await
		};
		let muxer = match muxer {
			Ok(protocol) => protocol,
			Err(e) => {
				let _ = futures::AsyncWriteExt::close(&mut secured).await;
				return Err(e.into());
			}
		};
		trace!(target: LOG_TARGET, "muxer protocol: {}", muxer);

		let info = Arc::new(ConnectionInfo {
			local_peer: secured.local_peer(),
			remote_peer: secured.remote_peer(),
			remote_public_key: secured.remote_public_key(),
			local_multiaddr: secured.local_multiaddr(),
			remote_multiaddr: secured.remote_multiaddr(),
			initiator,
		});

		// Muxer selection is a tagged lookup by protocol name; yamux is the
		// only variant this stack implements.
		let mut connection = match muxer.as_ref() {
			yamux::PROTOCOL_NAME => {
				let mode = if initiator { yamux::Mode::Client } else { yamux::Mode::Server };
				yamux::Connection::new(secured, self.yamux_config.clone(), mode)
			}
			other => return Err(UpgradeError::UnsupportedProtocol(other.to_string())),
		};

		let control = connection.control();
		let incoming = connection
			.take_incoming()
			.expect("incoming streams taken once per connection; qed");
		debug!(
			target: LOG_TARGET,
			"connection to {} upgraded (noise + yamux, initiator: {})",
			info.remote_peer,
			initiator,
		);
		Ok(EstablishedConnection { info, control, incoming, connection })
	}
}

/// Rejects multiaddresses that require layer adaptors this stack knows of
/// but does not implement.
fn check_layers(addr: &Multiaddr) -> Result<(), UpgradeError> {
	for protocol in addr.iter() {
		match protocol {
			Protocol::Ws => return Err(UpgradeError::LayerNotImplemented("ws".into())),
			Protocol::Wss => return Err(UpgradeError::LayerNotImplemented("wss".into())),
			Protocol::Tls => return Err(UpgradeError::LayerNotImplemented("tls".into())),
			_ => {}
		}
	}
	Ok(())
}

async fn close_raw(mut raw: BoxRawConnection) {
	let _ = futures::AsyncWriteExt::close(&mut raw).await;
}
