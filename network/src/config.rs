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

//! Network service configuration.

use skiff_core::keys::Keypair;
use skiff_core::multiaddr::Multiaddr;
use skiff_core::ProtocolName;
use std::time::Duration;

/// Configuration of a [`Network`](crate::Network) instance.
pub struct NetworkConfig {
	/// The local identity.
	pub keypair: Keypair,
	/// Addresses to listen on when the network is started.
	pub listen_addresses: Vec<Multiaddr>,
	/// Default deadline of `new_stream`, dialing and upgrading included.
	pub dial_timeout: Duration,
	/// Security protocols proposed by the dialer, in order of preference.
	pub security_protocols: Vec<ProtocolName>,
	/// Muxer protocols proposed by the dialer, in order of preference.
	pub muxer_protocols: Vec<ProtocolName>,
	/// Configuration applied to every yamux connection.
	pub yamux: skiff_yamux::Config,
}

impl NetworkConfig {
	/// A configuration with the stack's defaults: Noise security and yamux
	/// multiplexing, a 10 second dial deadline, no listen addresses.
	pub fn new(keypair: Keypair) -> Self {
		NetworkConfig {
			keypair,
			listen_addresses: Vec::new(),
			dial_timeout: Duration::from_secs(10),
			security_protocols: vec![ProtocolName::from(skiff_noise::PROTOCOL_NAME)],
			muxer_protocols: vec![ProtocolName::from(skiff_yamux::PROTOCOL_NAME)],
			yamux: skiff_yamux::Config::default(),
		}
	}

	/// Adds a listen address.
	pub fn with_listen_address(mut self, addr: Multiaddr) -> Self {
		self.listen_addresses.push(addr);
		self
	}

	/// Overrides the default dial deadline.
	pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
		self.dial_timeout = timeout;
		self
	}
}
