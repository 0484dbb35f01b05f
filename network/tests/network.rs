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

//! End-to-end tests of the full stack: TCP + Noise + yamux +
//! multistream-select, driven through the [`Network`] service.

use assert_matches::assert_matches;
use futures::prelude::*;
use skiff_core::keys::Keypair;
use skiff_core::multiaddr::Multiaddr;
use skiff_core::ProtocolName;
use skiff_multistream::MultistreamError;
use skiff_network::{
	ConnectionEvent, DialError, Network, NetworkConfig, NetworkError, Substream,
};
use std::sync::Arc;
use std::time::Duration;

const ECHO: &str = "/echo/1.0.0";

fn echo_handler(mut stream: Substream) {
	async_std::task::spawn(async move {
		let mut payload = Vec::new();
		if stream.read_to_end(&mut payload).await.is_ok() {
			let _ = stream.write_all(&payload).await;
		}
		let _ = stream.close().await;
	});
}

async fn listening_network() -> (Arc<Network>, Multiaddr) {
	let config = NetworkConfig::new(Keypair::generate_ed25519())
		.with_listen_address("/ip4/127.0.0.1/tcp/0".parse().unwrap());
	let network = Arc::new(Network::new(config));
	let addrs = network.start().await.unwrap();
	(network, addrs.into_iter().next().unwrap())
}

fn protocols(names: &[&'static str]) -> Vec<ProtocolName> {
	names.iter().map(|n| ProtocolName::from(*n)).collect()
}

async fn settle() {
	async_std::task::sleep(Duration::from_millis(100)).await;
}

#[test]
fn echo_over_noise_and_yamux() {
	let _ = env_logger::builder().is_test(true).try_init();
	async_std::task::block_on(async {
		let (server, server_addr) = listening_network().await;
		server.router().register(ProtocolName::from(ECHO), echo_handler);

		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		let mut client_events = client.registry().subscribe();
		client.add_address(server.local_peer(), server_addr);

		let mut stream =
			client.new_stream(server.local_peer(), &protocols(&[ECHO])).await.unwrap();
		assert_eq!(stream.protocol().as_ref(), ECHO);
		assert_eq!(&stream.remote_peer(), server.local_peer());

		stream.write_all(b"hello").await.unwrap();
		stream.close().await.unwrap();
		let mut reply = Vec::new();
		stream.read_to_end(&mut reply).await.unwrap();
		assert_eq!(reply, b"hello");

		// One live connection in each direction of the registry.
		assert_eq!(client.registry().count(server.local_peer()), 1);
		settle().await;
		assert_eq!(server.registry().count(client.local_peer()), 1);

		client.disconnect(server.local_peer()).await;
		assert_eq!(client.registry().count(server.local_peer()), 0);
		settle().await;
		assert_eq!(server.registry().count(client.local_peer()), 0);

		// The client observed exactly one Connected and one Disconnected.
		let mut connected = 0;
		let mut disconnected = 0;
		while let Ok(Some(event)) = client_events.try_next() {
			match event {
				ConnectionEvent::Connected { peer } => {
					assert_eq!(&peer, server.local_peer());
					connected += 1;
				}
				ConnectionEvent::Disconnected { peer } => {
					assert_eq!(&peer, server.local_peer());
					disconnected += 1;
				}
			}
		}
		assert_eq!((connected, disconnected), (1, 1));
	});
}

#[test]
fn negotiation_failure_keeps_connection_open() {
	async_std::task::block_on(async {
		let (server, server_addr) = listening_network().await;
		server.router().register(ProtocolName::from("/bar/1.0.0"), echo_handler);

		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		client.add_address(server.local_peer(), server_addr);

		let result = client.new_stream(server.local_peer(), &protocols(&["/foo/1.0.0"])).await;
		assert_matches!(
			result,
			Err(NetworkError::Negotiation(MultistreamError::NegotiationFailed))
		);

		// The connection survives the failed negotiation and is reused.
		assert_eq!(client.registry().count(server.local_peer()), 1);
		let mut stream =
			client.new_stream(server.local_peer(), &protocols(&["/bar/1.0.0"])).await.unwrap();
		assert_eq!(client.registry().count(server.local_peer()), 1);
		stream.write_all(b"still works").await.unwrap();
		stream.close().await.unwrap();
		let mut reply = Vec::new();
		stream.read_to_end(&mut reply).await.unwrap();
		assert_eq!(reply, b"still works");
	});
}

#[test]
fn dial_timeout_reported_and_nothing_registered() {
	async_std::task::block_on(async {
		// A black-hole endpoint: accepts TCP connections but never speaks,
		// so the upgrade stalls until the caller's deadline fires.
		let silent = async_std::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = silent.local_addr().unwrap().port();
		async_std::task::spawn(async move {
			let mut parked = Vec::new();
			loop {
				if let Ok((socket, _)) = silent.accept().await {
					parked.push(socket);
				}
			}
		});

		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		let ghost = skiff_core::PeerId::from_public_key(&Keypair::generate_ed25519().public());
		client.add_address(&ghost, format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap());

		let result = client
			.new_stream_with_deadline(&ghost, &protocols(&[ECHO]), Duration::from_millis(100))
			.await;
		assert_matches!(result, Err(NetworkError::Dial(DialError::Timeout)));
		assert_eq!(client.registry().count(&ghost), 0);
	});
}

#[test]
fn dialing_unknown_peer_fails() {
	async_std::task::block_on(async {
		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		let ghost = skiff_core::PeerId::from_public_key(&Keypair::generate_ed25519().public());
		let result = client.new_stream(&ghost, &protocols(&[ECHO])).await;
		assert_matches!(result, Err(NetworkError::Dial(DialError::NoAddresses(_))));
	});
}

#[test]
fn concurrent_dials_share_one_connection() {
	async_std::task::block_on(async {
		let (server, server_addr) = listening_network().await;
		server.router().register(ProtocolName::from(ECHO), echo_handler);

		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		client.add_address(server.local_peer(), server_addr);

		let mut tasks = Vec::new();
		for i in 0..4u8 {
			let client = client.clone();
			let peer = server.local_peer().clone();
			tasks.push(async_std::task::spawn(async move {
				let mut stream = client.new_stream(&peer, &protocols(&[ECHO])).await.unwrap();
				let payload = vec![i; 64];
				stream.write_all(&payload).await.unwrap();
				stream.close().await.unwrap();
				let mut reply = Vec::new();
				stream.read_to_end(&mut reply).await.unwrap();
				assert_eq!(reply, payload);
			}));
		}
		for task in tasks {
			task.await;
		}

		// Per-peer dial dedup: every caller rode the same connection.
		assert_eq!(client.registry().count(server.local_peer()), 1);
		settle().await;
		assert_eq!(server.registry().count(client.local_peer()), 1);
	});
}

#[test]
fn close_all_is_idempotent() {
	async_std::task::block_on(async {
		let (server, server_addr) = listening_network().await;
		server.router().register(ProtocolName::from(ECHO), echo_handler);

		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		let mut events = client.registry().subscribe();
		client.add_address(server.local_peer(), server_addr);

		let mut stream =
			client.new_stream(server.local_peer(), &protocols(&[ECHO])).await.unwrap();
		stream.write_all(b"x").await.unwrap();
		stream.close().await.unwrap();
		let mut reply = Vec::new();
		stream.read_to_end(&mut reply).await.unwrap();

		client.disconnect(server.local_peer()).await;
		client.disconnect(server.local_peer()).await;
		settle().await;

		let mut disconnected = 0;
		while let Ok(Some(event)) = events.try_next() {
			if let ConnectionEvent::Disconnected { .. } = event {
				disconnected += 1;
			}
		}
		assert_eq!(disconnected, 1);
	});
}

#[test]
fn identity_is_authenticated_end_to_end() {
	async_std::task::block_on(async {
		let (server, server_addr) = listening_network().await;
		let observed = Arc::new(parking_lot::Mutex::new(None));
		let observed2 = observed.clone();
		server.router().register(ProtocolName::from(ECHO), move |mut stream| {
			*observed2.lock() = Some(stream.remote_peer());
			async_std::task::spawn(async move {
				let _ = stream.close().await;
			});
		});

		let client = Arc::new(Network::new(NetworkConfig::new(Keypair::generate_ed25519())));
		client.add_address(server.local_peer(), server_addr);
		let stream = client.new_stream(server.local_peer(), &protocols(&[ECHO])).await.unwrap();
		assert_eq!(&stream.remote_peer(), server.local_peer());
		assert_eq!(&stream.local_peer(), client.local_peer());
		settle().await;
		assert_eq!(observed.lock().as_ref(), Some(client.local_peer()));
	});
}
