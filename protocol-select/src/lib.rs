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

//! Multistream-select: per-stream protocol negotiation.
//!
//! Both peers first exchange the `/multistream/1.0.0` greeting. The dialer
//! then proposes protocols in its order of preference; the listener accepts
//! by echoing a proposal or rejects with `na`. The listener additionally
//! answers `ls` with the list of protocols it supports.

mod protocol;

pub use protocol::{Message, MSS_HEADER};

use futures::prelude::*;
use log::{debug, trace};
use skiff_core::framing::{self, FramingError};
use skiff_core::ProtocolName;
use thiserror::Error;

const LOG_TARGET: &str = "skiff-mss";

/// Negotiation messages, protocol names included, may not exceed this size.
const MAX_MESSAGE_LEN: usize = 1024;

/// Multistream-select errors.
#[derive(Debug, Error)]
pub enum MultistreamError {
	/// The caller supplied no protocols to negotiate.
	#[error("no protocols were supplied for negotiation")]
	ProtocolsListEmpty,
	/// The peers have no protocol in common.
	#[error("protocol negotiation failed")]
	NegotiationFailed,
	/// I/O failed underneath the negotiation.
	#[error("negotiation i/o error: {0}")]
	Internal(#[from] FramingError),
	/// The remote sent something that is not a valid multistream message at
	/// this point of the exchange.
	#[error("multistream protocol violation")]
	ProtocolViolation,
}

impl MultistreamError {
	/// Stable numeric value within the multiselect namespace.
	pub fn code(&self) -> u32 {
		match self {
			MultistreamError::ProtocolsListEmpty => 1,
			MultistreamError::NegotiationFailed => 2,
			MultistreamError::Internal(_) => 3,
			MultistreamError::ProtocolViolation => 4,
		}
	}
}

impl From<std::io::Error> for MultistreamError {
	fn from(e: std::io::Error) -> Self {
		MultistreamError::Internal(e.into())
	}
}

async fn send<S>(io: &mut S, message: Message) -> Result<(), MultistreamError>
where
	S: AsyncWrite + Unpin,
{
	io.write_all(&message.encode()).await?;
	io.flush().await?;
	Ok(())
}

async fn recv<S>(io: &mut S) -> Result<Message, MultistreamError>
where
	S: AsyncRead + Unpin,
{
	let payload = framing::read_length_prefixed(io, MAX_MESSAGE_LEN).await.map_err(|e| match e {
		FramingError::MessageTooLarge { .. } => MultistreamError::ProtocolViolation,
		other => MultistreamError::Internal(other),
	})?;
	Message::decode(&payload)
}

/// Negotiates a protocol as the dialer.
///
/// Protocols are proposed in the order given; the first one the listener
/// accepts is returned. If the listener rejects every proposal the result is
/// [`MultistreamError::NegotiationFailed`].
pub async fn dialer_select<S>(
	io: &mut S,
	protocols: &[ProtocolName],
) -> Result<ProtocolName, MultistreamError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	if protocols.is_empty() {
		return Err(MultistreamError::ProtocolsListEmpty);
	}

	send(io, Message::Header).await?;
	match recv(io).await? {
		Message::Header => {}
		_ => return Err(MultistreamError::ProtocolViolation),
	}

	for protocol in protocols {
		trace!(target: LOG_TARGET, "proposing {}", protocol);
		send(io, Message::Protocol(protocol.clone())).await?;
		match recv(io).await? {
			Message::Protocol(echoed) if echoed == *protocol => {
				debug!(target: LOG_TARGET, "negotiated {}", protocol);
				return Ok(protocol.clone());
			}
			Message::NotAvailable => continue,
			_ => return Err(MultistreamError::ProtocolViolation),
		}
	}

	debug!(target: LOG_TARGET, "no protocol accepted out of {}", protocols.len());
	Err(MultistreamError::NegotiationFailed)
}

/// Negotiates a protocol as the dialer when exactly one protocol is
/// acceptable.
pub async fn dialer_select_one<S>(
	io: &mut S,
	protocol: ProtocolName,
) -> Result<ProtocolName, MultistreamError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	dialer_select(io, std::slice::from_ref(&protocol)).await
}

/// Negotiates a protocol as the listener.
///
/// `supports` decides whether a proposed protocol is acceptable; `listing`
/// is the set advertised in response to `ls`. The call returns once a
/// proposal has been accepted. A dialer that gives up and closes the stream
/// surfaces as [`MultistreamError::NegotiationFailed`].
pub async fn listener_select<S, F>(
	io: &mut S,
	supports: F,
	listing: &[ProtocolName],
) -> Result<ProtocolName, MultistreamError>
where
	S: AsyncRead + AsyncWrite + Unpin,
	F: Fn(&str) -> bool,
{
	send(io, Message::Header).await?;
	match recv(io).await? {
		Message::Header => {}
		_ => return Err(MultistreamError::ProtocolViolation),
	}

	loop {
		let message = match recv(io).await {
			Ok(message) => message,
			// The dialer ran out of protocols and closed the stream.
			Err(MultistreamError::Internal(FramingError::UnexpectedEof)) => {
				return Err(MultistreamError::NegotiationFailed)
			}
			Err(other) => return Err(other),
		};
		match message {
			Message::Protocol(name) if supports(&name) => {
				debug!(target: LOG_TARGET, "accepted {}", name);
				send(io, Message::Protocol(name.clone())).await?;
				return Ok(name);
			}
			Message::Protocol(name) => {
				trace!(target: LOG_TARGET, "rejecting {}", name);
				send(io, Message::NotAvailable).await?;
			}
			Message::ListProtocols => {
				send(io, Message::Protocols(listing.to_vec())).await?;
			}
			_ => return Err(MultistreamError::ProtocolViolation),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;
	use skiff_core::pipe::pipe;

	fn names(names: &[&'static str]) -> Vec<ProtocolName> {
		names.iter().map(|n| ProtocolName::from(*n)).collect()
	}

	#[test]
	fn first_common_protocol_wins() {
		let (mut dialer, mut listener) = pipe();
		async_std::task::block_on(async move {
			let server = async_std::task::spawn(async move {
				let supported = names(&["/bar/1.0.0", "/baz/1.0.0"]);
				listener_select(
					&mut listener,
					|name| supported.iter().any(|s| s == name),
					&supported,
				)
				.await
			});
			// The dialer prefers /foo but also supports /baz and /bar; the
			// negotiated protocol is the dialer's first supported entry.
			let chosen = dialer_select(
				&mut dialer,
				&names(&["/foo/1.0.0", "/baz/1.0.0", "/bar/1.0.0"]),
			)
			.await
			.unwrap();
			assert_eq!(chosen, "/baz/1.0.0");
			assert_eq!(server.await.unwrap(), "/baz/1.0.0");
		});
	}

	#[test]
	fn disjoint_sets_fail_on_both_sides() {
		let (mut dialer, mut listener) = pipe();
		async_std::task::block_on(async move {
			let server = async_std::task::spawn(async move {
				let supported = names(&["/bar/1.0.0"]);
				listener_select(
					&mut listener,
					|name| supported.iter().any(|s| s == name),
					&supported,
				)
				.await
			});
			let result = dialer_select(&mut dialer, &names(&["/foo/1.0.0"])).await;
			assert_matches!(result, Err(MultistreamError::NegotiationFailed));
			// Closing our end tells the listener the dialer gave up.
			dialer.close().await.unwrap();
			assert_matches!(server.await, Err(MultistreamError::NegotiationFailed));
		});
	}

	#[test]
	fn empty_proposal_list_is_an_error() {
		let (mut dialer, _listener) = pipe();
		async_std::task::block_on(async move {
			let result = dialer_select(&mut dialer, &[]).await;
			assert_matches!(result, Err(MultistreamError::ProtocolsListEmpty));
		});
	}

	#[test]
	fn ls_lists_supported_protocols() {
		let (mut dialer, mut listener) = pipe();
		async_std::task::block_on(async move {
			let supported = names(&["/bar/1.0.0", "/baz/1.0.0"]);
			let advertised = supported.clone();
			let server = async_std::task::spawn(async move {
				listener_select(
					&mut listener,
					|name| advertised.iter().any(|s| s == name),
					&advertised,
				)
				.await
			});

			send(&mut dialer, Message::Header).await.unwrap();
			assert_eq!(recv(&mut dialer).await.unwrap(), Message::Header);
			send(&mut dialer, Message::ListProtocols).await.unwrap();
			match recv(&mut dialer).await.unwrap() {
				Message::Protocols(list) => assert_eq!(list, supported),
				other => panic!("unexpected reply {:?}", other),
			}
			// Proceed with a listed protocol so the listener completes.
			send(&mut dialer, Message::Protocol("/bar/1.0.0".into())).await.unwrap();
			assert_eq!(
				recv(&mut dialer).await.unwrap(),
				Message::Protocol("/bar/1.0.0".into())
			);
			assert_eq!(server.await.unwrap(), "/bar/1.0.0");
		});
	}

	#[test]
	fn garbage_is_a_protocol_violation() {
		let (mut dialer, mut listener) = pipe();
		async_std::task::block_on(async move {
			// A peer that answers the greeting with a bare string commits a
			// protocol violation.
			let server = async_std::task::spawn(async move {
				let _ = recv(&mut listener).await;
				listener.write_all(&[4, b'o', b'o', b'p', b's']).await.unwrap();
				listener.flush().await.unwrap();
			});
			let result = dialer_select(&mut dialer, &names(&["/foo/1.0.0"])).await;
			assert_matches!(result, Err(MultistreamError::ProtocolViolation));
			server.await;
		});
	}
}
