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

//! Multiaddresses: self-describing, composable network addresses.
//!
//! A multiaddress is an ordered sequence of `(protocol, value)` pairs with a
//! textual form (`/ip4/127.0.0.1/tcp/8080`) and a canonical binary form
//! (`uvarint(code) || value` per pair). Two multiaddresses are equal iff
//! their binary forms are equal.

use crate::multihash::Multihash;
use crate::peer_id::PeerId;
use crate::varint;
use byteorder::{BigEndian, ByteOrder};
use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

// Protocol codes from the multiformats table.
pub const IP4: u64 = 4;
pub const TCP: u64 = 6;
pub const IP6: u64 = 41;
pub const DNS: u64 = 53;
pub const DNS4: u64 = 54;
pub const DNS6: u64 = 55;
pub const DNSADDR: u64 = 56;
pub const UDP: u64 = 273;
pub const P2P: u64 = 421;
pub const TLS: u64 = 448;
pub const QUIC: u64 = 460;
pub const WS: u64 = 477;
pub const WSS: u64 = 478;

/// Multiaddress errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
	#[error("address does not begin with '/'")]
	AddressDoesNotBeginWithSlash,
	#[error("empty protocol segment")]
	EmptyProtocol,
	#[error("unknown protocol `{0}`")]
	NoSuchProtocol(String),
	#[error("protocol `{0}` is recognized but not implemented")]
	NotImplemented(String),
	#[error("empty address")]
	EmptyAddress,
	#[error("invalid address")]
	InvalidAddress,
}

impl AddressError {
	/// Stable numeric value within the address-conversion namespace.
	pub fn code(&self) -> u32 {
		match self {
			AddressError::AddressDoesNotBeginWithSlash => 1,
			AddressError::EmptyProtocol => 2,
			AddressError::NoSuchProtocol(_) => 3,
			AddressError::NotImplemented(_) => 4,
			AddressError::EmptyAddress => 5,
			AddressError::InvalidAddress => 6,
		}
	}
}

/// A single multiaddress component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol<'a> {
	Dns(Cow<'a, str>),
	Dns4(Cow<'a, str>),
	Dns6(Cow<'a, str>),
	Dnsaddr(Cow<'a, str>),
	Ip4(Ipv4Addr),
	Ip6(Ipv6Addr),
	P2p(Multihash),
	Quic,
	Tcp(u16),
	Tls,
	Udp(u16),
	Ws,
	Wss,
}

impl<'a> Protocol<'a> {
	/// The numeric protocol code.
	pub fn code(&self) -> u64 {
		match self {
			Protocol::Dns(_) => DNS,
			Protocol::Dns4(_) => DNS4,
			Protocol::Dns6(_) => DNS6,
			Protocol::Dnsaddr(_) => DNSADDR,
			Protocol::Ip4(_) => IP4,
			Protocol::Ip6(_) => IP6,
			Protocol::P2p(_) => P2P,
			Protocol::Quic => QUIC,
			Protocol::Tcp(_) => TCP,
			Protocol::Tls => TLS,
			Protocol::Udp(_) => UDP,
			Protocol::Ws => WS,
			Protocol::Wss => WSS,
		}
	}

	/// Parses one protocol (with its value, if any) from an iterator of
	/// `/`-separated segments. Consumes only the segments it needs.
	pub fn from_str_parts<I>(mut iter: I) -> Result<Self, AddressError>
	where
		I: Iterator<Item = &'a str>,
	{
		let name = iter.next().ok_or(AddressError::EmptyAddress)?;
		if name.is_empty() {
			return Err(AddressError::EmptyProtocol);
		}
		let mut value = || iter.next().ok_or(AddressError::InvalidAddress);
		match name {
			"ip4" => {
				let s = value()?;
				Ok(Protocol::Ip4(Ipv4Addr::from_str(s).map_err(|_| AddressError::InvalidAddress)?))
			}
			"ip6" => {
				let s = value()?;
				Ok(Protocol::Ip6(Ipv6Addr::from_str(s).map_err(|_| AddressError::InvalidAddress)?))
			}
			"dns" => Ok(Protocol::Dns(Cow::Borrowed(dns_label(value()?)?))),
			"dns4" => Ok(Protocol::Dns4(Cow::Borrowed(dns_label(value()?)?))),
			"dns6" => Ok(Protocol::Dns6(Cow::Borrowed(dns_label(value()?)?))),
			"dnsaddr" => Ok(Protocol::Dnsaddr(Cow::Borrowed(dns_label(value()?)?))),
			"tcp" => {
				let s = value()?;
				Ok(Protocol::Tcp(s.parse().map_err(|_| AddressError::InvalidAddress)?))
			}
			"udp" => {
				let s = value()?;
				Ok(Protocol::Udp(s.parse().map_err(|_| AddressError::InvalidAddress)?))
			}
			"p2p" | "ipfs" => {
				let s = value()?;
				let bytes = bs58::decode(s).into_vec().map_err(|_| AddressError::InvalidAddress)?;
				let hash = Multihash::from_bytes(&bytes).map_err(|_| AddressError::InvalidAddress)?;
				Ok(Protocol::P2p(hash))
			}
			"quic" => Ok(Protocol::Quic),
			"tls" => Ok(Protocol::Tls),
			"ws" => Ok(Protocol::Ws),
			"wss" => Ok(Protocol::Wss),
			other => Err(AddressError::NoSuchProtocol(other.to_string())),
		}
	}

	/// Parses one protocol from the binary form, returning the remainder.
	pub fn from_bytes(input: &'a [u8]) -> Result<(Self, &'a [u8]), AddressError> {
		fn split_at(n: usize, input: &[u8]) -> Result<(&[u8], &[u8]), AddressError> {
			if input.len() < n {
				return Err(AddressError::InvalidAddress);
			}
			Ok(input.split_at(n))
		}
		fn length_prefixed(input: &[u8]) -> Result<(&[u8], &[u8]), AddressError> {
			let (len, used) =
				varint::decode_uvarint(input).map_err(|_| AddressError::InvalidAddress)?;
			split_at(len as usize, &input[used..])
		}

		let (code, used) = varint::decode_uvarint(input).map_err(|_| AddressError::InvalidAddress)?;
		let input = &input[used..];
		match code {
			IP4 => {
				let (data, rest) = split_at(4, input)?;
				Ok((Protocol::Ip4(Ipv4Addr::new(data[0], data[1], data[2], data[3])), rest))
			}
			IP6 => {
				let (data, rest) = split_at(16, input)?;
				let mut segments = [0u16; 8];
				for (i, segment) in segments.iter_mut().enumerate() {
					*segment = BigEndian::read_u16(&data[2 * i..]);
				}
				Ok((Protocol::Ip6(segments.into()), rest))
			}
			TCP => {
				let (data, rest) = split_at(2, input)?;
				Ok((Protocol::Tcp(BigEndian::read_u16(data)), rest))
			}
			UDP => {
				let (data, rest) = split_at(2, input)?;
				Ok((Protocol::Udp(BigEndian::read_u16(data)), rest))
			}
			DNS | DNS4 | DNS6 | DNSADDR => {
				let (data, rest) = length_prefixed(input)?;
				let name = std::str::from_utf8(data).map_err(|_| AddressError::InvalidAddress)?;
				let name = Cow::Owned(name.to_string());
				let protocol = match code {
					DNS => Protocol::Dns(name),
					DNS4 => Protocol::Dns4(name),
					DNS6 => Protocol::Dns6(name),
					_ => Protocol::Dnsaddr(name),
				};
				Ok((protocol, rest))
			}
			P2P => {
				let (data, rest) = length_prefixed(input)?;
				let hash = Multihash::from_bytes(data).map_err(|_| AddressError::InvalidAddress)?;
				Ok((Protocol::P2p(hash), rest))
			}
			QUIC => Ok((Protocol::Quic, input)),
			TLS => Ok((Protocol::Tls, input)),
			WS => Ok((Protocol::Ws, input)),
			WSS => Ok((Protocol::Wss, input)),
			other => Err(AddressError::NoSuchProtocol(format!("{:#x}", other))),
		}
	}

	/// Appends the binary form of this protocol to `out`.
	pub fn write_bytes(&self, out: &mut Vec<u8>) {
		varint::write_uvarint(out, self.code());
		match self {
			Protocol::Ip4(addr) => out.extend_from_slice(&addr.octets()),
			Protocol::Ip6(addr) => out.extend_from_slice(&addr.octets()),
			Protocol::Tcp(port) | Protocol::Udp(port) => {
				out.extend_from_slice(&port.to_be_bytes())
			}
			Protocol::Dns(name)
			| Protocol::Dns4(name)
			| Protocol::Dns6(name)
			| Protocol::Dnsaddr(name) => {
				varint::write_uvarint(out, name.len() as u64);
				out.extend_from_slice(name.as_bytes());
			}
			Protocol::P2p(hash) => {
				let bytes = hash.to_bytes();
				varint::write_uvarint(out, bytes.len() as u64);
				out.extend_from_slice(&bytes);
			}
			Protocol::Quic | Protocol::Tls | Protocol::Ws | Protocol::Wss => {}
		}
	}

	/// Converts into an owned protocol, valid for any lifetime.
	pub fn acquire(self) -> Protocol<'static> {
		match self {
			Protocol::Dns(s) => Protocol::Dns(Cow::Owned(s.into_owned())),
			Protocol::Dns4(s) => Protocol::Dns4(Cow::Owned(s.into_owned())),
			Protocol::Dns6(s) => Protocol::Dns6(Cow::Owned(s.into_owned())),
			Protocol::Dnsaddr(s) => Protocol::Dnsaddr(Cow::Owned(s.into_owned())),
			Protocol::Ip4(a) => Protocol::Ip4(a),
			Protocol::Ip6(a) => Protocol::Ip6(a),
			Protocol::P2p(h) => Protocol::P2p(h),
			Protocol::Quic => Protocol::Quic,
			Protocol::Tcp(p) => Protocol::Tcp(p),
			Protocol::Tls => Protocol::Tls,
			Protocol::Udp(p) => Protocol::Udp(p),
			Protocol::Ws => Protocol::Ws,
			Protocol::Wss => Protocol::Wss,
		}
	}
}

fn dns_label(s: &str) -> Result<&str, AddressError> {
	if s.is_empty() || s.contains('/') {
		return Err(AddressError::InvalidAddress);
	}
	Ok(s)
}

impl<'a> fmt::Display for Protocol<'a> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Protocol::Dns(s) => write!(f, "/dns/{}", s),
			Protocol::Dns4(s) => write!(f, "/dns4/{}", s),
			Protocol::Dns6(s) => write!(f, "/dns6/{}", s),
			Protocol::Dnsaddr(s) => write!(f, "/dnsaddr/{}", s),
			Protocol::Ip4(addr) => write!(f, "/ip4/{}", addr),
			Protocol::Ip6(addr) => write!(f, "/ip6/{}", addr),
			Protocol::P2p(hash) => write!(f, "/p2p/{}", bs58::encode(hash.to_bytes()).into_string()),
			Protocol::Quic => f.write_str("/quic"),
			Protocol::Tcp(port) => write!(f, "/tcp/{}", port),
			Protocol::Tls => f.write_str("/tls"),
			Protocol::Udp(port) => write!(f, "/udp/{}", port),
			Protocol::Ws => f.write_str("/ws"),
			Protocol::Wss => f.write_str("/wss"),
		}
	}
}

/// A validated multiaddress, held in canonical binary form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multiaddr {
	bytes: Vec<u8>,
}

impl Multiaddr {
	/// An empty multiaddress, to be extended with [`Multiaddr::push`].
	pub fn empty() -> Self {
		Multiaddr { bytes: Vec::new() }
	}

	/// The canonical binary form.
	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// Consumes the address, returning the canonical binary form.
	pub fn into_bytes(self) -> Vec<u8> {
		self.bytes
	}

	/// Iterates over the address components.
	pub fn iter(&self) -> Iter<'_> {
		Iter { rest: &self.bytes }
	}

	/// Appends a component. Grammar is revalidated.
	pub fn push(&mut self, protocol: Protocol<'_>) -> Result<(), AddressError> {
		protocol.write_bytes(&mut self.bytes);
		self.validate()
	}

	/// Returns this address extended with `protocol`.
	pub fn with(mut self, protocol: Protocol<'_>) -> Result<Multiaddr, AddressError> {
		self.push(protocol)?;
		Ok(self)
	}

	/// The trailing `/p2p/...` peer, if any.
	pub fn peer_id(&self) -> Option<PeerId> {
		match self.iter().last() {
			Some(Protocol::P2p(hash)) => PeerId::from_multihash(hash).ok(),
			_ => None,
		}
	}

	/// Returns the address without a trailing `/p2p/...` component.
	pub fn without_peer_id(&self) -> Multiaddr {
		let mut out = Multiaddr::empty();
		for protocol in self.iter() {
			if let Protocol::P2p(_) = protocol {
				continue;
			}
			protocol.write_bytes(&mut out.bytes);
		}
		out
	}

	fn validate(&self) -> Result<(), AddressError> {
		if self.bytes.is_empty() {
			return Err(AddressError::EmptyAddress);
		}
		let mut previous: Option<u64> = None;
		let mut rest = &self.bytes[..];
		while !rest.is_empty() {
			if previous == Some(P2P) {
				// p2p terminates an address.
				return Err(AddressError::InvalidAddress);
			}
			let (protocol, remainder) = Protocol::from_bytes(rest)?;
			let code = protocol.code();
			match code {
				TCP | UDP => match previous {
					Some(IP4) | Some(IP6) | Some(DNS) | Some(DNS4) | Some(DNS6)
					| Some(DNSADDR) => {}
					_ => return Err(AddressError::InvalidAddress),
				},
				QUIC => {
					if previous != Some(UDP) {
						return Err(AddressError::InvalidAddress);
					}
				}
				TLS | WS | WSS => match previous {
					Some(TCP) | Some(TLS) => {}
					_ => return Err(AddressError::InvalidAddress),
				},
				_ => {}
			}
			previous = Some(code);
			rest = remainder;
		}
		Ok(())
	}

	/// Converts `/ip4/../tcp/..` or `/ip6/../tcp/..` style addresses from a
	/// socket address.
	pub fn from_socket_addr(addr: SocketAddr, proto: u64) -> Multiaddr {
		let mut bytes = Vec::new();
		match addr {
			SocketAddr::V4(a) => Protocol::Ip4(*a.ip()).write_bytes(&mut bytes),
			SocketAddr::V6(a) => Protocol::Ip6(*a.ip()).write_bytes(&mut bytes),
		}
		let port = addr.port();
		if proto == UDP {
			Protocol::Udp(port).write_bytes(&mut bytes);
		} else {
			Protocol::Tcp(port).write_bytes(&mut bytes);
		}
		Multiaddr { bytes }
	}
}

impl TryFrom<Vec<u8>> for Multiaddr {
	type Error = AddressError;

	fn try_from(bytes: Vec<u8>) -> Result<Self, AddressError> {
		let addr = Multiaddr { bytes };
		addr.validate()?;
		Ok(addr)
	}
}

impl FromStr for Multiaddr {
	type Err = AddressError;

	fn from_str(input: &str) -> Result<Self, AddressError> {
		if input.is_empty() {
			return Err(AddressError::EmptyAddress);
		}
		if !input.starts_with('/') {
			return Err(AddressError::AddressDoesNotBeginWithSlash);
		}
		let mut segments = input.split('/').peekable();
		// The leading slash produces an empty first segment.
		segments.next();
		let mut bytes = Vec::new();
		while segments.peek().is_some() {
			let protocol = Protocol::from_str_parts(&mut segments)?;
			protocol.write_bytes(&mut bytes);
		}
		let addr = Multiaddr { bytes };
		addr.validate()?;
		Ok(addr)
	}
}

impl fmt::Display for Multiaddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for protocol in self.iter() {
			protocol.fmt(f)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Multiaddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl<'a> From<Protocol<'a>> for Multiaddr {
	fn from(protocol: Protocol<'a>) -> Self {
		let mut bytes = Vec::new();
		protocol.write_bytes(&mut bytes);
		Multiaddr { bytes }
	}
}

/// Iterator over the components of a multiaddress.
pub struct Iter<'a> {
	rest: &'a [u8],
}

impl<'a> Iterator for Iter<'a> {
	type Item = Protocol<'a>;

	fn next(&mut self) -> Option<Protocol<'a>> {
		if self.rest.is_empty() {
			return None;
		}
		// The bytes were validated on construction.
		match Protocol::from_bytes(self.rest) {
			Ok((protocol, rest)) => {
				self.rest = rest;
				Some(protocol)
			}
			Err(_) => {
				self.rest = &[];
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;
	use std::convert::TryFrom;

	fn round_trip(s: &str) {
		let parsed: Multiaddr = s.parse().unwrap();
		assert_eq!(parsed.to_string(), s);
		let binary = parsed.as_bytes().to_vec();
		let reparsed = Multiaddr::try_from(binary).unwrap();
		assert_eq!(reparsed, parsed);
		assert_eq!(reparsed.to_string(), s);
	}

	#[test]
	fn string_binary_round_trips() {
		round_trip("/ip4/127.0.0.1/tcp/8080");
		round_trip("/ip4/0.0.0.0/tcp/0");
		round_trip("/ip6/::1/tcp/12345");
		round_trip("/ip4/127.0.0.1/udp/9000/quic");
		round_trip("/dns4/example.com/tcp/443/wss");
		round_trip("/dns/node.example/tcp/30333");
		round_trip("/dnsaddr/bootstrap.example");
		round_trip("/ip4/10.0.0.1/tcp/4001/ws");
		round_trip("/ip4/10.0.0.1/tcp/4001/tls/ws");
	}

	#[test]
	fn p2p_round_trip() {
		let hash = Multihash::sha2_256(b"some public key");
		let text = format!("/ip4/127.0.0.1/tcp/8080/p2p/{}", bs58::encode(hash.to_bytes()).into_string());
		round_trip(&text);
		let addr: Multiaddr = text.parse().unwrap();
		assert_eq!(addr.peer_id().unwrap().to_bytes(), hash.to_bytes());
		// Stripping the /p2p suffix keeps the address valid.
		let stripped = addr.without_peer_id();
		assert_eq!(stripped.to_string(), "/ip4/127.0.0.1/tcp/8080");
	}

	#[test]
	fn ipfs_is_alias_of_p2p() {
		let hash = Multihash::identity(b"tiny key".to_vec());
		let b58 = bs58::encode(hash.to_bytes()).into_string();
		let a: Multiaddr = format!("/ip4/1.2.3.4/tcp/1/ipfs/{}", b58).parse().unwrap();
		let b: Multiaddr = format!("/ip4/1.2.3.4/tcp/1/p2p/{}", b58).parse().unwrap();
		assert_eq!(a, b);
		assert!(a.to_string().contains("/p2p/"));
	}

	#[test]
	fn grammar_violations_rejected() {
		// tcp must follow an ip or dns component.
		assert_matches!(
			"/tcp/8080/ip4/127.0.0.1".parse::<Multiaddr>(),
			Err(AddressError::InvalidAddress)
		);
		// quic only over udp.
		assert_matches!(
			"/ip4/127.0.0.1/tcp/1/quic".parse::<Multiaddr>(),
			Err(AddressError::InvalidAddress)
		);
		// p2p is terminal.
		let hash = Multihash::sha2_256(b"k");
		let b58 = bs58::encode(hash.to_bytes()).into_string();
		assert_matches!(
			format!("/ip4/1.2.3.4/tcp/1/p2p/{}/tcp/2", b58).parse::<Multiaddr>(),
			Err(AddressError::InvalidAddress)
		);
	}

	#[test]
	fn malformed_strings_rejected() {
		assert_matches!("".parse::<Multiaddr>(), Err(AddressError::EmptyAddress));
		assert_matches!(
			"ip4/127.0.0.1".parse::<Multiaddr>(),
			Err(AddressError::AddressDoesNotBeginWithSlash)
		);
		assert_matches!(
			"/ip4/not-an-ip/tcp/1".parse::<Multiaddr>(),
			Err(AddressError::InvalidAddress)
		);
		assert_matches!(
			"/ip4/127.0.0.1/tcp/70000".parse::<Multiaddr>(),
			Err(AddressError::InvalidAddress)
		);
		assert_matches!(
			"/nosuch/127.0.0.1".parse::<Multiaddr>(),
			Err(AddressError::NoSuchProtocol(_))
		);
		assert_matches!("/ip4/127.0.0.1/tcp".parse::<Multiaddr>(), Err(AddressError::InvalidAddress));
	}

	#[test]
	fn binary_garbage_rejected() {
		assert!(Multiaddr::try_from(vec![0xff, 0xff, 0xff]).is_err());
		assert!(Multiaddr::try_from(Vec::new()).is_err());
	}

	#[test]
	fn socket_addr_conversion() {
		let addr = Multiaddr::from_socket_addr("127.0.0.1:8080".parse().unwrap(), TCP);
		assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/8080");
		let addr = Multiaddr::from_socket_addr("[::1]:53".parse().unwrap(), UDP);
		assert_eq!(addr.to_string(), "/ip6/::1/udp/53");
	}
}
