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

//! Core types of the Skiff peer-to-peer stack.
//!
//! This crate holds everything the protocol crates share: self-describing
//! multiaddresses, content-addressed peer identifiers, identity keys,
//! varint and length-prefix framing, and the transport/security seams.

pub mod framing;
pub mod keys;
pub mod multiaddr;
pub mod multihash;
pub mod peer_id;
pub mod pipe;
pub mod secure;
pub mod transport;
pub mod varint;

pub use keys::{KeyError, KeyType, Keypair, PublicKey};
pub use multiaddr::{AddressError, Multiaddr, Protocol};
pub use multihash::{Multihash, MultihashError};
pub use peer_id::{PeerId, PeerIdError};
pub use secure::SecureInfo;
pub use transport::{BoxRawConnection, RawConnection, Transport, TransportError, TransportListener};

use std::borrow::Cow;

/// The name of a protocol, as negotiated over multistream-select
/// (for example `/yamux/1.0.0` or `/ipfs/ping/1.0.0`).
pub type ProtocolName = Cow<'static, str>;
