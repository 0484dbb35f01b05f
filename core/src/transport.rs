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

//! The transport seam: dialing and accepting raw byte streams.

use crate::multiaddr::Multiaddr;
use async_trait::async_trait;
use futures::prelude::*;
use std::io;
use thiserror::Error;

/// Errors produced by transports.
#[derive(Debug, Error)]
pub enum TransportError {
	/// The multiaddress is not one this transport can handle.
	#[error("address {0} is not supported by this transport")]
	AddressNotSupported(Multiaddr),
	/// The remote endpoint could not be reached.
	#[error("failed to reach {0}")]
	Unreachable(Multiaddr),
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// A raw bidirectional byte pipe between two endpoints.
///
/// Beyond the byte stream itself, a raw connection remembers which side
/// initiated it and the addresses of both endpoints.
pub trait RawConnection: AsyncRead + AsyncWrite + Send + Unpin {
	/// The local endpoint's multiaddress.
	fn local_multiaddr(&self) -> Multiaddr;

	/// The remote endpoint's multiaddress.
	fn remote_multiaddr(&self) -> Multiaddr;

	/// Whether the local side initiated (dialed) the connection.
	fn is_initiator(&self) -> bool;
}

/// A boxed raw connection, as produced by [`Transport`] implementations.
pub type BoxRawConnection = Box<dyn RawConnection>;

impl RawConnection for BoxRawConnection {
	fn local_multiaddr(&self) -> Multiaddr {
		(**self).local_multiaddr()
	}

	fn remote_multiaddr(&self) -> Multiaddr {
		(**self).remote_multiaddr()
	}

	fn is_initiator(&self) -> bool {
		(**self).is_initiator()
	}
}

/// A transport: dials and listens on multiaddresses of a particular family.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Whether `addr` is of the family this transport handles.
	fn can_handle(&self, addr: &Multiaddr) -> bool;

	/// Opens an outbound connection to `addr`.
	async fn dial(&self, addr: Multiaddr) -> Result<BoxRawConnection, TransportError>;

	/// Binds `addr` and returns a listener for inbound connections.
	async fn listen_on(&self, addr: Multiaddr)
		-> Result<Box<dyn TransportListener>, TransportError>;
}

/// An open listening socket.
#[async_trait]
pub trait TransportListener: Send {
	/// The actual bound address (ports resolved).
	fn local_multiaddr(&self) -> Multiaddr;

	/// Waits for and returns the next inbound connection.
	async fn accept(&mut self) -> Result<BoxRawConnection, TransportError>;
}
