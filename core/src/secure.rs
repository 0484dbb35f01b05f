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

//! Identity information attached to an authenticated connection.

use crate::keys::PublicKey;
use crate::peer_id::PeerId;

/// Implemented by connections that have completed mutual authentication.
pub trait SecureInfo {
	/// The local peer id.
	fn local_peer(&self) -> PeerId;

	/// The authenticated remote peer id.
	fn remote_peer(&self) -> PeerId;

	/// The remote's identity public key, as proven during the handshake.
	fn remote_public_key(&self) -> PublicKey;
}
