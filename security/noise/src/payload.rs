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

//! The protobuf payload carried inside Noise handshake messages 2 and 3.

/// Identity proof exchanged during the handshake: the libp2p identity key
/// and its signature over the Noise static key.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseHandshakePayload {
	/// Protobuf envelope of the sender's identity public key.
	#[prost(bytes, optional, tag = "1")]
	pub identity_key: Option<Vec<u8>>,
	/// Signature over `"noise-libp2p-static-key:" || static_key`.
	#[prost(bytes, optional, tag = "2")]
	pub identity_sig: Option<Vec<u8>>,
	/// Early application data; unused by this stack.
	#[prost(bytes, optional, tag = "3")]
	pub data: Option<Vec<u8>>,
}
