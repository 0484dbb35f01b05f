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

//! On-disk repository of the local identity key.
//!
//! The identity keypair is persisted in its protobuf envelope as a single
//! `identity.key` file inside the configured directory: loaded when
//! present, generated and persisted when absent. The in-memory variant
//! backs tests and ephemeral nodes.

use log::{debug, info};
use parking_lot::RwLock;
use skiff_core::keys::{KeyError, Keypair};
use skiff_core::peer_id::PeerId;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const LOG_TARGET: &str = "skiff-keystore";

/// File name of the persisted identity within the keystore directory.
const IDENTITY_FILE: &str = "identity.key";

/// Keystore errors.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// The persisted key material cannot be decoded.
	#[error("corrupt key file: {0}")]
	Corrupt(#[from] KeyError),
}

/// A keystore that is either filesystem-backed or in-memory.
pub struct LocalKeystore(RwLock<KeystoreInner>);

struct KeystoreInner {
	path: Option<PathBuf>,
	identity: Option<Keypair>,
}

impl LocalKeystore {
	/// Opens a keystore rooted at `path`, creating the directory if needed.
	/// An existing identity file is loaded eagerly.
	pub fn open<T: Into<PathBuf>>(path: T) -> Result<Self, KeystoreError> {
		let path = path.into();
		fs::create_dir_all(&path)?;
		let identity_file = path.join(IDENTITY_FILE);
		let identity = if identity_file.exists() {
			let bytes = fs::read(&identity_file)?;
			let keypair = Keypair::from_protobuf_encoding(&bytes)?;
			debug!(
				target: LOG_TARGET,
				"loaded identity {} from {:?}",
				PeerId::from_public_key(&keypair.public()),
				identity_file,
			);
			Some(keypair)
		} else {
			None
		};
		Ok(LocalKeystore(RwLock::new(KeystoreInner { path: Some(path), identity })))
	}

	/// Creates a keystore that never touches the filesystem.
	pub fn in_memory() -> Self {
		LocalKeystore(RwLock::new(KeystoreInner { path: None, identity: None }))
	}

	/// Returns the stored identity, generating (and persisting, when
	/// filesystem-backed) a fresh Ed25519 keypair on first use.
	pub fn identity(&self) -> Result<Keypair, KeystoreError> {
		if let Some(keypair) = &self.0.read().identity {
			return Ok(keypair.clone());
		}

		let mut inner = self.0.write();
		// Lost the race against another generator.
		if let Some(keypair) = &inner.identity {
			return Ok(keypair.clone());
		}

		let keypair = Keypair::generate_ed25519();
		if let Some(path) = &inner.path {
			let identity_file = path.join(IDENTITY_FILE);
			let mut file = fs::File::create(&identity_file)?;
			file.write_all(&keypair.to_protobuf_encoding())?;
			file.sync_all()?;
			info!(
				target: LOG_TARGET,
				"generated new identity {} at {:?}",
				PeerId::from_public_key(&keypair.public()),
				identity_file,
			);
		}
		inner.identity = Some(keypair.clone());
		Ok(keypair)
	}

	/// The peer id of the stored identity, if one exists already.
	pub fn peer_id(&self) -> Option<PeerId> {
		self.0.read().identity.as_ref().map(|k| PeerId::from_public_key(&k.public()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn in_memory_generates_once() {
		let keystore = LocalKeystore::in_memory();
		assert!(keystore.peer_id().is_none());
		let first = keystore.identity().unwrap();
		let second = keystore.identity().unwrap();
		assert_eq!(first.public(), second.public());
		assert_eq!(keystore.peer_id(), Some(PeerId::from_public_key(&first.public())));
	}

	#[test]
	fn identity_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let first = {
			let keystore = LocalKeystore::open(dir.path()).unwrap();
			keystore.identity().unwrap()
		};
		let keystore = LocalKeystore::open(dir.path()).unwrap();
		assert_eq!(
			keystore.peer_id(),
			Some(PeerId::from_public_key(&first.public())),
		);
		let reloaded = keystore.identity().unwrap();
		assert_eq!(reloaded.public(), first.public());
	}

	#[test]
	fn corrupt_identity_file_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(IDENTITY_FILE), b"not a key").unwrap();
		assert!(matches!(
			LocalKeystore::open(dir.path()),
			Err(KeystoreError::Corrupt(_))
		));
	}
}
