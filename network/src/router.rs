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

//! Dispatch of inbound streams to protocol handlers.

use crate::connection::Substream;
use parking_lot::RwLock;
use skiff_core::ProtocolName;
use std::collections::HashMap;
use std::sync::Arc;

/// A handler invoked with each negotiated inbound stream. Handlers run on
/// the dispatcher task and are expected to spawn their own work.
pub type StreamHandler = Arc<dyn Fn(Substream) + Send + Sync>;

/// A predicate over protocol names, for handlers serving a family of
/// protocols (versioned names, prefixes).
pub type ProtocolPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Default)]
struct RouterInner {
	exact: HashMap<ProtocolName, StreamHandler>,
	predicates: Vec<(ProtocolPredicate, StreamHandler)>,
}

/// Maps protocol names to handlers.
///
/// An exact-name registration wins over predicates; among predicates, the
/// first registered wins.
#[derive(Default)]
pub struct Router {
	inner: RwLock<RouterInner>,
}

impl Router {
	pub fn new() -> Self {
		Router::default()
	}

	/// Registers a handler under an exact protocol name. An existing
	/// registration under the same name is replaced.
	pub fn register<F>(&self, protocol: ProtocolName, handler: F)
	where
		F: Fn(Substream) + Send + Sync + 'static,
	{
		self.inner.write().exact.insert(protocol, Arc::new(handler));
	}

	/// Registers a handler behind a protocol predicate.
	pub fn register_predicate<P, F>(&self, predicate: P, handler: F)
	where
		P: Fn(&str) -> bool + Send + Sync + 'static,
		F: Fn(Substream) + Send + Sync + 'static,
	{
		self.inner.write().predicates.push((Arc::new(predicate), Arc::new(handler)));
	}

	/// Removes the handler registered under `protocol`.
	pub fn unregister(&self, protocol: &str) {
		self.inner.write().exact.remove(protocol);
	}

	/// Whether any handler matches `protocol`.
	pub fn supports(&self, protocol: &str) -> bool {
		let inner = self.inner.read();
		inner.exact.contains_key(protocol)
			|| inner.predicates.iter().any(|(predicate, _)| predicate(protocol))
	}

	/// The exact protocol names, as advertised to `ls` queries.
	pub fn listing(&self) -> Vec<ProtocolName> {
		let mut listing: Vec<_> = self.inner.read().exact.keys().cloned().collect();
		listing.sort();
		listing
	}

	/// Finds the handler for `protocol`.
	pub fn lookup(&self, protocol: &str) -> Option<StreamHandler> {
		let inner = self.inner.read();
		if let Some(handler) = inner.exact.get(protocol) {
			return Some(handler.clone());
		}
		inner
			.predicates
			.iter()
			.find(|(predicate, _)| predicate(protocol))
			.map(|(_, handler)| handler.clone())
	}
}
