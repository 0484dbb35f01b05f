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

//! Process-wide accounting of raw bytes moved by the TCP transport.
//!
//! The counters are monotonically increasing for the lifetime of the
//! process; there is deliberately no reset so that concurrent readers can
//! compute deltas safely.

use std::sync::atomic::{AtomicU64, Ordering};

static BYTES_READ: AtomicU64 = AtomicU64::new(0);
static BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);

/// Access to the transport byte counters.
pub struct BytesCounter;

impl BytesCounter {
	pub(crate) fn note_read(n: usize) {
		BYTES_READ.fetch_add(n as u64, Ordering::Relaxed);
	}

	pub(crate) fn note_written(n: usize) {
		BYTES_WRITTEN.fetch_add(n as u64, Ordering::Relaxed);
	}

	/// Total bytes received by all TCP connections of this process.
	pub fn total_read() -> u64 {
		BYTES_READ.load(Ordering::Relaxed)
	}

	/// Total bytes sent by all TCP connections of this process.
	pub fn total_written() -> u64 {
		BYTES_WRITTEN.load(Ordering::Relaxed)
	}
}
