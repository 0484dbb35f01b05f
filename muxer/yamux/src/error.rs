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

use std::io;
use thiserror::Error;

/// Errors of the yamux multiplexer.
#[derive(Debug, Error)]
pub enum YamuxError {
	#[error("connection is stopped")]
	ConnectionStopped,
	#[error("internal error")]
	InternalError,
	#[error("call not allowed in the current state")]
	ForbiddenCall,
	#[error("invalid argument")]
	InvalidArgument,
	#[error("too many streams")]
	TooManyStreams,
	#[error("a read is already in progress on the stream")]
	StreamIsReading,
	#[error("stream is not readable")]
	StreamNotReadable,
	#[error("stream is not writable")]
	StreamNotWritable,
	#[error("stream write buffer overflow")]
	WriteBufferOverflow,
	#[error("stream closed by host")]
	StreamClosedByHost,
	#[error("stream closed by peer")]
	StreamClosedByPeer,
	#[error("stream reset by host")]
	StreamResetByHost,
	#[error("stream reset by peer")]
	StreamResetByPeer,
	#[error("invalid window size")]
	InvalidWindowSize,
	#[error("receive window overflow")]
	ReceiveWindowOverflow,
	#[error("connection closed by host")]
	ConnectionClosedByHost,
	#[error("connection closed by peer")]
	ConnectionClosedByPeer,
	#[error("protocol error")]
	ProtocolError,
	#[error("frame decoding failed: {0}")]
	Decode(#[from] FrameDecodeError),
	#[error(transparent)]
	Io(#[from] io::Error),
}

impl YamuxError {
	/// Stable numeric value within the yamux namespace.
	pub fn code(&self) -> u32 {
		match self {
			YamuxError::ConnectionStopped => 1,
			YamuxError::InternalError => 2,
			YamuxError::ForbiddenCall => 3,
			YamuxError::InvalidArgument => 4,
			YamuxError::TooManyStreams => 5,
			YamuxError::StreamIsReading => 6,
			YamuxError::StreamNotReadable => 7,
			YamuxError::StreamNotWritable => 8,
			YamuxError::WriteBufferOverflow => 9,
			YamuxError::StreamClosedByHost => 10,
			YamuxError::StreamClosedByPeer => 11,
			YamuxError::StreamResetByHost => 12,
			YamuxError::StreamResetByPeer => 13,
			YamuxError::InvalidWindowSize => 14,
			YamuxError::ReceiveWindowOverflow => 15,
			YamuxError::ConnectionClosedByHost => 16,
			YamuxError::ConnectionClosedByPeer => 17,
			YamuxError::ProtocolError => 18,
			YamuxError::Decode(_) => 18,
			YamuxError::Io(_) => 2,
		}
	}
}

/// Errors of wire-frame decoding.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
	#[error("unsupported frame version {0}")]
	Version(u8),
	#[error("unknown frame type {0}")]
	Type(u8),
	#[error("frame body of {0} bytes exceeds the limit")]
	FrameTooLarge(usize),
	#[error(transparent)]
	Io(#[from] io::Error),
}
