// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Binary monitor wire codec.
//!
//! Stateless conversion between typed [`Command`]/[`Response`] values and the
//! little-endian frame layouts spoken by the emulator's binary monitor port.
//! Decoders assume a complete frame is buffered; reassembly of partial reads
//! lives in [`frame::FrameAssembler`].

pub mod command;
pub mod frame;
pub mod response;
pub mod types;

pub use command::Command;
pub use response::{Response, ResponseBody};
pub use types::*;

/// Start-of-frame marker.
pub const STX: u8 = 0x02;
/// Protocol version written into outgoing frames.
pub const API_VERSION: u8 = 0x02;
/// Correlation id reserved for unsolicited events.
pub const EVENT_REQUEST_ID: u32 = 0xffff_ffff;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need {needed} bytes at offset {offset}, have {available}")]
    Short {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("frame does not start with STX (found 0x{0:02x})")]
    BadStx(u8),
    #[error("{0} is longer than 255 bytes")]
    StringTooLong(&'static str),
    #[error("invalid {0} value 0x{1:x}")]
    InvalidValue(&'static str, u32),
    #[error("unknown command type 0x{0:02x}")]
    UnknownCommand(u8),
}
