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

//! Scalar types shared by commands and responses of the binary monitor.

use serde::{Deserialize, Serialize};

use super::CodecError;

/// Command type tags as they appear on the wire.
pub mod command_type {
    pub const MEMORY_GET: u8 = 0x01;
    pub const MEMORY_SET: u8 = 0x02;
    pub const CHECKPOINT_GET: u8 = 0x11;
    pub const CHECKPOINT_SET: u8 = 0x12;
    pub const CHECKPOINT_DELETE: u8 = 0x13;
    pub const CHECKPOINT_LIST: u8 = 0x14;
    pub const CHECKPOINT_TOGGLE: u8 = 0x15;
    pub const CONDITION_SET: u8 = 0x22;
    pub const REGISTERS_GET: u8 = 0x31;
    pub const REGISTERS_SET: u8 = 0x32;
    pub const DUMP: u8 = 0x41;
    pub const UNDUMP: u8 = 0x42;
    pub const RESOURCE_GET: u8 = 0x51;
    pub const RESOURCE_SET: u8 = 0x52;
    pub const ADVANCE_INSTRUCTIONS: u8 = 0x71;
    pub const KEYBOARD_FEED: u8 = 0x72;
    pub const EXECUTE_UNTIL_RETURN: u8 = 0x73;
    pub const PING: u8 = 0x81;
    pub const BANKS_AVAILABLE: u8 = 0x82;
    pub const REGISTERS_AVAILABLE: u8 = 0x83;
    pub const DISPLAY_GET: u8 = 0x84;
    pub const EMULATOR_INFO: u8 = 0x85;
    pub const PALETTE_GET: u8 = 0x91;
    pub const EXIT: u8 = 0xaa;
    pub const QUIT: u8 = 0xbb;
    pub const RESET: u8 = 0xcc;
    pub const AUTOSTART: u8 = 0xdd;
}

/// Response type tags. Most mirror the command that caused them.
pub mod response_type {
    pub const MEMORY_GET: u8 = 0x01;
    pub const MEMORY_SET: u8 = 0x02;
    /// Returned for checkpoint get and set, and streamed by checkpoint list.
    pub const CHECKPOINT_INFO: u8 = 0x11;
    pub const CHECKPOINT_DELETE: u8 = 0x13;
    pub const CHECKPOINT_LIST: u8 = 0x14;
    pub const CHECKPOINT_TOGGLE: u8 = 0x15;
    pub const CONDITION_SET: u8 = 0x22;
    /// Returned for registers get and set, and sent unsolicited on stops.
    pub const REGISTER_INFO: u8 = 0x31;
    pub const DUMP: u8 = 0x41;
    pub const UNDUMP: u8 = 0x42;
    pub const RESOURCE_GET: u8 = 0x51;
    pub const RESOURCE_SET: u8 = 0x52;
    pub const JAM: u8 = 0x61;
    pub const STOPPED: u8 = 0x62;
    pub const RESUMED: u8 = 0x63;
    pub const ADVANCE_INSTRUCTIONS: u8 = 0x71;
    pub const KEYBOARD_FEED: u8 = 0x72;
    pub const EXECUTE_UNTIL_RETURN: u8 = 0x73;
    pub const PING: u8 = 0x81;
    pub const BANKS_AVAILABLE: u8 = 0x82;
    pub const REGISTERS_AVAILABLE: u8 = 0x83;
    pub const DISPLAY_GET: u8 = 0x84;
    pub const EMULATOR_INFO: u8 = 0x85;
    pub const PALETTE_GET: u8 = 0x91;
    pub const EXIT: u8 = 0xaa;
    pub const QUIT: u8 = 0xbb;
    pub const RESET: u8 = 0xcc;
    pub const AUTOSTART: u8 = 0xdd;
}

/// CPU operation mask of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuOperation(pub u8);

impl CpuOperation {
    pub const LOAD: CpuOperation = CpuOperation(0x01);
    pub const STORE: CpuOperation = CpuOperation(0x02);
    pub const EXEC: CpuOperation = CpuOperation(0x04);

    pub fn contains(self, other: CpuOperation) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemSpace {
    Main,
    Drive8,
    Drive9,
    Drive10,
    Drive11,
}

impl MemSpace {
    pub fn to_byte(self) -> u8 {
        match self {
            MemSpace::Main => 0x00,
            MemSpace::Drive8 => 0x01,
            MemSpace::Drive9 => 0x02,
            MemSpace::Drive10 => 0x03,
            MemSpace::Drive11 => 0x04,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0x00 => MemSpace::Main,
            0x01 => MemSpace::Drive8,
            0x02 => MemSpace::Drive9,
            0x03 => MemSpace::Drive10,
            0x04 => MemSpace::Drive11,
            other => return Err(CodecError::InvalidValue("memspace", other as u32)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetMethod {
    Soft,
    Hard,
    Drive8,
    Drive9,
    Drive10,
    Drive11,
}

impl ResetMethod {
    pub fn to_byte(self) -> u8 {
        match self {
            ResetMethod::Soft => 0x00,
            ResetMethod::Hard => 0x01,
            ResetMethod::Drive8 => 0x08,
            ResetMethod::Drive9 => 0x09,
            ResetMethod::Drive10 => 0x0a,
            ResetMethod::Drive11 => 0x0b,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0x00 => ResetMethod::Soft,
            0x01 => ResetMethod::Hard,
            0x08 => ResetMethod::Drive8,
            0x09 => ResetMethod::Drive9,
            0x0a => ResetMethod::Drive10,
            0x0b => ResetMethod::Drive11,
            other => return Err(CodecError::InvalidValue("reset method", other as u32)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayFormat {
    Indexed8,
    Rgb,
    Bgr,
    Rgba,
    Bgra,
}

impl DisplayFormat {
    pub fn to_byte(self) -> u8 {
        match self {
            DisplayFormat::Indexed8 => 0,
            DisplayFormat::Rgb => 1,
            DisplayFormat::Bgr => 2,
            DisplayFormat::Rgba => 3,
            DisplayFormat::Bgra => 4,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0 => DisplayFormat::Indexed8,
            1 => DisplayFormat::Rgb,
            2 => DisplayFormat::Bgr,
            3 => DisplayFormat::Rgba,
            4 => DisplayFormat::Bgra,
            other => return Err(CodecError::InvalidValue("display format", other as u32)),
        })
    }
}

/// Resource payloads are either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceValue {
    String(String),
    Int(u32),
}

impl ResourceValue {
    pub const TYPE_STRING: u8 = 0x00;
    pub const TYPE_INT: u8 = 0x01;

    pub fn type_byte(&self) -> u8 {
        match self {
            ResourceValue::String(_) => Self::TYPE_STRING,
            ResourceValue::Int(_) => Self::TYPE_INT,
        }
    }
}

/// One register id/value pair, as carried by registers get/set and register info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValue {
    pub id: u8,
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMeta {
    pub id: u8,
    /// Width in bits.
    pub size: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankMeta {
    pub id: u16,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub dither: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBuffer {
    pub debug_width: u16,
    pub debug_height: u16,
    pub offset_x: u16,
    pub offset_y: u16,
    pub inner_width: u16,
    pub inner_height: u16,
    pub bpp: u8,
    pub image: Vec<u8>,
}

/// Parameters of a checkpoint-set command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSpec {
    pub start: u16,
    pub end: u16,
    pub stop: bool,
    pub enabled: bool,
    pub operation: CpuOperation,
    pub temporary: bool,
}

impl CheckpointSpec {
    /// An enabled, non-temporary checkpoint on exactly one address.
    pub fn at(address: u16, operation: CpuOperation, stop: bool) -> Self {
        Self {
            start: address,
            end: address,
            stop,
            enabled: true,
            operation,
            temporary: false,
        }
    }

    pub fn range(start: u16, end: u16, operation: CpuOperation, stop: bool) -> Self {
        Self {
            start,
            end,
            ..Self::at(start, operation, stop)
        }
    }
}

/// Checkpoint state reported by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: u32,
    pub hit: bool,
    pub start: u16,
    pub end: u16,
    pub stop: bool,
    pub enabled: bool,
    pub operation: CpuOperation,
    pub temporary: bool,
    pub hit_count: u32,
    pub ignore_count: u32,
    pub has_condition: bool,
}

impl CheckpointInfo {
    pub fn contains(&self, address: u16) -> bool {
        self.start <= address && address <= self.end
    }
}
