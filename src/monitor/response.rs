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

use super::frame::{put_bool, put_short_string, put_u16, put_u32, ByteReader};
use super::types::response_type as rt;
use super::{
    BankMeta, CheckpointInfo, CodecError, CpuOperation, DisplayBuffer, PaletteEntry, RegisterMeta,
    RegisterValue, ResourceValue, API_VERSION, EVENT_REQUEST_ID,
};

/// Length of the display metadata block that precedes the image.
const DISPLAY_META_LEN: u32 = 13;

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub api_version: u8,
    pub error: u8,
    pub request_id: u32,
    pub body: ResponseBody,
    /// Earlier responses that carried the same request id, in arrival order.
    pub related: Vec<Response>,
}

impl Response {
    /// An unsolicited event.
    pub fn event(body: ResponseBody) -> Self {
        Self::reply(EVENT_REQUEST_ID, body)
    }

    pub fn reply(request_id: u32, body: ResponseBody) -> Self {
        Self {
            api_version: API_VERSION,
            error: 0,
            request_id,
            body,
            related: Vec::new(),
        }
    }

    pub fn is_event(&self) -> bool {
        self.request_id == EVENT_REQUEST_ID
    }

    pub fn type_code(&self) -> u8 {
        self.body.type_code()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    MemoryGet { memory: Vec<u8> },
    MemorySet,
    CheckpointInfo(CheckpointInfo),
    CheckpointDelete,
    CheckpointList { count: u32 },
    CheckpointToggle,
    ConditionSet,
    RegisterInfo { registers: Vec<RegisterValue> },
    Dump,
    Undump { pc: u16 },
    ResourceGet { value: ResourceValue },
    ResourceSet,
    Jam { pc: u16 },
    Stopped { pc: u16 },
    Resumed { pc: u16 },
    AdvanceInstructions,
    KeyboardFeed,
    ExecuteUntilReturn,
    Ping,
    BanksAvailable { banks: Vec<BankMeta> },
    RegistersAvailable { registers: Vec<RegisterMeta> },
    DisplayGet(DisplayBuffer),
    EmulatorInfo { version: Vec<u8>, revision: u32 },
    PaletteGet { entries: Vec<PaletteEntry> },
    Exit,
    Quit,
    Reset,
    Autostart,
    /// A type this codec does not know, kept verbatim.
    Unknown { type_code: u8, body: Vec<u8> },
}

impl ResponseBody {
    pub fn type_code(&self) -> u8 {
        match self {
            ResponseBody::MemoryGet { .. } => rt::MEMORY_GET,
            ResponseBody::MemorySet => rt::MEMORY_SET,
            ResponseBody::CheckpointInfo(_) => rt::CHECKPOINT_INFO,
            ResponseBody::CheckpointDelete => rt::CHECKPOINT_DELETE,
            ResponseBody::CheckpointList { .. } => rt::CHECKPOINT_LIST,
            ResponseBody::CheckpointToggle => rt::CHECKPOINT_TOGGLE,
            ResponseBody::ConditionSet => rt::CONDITION_SET,
            ResponseBody::RegisterInfo { .. } => rt::REGISTER_INFO,
            ResponseBody::Dump => rt::DUMP,
            ResponseBody::Undump { .. } => rt::UNDUMP,
            ResponseBody::ResourceGet { .. } => rt::RESOURCE_GET,
            ResponseBody::ResourceSet => rt::RESOURCE_SET,
            ResponseBody::Jam { .. } => rt::JAM,
            ResponseBody::Stopped { .. } => rt::STOPPED,
            ResponseBody::Resumed { .. } => rt::RESUMED,
            ResponseBody::AdvanceInstructions => rt::ADVANCE_INSTRUCTIONS,
            ResponseBody::KeyboardFeed => rt::KEYBOARD_FEED,
            ResponseBody::ExecuteUntilReturn => rt::EXECUTE_UNTIL_RETURN,
            ResponseBody::Ping => rt::PING,
            ResponseBody::BanksAvailable { .. } => rt::BANKS_AVAILABLE,
            ResponseBody::RegistersAvailable { .. } => rt::REGISTERS_AVAILABLE,
            ResponseBody::DisplayGet(_) => rt::DISPLAY_GET,
            ResponseBody::EmulatorInfo { .. } => rt::EMULATOR_INFO,
            ResponseBody::PaletteGet { .. } => rt::PALETTE_GET,
            ResponseBody::Exit => rt::EXIT,
            ResponseBody::Quit => rt::QUIT,
            ResponseBody::Reset => rt::RESET,
            ResponseBody::Autostart => rt::AUTOSTART,
            ResponseBody::Unknown { type_code, .. } => *type_code,
        }
    }

    pub fn decode(type_code: u8, body: &[u8]) -> Result<ResponseBody, CodecError> {
        let mut r = ByteReader::new(body);
        let decoded = match type_code {
            rt::MEMORY_GET => {
                let len = r.u16()? as usize;
                ResponseBody::MemoryGet {
                    memory: r.bytes(len)?,
                }
            }
            rt::MEMORY_SET => ResponseBody::MemorySet,
            rt::CHECKPOINT_INFO => ResponseBody::CheckpointInfo(CheckpointInfo {
                id: r.u32()?,
                hit: r.bool()?,
                start: r.u16()?,
                end: r.u16()?,
                stop: r.bool()?,
                enabled: r.bool()?,
                operation: CpuOperation(r.u8()?),
                temporary: r.bool()?,
                hit_count: r.u32()?,
                ignore_count: r.u32()?,
                has_condition: r.bool()?,
            }),
            rt::CHECKPOINT_DELETE => ResponseBody::CheckpointDelete,
            rt::CHECKPOINT_LIST => ResponseBody::CheckpointList { count: r.u32()? },
            rt::CHECKPOINT_TOGGLE => ResponseBody::CheckpointToggle,
            rt::CONDITION_SET => ResponseBody::ConditionSet,
            rt::REGISTER_INFO => {
                let count = r.u16()?;
                let mut registers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let item = r.position();
                    let size = r.u8()? as usize;
                    registers.push(RegisterValue {
                        id: r.u8()?,
                        value: r.u16()?,
                    });
                    r.seek(item + size + 1);
                }
                ResponseBody::RegisterInfo { registers }
            }
            rt::DUMP => ResponseBody::Dump,
            rt::UNDUMP => ResponseBody::Undump { pc: r.u16()? },
            rt::RESOURCE_GET => {
                let kind = r.u8()?;
                let len = r.u8()? as usize;
                let value = match kind {
                    ResourceValue::TYPE_INT => ResourceValue::Int(match len {
                        1 => r.u8()? as u32,
                        2 => r.u16()? as u32,
                        4 => r.u32()?,
                        other => {
                            return Err(CodecError::InvalidValue(
                                "int resource length",
                                other as u32,
                            ))
                        }
                    }),
                    ResourceValue::TYPE_STRING => ResourceValue::String(r.ascii(len)?),
                    other => return Err(CodecError::InvalidValue("resource type", other as u32)),
                };
                ResponseBody::ResourceGet { value }
            }
            rt::RESOURCE_SET => ResponseBody::ResourceSet,
            rt::JAM => ResponseBody::Jam { pc: r.u16()? },
            rt::STOPPED => ResponseBody::Stopped { pc: r.u16()? },
            rt::RESUMED => ResponseBody::Resumed { pc: r.u16()? },
            rt::ADVANCE_INSTRUCTIONS => ResponseBody::AdvanceInstructions,
            rt::KEYBOARD_FEED => ResponseBody::KeyboardFeed,
            rt::EXECUTE_UNTIL_RETURN => ResponseBody::ExecuteUntilReturn,
            rt::PING => ResponseBody::Ping,
            rt::BANKS_AVAILABLE => {
                let count = r.u16()?;
                let mut banks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let item = r.position();
                    let size = r.u8()? as usize;
                    let id = r.u16()?;
                    let name = r.short_string()?;
                    banks.push(BankMeta { id, name });
                    r.seek(item + size + 1);
                }
                ResponseBody::BanksAvailable { banks }
            }
            rt::REGISTERS_AVAILABLE => {
                let count = r.u16()?;
                let mut registers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let item = r.position();
                    let size = r.u8()? as usize;
                    let id = r.u8()?;
                    let bits = r.u8()?;
                    let name = r.short_string()?;
                    registers.push(RegisterMeta {
                        id,
                        size: bits,
                        name,
                    });
                    r.seek(item + size + 1);
                }
                ResponseBody::RegistersAvailable { registers }
            }
            rt::DISPLAY_GET => {
                let meta_len = r.u32()? as usize;
                let buffer = DisplayBuffer {
                    debug_width: r.u16()?,
                    debug_height: r.u16()?,
                    offset_x: r.u16()?,
                    offset_y: r.u16()?,
                    inner_width: r.u16()?,
                    inner_height: r.u16()?,
                    bpp: r.u8()?,
                    image: {
                        r.seek(4 + meta_len);
                        let len = r.u32()? as usize;
                        r.bytes(len)?
                    },
                };
                ResponseBody::DisplayGet(buffer)
            }
            rt::EMULATOR_INFO => {
                let version_len = r.u8()? as usize;
                let version = r.bytes(version_len)?;
                let revision_len = r.u8()?;
                if revision_len != 4 {
                    return Err(CodecError::InvalidValue(
                        "revision length",
                        revision_len as u32,
                    ));
                }
                ResponseBody::EmulatorInfo {
                    version,
                    revision: r.u32()?,
                }
            }
            rt::PALETTE_GET => {
                let count = r.u16()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let item = r.position();
                    let size = r.u8()? as usize;
                    entries.push(PaletteEntry {
                        red: r.u8()?,
                        green: r.u8()?,
                        blue: r.u8()?,
                        dither: r.u8()?,
                    });
                    r.seek(item + size + 1);
                }
                ResponseBody::PaletteGet { entries }
            }
            rt::EXIT => ResponseBody::Exit,
            rt::QUIT => ResponseBody::Quit,
            rt::RESET => ResponseBody::Reset,
            rt::AUTOSTART => ResponseBody::Autostart,
            _ => ResponseBody::Unknown {
                type_code,
                body: body.to_vec(),
            },
        };
        Ok(decoded)
    }

    pub fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            ResponseBody::MemoryGet { memory } => {
                let len = u16::try_from(memory.len())
                    .map_err(|_| CodecError::InvalidValue("memory length", memory.len() as u32))?;
                put_u16(out, len);
                out.extend_from_slice(memory);
            }
            ResponseBody::CheckpointInfo(info) => {
                put_u32(out, info.id);
                put_bool(out, info.hit);
                put_u16(out, info.start);
                put_u16(out, info.end);
                put_bool(out, info.stop);
                put_bool(out, info.enabled);
                out.push(info.operation.0);
                put_bool(out, info.temporary);
                put_u32(out, info.hit_count);
                put_u32(out, info.ignore_count);
                put_bool(out, info.has_condition);
            }
            ResponseBody::CheckpointList { count } => put_u32(out, *count),
            ResponseBody::RegisterInfo { registers } => {
                put_u16(out, registers.len() as u16);
                for reg in registers {
                    out.push(3);
                    out.push(reg.id);
                    put_u16(out, reg.value);
                }
            }
            ResponseBody::Undump { pc }
            | ResponseBody::Jam { pc }
            | ResponseBody::Stopped { pc }
            | ResponseBody::Resumed { pc } => put_u16(out, *pc),
            ResponseBody::ResourceGet { value } => {
                out.push(value.type_byte());
                match value {
                    ResourceValue::Int(v) => {
                        out.push(4);
                        put_u32(out, *v);
                    }
                    ResourceValue::String(s) => put_short_string(out, s, "resource value")?,
                }
            }
            ResponseBody::BanksAvailable { banks } => {
                put_u16(out, banks.len() as u16);
                for bank in banks {
                    let mut item = Vec::new();
                    put_u16(&mut item, bank.id);
                    put_short_string(&mut item, &bank.name, "bank name")?;
                    out.push(item.len() as u8);
                    out.extend_from_slice(&item);
                }
            }
            ResponseBody::RegistersAvailable { registers } => {
                put_u16(out, registers.len() as u16);
                for reg in registers {
                    let mut item = vec![reg.id, reg.size];
                    put_short_string(&mut item, &reg.name, "register name")?;
                    out.push(item.len() as u8);
                    out.extend_from_slice(&item);
                }
            }
            ResponseBody::DisplayGet(buffer) => {
                put_u32(out, DISPLAY_META_LEN);
                put_u16(out, buffer.debug_width);
                put_u16(out, buffer.debug_height);
                put_u16(out, buffer.offset_x);
                put_u16(out, buffer.offset_y);
                put_u16(out, buffer.inner_width);
                put_u16(out, buffer.inner_height);
                out.push(buffer.bpp);
                put_u32(out, buffer.image.len() as u32);
                out.extend_from_slice(&buffer.image);
            }
            ResponseBody::EmulatorInfo { version, revision } => {
                out.push(version.len() as u8);
                out.extend_from_slice(version);
                out.push(4);
                put_u32(out, *revision);
            }
            ResponseBody::PaletteGet { entries } => {
                put_u16(out, entries.len() as u16);
                for e in entries {
                    out.extend_from_slice(&[4, e.red, e.green, e.blue, e.dither]);
                }
            }
            ResponseBody::Unknown { body, .. } => out.extend_from_slice(body),
            ResponseBody::MemorySet
            | ResponseBody::CheckpointDelete
            | ResponseBody::CheckpointToggle
            | ResponseBody::ConditionSet
            | ResponseBody::Dump
            | ResponseBody::ResourceSet
            | ResponseBody::AdvanceInstructions
            | ResponseBody::KeyboardFeed
            | ResponseBody::ExecuteUntilReturn
            | ResponseBody::Ping
            | ResponseBody::Exit
            | ResponseBody::Quit
            | ResponseBody::Reset
            | ResponseBody::Autostart => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::frame::{decode_response, encode_response};

    fn round_trip(body: ResponseBody) {
        let frame = encode_response(&Response::reply(9, body.clone())).unwrap();
        assert_eq!(decode_response(&frame).unwrap().body, body);
    }

    #[test]
    fn checkpoint_info_offsets() {
        let mut body = Vec::new();
        ResponseBody::CheckpointInfo(CheckpointInfo {
            id: 0x11223344,
            hit: true,
            start: 0x0801,
            end: 0x0802,
            stop: false,
            enabled: true,
            operation: CpuOperation::EXEC,
            temporary: true,
            hit_count: 5,
            ignore_count: 6,
            has_condition: true,
        })
        .encode_body(&mut body)
        .unwrap();
        assert_eq!(body.len(), 22);
        assert_eq!(&body[0..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(body[4], 1);
        assert_eq!(&body[5..7], &[0x01, 0x08]);
        assert_eq!(body[11], 0x04);
        assert_eq!(&body[13..17], &5u32.to_le_bytes());
        assert_eq!(body[21], 1);
    }

    #[test]
    fn register_info_honours_item_size() {
        // Second item declares size 4 with one padding byte.
        let body = [2, 0, 3, 0, 0x10, 0x00, 4, 3, 0x34, 0x12, 0xee];
        let decoded = ResponseBody::decode(rt::REGISTER_INFO, &body).unwrap();
        assert_eq!(
            decoded,
            ResponseBody::RegisterInfo {
                registers: vec![
                    RegisterValue { id: 0, value: 0x10 },
                    RegisterValue { id: 3, value: 0x1234 },
                ]
            }
        );
    }

    #[test]
    fn resource_get_int_widths() {
        for (len, bytes, expected) in [
            (1u8, vec![0x7f], 0x7f),
            (2, vec![0x34, 0x12], 0x1234),
            (4, vec![0x78, 0x56, 0x34, 0x12], 0x12345678),
        ] {
            let mut body = vec![ResourceValue::TYPE_INT, len];
            body.extend(bytes);
            assert_eq!(
                ResponseBody::decode(rt::RESOURCE_GET, &body).unwrap(),
                ResponseBody::ResourceGet {
                    value: ResourceValue::Int(expected)
                }
            );
        }
        let bad = [ResourceValue::TYPE_INT, 3, 0, 0, 0];
        assert!(ResponseBody::decode(rt::RESOURCE_GET, &bad).is_err());
    }

    #[test]
    fn metadata_lists_round_trip() {
        round_trip(ResponseBody::BanksAvailable {
            banks: vec![
                BankMeta {
                    id: 0,
                    name: "default".into(),
                },
                BankMeta {
                    id: 0x0102,
                    name: "ram".into(),
                },
            ],
        });
        round_trip(ResponseBody::RegistersAvailable {
            registers: vec![
                RegisterMeta {
                    id: 3,
                    size: 16,
                    name: "PC".into(),
                },
                RegisterMeta {
                    id: 0x35,
                    size: 16,
                    name: "LIN".into(),
                },
            ],
        });
        round_trip(ResponseBody::PaletteGet {
            entries: vec![PaletteEntry {
                red: 0xff,
                green: 0x80,
                blue: 0,
                dither: 1,
            }],
        });
    }

    #[test]
    fn display_and_info_round_trip() {
        round_trip(ResponseBody::DisplayGet(DisplayBuffer {
            debug_width: 384,
            debug_height: 272,
            offset_x: 32,
            offset_y: 35,
            inner_width: 320,
            inner_height: 200,
            bpp: 8,
            image: vec![1, 2, 3, 4],
        }));
        round_trip(ResponseBody::EmulatorInfo {
            version: vec![3, 7, 0, 0],
            revision: 42000,
        });
    }

    #[test]
    fn unknown_types_keep_raw_body() {
        let decoded = ResponseBody::decode(0x77, &[1, 2, 3]).unwrap();
        assert_eq!(
            decoded,
            ResponseBody::Unknown {
                type_code: 0x77,
                body: vec![1, 2, 3]
            }
        );
        round_trip(decoded);
    }

    #[test]
    fn error_reply_with_empty_body_is_kept() {
        let mut frame =
            encode_response(&Response::reply(5, ResponseBody::MemoryGet { memory: vec![] }))
                .unwrap();
        // Drop the body and mark the reply as failed.
        frame.truncate(12);
        frame[2..6].copy_from_slice(&0u32.to_le_bytes());
        frame[7] = 0x80;
        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.error, 0x80);
        assert!(matches!(resp.body, ResponseBody::Unknown { type_code: 0x01, .. }));
    }

    #[test]
    fn short_body_fails() {
        assert!(matches!(
            ResponseBody::decode(rt::CHECKPOINT_INFO, &[0; 21]),
            Err(CodecError::Short { .. })
        ));
    }
}
