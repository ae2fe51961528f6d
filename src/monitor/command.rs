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
use super::types::{command_type as ct, response_type as rt};
use super::{
    CheckpointSpec, CodecError, CpuOperation, DisplayFormat, MemSpace, RegisterValue, ResetMethod,
    ResourceValue,
};

/// Size byte written in front of every register item of a registers-set body.
const REGISTER_ITEM_SIZE: u8 = 3;

/// Commands understood by the binary monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MemoryGet {
        side_effects: bool,
        start: u16,
        end: u16,
        memspace: MemSpace,
        bank_id: u16,
    },
    MemorySet {
        side_effects: bool,
        start: u16,
        end: u16,
        memspace: MemSpace,
        bank_id: u16,
        data: Vec<u8>,
    },
    CheckpointGet {
        id: u32,
    },
    CheckpointSet(CheckpointSpec),
    CheckpointDelete {
        id: u32,
    },
    CheckpointList,
    CheckpointToggle {
        id: u32,
        enabled: bool,
    },
    ConditionSet {
        checkpoint_id: u32,
        condition: String,
    },
    RegistersGet {
        memspace: MemSpace,
    },
    RegistersSet {
        memspace: MemSpace,
        registers: Vec<RegisterValue>,
    },
    Dump {
        save_roms: bool,
        save_disks: bool,
        filename: String,
    },
    Undump {
        filename: String,
    },
    ResourceGet {
        name: String,
    },
    ResourceSet {
        name: String,
        value: ResourceValue,
    },
    AdvanceInstructions {
        step_over: bool,
        count: u16,
    },
    KeyboardFeed {
        text: String,
    },
    ExecuteUntilReturn,
    Ping,
    BanksAvailable,
    RegistersAvailable {
        memspace: MemSpace,
    },
    DisplayGet {
        use_vic_ii: bool,
        format: DisplayFormat,
    },
    EmulatorInfo,
    PaletteGet {
        use_vic_ii: bool,
    },
    /// Leave the monitor and resume execution.
    Exit,
    Quit,
    Reset {
        method: ResetMethod,
    },
    Autostart {
        run: bool,
        file_index: u16,
        filename: String,
    },
}

impl Command {
    pub fn memory_get(start: u16, end: u16) -> Self {
        Command::MemoryGet {
            side_effects: false,
            start,
            end,
            memspace: MemSpace::Main,
            bank_id: 0,
        }
    }

    pub fn memory_set(start: u16, data: Vec<u8>) -> Self {
        let end = start.wrapping_add(data.len().saturating_sub(1) as u16);
        Command::MemorySet {
            side_effects: false,
            start,
            end,
            memspace: MemSpace::Main,
            bank_id: 0,
            data,
        }
    }

    pub fn exec_checkpoint(address: u16, stop: bool) -> Self {
        Command::CheckpointSet(CheckpointSpec::at(address, CpuOperation::EXEC, stop))
    }

    pub fn command_type(&self) -> u8 {
        match self {
            Command::MemoryGet { .. } => ct::MEMORY_GET,
            Command::MemorySet { .. } => ct::MEMORY_SET,
            Command::CheckpointGet { .. } => ct::CHECKPOINT_GET,
            Command::CheckpointSet(_) => ct::CHECKPOINT_SET,
            Command::CheckpointDelete { .. } => ct::CHECKPOINT_DELETE,
            Command::CheckpointList => ct::CHECKPOINT_LIST,
            Command::CheckpointToggle { .. } => ct::CHECKPOINT_TOGGLE,
            Command::ConditionSet { .. } => ct::CONDITION_SET,
            Command::RegistersGet { .. } => ct::REGISTERS_GET,
            Command::RegistersSet { .. } => ct::REGISTERS_SET,
            Command::Dump { .. } => ct::DUMP,
            Command::Undump { .. } => ct::UNDUMP,
            Command::ResourceGet { .. } => ct::RESOURCE_GET,
            Command::ResourceSet { .. } => ct::RESOURCE_SET,
            Command::AdvanceInstructions { .. } => ct::ADVANCE_INSTRUCTIONS,
            Command::KeyboardFeed { .. } => ct::KEYBOARD_FEED,
            Command::ExecuteUntilReturn => ct::EXECUTE_UNTIL_RETURN,
            Command::Ping => ct::PING,
            Command::BanksAvailable => ct::BANKS_AVAILABLE,
            Command::RegistersAvailable { .. } => ct::REGISTERS_AVAILABLE,
            Command::DisplayGet { .. } => ct::DISPLAY_GET,
            Command::EmulatorInfo => ct::EMULATOR_INFO,
            Command::PaletteGet { .. } => ct::PALETTE_GET,
            Command::Exit => ct::EXIT,
            Command::Quit => ct::QUIT,
            Command::Reset { .. } => ct::RESET,
            Command::Autostart { .. } => ct::AUTOSTART,
        }
    }

    /// For commands answered by a stream of items, the type of the response
    /// that terminates the stream. Everything with the same request id that
    /// arrives before it is collected as `related`.
    pub fn terminal_response(&self) -> Option<u8> {
        match self {
            Command::CheckpointList => Some(rt::CHECKPOINT_LIST),
            _ => None,
        }
    }

    pub fn encode_body(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Command::MemoryGet {
                side_effects,
                start,
                end,
                memspace,
                bank_id,
            } => {
                put_bool(out, *side_effects);
                put_u16(out, *start);
                put_u16(out, *end);
                out.push(memspace.to_byte());
                put_u16(out, *bank_id);
            }
            Command::MemorySet {
                side_effects,
                start,
                end,
                memspace,
                bank_id,
                data,
            } => {
                put_bool(out, *side_effects);
                put_u16(out, *start);
                put_u16(out, *end);
                out.push(memspace.to_byte());
                put_u16(out, *bank_id);
                out.extend_from_slice(data);
            }
            Command::CheckpointGet { id } | Command::CheckpointDelete { id } => put_u32(out, *id),
            Command::CheckpointSet(spec) => {
                put_u16(out, spec.start);
                put_u16(out, spec.end);
                put_bool(out, spec.stop);
                put_bool(out, spec.enabled);
                out.push(spec.operation.0);
                put_bool(out, spec.temporary);
            }
            Command::CheckpointToggle { id, enabled } => {
                put_u32(out, *id);
                put_bool(out, *enabled);
            }
            Command::ConditionSet {
                checkpoint_id,
                condition,
            } => {
                put_u32(out, *checkpoint_id);
                put_short_string(out, condition, "condition")?;
            }
            Command::RegistersGet { memspace } | Command::RegistersAvailable { memspace } => {
                out.push(memspace.to_byte())
            }
            Command::RegistersSet {
                memspace,
                registers,
            } => {
                out.push(memspace.to_byte());
                put_u16(out, registers.len() as u16);
                for reg in registers {
                    out.push(REGISTER_ITEM_SIZE);
                    out.push(reg.id);
                    put_u16(out, reg.value);
                }
            }
            Command::Dump {
                save_roms,
                save_disks,
                filename,
            } => {
                put_bool(out, *save_roms);
                put_bool(out, *save_disks);
                put_short_string(out, filename, "filename")?;
            }
            Command::Undump { filename } => put_short_string(out, filename, "filename")?,
            Command::ResourceGet { name } => put_short_string(out, name, "resource name")?,
            Command::ResourceSet { name, value } => {
                out.push(value.type_byte());
                put_short_string(out, name, "resource name")?;
                match value {
                    ResourceValue::Int(v) => {
                        out.push(4);
                        put_u32(out, *v);
                    }
                    ResourceValue::String(s) => put_short_string(out, s, "resource value")?,
                }
            }
            Command::AdvanceInstructions { step_over, count } => {
                put_bool(out, *step_over);
                put_u16(out, *count);
            }
            Command::KeyboardFeed { text } => put_short_string(out, text, "keyboard text")?,
            Command::DisplayGet { use_vic_ii, format } => {
                put_bool(out, *use_vic_ii);
                out.push(format.to_byte());
            }
            Command::PaletteGet { use_vic_ii } => put_bool(out, *use_vic_ii),
            Command::Reset { method } => out.push(method.to_byte()),
            Command::Autostart {
                run,
                file_index,
                filename,
            } => {
                put_bool(out, *run);
                put_u16(out, *file_index);
                put_short_string(out, filename, "filename")?;
            }
            Command::CheckpointList
            | Command::ExecuteUntilReturn
            | Command::Ping
            | Command::BanksAvailable
            | Command::EmulatorInfo
            | Command::Exit
            | Command::Quit => {}
        }
        Ok(())
    }

    /// Inverse of [`Command::encode_body`]. Used by monitor-side peers.
    pub fn decode(command_type: u8, body: &[u8]) -> Result<Command, CodecError> {
        let mut r = ByteReader::new(body);
        let cmd = match command_type {
            ct::MEMORY_GET | ct::MEMORY_SET => {
                let side_effects = r.bool()?;
                let start = r.u16()?;
                let end = r.u16()?;
                let memspace = MemSpace::from_byte(r.u8()?)?;
                let bank_id = r.u16()?;
                if command_type == ct::MEMORY_GET {
                    Command::MemoryGet {
                        side_effects,
                        start,
                        end,
                        memspace,
                        bank_id,
                    }
                } else {
                    Command::MemorySet {
                        side_effects,
                        start,
                        end,
                        memspace,
                        bank_id,
                        data: r.rest(),
                    }
                }
            }
            ct::CHECKPOINT_GET => Command::CheckpointGet { id: r.u32()? },
            ct::CHECKPOINT_SET => Command::CheckpointSet(CheckpointSpec {
                start: r.u16()?,
                end: r.u16()?,
                stop: r.bool()?,
                enabled: r.bool()?,
                operation: CpuOperation(r.u8()?),
                temporary: r.bool()?,
            }),
            ct::CHECKPOINT_DELETE => Command::CheckpointDelete { id: r.u32()? },
            ct::CHECKPOINT_LIST => Command::CheckpointList,
            ct::CHECKPOINT_TOGGLE => Command::CheckpointToggle {
                id: r.u32()?,
                enabled: r.bool()?,
            },
            ct::CONDITION_SET => Command::ConditionSet {
                checkpoint_id: r.u32()?,
                condition: r.short_string()?,
            },
            ct::REGISTERS_GET => Command::RegistersGet {
                memspace: MemSpace::from_byte(r.u8()?)?,
            },
            ct::REGISTERS_SET => {
                let memspace = MemSpace::from_byte(r.u8()?)?;
                let count = r.u16()?;
                let mut registers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let start = r.position();
                    let size = r.u8()? as usize;
                    let id = r.u8()?;
                    let value = r.u16()?;
                    registers.push(RegisterValue { id, value });
                    r.seek(start + size + 1);
                }
                Command::RegistersSet {
                    memspace,
                    registers,
                }
            }
            ct::DUMP => Command::Dump {
                save_roms: r.bool()?,
                save_disks: r.bool()?,
                filename: r.short_string()?,
            },
            ct::UNDUMP => Command::Undump {
                filename: r.short_string()?,
            },
            ct::RESOURCE_GET => Command::ResourceGet {
                name: r.short_string()?,
            },
            ct::RESOURCE_SET => {
                let kind = r.u8()?;
                let name = r.short_string()?;
                let len = r.u8()? as usize;
                let value = match kind {
                    ResourceValue::TYPE_INT => {
                        if len != 4 {
                            return Err(CodecError::InvalidValue("int resource length", len as u32));
                        }
                        ResourceValue::Int(r.u32()?)
                    }
                    ResourceValue::TYPE_STRING => ResourceValue::String(r.ascii(len)?),
                    other => return Err(CodecError::InvalidValue("resource type", other as u32)),
                };
                Command::ResourceSet { name, value }
            }
            ct::ADVANCE_INSTRUCTIONS => Command::AdvanceInstructions {
                step_over: r.bool()?,
                count: r.u16()?,
            },
            ct::KEYBOARD_FEED => Command::KeyboardFeed {
                text: r.short_string()?,
            },
            ct::EXECUTE_UNTIL_RETURN => Command::ExecuteUntilReturn,
            ct::PING => Command::Ping,
            ct::BANKS_AVAILABLE => Command::BanksAvailable,
            ct::REGISTERS_AVAILABLE => Command::RegistersAvailable {
                memspace: MemSpace::from_byte(r.u8()?)?,
            },
            ct::DISPLAY_GET => Command::DisplayGet {
                use_vic_ii: r.bool()?,
                format: DisplayFormat::from_byte(r.u8()?)?,
            },
            ct::EMULATOR_INFO => Command::EmulatorInfo,
            ct::PALETTE_GET => Command::PaletteGet {
                use_vic_ii: r.bool()?,
            },
            ct::EXIT => Command::Exit,
            ct::QUIT => Command::Quit,
            ct::RESET => Command::Reset {
                method: ResetMethod::from_byte(r.u8()?)?,
            },
            ct::AUTOSTART => Command::Autostart {
                run: r.bool()?,
                file_index: r.u16()?,
                filename: r.short_string()?,
            },
            other => return Err(CodecError::UnknownCommand(other)),
        };
        Ok(cmd)
    }
}
