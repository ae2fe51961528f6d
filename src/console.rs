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

//! Line oriented command console. Each input line is one command; each reply
//! is one JSON object on stdout, interleaved with session events.

use serde_json::{json, Value};

use crate::runtime::{DebugRuntime, Result};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad number '{0}'")]
    Number(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Continue,
    Next,
    StepIn,
    StepOut,
    Pause,
    Stack,
    Break { file: String, lines: Vec<u32> },
    Clear { file: String },
    Condition { id: u32, condition: Option<String> },
    Breakpoints,
    Registers,
    SetRegister { name: String, value: u16 },
    Locals,
    Globals,
    Statics,
    SetGlobal { name: String, value: u16 },
    Memory { address: u16, length: usize },
    Write { address: u16, data: Vec<u8> },
    Disassemble { address: u16, length: usize },
    Key { text: String },
    Info,
    Terminate,
    Disconnect,
}

/// Accepts `$c000`, `0xc000` or decimal.
pub fn parse_number(text: &str) -> std::result::Result<u32, ParseError> {
    let parsed = if let Some(hex) = text.strip_prefix('$') {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| ParseError::Number(text.to_string()))
}

fn word(text: &str) -> std::result::Result<u16, ParseError> {
    u16::try_from(parse_number(text)?).map_err(|_| ParseError::Number(text.to_string()))
}

fn byte(text: &str) -> std::result::Result<u8, ParseError> {
    u8::try_from(parse_number(text)?).map_err(|_| ParseError::Number(text.to_string()))
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();
        let command = match (verb, args.as_slice()) {
            ("continue" | "c", []) => Self::Continue,
            ("next" | "n", []) => Self::Next,
            ("step" | "s", []) => Self::StepIn,
            ("finish" | "out", []) => Self::StepOut,
            ("pause", []) => Self::Pause,
            ("stack" | "bt", []) => Self::Stack,
            ("break" | "b", [file, lines @ ..]) if !lines.is_empty() => Self::Break {
                file: file.to_string(),
                lines: lines
                    .iter()
                    .map(|l| parse_number(l))
                    .collect::<std::result::Result<_, _>>()?,
            },
            ("break" | "b", _) => return Err(ParseError::Usage("break <file> <line>...")),
            ("clear", [file]) => Self::Clear {
                file: file.to_string(),
            },
            ("condition", [id, rest @ ..]) => Self::Condition {
                id: parse_number(id)?,
                condition: if rest.is_empty() {
                    None
                } else {
                    Some(rest.join(" "))
                },
            },
            ("breakpoints", []) => Self::Breakpoints,
            ("registers" | "regs", []) => Self::Registers,
            ("set-register", [name, value]) => Self::SetRegister {
                name: name.to_string(),
                value: word(value)?,
            },
            ("locals", []) => Self::Locals,
            ("globals", []) => Self::Globals,
            ("statics", []) => Self::Statics,
            ("set-global", [name, value]) => Self::SetGlobal {
                name: name.to_string(),
                value: word(value)?,
            },
            ("memory" | "m", [address, length]) => Self::Memory {
                address: word(address)?,
                length: parse_number(length)? as usize,
            },
            ("write", [address, data @ ..]) if !data.is_empty() => Self::Write {
                address: word(address)?,
                data: data
                    .iter()
                    .map(|b| byte(b))
                    .collect::<std::result::Result<_, _>>()?,
            },
            ("disasm" | "d", [address, length]) => Self::Disassemble {
                address: word(address)?,
                length: parse_number(length)? as usize,
            },
            ("key", [_, ..]) => Self::Key {
                text: args.join(" ").replace("\\n", "\n"),
            },
            ("info", []) => Self::Info,
            ("terminate" | "quit" | "q", []) => Self::Terminate,
            ("disconnect", []) => Self::Disconnect,
            (
                "continue" | "c" | "next" | "n" | "step" | "s" | "finish" | "out" | "pause"
                | "stack" | "bt" | "breakpoints" | "registers" | "regs" | "locals"
                | "globals" | "statics" | "info" | "terminate" | "quit" | "q"
                | "disconnect",
                _,
            ) => return Err(ParseError::Usage("this command takes no arguments")),
            ("clear", _) => return Err(ParseError::Usage("clear <file>")),
            ("condition", _) => return Err(ParseError::Usage("condition <id> [expression]")),
            ("set-register" | "set-global", _) => {
                return Err(ParseError::Usage("set-register|set-global <name> <value>"))
            }
            ("memory" | "m" | "disasm" | "d", _) => {
                return Err(ParseError::Usage("memory|disasm <address> <length>"))
            }
            ("write", _) => return Err(ParseError::Usage("write <address> <byte>...")),
            ("key", _) => return Err(ParseError::Usage("key <text>")),
            (other, _) => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// True for commands after which the console should stop reading.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Terminate | Self::Disconnect)
    }

    /// Runs the command and returns its JSON reply.
    pub async fn execute(self, runtime: &DebugRuntime) -> Result<Value> {
        let value = match self {
            Self::Continue => json!(runtime.resume().await?),
            Self::Next => json!(runtime.next().await?),
            Self::StepIn => json!(runtime.step_in().await?),
            Self::StepOut => json!(runtime.step_out().await?),
            Self::Pause => json!(runtime.pause().await?),
            Self::Stack => json!(runtime.stack()),
            Self::Break { file, lines } => json!(runtime.set_breakpoint(&file, &lines).await?),
            Self::Clear { file } => json!(runtime.clear_breakpoints(&file).await?),
            Self::Condition { id, condition } => {
                json!(runtime.set_breakpoint_condition(id, condition).await?)
            }
            Self::Breakpoints => json!(runtime.breakpoints()),
            Self::Registers => json!(runtime.get_register_variables().await?),
            Self::SetRegister { name, value } => json!(runtime.set_register(&name, value).await?),
            Self::Locals => json!(runtime.get_scope_variables().await?),
            Self::Globals => json!(runtime.get_global_variables().await?),
            Self::Statics => json!(runtime.get_static_variables().await?),
            Self::SetGlobal { name, value } => {
                json!(runtime.set_global_variable(&name, value).await?)
            }
            Self::Memory { address, length } => {
                json!(runtime.get_memory(address, length).await?)
            }
            Self::Write { address, data } => json!(runtime.set_memory(address, &data).await?),
            Self::Disassemble { address, length } => {
                json!(runtime.disassemble(address, length).await?)
            }
            Self::Key { text } => json!(runtime.keypress(&text).await?),
            Self::Info => json!(runtime.emulator_info().await?),
            Self::Terminate => json!(runtime.terminate().await),
            Self::Disconnect => json!(runtime.disconnect().await),
        };
        Ok(value)
    }
}
