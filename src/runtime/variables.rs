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

use serde::Serialize;

use super::{DebugRuntime, Result, RuntimeError};
use crate::monitor::{Command, RegisterValue, ResponseBody};
use crate::symbols::{DebugInfo, Label};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct VariableData {
    pub name: String,
    pub value: String,
    pub address: Option<u16>,
    pub type_name: String,
}

/// Little-endian word, or a byte when only one is available.
pub fn render_word(bytes: &[u8]) -> String {
    match bytes {
        [lo, hi, ..] => format!("0x{:04x}", u16::from_le_bytes([*lo, *hi])),
        [b] => format!("0x{:02x}", b),
        [] => "??".to_string(),
    }
}

fn display_name(label: &Label) -> String {
    label
        .name
        .strip_prefix('_')
        .unwrap_or(&label.name)
        .to_string()
}

/// C globals: underscore labels outside the code segment.
fn is_global(info: &DebugInfo, label: &Label) -> bool {
    label.name.starts_with('_') && label.segment != info.code_segment
}

fn is_static_storage(info: &DebugInfo, label: &Label) -> bool {
    label
        .segment
        .map_or(false, |s| matches!(info.segments[s].name.as_str(), "BSS" | "DATA"))
}

impl DebugRuntime {
    /// Reads the C parameter stack pointer from zero page. The first value
    /// read is remembered as the bottom of the stack.
    pub(super) async fn update_param_stack(&self) -> Result<Option<u16>> {
        let info = self.info();
        let Some(zp) = info.zeropage_segment else {
            return Ok(None);
        };
        let pointer = info.segments[zp].range.start;
        let bytes = self
            .silenced(|| self.inner.transport.get_memory(pointer, 2))
            .await?;
        let &[lo, hi] = bytes.as_slice() else {
            return Ok(None);
        };
        let value = u16::from_le_bytes([lo, hi]);
        let mut state = self.state();
        state.param_stack_bottom.get_or_insert(value);
        state.param_stack_top = Some(value);
        Ok(Some(value))
    }

    async fn read_words(
        &self,
        vars: Vec<(String, u16)>,
        type_name: &str,
    ) -> Result<Vec<VariableData>> {
        if vars.is_empty() {
            return Ok(Vec::new());
        }
        let commands: Vec<Command> = vars
            .iter()
            .map(|&(_, a)| Command::memory_get(a, a.saturating_add(1)))
            .collect();
        let responses = self
            .silenced(|| self.inner.transport.exec_batch(&commands))
            .await?;
        Ok(vars
            .into_iter()
            .zip(responses)
            .map(|((name, address), response)| {
                let value = match response.body {
                    ResponseBody::MemoryGet { memory } => render_word(&memory),
                    _ => render_word(&[]),
                };
                VariableData {
                    name,
                    value,
                    address: Some(address),
                    type_name: type_name.to_string(),
                }
            })
            .collect())
    }

    /// Locals of the current function, read from the C parameter stack.
    pub async fn get_scope_variables(&self) -> Result<Vec<VariableData>> {
        let info = self.info();
        let Some(scope) = info.scope_at(self.current().0) else {
            return Ok(Vec::new());
        };
        let autos = &info.scopes[scope].autos;
        let Some(first) = autos.first().map(|a| a.offset) else {
            return Ok(Vec::new());
        };
        let Some(top) = self.update_param_stack().await? else {
            return Ok(Vec::new());
        };
        let vars = autos
            .iter()
            .map(|a| (a.name.clone(), top.wrapping_add((a.offset - first) as u16)))
            .collect();
        self.read_words(vars, "auto").await
    }

    pub async fn get_global_variables(&self) -> Result<Vec<VariableData>> {
        let info = self.info();
        let vars = info
            .labels
            .iter()
            .filter(|l| is_global(&info, l))
            .map(|l| (display_name(l), l.value))
            .collect();
        self.read_words(vars, "global").await
    }

    /// File and function statics of the current function.
    pub async fn get_static_variables(&self) -> Result<Vec<VariableData>> {
        let info = self.info();
        let Some(scope) = info.scope_at(self.current().0) else {
            return Ok(Vec::new());
        };
        let vars = info
            .labels
            .iter()
            .filter(|l| l.scope == Some(scope) && is_static_storage(&info, l))
            .map(|l| (display_name(l), l.value))
            .collect();
        self.read_words(vars, "static").await
    }

    pub async fn set_global_variable(&self, name: &str, value: u16) -> Result<VariableData> {
        let info = self.info();
        let wanted = format!("_{}", name);
        let address = info
            .labels
            .iter()
            .find(|l| l.name == wanted && is_global(&info, l))
            .map(|l| l.value)
            .ok_or_else(|| RuntimeError::UnknownVariable(name.to_string()))?;
        let bytes = value.to_le_bytes();
        self.silenced(|| self.inner.transport.set_memory(address, &bytes))
            .await?;
        Ok(VariableData {
            name: name.to_string(),
            value: render_word(&bytes),
            address: Some(address),
            type_name: "global".to_string(),
        })
    }

    /// Registers as the emulator names them.
    pub async fn get_register_variables(&self) -> Result<Vec<VariableData>> {
        let registers = self
            .silenced(|| self.inner.transport.registers_get())
            .await?;
        let meta = self.state().register_meta.clone();
        Ok(registers
            .iter()
            .filter_map(|r| {
                let m = meta.iter().find(|m| m.id == r.id)?;
                let value = if m.size > 8 {
                    format!("0x{:04x}", r.value)
                } else {
                    format!("0x{:02x}", r.value & 0xff)
                };
                Some(VariableData {
                    name: m.name.clone(),
                    value,
                    address: None,
                    type_name: format!("u{}", m.size),
                })
            })
            .collect())
    }

    pub async fn set_register(&self, name: &str, value: u16) -> Result<VariableData> {
        let meta = self
            .state()
            .register_meta
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| RuntimeError::InvalidRegister(name.to_string()))?;
        let registers = vec![RegisterValue { id: meta.id, value }];
        self.silenced(|| self.inner.transport.registers_set(registers))
            .await?;
        self.state().registers.set(&meta.name, value);
        if meta.name.eq_ignore_ascii_case("pc") {
            self.update_position(value);
        }
        Ok(VariableData {
            name: meta.name,
            value: format!("0x{:04x}", value),
            address: None,
            type_name: format!("u{}", meta.size),
        })
    }
}
