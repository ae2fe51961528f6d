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

//! Table driven 6502 instruction walker.

use std::ops::ControlFlow;

use serde::Serialize;

use crate::symbols::{DebugInfo, MapRef, ScopeIdx, SpanIdx};

pub mod opcode {
    pub const JSR: u8 = 0x20;
    pub const RTS: u8 = 0x60;
    pub const JMP: u8 = 0x4c;
}

const ILLEGAL: i8 = -1;

/// Instruction length by opcode. 0x5E is the one illegal entry.
#[rustfmt::skip]
pub const OPCODE_SIZES: [i8; 256] = [
    1, 6, 1, 2, 2, 2, 2, 2, 1, 2, 1, 1, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 2, 3, 3, 3,
    3, 2, 1, 2, 2, 2, 2, 2, 1, 2, 1, 1, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, 3, 3,
    1, 2, 1, 2, 2, 2, 3, 2, 1, 2, 1, 1, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, -1, 3,
    1, 2, 1, 2, 2, 2, 2, 2, 1, 2, 1, 1, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, 3, 3,
    2, 2, 2, 2, 2, 2, 2, 2, 1, 2, 1, 2, 3, 3, 3, 3,
    2, 2, 1, 3, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, 3, 3,
    2, 2, 2, 2, 2, 2, 2, 2, 1, 2, 1, 1, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, 3, 3,
    2, 2, 2, 2, 2, 2, 2, 2, 1, 2, 1, 2, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, 3, 3,
    2, 2, 2, 3, 2, 2, 2, 2, 1, 2, 1, 1, 3, 3, 3, 3,
    2, 2, 1, 2, 2, 2, 2, 2, 1, 3, 1, 3, 3, 3, 3, 3,
];

#[rustfmt::skip]
pub const OPCODE_NAMES: [&str; 256] = [
    "BRK", "ORA", "KIL", "SLO", "NOP", "ORA", "ASL", "SLO", "PHP", "ORA", "ASL", "ANC", "NOP", "ORA", "ASL", "SLO",
    "BPL", "ORA", "KIL", "SLO", "NOP", "ORA", "ASL", "SLO", "CLC", "ORA", "NOP", "SLO", "NOP", "ORA", "ASL", "SLO",
    "JSR", "AND", "KIL", "RLA", "BIT", "AND", "ROL", "RLA", "PLP", "AND", "ROL", "ANC", "BIT", "AND", "ROL", "RLA",
    "BMI", "AND", "KIL", "RLA", "NOP", "AND", "ROL", "RLA", "SEC", "AND", "NOP", "RLA", "NOP", "AND", "ROL", "RLA",
    "RTI", "EOR", "KIL", "SRE", "NOP", "EOR", "LSR", "SRE", "PHA", "EOR", "LSR", "ALR", "JMP", "EOR", "LSR", "SRE",
    "BVC", "EOR", "KIL", "SRE", "NOP", "EOR", "LSR", "SRE", "CLI", "EOR", "NOP", "SRE", "NOP", "EOR", "LSR", "SRE",
    "RTS", "ADC", "KIL", "RRA", "NOP", "ADC", "ROR", "RRA", "PLA", "ADC", "ROR", "ARR", "JMP", "ADC", "ROR", "RRA",
    "BVS", "ADC", "KIL", "RRA", "NOP", "ADC", "ROR", "RRA", "SEI", "ADC", "NOP", "RRA", "NOP", "ADC", "ROR", "RRA",
    "NOP", "STA", "NOP", "SAX", "STY", "STA", "STX", "SAX", "DEY", "NOP", "TXA", "XAA", "STY", "STA", "STX", "SAX",
    "BCC", "STA", "KIL", "AHX", "STY", "STA", "STX", "SAX", "TYA", "STA", "TXS", "TAS", "SHY", "STA", "SHX", "AHX",
    "LDY", "LDA", "LDX", "LAX", "LDY", "LDA", "LDX", "LAX", "TAY", "LDA", "TAX", "LAX", "LDY", "LDA", "LDX", "LAX",
    "BCS", "LDA", "KIL", "LAX", "LDY", "LDA", "LDX", "LAX", "CLV", "LDA", "TSX", "LAS", "LDY", "LDA", "LDX", "LAX",
    "CPY", "CMP", "NOP", "DCP", "CPY", "CMP", "DEC", "DCP", "INY", "CMP", "DEX", "AXS", "CPY", "CMP", "DEC", "DCP",
    "BNE", "CMP", "KIL", "DCP", "NOP", "CMP", "DEC", "DCP", "CLD", "CMP", "NOP", "DCP", "NOP", "CMP", "DEC", "DCP",
    "CPX", "SBC", "NOP", "ISC", "CPX", "SBC", "INC", "ISC", "INX", "SBC", "NOP", "SBC", "CPX", "SBC", "INC", "ISC",
    "BEQ", "SBC", "KIL", "ISC", "NOP", "SBC", "INC", "ISC", "SED", "SBC", "NOP", "ISC", "NOP", "SBC", "INC", "ISC",
];

pub const MAX_OPCODE_SIZE: usize = 6;

/// Table length of an opcode, `None` for the illegal entry.
pub fn opcode_size(op: u8) -> Option<usize> {
    match OPCODE_SIZES[op as usize] {
        ILLEGAL => None,
        n => Some(n as usize),
    }
}

/// One decoded instruction. `operand` is truncated at the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: u8,
    pub operand: &'a [u8],
    pub offset: usize,
}

impl Instruction<'_> {
    pub fn is_legal(&self) -> bool {
        opcode_size(self.opcode).is_some()
    }

    /// Bytes the walker advances past this instruction.
    pub fn advance(&self) -> usize {
        opcode_size(self.opcode).unwrap_or(1)
    }

    pub fn mnemonic(&self) -> &'static str {
        OPCODE_NAMES[self.opcode as usize]
    }

    /// Little-endian 16-bit operand, if the instruction carries one.
    pub fn operand_word(&self) -> Option<u16> {
        match self.operand {
            [lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

pub fn decode_at(buf: &[u8], offset: usize) -> Option<Instruction<'_>> {
    let &opcode = buf.get(offset)?;
    let len = opcode_size(opcode).unwrap_or(1);
    let end = (offset + len).min(buf.len());
    Some(Instruction {
        opcode,
        operand: &buf[offset + 1..end.max(offset + 1)],
        offset,
    })
}

/// Walks instruction boundaries from the start of `buf` until the buffer is
/// exhausted or the visitor breaks. Illegal opcodes advance one byte.
pub fn scan<'a, B>(
    buf: &'a [u8],
    mut visitor: impl FnMut(Instruction<'a>) -> ControlFlow<B>,
) -> Option<B> {
    let mut cursor = 0;
    while let Some(ins) = decode_at(buf, cursor) {
        cursor += ins.advance();
        if let ControlFlow::Break(found) = visitor(ins) {
            return Some(found);
        }
    }
    None
}

/// Checks that the instructions in `memory` have, in order, the lengths the
/// symbols expect. Fails at the first mismatch, on an illegal opcode, or when
/// memory holds more instructions than expected.
pub fn verify_scope(expected_lengths: &[usize], memory: &[u8]) -> bool {
    let mut expected = expected_lengths.iter();
    scan(memory, |ins| match (expected.next(), opcode_size(ins.opcode)) {
        (Some(&want), Some(have)) if want == have => ControlFlow::Continue(()),
        _ => ControlFlow::Break(()),
    })
    .is_none()
}

/// Spans inside the scope's code span small enough to be one instruction,
/// one per address, ascending.
pub fn instruction_spans(info: &DebugInfo, scope: ScopeIdx) -> Vec<SpanIdx> {
    let Some(range) = info.scope_range(scope) else {
        return Vec::new();
    };
    let mut out: Vec<SpanIdx> = Vec::new();
    for (idx, span) in info.spans.iter().enumerate() {
        if !range.contains(span.address) || span.size as usize > MAX_OPCODE_SIZE {
            continue;
        }
        if out
            .last()
            .map_or(false, |&prev| info.spans[prev].address == span.address)
        {
            continue;
        }
        out.push(idx);
    }
    out.reverse();
    out
}

/// Verifies live memory of a scope against its instruction spans.
pub fn verify_scope_memory(info: &DebugInfo, scope: ScopeIdx, memory: &[u8]) -> bool {
    let lengths: Vec<usize> = instruction_spans(info, scope)
        .into_iter()
        .map(|s| info.spans[s].size as usize)
        .collect();
    verify_scope(&lengths, memory)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct ListingLine {
    pub address: u16,
    pub instruction: String,
    pub bytes: Vec<u8>,
    pub file: Option<String>,
    /// Zero based.
    pub line: Option<u32>,
}

/// Listing of `memory`, loaded at `start`. Word operands are annotated with
/// a label or a map export of the same value.
pub fn disassemble(memory: &[u8], start: u16, info: &DebugInfo, map: &[MapRef]) -> Vec<ListingLine> {
    let mut out = Vec::new();
    scan(memory, |ins| {
        let operand = match (ins.operand_word(), ins.operand) {
            (Some(word), _) => {
                let name = info
                    .labels_at(word)
                    .first()
                    .map(|&l| info.labels[l].name.as_str())
                    .or_else(|| {
                        map.iter()
                            .find(|m| m.function_address == word)
                            .map(|m| m.function_name.as_str())
                    });
                match name {
                    Some(name) => format!(" ${:04x} ; {}", word, name),
                    None => format!(" ${:04x}", word),
                }
            }
            (None, [byte]) => format!(" ${:02x}", byte),
            _ => String::new(),
        };
        let address = start.wrapping_add(ins.offset as u16);
        let line = info.line_at(address);
        let mut bytes = Vec::with_capacity(1 + ins.operand.len());
        bytes.push(ins.opcode);
        bytes.extend_from_slice(ins.operand);
        out.push(ListingLine {
            address,
            instruction: format!("{}{}", ins.mnemonic(), operand),
            bytes,
            file: line.and_then(|l| info.line_file(l)).map(|f| f.name.clone()),
            line: line.map(|l| info.lines[l].num),
        });
        ControlFlow::<()>::Continue(())
    });
    out
}
