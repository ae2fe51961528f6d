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

//! Read-only symbol graph of the debugged program.
//!
//! The graph is cyclic in nature (a scope owns spans, spans own lines, lines
//! point back at spans and files). It is stored as flat arenas and every
//! cross reference is an index into one of them, resolved once at load from
//! the ids of the JSON document.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::memory::AddressRange;
use crate::utils::canonicalize_path;

pub type SegIdx = usize;
pub type SpanIdx = usize;
pub type FileIdx = usize;
pub type LineIdx = usize;
pub type ScopeIdx = usize;
pub type LabelIdx = usize;

pub const CODE_SEGMENT: &str = "CODE";
pub const ZEROPAGE_SEGMENT: &str = "ZEROPAGE";
pub const MAIN_SCOPE: &str = "_main";

#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    #[error("cannot read symbol document: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed symbol document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{what} {id} refers to missing {target} {target_id}")]
    Dangling {
        what: &'static str,
        id: u32,
        target: &'static str,
        target_id: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    #[default]
    Unknown,
    Nes,
    C128,
    Cbm5x0,
    Pet,
    Plus4,
    Vic20,
    C64,
    Apple2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    C,
    Asm,
    Unknown,
}

impl FileKind {
    pub fn from_path(name: &str) -> Self {
        match Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("c") | Some("h") => FileKind::C,
            Some("s") | Some("asm") | Some("inc") => FileKind::Asm,
            _ => FileKind::Unknown,
        }
    }
}

// Document records, as written by the symbol file converter.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: u32,
    pub name: String,
    pub start: u16,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: u32,
    #[serde(default)]
    pub segment: Option<u32>,
    /// Relative to the segment start.
    pub start: u32,
    pub size: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub kind: Option<FileKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRecord {
    pub id: u32,
    #[serde(default)]
    pub file: Option<u32>,
    #[serde(default)]
    pub span: Option<u32>,
    /// Zero based.
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRecord {
    pub name: String,
    pub offset: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRecord {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub spans: Vec<u32>,
    #[serde(default)]
    pub autos: Vec<AutoRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRecord {
    pub name: String,
    pub value: u16,
    #[serde(default)]
    pub scope: Option<u32>,
    #[serde(default)]
    pub segment: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugInfoDocument {
    #[serde(default)]
    pub segments: Vec<SegmentRecord>,
    #[serde(default)]
    pub spans: Vec<SpanRecord>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub lines: Vec<LineRecord>,
    #[serde(default)]
    pub scopes: Vec<ScopeRecord>,
    #[serde(default)]
    pub labels: Vec<LabelRecord>,
    #[serde(default)]
    pub machine_type: MachineType,
}

/// A runtime helper export from the linker map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapRef {
    pub function_name: String,
    pub function_address: u16,
}

// Resolved graph.

#[derive(Debug, Clone)]
pub struct Segment {
    pub id: u32,
    pub name: String,
    pub range: AddressRange,
}

#[derive(Debug, Clone)]
pub struct Span {
    pub id: u32,
    pub segment: Option<SegIdx>,
    pub address: u16,
    pub size: u16,
    /// Lines of this span plus every line whose span starts inside it,
    /// C lines first, then by line number.
    pub lines: Vec<LineIdx>,
}

impl Span {
    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.address, self.size as u32)
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: u32,
    pub name: String,
    pub kind: FileKind,
    pub lines: Vec<LineIdx>,
}

#[derive(Debug, Clone)]
pub struct SourceLine {
    pub id: u32,
    pub file: Option<FileIdx>,
    pub span: Option<SpanIdx>,
    pub num: u32,
}

#[derive(Debug, Clone)]
pub struct Auto {
    pub name: String,
    pub offset: i32,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: u32,
    pub name: String,
    pub size: u32,
    pub spans: Vec<SpanIdx>,
    /// The span of this scope inside the code segment.
    pub code_span: Option<SpanIdx>,
    /// Ascending by offset.
    pub autos: Vec<Auto>,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub value: u16,
    pub scope: Option<ScopeIdx>,
    pub segment: Option<SegIdx>,
}

#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub segments: Vec<Segment>,
    /// Descending by address, then ascending by size.
    pub spans: Vec<Span>,
    pub files: Vec<SourceFile>,
    pub lines: Vec<SourceLine>,
    /// Scopes with code first, descending by address.
    pub scopes: Vec<Scope>,
    pub labels: Vec<Label>,
    pub machine_type: MachineType,
    pub code_segment: Option<SegIdx>,
    pub zeropage_segment: Option<SegIdx>,
    pub main_scope: Option<ScopeIdx>,
    pub main_label: Option<LabelIdx>,
    pub entry_address: u16,
    labels_by_value: BTreeMap<u16, Vec<LabelIdx>>,
}

fn index_of(
    ids: &HashMap<u32, usize>,
    what: &'static str,
    id: u32,
    target: &'static str,
    target_id: u32,
) -> Result<usize, SymbolError> {
    ids.get(&target_id).copied().ok_or(SymbolError::Dangling {
        what,
        id,
        target,
        target_id,
    })
}

impl DebugInfo {
    pub fn load(path: &Path) -> Result<Self, SymbolError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SymbolError> {
        let doc: DebugInfoDocument = serde_json::from_str(text)?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: DebugInfoDocument) -> Result<Self, SymbolError> {
        let segments: Vec<Segment> = doc
            .segments
            .iter()
            .map(|s| Segment {
                id: s.id,
                name: s.name.clone(),
                range: AddressRange::new(s.start, s.size),
            })
            .collect();
        let seg_ids: HashMap<u32, usize> =
            segments.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

        let mut spans = Vec::with_capacity(doc.spans.len());
        for s in &doc.spans {
            let (segment, base) = match s.segment {
                Some(seg) => {
                    let idx = index_of(&seg_ids, "span", s.id, "segment", seg)?;
                    (Some(idx), segments[idx].range.start as u32)
                }
                None => (None, 0),
            };
            spans.push(Span {
                id: s.id,
                segment,
                address: (base + s.start).min(0xffff) as u16,
                size: s.size,
                lines: Vec::new(),
            });
        }
        spans.sort_by(|a, b| b.address.cmp(&a.address).then(a.size.cmp(&b.size)));
        let span_ids: HashMap<u32, usize> =
            spans.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

        let mut files: Vec<SourceFile> = doc
            .files
            .iter()
            .map(|f| SourceFile {
                id: f.id,
                name: f.name.clone(),
                kind: f.kind.unwrap_or_else(|| FileKind::from_path(&f.name)),
                lines: Vec::new(),
            })
            .collect();
        let file_ids: HashMap<u32, usize> =
            files.iter().enumerate().map(|(i, f)| (f.id, i)).collect();

        let mut lines = Vec::with_capacity(doc.lines.len());
        for l in &doc.lines {
            let file = l
                .file
                .map(|f| index_of(&file_ids, "line", l.id, "file", f))
                .transpose()?;
            let span = l
                .span
                .map(|s| index_of(&span_ids, "line", l.id, "span", s))
                .transpose()?;
            lines.push(SourceLine {
                id: l.id,
                file,
                span,
                num: l.line,
            });
        }

        for (idx, line) in lines.iter().enumerate() {
            if let Some(file) = line.file {
                files[file].lines.push(idx);
            }
            let Some(own) = line.span else { continue };
            let addr = spans[own].address;
            for span in spans.iter_mut() {
                if span.range().contains(addr) && !span.lines.contains(&idx) {
                    span.lines.push(idx);
                }
            }
        }

        let line_key = |idx: &LineIdx| {
            let line = &lines[*idx];
            let not_c = line
                .file
                .map_or(false, |f| files[f].kind != FileKind::C);
            (not_c, line.num)
        };
        for span in spans.iter_mut() {
            span.lines.sort_by_key(line_key);
        }
        let mut file_lines: Vec<Vec<LineIdx>> = files.iter().map(|f| f.lines.clone()).collect();
        for fl in file_lines.iter_mut() {
            fl.sort_by_key(line_key);
        }
        for (file, fl) in files.iter_mut().zip(file_lines) {
            file.lines = fl;
        }

        let code_segment = segments.iter().position(|s| s.name == CODE_SEGMENT);
        let zeropage_segment = segments.iter().position(|s| s.name == ZEROPAGE_SEGMENT);

        let mut scopes = Vec::with_capacity(doc.scopes.len());
        for s in &doc.scopes {
            let mut scope_spans = Vec::with_capacity(s.spans.len());
            for &span in &s.spans {
                scope_spans.push(index_of(&span_ids, "scope", s.id, "span", span)?);
            }
            let code_span = scope_spans
                .iter()
                .copied()
                .find(|&sp| code_segment.is_some() && spans[sp].segment == code_segment);
            let mut autos: Vec<Auto> = s
                .autos
                .iter()
                .map(|a| Auto {
                    name: a.name.clone(),
                    offset: a.offset,
                })
                .collect();
            autos.sort_by_key(|a| a.offset);
            scopes.push(Scope {
                id: s.id,
                name: s.name.clone(),
                size: s.size,
                spans: scope_spans,
                code_span,
                autos,
            });
        }
        scopes.sort_by_key(|s| match s.code_span {
            Some(cs) => (
                0,
                std::cmp::Reverse(spans[cs].address),
                spans[cs].size,
                std::cmp::Reverse(s.autos.len()),
            ),
            None => (1, std::cmp::Reverse(0), 0, std::cmp::Reverse(s.autos.len())),
        });
        let scope_ids: HashMap<u32, usize> =
            scopes.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

        let mut labels = Vec::with_capacity(doc.labels.len());
        for (i, l) in doc.labels.iter().enumerate() {
            let id = i as u32;
            labels.push(Label {
                name: l.name.clone(),
                value: l.value,
                scope: l
                    .scope
                    .map(|s| index_of(&scope_ids, "label", id, "scope", s))
                    .transpose()?,
                segment: l
                    .segment
                    .map(|s| index_of(&seg_ids, "label", id, "segment", s))
                    .transpose()?,
            });
        }
        let mut labels_by_value: BTreeMap<u16, Vec<LabelIdx>> = BTreeMap::new();
        for (i, l) in labels.iter().enumerate() {
            labels_by_value.entry(l.value).or_default().push(i);
        }

        let main_scope = scopes.iter().position(|s| s.name == MAIN_SCOPE);
        let main_label = labels.iter().position(|l| l.name == MAIN_SCOPE);
        let entry_address = match (main_label, code_segment) {
            (Some(l), _) => labels[l].value,
            (None, Some(seg)) => segments[seg].range.start,
            (None, None) => 0,
        };

        Ok(Self {
            segments,
            spans,
            files,
            lines,
            scopes,
            labels,
            machine_type: doc.machine_type,
            code_segment,
            zeropage_segment,
            main_scope,
            main_label,
            entry_address,
            labels_by_value,
        })
    }

    pub fn code_range(&self) -> Option<AddressRange> {
        self.code_segment.map(|s| self.segments[s].range)
    }

    pub fn segment_named(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn scope_named(&self, name: &str) -> Option<ScopeIdx> {
        self.scopes.iter().position(|s| s.name == name)
    }

    /// Address range of the scope's code span.
    pub fn scope_range(&self, scope: ScopeIdx) -> Option<AddressRange> {
        self.scopes[scope].code_span.map(|s| self.spans[s].range())
    }

    /// The innermost scope whose code span contains `addr`.
    pub fn scope_at(&self, addr: u16) -> Option<ScopeIdx> {
        (0..self.scopes.len())
            .filter_map(|i| self.scope_range(i).map(|r| (i, r)))
            .filter(|(_, r)| r.contains(addr))
            .min_by_key(|(_, r)| r.size)
            .map(|(i, _)| i)
    }

    pub fn line_address(&self, line: LineIdx) -> Option<u16> {
        self.lines[line].span.map(|s| self.spans[s].address)
    }

    pub fn line_file(&self, line: LineIdx) -> Option<&SourceFile> {
        self.lines[line].file.map(|f| &self.files[f])
    }

    pub fn is_c_line(&self, line: LineIdx) -> bool {
        self.line_file(line).map_or(false, |f| f.kind == FileKind::C)
    }

    /// First line of the span, preferring lines that belong to a file.
    pub fn span_line(&self, span: SpanIdx) -> Option<LineIdx> {
        let lines = &self.spans[span].lines;
        lines
            .iter()
            .copied()
            .find(|&l| self.lines[l].file.is_some())
            .or_else(|| lines.first().copied())
    }

    /// The source line shown for a program counter: the closest span at or
    /// below `addr` that carries a line with a file.
    pub fn line_at(&self, addr: u16) -> Option<LineIdx> {
        let span = self
            .spans
            .iter()
            .position(|s| {
                s.address <= addr && s.lines.iter().any(|&l| self.lines[l].file.is_some())
            })
            .or(if self.spans.is_empty() { None } else { Some(0) })?;
        self.span_line(span)
    }

    /// Looks a source file up by path, canonicalising both sides, then by
    /// trailing path components.
    pub fn file_by_path(&self, path: &str) -> Option<FileIdx> {
        if let Some(i) = self.files.iter().position(|f| f.name == path) {
            return Some(i);
        }
        let wanted = canonicalize_path(path);
        if let Some(i) = self
            .files
            .iter()
            .position(|f| canonicalize_path(&f.name) == wanted)
        {
            return Some(i);
        }
        self.files.iter().position(|f| {
            let name = f.name.replace('\\', "/");
            wanted.ends_with(&format!("/{}", name.trim_start_matches("./")))
        })
    }

    pub fn labels_at(&self, value: u16) -> &[LabelIdx] {
        self.labels_by_value
            .get(&value)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Nearest label at or below `addr`, with the distance to it.
    pub fn symbolize(&self, addr: u16) -> Option<(&Label, u16)> {
        let (&value, idxs) = self.labels_by_value.range(..=addr).next_back()?;
        let label = &self.labels[*idxs.first()?];
        Some((label, addr - value))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    /// A three function program:
    ///
    /// ```text
    /// _main 0800  L6  lda #0
    ///       0802  L7  jsr _foo
    ///       0805  L8  lda #1
    ///       0807  L9  rts
    /// _foo  0810  L12 lda #2
    ///       0812  L13 rts
    /// _bar  0818  L16 ldx #0
    ///       081a  L17 rts
    /// ```
    pub fn three_functions() -> DebugInfoDocument {
        serde_json::from_value(json!({
            "machine_type": "c64",
            "segments": [
                {"id": 0, "name": "CODE", "start": 0x0800, "size": 0x30},
                {"id": 1, "name": "ZEROPAGE", "start": 0x02, "size": 0x1a},
                {"id": 2, "name": "BSS", "start": 0x0900, "size": 0x10},
                {"id": 3, "name": "DATA", "start": 0x0910, "size": 0x10}
            ],
            "spans": [
                {"id": 0, "segment": 0, "start": 0x00, "size": 8},
                {"id": 1, "segment": 0, "start": 0x00, "size": 2},
                {"id": 2, "segment": 0, "start": 0x02, "size": 3},
                {"id": 3, "segment": 0, "start": 0x05, "size": 2},
                {"id": 4, "segment": 0, "start": 0x07, "size": 1},
                {"id": 5, "segment": 0, "start": 0x10, "size": 3},
                {"id": 6, "segment": 0, "start": 0x10, "size": 2},
                {"id": 7, "segment": 0, "start": 0x12, "size": 1},
                {"id": 8, "segment": 0, "start": 0x18, "size": 3},
                {"id": 9, "segment": 0, "start": 0x18, "size": 2},
                {"id": 10, "segment": 0, "start": 0x1a, "size": 1}
            ],
            "files": [
                {"id": 0, "name": "main.c"},
                {"id": 1, "name": "crt0.s"}
            ],
            "lines": [
                {"id": 0, "file": 0, "span": 1, "line": 6},
                {"id": 1, "file": 0, "span": 2, "line": 7},
                {"id": 2, "file": 0, "span": 3, "line": 8},
                {"id": 3, "file": 0, "span": 4, "line": 9},
                {"id": 4, "file": 0, "span": 6, "line": 12},
                {"id": 5, "file": 0, "span": 7, "line": 13},
                {"id": 6, "file": 0, "span": 9, "line": 16},
                {"id": 7, "file": 0, "span": 10, "line": 17},
                {"id": 8, "file": 1, "line": 3}
            ],
            "scopes": [
                {"id": 0, "name": "_main", "size": 8, "spans": [0]},
                {"id": 1, "name": "_foo", "size": 3, "spans": [5],
                 "autos": [{"name": "b", "offset": 2}, {"name": "a", "offset": 0}]},
                {"id": 2, "name": "_bar", "size": 3, "spans": [8]},
                {"id": 3, "name": "", "size": 0}
            ],
            "labels": [
                {"name": "_main", "value": 0x0800, "scope": 0, "segment": 0},
                {"name": "_foo", "value": 0x0810, "scope": 1, "segment": 0},
                {"name": "_bar", "value": 0x0818, "scope": 2, "segment": 0},
                {"name": "_counter", "value": 0x0900, "segment": 2},
                {"name": "_state", "value": 0x0910, "scope": 1, "segment": 3},
                {"name": "sp", "value": 0x02, "segment": 1}
            ]
        }))
        .expect("fixture document")
    }

    pub fn three_functions_info() -> DebugInfo {
        DebugInfo::from_document(three_functions()).expect("fixture resolves")
    }
}
