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

//! Call stack reconstruction for code without frame pointers.
//!
//! Function entries, exits and call sites are found by scanning each C
//! function's bytes in emulator memory. Each of those addresses then gets a
//! non-stopping exec checkpoint, and the hits of those checkpoints, replayed
//! in order, push and pop frames. Every entry additionally gets a disabled
//! stop checkpoint that step-in enables for the duration of one step.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

use crate::checkpoints::CheckpointCategory;
use crate::disasm::{opcode, scan};
use crate::memory::AddressRange;
use crate::monitor::{CheckpointInfo, CheckpointSpec, CpuOperation};
use crate::symbols::{DebugInfo, FileKind, LineIdx, MapRef, ScopeIdx};
use crate::transport::{MonitorTransport, Result, TransportError};

/// Trace hits buffered before a forced flush.
pub const TRACE_QUEUE_LEN: usize = 1000;

/// Runtime helpers that unwind the C parameter stack (`incsp2`, `addysp`, ...).
const STACK_HELPER_PATTERN: &str = r"(?i)^[^_].*sp[0-9]?$";

fn stack_helper_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STACK_HELPER_PATTERN).ok()).as_ref()
}

pub fn is_stack_helper(name: &str) -> bool {
    stack_helper_re().map_or(false, |re| re.is_match(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeAddress {
    pub scope: ScopeIdx,
    pub address: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackChanges {
    pub starts: Vec<ScopeAddress>,
    pub ends: Vec<ScopeAddress>,
    pub jumps: Vec<ScopeAddress>,
}

impl StackChanges {
    fn extend(&mut self, other: StackChanges) {
        self.starts.extend(other.starts);
        self.ends.extend(other.ends);
        self.jumps.extend(other.jumps);
    }
}

fn dedup_by_address(items: &mut Vec<ScopeAddress>) {
    let mut seen = HashSet::new();
    items.retain(|x| seen.insert(x.address));
}

struct ScopeScan {
    exits: Vec<ScopeAddress>,
    jumps: Vec<ScopeAddress>,
    descendants: Vec<ScopeIdx>,
}

struct Discovery<'a> {
    info: &'a DebugInfo,
    helpers: Vec<u16>,
    code: AddressRange,
    code_mem: &'a [u8],
}

impl<'a> Discovery<'a> {
    fn new(info: &'a DebugInfo, map: &[MapRef], code_mem: &'a [u8]) -> Option<Self> {
        let code = info.code_range()?;
        let helpers = map
            .iter()
            .filter(|m| is_stack_helper(&m.function_name))
            .map(|m| m.function_address)
            .collect();
        Some(Self {
            info,
            helpers,
            code,
            code_mem,
        })
    }

    fn scope_memory(&self, range: AddressRange) -> &'a [u8] {
        let from = (range.start as usize).saturating_sub(self.code.start as usize);
        let to = (from + range.size as usize).min(self.code_mem.len());
        self.code_mem.get(from..to).unwrap_or(&[])
    }

    fn resolve_jump(&self, target: u16, search: ScopeIdx, parent: ScopeIdx) -> Option<ScopeIdx> {
        let info = self.info;
        info.scopes
            .iter()
            .position(|s| s.spans.iter().any(|&sp| info.spans[sp].address == target))
            .or_else(|| {
                info.labels_at(target)
                    .iter()
                    .filter_map(|&l| info.labels[l].scope)
                    .find(|&s| s != parent && s != search)
            })
    }

    fn scan_scope(&self, search: ScopeIdx, parent: ScopeIdx, range: AddressRange) -> ScopeScan {
        let info = self.info;
        let begin = range.start;
        let mut out = ScopeScan {
            exits: Vec::new(),
            jumps: Vec::new(),
            descendants: Vec::new(),
        };
        scan(self.scope_memory(range), |ins| {
            let at = begin.wrapping_add(ins.offset as u16);
            match (ins.opcode, ins.operand_word()) {
                (opcode::JMP, Some(target)) if self.helpers.contains(&target) => {
                    out.exits.push(ScopeAddress {
                        scope: parent,
                        address: at,
                    });
                }
                (opcode::JMP, Some(target)) if !range.contains(target) => {
                    // The segment end itself still counts as inside.
                    let in_code =
                        self.code.start <= target && (target as u32) <= self.code.end();
                    if in_code {
                        if let Some(next) = self.resolve_jump(target, search, parent) {
                            out.descendants.push(next);
                        }
                    }
                }
                (opcode::RTS, _) => out.exits.push(ScopeAddress {
                    scope: parent,
                    address: at,
                }),
                (opcode::JSR, Some(target)) => {
                    let callee = (0..info.scopes.len())
                        .find(|&s| info.scope_range(s).map_or(false, |r| r.start == target));
                    if let Some(callee) = callee {
                        out.jumps.push(ScopeAddress {
                            scope: callee,
                            address: at,
                        });
                    }
                }
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });
        out
    }

    /// Nearest span at or below `address` that carries a C line.
    fn c_line_address(&self, address: u16) -> Option<u16> {
        let info = self.info;
        info.spans
            .iter()
            .find(|s| s.address <= address && s.lines.iter().any(|&l| info.is_c_line(l)))
            .map(|s| s.address)
    }

    fn frames_for_scope(
        &self,
        search: ScopeIdx,
        parent: ScopeIdx,
        visited: &mut HashSet<ScopeIdx>,
    ) -> Option<StackChanges> {
        let info = self.info;
        if !info.scopes[parent].name.starts_with('_') {
            return None;
        }
        let range = info.scope_range(search)?;
        if !visited.insert(search) {
            return None;
        }

        let found = self.scan_scope(search, parent, range);
        let mut ends = found.exits;
        let mut jumps = found.jumps;
        for jump in jumps.iter_mut() {
            if let Some(address) = self.c_line_address(jump.address) {
                jump.address = address;
            }
        }
        for descendant in found.descendants {
            if let Some(nested) = self.frames_for_scope(descendant, parent, visited) {
                ends.extend(nested.ends);
            }
        }

        let start = info
            .lines
            .iter()
            .filter_map(|l| l.span.map(|s| info.spans[s].address))
            .filter(|&a| a >= range.start)
            .min()
            .unwrap_or(range.start);

        if ends.is_empty() {
            if let Some(parent_range) = info.scope_range(parent) {
                if let Some(span) = info.spans.iter().find(|s| parent_range.contains(s.address)) {
                    ends.push(ScopeAddress {
                        scope: parent,
                        address: span.address,
                    });
                }
            }
        }

        dedup_by_address(&mut ends);
        dedup_by_address(&mut jumps);
        Some(StackChanges {
            starts: vec![ScopeAddress {
                scope: parent,
                address: start,
            }],
            ends,
            jumps,
        })
    }
}

/// Entries, exits and call sites of every C function, from the bytes of the
/// code segment as loaded in the emulator.
pub fn discover(info: &DebugInfo, map: &[MapRef], code_mem: &[u8]) -> StackChanges {
    let mut all = StackChanges::default();
    let Some(discovery) = Discovery::new(info, map, code_mem) else {
        return all;
    };
    for scope in 0..info.scopes.len() {
        let mut visited = HashSet::new();
        if let Some(changes) = discovery.frames_for_scope(scope, scope, &mut visited) {
            all.extend(changes);
        }
    }
    all
}

/// Exit points of one function, following tail jumps into other functions.
pub fn scope_exits(info: &DebugInfo, map: &[MapRef], code_mem: &[u8], scope: ScopeIdx) -> Vec<u16> {
    Discovery::new(info, map, code_mem)
        .and_then(|d| d.frames_for_scope(scope, scope, &mut HashSet::new()))
        .map(|c| c.ends.into_iter().map(|e| e.address).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub scope: ScopeIdx,
    pub line: Option<LineIdx>,
}

#[derive(Debug, Clone, Copy)]
struct TraceHit {
    id: u32,
    address: u16,
}

/// Bookkeeping of the trace checkpoints and the frames rebuilt from them.
#[derive(Debug, Default)]
pub struct FrameTracker {
    starts: HashMap<u32, ScopeIdx>,
    ends: HashMap<u32, ScopeIdx>,
    jumps: HashMap<u32, ScopeIdx>,
    frame_breaks: Vec<u32>,
    frames: Vec<StackFrame>,
    queue: Vec<Option<TraceHit>>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self {
            queue: Vec::with_capacity(TRACE_QUEUE_LEN),
            ..Default::default()
        }
    }

    pub fn add_start(&mut self, id: u32, scope: ScopeIdx) {
        self.starts.insert(id, scope);
    }

    pub fn add_end(&mut self, id: u32, scope: ScopeIdx) {
        self.ends.insert(id, scope);
    }

    pub fn add_jump(&mut self, id: u32, scope: ScopeIdx) {
        self.jumps.insert(id, scope);
    }

    pub fn owned_ids(&self) -> Vec<u32> {
        self.frame_breaks
            .iter()
            .chain(self.starts.keys())
            .chain(self.ends.keys())
            .chain(self.jumps.keys())
            .copied()
            .collect()
    }

    fn clear(&mut self) {
        self.starts.clear();
        self.ends.clear();
        self.jumps.clear();
        self.frame_breaks.clear();
        self.frames.clear();
        self.queue.clear();
    }

    /// Queues a trace hit. Returns true when the queue is full and must be
    /// flushed.
    pub fn push_hit(&mut self, id: u32, address: u16) -> bool {
        self.queue.push(Some(TraceHit { id, address }));
        self.queue.len() >= TRACE_QUEUE_LEN
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Replays queued hits against the frame stack. `line_at` gives the
    /// source line shown for an address.
    pub fn flush(&mut self, info: &DebugInfo, line_at: impl Fn(u16) -> Option<LineIdx>) {
        let mut queue = std::mem::take(&mut self.queue);
        'outer: for f in 0..queue.len() {
            let Some(hit) = queue[f] else { continue };

            if let Some(&scope) = self.starts.get(&hit.id) {
                // Skip entries whose matching exit is already queued.
                let mut nesting = 1;
                for later in queue.iter_mut().skip(f + 1) {
                    let Some(next) = *later else { continue };
                    if self.starts.get(&next.id) == Some(&scope) {
                        nesting += 1;
                        continue;
                    }
                    if self.ends.get(&next.id) == Some(&scope) {
                        nesting -= 1;
                        if nesting == 0 {
                            *later = None;
                            continue 'outer;
                        }
                    }
                }
                self.frames.push(StackFrame {
                    scope,
                    line: line_at(hit.address),
                });
            } else if let Some(&scope) = self.ends.get(&hit.id) {
                match self.frames.iter().rposition(|fr| fr.scope == scope) {
                    Some(idx) => {
                        self.frames.remove(idx);
                    }
                    None => debug!("exit of {} without a frame", info.scopes[scope].name),
                }
            } else if self.jumps.contains_key(&hit.id) {
                let owner = self.frames.iter().rposition(|fr| {
                    info.scope_range(fr.scope)
                        .map_or(false, |r| r.contains(hit.address))
                });
                if let Some(idx) = owner {
                    self.frames[idx].line = line_at(hit.address);
                    self.frames.truncate(idx + 1);
                }
            }
        }
        queue.clear();
        self.queue = queue;
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct FrameView {
    pub index: usize,
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct StackTrace {
    pub frames: Vec<FrameView>,
    pub count: usize,
}

pub struct CallStackManager {
    transport: Arc<MonitorTransport>,
    info: Arc<DebugInfo>,
    map: Arc<Vec<MapRef>>,
    tracker: Mutex<FrameTracker>,
    cpu_stack_top: Mutex<Option<u16>>,
}

impl CallStackManager {
    pub fn new(transport: Arc<MonitorTransport>, info: Arc<DebugInfo>, map: Arc<Vec<MapRef>>) -> Self {
        Self {
            transport,
            info,
            map,
            tracker: Mutex::new(FrameTracker::new()),
            cpu_stack_top: Mutex::new(None),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, FrameTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn info(&self) -> &Arc<DebugInfo> {
        &self.info
    }

    pub fn map(&self) -> &Arc<Vec<MapRef>> {
        &self.map
    }

    pub fn set_cpu_stack_top(&self, value: u16) {
        *self.cpu_stack_top.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    async fn code_memory(&self) -> Result<Option<(AddressRange, Vec<u8>)>> {
        let Some(code) = self.info.code_range() else {
            return Ok(None);
        };
        let mem = self
            .transport
            .get_memory(code.start, code.size as usize)
            .await?;
        Ok(Some((code, mem)))
    }

    /// Deletes every checkpoint the tracker installed and rebuilds them
    /// from the current contents of the code segment.
    pub async fn reset(&self, current_address: u16, current_line: Option<LineIdx>) -> Result<()> {
        self.cleanup().await;

        let Some((_, mem)) = self.code_memory().await? else {
            return Ok(());
        };
        let changes = discover(&self.info, &self.map, &mem);
        debug!(
            "call stack: {} entries, {} exits, {} call sites",
            changes.starts.len(),
            changes.ends.len(),
            changes.jumps.len()
        );

        let trace = |frames: &[ScopeAddress]| -> Vec<CheckpointSpec> {
            frames
                .iter()
                .map(|f| CheckpointSpec::at(f.address, CpuOperation::EXEC, false))
                .collect()
        };
        let breaks: Vec<CheckpointSpec> = changes
            .starts
            .iter()
            .map(|f| CheckpointSpec {
                enabled: false,
                ..CheckpointSpec::at(f.address, CpuOperation::EXEC, true)
            })
            .collect();
        let (start_specs, end_specs, jump_specs) = (
            trace(&changes.starts),
            trace(&changes.ends),
            trace(&changes.jumps),
        );

        let t = &self.transport;
        let (starts, ends, jumps, brks) = tokio::try_join!(
            t.set_checkpoints(&start_specs, CheckpointCategory::Trace),
            t.set_checkpoints(&end_specs, CheckpointCategory::Trace),
            t.set_checkpoints(&jump_specs, CheckpointCategory::Trace),
            t.set_checkpoints(&breaks, CheckpointCategory::FrameBreak),
        )?;

        let brk_ids: Vec<u32> = brks.iter().map(|b| b.id).collect();
        {
            let mut tracker = self.tracker();
            for (cp, frame) in starts.iter().zip(&changes.starts) {
                tracker.add_start(cp.id, frame.scope);
            }
            for (cp, frame) in ends.iter().zip(&changes.ends) {
                tracker.add_end(cp.id, frame.scope);
            }
            for (cp, frame) in jumps.iter().zip(&changes.jumps) {
                tracker.add_jump(cp.id, frame.scope);
            }
            tracker.frame_breaks = brk_ids.clone();
        }
        t.toggle_checkpoints(&brk_ids, false).await?;

        if let Some(entry) = changes.starts.iter().find(|f| f.address == current_address) {
            self.tracker().push_frame(StackFrame {
                scope: entry.scope,
                line: current_line,
            });
        }
        Ok(())
    }

    /// Feeds a checkpoint hit. Only non-stopping exec hits are traced.
    pub fn add_hit(&self, hit: &CheckpointInfo) {
        if hit.stop || !hit.operation.contains(CpuOperation::EXEC) {
            return;
        }
        let mut tracker = self.tracker();
        if tracker.push_hit(hit.id, hit.start) {
            tracker.flush(&self.info, |a| self.info.line_at(a));
        }
    }

    pub fn flush(&self) {
        self.tracker().flush(&self.info, |a| self.info.line_at(a));
    }

    /// Flushed frames, outermost first.
    pub fn frames(&self) -> Vec<StackFrame> {
        let mut tracker = self.tracker();
        tracker.flush(&self.info, |a| self.info.line_at(a));
        tracker.frames().to_vec()
    }

    pub fn depth(&self) -> usize {
        self.frames().len()
    }

    /// Deletes every checkpoint this manager owns, ignoring failures.
    pub async fn cleanup(&self) {
        let ids = {
            let mut tracker = self.tracker();
            let ids = tracker.owned_ids();
            tracker.clear();
            ids
        };
        if ids.is_empty() || self.transport.is_closed() {
            return;
        }
        if let Err(e) = self.transport.delete_checkpoints(&ids).await {
            debug!("call stack cleanup: {}", e);
        }
    }

    /// Enables the dormant entry breaks while `f` runs.
    pub async fn with_frame_breaks_enabled<T, E, F, Fut>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<TransportError>,
    {
        let ids = self.tracker().frame_breaks.clone();
        self.transport.toggle_checkpoints(&ids, true).await?;
        let result = f().await;
        let restored = self.transport.toggle_checkpoints(&ids, false).await;
        match (result, restored) {
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Err(restore_err)) => {
                warn!("disabling frame breaks failed: {}", restore_err);
                Err(e)
            }
            (result, Ok(())) => result,
        }
    }

    /// Runs until execution is back inside the caller of the current
    /// function. Returns false when there is no caller frame.
    pub async fn return_to_last_stack_frame(&self) -> Result<bool> {
        let frames = self.frames();
        let Some(caller) = frames.len().checked_sub(2).map(|i| frames[i]) else {
            return Ok(false);
        };
        let Some(range) = self.info.scope_range(caller.scope) else {
            return Ok(false);
        };
        let (begin, end) = (range.start, range.last());
        let t = &self.transport;
        t.with_all_breaks_disabled(|| async move {
            let brk = t
                .set_checkpoint(
                    CheckpointSpec::range(begin, end, CpuOperation::EXEC, true),
                    CheckpointCategory::Transient,
                )
                .await?;
            let waited = t.resume_and_wait(Some(begin), Some(end), false).await;
            t.delete_checkpoints(&[brk.id]).await?;
            waited.map(|_| ())
        })
        .await?;
        Ok(true)
    }

    /// Addresses at which the program is considered finished: the return
    /// address of the entry frame and every exit of `_main`.
    pub async fn exit_addresses(&self) -> Result<Vec<u16>> {
        let mut out = Vec::new();
        let top = *self.cpu_stack_top.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(top) = top {
            let ret = self.transport.get_memory(top.wrapping_add(1), 2).await?;
            if let &[lo, hi] = ret.as_slice() {
                out.push(u16::from_le_bytes([lo, hi]).wrapping_add(1));
            }
        }
        let Some(main) = self.info.main_scope else {
            return Ok(out);
        };
        let Some((_, mem)) = self.code_memory().await? else {
            return Ok(out);
        };
        for exit in scope_exits(&self.info, &self.map, &mem, main) {
            if !out.contains(&exit) {
                out.push(exit);
            }
        }
        Ok(out)
    }

    /// Frames for display, innermost first.
    pub fn pretty_stack(&self, address: u16, file: Option<&str>, line: Option<u32>) -> StackTrace {
        let info = &self.info;
        let mut frames = Vec::new();
        let name = format!("0x{:04x}", address);
        let in_asm = file.map_or(false, |f| f.to_ascii_lowercase().ends_with(".s"));
        if in_asm {
            let c_line = info.lines.iter().find(|l| {
                l.file.map_or(false, |f| info.files[f].kind == FileKind::C)
                    && l.span.map_or(false, |s| info.spans[s].range().contains(address))
            });
            if let Some(c_line) = c_line {
                frames.push(FrameView {
                    index: frames.len(),
                    name: name.clone(),
                    file: c_line.file.map(|f| info.files[f].name.clone()),
                    line: Some(c_line.num),
                });
            }
        }
        frames.push(FrameView {
            index: frames.len(),
            name,
            file: file.map(str::to_string),
            line,
        });
        for frame in self.frames().iter().rev() {
            let scope = &info.scopes[frame.scope];
            frames.push(FrameView {
                index: frames.len(),
                name: scope.name.trim_start_matches('_').to_string(),
                file: frame
                    .line
                    .and_then(|l| info.line_file(l))
                    .map(|f| f.name.clone()),
                line: frame.line.map(|l| info.lines[l].num),
            });
        }
        let count = frames.len();
        StackTrace { frames, count }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::symbols::fixtures::three_functions_info;

    /// Code segment bytes of the fixture program, 0x0800..0x0830.
    pub(crate) fn fixture_code() -> Vec<u8> {
        let mut mem = vec![0u8; 0x30];
        mem[0x00..0x08].copy_from_slice(&[0xa9, 0x00, 0x20, 0x10, 0x08, 0xa9, 0x01, 0x60]);
        mem[0x10..0x13].copy_from_slice(&[0xa9, 0x02, 0x60]);
        mem[0x18..0x1b].copy_from_slice(&[0xa2, 0x00, 0x60]);
        mem
    }

    fn at(info: &DebugInfo, name: &str, address: u16) -> ScopeAddress {
        ScopeAddress {
            scope: info.scope_named(name).unwrap(),
            address,
        }
    }

    #[test]
    fn helper_names() {
        assert!(is_stack_helper("incsp2"));
        assert!(is_stack_helper("ADDYSP"));
        assert!(is_stack_helper("popsp"));
        assert!(!is_stack_helper("_foosp"));
        assert!(!is_stack_helper("pusha"));
    }

    #[test]
    fn discovers_entries_exits_and_calls() {
        let info = three_functions_info();
        let changes = discover(&info, &[], &fixture_code());
        let mut starts = changes.starts.clone();
        starts.sort_by_key(|s| s.address);
        assert_eq!(
            starts,
            vec![
                at(&info, "_main", 0x0800),
                at(&info, "_foo", 0x0810),
                at(&info, "_bar", 0x0818),
            ]
        );
        assert!(changes.ends.contains(&at(&info, "_main", 0x0807)));
        assert!(changes.ends.contains(&at(&info, "_foo", 0x0812)));
        assert!(changes.ends.contains(&at(&info, "_bar", 0x081a)));
        assert_eq!(changes.jumps, vec![at(&info, "_foo", 0x0802)]);
    }

    #[test]
    fn tail_jump_exits_belong_to_the_jumping_function() {
        let info = three_functions_info();
        let mut mem = fixture_code();
        mem[0x18..0x1b].copy_from_slice(&[0x4c, 0x10, 0x08]);
        let bar = info.scope_named("_bar").unwrap();
        assert_eq!(scope_exits(&info, &[], &mem, bar), vec![0x0812]);
    }

    #[test]
    fn helper_jump_is_an_exit() {
        let info = three_functions_info();
        let mut mem = fixture_code();
        mem[0x18..0x1b].copy_from_slice(&[0x4c, 0x30, 0x08]);
        let map = vec![MapRef {
            function_name: "incsp2".into(),
            function_address: 0x0830,
        }];
        let bar = info.scope_named("_bar").unwrap();
        assert_eq!(scope_exits(&info, &map, &mem, bar), vec![0x0818]);
    }

    #[test]
    fn mutual_tail_jumps_terminate() {
        let info = three_functions_info();
        let mut mem = fixture_code();
        mem[0x10..0x13].copy_from_slice(&[0x4c, 0x18, 0x08]);
        mem[0x18..0x1b].copy_from_slice(&[0x4c, 0x10, 0x08]);
        let bar = info.scope_named("_bar").unwrap();
        // No exit found anywhere: falls back to a span of the function itself.
        assert_eq!(scope_exits(&info, &[], &mem, bar), vec![0x081a]);
    }

    fn tracker_for(info: &DebugInfo) -> FrameTracker {
        let mut tracker = FrameTracker::new();
        tracker.add_start(1, info.scope_named("_foo").unwrap());
        tracker.add_end(2, info.scope_named("_foo").unwrap());
        tracker.add_start(3, info.scope_named("_main").unwrap());
        tracker.add_jump(4, info.scope_named("_foo").unwrap());
        tracker
    }

    #[test]
    fn entry_then_exit_leaves_no_frame() {
        let info = three_functions_info();
        let mut tracker = tracker_for(&info);
        tracker.push_hit(1, 0x0810);
        tracker.push_hit(2, 0x0812);
        tracker.flush(&info, |a| info.line_at(a));
        assert!(tracker.frames().is_empty());
    }

    #[test]
    fn reentry_keeps_one_frame() {
        let info = three_functions_info();
        let mut tracker = tracker_for(&info);
        tracker.push_hit(1, 0x0810);
        tracker.push_hit(1, 0x0810);
        tracker.push_hit(2, 0x0812);
        tracker.flush(&info, |a| info.line_at(a));
        assert_eq!(tracker.frames().len(), 1);
        assert_eq!(tracker.frames()[0].scope, info.scope_named("_foo").unwrap());
    }

    #[test]
    fn exits_across_flushes_pop_topmost_match() {
        let info = three_functions_info();
        let mut tracker = tracker_for(&info);
        tracker.push_hit(3, 0x0800);
        tracker.push_hit(1, 0x0810);
        tracker.flush(&info, |a| info.line_at(a));
        assert_eq!(tracker.frames().len(), 2);
        tracker.push_hit(2, 0x0812);
        tracker.flush(&info, |a| info.line_at(a));
        assert_eq!(tracker.frames().len(), 1);
        assert_eq!(tracker.queued(), 0);
    }

    #[test]
    fn call_site_updates_caller_line() {
        let info = three_functions_info();
        let mut tracker = tracker_for(&info);
        tracker.push_hit(3, 0x0800);
        tracker.push_hit(1, 0x0810);
        tracker.push_hit(4, 0x0802);
        tracker.flush(&info, |a| info.line_at(a));
        assert_eq!(tracker.frames().len(), 1);
        let line = tracker.frames()[0].line.unwrap();
        assert_eq!(info.lines[line].num, 7);
    }

    #[test]
    fn queue_reports_full() {
        let mut tracker = FrameTracker::new();
        for _ in 0..TRACE_QUEUE_LEN - 1 {
            assert!(!tracker.push_hit(9, 0));
        }
        assert!(tracker.push_hit(9, 0));
    }
}
