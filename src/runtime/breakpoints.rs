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

//! Source line breakpoints.
//!
//! A breakpoint starts unverified. Verification resolves it to the first line
//! at or after the requested one that has code, sets a stop checkpoint there
//! and attaches an always-true condition so that a user condition can later
//! be swapped in without recreating the checkpoint.

use log::debug;
use serde::{Deserialize, Serialize};

use super::{DebugRuntime, Result, RuntimeError, RuntimeEvent};
use crate::checkpoints::CheckpointCategory;
use crate::monitor::{CheckpointSpec, Command, CpuOperation};
use crate::symbols::DebugInfo;

/// Condition attached to every verified breakpoint without a user condition.
pub const ALWAYS_TRUE: &str = "$574c == $574c";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct Breakpoint {
    pub id: u32,
    pub file: String,
    pub line: u32,
    pub verified: bool,
    pub address: Option<u16>,
    pub checkpoint: Option<u32>,
    pub condition: Option<String>,
}

impl Breakpoint {
    pub(super) fn new(id: u32, file: &str, line: u32) -> Self {
        Self {
            id,
            file: file.to_string(),
            line,
            verified: false,
            address: None,
            checkpoint: None,
            condition: None,
        }
    }
}

/// Lines of one file to break on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBreakpoints {
    pub file: String,
    pub lines: Vec<u32>,
}

fn same_file(info: &DebugInfo, a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (info.file_by_path(a), info.file_by_path(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Resolves a requested line to the line number and address that will
/// actually be hit. Lines past the end of the file stay unresolved.
pub fn resolve_line(info: &DebugInfo, file: &str, line: u32) -> Option<(u32, u16)> {
    let file = &info.files[info.file_by_path(file)?];
    let last = file.lines.iter().map(|&l| info.lines[l].num).max()?;
    if line > last {
        return None;
    }
    let target = file
        .lines
        .iter()
        .copied()
        .filter(|&l| info.lines[l].num >= line && info.lines[l].span.is_some())
        .min_by_key(|&l| info.lines[l].num)?;
    Some((info.lines[target].num, info.line_address(target)?))
}

impl DebugRuntime {
    /// Adds breakpoints on `lines` of `path` and tries to verify them.
    pub async fn set_breakpoint(&self, path: &str, lines: &[u32]) -> Result<Vec<Breakpoint>> {
        let info = self.info();
        let file = info
            .file_by_path(path)
            .map(|f| info.files[f].name.clone())
            .unwrap_or_else(|| path.to_string());
        let ids: Vec<u32> = {
            let mut state = self.state();
            lines
                .iter()
                .map(|&line| {
                    state.next_breakpoint_id += 1;
                    let id = state.next_breakpoint_id;
                    state.breakpoints.push(Breakpoint::new(id, &file, line));
                    id
                })
                .collect()
        };

        self.verify_breakpoints().await?;

        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.breakpoints.iter().find(|bp| bp.id == *id))
            .cloned()
            .collect())
    }

    /// Sets checkpoints for every breakpoint that can now be resolved.
    pub async fn verify_breakpoints(&self) -> Result<()> {
        {
            let state = self.state();
            if state.starting || state.terminated {
                return Ok(());
            }
        }
        let info = self.info();
        let pending: Vec<(u32, u32, u16)> = self
            .state()
            .breakpoints
            .iter()
            .filter(|bp| !bp.verified)
            .filter_map(|bp| resolve_line(&info, &bp.file, bp.line).map(|(n, a)| (bp.id, n, a)))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let t = self.inner.transport.clone();
        let op = self.begin_op().await;
        let was_running = self.state().running;
        t.ping().await?;

        let specs: Vec<CheckpointSpec> = pending
            .iter()
            .map(|&(_, _, address)| CheckpointSpec::at(address, CpuOperation::EXEC, true))
            .collect();
        let set = t.set_checkpoints(&specs, CheckpointCategory::User).await?;

        let mut validated = Vec::new();
        let mut conditions = Vec::new();
        {
            let mut state = self.state();
            for (&(id, num, address), checkpoint) in pending.iter().zip(&set) {
                let Some(bp) = state.breakpoints.iter_mut().find(|bp| bp.id == id) else {
                    continue;
                };
                bp.verified = true;
                bp.line = num;
                bp.address = Some(address);
                bp.checkpoint = Some(checkpoint.id);
                conditions.push(Command::ConditionSet {
                    checkpoint_id: checkpoint.id,
                    condition: bp.condition.clone().unwrap_or_else(|| ALWAYS_TRUE.to_string()),
                });
                validated.push(bp.clone());
            }
        }
        t.exec_batch(&conditions).await?;
        op.finish().await?;

        for breakpoint in validated {
            debug!(
                "breakpoint {} verified at {}:{}",
                breakpoint.id, breakpoint.file, breakpoint.line
            );
            self.emit(RuntimeEvent::BreakpointValidated { breakpoint });
        }
        if was_running {
            t.resume().await?;
        }
        Ok(())
    }

    /// Removes every breakpoint of `path`. Any other checkpoint at the same
    /// address as a removed breakpoint is deleted along with it.
    pub async fn clear_breakpoints(&self, path: &str) -> Result<()> {
        let info = self.info();
        let removed = {
            let mut state = self.state();
            let (removed, kept) = std::mem::take(&mut state.breakpoints)
                .into_iter()
                .partition::<Vec<_>, _>(|bp| same_file(&info, &bp.file, path));
            state.breakpoints = kept;
            removed
        };
        let t = self.inner.transport.clone();
        if removed.iter().all(|bp| bp.checkpoint.is_none()) || t.is_closed() {
            return Ok(());
        }

        let op = self.begin_op().await;
        let was_running = self.state().running;
        t.ping().await?;
        let listed = t.checkpoint_list().await?;
        let mut ids = Vec::new();
        for bp in &removed {
            ids.extend(bp.checkpoint);
            if let Some(address) = bp.address {
                ids.extend(listed.iter().filter(|c| c.start == address).map(|c| c.id));
            }
        }
        ids.sort_unstable();
        ids.dedup();
        let deleted = t.delete_checkpoints(&ids).await;
        op.finish().await?;
        if was_running {
            t.resume().await?;
        }
        deleted.map_err(RuntimeError::from)
    }

    /// Breakpoints of `path`, optionally only those on `line`.
    pub fn get_breakpoints(&self, path: &str, line: Option<u32>) -> Vec<Breakpoint> {
        let info = self.info();
        self.state()
            .breakpoints
            .iter()
            .filter(|bp| same_file(&info, &bp.file, path))
            .filter(|bp| line.map_or(true, |l| bp.line == l))
            .cloned()
            .collect()
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.state().breakpoints.clone()
    }

    /// Replaces the condition of a breakpoint; `None` restores the
    /// always-true one.
    pub async fn set_breakpoint_condition(&self, id: u32, condition: Option<String>) -> Result<()> {
        let checkpoint = {
            let mut state = self.state();
            let bp = state
                .breakpoints
                .iter_mut()
                .find(|bp| bp.id == id)
                .ok_or(RuntimeError::UnknownBreakpoint(id))?;
            bp.condition = condition.clone();
            bp.checkpoint
        };
        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        let text = condition.unwrap_or_else(|| ALWAYS_TRUE.to_string());
        self.silenced(|| self.inner.transport.set_condition(checkpoint, &text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::fixtures::{three_functions, three_functions_info};

    #[test]
    fn resolves_to_next_line_with_code() {
        let info = three_functions_info();
        assert_eq!(resolve_line(&info, "main.c", 7), Some((7, 0x0802)));
        assert_eq!(resolve_line(&info, "main.c", 10), Some((12, 0x0810)));
        assert_eq!(resolve_line(&info, "main.c", 18), None);
        assert_eq!(resolve_line(&info, "other.c", 7), None);
    }

    #[test]
    fn lines_past_the_table_resolve_after_reload() {
        let info = three_functions_info();
        assert_eq!(resolve_line(&info, "main.c", 20), None);

        let mut doc = three_functions();
        doc.spans.push(crate::symbols::SpanRecord {
            id: 11,
            segment: Some(0),
            start: 0x20,
            size: 1,
        });
        doc.lines.push(crate::symbols::LineRecord {
            id: 9,
            file: Some(0),
            span: Some(11),
            line: 20,
        });
        let info = DebugInfo::from_document(doc).unwrap();
        assert_eq!(resolve_line(&info, "main.c", 20), Some((20, 0x0820)));
    }

    #[test]
    fn asm_file_without_code_never_resolves() {
        let info = three_functions_info();
        assert_eq!(resolve_line(&info, "crt0.s", 3), None);
    }
}
