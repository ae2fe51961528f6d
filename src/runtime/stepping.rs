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

use log::debug;

use super::{DebugRuntime, MessageLevel, Operation, Result};
use crate::checkpoints::CheckpointCategory;
use crate::monitor::{CheckpointSpec, Command, CpuOperation};
use crate::symbols::{DebugInfo, LineIdx, ScopeIdx};

/// The first line after `current` in its file that has code.
pub fn next_line(info: &DebugInfo, current: LineIdx) -> Option<LineIdx> {
    let num = info.lines[current].num;
    let file = &info.files[info.lines[current].file?];
    let pos = file.lines.iter().position(|&l| l == current)?;
    file.lines[pos + 1..]
        .iter()
        .copied()
        .find(|&l| info.lines[l].span.is_some() && info.lines[l].num > num)
}

/// Start addresses of `next` and every later line of the same function.
/// A statement can be compiled to several places, so any of them may be
/// reached first.
pub fn line_guard(info: &DebugInfo, scope: Option<ScopeIdx>, next: LineIdx) -> Option<Vec<u16>> {
    let span = info.scopes[scope?].code_span?;
    let file = info.lines[next].file;
    let lines: Vec<LineIdx> = info.spans[span]
        .lines
        .iter()
        .copied()
        .filter(|&l| info.lines[l].file == file && info.lines[l].span.is_some())
        .collect();
    let from = lines
        .iter()
        .position(|&l| info.lines[l].num == info.lines[next].num)?;
    let mut addresses: Vec<u16> = lines[from..]
        .iter()
        .filter_map(|&l| info.line_address(l))
        .collect();
    addresses.sort_unstable();
    addresses.dedup();
    Some(addresses)
}

impl DebugRuntime {
    /// Steps over the current source line.
    pub async fn next(&self) -> Result<()> {
        let op = self.begin_op().await;
        if self.state().running {
            return Ok(());
        }
        let t = self.inner.transport.clone();
        t.with_all_breaks_disabled(|| self.step_over()).await?;
        self.finish_step(op).await
    }

    async fn step_over(&self) -> Result<()> {
        let info = self.info();
        let (address, line) = self.current();
        let next = line.and_then(|l| next_line(&info, l));
        let Some((next, next_address)) = next
            .filter(|&n| info.is_c_line(n))
            .and_then(|n| info.line_address(n).map(|a| (n, a)))
        else {
            return self.advance_instruction(true).await;
        };

        let scope = info.scope_at(address);
        if info.scope_at(next_address) != scope {
            debug!("next line is in another function, stepping out");
            return self.step_out_of_frame().await;
        }
        let guard = line_guard(&info, scope, next).unwrap_or_else(|| vec![next_address]);
        self.run_to_any(&guard).await.map(|_| ())
    }

    /// Steps into calls made by the current source line.
    pub async fn step_in(&self) -> Result<()> {
        let op = self.begin_op().await;
        if self.state().running {
            return Ok(());
        }
        let info = self.info();
        let (address, line) = self.current();
        match line.filter(|&l| info.is_c_line(l)) {
            None => self.advance_instruction(false).await?,
            Some(current) => {
                let guard = next_line(&info, current).and_then(|next| {
                    line_guard(&info, info.scope_at(address), next)
                        .or_else(|| info.line_address(next).map(|a| vec![a]))
                });
                match guard {
                    Some(guard) if !guard.is_empty() => {
                        self.call_stack()
                            .with_frame_breaks_enabled(|| self.run_to_any(&guard))
                            .await?;
                    }
                    _ => self.step_out_of_frame().await?,
                }
            }
        }
        self.finish_step(op).await
    }

    /// Runs until the caller of the current function is reached.
    pub async fn step_out(&self) -> Result<()> {
        let op = self.begin_op().await;
        if self.state().running {
            return Ok(());
        }
        self.step_out_of_frame().await?;
        self.finish_step(op).await
    }

    async fn step_out_of_frame(&self) -> Result<()> {
        if self.call_stack().return_to_last_stack_frame().await? {
            return Ok(());
        }
        let info = self.info();
        let in_source = self.current().1.map_or(false, |l| info.is_c_line(l));
        if in_source {
            self.message(MessageLevel::Warning, "Can't step out here!");
            return Ok(());
        }
        let t = &self.inner.transport;
        let mut stops = t.subscribe_stops()?;
        t.exec(Command::ExecuteUntilReturn).await?;
        t.wait_for_stop(&mut stops, None, None, false).await?;
        Ok(())
    }

    async fn advance_instruction(&self, step_over: bool) -> Result<()> {
        let t = &self.inner.transport;
        let mut stops = t.subscribe_stops()?;
        t.exec(Command::AdvanceInstructions {
            step_over,
            count: 1,
        })
        .await?;
        t.wait_for_stop(&mut stops, None, None, false).await?;
        Ok(())
    }

    /// Sets stop checkpoints at `addresses`, resumes and waits for the
    /// first stop, then removes them all.
    async fn run_to_any(&self, addresses: &[u16]) -> Result<u16> {
        let t = &self.inner.transport;
        let specs: Vec<CheckpointSpec> = addresses
            .iter()
            .map(|&a| CheckpointSpec::at(a, CpuOperation::EXEC, true))
            .collect();
        let set = t.set_checkpoints(&specs, CheckpointCategory::Transient).await?;
        let ids: Vec<u32> = set.iter().map(|c| c.id).collect();
        let stopped = t.resume_and_wait(None, None, false).await;
        let deleted = t.delete_checkpoints(&ids).await;
        let stop = stopped?;
        deleted?;
        debug!("stepped to ${:04x}", stop.pc);
        Ok(stop.pc)
    }

    /// Lets the pump catch up with the stop, runs ahead and reports it.
    async fn finish_step(&self, op: Operation<'_>) -> Result<()> {
        self.sync().await?;
        self.do_run_ahead().await?;
        op.finish().await?;
        self.emit_pending_stop();
        Ok(())
    }
}
