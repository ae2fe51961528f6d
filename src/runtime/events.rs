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

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Breakpoint, DebugRuntime, Result};
use crate::monitor::{CheckpointInfo, RegisterValue, ResponseBody};
use crate::transport::{CloseReason, TransportEvent};

/// Where the CPU is, resolved against the debug information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    pub address: u16,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ts_rs::TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Notifications for the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[serde(tag = "event", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum RuntimeEvent {
    StopOnEntry { position: Position },
    StopOnStep { position: Position },
    StopOnBreakpoint { position: Position },
    StopOnExit { position: Position },
    BreakpointValidated { breakpoint: Breakpoint },
    Continued,
    /// The screen or position changed without a stop, e.g. after run-ahead.
    Output { position: Position },
    Message { level: MessageLevel, content: String },
    Started,
    End,
}

impl RuntimeEvent {
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            RuntimeEvent::StopOnEntry { .. }
                | RuntimeEvent::StopOnStep { .. }
                | RuntimeEvent::StopOnBreakpoint { .. }
                | RuntimeEvent::StopOnExit { .. }
        )
    }
}

enum StopCheckpoint {
    CodeGuard,
    Exit,
    User(Option<u32>),
}

/// Applies transport events in order until the connection closes.
pub(super) async fn pump(runtime: DebugRuntime, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Monitor { seq, response } => {
                if let Err(e) = runtime.dispatch(response.body).await {
                    warn!("handling monitor event failed: {}", e);
                }
                runtime.inner.processed.send_replace(seq);
            }
            TransportEvent::Closed(reason) => {
                runtime.inner.processed.send_replace(u64::MAX);
                if reason != CloseReason::Disconnected {
                    warn!("monitor connection closed: {:?}", reason);
                }
                runtime.terminate().await;
                break;
            }
        }
    }
    debug!("event pump finished");
}

impl DebugRuntime {
    async fn dispatch(&self, body: ResponseBody) -> Result<()> {
        if self.state().ignore_events {
            return Ok(());
        }
        match body {
            ResponseBody::CheckpointInfo(hit) if hit.hit => self.on_checkpoint_hit(hit).await?,
            ResponseBody::RegisterInfo { registers } => self.on_registers(&registers),
            ResponseBody::Stopped { pc } => self.on_stopped(pc),
            ResponseBody::Jam { pc } => {
                self.message(MessageLevel::Error, &format!("CPU jammed at ${:04x}", pc));
                self.on_stopped(pc);
            }
            ResponseBody::Resumed { pc } => self.on_resumed(pc).await,
            _ => {}
        }
        Ok(())
    }

    async fn on_checkpoint_hit(&self, hit: CheckpointInfo) -> Result<()> {
        self.call_stack().add_hit(&hit);
        if !hit.stop {
            return Ok(());
        }
        debug!(
            "stopped by checkpoint {} ({:?})",
            hit.id,
            self.inner.transport.registry().category(hit.id)
        );

        let kind = {
            let state = self.state();
            if state.code_guard == Some(hit.id) {
                StopCheckpoint::CodeGuard
            } else if state.exit_ids.contains(&hit.id) {
                StopCheckpoint::Exit
            } else {
                StopCheckpoint::User(
                    state
                        .breakpoints
                        .iter()
                        .find(|bp| bp.checkpoint == Some(hit.id))
                        .map(|bp| bp.id),
                )
            }
        };
        self.state().running = false;

        match kind {
            StopCheckpoint::CodeGuard => {
                self.state().code_guard = None;
                self.inner.transport.delete_checkpoints(&[hit.id]).await?;
                self.message(
                    MessageLevel::Error,
                    "CODE segment was modified. Your program may be broken!",
                );
            }
            StopCheckpoint::Exit => {
                if self.inner.options.stop_on_exit {
                    self.state().exit_queued = true;
                } else {
                    self.terminate().await;
                }
            }
            StopCheckpoint::User(Some(id)) => self.state().user_break = Some(id),
            StopCheckpoint::User(None) => {}
        }
        Ok(())
    }

    fn on_registers(&self, registers: &[RegisterValue]) {
        let mut stack_top = None;
        {
            let mut state = self.state();
            let state = &mut *state;
            for reg in registers {
                let Some(meta) = state.register_meta.iter().find(|m| m.id == reg.id) else {
                    continue;
                };
                state.registers.set(&meta.name, reg.value);
                if meta.name.eq_ignore_ascii_case("sp") {
                    stack_top = Some(0x100 + (reg.value & 0xff));
                }
            }
        }
        if let Some(top) = stack_top {
            self.call_stack().set_cpu_stack_top(top);
        }
    }

    fn on_stopped(&self, pc: u16) {
        self.update_position(pc);
        let (quiet, generation) = {
            let mut state = self.state();
            state.running = false;
            state.stop_generation += 1;
            (
                state.starting || state.driving > 0 || state.terminated,
                state.stop_generation,
            )
        };
        if quiet {
            return;
        }
        self.emit(RuntimeEvent::Output {
            position: self.position(),
        });
        if self.run_ahead_enabled() {
            let runtime = self.clone();
            tokio::spawn(async move { runtime.finish_stop(generation).await });
        } else {
            self.emit_pending_stop();
        }
    }

    /// Completes a stop the user did not cause: run ahead, then report it.
    async fn finish_stop(&self, generation: u64) {
        let op = self.begin_op().await;
        let current = {
            let state = self.state();
            state.stop_generation == generation && !state.running && !state.terminated
        };
        if !current {
            return;
        }
        if let Err(e) = self.do_run_ahead().await {
            warn!("run-ahead failed: {}", e);
        }
        if let Err(e) = op.finish().await {
            debug!("sync after stop: {}", e);
        }
        self.emit_pending_stop();
    }

    async fn on_resumed(&self, pc: u16) {
        if self.state().exit_queued {
            self.terminate().await;
            return;
        }
        self.state().running = true;
        self.update_position(pc);
    }
}
