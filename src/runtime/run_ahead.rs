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

//! Run-ahead: after a stop, let the emulator draw one more frame so the
//! screen shows what the program has produced so far, then restore the
//! machine from a snapshot taken at the stop.

use log::debug;
use serde::{Deserialize, Serialize};

use super::{DebugRuntime, Result, RuntimeEvent};
use crate::checkpoints::CheckpointCategory;
use crate::monitor::{CheckpointSpec, CpuOperation};
use crate::symbols::MachineType;
use crate::transport::{self, MonitorTransport};

/// A ROM address at which run-ahead must not be left stopped, because
/// restoring a snapshot taken there corrupts serial I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLineResume {
    pub machine: MachineType,
    pub address: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunAheadConfig {
    pub serial_line_resume: Vec<SerialLineResume>,
}

impl Default for RunAheadConfig {
    fn default() -> Self {
        let entry = |machine, address| SerialLineResume { machine, address };
        Self {
            serial_line_resume: vec![
                entry(MachineType::C64, 0xedab),
                entry(MachineType::C128, 0xedab),
                entry(MachineType::Plus4, 0xe1e7),
                entry(MachineType::Vic20, 0xeeb2),
            ],
        }
    }
}

impl RunAheadConfig {
    pub fn serial_line_resume(&self, machine: MachineType) -> Option<u16> {
        self.serial_line_resume
            .iter()
            .find(|e| e.machine == machine)
            .map(|e| e.address)
    }
}

/// Checkpoint condition on the raster line register.
pub fn raster_condition(operator: &str, line: u16) -> String {
    format!("RL {} ${:x}", operator, line)
}

async fn run_one_frame(
    t: &MonitorTransport,
    old_line: u16,
    serial: Option<u16>,
) -> transport::Result<()> {
    let mut ids = Vec::new();
    if let Some(address) = serial {
        let escape = t
            .set_checkpoint(
                CheckpointSpec::at(address, CpuOperation::EXEC, true),
                CheckpointCategory::Transient,
            )
            .await?;
        ids.push(escape.id);
    }
    let anywhere = t
        .set_checkpoint(
            CheckpointSpec::range(0x0000, 0xffff, CpuOperation::EXEC, true),
            CheckpointCategory::Transient,
        )
        .await?;
    ids.push(anywhere.id);

    let ran: transport::Result<()> = async {
        t.set_condition(anywhere.id, &raster_condition("!=", old_line))
            .await?;
        let stop = t.resume_and_wait(None, None, false).await?;
        if Some(stop.pc) != serial {
            t.set_condition(anywhere.id, &raster_condition("==", old_line))
                .await?;
            t.resume_and_wait(None, None, false).await?;
        }
        Ok(())
    }
    .await;
    let deleted = t.delete_checkpoints(&ids).await;
    ran.and(deleted)
}

impl DebugRuntime {
    pub(super) fn run_ahead_enabled(&self) -> bool {
        self.inner.options.run_ahead
            && !matches!(self.inner.machine, MachineType::Nes | MachineType::Apple2)
    }

    /// Runs one frame ahead and restores the machine. Events raised while
    /// running ahead are dropped. Call with the operation lock held.
    pub(super) async fn do_run_ahead(&self) -> Result<()> {
        if !self.run_ahead_enabled() || self.state().terminated {
            return Ok(());
        }
        let snapshot = tempfile::Builder::new()
            .prefix("binmon-debug-")
            .suffix(".vsf")
            .tempfile()?
            .into_temp_path();
        let path = snapshot.to_string_lossy().into_owned();
        let t = self.inner.transport.clone();
        t.dump(&path).await?;

        let old_line = self.state().registers.lin;
        let serial = self
            .inner
            .options
            .run_ahead_config
            .serial_line_resume(self.inner.machine);
        self.state().ignore_events = true;
        let ran = t
            .with_all_breaks_disabled(|| run_one_frame(&t, old_line, serial))
            .await;
        let synced = self.sync().await;
        self.state().ignore_events = false;
        ran?;
        synced?;

        let pc = t.undump(&path).await?;
        self.update_position(pc);
        if let Err(e) = snapshot.close() {
            debug!("removing snapshot {}: {}", path, e);
        }
        self.emit(RuntimeEvent::Output {
            position: self.position(),
        });
        Ok(())
    }
}
