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

mod common;

use binmon_debug::checkpoints::CheckpointCategory;
use binmon_debug::monitor::{CheckpointSpec, Command, CpuOperation};
use binmon_debug::transport::{ConnectOptions, MonitorTransport, TransportError};
use common::MockEmulator;

fn enabled_flags(emulator: &MockEmulator) -> Vec<(u32, bool)> {
    emulator
        .machine()
        .checkpoints()
        .into_iter()
        .map(|(id, cp)| (id, cp.spec.enabled))
        .collect()
}

#[tokio::test]
async fn scoped_disable_restores_only_what_it_toggled() {
    let emulator = MockEmulator::new().await;
    let (t, _events) = MonitorTransport::connect(emulator.addr, ConnectOptions::default())
        .await
        .unwrap();

    let stop = t
        .set_checkpoint(
            CheckpointSpec::at(0x0800, CpuOperation::EXEC, true),
            CheckpointCategory::User,
        )
        .await
        .unwrap();
    let dormant = t
        .set_checkpoint(
            CheckpointSpec {
                enabled: false,
                ..CheckpointSpec::at(0x0805, CpuOperation::EXEC, true)
            },
            CheckpointCategory::FrameBreak,
        )
        .await
        .unwrap();
    let trace = t
        .set_checkpoint(
            CheckpointSpec::at(0x0810, CpuOperation::EXEC, false),
            CheckpointCategory::Trace,
        )
        .await
        .unwrap();
    let doomed = t
        .set_checkpoint(
            CheckpointSpec::at(0x0812, CpuOperation::EXEC, true),
            CheckpointCategory::User,
        )
        .await
        .unwrap();

    let result: Result<(), TransportError> = t
        .with_all_breaks_disabled(|| async {
            let listed = t.checkpoint_list().await?;
            assert!(listed.iter().filter(|c| c.stop).all(|c| !c.enabled));
            assert!(listed.iter().any(|c| c.id == trace.id && c.enabled));
            t.delete_checkpoints(&[doomed.id]).await?;
            Err(TransportError::Closed)
        })
        .await;
    assert!(matches!(result, Err(TransportError::Closed)));

    assert_eq!(
        enabled_flags(&emulator),
        vec![(stop.id, true), (dormant.id, false), (trace.id, true)]
    );
    let toggled_doomed = emulator.machine().count(|c| {
        matches!(c, Command::CheckpointToggle { id, enabled: true } if *id == doomed.id)
    });
    assert_eq!(toggled_doomed, 0);
    assert!(t.registry().get(doomed.id).is_none());
    assert_eq!(
        t.registry().category(dormant.id),
        Some(CheckpointCategory::FrameBreak)
    );
}

#[tokio::test]
async fn resume_and_wait_matches_ranges() {
    let emulator = MockEmulator::new().await;
    let (t, _events) = MonitorTransport::connect(emulator.addr, ConnectOptions::default())
        .await
        .unwrap();
    t.autostart("test.prg").await.unwrap();
    // The stop at _foo lies outside the range and is resumed past.
    let specs = [
        CheckpointSpec::at(0x0810, CpuOperation::EXEC, true),
        CheckpointSpec::range(0x0805, 0x0807, CpuOperation::EXEC, true),
    ];
    t.set_checkpoints(&specs, CheckpointCategory::Transient)
        .await
        .unwrap();
    let stop = t
        .resume_and_wait(Some(0x0805), Some(0x0807), true)
        .await
        .unwrap();
    assert_eq!(stop.pc, 0x0805);
    assert_eq!(emulator.machine().pc(), 0x0805);
    assert_eq!(t.get_memory(0x0805, 2).await.unwrap(), vec![0xa9, 0x01]);
}
