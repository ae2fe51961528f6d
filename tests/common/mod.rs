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

//! A small emulator that speaks the binary monitor protocol. It runs a
//! handful of 6502 opcodes, which is enough for the test program below.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use binmon_debug::monitor::frame::{decode_command, encode_response, FrameAssembler};
use binmon_debug::monitor::{
    BankMeta, CheckpointInfo, CheckpointSpec, Command, CpuOperation, RegisterMeta, RegisterValue,
    Response, ResponseBody,
};
use binmon_debug::runtime::{
    DebugRuntime, LaunchRequest, Launcher, RuntimeEvent, RuntimeOptions, Result as RuntimeResult,
};
use binmon_debug::symbols::{DebugInfo, DebugInfoDocument};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Loader that calls `_main` and then spins.
pub const LOADER: u16 = 0x0840;
/// Where the loader spins once `_main` has returned.
pub const LOADER_SPIN: u16 = 0x0843;

/// Instructions per raster line.
const INSTRUCTIONS_PER_LINE: u64 = 20;
const RASTER_LINES: u64 = 312;
const BATCH: usize = 500;

const REG_A: u8 = 0x00;
const REG_X: u8 = 0x01;
const REG_Y: u8 = 0x02;
const REG_PC: u8 = 0x03;
const REG_SP: u8 = 0x04;
const REG_FL: u8 = 0x05;
const REG_LIN: u8 = 0x35;
const REG_CYC: u8 = 0x36;

/// Error code for operations on a checkpoint that does not exist.
const ERR_NO_OBJECT: u8 = 0x01;

/// Debug information of the test program:
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
pub fn program_document() -> DebugInfoDocument {
    serde_json::from_value(json!({
        "machine_type": "c64",
        "segments": [
            {"id": 0, "name": "CODE", "start": 0x0800, "size": 0x30},
            {"id": 1, "name": "ZEROPAGE", "start": 0x02, "size": 0x1a},
            {"id": 2, "name": "BSS", "start": 0x0900, "size": 0x10}
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
        "files": [{"id": 0, "name": "main.c"}],
        "lines": [
            {"id": 0, "file": 0, "span": 1, "line": 6},
            {"id": 1, "file": 0, "span": 2, "line": 7},
            {"id": 2, "file": 0, "span": 3, "line": 8},
            {"id": 3, "file": 0, "span": 4, "line": 9},
            {"id": 4, "file": 0, "span": 6, "line": 12},
            {"id": 5, "file": 0, "span": 7, "line": 13},
            {"id": 6, "file": 0, "span": 9, "line": 16},
            {"id": 7, "file": 0, "span": 10, "line": 17}
        ],
        "scopes": [
            {"id": 0, "name": "_main", "size": 8, "spans": [0]},
            {"id": 1, "name": "_foo", "size": 3, "spans": [5]},
            {"id": 2, "name": "_bar", "size": 3, "spans": [8]}
        ],
        "labels": [
            {"name": "_main", "value": 0x0800, "scope": 0, "segment": 0},
            {"name": "_foo", "value": 0x0810, "scope": 1, "segment": 0},
            {"name": "_bar", "value": 0x0818, "scope": 2, "segment": 0},
            {"name": "_counter", "value": 0x0900, "segment": 2},
            {"name": "sp", "value": 0x02, "segment": 1}
        ]
    }))
    .expect("program document")
}

pub fn program_info() -> DebugInfo {
    DebugInfo::from_document(program_document()).expect("program resolves")
}

/// Memory image with the program and its loader in place.
pub fn program_image() -> Vec<u8> {
    let mut mem = vec![0u8; 0x10000];
    mem[0x0800..0x0808].copy_from_slice(&[0xa9, 0x00, 0x20, 0x10, 0x08, 0xa9, 0x01, 0x60]);
    mem[0x0810..0x0813].copy_from_slice(&[0xa9, 0x02, 0x60]);
    mem[0x0818..0x081b].copy_from_slice(&[0xa2, 0x00, 0x60]);
    mem[0x0840..0x0846].copy_from_slice(&[0x20, 0x00, 0x08, 0x4c, 0x43, 0x08]);
    // C parameter stack pointer
    mem[0x02..0x04].copy_from_slice(&[0x00, 0xc0]);
    mem
}

#[derive(Debug, Clone, Copy, Default)]
struct Cpu {
    a: u8,
    x: u8,
    y: u8,
    sp: u8,
    fl: u8,
    pc: u16,
    instructions: u64,
}

impl Cpu {
    fn raster_line(&self) -> u16 {
        ((self.instructions / INSTRUCTIONS_PER_LINE) % RASTER_LINES) as u16
    }
}

#[derive(Debug, Clone)]
pub struct MockCheckpoint {
    pub spec: CheckpointSpec,
    pub condition: Option<String>,
    pub hit_count: u32,
}

impl MockCheckpoint {
    fn info(&self, id: u32, hit: bool) -> CheckpointInfo {
        CheckpointInfo {
            id,
            hit,
            start: self.spec.start,
            end: self.spec.end,
            stop: self.spec.stop,
            enabled: self.spec.enabled,
            operation: self.spec.operation,
            temporary: self.spec.temporary,
            hit_count: self.hit_count,
            ignore_count: 0,
            has_condition: self.condition.is_some(),
        }
    }
}

pub struct Machine {
    mem: Vec<u8>,
    cpu: Cpu,
    running: bool,
    /// Checkpoints are not checked for the first instruction after a resume.
    resumed: bool,
    checkpoints: BTreeMap<u32, MockCheckpoint>,
    next_id: u32,
    snapshots: HashMap<String, (Vec<u8>, Cpu)>,
    /// Every command received, in order.
    pub log: Vec<Command>,
    pub typed: String,
    quit: bool,
}

fn operand(text: &str, cpu: &Cpu) -> Option<u32> {
    match text {
        "RL" => Some(cpu.raster_line() as u32),
        _ => u32::from_str_radix(text.strip_prefix('$')?, 16).ok(),
    }
}

/// Evaluates `lhs op rhs` conditions. Anything else counts as true.
fn condition_holds(condition: &str, cpu: &Cpu) -> bool {
    let words: Vec<&str> = condition.split_whitespace().collect();
    let &[lhs, op, rhs] = words.as_slice() else {
        return true;
    };
    let (Some(l), Some(r)) = (operand(lhs, cpu), operand(rhs, cpu)) else {
        return true;
    };
    match op {
        "==" => l == r,
        "!=" => l != r,
        _ => true,
    }
}

fn event(body: ResponseBody) -> Response {
    Response::event(body)
}

impl Machine {
    fn new(mem: Vec<u8>, pc: u16, running: bool) -> Self {
        Self {
            mem,
            cpu: Cpu {
                sp: 0xff,
                pc,
                ..Cpu::default()
            },
            running,
            resumed: running,
            checkpoints: BTreeMap::new(),
            next_id: 1,
            snapshots: HashMap::new(),
            log: Vec::new(),
            typed: String::new(),
            quit: false,
        }
    }

    pub fn pc(&self) -> u16 {
        self.cpu.pc
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn memory(&self, address: u16, len: usize) -> Vec<u8> {
        self.mem[address as usize..address as usize + len].to_vec()
    }

    pub fn checkpoints(&self) -> Vec<(u32, MockCheckpoint)> {
        self.checkpoints
            .iter()
            .map(|(id, cp)| (*id, cp.clone()))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.log.iter().filter(|c| pred(c)).count()
    }

    fn registers(&self) -> Vec<RegisterValue> {
        let c = &self.cpu;
        [
            (REG_A, c.a as u16),
            (REG_X, c.x as u16),
            (REG_Y, c.y as u16),
            (REG_PC, c.pc),
            (REG_SP, c.sp as u16),
            (REG_FL, c.fl as u16),
            (REG_LIN, c.raster_line()),
            (REG_CYC, (c.instructions & 0xffff) as u16),
        ]
        .into_iter()
        .map(|(id, value)| RegisterValue { id, value })
        .collect()
    }

    fn stop_events(&mut self, out: &mut Vec<Response>) {
        self.running = false;
        out.push(event(ResponseBody::RegisterInfo {
            registers: self.registers(),
        }));
        out.push(event(ResponseBody::Stopped { pc: self.cpu.pc }));
    }

    /// Reports every checkpoint of `operation` covering `address` whose
    /// condition holds. Returns true when one of them stops the CPU.
    fn check(&mut self, address: u16, operation: CpuOperation, out: &mut Vec<Response>) -> bool {
        let cpu = self.cpu;
        let hits: Vec<u32> = self
            .checkpoints
            .iter()
            .filter(|(_, cp)| {
                cp.spec.enabled
                    && cp.spec.operation.contains(operation)
                    && cp.spec.start <= address
                    && address <= cp.spec.end
                    && cp
                        .condition
                        .as_deref()
                        .map_or(true, |c| condition_holds(c, &cpu))
            })
            .map(|(id, _)| *id)
            .collect();
        let mut stop = false;
        for id in hits {
            let Some(cp) = self.checkpoints.get_mut(&id) else {
                continue;
            };
            cp.hit_count += 1;
            out.push(event(ResponseBody::CheckpointInfo(cp.info(id, true))));
            stop |= cp.spec.stop;
            if cp.spec.temporary {
                self.checkpoints.remove(&id);
            }
        }
        stop
    }

    fn push(&mut self, value: u8, out: &mut Vec<Response>) -> bool {
        let address = 0x100 + self.cpu.sp as u16;
        self.mem[address as usize] = value;
        self.cpu.sp = self.cpu.sp.wrapping_sub(1);
        self.check(address, CpuOperation::STORE, out)
    }

    fn pull(&mut self) -> u8 {
        self.cpu.sp = self.cpu.sp.wrapping_add(1);
        self.mem[0x100 + self.cpu.sp as usize]
    }

    fn word_at(&self, address: u16) -> u16 {
        u16::from_le_bytes([
            self.mem[address.wrapping_add(1) as usize],
            self.mem[address.wrapping_add(2) as usize],
        ])
    }

    /// Executes one instruction. Returns true when a store checkpoint
    /// stopped the CPU.
    fn execute(&mut self, out: &mut Vec<Response>) -> bool {
        let pc = self.cpu.pc;
        let op = self.mem[pc as usize];
        let imm = self.mem[pc.wrapping_add(1) as usize];
        self.cpu.instructions += 1;
        match op {
            // lda #
            0xa9 => {
                self.cpu.a = imm;
                self.cpu.pc = pc.wrapping_add(2);
            }
            // ldx #
            0xa2 => {
                self.cpu.x = imm;
                self.cpu.pc = pc.wrapping_add(2);
            }
            // ldy #
            0xa0 => {
                self.cpu.y = imm;
                self.cpu.pc = pc.wrapping_add(2);
            }
            // sta abs
            0x8d => {
                let target = self.word_at(pc);
                self.mem[target as usize] = self.cpu.a;
                self.cpu.pc = pc.wrapping_add(3);
                return self.check(target, CpuOperation::STORE, out);
            }
            // jsr
            0x20 => {
                let ret = pc.wrapping_add(2);
                let stop = self.push((ret >> 8) as u8, out) | self.push(ret as u8, out);
                self.cpu.pc = self.word_at(pc);
                return stop;
            }
            // rts
            0x60 => {
                let lo = self.pull();
                let hi = self.pull();
                self.cpu.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
            }
            // jmp abs
            0x4c => self.cpu.pc = self.word_at(pc),
            // nop and everything unknown
            _ => self.cpu.pc = pc.wrapping_add(1),
        }
        false
    }

    /// Runs up to `limit` instructions while the CPU is running.
    fn run(&mut self, limit: usize, out: &mut Vec<Response>) {
        for _ in 0..limit {
            if !self.running {
                return;
            }
            let skip = std::mem::replace(&mut self.resumed, false);
            if !skip && self.check(self.cpu.pc, CpuOperation::EXEC, out) {
                self.stop_events(out);
                return;
            }
            if self.execute(out) {
                self.stop_events(out);
                return;
            }
        }
    }

    /// Runs until an `rts` leaves the current function.
    fn run_until_return(&mut self, out: &mut Vec<Response>) {
        let mut depth = 0i32;
        for _ in 0..100_000 {
            let op = self.mem[self.cpu.pc as usize];
            self.execute(out);
            match op {
                0x20 => depth += 1,
                0x60 if depth == 0 => break,
                0x60 => depth -= 1,
                _ => {}
            }
        }
    }

    fn reply(&mut self, id: u32, command: Command, out: &mut Vec<Response>) {
        if self.running && !matches!(command, Command::Quit) {
            self.stop_events(out);
        }
        self.log.push(command.clone());
        let body = match command {
            Command::MemoryGet { start, end, .. } => ResponseBody::MemoryGet {
                memory: self.mem[start as usize..=end as usize].to_vec(),
            },
            Command::MemorySet { start, data, .. } => {
                let at = start as usize;
                self.mem[at..at + data.len()].copy_from_slice(&data);
                ResponseBody::MemorySet
            }
            Command::CheckpointSet(spec) => {
                let id = self.next_id;
                self.next_id += 1;
                let cp = MockCheckpoint {
                    spec,
                    condition: None,
                    hit_count: 0,
                };
                let info = cp.info(id, false);
                self.checkpoints.insert(id, cp);
                ResponseBody::CheckpointInfo(info)
            }
            Command::CheckpointGet { id: cp } => match self.checkpoints.get(&cp) {
                Some(found) => ResponseBody::CheckpointInfo(found.info(cp, false)),
                None => return self.error(id, ResponseBody::CheckpointInfo(missing(cp)), out),
            },
            Command::CheckpointDelete { id: cp } => {
                if self.checkpoints.remove(&cp).is_none() {
                    return self.error(id, ResponseBody::CheckpointDelete, out);
                }
                ResponseBody::CheckpointDelete
            }
            Command::CheckpointToggle { id: cp, enabled } => match self.checkpoints.get_mut(&cp) {
                Some(c) => {
                    c.spec.enabled = enabled;
                    ResponseBody::CheckpointToggle
                }
                None => return self.error(id, ResponseBody::CheckpointToggle, out),
            },
            Command::CheckpointList => {
                for (cp_id, cp) in &self.checkpoints {
                    out.push(Response::reply(
                        id,
                        ResponseBody::CheckpointInfo(cp.info(*cp_id, false)),
                    ));
                }
                ResponseBody::CheckpointList {
                    count: self.checkpoints.len() as u32,
                }
            }
            Command::ConditionSet {
                checkpoint_id,
                condition,
            } => match self.checkpoints.get_mut(&checkpoint_id) {
                Some(cp) => {
                    cp.condition = Some(condition);
                    ResponseBody::ConditionSet
                }
                None => return self.error(id, ResponseBody::ConditionSet, out),
            },
            Command::RegistersGet { .. } => ResponseBody::RegisterInfo {
                registers: self.registers(),
            },
            Command::RegistersSet { registers, .. } => {
                for reg in registers {
                    match reg.id {
                        REG_A => self.cpu.a = reg.value as u8,
                        REG_X => self.cpu.x = reg.value as u8,
                        REG_Y => self.cpu.y = reg.value as u8,
                        REG_PC => self.cpu.pc = reg.value,
                        REG_SP => self.cpu.sp = reg.value as u8,
                        REG_FL => self.cpu.fl = reg.value as u8,
                        _ => {}
                    }
                }
                ResponseBody::RegisterInfo {
                    registers: self.registers(),
                }
            }
            Command::RegistersAvailable { .. } => ResponseBody::RegistersAvailable {
                registers: [
                    (REG_A, 8, "A"),
                    (REG_X, 8, "X"),
                    (REG_Y, 8, "Y"),
                    (REG_PC, 16, "PC"),
                    (REG_SP, 8, "SP"),
                    (REG_FL, 8, "FL"),
                    (REG_LIN, 16, "LIN"),
                    (REG_CYC, 16, "CYC"),
                ]
                .into_iter()
                .map(|(id, size, name)| RegisterMeta {
                    id,
                    size,
                    name: name.to_string(),
                })
                .collect(),
            },
            Command::BanksAvailable => ResponseBody::BanksAvailable {
                banks: vec![
                    BankMeta {
                        id: 0,
                        name: "default".to_string(),
                    },
                    BankMeta {
                        id: 1,
                        name: "cpu".to_string(),
                    },
                ],
            },
            Command::Dump { filename, .. } => {
                self.snapshots
                    .insert(filename, (self.mem.clone(), self.cpu));
                ResponseBody::Dump
            }
            Command::Undump { filename } => match self.snapshots.get(&filename) {
                Some((mem, cpu)) => {
                    self.mem = mem.clone();
                    self.cpu = *cpu;
                    ResponseBody::Undump { pc: self.cpu.pc }
                }
                None => return self.error(id, ResponseBody::Undump { pc: 0 }, out),
            },
            Command::KeyboardFeed { text } => {
                self.typed.push_str(&text);
                ResponseBody::KeyboardFeed
            }
            Command::EmulatorInfo => ResponseBody::EmulatorInfo {
                version: vec![3, 7, 1, 0],
                revision: 42,
            },
            Command::Ping => ResponseBody::Ping,
            Command::Autostart { .. } => {
                self.cpu.pc = LOADER;
                ResponseBody::Autostart
            }
            Command::Exit => {
                out.push(Response::reply(id, ResponseBody::Exit));
                out.push(event(ResponseBody::Resumed { pc: self.cpu.pc }));
                self.running = true;
                self.resumed = true;
                return;
            }
            Command::Quit => {
                self.quit = true;
                ResponseBody::Quit
            }
            Command::AdvanceInstructions { step_over, count } => {
                out.push(Response::reply(id, ResponseBody::AdvanceInstructions));
                for _ in 0..count {
                    let pc = self.cpu.pc;
                    if step_over && self.mem[pc as usize] == 0x20 {
                        self.execute(out);
                        self.run_until_return(out);
                    } else {
                        self.execute(out);
                    }
                }
                self.stop_events(out);
                return;
            }
            Command::ExecuteUntilReturn => {
                out.push(Response::reply(id, ResponseBody::ExecuteUntilReturn));
                self.run_until_return(out);
                self.stop_events(out);
                return;
            }
            Command::Reset { .. } => {
                self.cpu.pc = LOADER;
                ResponseBody::Reset
            }
            Command::ResourceGet { .. }
            | Command::ResourceSet { .. }
            | Command::DisplayGet { .. }
            | Command::PaletteGet { .. } => {
                return self.error(id, ResponseBody::Ping, out);
            }
        };
        out.push(Response::reply(id, body));
    }

    fn error(&mut self, id: u32, body: ResponseBody, out: &mut Vec<Response>) {
        let mut response = Response::reply(id, body);
        response.error = ERR_NO_OBJECT;
        out.push(response);
    }
}

fn missing(id: u32) -> CheckpointInfo {
    MockCheckpoint {
        spec: CheckpointSpec::at(0, CpuOperation::EXEC, false),
        condition: None,
        hit_count: 0,
    }
    .info(id, false)
}

/// One emulator listening on a local port.
pub struct MockEmulator {
    pub addr: SocketAddr,
    machine: Arc<Mutex<Machine>>,
    task: JoinHandle<()>,
}

impl MockEmulator {
    /// An emulator waiting to autostart the test program.
    pub async fn new() -> Self {
        Self::with_machine(Machine::new(program_image(), LOADER, false)).await
    }

    /// An emulator whose program already ran to the loader's spin loop.
    pub async fn running() -> Self {
        let mut machine = Machine::new(program_image(), LOADER_SPIN, true);
        machine.resumed = false;
        Self::with_machine(machine).await
    }

    async fn with_machine(machine: Machine) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let machine = Arc::new(Mutex::new(machine));
        let task = tokio::spawn(serve(listener, machine.clone()));
        Self {
            addr,
            machine,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockEmulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, machine: Arc<Mutex<Machine>>) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    session(stream, machine).await;
}

async fn send(stream: &mut TcpStream, responses: Vec<Response>) -> bool {
    let mut bytes = Vec::new();
    for response in &responses {
        match encode_response(response) {
            Ok(frame) => bytes.extend(frame),
            Err(_) => return false,
        }
    }
    bytes.is_empty() || stream.write_all(&bytes).await.is_ok()
}

async fn session(mut stream: TcpStream, machine: Arc<Mutex<Machine>>) {
    let mut assembler = FrameAssembler::for_commands();
    let mut buf = vec![0u8; 4096];
    loop {
        let running = machine.lock().map(|m| m.running).unwrap_or(false);
        tokio::select! {
            biased;
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                assembler.push(&buf[..n]);
                let mut out = Vec::new();
                let mut quit = false;
                while let Ok(Some(frame)) = assembler.next_frame() {
                    let Ok((id, command)) = decode_command(&frame) else {
                        return;
                    };
                    let mut m = machine.lock().unwrap_or_else(|e| e.into_inner());
                    m.reply(id, command, &mut out);
                    quit |= m.quit;
                }
                if !send(&mut stream, out).await || quit {
                    return;
                }
            }
            _ = tokio::task::yield_now(), if running => {
                let mut out = Vec::new();
                machine
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .run(BATCH, &mut out);
                if !send(&mut stream, out).await {
                    return;
                }
            }
        }
    }
}

/// Launching is a no-op; the mock is already listening.
pub struct NoLaunch;

impl Launcher for NoLaunch {
    fn exec(&self, _: &Path, _: &[String], _: Option<&Path>) -> RuntimeResult<(u32, u32)> {
        Ok((0, 0))
    }
}

pub fn request(port: u16) -> LaunchRequest {
    LaunchRequest {
        program: "test.prg".into(),
        emulator: "x64sc".into(),
        args: Vec::new(),
        cwd: None,
        port,
    }
}

pub async fn start(
    emulator: &MockEmulator,
    options: RuntimeOptions,
) -> (DebugRuntime, mpsc::UnboundedReceiver<RuntimeEvent>) {
    DebugRuntime::start(
        &request(emulator.port()),
        program_info(),
        Vec::new(),
        options,
        &NoLaunch,
    )
    .await
    .expect("session starts")
}

/// Next event other than a user message, failing the test if none arrives
/// soon.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<RuntimeEvent>) -> RuntimeEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("event channel open");
        if !matches!(event, RuntimeEvent::Message { .. }) {
            return event;
        }
    }
}

/// Skips events until one matches `pred`, and returns it.
pub async fn wait_event(
    events: &mut mpsc::UnboundedReceiver<RuntimeEvent>,
    pred: impl Fn(&RuntimeEvent) -> bool,
) -> RuntimeEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Skips to the next stop event.
pub async fn next_stop(events: &mut mpsc::UnboundedReceiver<RuntimeEvent>) -> RuntimeEvent {
    wait_event(events, RuntimeEvent::is_stop).await
}

pub fn stop_line(event: &RuntimeEvent) -> Option<u32> {
    match event {
        RuntimeEvent::StopOnEntry { position }
        | RuntimeEvent::StopOnStep { position }
        | RuntimeEvent::StopOnBreakpoint { position }
        | RuntimeEvent::StopOnExit { position } => position.line,
        _ => None,
    }
}
