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

//! A debug session against one emulator.
//!
//! [`DebugRuntime`] owns the transport and the call-stack tracker. Unsolicited
//! monitor events are applied by a single pump task in wire order; user
//! operations take the transport's operation lock and, while they drive
//! execution, the pump only records state. Each operation that stops the CPU
//! emits exactly one stop event when it is done.

mod breakpoints;
mod events;
mod run_ahead;
mod stepping;
mod variables;

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::call_stack::{CallStackManager, StackTrace};
use crate::checkpoints::CheckpointCategory;
use crate::disasm::{self, verify_scope_memory, ListingLine, MAX_OPCODE_SIZE};
use crate::monitor::{BankMeta, CheckpointSpec, Command, CpuOperation, RegisterMeta};
use crate::symbols::{DebugInfo, LineIdx, MachineType, MapRef, ScopeIdx, SymbolError};
use crate::transport::{ConnectOptions, MonitorTransport, TransportError, TransportEvent};

pub use breakpoints::{Breakpoint, SourceBreakpoints};
pub use events::{MessageLevel, Position, RuntimeEvent};
pub use run_ahead::{RunAheadConfig, SerialLineResume};
pub use variables::VariableData;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("could not launch emulator: {0}")]
    Launch(String),
    #[error("loaded program does not match the debug information")]
    AttachMismatch,
    #[error("the session has ended")]
    NotRunning,
    #[error(transparent)]
    Symbols(#[from] SymbolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid register name: {0}")]
    InvalidRegister(String),
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("unknown breakpoint {0}")]
    UnknownBreakpoint(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// How many resume/verify rounds attach waits for the program to be loaded.
const ATTACH_POLL_LIMIT: usize = 100;

/// Last known CPU registers. Unknown values read as 0xff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct Registers {
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub sp: u16,
    pub fl: u16,
    pub lin: u16,
    pub cyc: u16,
    pub pc: u16,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            a: 0xff,
            x: 0xff,
            y: 0xff,
            sp: 0xff,
            fl: 0xff,
            lin: 0xff,
            cyc: 0xff,
            pc: 0xffff,
        }
    }
}

impl Registers {
    /// Stores a value under the emulator's register name. Returns false for
    /// names this snapshot does not track.
    pub fn set(&mut self, name: &str, value: u16) -> bool {
        let slot = match name.to_ascii_lowercase().as_str() {
            "a" => &mut self.a,
            "x" => &mut self.x,
            "y" => &mut self.y,
            "sp" => &mut self.sp,
            "fl" | "nv-bdizc" => &mut self.fl,
            "lin" => &mut self.lin,
            "cyc" => &mut self.cyc,
            "pc" => &mut self.pc,
            _ => return false,
        };
        *slot = value;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[ts(export, export_to = "bindings/")]
pub struct EmulatorInfo {
    pub version: String,
    pub revision: u32,
}

/// Starts the emulator process. Returns the emulator pid and the pid of any
/// wrapping shell, 0 when there is none.
pub trait Launcher: Send + Sync {
    fn exec(&self, program: &Path, args: &[String], cwd: Option<&Path>) -> Result<(u32, u32)>;
}

/// Spawns the emulator directly with `tokio::process`.
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn exec(&self, program: &Path, args: &[String], cwd: Option<&Path>) -> Result<(u32, u32)> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(false);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .map_err(|e| RuntimeError::Launch(format!("{}: {}", program.display(), e)))?;
        let pid = child.id().unwrap_or(0);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("emulator exited with {}", status),
                Err(e) => debug!("waiting for emulator: {}", e),
            }
        });
        Ok((pid, 0))
    }
}

/// What to start and where its monitor will listen.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub emulator: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub port: u16,
}

impl LaunchRequest {
    /// Emulator arguments: the binary monitor on localhost, then the user's.
    pub fn emulator_args(&self) -> Vec<String> {
        let mut args = vec![
            "-binarymonitor".to_string(),
            "-binarymonitoraddress".to_string(),
            format!("127.0.0.1:{}", self.port),
        ];
        args.extend(self.args.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOptions {
    pub stop_on_entry: bool,
    pub stop_on_exit: bool,
    pub run_ahead: bool,
    pub run_ahead_config: RunAheadConfig,
    /// Overrides the machine named by the debug information.
    pub machine: Option<MachineType>,
    /// Breakpoints to verify as soon as the program has started.
    pub breakpoints: Vec<SourceBreakpoints>,
    #[serde(skip)]
    pub connect: ConnectOptions,
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    starting: bool,
    terminated: bool,
    /// User operations currently driving execution.
    driving: u32,
    /// Set while run-ahead executes; events are dropped.
    ignore_events: bool,
    /// Bumped on every stop so deferred stop handling can tell it is stale.
    stop_generation: u64,
    registers: Registers,
    register_meta: Vec<RegisterMeta>,
    banks: Vec<BankMeta>,
    current_address: u16,
    current_line: Option<LineIdx>,
    breakpoints: Vec<Breakpoint>,
    next_breakpoint_id: u32,
    user_break: Option<u32>,
    exit_queued: bool,
    exit_ids: Vec<u32>,
    code_guard: Option<u32>,
    param_stack_top: Option<u16>,
    param_stack_bottom: Option<u16>,
}

struct Inner {
    transport: Arc<MonitorTransport>,
    call_stack: RwLock<Arc<CallStackManager>>,
    options: RuntimeOptions,
    machine: MachineType,
    state: Mutex<State>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    /// Sequence number of the last transport event the pump has applied.
    processed: watch::Sender<u64>,
}

/// Handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct DebugRuntime {
    inner: Arc<Inner>,
}

/// Holds the operation lock and marks the session as driven by the user.
struct Operation<'a> {
    runtime: &'a DebugRuntime,
    _lock: tokio::sync::MutexGuard<'a, ()>,
}

impl Operation<'_> {
    /// Waits until the pump has seen every event caused so far, then lets go.
    async fn finish(self) -> Result<()> {
        self.runtime.sync().await
    }
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        let mut state = self.runtime.state();
        state.driving = state.driving.saturating_sub(1);
    }
}

impl DebugRuntime {
    fn new(
        transport: MonitorTransport,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        info: DebugInfo,
        map: Vec<MapRef>,
        options: RuntimeOptions,
    ) -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let transport = Arc::new(transport);
        let machine = options.machine.unwrap_or(info.machine_type);
        let call_stack = CallStackManager::new(transport.clone(), Arc::new(info), Arc::new(map));
        let (events, events_rx) = mpsc::unbounded_channel();
        let (processed, _) = watch::channel(0);

        let mut state = State {
            starting: true,
            ..State::default()
        };
        for group in &options.breakpoints {
            for &line in &group.lines {
                state.next_breakpoint_id += 1;
                state
                    .breakpoints
                    .push(Breakpoint::new(state.next_breakpoint_id, &group.file, line));
            }
        }

        let runtime = DebugRuntime {
            inner: Arc::new(Inner {
                transport,
                call_stack: RwLock::new(Arc::new(call_stack)),
                options,
                machine,
                state: Mutex::new(state),
                events,
                processed,
            }),
        };
        tokio::spawn(events::pump(runtime.clone(), transport_events));
        (runtime, events_rx)
    }

    /// Launches the emulator, loads the program and runs it to its entry.
    pub async fn start(
        request: &LaunchRequest,
        info: DebugInfo,
        map: Vec<MapRef>,
        options: RuntimeOptions,
        launcher: &dyn Launcher,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RuntimeEvent>)> {
        let machine = options.machine.unwrap_or(info.machine_type);
        if matches!(machine, MachineType::Nes | MachineType::Apple2) {
            return Err(RuntimeError::Launch(format!(
                "{:?} programs cannot be debugged with this emulator",
                machine
            )));
        }
        let args = request.emulator_args();
        let (pid, shell_pid) = launcher.exec(&request.emulator, &args, request.cwd.as_deref())?;
        info!(
            "launched {} (pid {}) with monitor on port {}",
            request.emulator.display(),
            pid,
            request.port
        );

        let addr = SocketAddr::from(([127, 0, 0, 1], request.port));
        let (transport, transport_events) = MonitorTransport::connect(addr, options.connect)
            .await
            .map_err(|e| RuntimeError::Launch(e.to_string()))?;
        transport.set_pids(&[pid, shell_pid]);
        let (runtime, events) = Self::new(transport, transport_events, info, map, options);

        let program = request.program.to_string_lossy().into_owned();
        let started = async {
            runtime
                .inner
                .transport
                .autostart(&program)
                .await
                .map_err(|e| RuntimeError::Launch(format!("could not autostart {}: {}", program, e)))?;
            runtime.post_emulator_start().await?;
            let entry = runtime.info().entry_address;
            let t = &runtime.inner.transport;
            t.set_checkpoint(
                CheckpointSpec {
                    temporary: true,
                    ..CheckpointSpec::at(entry, CpuOperation::EXEC, true)
                },
                CheckpointCategory::Guard,
            )
            .await?;
            t.resume_and_wait(Some(entry), None, true).await?;
            runtime.post_full_start().await
        }
        .await;
        if let Err(e) = started {
            runtime.terminate().await;
            return Err(e);
        }
        Ok((runtime, events))
    }

    /// Connects to an emulator that is already running the program.
    pub async fn attach(
        port: u16,
        info: DebugInfo,
        map: Vec<MapRef>,
        options: RuntimeOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RuntimeEvent>)> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let (transport, transport_events) = MonitorTransport::connect(addr, options.connect).await?;
        let (runtime, events) = Self::new(transport, transport_events, info, map, options);

        let attached = async {
            runtime.post_emulator_start().await?;
            runtime.attach_wait().await?;
            runtime.resume().await?;
            runtime.inner.transport.ping().await?;
            runtime.post_full_start().await
        }
        .await;
        if let Err(e) = attached {
            runtime.disconnect().await;
            return Err(e);
        }
        Ok((runtime, events))
    }

    async fn post_emulator_start(&self) -> Result<()> {
        let t = &self.inner.transport;
        let (meta, banks) = tokio::try_join!(t.registers_available(), t.banks_available())?;
        debug!("{} registers, {} banks", meta.len(), banks.len());
        let mut state = self.state();
        state.register_meta = meta;
        state.banks = banks;
        Ok(())
    }

    /// The first and last C function large enough to fingerprint.
    fn probe_scopes(info: &DebugInfo) -> Vec<ScopeIdx> {
        let candidates: Vec<ScopeIdx> = (0..info.scopes.len())
            .filter(|&i| {
                let scope = &info.scopes[i];
                scope.code_span.is_some()
                    && scope.name.starts_with('_')
                    && scope.size as usize > MAX_OPCODE_SIZE
            })
            .collect();
        let mut probes: Vec<ScopeIdx> = candidates
            .first()
            .into_iter()
            .chain(candidates.last())
            .copied()
            .collect();
        probes.dedup();
        probes
    }

    async fn validate_load(&self, info: &DebugInfo, scopes: &[ScopeIdx]) -> Result<bool> {
        for &scope in scopes {
            let Some(range) = info.scope_range(scope) else {
                continue;
            };
            let memory = self
                .inner
                .transport
                .get_memory(range.start, range.size as usize)
                .await?;
            if !verify_scope_memory(info, scope, &memory) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn attach_wait(&self) -> Result<()> {
        let info = self.info();
        let scopes = Self::probe_scopes(&info);
        if self.validate_load(&info, &scopes).await? {
            return Ok(());
        }

        self.message(MessageLevel::Info, "Waiting for program to start...");
        let specs: Vec<CheckpointSpec> = scopes
            .iter()
            .filter_map(|&s| info.scope_range(s))
            .flat_map(|r| [r.start, r.last()])
            .map(|a| CheckpointSpec::at(a, CpuOperation::STORE, true))
            .collect();
        let t = &self.inner.transport;
        t.with_all_breaks_disabled(|| async {
            let watches = t.set_checkpoints(&specs, CheckpointCategory::Transient).await?;
            let ids: Vec<u32> = watches.iter().map(|w| w.id).collect();
            let mut outcome = Err(RuntimeError::AttachMismatch);
            for attempt in 1..=ATTACH_POLL_LIMIT {
                if let Err(e) = t.resume_and_wait(None, None, false).await {
                    outcome = Err(e.into());
                    break;
                }
                match self.validate_load(&info, &scopes).await {
                    Ok(true) => {
                        outcome = Ok(());
                        break;
                    }
                    Ok(false) => debug!("program not loaded yet (attempt {})", attempt),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            if let Err(e) = t.delete_checkpoints(&ids).await {
                debug!("removing load watches: {}", e);
            }
            outcome
        })
        .await?;
        self.message(MessageLevel::Info, "Program started.");
        Ok(())
    }

    async fn post_full_start(&self) -> Result<()> {
        self.sync().await?;
        let (address, line) = self.current();
        let call_stack = self.call_stack();
        tokio::try_join!(
            async { call_stack.reset(address, line).await.map_err(RuntimeError::from) },
            self.set_exit_guard(),
            self.guard_code_segment(),
            async { self.update_param_stack().await.map(|_| ()) },
        )?;

        {
            let op = self.begin_op().await;
            self.do_run_ahead().await?;
            op.finish().await?;
        }
        self.state().starting = false;
        self.verify_breakpoints().await?;

        if self.inner.options.stop_on_entry {
            self.emit(RuntimeEvent::StopOnEntry {
                position: self.position(),
            });
        } else {
            self.resume().await?;
        }
        self.emit(RuntimeEvent::Started);
        info!("session started at ${:04x}", address);
        Ok(())
    }

    /// Stop checkpoints on every address at which the program is finished.
    async fn set_exit_guard(&self) -> Result<()> {
        let exits = self.call_stack().exit_addresses().await?;
        let specs: Vec<CheckpointSpec> = exits
            .iter()
            .map(|&a| CheckpointSpec::at(a, CpuOperation::EXEC, true))
            .collect();
        let set = self
            .inner
            .transport
            .set_checkpoints(&specs, CheckpointCategory::Guard)
            .await?;
        debug!("exit guard at {:04x?}", exits);
        self.state().exit_ids = set.iter().map(|c| c.id).collect();
        Ok(())
    }

    /// A store checkpoint over the code segment to catch self-corruption.
    async fn guard_code_segment(&self) -> Result<()> {
        let Some(code) = self.info().code_range() else {
            return Ok(());
        };
        let guard = self
            .inner
            .transport
            .set_checkpoint(
                CheckpointSpec::range(code.start, code.last(), CpuOperation::STORE, true),
                CheckpointCategory::Guard,
            )
            .await?;
        self.state().code_guard = Some(guard.id);
        Ok(())
    }

    async fn remove_guards(&self) {
        let ids: Vec<u32> = {
            let mut state = self.state();
            let mut ids = std::mem::take(&mut state.exit_ids);
            ids.extend(state.code_guard.take());
            ids
        };
        if ids.is_empty() || self.inner.transport.is_closed() {
            return;
        }
        if let Err(e) = self.inner.transport.delete_checkpoints(&ids).await {
            debug!("removing guards: {}", e);
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn call_stack(&self) -> Arc<CallStackManager> {
        self.inner
            .call_stack
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn info(&self) -> Arc<DebugInfo> {
        self.call_stack().info().clone()
    }

    pub fn machine(&self) -> MachineType {
        self.inner.machine
    }

    fn current(&self) -> (u16, Option<LineIdx>) {
        let state = self.state();
        (state.current_address, state.current_line)
    }

    fn update_position(&self, pc: u16) {
        let line = self.info().line_at(pc);
        let mut state = self.state();
        state.current_address = pc;
        state.current_line = line;
        state.registers.pc = pc;
    }

    pub fn position(&self) -> Position {
        let info = self.info();
        let (address, line) = self.current();
        Position {
            address,
            file: line.and_then(|l| info.line_file(l)).map(|f| f.name.clone()),
            line: line.map(|l| info.lines[l].num),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.inner.events.send(event);
    }

    fn message(&self, level: MessageLevel, content: &str) {
        match level {
            MessageLevel::Error => warn!("{}", content),
            _ => info!("{}", content),
        }
        self.emit(RuntimeEvent::Message {
            level,
            content: content.to_string(),
        });
    }

    async fn begin_op(&self) -> Operation<'_> {
        let lock = self.inner.transport.lock().await;
        self.state().driving += 1;
        Operation {
            runtime: self,
            _lock: lock,
        }
    }

    /// Runs `f` as a user operation. Any command stops a running CPU, so
    /// execution is resumed afterwards if it was running.
    async fn silenced<T, E, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        RuntimeError: From<E>,
    {
        if self.inner.transport.is_closed() {
            return Err(RuntimeError::NotRunning);
        }
        let op = self.begin_op().await;
        let was_running = self.state().running;
        let result = f().await.map_err(RuntimeError::from);
        op.finish().await?;
        if was_running {
            self.inner.transport.resume().await?;
        }
        result
    }

    /// Waits until the pump has applied every event the emulator sent before
    /// answering a ping.
    pub async fn sync(&self) -> Result<()> {
        if self.inner.transport.is_closed() {
            return Ok(());
        }
        self.inner.transport.ping().await?;
        let target = self.inner.transport.last_event_seq();
        let mut processed = self.inner.processed.subscribe();
        let _ = processed.wait_for(|&seq| seq >= target).await;
        Ok(())
    }

    /// Emits the stop event recorded by the pump for the latest stop.
    fn emit_pending_stop(&self) {
        let (exit, user_break) = {
            let mut state = self.state();
            (state.exit_queued, state.user_break.take())
        };
        let position = self.position();
        self.emit(if exit {
            RuntimeEvent::StopOnExit { position }
        } else if user_break.is_some() {
            RuntimeEvent::StopOnBreakpoint { position }
        } else {
            RuntimeEvent::StopOnStep { position }
        });
    }

    /// Leaves the monitor.
    pub async fn resume(&self) -> Result<()> {
        self.inner.transport.resume().await?;
        if !self.state().starting {
            self.emit(RuntimeEvent::Continued);
        }
        Ok(())
    }

    /// Stops the CPU wherever it is.
    pub async fn pause(&self) -> Result<()> {
        let op = self.begin_op().await;
        self.inner.transport.ping().await?;
        self.sync().await?;
        self.do_run_ahead().await?;
        op.finish().await?;
        self.emit_pending_stop();
        Ok(())
    }

    pub fn get_registers(&self) -> Registers {
        self.state().registers
    }

    pub fn stack(&self) -> StackTrace {
        let call_stack = self.call_stack();
        call_stack.flush();
        let position = self.position();
        call_stack.pretty_stack(position.address, position.file.as_deref(), position.line)
    }

    pub async fn get_memory(&self, address: u16, length: usize) -> Result<Vec<u8>> {
        self.silenced(|| self.inner.transport.get_memory(address, length))
            .await
    }

    pub async fn set_memory(&self, address: u16, data: &[u8]) -> Result<()> {
        self.silenced(|| self.inner.transport.set_memory(address, data))
            .await
    }

    pub async fn disassemble(&self, address: u16, length: usize) -> Result<Vec<ListingLine>> {
        let memory = self.get_memory(address, length).await?;
        let call_stack = self.call_stack();
        Ok(disasm::disassemble(
            &memory,
            address,
            call_stack.info(),
            call_stack.map(),
        ))
    }

    /// Types `text` into the emulated keyboard buffer.
    pub async fn keypress(&self, text: &str) -> Result<()> {
        let command = Command::KeyboardFeed {
            text: text.to_string(),
        };
        self.silenced(|| self.inner.transport.exec(command))
            .await
            .map(|_| ())
    }

    pub async fn emulator_info(&self) -> Result<EmulatorInfo> {
        let (version, revision) = self
            .silenced(|| self.inner.transport.emulator_info())
            .await?;
        let version = version
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Ok(EmulatorInfo { version, revision })
    }

    /// Swaps in new debug information after the program was rebuilt, then
    /// rebuilds call tracking and guards and re-verifies every breakpoint.
    pub async fn reload_symbols(&self, info: DebugInfo, map: Vec<MapRef>) -> Result<()> {
        if self.state().terminated {
            return Err(RuntimeError::NotRunning);
        }
        let t = self.inner.transport.clone();
        let op = self.begin_op().await;
        let was_running = self.state().running;
        t.ping().await?;
        self.sync().await?;

        self.call_stack().cleanup().await;
        self.remove_guards().await;
        let stale: Vec<u32> = {
            let mut state = self.state();
            state
                .breakpoints
                .iter_mut()
                .filter_map(|bp| {
                    bp.verified = false;
                    bp.address = None;
                    bp.checkpoint.take()
                })
                .collect()
        };
        if !stale.is_empty() {
            if let Err(e) = t.delete_checkpoints(&stale).await {
                debug!("removing stale breakpoints: {}", e);
            }
        }

        let call_stack = Arc::new(CallStackManager::new(t.clone(), Arc::new(info), Arc::new(map)));
        *self
            .inner
            .call_stack
            .write()
            .unwrap_or_else(|e| e.into_inner()) = call_stack.clone();
        let address = self.state().current_address;
        self.update_position(address);
        let top = self.state().registers.sp;
        call_stack.set_cpu_stack_top(0x100 + (top & 0xff));
        let line = self.current().1;
        tokio::try_join!(
            async { call_stack.reset(address, line).await.map_err(RuntimeError::from) },
            self.set_exit_guard(),
            self.guard_code_segment(),
        )?;
        op.finish().await?;
        info!("debug information reloaded");

        self.verify_breakpoints().await?;
        if was_running {
            t.resume().await?;
        }
        Ok(())
    }

    /// Quits the emulator and ends the session. Safe to call more than once.
    pub async fn terminate(&self) {
        if std::mem::replace(&mut self.state().terminated, true) {
            return;
        }
        info!("terminating session");
        self.inner.transport.terminate().await;
        self.emit(RuntimeEvent::End);
    }

    /// Removes everything this session installed and leaves the emulator
    /// running.
    pub async fn disconnect(&self) {
        if std::mem::replace(&mut self.state().terminated, true) {
            return;
        }
        let t = &self.inner.transport;
        if !t.is_closed() {
            self.call_stack().cleanup().await;
            self.remove_guards().await;
            let mut ids: Vec<u32> = {
                let mut state = self.state();
                state
                    .breakpoints
                    .iter_mut()
                    .filter_map(|bp| bp.checkpoint.take())
                    .collect()
            };
            // Leftovers of an interrupted step.
            ids.extend(t.registry().ids(CheckpointCategory::Transient));
            ids.extend(t.registry().ids(CheckpointCategory::Guard));
            if !ids.is_empty() {
                if let Err(e) = t.delete_checkpoints(&ids).await {
                    debug!("removing breakpoints: {}", e);
                }
            }
            if !t.registry().is_empty() {
                warn!("{} checkpoints left in the emulator", t.registry().len());
            }
            if let Err(e) = t.resume().await {
                debug!("resume before disconnect: {}", e);
            }
        }
        t.disconnect().await;
        info!("disconnected");
        self.emit(RuntimeEvent::End);
    }
}
