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

//! Request/response multiplexer over the binary monitor socket.
//!
//! One reader task owns the read half of the socket. It reassembles frames and
//! routes each response either to the waiter registered under its request id
//! or, for unsolicited events, to the event channel handed out by
//! [`MonitorTransport::connect`]. Stop events are additionally broadcast so
//! that [`MonitorTransport::wait_for_stop`] can observe them without
//! consuming the ordered event stream.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::checkpoints::{CheckpointCategory, CheckpointRegistry};
use crate::monitor::frame::{decode_response, encode_command, FrameAssembler};
use crate::monitor::{
    BankMeta, CheckpointInfo, CheckpointSpec, CodecError, Command, MemSpace, RegisterMeta,
    RegisterValue, Response, ResponseBody, EVENT_REQUEST_ID,
};
use crate::trace_frame;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("emulator rejected command 0x{command:02x} with error 0x{code:02x}")]
    Wire { code: u8, command: u8 },
    #[error("binary monitor stream lost framing")]
    ProtocolDesync,
    #[error("binary monitor connection closed")]
    Closed,
    #[error("could not connect to {addr} after {attempts} attempts: {message}")]
    Connect {
        addr: SocketAddr,
        attempts: u32,
        message: String,
    },
    #[error("command 0x{command:02x} answered with unexpected response 0x{response:02x}")]
    Unexpected { command: u8, response: u8 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Why the connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The emulator closed the socket.
    Eof,
    Io(String),
    Desync,
    /// [`MonitorTransport::disconnect`] was called.
    Disconnected,
}

/// Items of the ordered event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An unsolicited response. `seq` increases by one per event.
    Monitor { seq: u64, response: Response },
    Closed(CloseReason),
}

/// A stop notification as seen by [`MonitorTransport::wait_for_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopEvent {
    /// Sequence number of the matching [`TransportEvent::Monitor`].
    pub seq: u64,
    pub pc: u16,
}

pub type StopSubscription = broadcast::Receiver<StopEvent>;

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(200),
        }
    }
}

/// Grace period between the quit command and force-killing the emulator.
const KILL_GRACE: Duration = Duration::from_secs(1);

struct Pending {
    command_type: u8,
    terminal: Option<u8>,
    related: Vec<Response>,
    tx: oneshot::Sender<Result<Response>>,
}

struct Shared {
    pending: Mutex<HashMap<u32, Pending>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    stops: Mutex<Option<broadcast::Sender<StopEvent>>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u32, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, mut response: Response) {
        if response.is_event() {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
            if let ResponseBody::Stopped { pc } = response.body {
                if let Some(tx) = self.stops.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                    let _ = tx.send(StopEvent { seq, pc });
                }
            }
            let _ = self.events.send(TransportEvent::Monitor { seq, response });
            return;
        }

        let mut pending = self.pending();
        let id = response.request_id;
        let finished = match pending.get_mut(&id) {
            None => {
                debug!(
                    "dropping response 0x{:02x} for unknown request 0x{:08x}",
                    response.type_code(),
                    id
                );
                return;
            }
            Some(waiter) => {
                response.error != 0
                    || waiter
                        .terminal
                        .map_or(true, |terminal| terminal == response.type_code())
            }
        };

        if !finished {
            if let Some(waiter) = pending.get_mut(&id) {
                waiter.related.push(response);
            }
            return;
        }
        if let Some(waiter) = pending.remove(&id) {
            let result = if response.error != 0 {
                Err(TransportError::Wire {
                    code: response.error,
                    command: waiter.command_type,
                })
            } else {
                response.related = waiter.related;
                Ok(response)
            };
            let _ = waiter.tx.send(result);
        }
    }

    fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let desync = reason == CloseReason::Desync;
        for (_, waiter) in self.pending().drain() {
            let err = if desync {
                TransportError::ProtocolDesync
            } else {
                TransportError::Closed
            };
            let _ = waiter.tx.send(Err(err));
        }
        // Dropping the sender wakes every stop waiter with a closed error.
        self.stops.lock().unwrap_or_else(|e| e.into_inner()).take();
        let _ = self.events.send(TransportEvent::Closed(reason));
    }
}

pub struct MonitorTransport {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<CheckpointRegistry>,
    pids: Mutex<Vec<u32>>,
    op_lock: tokio::sync::Mutex<()>,
}

impl MonitorTransport {
    /// Connects to a monitor port that may not be listening yet, retrying
    /// within the budget of `options`.
    pub async fn connect(
        addr: SocketAddr,
        options: ConnectOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt < options.attempts.max(1) => {
                    debug!("connect to {} failed (attempt {}): {}", addr, attempt, e);
                    tokio::time::sleep(options.interval).await;
                }
                Err(e) => {
                    return Err(TransportError::Connect {
                        addr,
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            }
        };
        stream.set_nodelay(true)?;
        info!("connected to binary monitor at {}", addr);
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (read, write) = stream.into_split();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (stops, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            events,
            stops: Mutex::new(Some(stops)),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(read, shared.clone()));
        let transport = Self {
            shared,
            writer: tokio::sync::Mutex::new(Some(write)),
            reader: Mutex::new(Some(reader)),
            registry: Arc::new(CheckpointRegistry::new()),
            pids: Mutex::new(Vec::new()),
            op_lock: tokio::sync::Mutex::new(()),
        };
        (transport, events_rx)
    }

    pub fn registry(&self) -> &Arc<CheckpointRegistry> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Sequence number of the latest unsolicited event read from the socket.
    pub fn last_event_seq(&self) -> u64 {
        self.shared.next_seq.load(Ordering::SeqCst)
    }

    /// Remembers processes to kill on [`MonitorTransport::terminate`].
    pub fn set_pids(&self, pids: &[u32]) {
        let mut guard = self.pids.lock().unwrap_or_else(|e| e.into_inner());
        guard.clear();
        guard.extend(pids.iter().copied().filter(|&p| p > 0));
    }

    /// Serialises multi-command operations that belong to one user action.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// Sends all commands in one write. Results are in submission order;
    /// an error reply fails only its own command.
    pub async fn multi_exec(&self, commands: &[Command]) -> Result<Vec<Result<Response>>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut bytes = Vec::new();
        let mut ids = Vec::with_capacity(commands.len());
        let mut receivers = Vec::with_capacity(commands.len());
        {
            let mut pending = self.shared.pending();
            let mut rng = rand::thread_rng();
            for command in commands {
                let id = loop {
                    let id: u32 = rng.gen();
                    if id != EVENT_REQUEST_ID && !pending.contains_key(&id) {
                        break id;
                    }
                };
                let frame = match encode_command(command, id) {
                    Ok(frame) => frame,
                    Err(e) => {
                        for id in &ids {
                            pending.remove(id);
                        }
                        return Err(e.into());
                    }
                };
                debug!("-> {:?} id=0x{:08x}", command, id);
                trace_frame!("->", &frame);
                bytes.extend_from_slice(&frame);
                let (tx, rx) = oneshot::channel();
                pending.insert(
                    id,
                    Pending {
                        command_type: command.command_type(),
                        terminal: command.terminal_response(),
                        related: Vec::new(),
                        tx,
                    },
                );
                ids.push(id);
                receivers.push(rx);
            }
        }

        if let Err(e) = self.write_all(&bytes).await {
            let mut pending = self.shared.pending();
            for id in &ids {
                pending.remove(id);
            }
            return Err(e);
        }

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(rx.await.unwrap_or(Err(TransportError::Closed)));
        }
        Ok(results)
    }

    /// Like [`MonitorTransport::multi_exec`] but fails on the first error.
    pub async fn exec_batch(&self, commands: &[Command]) -> Result<Vec<Response>> {
        self.multi_exec(commands).await?.into_iter().collect()
    }

    pub async fn exec(&self, command: Command) -> Result<Response> {
        self.multi_exec(std::slice::from_ref(&command))
            .await?
            .pop()
            .unwrap_or(Err(TransportError::Closed))
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(TransportError::Closed);
        };
        w.write_all(bytes).await?;
        w.flush().await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.exec(Command::Ping).await.map(|_| ())
    }

    /// Leaves the monitor; the emulator resumes execution.
    pub async fn resume(&self) -> Result<()> {
        self.exec(Command::Exit).await.map(|_| ())
    }

    pub async fn get_memory(&self, address: u16, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = (address as usize + length - 1).min(0xffff) as u16;
        let cmd = Command::memory_get(address, end);
        match self.exec(cmd).await?.body {
            ResponseBody::MemoryGet { memory } => Ok(memory),
            other => Err(unexpected(crate::monitor::command_type::MEMORY_GET, &other)),
        }
    }

    pub async fn set_memory(&self, address: u16, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.exec(Command::memory_set(address, data.to_vec()))
            .await
            .map(|_| ())
    }

    pub async fn checkpoint_list(&self) -> Result<Vec<CheckpointInfo>> {
        let response = self.exec(Command::CheckpointList).await?;
        Ok(response
            .related
            .into_iter()
            .filter_map(|r| match r.body {
                ResponseBody::CheckpointInfo(info) => Some(info),
                _ => None,
            })
            .collect())
    }

    /// Creates checkpoints in one batch and records them under `category`.
    pub async fn set_checkpoints(
        &self,
        specs: &[CheckpointSpec],
        category: CheckpointCategory,
    ) -> Result<Vec<CheckpointInfo>> {
        let commands: Vec<Command> = specs.iter().map(|s| Command::CheckpointSet(*s)).collect();
        let responses = self.exec_batch(&commands).await?;
        let mut infos = Vec::with_capacity(responses.len());
        for (spec, response) in specs.iter().zip(responses) {
            match response.body {
                ResponseBody::CheckpointInfo(info) => {
                    self.registry.record(info.id, category, *spec);
                    infos.push(info);
                }
                other => {
                    return Err(unexpected(
                        crate::monitor::command_type::CHECKPOINT_SET,
                        &other,
                    ))
                }
            }
        }
        Ok(infos)
    }

    pub async fn set_checkpoint(
        &self,
        spec: CheckpointSpec,
        category: CheckpointCategory,
    ) -> Result<CheckpointInfo> {
        self.set_checkpoints(&[spec], category)
            .await?
            .pop()
            .ok_or(TransportError::Closed)
    }

    pub async fn delete_checkpoints(&self, ids: &[u32]) -> Result<()> {
        let commands: Vec<Command> = ids
            .iter()
            .map(|&id| Command::CheckpointDelete { id })
            .collect();
        let mut first_err = None;
        for (id, result) in ids.iter().zip(self.multi_exec(&commands).await?) {
            match result {
                Ok(_) => {
                    self.registry.forget(*id);
                }
                Err(e) => {
                    debug!("delete of checkpoint {} failed: {}", id, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub async fn toggle_checkpoints(&self, ids: &[u32], enabled: bool) -> Result<()> {
        let commands: Vec<Command> = ids
            .iter()
            .map(|&id| Command::CheckpointToggle { id, enabled })
            .collect();
        self.exec_batch(&commands).await.map(|_| ())
    }

    pub async fn set_condition(&self, checkpoint_id: u32, condition: &str) -> Result<()> {
        self.exec(Command::ConditionSet {
            checkpoint_id,
            condition: condition.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn registers_get(&self) -> Result<Vec<RegisterValue>> {
        let response = self
            .exec(Command::RegistersGet {
                memspace: MemSpace::Main,
            })
            .await?;
        match response.body {
            ResponseBody::RegisterInfo { registers } => Ok(registers),
            other => Err(unexpected(
                crate::monitor::command_type::REGISTERS_GET,
                &other,
            )),
        }
    }

    pub async fn registers_set(&self, registers: Vec<RegisterValue>) -> Result<()> {
        self.exec(Command::RegistersSet {
            memspace: MemSpace::Main,
            registers,
        })
        .await
        .map(|_| ())
    }

    pub async fn registers_available(&self) -> Result<Vec<RegisterMeta>> {
        let response = self
            .exec(Command::RegistersAvailable {
                memspace: MemSpace::Main,
            })
            .await?;
        match response.body {
            ResponseBody::RegistersAvailable { registers } => Ok(registers),
            other => Err(unexpected(
                crate::monitor::command_type::REGISTERS_AVAILABLE,
                &other,
            )),
        }
    }

    pub async fn banks_available(&self) -> Result<Vec<BankMeta>> {
        match self.exec(Command::BanksAvailable).await?.body {
            ResponseBody::BanksAvailable { banks } => Ok(banks),
            other => Err(unexpected(
                crate::monitor::command_type::BANKS_AVAILABLE,
                &other,
            )),
        }
    }

    pub async fn emulator_info(&self) -> Result<(Vec<u8>, u32)> {
        match self.exec(Command::EmulatorInfo).await?.body {
            ResponseBody::EmulatorInfo { version, revision } => Ok((version, revision)),
            other => Err(unexpected(
                crate::monitor::command_type::EMULATOR_INFO,
                &other,
            )),
        }
    }

    pub async fn dump(&self, filename: &str) -> Result<()> {
        self.exec(Command::Dump {
            save_roms: false,
            save_disks: false,
            filename: filename.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Restores a snapshot and returns the restored program counter.
    pub async fn undump(&self, filename: &str) -> Result<u16> {
        match self
            .exec(Command::Undump {
                filename: filename.to_string(),
            })
            .await?
            .body
        {
            ResponseBody::Undump { pc } => Ok(pc),
            other => Err(unexpected(crate::monitor::command_type::UNDUMP, &other)),
        }
    }

    pub async fn autostart(&self, program: &str) -> Result<()> {
        self.exec(Command::Autostart {
            run: true,
            file_index: 0,
            filename: program.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub fn subscribe_stops(&self) -> Result<StopSubscription> {
        self.shared
            .stops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(TransportError::Closed)
    }

    /// Waits for the first stop matching the range. Subscribe before writing
    /// the command that resumes execution so the stop cannot be missed.
    pub async fn wait_for_stop(
        &self,
        stops: &mut StopSubscription,
        start: Option<u16>,
        end: Option<u16>,
        continue_if_unmatched: bool,
    ) -> Result<StopEvent> {
        loop {
            match stops.recv().await {
                Ok(stop) if stop_matches(stop.pc, start, end) => return Ok(stop),
                Ok(stop) => {
                    debug!("ignoring stop at ${:04x}", stop.pc);
                    if continue_if_unmatched {
                        self.resume().await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("stop waiter lagged by {} events", n)
                }
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }

    /// Resumes and waits for a matching stop.
    pub async fn resume_and_wait(
        &self,
        start: Option<u16>,
        end: Option<u16>,
        continue_if_unmatched: bool,
    ) -> Result<StopEvent> {
        let mut stops = self.subscribe_stops()?;
        self.resume().await?;
        self.wait_for_stop(&mut stops, start, end, continue_if_unmatched)
            .await
    }

    /// Runs `f` with every enabled stop checkpoint disabled, then re-enables
    /// those of them that still exist. Restoration also runs when `f` fails.
    pub async fn with_all_breaks_disabled<T, E, F, Fut>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<TransportError>,
    {
        let toggled: Vec<u32> = self
            .checkpoint_list()
            .await?
            .iter()
            .filter(|c| c.stop && c.enabled)
            .map(|c| c.id)
            .collect();
        self.toggle_checkpoints(&toggled, false).await?;

        let result = f().await;

        let restored = self.reenable_existing(&toggled).await;
        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore_err)) => {
                warn!("restoring checkpoints failed: {}", restore_err);
                Err(e)
            }
        }
    }

    /// Re-enables those of `ids` the emulator still knows about.
    pub async fn reenable_existing(&self, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let existing = self.checkpoint_list().await?;
        let remaining: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|id| existing.iter().any(|c| c.id == *id))
            .collect();
        self.toggle_checkpoints(&remaining, true).await
    }

    /// Closes the socket. Outstanding waiters fail with [`TransportError::Closed`].
    pub async fn disconnect(&self) {
        if let Some(mut w) = self.writer.lock().await.take() {
            if let Err(e) = w.shutdown().await {
                debug!("socket shutdown: {}", e);
            }
        }
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        self.shared.close(CloseReason::Disconnected);
        self.registry.clear();
    }

    /// Best-effort quit, then force-kill the launched processes after a grace
    /// period, then disconnect.
    pub async fn terminate(&self) {
        if !self.is_closed() {
            if let Err(e) = self.exec(Command::Quit).await {
                debug!("quit failed: {}", e);
            }
        }
        let pids = std::mem::take(&mut *self.pids.lock().unwrap_or_else(|e| e.into_inner()));
        if !pids.is_empty() {
            tokio::spawn(async move {
                tokio::time::sleep(KILL_GRACE).await;
                kill_all(&pids);
            });
        }
        self.disconnect().await;
    }
}

impl Drop for MonitorTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
    }
}

/// Stop matching rule: without an end address, any stop matches when no
/// start is given, else only a stop exactly at `start`. With an end address
/// the stop must lie in `start..=end`.
pub fn stop_matches(pc: u16, start: Option<u16>, end: Option<u16>) -> bool {
    match end {
        None => start.map_or(true, |s| pc == s),
        Some(end) => start.unwrap_or(0) <= pc && pc <= end,
    }
}

fn unexpected(command: u8, body: &ResponseBody) -> TransportError {
    TransportError::Unexpected {
        command,
        response: body.type_code(),
    }
}

#[cfg(unix)]
fn kill_all(pids: &[u32]) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    for &pid in pids {
        let pid = Pid::from_raw(pid as i32);
        if kill(pid, None).is_ok() {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                debug!("kill {}: {}", pid, e);
            }
        }
    }
}

#[cfg(not(unix))]
fn kill_all(pids: &[u32]) {
    for pid in pids {
        debug!("not killing {}: unsupported platform", pid);
    }
}

async fn read_loop(mut read: OwnedReadHalf, shared: Arc<Shared>) {
    let mut assembler = FrameAssembler::for_responses();
    let mut buf = vec![0u8; 16 * 1024];
    let reason = 'outer: loop {
        let n = match read.read(&mut buf).await {
            Ok(0) => break CloseReason::Eof,
            Ok(n) => n,
            Err(e) => break CloseReason::Io(e.to_string()),
        };
        assembler.push(&buf[..n]);
        loop {
            match assembler.next_frame() {
                Ok(Some(frame)) => {
                    trace_frame!("<-", &frame);
                    match decode_response(&frame) {
                        Ok(response) => shared.dispatch(response),
                        Err(e) => {
                            error!("undecodable response frame: {}", e);
                            break 'outer CloseReason::Desync;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("binary monitor desync: {}", e);
                    break 'outer CloseReason::Desync;
                }
            }
        }
    };
    info!("binary monitor reader finished: {:?}", reason);
    shared.close(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::frame::{decode_command, encode_response};
    use tokio::net::TcpListener;

    #[test]
    fn stop_match_rule() {
        assert!(stop_matches(0x1234, None, None));
        assert!(stop_matches(0x0810, Some(0x0810), None));
        assert!(!stop_matches(0x0811, Some(0x0810), None));
        assert!(stop_matches(0x0810, Some(0x0800), Some(0x0810)));
        assert!(!stop_matches(0x0811, Some(0x0800), Some(0x0810)));
        assert!(stop_matches(0x0005, None, Some(0x0010)));
    }

    async fn pair() -> (
        MonitorTransport,
        mpsc::UnboundedReceiver<TransportEvent>,
        TcpStream,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) =
            tokio::join!(MonitorTransport::connect(addr, ConnectOptions::default()), listener.accept());
        let (transport, events) = connected.unwrap();
        (transport, events, accepted.unwrap().0)
    }

    async fn read_commands(peer: &mut TcpStream, count: usize) -> Vec<(u32, Command)> {
        let mut asm = FrameAssembler::for_commands();
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < count {
            let n = peer.read(&mut buf).await.unwrap();
            asm.push(&buf[..n]);
            while let Some(frame) = asm.next_frame().unwrap() {
                out.push(decode_command(&frame).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn batch_results_follow_submission_order() {
        let (transport, _events, mut peer) = pair().await;
        let commands = vec![
            Command::memory_get(0x0800, 0x0800),
            Command::memory_get(0x0900, 0x0901),
            Command::Ping,
        ];
        let server = tokio::spawn(async move {
            let received = read_commands(&mut peer, 3).await;
            // Answer in reverse order, the memory read of 0x0900 with an error.
            let mut bytes = Vec::new();
            for (id, cmd) in received.iter().rev() {
                let mut response = match cmd {
                    Command::MemoryGet { start, end, .. } => Response::reply(
                        *id,
                        ResponseBody::MemoryGet {
                            memory: vec![(*start >> 8) as u8; (*end - *start + 1) as usize],
                        },
                    ),
                    _ => Response::reply(*id, ResponseBody::Ping),
                };
                if matches!(cmd, Command::MemoryGet { start: 0x0900, .. }) {
                    response.error = 0x81;
                }
                bytes.extend(encode_response(&response).unwrap());
            }
            peer.write_all(&bytes).await.unwrap();
            peer
        });

        let results = transport.multi_exec(&commands).await.unwrap();
        assert_eq!(
            results[0].as_ref().unwrap().body,
            ResponseBody::MemoryGet { memory: vec![0x08] }
        );
        assert!(matches!(
            results[1],
            Err(TransportError::Wire {
                code: 0x81,
                command: 0x01
            })
        ));
        assert_eq!(results[2].as_ref().unwrap().body, ResponseBody::Ping);
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_list_collects_related_items() {
        let (transport, _events, mut peer) = pair().await;
        let server = tokio::spawn(async move {
            let (id, _) = read_commands(&mut peer, 1).await.remove(0);
            let mut bytes = Vec::new();
            for cp in [1u32, 2] {
                let info = CheckpointInfo {
                    id: cp,
                    hit: false,
                    start: 0x0800,
                    end: 0x0800,
                    stop: true,
                    enabled: true,
                    operation: crate::monitor::CpuOperation::EXEC,
                    temporary: false,
                    hit_count: 0,
                    ignore_count: 0,
                    has_condition: false,
                };
                bytes.extend(
                    encode_response(&Response::reply(id, ResponseBody::CheckpointInfo(info)))
                        .unwrap(),
                );
            }
            bytes.extend(
                encode_response(&Response::reply(id, ResponseBody::CheckpointList { count: 2 }))
                    .unwrap(),
            );
            peer.write_all(&bytes).await.unwrap();
            peer
        });
        let list = transport.checkpoint_list().await.unwrap();
        assert_eq!(list.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn events_and_stops_are_sequenced() {
        let (transport, mut events, mut peer) = pair().await;
        let mut stops = transport.subscribe_stops().unwrap();
        let mut bytes = Vec::new();
        for body in [
            ResponseBody::Resumed { pc: 0x0800 },
            ResponseBody::Stopped { pc: 0x0810 },
        ] {
            bytes.extend(encode_response(&Response::event(body)).unwrap());
        }
        peer.write_all(&bytes).await.unwrap();

        let stop = transport
            .wait_for_stop(&mut stops, Some(0x0810), None, false)
            .await
            .unwrap();
        assert_eq!(stop, StopEvent { seq: 2, pc: 0x0810 });
        match events.recv().await.unwrap() {
            TransportEvent::Monitor { seq, response } => {
                assert_eq!(seq, 1);
                assert_eq!(response.body, ResponseBody::Resumed { pc: 0x0800 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn desync_fails_waiters_and_reports() {
        let (transport, mut events, mut peer) = pair().await;
        let server = tokio::spawn(async move {
            read_commands(&mut peer, 1).await;
            peer.write_all(&[0x55; 16]).await.unwrap();
            peer
        });
        let err = transport.ping().await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolDesync));
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Closed(CloseReason::Desync)
        );
        assert!(transport.is_closed());
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_ends_session() {
        let (transport, mut events, peer) = pair().await;
        drop(peer);
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Closed(CloseReason::Eof)
        );
        assert!(matches!(
            transport.ping().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn connect_gives_up_after_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let options = ConnectOptions {
            attempts: 3,
            interval: Duration::from_millis(10),
        };
        match MonitorTransport::connect(addr, options).await {
            Err(TransportError::Connect { attempts, .. }) => assert_eq!(attempts, 3),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
