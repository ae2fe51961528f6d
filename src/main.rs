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

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use binmon_debug::config::{load_map_refs, LaunchConfig};
use binmon_debug::console::ConsoleCommand;
use binmon_debug::debug;
use binmon_debug::runtime::{DebugRuntime, ProcessLauncher, RuntimeEvent, SourceBreakpoints};
use binmon_debug::symbols::{DebugInfo, MachineType, MapRef};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use notify::{RecursiveMode, Watcher};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Source level debugger for cc65 programs running in VICE")]
struct Cli {
    /// JSON launch configuration; command line flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging and frame dumps
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Launch the emulator and run the program to its entry point
    Start(StartArgs),
    /// Connect to an emulator that is already running the program
    Attach(SessionArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Debug information document (JSON)
    #[arg(long)]
    debug_file: Option<PathBuf>,

    /// Runtime helper references from the linker map (JSON)
    #[arg(long)]
    map_file: Option<PathBuf>,

    /// Binary monitor port
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    stop_on_entry: bool,

    #[arg(long)]
    stop_on_exit: bool,

    /// Let the emulator draw one more frame after each stop
    #[arg(long)]
    run_ahead: bool,

    /// Machine type, overriding the debug information
    #[arg(long, value_parser = parse_machine)]
    machine: Option<MachineType>,

    /// Breakpoint as FILE:LINE, may be repeated
    #[arg(short, long = "break", value_parser = parse_breakpoint)]
    breakpoints: Vec<SourceBreakpoints>,
}

#[derive(Args, Debug)]
struct StartArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Program to autostart
    program: Option<PathBuf>,

    /// Emulator executable
    #[arg(long)]
    emulator: Option<PathBuf>,

    /// Extra emulator arguments, after `--`
    #[arg(last = true)]
    emulator_args: Vec<String>,
}

fn parse_machine(text: &str) -> std::result::Result<MachineType, String> {
    serde_json::from_value(json!(text.to_ascii_lowercase()))
        .map_err(|_| format!("unknown machine type '{}'", text))
}

fn parse_breakpoint(text: &str) -> std::result::Result<SourceBreakpoints, String> {
    let (file, line) = text
        .rsplit_once(':')
        .ok_or_else(|| format!("expected FILE:LINE, got '{}'", text))?;
    let line = line
        .parse()
        .map_err(|_| format!("bad line number in '{}'", text))?;
    Ok(SourceBreakpoints {
        file: file.to_string(),
        lines: vec![line],
    })
}

impl SessionArgs {
    fn apply(self, config: &mut LaunchConfig) {
        if self.debug_file.is_some() {
            config.debug_file = self.debug_file;
        }
        if self.map_file.is_some() {
            config.map_file = self.map_file;
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.machine.is_some() {
            config.machine = self.machine;
        }
        config.stop_on_entry |= self.stop_on_entry;
        config.stop_on_exit |= self.stop_on_exit;
        config.run_ahead |= self.run_ahead;
        config.breakpoints.extend(self.breakpoints);
    }
}

fn load_symbols(config: &LaunchConfig) -> Result<(DebugInfo, Vec<MapRef>)> {
    let debug_file = config
        .debug_file
        .as_deref()
        .context("no debug information file given (--debug-file)")?;
    let info = DebugInfo::load(debug_file)
        .with_context(|| format!("loading {}", debug_file.display()))?;
    let map = match &config.map_file {
        Some(path) => load_map_refs(path)?,
        None => Vec::new(),
    };
    Ok((info, map))
}

fn print_json(value: &serde_json::Value) {
    let mut out = std::io::stdout().lock();
    if writeln!(out, "{}", value).and_then(|_| out.flush()).is_err() {
        warn!("stdout closed");
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<RuntimeEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_value(&event) {
            Ok(value) => print_json(&value),
            Err(e) => warn!("cannot serialise event: {}", e),
        }
        if event == RuntimeEvent::End {
            break;
        }
    }
}

/// Reloads debug information whenever the debug file is rewritten.
fn watch_symbols(runtime: DebugRuntime, config: LaunchConfig) -> Result<notify::RecommendedWatcher> {
    let Some(path) = config.debug_file.clone() else {
        anyhow::bail!("no debug information file to watch");
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if event.kind.is_modify() || event.kind.is_create() {
                let _ = tx.send(());
            }
        }
    })?;
    watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Writers usually touch the file more than once.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            while rx.try_recv().is_ok() {}
            match load_symbols(&config) {
                Ok((info, map)) => {
                    if let Err(e) = runtime.reload_symbols(info, map).await {
                        warn!("reloading debug information: {}", e);
                    }
                }
                Err(e) => warn!("{:#}", e),
            }
        }
    });
    Ok(watcher)
}

async fn command_loop(runtime: &DebugRuntime) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                print_json(&json!({ "error": e.to_string() }));
                continue;
            }
        };
        let ends = command.ends_session();
        match command.execute(runtime).await {
            Ok(body) => print_json(&json!({ "reply": body })),
            Err(e) => print_json(&json!({ "error": e.to_string() })),
        }
        if ends {
            return Ok(true);
        }
    }
    Ok(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = debug::init_logging(cli.debug).context("starting logger")?;

    let mut config = match &cli.config {
        Some(path) => LaunchConfig::load(path)?,
        None => LaunchConfig::default(),
    };
    let attaching = matches!(cli.mode, Mode::Attach(_));
    match cli.mode {
        Mode::Start(args) => {
            args.session.apply(&mut config);
            if args.program.is_some() {
                config.program = args.program;
            }
            if args.emulator.is_some() {
                config.emulator = args.emulator;
            }
            config.emulator_args.extend(args.emulator_args);
        }
        Mode::Attach(args) => args.apply(&mut config),
    }

    let (info, map) = load_symbols(&config)?;
    let options = config.runtime_options();
    let (runtime, events) = if attaching {
        DebugRuntime::attach(config.port(), info, map, options)
            .await
            .context("attaching to emulator")?
    } else {
        let request = config.launch_request(info.machine_type)?;
        DebugRuntime::start(&request, info, map, options, &ProcessLauncher)
            .await
            .context("starting program")?
    };
    let printer = tokio::spawn(print_events(events));

    let _watcher = match watch_symbols(runtime.clone(), config.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("not watching debug information: {:#}", e);
            None
        }
    };

    let ended = command_loop(&runtime).await?;
    if !ended {
        info!("input closed");
        if attaching {
            runtime.disconnect().await;
        } else {
            runtime.terminate().await;
        }
    }
    printer.await.context("event printer")?;
    Ok(())
}
