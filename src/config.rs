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

//! Launch configuration, as read from a JSON file and refined on the
//! command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::runtime::{LaunchRequest, RunAheadConfig, RuntimeOptions, SourceBreakpoints};
use crate::symbols::{MachineType, MapRef};

/// Port the emulator's binary monitor listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 6502;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no program to start")]
    NoProgram,
    #[error("no emulator for {0:?} programs")]
    NoEmulator(MachineType),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchConfig {
    pub program: Option<PathBuf>,
    pub debug_file: Option<PathBuf>,
    pub map_file: Option<PathBuf>,
    /// Emulator executable. Derived from the machine type when absent.
    pub emulator: Option<PathBuf>,
    /// Directory holding the emulator executables.
    pub emulator_dir: Option<PathBuf>,
    pub emulator_args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub port: Option<u16>,
    pub machine: Option<MachineType>,
    pub stop_on_entry: bool,
    pub stop_on_exit: bool,
    pub run_ahead: bool,
    pub run_ahead_config: Option<RunAheadConfig>,
    pub breakpoints: Vec<SourceBreakpoints>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the runtime helper references exported by the linker map.
pub fn load_map_refs(path: &Path) -> Result<Vec<MapRef>, ConfigError> {
    read_json(path)
}

/// VICE executable for a machine.
pub fn emulator_binary(machine: MachineType) -> Option<&'static str> {
    match machine {
        MachineType::C64 | MachineType::Unknown => Some("x64sc"),
        MachineType::C128 => Some("x128"),
        MachineType::Cbm5x0 => Some("xcbm5x0"),
        MachineType::Pet => Some("xpet"),
        MachineType::Plus4 => Some("xplus4"),
        MachineType::Vic20 => Some("xvic"),
        MachineType::Nes | MachineType::Apple2 => None,
    }
}

impl LaunchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            stop_on_entry: self.stop_on_entry,
            stop_on_exit: self.stop_on_exit,
            run_ahead: self.run_ahead,
            run_ahead_config: self.run_ahead_config.clone().unwrap_or_default(),
            machine: self.machine,
            breakpoints: self.breakpoints.clone(),
            ..RuntimeOptions::default()
        }
    }

    /// Resolves what to launch for a program built for `machine`.
    pub fn launch_request(&self, machine: MachineType) -> Result<LaunchRequest, ConfigError> {
        let program = self.program.clone().ok_or(ConfigError::NoProgram)?;
        let machine = self.machine.unwrap_or(machine);
        let emulator = match &self.emulator {
            Some(path) => path.clone(),
            None => {
                let name = emulator_binary(machine).ok_or(ConfigError::NoEmulator(machine))?;
                let name = if cfg!(windows) {
                    format!("{}.exe", name)
                } else {
                    name.to_string()
                };
                match &self.emulator_dir {
                    Some(dir) => dir.join(name),
                    None => PathBuf::from(name),
                }
            }
        };
        Ok(LaunchRequest {
            program,
            emulator,
            args: self.emulator_args.clone(),
            cwd: self.cwd.clone(),
            port: self.port(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_camel_case_fields() {
        let config: LaunchConfig = serde_json::from_str(
            r#"{
                "program": "hello.prg",
                "debugFile": "hello.dbg.json",
                "stopOnEntry": true,
                "machine": "vic20",
                "emulatorDir": "/opt/vice/bin",
                "breakpoints": [{"file": "main.c", "lines": [7, 12]}]
            }"#,
        )
        .unwrap();
        assert!(config.stop_on_entry);
        assert_eq!(config.port(), DEFAULT_PORT);
        let options = config.runtime_options();
        assert_eq!(options.machine, Some(MachineType::Vic20));
        assert_eq!(options.breakpoints[0].lines, vec![7, 12]);
        assert_eq!(options.run_ahead_config, RunAheadConfig::default());

        let request = config.launch_request(MachineType::C64).unwrap();
        let expected = if cfg!(windows) { "xvic.exe" } else { "xvic" };
        assert_eq!(request.emulator, Path::new("/opt/vice/bin").join(expected));
    }

    #[test]
    fn launch_needs_program_and_emulator() {
        let config = LaunchConfig::default();
        assert!(matches!(
            config.launch_request(MachineType::C64),
            Err(ConfigError::NoProgram)
        ));
        let config = LaunchConfig {
            program: Some("game.nes".into()),
            ..LaunchConfig::default()
        };
        assert!(matches!(
            config.launch_request(MachineType::Nes),
            Err(ConfigError::NoEmulator(MachineType::Nes))
        ));
    }
}
