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

use std::fmt::Write as _;
use std::sync::OnceLock;

use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.set(enabled).ok();
}

pub fn is_debug() -> bool {
    *DEBUG_ENABLED.get().unwrap_or(&false)
}

/// Starts logging to stderr. `RUST_LOG` wins over the default level; `--debug`
/// raises the default to `debug`. The handle must stay alive for the process.
pub fn init_logging(debug: bool) -> Result<LoggerHandle, FlexiLoggerError> {
    set_debug(debug);
    let default = if debug { "debug" } else { "info" };
    Logger::try_with_env_or_str(default)?.log_to_stderr().start()
}

/// Space separated hex bytes, for tracing frames.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[macro_export]
macro_rules! trace_frame {
    ($dir:expr, $bytes:expr) => {
        if $crate::debug::is_debug() {
            log::debug!("{} {}", $dir, $crate::debug::hex_dump($bytes));
        }
    };
}
