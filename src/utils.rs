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

use std::env;
use std::path::Path;

use urlencoding::decode;

/// Normalises a source path as given by a client or written into the debug
/// information, so that two spellings of the same file compare equal.
/// Accepts `file://` URIs. The result always uses forward slashes.
pub fn canonicalize_path(source_path: &str) -> String {
    let mut path_str = source_path.to_string();

    if let Some(rest) = source_path.strip_prefix("file://") {
        path_str = decode(rest)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| rest.to_string());
        // file:///C:/x arrives as /C:/x
        if cfg!(windows) && path_str.starts_with('/') && path_str.chars().nth(2) == Some(':') {
            path_str.remove(0);
        }
    }

    // WSL mounts: /mnt/c/src -> C:/src
    if cfg!(windows) {
        if let Some(rest) = path_str.strip_prefix("/mnt/") {
            let mut parts = rest.splitn(2, '/');
            if let (Some(drive), tail) = (parts.next(), parts.next()) {
                if drive.len() == 1 {
                    path_str = format!("{}:/{}", drive.to_uppercase(), tail.unwrap_or(""));
                }
            }
        }
    }

    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default().join(path)
    };
    // dunce strips the \\?\ prefix on Windows
    let canonical = dunce::canonicalize(&absolute).unwrap_or(absolute);
    let mut final_path = canonical.to_string_lossy().replace('\\', "/");

    if cfg!(windows) {
        let mut chars = final_path.chars();
        if let (Some(drive), Some(':')) = (chars.next(), chars.next()) {
            final_path = format!("{}{}", drive.to_ascii_uppercase(), &final_path[1..]);
        }
    }

    // UNC: //SERVER/SHARE/path
    if let Some(rest) = final_path.strip_prefix("//") {
        let parts: Vec<String> = rest
            .split('/')
            .enumerate()
            .map(|(i, s)| if i < 2 { s.to_uppercase() } else { s.to_string() })
            .collect();
        final_path = format!("//{}", parts.join("/"));
    }

    final_path
}
