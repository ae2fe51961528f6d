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

//! Frame headers, byte cursors and stream reassembly.
//!
//! ```text
//! command : STX | ver | len u32 | request id u32 | type | body
//! response: STX | ver | len u32 | type | error | request id u32 | body
//! ```

use super::{Command, CodecError, Response, ResponseBody, API_VERSION, STX};

pub const COMMAND_HEADER_LEN: usize = 11;
pub const RESPONSE_HEADER_LEN: usize = 12;

/// Bounds-checked little-endian reader over a complete buffer.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Short {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn ascii(&mut self, n: usize) -> Result<String, CodecError> {
        Ok(String::from_utf8_lossy(self.take(n)?).into_owned())
    }

    /// Length-prefixed (u8) ascii string.
    pub fn short_string(&mut self) -> Result<String, CodecError> {
        let len = self.u8()? as usize;
        self.ascii(len)
    }

    pub fn rest(&mut self) -> Vec<u8> {
        let rest = self.buf[self.pos.min(self.buf.len())..].to_vec();
        self.pos = self.buf.len();
        rest
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_bool(out: &mut Vec<u8>, v: bool) {
    out.push(v as u8);
}

pub(crate) fn str_len(s: &str, what: &'static str) -> Result<u8, CodecError> {
    u8::try_from(s.len()).map_err(|_| CodecError::StringTooLong(what))
}

/// Writes a u8 length prefix followed by the string bytes.
pub(crate) fn put_short_string(
    out: &mut Vec<u8>,
    s: &str,
    what: &'static str,
) -> Result<(), CodecError> {
    out.push(str_len(s, what)?);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn body_len(frame: &[u8]) -> Option<usize> {
    if frame.len() < 6 {
        return None;
    }
    Some(u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]) as usize)
}

pub fn encode_command(command: &Command, request_id: u32) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    command.encode_body(&mut body)?;

    let mut frame = Vec::with_capacity(COMMAND_HEADER_LEN + body.len());
    frame.push(STX);
    frame.push(API_VERSION);
    put_u32(&mut frame, body.len() as u32);
    put_u32(&mut frame, request_id);
    frame.push(command.command_type());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one complete command frame into its request id and command.
pub fn decode_command(frame: &[u8]) -> Result<(u32, Command), CodecError> {
    let mut r = ByteReader::new(frame);
    let stx = r.u8()?;
    if stx != STX {
        return Err(CodecError::BadStx(stx));
    }
    let _version = r.u8()?;
    let len = r.u32()? as usize;
    let request_id = r.u32()?;
    let command_type = r.u8()?;
    let body = r.bytes(len)?;
    Ok((request_id, Command::decode(command_type, &body)?))
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    response.body.encode_body(&mut body)?;

    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + body.len());
    frame.push(STX);
    frame.push(response.api_version);
    put_u32(&mut frame, body.len() as u32);
    frame.push(response.body.type_code());
    frame.push(response.error);
    put_u32(&mut frame, response.request_id);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one complete response frame.
pub fn decode_response(frame: &[u8]) -> Result<Response, CodecError> {
    let mut r = ByteReader::new(frame);
    let stx = r.u8()?;
    if stx != STX {
        return Err(CodecError::BadStx(stx));
    }
    let api_version = r.u8()?;
    let len = r.u32()? as usize;
    let type_code = r.u8()?;
    let error = r.u8()?;
    let request_id = r.u32()?;
    let body = r.bytes(len)?;

    let body = match ResponseBody::decode(type_code, &body) {
        Ok(decoded) => decoded,
        // Error replies may carry an empty or partial body.
        Err(_) if error != 0 => ResponseBody::Unknown { type_code, body },
        Err(e) => return Err(e),
    };

    Ok(Response {
        api_version,
        error,
        request_id,
        body,
        related: Vec::new(),
    })
}

/// Accumulates stream reads and yields complete frames.
///
/// A single read may carry zero, one or many frames, and a frame may span
/// several reads.
pub struct FrameAssembler {
    header_len: usize,
    buf: Vec<u8>,
    expected: Option<usize>,
}

impl FrameAssembler {
    pub fn for_responses() -> Self {
        Self::with_header(RESPONSE_HEADER_LEN)
    }

    pub fn for_commands() -> Self {
        Self::with_header(COMMAND_HEADER_LEN)
    }

    fn with_header(header_len: usize) -> Self {
        Self {
            header_len,
            buf: Vec::with_capacity(1024),
            expected: None,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf[0] != STX {
            return Err(CodecError::BadStx(self.buf[0]));
        }

        let expected = match self.expected {
            Some(n) => n,
            None => {
                if self.buf.len() < self.header_len {
                    return Ok(None);
                }
                let Some(len) = body_len(&self.buf) else {
                    return Ok(None);
                };
                let n = self.header_len + len;
                self.expected = Some(n);
                n
            }
        };

        if self.buf.len() < expected {
            return Ok(None);
        }

        let rest = self.buf.split_off(expected);
        let frame = std::mem::replace(&mut self.buf, rest);
        self.expected = None;
        Ok(Some(frame))
    }
}
