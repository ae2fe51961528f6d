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

use serde::Serialize;

/// A region of the 16-bit address space. `size` may be 0x10000 for the
/// whole space, hence the wider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AddressRange {
    pub start: u16,
    pub size: u32,
}

impl AddressRange {
    pub fn new(start: u16, size: u32) -> Self {
        Self { start, size }
    }

    /// Inclusive on both ends, as checkpoint ranges are.
    pub fn inclusive(start: u16, last: u16) -> Self {
        Self {
            start,
            size: (last as u32 + 1).saturating_sub(start as u32),
        }
    }

    pub fn contains(&self, addr: u16) -> bool {
        (addr as u32) >= self.start as u32 && (addr as u32) < self.end()
    }

    /// One past the last address.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.size
    }

    /// Last address inside the range, clamped to the address space.
    pub fn last(&self) -> u16 {
        self.end().saturating_sub(1).clamp(self.start as u32, 0xffff) as u16
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn clip(&self, low: u16, high_exclusive: u32) -> Option<AddressRange> {
        let new_start = (self.start as u32).max(low as u32);
        let new_end = self.end().min(high_exclusive);
        if new_start < new_end && new_start <= 0xffff {
            Some(AddressRange::new(new_start as u16, new_end - new_start))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let r = AddressRange::new(0x0800, 0x20);
        assert!(r.contains(0x0800));
        assert!(r.contains(0x081f));
        assert!(!r.contains(0x0820));
        assert_eq!(r.last(), 0x081f);
        assert_eq!(AddressRange::inclusive(0x0800, 0x081f), r);
    }

    #[test]
    fn whole_space() {
        let r = AddressRange::new(0, 0x10000);
        assert!(r.contains(0xffff));
        assert_eq!(r.last(), 0xffff);
        assert_eq!(
            r.clip(0xfff0, 0x10000),
            Some(AddressRange::new(0xfff0, 0x10))
        );
        assert_eq!(AddressRange::new(0x10, 0x10).clip(0x20, 0x30), None);
    }
}
