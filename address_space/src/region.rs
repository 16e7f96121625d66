// Copyright (c) 2024 The Sealboot Authors. All rights reserved.
//
// Sealboot is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::{AddressRange, AddressSpaceError, PhysAddr};

/// An externally allocated window of physical memory that boot images are
/// written into. Loaders only ever write to it.
pub trait Region {
    /// Physical address of the first byte of the region.
    fn base(&self) -> PhysAddr;

    /// Size of the region in bytes.
    fn size(&self) -> u64;

    /// Write `count` bytes taken from `src` at `offset` from the region base.
    ///
    /// # Errors
    ///
    /// Return Error if
    /// * `offset + count` exceeds the region size.
    /// * `src` holds fewer than `count` bytes.
    fn write(&mut self, src: &mut dyn Read, offset: u64, count: u64) -> Result<()>;

    fn range(&self) -> AddressRange {
        AddressRange::new(self.base(), self.size())
    }

    /// Write a whole buffer at `offset`.
    fn write_bytes(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let mut src = data;
        self.write(&mut src, offset, data.len() as u64)
    }

    /// Zero-fill `count` bytes at `offset`.
    fn write_zeroes(&mut self, offset: u64, count: u64) -> Result<()> {
        let mut src = std::io::repeat(0).take(count);
        self.write(&mut src, offset, count)
    }

    /// Translate a physical address inside the region to an offset from its base.
    fn offset_of(&self, addr: PhysAddr) -> Result<u64> {
        match addr.checked_offset_from(self.base()) {
            Some(offset) if offset <= self.size() => Ok(offset),
            _ => Err(anyhow!(AddressSpaceError::OutOfRegion(
                addr.raw_value(),
                self.base().raw_value(),
                self.size()
            ))),
        }
    }
}

impl<T: Region + ?Sized> Region for &mut T {
    fn base(&self) -> PhysAddr {
        (**self).base()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn write(&mut self, src: &mut dyn Read, offset: u64, count: u64) -> Result<()> {
        (**self).write(src, offset, count)
    }
}

fn check_valid_offset(offset: u64, count: u64, size: u64) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) if end <= size => Ok(()),
        _ => Err(anyhow!(AddressSpaceError::InvalidOffset(offset, count, size))),
    }
}

/// A region backed by host memory, used when images are staged or tested off
/// target.
pub struct HostRegion {
    base: PhysAddr,
    mem: Vec<u8>,
}

impl HostRegion {
    pub fn new(base: PhysAddr, size: u64) -> Result<Self> {
        let len = usize::try_from(size).map_err(|_| anyhow!(AddressSpaceError::Overflow(size)))?;
        base.checked_add(size)
            .ok_or_else(|| anyhow!(AddressSpaceError::Overflow(base.raw_value())))?;
        Ok(HostRegion {
            base,
            mem: vec![0_u8; len],
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }
}

impl Region for HostRegion {
    fn base(&self) -> PhysAddr {
        self.base
    }

    fn size(&self) -> u64 {
        self.mem.len() as u64
    }

    fn write(&mut self, src: &mut dyn Read, offset: u64, count: u64) -> Result<()> {
        check_valid_offset(offset, count, self.size())?;
        let start = offset as usize;
        let slice = &mut self.mem[start..start + count as usize];
        src.read_exact(slice)
            .with_context(|| "Failed to write buffer to host region")?;
        Ok(())
    }
}

/// A region addressing target physical memory directly.
pub struct PhysRegion {
    base: PhysAddr,
    size: u64,
}

impl PhysRegion {
    /// # Safety
    ///
    /// `[base, base + size)` must be RAM identity mapped into the current
    /// address space, reserved for image loading, and not aliased by any
    /// live Rust object for the lifetime of the returned region.
    pub unsafe fn new(base: PhysAddr, size: u64) -> Result<Self> {
        base.checked_add(size)
            .filter(|end| usize::try_from(end.raw_value()).is_ok())
            .ok_or_else(|| anyhow!(AddressSpaceError::Overflow(base.raw_value())))?;
        debug!("load window at 0x{:x}, 0x{:x} bytes", base.raw_value(), size);
        Ok(PhysRegion { base, size })
    }
}

impl Region for PhysRegion {
    fn base(&self) -> PhysAddr {
        self.base
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&mut self, src: &mut dyn Read, offset: u64, count: u64) -> Result<()> {
        check_valid_offset(offset, count, self.size)?;
        let host_addr = (self.base.raw_value() + offset) as usize;
        // SAFETY: the window is owned by this region per `PhysRegion::new`,
        // and the legality of offset and count has been verified.
        let slice = unsafe { std::slice::from_raw_parts_mut(host_addr as *mut u8, count as usize) };
        src.read_exact(slice)
            .with_context(|| "Failed to write buffer to physical memory")?;
        Ok(())
    }
}
