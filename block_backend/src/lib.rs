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

//! Read-only access to the boot partition.
//!
//! A [`BlockDevice`] is the card driver collaborator. [`Partition`] turns a
//! window of it into a seekable byte stream, and [`ext4`] resolves file paths
//! on top of that stream.

pub mod error;
pub mod ext4;
pub mod partition;
pub mod test_helper;

mod file;
mod mem;

pub use error::DiskError;
pub use file::FileBlockDevice;
pub use mem::MemBlockDevice;
pub use partition::Partition;

use anyhow::Result;

pub const SECTOR_SIZE: u32 = 512;

/// Geometry reported by a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_size: u32,
    pub blocks: u64,
}

impl BlockInfo {
    /// Device size in bytes.
    pub fn capacity(&self) -> u64 {
        self.blocks.saturating_mul(self.block_size as u64)
    }
}

pub trait BlockDevice {
    /// Probe and initialize the media.
    fn detect(&mut self) -> Result<()>;

    fn info(&self) -> BlockInfo;

    /// Fill `buf` with the bytes at absolute byte `offset` of the device.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn detect(&mut self) -> Result<()> {
        (**self).detect()
    }

    fn info(&self) -> BlockInfo {
        (**self).info()
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }
}

fn check_read_range(offset: u64, len: usize, capacity: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(anyhow::anyhow!(DiskError::ReadBeyondEnd(
            offset,
            len as u64,
            capacity
        ))),
    }
}
