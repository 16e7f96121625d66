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

use anyhow::{anyhow, Result};

use crate::{check_read_range, BlockDevice, BlockInfo, DiskError, SECTOR_SIZE};

/// A block device held entirely in memory, such as a card image staged by a
/// previous boot stage.
pub struct MemBlockDevice {
    data: Vec<u8>,
    block_size: u32,
}

impl MemBlockDevice {
    pub fn new(data: Vec<u8>) -> Self {
        MemBlockDevice {
            data,
            block_size: SECTOR_SIZE,
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn detect(&mut self) -> Result<()> {
        if self.data.is_empty() {
            return Err(anyhow!(DiskError::Detect("empty media".to_string())));
        }
        Ok(())
    }

    fn info(&self) -> BlockInfo {
        BlockInfo {
            block_size: self.block_size,
            blocks: self.data.len() as u64 / self.block_size as u64,
        }
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_read_range(offset, buf.len(), self.info().capacity())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}
