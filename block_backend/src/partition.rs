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

use std::io::{Read, Seek, SeekFrom};

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::{ext4, BlockDevice, DiskError};

/// A read-only window over a block device starting at byte `start`.
///
/// The cursor is absolute and always stays inside
/// `[start, start + device size]`.
pub struct Partition<D: BlockDevice> {
    device: D,
    start: u64,
    cursor: u64,
}

impl<D: BlockDevice> Partition<D> {
    pub fn new(device: D, start: u64) -> Self {
        Partition {
            device,
            start,
            cursor: start,
        }
    }

    /// Probe `device` and open the partition at byte `start`.
    pub fn detect(mut device: D, start: u64) -> Result<Self> {
        device
            .detect()
            .with_context(|| DiskError::Detect("device detection failed".to_string()))?;
        let capacity = device.info().capacity();
        if start >= capacity {
            return Err(anyhow!(DiskError::InvalidStart(start, capacity)));
        }
        debug!("partition at {} on a {} byte device", start, capacity);
        Ok(Partition::new(device, start))
    }

    /// Read a whole file from the ext4 filesystem on this partition.
    pub fn read_all(&mut self, path: &str) -> Result<Vec<u8>> {
        ext4::read_all(self, path)
    }

    fn window_end(&self) -> u64 {
        self.start.saturating_add(self.device.info().capacity())
    }
}

fn out_of_range(pos: i128, offset: i64) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        DiskError::OutOfRange(pos, offset),
    )
}

impl<D: BlockDevice> Seek for Partition<D> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let end = self.window_end() as i128;
        let (target, offset) = match pos {
            SeekFrom::Start(off) => (self.start as i128 + off as i128, off as i64),
            SeekFrom::Current(off) => (self.cursor as i128 + off as i128, off),
            SeekFrom::End(off) => (end + off as i128, off),
        };

        if target > end || target < self.start as i128 {
            return Err(out_of_range(target, offset));
        }
        self.cursor = target as u64;
        Ok(self.cursor)
    }
}

impl<D: BlockDevice> Read for Partition<D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let capacity = self.device.info().capacity();
        let avail = capacity.saturating_sub(self.cursor);
        let len = std::cmp::min(buf.len() as u64, avail) as usize;
        if len == 0 {
            return Ok(0);
        }

        self.device
            .read(self.cursor, &mut buf[..len])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)))?;
        self.seek(SeekFrom::Current(len as i64))?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helper::Ext4ImageBuilder;
    use crate::MemBlockDevice;

    fn patterned(len: usize) -> MemBlockDevice {
        MemBlockDevice::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    #[test]
    fn test_seek_whence() {
        let mut part = Partition::new(patterned(4096), 1024);

        assert_eq!(part.seek(SeekFrom::Start(16)).unwrap(), 1040);
        assert_eq!(part.seek(SeekFrom::Current(-8)).unwrap(), 1032);
        assert_eq!(part.seek(SeekFrom::End(0)).unwrap(), 1024 + 4096);
        assert_eq!(part.seek(SeekFrom::End(-4096)).unwrap(), 1024);
    }

    #[test]
    fn test_seek_rejects_outside_window() {
        let mut part = Partition::new(patterned(4096), 1024);
        part.seek(SeekFrom::Start(100)).unwrap();

        let err = part.seek(SeekFrom::Current(-101)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(part.seek(SeekFrom::End(1)).is_err());
        assert!(part.seek(SeekFrom::Start(4097)).is_err());
        // A rejected seek leaves the cursor alone.
        assert_eq!(part.cursor, 1124);
    }

    #[test]
    fn test_read_advances_cursor() {
        let mut part = Partition::new(patterned(4096), 1000);
        let mut buf = [0_u8; 6];

        part.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [247, 248, 249, 250, 0, 1]);
        assert_eq!(part.cursor, 1006);

        // Reads stop at the end of the device.
        part.seek(SeekFrom::Start(4096 - 1000 - 2)).unwrap();
        assert_eq!(part.read(&mut buf).unwrap(), 2);
        assert_eq!(part.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_detect() {
        assert!(Partition::detect(patterned(4096), 512).is_ok());

        let err = Partition::detect(patterned(4096), 4096).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DiskError>(),
            Some(DiskError::InvalidStart(4096, 4096))
        ));
        assert!(Partition::detect(MemBlockDevice::new(Vec::new()), 0).is_err());
    }

    #[test]
    fn test_read_all_at_offset() {
        let image = Ext4ImageBuilder::new()
            .file("/boot/sealboot.conf", b"{\"cmdline\":\"quiet\"}")
            .build();
        let mut media = vec![0xee_u8; 0x10000];
        media.extend_from_slice(&image);

        let mut part = Partition::detect(MemBlockDevice::new(media), 0x10000).unwrap();
        let abs = part.read_all("/boot/sealboot.conf").unwrap();
        let rel = part.read_all("boot/sealboot.conf").unwrap();
        assert_eq!(abs, b"{\"cmdline\":\"quiet\"}");
        assert_eq!(abs, rel);

        let err = part.read_all("/boot/missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiskError>(),
            Some(DiskError::NotFound(_))
        ));
    }
}
