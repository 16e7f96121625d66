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

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::{check_read_range, BlockDevice, BlockInfo, DiskError, SECTOR_SIZE};

/// A block device backed by a host file or device node, opened read-only.
pub struct FileBlockDevice {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl FileBlockDevice {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileBlockDevice {
            path: path.as_ref().to_path_buf(),
            file: None,
            size: 0,
        }
    }
}

impl BlockDevice for FileBlockDevice {
    fn detect(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("Failed to stat {}", self.path.display()))?
            .len();
        if size == 0 {
            return Err(anyhow!(DiskError::Detect(format!(
                "{} is empty",
                self.path.display()
            ))));
        }
        self.file = Some(file);
        self.size = size;
        Ok(())
    }

    fn info(&self) -> BlockInfo {
        BlockInfo {
            block_size: SECTOR_SIZE,
            blocks: self.size / SECTOR_SIZE as u64,
        }
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_read_range(offset, buf.len(), self.info().capacity())?;
        let file = self.file.as_ref().ok_or_else(|| {
            anyhow!(DiskError::Detect(format!(
                "{} read before detection",
                self.path.display()
            )))
        })?;
        file.read_exact_at(buf, offset)
            .with_context(|| format!("Failed to read {} at {}", self.path.display(), offset))
    }
}
