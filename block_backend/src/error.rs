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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Io")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Could not detect boot device: {0}")]
    Detect(String),
    #[error("Invalid start offset {0}, device size {1}")]
    InvalidStart(u64, u64),
    #[error("Invalid offset {0} ({1})")]
    OutOfRange(i128, i64),
    #[error("Read of {1} bytes at {0} exceeds device size {2}")]
    ReadBeyondEnd(u64, u64, u64),
    #[error("Invalid ext4 superblock magic 0x{0:x}")]
    BadMagic(u16),
    #[error("Corrupt filesystem: {0}")]
    Corrupt(String),
    #[error("Unsupported filesystem feature: {0}")]
    Unsupported(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("{0} is not a regular file")]
    NotAFile(String),
}
