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
pub enum UtilError {
    // fdt builder errors
    #[error("Desired node depth :{0}, current node depth :{1}")]
    NodeDepthMismatch(u32, u32),
    #[error("Still have {0} node open when terminating the fdt")]
    NodeUnclosed(u32),
    #[error("Failed to add property because there is no open node")]
    IllegelPropertyPos,
    #[error("Failed to add string to fdt because of null character inside \"{0}\"")]
    IllegalString(String),
    #[error("Failed to add overlapped mem reserve entries to fdt")]
    MemReserveOverlap,
    // fdt parser errors
    #[error("Invalid fdt magic 0x{0:x}")]
    FdtMagic(u32),
    #[error("Fdt {0} at offset 0x{1:x} exceeds blob size 0x{2:x}")]
    FdtTruncated(&'static str, u64, u64),
    #[error("Unsupported fdt version {0}")]
    FdtVersion(u32),
    #[error("Unexpected fdt token 0x{0:x} at structure offset 0x{1:x}")]
    FdtToken(u32, u64),
    #[error("Fdt nesting deeper than {0} nodes")]
    FdtTooDeep(usize),
    #[error("Fdt string at offset 0x{0:x} is not null terminated")]
    FdtString(u64),
    // logger errors
    #[error("Logger is already installed")]
    LoggerInstalled,
}
