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
pub enum AddressSpaceError {
    #[error("Io")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Address overflows, addr is 0x{0:X}")]
    Overflow(u64),
    #[error("Invalid offset: offset 0x{0:X}, data length 0x{1:X}, region size 0x{2:X}")]
    InvalidOffset(u64, u64, u64),
    #[error("Address 0x{0:X} is outside region base 0x{1:X} size 0x{2:X}")]
    OutOfRegion(u64, u64, u64),
}
