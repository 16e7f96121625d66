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
pub enum BootLoaderError {
    #[error("Invalid ELF image: {0}")]
    InvalidElf(&'static str),
    #[error("Segment at 0x{0:x} precedes region start 0x{1:x}")]
    SegmentBelowRegion(u64, u64),
    #[error("Entry point 0x{0:x} lies outside the loaded region")]
    EntryOutOfRegion(u64),
    #[error("Failed to place {0} of size 0x{2:x} at offset 0x{1:x} in region of size 0x{3:x}")]
    OutOfRegion(&'static str, u64, u64, u64),
    #[error("Address 0x{0:x} does not fit the target address width")]
    AddressWidth(u64),
    #[error("cmdline requires dtb")]
    CmdlineRequiresDtb,
    #[error("initrd requires dtb")]
    InitrdRequiresDtb,
    #[error("Invalid bzImage kernel file")]
    InvalidBzImage,
    #[error("Unsupported boot protocol (0x{0:04x})")]
    OldVersionKernel(u16),
    #[error("kernel must be relocatable")]
    NotRelocatable,
    #[error("Unsupported bzImage payload: {0}")]
    UnsupportedPayload(&'static str),
    #[error("Incompatible command line length {0}, kernel accepts {1}")]
    CmdlineTooLong(u32, u32),
    #[error("Incompatible initrd address 0x{0:x}, kernel accepts up to 0x{1:x}")]
    InitrdAddrMax(u64, u32),
    #[error("Memory map holds {0} entries, at most {1} are supported")]
    E820Overflow(usize, usize),
    #[error("Image must be loaded before boot")]
    NotLoaded,
    #[error("Boot handoff is not implemented for {0}")]
    UnsupportedArch(&'static str),
    #[error("supervisor failure")]
    SupervisorFailure,
}
