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

//! Linux kernel images.
//!
//! ARM kernels take their command line and initrd location through the
//! `chosen` node of a device tree blob, x86 bzImage kernels through the
//! zero page.

pub mod bootparam;
mod bzimage;
mod dtb;

pub use bzimage::{BzImage, BzImageConfig};
pub use dtb::{LinuxDtbConfig, LinuxDtbImage};

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};

use crate::error::BootLoaderError;

/// Width of physical addresses on the target CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressWidth {
    Bits32,
    Bits64,
}

impl AddressWidth {
    /// Encode `addr` as a big endian device tree cell of this width.
    pub fn to_cell(self, addr: u64) -> Result<Vec<u8>> {
        match self {
            AddressWidth::Bits32 => {
                let addr =
                    u32::try_from(addr).map_err(|_| anyhow!(BootLoaderError::AddressWidth(addr)))?;
                let mut cell = vec![0_u8; 4];
                BigEndian::write_u32(&mut cell, addr);
                Ok(cell)
            }
            AddressWidth::Bits64 => {
                let mut cell = vec![0_u8; 8];
                BigEndian::write_u64(&mut cell, addr);
                Ok(cell)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_cells() {
        assert_eq!(
            AddressWidth::Bits32.to_cell(0x8800_0000).unwrap(),
            vec![0x88, 0, 0, 0]
        );
        assert_eq!(
            AddressWidth::Bits64.to_cell(0x1_8800_0000).unwrap(),
            vec![0, 0, 0, 1, 0x88, 0, 0, 0]
        );
        let err = AddressWidth::Bits32.to_cell(0x1_0000_0000).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::AddressWidth(0x1_0000_0000))
        ));
    }
}
