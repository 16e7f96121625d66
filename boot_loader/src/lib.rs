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

//! # Boot Loader
//!
//! The crate to place verified boot images into physical memory and start
//! them.
//!
//! ## Design
//!
//! This crate offers support for:
//! 1. Loading bare-metal ELF unikernels (ELF32 and ELF64).
//! 2. Loading Linux kernels with a device tree blob, fixing up `chosen`.
//! 3. Loading Linux bzImage kernels with a zero page.
//! 4. The one-way handoff to the loaded entry point.
//!
//! ## Platform Support
//!
//! - `arm`
//! - `x86_64`
//!
//! ## Examples
//!
//! ```rust
//! use address_space::{HostRegion, PhysAddr};
//! use boot_loader::{AddressWidth, BootImage, LinuxDtbConfig, LinuxDtbImage};
//!
//! let region = HostRegion::new(PhysAddr(0x8000_0000), 0x10_0000).unwrap();
//! let config = LinuxDtbConfig {
//!     kernel_offset: 0x8000,
//!     dtb_offset: 0x1000,
//!     initrd_offset: 0x8_0000,
//!     address_width: AddressWidth::Bits32,
//! };
//! let mut image = LinuxDtbImage::new(region, config, vec![0_u8; 64]);
//! image.load().unwrap();
//! assert_eq!(image.entry(), Some(PhysAddr(0x8000_8000)));
//! ```

pub mod elf;
pub mod error;
pub mod handoff;
pub mod image;
pub mod linux;
pub mod test_helper;

pub use error::BootLoaderError;
pub use handoff::{Handoff, MmuRegion, PageTable};
pub use image::{BootImage, ElfImage, Image};
pub use linux::{AddressWidth, BzImage, BzImageConfig, LinuxDtbConfig, LinuxDtbImage};
