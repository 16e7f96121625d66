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

//! Physical address arithmetic and the memory windows boot images are
//! loaded into.
//!
//! # Examples
//!
//! ```rust
//! use address_space::{HostRegion, PhysAddr, Region};
//!
//! let mut region = HostRegion::new(PhysAddr(0x8000_0000), 0x1000).unwrap();
//! region.write_bytes(b"\x7fELF", 0).unwrap();
//! assert_eq!(&region.as_slice()[..4], b"\x7fELF");
//! ```

pub mod error;

mod address;
mod region;

pub use address::{AddressRange, PhysAddr};
pub use error::AddressSpaceError;
pub use region::{HostRegion, PhysRegion, Region};
