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

//! The one-way jump into a loaded image.
//!
//! Exactly one trampoline is compiled in, picked by the target
//! architecture. Targets without one fail with
//! `BootLoaderError::UnsupportedArch` before running any cleanup.

#[cfg(target_arch = "arm")]
mod arm;
#[cfg(target_arch = "arm")]
use arm as arch;

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
use x86_64 as arch;

#[cfg(not(any(target_arch = "arm", target_arch = "x86_64")))]
mod unsupported;
#[cfg(not(any(target_arch = "arm", target_arch = "x86_64")))]
use unsupported as arch;

use std::convert::Infallible;

use anyhow::Result;
use log::info;

use address_space::{AddressRange, PhysAddr};

/// MMU collaborator owning the live translation tables.
pub trait PageTable {
    /// Forbid instruction fetches from `range`.
    fn set_execute_never(&mut self, range: AddressRange) -> Result<()>;
}

/// A memory range to mark execute-never right before the jump, used when
/// the MMU stays on and caches are kept enabled.
pub struct MmuRegion<'a> {
    pub table: &'a mut dyn PageTable,
    pub range: AddressRange,
}

/// Where control goes, and what it gets in hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handoff {
    pub entry: PhysAddr,
    /// Device tree or zero page address, 0 when there is none.
    pub params: PhysAddr,
}

impl Handoff {
    pub fn new(entry: PhysAddr, params: PhysAddr) -> Self {
        Handoff { entry, params }
    }

    /// Run `cleanup`, quiesce the CPU and jump to `entry`.
    ///
    /// Only returns on failure.
    pub fn boot(self, cleanup: &mut dyn FnMut(), mmu: Option<MmuRegion<'_>>) -> Result<Infallible> {
        info!(
            "Starting kernel at 0x{:x}, boot parameters at 0x{:x}",
            self.entry.raw_value(),
            self.params.raw_value()
        );
        arch::exec(self, cleanup, mmu)
    }
}
