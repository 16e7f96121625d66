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

//! ARMv7-A trampoline.
//!
//! The kernel is entered from supervisor mode through a private vector
//! table whose SVC slot branches to `sealboot_exec`, following the ARM
//! Linux boot convention: `r0 = 0`, `r1 = ~0` (machine type unused with a
//! device tree) and `r2` holding the device tree address.

use std::arch::{asm, global_asm};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{anyhow, bail, Result};

use super::{Handoff, MmuRegion};
use crate::error::BootLoaderError;

#[no_mangle]
static SEALBOOT_KERNEL: AtomicU32 = AtomicU32::new(0);
#[no_mangle]
static SEALBOOT_PARAMS: AtomicU32 = AtomicU32::new(0);

global_asm!(
    ".pushsection .text.sealboot_vectors, \"ax\"",
    ".arm",
    ".balign 32",
    ".global sealboot_vectors",
    "sealboot_vectors:",
    "    b .",
    "    b .",
    "    b sealboot_exec",
    "    b .",
    "    b .",
    "    b .",
    "    b .",
    "    b .",
    "sealboot_exec:",
    "    ldr r3, =SEALBOOT_KERNEL",
    "    ldr r3, [r3]",
    "    ldr r2, =SEALBOOT_PARAMS",
    "    ldr r2, [r2]",
    "    mov r0, #0",
    "    mvn r1, #0",
    "    bx r3",
    ".ltorg",
    ".popsection",
);

extern "C" {
    static sealboot_vectors: [u32; 8];
}

const SCTLR_C: u32 = 1 << 2;
const SCTLR_I: u32 = 1 << 12;

/// Clean and invalidate the whole data cache by set/way.
unsafe fn flush_data_cache() {
    let clidr: u32;
    asm!("mrc p15, 1, {}, c0, c0, 1", out(reg) clidr);
    let level_of_coherency = (clidr >> 24) & 0x7;

    for level in 0..level_of_coherency {
        // Instruction-only or no cache at this level.
        if (clidr >> (level * 3)) & 0x7 < 2 {
            continue;
        }

        let ccsidr: u32;
        asm!(
            "mcr p15, 2, {sel}, c0, c0, 0",
            "isb",
            "mrc p15, 1, {id}, c0, c0, 0",
            sel = in(reg) level << 1,
            id = out(reg) ccsidr,
        );
        let line_shift = (ccsidr & 0x7) + 4;
        let ways = (ccsidr >> 3) & 0x3ff;
        let sets = (ccsidr >> 13) & 0x7fff;
        let way_shift = ways.leading_zeros();

        for way in 0..=ways {
            for set in 0..=sets {
                let way_bits = way.checked_shl(way_shift).unwrap_or(0);
                let set_way = way_bits | (set << line_shift) | (level << 1);
                asm!("mcr p15, 0, {}, c7, c14, 2", in(reg) set_way);
            }
        }
    }
    asm!("dsb", "isb");
}

/// Turn the data and instruction caches off.
unsafe fn disable_cache() {
    let mut sctlr: u32;
    asm!("mrc p15, 0, {}, c1, c0, 0", out(reg) sctlr);
    sctlr &= !(SCTLR_C | SCTLR_I);
    asm!(
        "mcr p15, 0, {}, c1, c0, 0",
        "isb",
        "mcr p15, 0, {zero}, c7, c5, 0",
        "dsb",
        "isb",
        in(reg) sctlr,
        zero = in(reg) 0_u32,
    );
}

pub(super) fn exec(
    handoff: Handoff,
    cleanup: &mut dyn FnMut(),
    mmu: Option<MmuRegion<'_>>,
) -> Result<Infallible> {
    let kernel = u32::try_from(handoff.entry.raw_value())
        .map_err(|_| anyhow!(BootLoaderError::AddressWidth(handoff.entry.raw_value())))?;
    let params = u32::try_from(handoff.params.raw_value())
        .map_err(|_| anyhow!(BootLoaderError::AddressWidth(handoff.params.raw_value())))?;

    SEALBOOT_KERNEL.store(kernel, Ordering::SeqCst);
    SEALBOOT_PARAMS.store(params, Ordering::SeqCst);

    // SAFETY: the vector table is 32 byte aligned code that lives for the
    // whole program. Only the SVC slot is ever taken from here on.
    unsafe {
        let vbar = std::ptr::addr_of!(sealboot_vectors) as u32;
        asm!("mcr p15, 0, {}, c12, c0, 0", "isb", in(reg) vbar);
    }

    cleanup();

    match mmu {
        Some(mmu) => mmu.table.set_execute_never(mmu.range)?,
        // SAFETY: nothing but the trampoline runs after this point.
        None => unsafe {
            flush_data_cache();
            disable_cache();
        },
    }

    // SAFETY: the SVC handler installed above jumps to the verified kernel.
    unsafe {
        asm!("cpsid if", "svc #0");
    }

    bail!(BootLoaderError::SupervisorFailure)
}
