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

use std::arch::asm;
use std::convert::Infallible;

use anyhow::Result;

use super::{Handoff, MmuRegion};

/// Jump to a 64-bit Linux entry point: interrupts off, direction flag
/// clear, `rsi` pointing at the zero page.
pub(super) fn exec(
    handoff: Handoff,
    cleanup: &mut dyn FnMut(),
    mmu: Option<MmuRegion<'_>>,
) -> Result<Infallible> {
    cleanup();

    if let Some(mmu) = mmu {
        mmu.table.set_execute_never(mmu.range)?;
    }

    // SAFETY: the entry point belongs to an image that has been verified
    // and loaded into identity mapped memory. Control never comes back.
    unsafe {
        asm!(
            "cli",
            "cld",
            "jmp {entry}",
            entry = in(reg) handoff.entry.raw_value(),
            in("rsi") handoff.params.raw_value(),
            options(noreturn)
        )
    }
}
