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

use std::convert::Infallible;

use anyhow::{bail, Result};

use super::{Handoff, MmuRegion};
use crate::error::BootLoaderError;

pub(super) fn exec(
    _handoff: Handoff,
    _cleanup: &mut dyn FnMut(),
    _mmu: Option<MmuRegion<'_>>,
) -> Result<Infallible> {
    bail!(BootLoaderError::UnsupportedArch(std::env::consts::ARCH))
}
