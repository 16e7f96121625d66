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

//! # Sealboot
//!
//! A bootloader that only transfers control to kernels it has authenticated.
//!
//! The pipeline reads a signed configuration from an ext4 boot partition,
//! verifies it against a build-time public key, checks every referenced
//! artifact against its declared hash, stages the images into a memory
//! region and jumps to the loaded kernel. Any failure aborts before the
//! first byte reaches the region.

pub mod error;
pub mod platform;

pub use error::SealbootError;
pub use platform::{BootMedia, LinuxBoot, MemoryLayout, PlatformConfig};

use std::convert::Infallible;

use anyhow::{Context, Result};
use log::info;

use address_space::Region;
use block_backend::{BlockDevice, Partition};
use boot_loader::{BootImage, Image};

/// Authenticate the configuration on `device` and load the image it
/// describes into `region`.
pub fn prepare<D: BlockDevice, R: Region>(
    platform: &PlatformConfig,
    device: D,
    region: R,
) -> Result<Image<R>> {
    let mut partition =
        Partition::detect(device, platform.start).with_context(|| SealbootError::Media)?;

    let config = boot_config::load(
        &mut partition,
        &platform.config_path,
        &platform.signature_path,
        &platform.public_key,
        platform.dtb_policy,
    )
    .with_context(|| SealbootError::Config)?;

    let mut image = platform.image_for(region, config);
    image.load().with_context(|| SealbootError::Load)?;
    Ok(image)
}

/// Run the whole pipeline and hand off to the loaded kernel.
///
/// `cleanup` runs right before the jump, once nothing else can fail.
pub fn boot_from<D: BlockDevice, R: Region>(
    platform: &PlatformConfig,
    device: D,
    region: R,
    cleanup: &mut dyn FnMut(),
) -> Result<Infallible> {
    let mut image = prepare(platform, device, region)?;
    if let Some(entry) = image.entry() {
        info!("starting kernel@{:08x}", entry.raw_value());
    }
    image.boot(cleanup)
}
