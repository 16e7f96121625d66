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

use anyhow::{Context, Result};
use log::error;

use address_space::{PhysAddr, PhysRegion};
use block_backend::FileBlockDevice;
use sealboot::{boot_from, PlatformConfig};

#[cfg(feature = "console")]
fn init_console() -> Result<()> {
    let level = util::logger::parse_level(sealboot::platform::BUILD_LOG_LEVEL);
    util::logger::init_log(level, Box::new(std::io::stdout()))?;
    log::info!("sealboot • {} • {}", std::env::consts::ARCH, util::VERSION);
    Ok(())
}

#[cfg(not(feature = "console"))]
fn init_console() -> Result<()> {
    util::logger::silence_log();
    Ok(())
}

fn pre_launch() {
    log::logger().flush();
}

fn run() -> Result<Infallible> {
    init_console()?;

    std::panic::set_hook(Box::new(|panic_msg| {
        let panic_file = panic_msg.location().map_or("", |loc| loc.file());
        let panic_line = panic_msg.location().map_or(0, |loc| loc.line());
        if let Some(msg) = panic_msg.payload().downcast_ref::<&str>() {
            error!("Panic at [{}: {}]: {}.", panic_file, panic_line, msg);
        } else if let Some(msg) = panic_msg.payload().downcast_ref::<String>() {
            error!("Panic at [{}: {}]: {}.", panic_file, panic_line, msg);
        } else {
            error!("Panic at [{}: {}].", panic_file, panic_line);
        }
        log::logger().flush();
    }));

    let platform = PlatformConfig::from_build_env()?;
    let device = FileBlockDevice::new(platform.boot_media.device_path());
    let layout = platform.memory;
    // SAFETY: the load window is reserved by the board memory map and nothing
    // else in this image lives inside it.
    let region = unsafe { PhysRegion::new(PhysAddr(layout.ram_start), layout.ram_size) }
        .with_context(|| "Failed to map the load window")?;

    boot_from(&platform, device, region, &mut pre_launch)
}

fn main() {
    match run() {
        Ok(never) => match never {},
        Err(e) => {
            error!("{:?}", e);
            panic!("{:#}", e);
        }
    }
}
