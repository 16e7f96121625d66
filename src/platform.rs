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

//! Board constants and the mapping from a verified configuration to a boot
//! image.

use std::str::FromStr;

use anyhow::{anyhow, Result};
use log::debug;

use address_space::Region;
use boot_config::{
    Artifacts, BootDescriptor, Config, DtbPolicy, DEFAULT_CONFIG_PATH, DEFAULT_SIGNATURE_PATH,
};
use boot_loader::linux::bootparam::{E820Entry, E820_RAM};
use boot_loader::{
    AddressWidth, BzImage, BzImageConfig, ElfImage, Image, LinuxDtbConfig, LinuxDtbImage,
};

use crate::error::SealbootError;

/// Boot media selector baked in at build time.
pub const BUILD_BOOT: &str = match option_env!("SEALBOOT_BOOT") {
    Some(boot) => boot,
    None => "eMMC",
};

/// Partition start offset in bytes, as a decimal string.
pub const BUILD_START: &str = match option_env!("SEALBOOT_START") {
    Some(start) => start,
    None => "5242880",
};

/// Base64 last line of the minisign public key. Empty disables verification.
pub const BUILD_PUBLIC_KEY: &str = match option_env!("SEALBOOT_PUBLIC_KEY") {
    Some(key) => key,
    None => "",
};

/// Console log level name, used when the `console` feature is enabled.
pub const BUILD_LOG_LEVEL: &str = match option_env!("SEALBOOT_LOG_LEVEL") {
    Some(level) => level,
    None => "info",
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootMedia {
    Emmc,
    Sd,
}

impl BootMedia {
    /// Host device node of the media.
    pub fn device_path(self) -> &'static str {
        match self {
            BootMedia::Emmc => "/dev/mmcblk1",
            BootMedia::Sd => "/dev/mmcblk0",
        }
    }
}

impl FromStr for BootMedia {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eMMC" => Ok(BootMedia::Emmc),
            "uSD" => Ok(BootMedia::Sd),
            _ => Err(anyhow!(SealbootError::InvalidBootMedia(s.to_string()))),
        }
    }
}

/// Parse a decimal partition start offset.
pub fn parse_start(start: &str) -> Result<u64> {
    start
        .parse::<u64>()
        .map_err(|e| anyhow!(SealbootError::InvalidStart(e.to_string())))
}

/// How a Linux kernel receives its boot parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinuxBoot {
    DeviceTree,
    ZeroPage,
}

/// RAM window reserved for loading and the offsets of each artifact in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    pub ram_start: u64,
    pub ram_size: u64,
    pub kernel_offset: u64,
    /// Device tree blob or zero page.
    pub params_offset: u64,
    pub initrd_offset: u64,
    /// Zero page flow only.
    pub cmdline_offset: u64,
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub boot_media: BootMedia,
    pub start: u64,
    pub public_key: String,
    pub config_path: String,
    pub signature_path: String,
    pub memory: MemoryLayout,
    pub linux_boot: LinuxBoot,
    pub address_width: AddressWidth,
    pub e820: Vec<E820Entry>,
    pub dtb_policy: DtbPolicy,
}

impl PlatformConfig {
    /// i.MX6-class board booting Linux with a device tree.
    pub fn arm(boot_media: BootMedia, start: u64, public_key: &str) -> Self {
        PlatformConfig {
            boot_media,
            start,
            public_key: public_key.to_string(),
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            signature_path: DEFAULT_SIGNATURE_PATH.to_string(),
            memory: MemoryLayout {
                ram_start: 0x8000_0000,
                ram_size: 0x1000_0000,
                kernel_offset: 0x0080_0000,
                params_offset: 0x0700_0000,
                initrd_offset: 0x0800_0000,
                cmdline_offset: 0,
            },
            linux_boot: LinuxBoot::DeviceTree,
            address_width: AddressWidth::Bits32,
            e820: Vec::new(),
            dtb_policy: DtbPolicy::Required,
        }
    }

    /// PC-class machine booting Linux through the zero page.
    pub fn x86_64(boot_media: BootMedia, start: u64, public_key: &str) -> Self {
        let ram_start = 0x0100_0000;
        let ram_size = 0x3f00_0000;
        PlatformConfig {
            boot_media,
            start,
            public_key: public_key.to_string(),
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            signature_path: DEFAULT_SIGNATURE_PATH.to_string(),
            memory: MemoryLayout {
                ram_start,
                ram_size,
                kernel_offset: 0,
                params_offset: 0x7000,
                initrd_offset: 0x1000_0000,
                cmdline_offset: 0x8000,
            },
            linux_boot: LinuxBoot::ZeroPage,
            address_width: AddressWidth::Bits64,
            e820: vec![
                E820Entry::new(0, 0x9_fc00, E820_RAM),
                E820Entry::new(ram_start, ram_size, E820_RAM),
            ],
            dtb_policy: DtbPolicy::Optional,
        }
    }

    /// Defaults of the build target, with the constants injected at build time.
    pub fn from_build_env() -> Result<Self> {
        let boot_media = BUILD_BOOT.parse::<BootMedia>()?;
        let start = parse_start(BUILD_START)?;
        let config = if cfg!(target_arch = "x86_64") {
            PlatformConfig::x86_64(boot_media, start, BUILD_PUBLIC_KEY)
        } else {
            PlatformConfig::arm(boot_media, start, BUILD_PUBLIC_KEY)
        };
        debug!(
            "boot media {:?}, partition start {}",
            config.boot_media, config.start
        );
        Ok(config)
    }

    /// Build the boot image described by a verified configuration.
    pub fn image_for<R: Region>(&self, region: R, config: Config) -> Image<R> {
        let (descriptor, artifacts) = config.into_artifacts();
        self.image_from_parts(region, descriptor, artifacts)
    }

    fn image_from_parts<R: Region>(
        &self,
        region: R,
        descriptor: BootDescriptor,
        artifacts: Artifacts,
    ) -> Image<R> {
        let Artifacts {
            kernel,
            dtb,
            initrd,
        } = artifacts;
        let layout = &self.memory;

        if descriptor.elf {
            return Image::Elf(ElfImage::new(region, kernel));
        }

        match self.linux_boot {
            LinuxBoot::DeviceTree => {
                let config = LinuxDtbConfig {
                    kernel_offset: layout.kernel_offset,
                    dtb_offset: layout.params_offset,
                    initrd_offset: layout.initrd_offset,
                    address_width: self.address_width,
                };
                let mut image =
                    LinuxDtbImage::new(region, config, kernel).with_cmdline(&descriptor.cmdline);
                if let Some(dtb) = dtb {
                    image = image.with_dtb(dtb);
                }
                if let Some(initrd) = initrd {
                    image = image.with_initrd(initrd);
                }
                Image::LinuxDtb(image)
            }
            LinuxBoot::ZeroPage => {
                let config = BzImageConfig {
                    kernel_offset: layout.kernel_offset,
                    params_offset: layout.params_offset,
                    cmdline_offset: layout.cmdline_offset,
                    initrd_offset: layout.initrd_offset,
                    memory: self.e820.clone(),
                    efi: None,
                    screen: None,
                };
                let mut image =
                    BzImage::new(region, config, kernel).with_cmdline(&descriptor.cmdline);
                if let Some(initrd) = initrd {
                    image = image.with_initrd(initrd);
                }
                Image::BzImage(image)
            }
        }
    }
}
