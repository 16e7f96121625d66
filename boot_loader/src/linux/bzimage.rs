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

use std::io::Read;

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use log::{debug, info};

use address_space::{PhysAddr, Region};
use util::byte_code::ByteCode;

use super::bootparam::{
    BootParams, E820Entry, EfiInfo, RealModeKernelHeader, ScreenInfo, BOOT_HDR_START, E820_MAX,
    PAYLOAD_PROTOCOL_VERSION, UNDEFINED_ID,
};
use crate::elf::{is_elf, ElfFile};
use crate::error::BootLoaderError;
use crate::handoff::Handoff;
use crate::image::{place_all, BootImage, Placement};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Payload compressions a kernel may be built with, none of which but gzip
/// is handled here.
const OTHER_COMPRESSIONS: [(&[u8], &str); 6] = [
    (b"BZh", "bzip2"),
    (&[0x5d, 0x00, 0x00], "lzma"),
    (&[0xfd, b'7', b'z', b'X', b'Z', 0x00], "xz"),
    (&[0x89, b'L', b'Z', b'O'], "lzo"),
    (&[0x02, 0x21, 0x4c, 0x18], "lz4"),
    (&[0x28, 0xb5, 0x2f, 0xfd], "zstd"),
];

/// Region layout and platform information for a bzImage boot.
#[derive(Clone, Debug, Default)]
pub struct BzImageConfig {
    pub kernel_offset: u64,
    /// Zero page offset.
    pub params_offset: u64,
    pub cmdline_offset: u64,
    pub initrd_offset: u64,
    /// System memory map.
    pub memory: Vec<E820Entry>,
    pub efi: Option<EfiInfo>,
    pub screen: Option<ScreenInfo>,
}

/// Read and check the setup header of a bzImage.
///
/// # Errors
///
/// * No setup header at offset `0x1f1`.
/// * Boot protocol older than 2.05 or a non-relocatable kernel.
pub fn parse_header(kernel: &[u8]) -> Result<RealModeKernelHeader> {
    let hdr = RealModeKernelHeader::read_at(kernel, BOOT_HDR_START)
        .ok_or_else(|| anyhow!(BootLoaderError::InvalidBzImage))?;
    hdr.check_valid_kernel()?;
    Ok(hdr)
}

/// Return the protected-mode kernel ELF embedded in a bzImage, decompressing
/// it if needed.
pub fn extract_payload(kernel: &[u8], hdr: &RealModeKernelHeader) -> Result<Vec<u8>> {
    let version = hdr.version;
    if version < PAYLOAD_PROTOCOL_VERSION {
        bail!(BootLoaderError::UnsupportedPayload("payload location unknown"));
    }

    let payload_offset = hdr.payload_offset;
    let payload_length = hdr.payload_length;
    let payload = hdr
        .setup_size()
        .checked_add(u64::from(payload_offset))
        .and_then(|start| usize::try_from(start).ok())
        .and_then(|start| {
            let end = start.checked_add(usize::try_from(payload_length).ok()?)?;
            kernel.get(start..end)
        })
        .ok_or_else(|| anyhow!(BootLoaderError::InvalidBzImage))?;

    if is_elf(payload) {
        return Ok(payload.to_vec());
    }

    if payload.starts_with(GZIP_MAGIC) {
        let mut vmlinux = Vec::new();
        GzDecoder::new(payload)
            .read_to_end(&mut vmlinux)
            .with_context(|| "Failed to decompress bzImage payload")?;
        debug!(
            "Decompressed bzImage payload, {} to {} bytes",
            payload.len(),
            vmlinux.len()
        );
        return Ok(vmlinux);
    }

    let name = OTHER_COMPRESSIONS
        .iter()
        .find(|(magic, _)| payload.starts_with(magic))
        .map_or("unknown format", |(_, name)| *name);
    bail!(BootLoaderError::UnsupportedPayload(name))
}

fn region_addr(base: u64, offset: u64) -> Result<u64> {
    base.checked_add(offset)
        .ok_or_else(|| anyhow!(BootLoaderError::AddressWidth(base)))
}

fn addr32(addr: u64) -> Result<u32> {
    u32::try_from(addr).map_err(|_| anyhow!(BootLoaderError::AddressWidth(addr)))
}

/// An x86 Linux bzImage booted through the zero page.
pub struct BzImage<R: Region> {
    region: R,
    config: BzImageConfig,
    kernel: Vec<u8>,
    initrd: Option<Vec<u8>>,
    cmdline: String,
    handoff: Option<Handoff>,
}

impl<R: Region> BzImage<R> {
    pub fn new(region: R, config: BzImageConfig, kernel: Vec<u8>) -> Self {
        BzImage {
            region,
            config,
            kernel,
            initrd: None,
            cmdline: String::new(),
            handoff: None,
        }
    }

    pub fn with_initrd(mut self, initrd: Vec<u8>) -> Self {
        self.initrd = Some(initrd);
        self
    }

    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = cmdline.to_string();
        self
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }
}

impl<R: Region> BootImage for BzImage<R> {
    fn load(&mut self) -> Result<()> {
        let mut hdr = parse_header(&self.kernel)?;
        let vmlinux = extract_payload(&self.kernel, &hdr)?;
        let elf = ElfFile::parse(&vmlinux).with_context(|| "Failed to parse bzImage payload")?;

        let config = &self.config;
        let base = self.region.base().raw_value();

        hdr.type_of_loader = UNDEFINED_ID;
        hdr.root_flags = 1;

        let mut cmdline = Vec::new();
        if !self.cmdline.is_empty() {
            let len = u32::try_from(self.cmdline.len()).unwrap_or(u32::MAX);
            let max = hdr.cmdline_size;
            if len > max {
                bail!(BootLoaderError::CmdlineTooLong(len, max));
            }
            hdr.set_cmdline(addr32(region_addr(base, config.cmdline_offset)?)?, len);
            cmdline.extend_from_slice(self.cmdline.as_bytes());
            cmdline.push(0);
        }

        let initrd = self.initrd.as_deref().filter(|initrd| !initrd.is_empty());
        if let Some(initrd) = initrd {
            let start = region_addr(base, config.initrd_offset)?;
            let max = hdr.initrd_addr_max;
            if start > u64::from(max) {
                bail!(BootLoaderError::InitrdAddrMax(start, max));
            }
            hdr.set_ramdisk(addr32(start)?, addr32(initrd.len() as u64)?);
        }

        if config.memory.len() > E820_MAX {
            bail!(BootLoaderError::E820Overflow(config.memory.len(), E820_MAX));
        }
        let mut params = BootParams::new(hdr);
        for entry in &config.memory {
            params.add_e820_entry(*entry)?;
        }
        if let Some(efi) = config.efi {
            params.efi_info = efi;
        }
        if let Some(screen) = config.screen {
            params.screen_info = screen;
        }

        let kernel_offset = config.kernel_offset;
        let mut placements = elf.placements(|seg| {
            kernel_offset
                .checked_add(seg.paddr)
                .ok_or_else(|| anyhow!(BootLoaderError::AddressWidth(seg.paddr)))
        })?;
        if !cmdline.is_empty() {
            placements.push(Placement::bytes("cmdline", config.cmdline_offset, &cmdline));
        }
        if let Some(initrd) = initrd {
            placements.push(Placement::bytes("initrd", config.initrd_offset, initrd));
        }
        placements.push(Placement::bytes(
            "zero page",
            config.params_offset,
            params.as_bytes(),
        ));

        let entry = region_addr(base, kernel_offset)
            .and_then(|kernel| region_addr(kernel, elf.entry()))?;
        let params_addr = region_addr(base, config.params_offset)?;
        place_all(&mut self.region, &placements)?;

        info!(
            "Loaded bzImage kernel, entry 0x{:x}, zero page at 0x{:x}",
            entry, params_addr
        );
        self.handoff = Some(Handoff::new(PhysAddr(entry), PhysAddr(params_addr)));
        Ok(())
    }

    fn loaded(&self) -> Option<Handoff> {
        self.handoff
    }
}

#[cfg(test)]
mod tests {
    use address_space::HostRegion;

    use super::*;
    use crate::linux::bootparam::{
        E820_RAM, E820_RESERVED, EFI64_LOADER_SIGNATURE, VIDEO_TYPE_EFI,
    };
    use crate::test_helper::{BzImageBuilder, ElfBuilder};

    const BASE: u64 = 0x1000_0000;

    fn vmlinux() -> Vec<u8> {
        ElfBuilder::elf64(0x1000)
            .segment(0x1000, &[0xcc; 0x40], 0x80)
            .segment(0x2000, &[0xdd; 0x10], 0x10)
            .note(b"Linux")
            .build()
    }

    fn config() -> BzImageConfig {
        BzImageConfig {
            kernel_offset: 0x1_0000,
            params_offset: 0x7000,
            cmdline_offset: 0x8000,
            initrd_offset: 0x3_0000,
            memory: vec![
                E820Entry::new(0, 0x9_fc00, E820_RAM),
                E820Entry::new(BASE, 0x4_0000, E820_RAM),
            ],
            efi: None,
            screen: None,
        }
    }

    fn region() -> HostRegion {
        HostRegion::new(PhysAddr(BASE), 0x4_0000).unwrap()
    }

    fn load_error(image: &mut BzImage<HostRegion>) -> BootLoaderError {
        let err = image.load().unwrap_err();
        assert!(image.region().as_slice().iter().all(|&b| b == 0));
        match err.downcast::<BootLoaderError>() {
            Ok(err) => err,
            Err(err) => panic!("unexpected error {:?}", err),
        }
    }

    #[test]
    fn test_load_gzip_bzimage() {
        let kernel = BzImageBuilder::new(vmlinux()).gzip(true).build();
        let mut config = config();
        config.efi = Some(EfiInfo {
            loader_signature: EFI64_LOADER_SIGNATURE,
            systab: 0x7fe0_0000,
            ..Default::default()
        });
        config.screen = Some(ScreenInfo {
            orig_video_is_vga: VIDEO_TYPE_EFI,
            lfb_width: 800,
            lfb_height: 600,
            ..Default::default()
        });
        let mut image = BzImage::new(region(), config, kernel)
            .with_initrd(vec![0x5a; 0x100])
            .with_cmdline("console=ttyS0");
        image.load().unwrap();

        let handoff = image.loaded().unwrap();
        assert_eq!(handoff.entry, PhysAddr(BASE + 0x1_1000));
        assert_eq!(handoff.params, PhysAddr(BASE + 0x7000));

        let mem = image.region().as_slice();
        assert_eq!(&mem[0x1_1000..0x1_1040], &[0xcc; 0x40]);
        assert_eq!(&mem[0x1_1040..0x1_1080], &[0; 0x40]);
        assert_eq!(&mem[0x1_2000..0x1_2010], &[0xdd; 0x10]);
        assert_eq!(&mem[0x8000..0x800e], b"console=ttyS0\0");
        assert_eq!(&mem[0x3_0000..0x3_0100], &[0x5a; 0x100]);

        let params = BootParams::read_at(mem, 0x7000).unwrap();
        let hdr = params.kernel_header;
        let root_flags = hdr.root_flags;
        assert_eq!(root_flags, 1);
        assert_eq!(hdr.type_of_loader, UNDEFINED_ID);
        assert_eq!(hdr.cmdline(), ((BASE + 0x8000) as u32, 13));
        assert_eq!(hdr.ramdisk(), ((BASE + 0x3_0000) as u32, 0x100));
        assert_eq!(params.e820_entries(), &config_memory()[..]);

        let efi = params.efi_info;
        assert_eq!(efi.loader_signature, *b"EL64");
        let systab = efi.systab;
        assert_eq!(systab, 0x7fe0_0000);
        let screen = params.screen_info;
        assert_eq!(screen.orig_video_is_vga, VIDEO_TYPE_EFI);
        let lfb_width = screen.lfb_width;
        assert_eq!(lfb_width, 800);
    }

    fn config_memory() -> Vec<E820Entry> {
        config().memory
    }

    #[test]
    fn test_load_raw_elf_payload() {
        let kernel = BzImageBuilder::new(vmlinux()).build();
        let mut image = BzImage::new(region(), config(), kernel);
        image.load().unwrap();

        let mem = image.region().as_slice();
        assert_eq!(&mem[0x1_1000..0x1_1040], &[0xcc; 0x40]);
        let params = BootParams::read_at(mem, 0x7000).unwrap();
        let hdr = params.kernel_header;
        assert_eq!(hdr.cmdline(), (0, 0));
        assert_eq!(hdr.ramdisk(), (0, 0));
    }

    #[test]
    fn test_reject_incompatible_kernels() {
        let kernel = BzImageBuilder::new(vmlinux()).version(0x0204).build();
        let mut image = BzImage::new(region(), config(), kernel);
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::OldVersionKernel(0x0204)
        ));

        let kernel = BzImageBuilder::new(vmlinux()).relocatable(false).build();
        let mut image = BzImage::new(region(), config(), kernel);
        assert!(matches!(load_error(&mut image), BootLoaderError::NotRelocatable));

        let mut kernel = BzImageBuilder::new(vmlinux()).build();
        kernel[0x202] = b'X';
        let mut image = BzImage::new(region(), config(), kernel);
        assert!(matches!(load_error(&mut image), BootLoaderError::InvalidBzImage));

        let mut image = BzImage::new(region(), config(), vec![0; 0x100]);
        assert!(matches!(load_error(&mut image), BootLoaderError::InvalidBzImage));

        let kernel = BzImageBuilder::new(vmlinux()).version(0x0206).build();
        let mut image = BzImage::new(region(), config(), kernel);
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::UnsupportedPayload(_)
        ));
    }

    #[test]
    fn test_reject_unsupported_compression() {
        let mut xz = vec![0xfd, b'7', b'z', b'X', b'Z', 0x00];
        xz.extend_from_slice(&[0; 64]);
        let kernel = BzImageBuilder::new(xz).build();
        let mut image = BzImage::new(region(), config(), kernel);
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::UnsupportedPayload("xz")
        ));
    }

    #[test]
    fn test_reject_cmdline_too_long() {
        let kernel = BzImageBuilder::new(vmlinux()).cmdline_size(8).build();
        let mut image = BzImage::new(region(), config(), kernel).with_cmdline("console=ttyS0");
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::CmdlineTooLong(13, 8)
        ));
    }

    #[test]
    fn test_reject_initrd_above_max() {
        let kernel = BzImageBuilder::new(vmlinux())
            .initrd_addr_max(BASE as u32 + 0x1_0000)
            .build();
        let mut image = BzImage::new(region(), config(), kernel).with_initrd(vec![1; 16]);
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::InitrdAddrMax(addr, 0x1001_0000) if addr == BASE + 0x3_0000
        ));
    }

    #[test]
    fn test_reject_oversized_memory_map() {
        let mut config = config();
        config.memory = vec![E820Entry::new(0, 0x1000, E820_RESERVED); E820_MAX + 1];
        let kernel = BzImageBuilder::new(vmlinux()).build();
        let mut image = BzImage::new(region(), config, kernel);
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::E820Overflow(129, E820_MAX)
        ));
    }

    #[test]
    fn test_reject_kernel_outside_region() {
        let mut config = config();
        config.kernel_offset = 0x3_f000;
        let kernel = BzImageBuilder::new(vmlinux()).build();
        let mut image = BzImage::new(region(), config, kernel);
        assert!(matches!(
            load_error(&mut image),
            BootLoaderError::OutOfRegion("ELF segment", 0x4_0000, 0x80, 0x4_0000)
        ));
    }
}
