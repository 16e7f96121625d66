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

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use address_space::{PhysAddr, Region};

use crate::elf::load_elf;
use crate::error::BootLoaderError;
use crate::handoff::{Handoff, MmuRegion};
use crate::linux::{BzImage, LinuxDtbImage};

/// A chunk of bytes bound for a region offset. Memory between the end of
/// `data` and `size` is zero filled.
pub(crate) struct Placement<'a> {
    pub what: &'static str,
    pub offset: u64,
    pub data: &'a [u8],
    pub size: u64,
}

impl<'a> Placement<'a> {
    pub fn bytes(what: &'static str, offset: u64, data: &'a [u8]) -> Self {
        Placement {
            what,
            offset,
            data,
            size: data.len() as u64,
        }
    }
}

/// Check every placement against the region bounds, then write them in
/// order. The region is left untouched if any placement does not fit.
pub(crate) fn place_all<R: Region + ?Sized>(region: &mut R, placements: &[Placement]) -> Result<()> {
    let region_size = region.size();
    for p in placements {
        let size = p.size.max(p.data.len() as u64);
        match p.offset.checked_add(size) {
            Some(end) if end <= region_size => {}
            _ => bail!(BootLoaderError::OutOfRegion(p.what, p.offset, size, region_size)),
        }
    }

    for p in placements {
        region
            .write_bytes(p.data, p.offset)
            .with_context(|| format!("Failed to write {} at offset 0x{:x}", p.what, p.offset))?;
        let len = p.data.len() as u64;
        if p.size > len {
            region.write_zeroes(p.offset + len, p.size - len)?;
        }
    }
    Ok(())
}

/// A bootable image.
///
/// Images start unloaded. `load` writes them into their region, after which
/// `boot` transfers control to the entry point and never comes back on
/// success.
pub trait BootImage {
    /// Write the image and its boot parameters into the region.
    fn load(&mut self) -> Result<()>;

    /// Entry and boot parameter addresses, `None` until loaded.
    fn loaded(&self) -> Option<Handoff>;

    fn entry(&self) -> Option<PhysAddr> {
        self.loaded().map(|handoff| handoff.entry)
    }

    /// Run `cleanup` and jump to the loaded image.
    fn boot(&mut self, cleanup: &mut dyn FnMut()) -> Result<Infallible> {
        self.boot_with_mmu(cleanup, None)
    }

    /// Like `boot`, but mark `mmu.range` execute-never instead of turning
    /// the data cache off.
    fn boot_with_mmu(
        &mut self,
        cleanup: &mut dyn FnMut(),
        mmu: Option<MmuRegion<'_>>,
    ) -> Result<Infallible> {
        let handoff = self
            .loaded()
            .ok_or_else(|| anyhow!(BootLoaderError::NotLoaded))?;
        handoff.boot(cleanup, mmu)
    }
}

/// A bare-metal ELF unikernel, loaded at the physical addresses of its
/// segments.
pub struct ElfImage<R: Region> {
    region: R,
    kernel: Vec<u8>,
    handoff: Option<Handoff>,
}

impl<R: Region> ElfImage<R> {
    pub fn new(region: R, kernel: Vec<u8>) -> Self {
        ElfImage {
            region,
            kernel,
            handoff: None,
        }
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }
}

impl<R: Region> BootImage for ElfImage<R> {
    fn load(&mut self) -> Result<()> {
        let entry = load_elf(&mut self.region, &self.kernel)?;
        info!("Loaded ELF image, entry 0x{:x}", entry.raw_value());
        self.handoff = Some(Handoff::new(entry, PhysAddr(0)));
        Ok(())
    }

    fn loaded(&self) -> Option<Handoff> {
        self.handoff
    }
}

/// Every supported image format.
pub enum Image<R: Region> {
    Elf(ElfImage<R>),
    LinuxDtb(LinuxDtbImage<R>),
    BzImage(BzImage<R>),
}

impl<R: Region> Image<R> {
    pub fn region(&self) -> &R {
        match self {
            Image::Elf(image) => image.region(),
            Image::LinuxDtb(image) => image.region(),
            Image::BzImage(image) => image.region(),
        }
    }

    pub fn into_region(self) -> R {
        match self {
            Image::Elf(image) => image.into_region(),
            Image::LinuxDtb(image) => image.into_region(),
            Image::BzImage(image) => image.into_region(),
        }
    }
}

impl<R: Region> BootImage for Image<R> {
    fn load(&mut self) -> Result<()> {
        match self {
            Image::Elf(image) => image.load(),
            Image::LinuxDtb(image) => image.load(),
            Image::BzImage(image) => image.load(),
        }
    }

    fn loaded(&self) -> Option<Handoff> {
        match self {
            Image::Elf(image) => image.loaded(),
            Image::LinuxDtb(image) => image.loaded(),
            Image::BzImage(image) => image.loaded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use address_space::HostRegion;

    use super::*;
    use crate::test_helper::ElfBuilder;

    const BASE: u64 = 0x8000_0000;

    #[test]
    fn test_place_all_checks_before_writing() {
        let mut region = HostRegion::new(PhysAddr(BASE), 0x100).unwrap();
        let placements = [
            Placement::bytes("first", 0, &[1; 0x10]),
            Placement {
                what: "second",
                offset: 0xf0,
                data: &[2; 4],
                size: 0x20,
            },
        ];

        let err = place_all(&mut region, &placements).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to place second of size 0x20 at offset 0xf0 in region of size 0x100"
        );
        assert!(region.as_slice().iter().all(|&b| b == 0));

        let placements = [Placement {
            what: "zeroed",
            offset: 0x10,
            data: &[3; 2],
            size: 4,
        }];
        region.write_bytes(&[0xff; 8], 0x10).unwrap();
        place_all(&mut region, &placements).unwrap();
        assert_eq!(&region.as_slice()[0x10..0x18], &[3, 3, 0, 0, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_boot_before_load() {
        let region = HostRegion::new(PhysAddr(BASE), 0x1000).unwrap();
        let mut image = Image::Elf(ElfImage::new(region, Vec::new()));
        let mut cleaned = false;

        assert!(image.entry().is_none());
        let err = image.boot(&mut || cleaned = true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::NotLoaded)
        ));
        assert!(!cleaned);
    }

    #[test]
    fn test_elf_image_load() {
        let kernel = ElfBuilder::elf32(BASE as u32 + 4)
            .segment(BASE, b"\x00\x00\xa0\xe1\xfe\xff\xff\xea", 8)
            .build();
        let region = HostRegion::new(PhysAddr(BASE), 0x1000).unwrap();
        let mut image = Image::Elf(ElfImage::new(region, kernel));

        image.load().unwrap();
        assert_eq!(image.entry(), Some(PhysAddr(BASE + 4)));
        assert_eq!(image.loaded().unwrap().params, PhysAddr(0));
        assert_eq!(&image.region().as_slice()[4..8], b"\xfe\xff\xff\xea");
    }

    #[test]
    fn test_elf_image_load_failure_keeps_unloaded() {
        let region = HostRegion::new(PhysAddr(BASE), 0x1000).unwrap();
        let mut image = ElfImage::new(region, b"not an elf".to_vec());

        assert!(image.load().is_err());
        assert!(image.loaded().is_none());
        assert!(image.into_region().as_slice().iter().all(|&b| b == 0));
    }
}
