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

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use address_space::{PhysAddr, Region};
use util::device_tree::DeviceTree;

use super::AddressWidth;
use crate::error::BootLoaderError;
use crate::handoff::Handoff;
use crate::image::{place_all, BootImage, Placement};

/// Offsets from the region start of every Linux artifact.
#[derive(Clone, Copy, Debug)]
pub struct LinuxDtbConfig {
    pub kernel_offset: u64,
    pub dtb_offset: u64,
    pub initrd_offset: u64,
    /// Width of the `linux,initrd-*` cells.
    pub address_width: AddressWidth,
}

/// A Linux kernel booted with a device tree blob.
pub struct LinuxDtbImage<R: Region> {
    region: R,
    config: LinuxDtbConfig,
    kernel: Vec<u8>,
    dtb: Option<Vec<u8>>,
    initrd: Option<Vec<u8>>,
    cmdline: String,
    handoff: Option<Handoff>,
}

impl<R: Region> LinuxDtbImage<R> {
    pub fn new(region: R, config: LinuxDtbConfig, kernel: Vec<u8>) -> Self {
        LinuxDtbImage {
            region,
            config,
            kernel,
            dtb: None,
            initrd: None,
            cmdline: String::new(),
            handoff: None,
        }
    }

    pub fn with_dtb(mut self, dtb: Vec<u8>) -> Self {
        self.dtb = Some(dtb);
        self
    }

    pub fn with_initrd(mut self, initrd: Vec<u8>) -> Self {
        self.initrd = Some(initrd);
        self
    }

    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = cmdline.to_string();
        self
    }

    /// The device tree blob, including any fixups applied by `load`.
    pub fn dtb(&self) -> Option<&[u8]> {
        self.dtb.as_deref()
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }

    fn initrd(&self) -> Option<&[u8]> {
        self.initrd.as_deref().filter(|initrd| !initrd.is_empty())
    }

    fn region_addr(&self, offset: u64) -> Result<u64> {
        let base = self.region.base().raw_value();
        base.checked_add(offset)
            .ok_or_else(|| anyhow!(BootLoaderError::AddressWidth(base)))
    }

    /// Apply the command line and initrd location to the `chosen` node.
    fn fixup_dtb(&self, dtb: &[u8]) -> Result<Vec<u8>> {
        let mut tree = DeviceTree::from_blob(dtb)?;
        let chosen = tree.root.child_or_insert("chosen");

        if !self.cmdline.is_empty() {
            let mut bootargs = self.cmdline.as_bytes().to_vec();
            bootargs.push(0);
            chosen.set_property("bootargs", bootargs);
        }

        if let Some(initrd) = self.initrd() {
            let start = self.region_addr(self.config.initrd_offset)?;
            let end = start
                .checked_add(initrd.len() as u64)
                .ok_or_else(|| anyhow!(BootLoaderError::AddressWidth(start)))?;
            let width = self.config.address_width;
            chosen.set_property("linux,initrd-start", width.to_cell(start)?);
            chosen.set_property("linux,initrd-end", width.to_cell(end)?);
        }

        tree.to_blob()
    }
}

impl<R: Region> BootImage for LinuxDtbImage<R> {
    fn load(&mut self) -> Result<()> {
        let has_cmdline = !self.cmdline.is_empty();
        let initrd = self.initrd.as_deref().filter(|initrd| !initrd.is_empty());
        let has_initrd = initrd.is_some();

        let dtb = match self.dtb.as_deref() {
            Some(dtb) if !dtb.is_empty() => Some(dtb),
            _ if has_cmdline => bail!(BootLoaderError::CmdlineRequiresDtb),
            _ if has_initrd => bail!(BootLoaderError::InitrdRequiresDtb),
            _ => None,
        };

        let dtb = match dtb {
            Some(dtb) if has_cmdline || has_initrd => Some(
                self.fixup_dtb(dtb)
                    .with_context(|| "Failed to fix up device tree")?,
            ),
            Some(dtb) => Some(dtb.to_vec()),
            None => None,
        };

        let entry = self.region_addr(self.config.kernel_offset)?;
        let params = match dtb {
            Some(_) => self.region_addr(self.config.dtb_offset)?,
            None => 0,
        };

        let mut placements = Vec::with_capacity(3);
        if let Some(initrd) = initrd {
            placements.push(Placement::bytes("initrd", self.config.initrd_offset, initrd));
        }
        placements.push(Placement::bytes(
            "kernel",
            self.config.kernel_offset,
            &self.kernel,
        ));
        if let Some(dtb) = dtb.as_deref() {
            placements.push(Placement::bytes("dtb", self.config.dtb_offset, dtb));
        }
        place_all(&mut self.region, &placements)?;

        info!(
            "Loaded Linux kernel at 0x{:x}, device tree at 0x{:x}",
            entry, params
        );
        self.dtb = dtb;
        self.handoff = Some(Handoff::new(PhysAddr(entry), PhysAddr(params)));
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
    use crate::test_helper::sample_dtb;

    const BASE: u64 = 0x8000_0000;

    fn config(address_width: AddressWidth) -> LinuxDtbConfig {
        LinuxDtbConfig {
            kernel_offset: 0x8000,
            dtb_offset: 0x1000,
            initrd_offset: 0x2_0000,
            address_width,
        }
    }

    fn region() -> HostRegion {
        HostRegion::new(PhysAddr(BASE), 0x4_0000).unwrap()
    }

    fn region_tree(image: &LinuxDtbImage<HostRegion>) -> DeviceTree {
        let blob = image.dtb().unwrap();
        let mem = image.region().as_slice();
        assert_eq!(&mem[0x1000..0x1000 + blob.len()], blob);
        DeviceTree::from_blob(&mem[0x1000..]).unwrap()
    }

    #[test]
    fn test_load_with_cmdline_and_initrd() {
        let mut image = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 0x100])
            .with_dtb(sample_dtb(true))
            .with_initrd(vec![0x22; 0x80])
            .with_cmdline("console=ttymxc1,115200 root=/dev/mmcblk0p1");
        image.load().unwrap();

        let handoff = image.loaded().unwrap();
        assert_eq!(handoff.entry, PhysAddr(BASE + 0x8000));
        assert_eq!(handoff.params, PhysAddr(BASE + 0x1000));

        let mem = image.region().as_slice();
        assert_eq!(&mem[0x8000..0x8100], &[0x11; 0x100]);
        assert_eq!(&mem[0x2_0000..0x2_0080], &[0x22; 0x80]);

        let tree = region_tree(&image);
        let chosen = tree.root.child("chosen").unwrap();
        assert_eq!(
            chosen.property("bootargs").unwrap(),
            b"console=ttymxc1,115200 root=/dev/mmcblk0p1\0"
        );
        assert_eq!(
            chosen.property("linux,initrd-start").unwrap(),
            &[0x80, 0x02, 0x00, 0x00]
        );
        assert_eq!(
            chosen.property("linux,initrd-end").unwrap(),
            &[0x80, 0x02, 0x00, 0x80]
        );
        // Existing properties survive the fixup.
        assert_eq!(
            chosen.property("stdout-path").unwrap(),
            b"serial1:115200n8\0"
        );
        assert_eq!(tree.mem_reserve.len(), 1);
    }

    #[test]
    fn test_load_creates_chosen_node() {
        let mut image = LinuxDtbImage::new(region(), config(AddressWidth::Bits64), vec![0x11; 4])
            .with_dtb(sample_dtb(false))
            .with_initrd(vec![0x22; 0x10]);
        image.load().unwrap();

        let tree = region_tree(&image);
        let chosen = tree.root.child("chosen").unwrap();
        assert!(chosen.property("bootargs").is_none());
        assert_eq!(
            chosen.property("linux,initrd-start").unwrap(),
            &[0, 0, 0, 0, 0x80, 0x02, 0x00, 0x00]
        );
        assert_eq!(
            chosen.property("linux,initrd-end").unwrap(),
            &[0, 0, 0, 0, 0x80, 0x02, 0x00, 0x10]
        );
    }

    #[test]
    fn test_load_replaces_bootargs() {
        let mut first = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 4])
            .with_dtb(sample_dtb(true))
            .with_cmdline("quiet");
        first.load().unwrap();
        let fixed = first.dtb().unwrap().to_vec();

        let mut second = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 4])
            .with_dtb(fixed)
            .with_cmdline("console=ttyS0");
        second.load().unwrap();

        let tree = region_tree(&second);
        let chosen = tree.root.child("chosen").unwrap();
        let bootargs: Vec<_> = chosen
            .properties
            .iter()
            .filter(|p| p.name == "bootargs")
            .collect();
        assert_eq!(bootargs.len(), 1);
        assert_eq!(bootargs[0].value, b"console=ttyS0\0");
    }

    #[test]
    fn test_load_without_fixups_keeps_dtb() {
        let dtb = sample_dtb(true);
        let mut image = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 4])
            .with_dtb(dtb.clone());
        image.load().unwrap();

        assert_eq!(image.dtb().unwrap(), &dtb[..]);
        assert_eq!(&image.region().as_slice()[0x1000..0x1000 + dtb.len()], &dtb[..]);
    }

    #[test]
    fn test_load_requires_dtb() {
        let mut image = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 4])
            .with_cmdline("console=ttyS0");
        let err = image.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::CmdlineRequiresDtb)
        ));

        let mut image = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 4])
            .with_initrd(vec![1]);
        let err = image.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::InitrdRequiresDtb)
        ));
        assert!(image.loaded().is_none());
        assert!(image.region().as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_load_rejects_bad_dtb() {
        let mut image = LinuxDtbImage::new(region(), config(AddressWidth::Bits32), vec![0x11; 4])
            .with_dtb(b"not a device tree".to_vec())
            .with_cmdline("console=ttyS0");
        let err = image.load().unwrap_err();
        assert_eq!(err.to_string(), "Failed to fix up device tree");
        assert!(image.region().as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_initrd_address_too_wide() {
        let region = HostRegion::new(PhysAddr(0xffff_f000), 0x3_0000).unwrap();
        let mut image = LinuxDtbImage::new(region, config(AddressWidth::Bits32), vec![0x11; 4])
            .with_dtb(sample_dtb(true))
            .with_initrd(vec![1; 4]);
        let err = image.load().unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::AddressWidth(_))
        ));
    }
}
