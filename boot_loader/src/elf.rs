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

//! A small ELF reader for bare-metal images.
//!
//! Only program headers are looked at. Both ELF32 and ELF64 little-endian
//! files are accepted.

use std::mem::size_of;

use anyhow::{anyhow, bail, Context, Result};

use address_space::{PhysAddr, Region};
use util::byte_code::ByteCode;

use crate::error::BootLoaderError;
use crate::image::{place_all, Placement};

const EI_MAG0: usize = 0;
const EI_MAG3: usize = 3;
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_NIDENT: usize = 16;

const ELFMAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;

const ELFDATA2LSB: u8 = 1;

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

type Elf32_Addr = u32;
type Elf32_Half = u16;
type Elf32_Off = u32;
type Elf32_Word = u32;

type Elf64_Addr = u64;
type Elf64_Half = u16;
type Elf64_Off = u64;
type Elf64_Word = u32;
type Elf64_Xword = u64;

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct Elf32Header {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: Elf32_Half,
    pub e_machine: Elf32_Half,
    pub e_version: Elf32_Word,
    pub e_entry: Elf32_Addr,
    pub e_phoff: Elf32_Off,
    pub e_shoff: Elf32_Off,
    pub e_flags: Elf32_Word,
    pub e_ehsize: Elf32_Half,
    pub e_phentsize: Elf32_Half,
    pub e_phnum: Elf32_Half,
    pub e_shentsize: Elf32_Half,
    pub e_shnum: Elf32_Half,
    pub e_shstrndx: Elf32_Half,
}

impl ByteCode for Elf32Header {}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct Elf32ProgHeader {
    pub p_type: Elf32_Word,
    pub p_offset: Elf32_Off,
    pub p_vaddr: Elf32_Addr,
    pub p_paddr: Elf32_Addr,
    pub p_filesz: Elf32_Word,
    pub p_memsz: Elf32_Word,
    pub p_flags: Elf32_Word,
    pub p_align: Elf32_Word,
}

impl ByteCode for Elf32ProgHeader {}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct Elf64Header {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: Elf64_Half,
    pub e_machine: Elf64_Half,
    pub e_version: Elf64_Word,
    pub e_entry: Elf64_Addr,
    pub e_phoff: Elf64_Off,
    pub e_shoff: Elf64_Off,
    pub e_flags: Elf64_Word,
    pub e_ehsize: Elf64_Half,
    pub e_phentsize: Elf64_Half,
    pub e_phnum: Elf64_Half,
    pub e_shentsize: Elf64_Half,
    pub e_shnum: Elf64_Half,
    pub e_shstrndx: Elf64_Half,
}

impl ByteCode for Elf64Header {}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct Elf64ProgHeader {
    pub p_type: Elf64_Word,
    pub p_flags: Elf64_Word,
    pub p_offset: Elf64_Off,
    pub p_vaddr: Elf64_Addr,
    pub p_paddr: Elf64_Addr,
    pub p_filesz: Elf64_Xword,
    pub p_memsz: Elf64_Xword,
    pub p_align: Elf64_Xword,
}

impl ByteCode for Elf64ProgHeader {}

/// A program header with its fields widened to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub p_type: u32,
    pub offset: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl From<Elf32ProgHeader> for Segment {
    fn from(ph: Elf32ProgHeader) -> Self {
        Segment {
            p_type: ph.p_type,
            offset: u64::from(ph.p_offset),
            paddr: u64::from(ph.p_paddr),
            filesz: u64::from(ph.p_filesz),
            memsz: u64::from(ph.p_memsz),
        }
    }
}

impl From<Elf64ProgHeader> for Segment {
    fn from(ph: Elf64ProgHeader) -> Self {
        Segment {
            p_type: ph.p_type,
            offset: ph.p_offset,
            paddr: ph.p_paddr,
            filesz: ph.p_filesz,
            memsz: ph.p_memsz,
        }
    }
}

/// A parsed ELF image borrowing its file bytes.
#[derive(Debug)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    entry: u64,
    segments: Vec<Segment>,
}

/// Whether `data` starts with the ELF magic.
pub fn is_elf(data: &[u8]) -> bool {
    data.get(EI_MAG0..=EI_MAG3) == Some(&ELFMAG[..])
}

fn prog_headers<T: ByteCode + Into<Segment>>(
    data: &[u8],
    phoff: u64,
    phentsize: u16,
    phnum: u16,
) -> Result<Vec<Segment>> {
    if phnum > 0 && usize::from(phentsize) < size_of::<T>() {
        bail!(BootLoaderError::InvalidElf("program header entry too small"));
    }

    let mut segments = Vec::with_capacity(usize::from(phnum));
    for idx in 0..u64::from(phnum) {
        let ph = idx
            .checked_mul(u64::from(phentsize))
            .and_then(|off| off.checked_add(phoff))
            .and_then(|off| T::read_at(data, off))
            .ok_or_else(|| anyhow!(BootLoaderError::InvalidElf("truncated program headers")))?;
        segments.push(ph.into());
    }
    Ok(segments)
}

impl<'a> ElfFile<'a> {
    /// Parse the ELF header and program header table of `data`.
    ///
    /// # Errors
    ///
    /// Bad magic, big endian or unknown class, program headers reaching past
    /// the file, or a segment whose file bytes do not fit the file.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if !is_elf(data) {
            bail!(BootLoaderError::InvalidElf("invalid magic in ELF header"));
        }
        if data.get(EI_DATA) != Some(&ELFDATA2LSB) {
            bail!(BootLoaderError::InvalidElf("big endian ELF file is not supported"));
        }

        let (entry, segments) = match data.get(EI_CLASS) {
            Some(&ELFCLASS32) => {
                let hdr = Elf32Header::from_slice(data)
                    .ok_or_else(|| anyhow!(BootLoaderError::InvalidElf("truncated header")))?;
                let segments = prog_headers::<Elf32ProgHeader>(
                    data,
                    u64::from(hdr.e_phoff),
                    hdr.e_phentsize,
                    hdr.e_phnum,
                )?;
                (u64::from(hdr.e_entry), segments)
            }
            Some(&ELFCLASS64) => {
                let hdr = Elf64Header::from_slice(data)
                    .ok_or_else(|| anyhow!(BootLoaderError::InvalidElf("truncated header")))?;
                let segments = prog_headers::<Elf64ProgHeader>(
                    data,
                    hdr.e_phoff,
                    hdr.e_phentsize,
                    hdr.e_phnum,
                )?;
                (hdr.e_entry, segments)
            }
            _ => bail!(BootLoaderError::InvalidElf("unknown ELF class")),
        };

        let elf = ElfFile {
            data,
            entry,
            segments,
        };
        for seg in elf.loadable() {
            if seg.filesz > seg.memsz {
                bail!(BootLoaderError::InvalidElf("segment file size exceeds memory size"));
            }
            elf.segment_data(seg)?;
        }
        Ok(elf)
    }

    /// Entry point address as recorded in the file header.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `PT_LOAD` segments in file order.
    pub fn loadable(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|seg| seg.p_type == PT_LOAD)
    }

    /// File bytes backing `seg`.
    pub fn segment_data(&self, seg: &Segment) -> Result<&'a [u8]> {
        let start = usize::try_from(seg.offset).ok();
        let len = usize::try_from(seg.filesz).ok();
        start
            .zip(len)
            .and_then(|(start, len)| self.data.get(start..start.checked_add(len)?))
            .ok_or_else(|| anyhow!(BootLoaderError::InvalidElf("segment exceeds file size")))
    }

    /// Placements for every loadable segment, each put at the region offset
    /// returned by `offset_of`. Memory beyond the file bytes is zero filled.
    pub(crate) fn placements<F>(&self, mut offset_of: F) -> Result<Vec<Placement<'a>>>
    where
        F: FnMut(&Segment) -> Result<u64>,
    {
        self.loadable()
            .map(|seg| {
                Ok(Placement {
                    what: "ELF segment",
                    offset: offset_of(seg)?,
                    data: self.segment_data(seg)?,
                    size: seg.memsz,
                })
            })
            .collect()
    }
}

/// Copy every loadable segment of the ELF image `buf` to its physical
/// address inside `region` and return the entry point.
///
/// # Errors
///
/// * `buf` is not a valid ELF image.
/// * A segment starts below the region or ends past it.
/// * The entry point lies outside the region.
pub fn load_elf<R: Region + ?Sized>(region: &mut R, buf: &[u8]) -> Result<PhysAddr> {
    let elf = ElfFile::parse(buf).with_context(|| "Failed to parse ELF image")?;
    let base = region.base().raw_value();

    let placements = elf.placements(|seg| {
        seg.paddr
            .checked_sub(base)
            .ok_or_else(|| anyhow!(BootLoaderError::SegmentBelowRegion(seg.paddr, base)))
    })?;

    let entry = match region.offset_of(PhysAddr(elf.entry())) {
        Ok(offset) if offset < region.size() => PhysAddr(base + offset),
        _ => bail!(BootLoaderError::EntryOutOfRegion(elf.entry())),
    };

    place_all(region, &placements)?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use address_space::HostRegion;

    use super::*;
    use crate::test_helper::ElfBuilder;

    const BASE: u64 = 0x8000_0000;

    #[test]
    fn test_parse_elf64() {
        let image = ElfBuilder::elf64(0x20_0040)
            .segment(0x20_0000, b"text", 0x10)
            .note(b"note")
            .build();
        let elf = ElfFile::parse(&image).unwrap();

        assert_eq!(elf.entry(), 0x20_0040);
        assert_eq!(elf.segments().len(), 2);
        assert_eq!(elf.loadable().count(), 1);
        let seg = elf.loadable().next().unwrap();
        assert_eq!(seg.paddr, 0x20_0000);
        assert_eq!(seg.memsz, 0x10);
        assert_eq!(elf.segment_data(seg).unwrap(), b"text");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ElfFile::parse(b"\x7fEL").is_err());
        assert!(ElfFile::parse(&[0_u8; 64]).is_err());

        let mut image = ElfBuilder::elf32(BASE as u32).segment(BASE, b"abcd", 4).build();
        image[EI_DATA] = 2;
        let err = ElfFile::parse(&image).unwrap_err();
        assert!(err.to_string().contains("big endian"));

        // Program header table cut off.
        let image = ElfBuilder::elf64(0).segment(0, b"abcd", 4).build();
        assert!(ElfFile::parse(&image[..size_of::<Elf64Header>() + 8]).is_err());

        // Segment bytes reach past the end of the file.
        let image = ElfBuilder::elf64(0).segment(0, &[1_u8; 32], 32).build();
        assert!(ElfFile::parse(&image[..image.len() - 1]).is_err());
    }

    #[test]
    fn test_load_two_segments() {
        let image = ElfBuilder::elf32(BASE as u32 + 0x10)
            .segment(BASE, &[0xaa; 0x20], 0x20)
            .segment(BASE + 0x1000, &[0xbb; 0x10], 0x40)
            .build();

        let mut region = HostRegion::new(PhysAddr(BASE), 0x2000).unwrap();
        region.write_bytes(&[0xff; 0x48], 0x1000).unwrap();
        let entry = load_elf(&mut region, &image).unwrap();

        assert_eq!(entry, PhysAddr(BASE + 0x10));
        let mem = region.as_slice();
        assert_eq!(&mem[..0x20], &[0xaa; 0x20]);
        assert_eq!(&mem[0x1000..0x1010], &[0xbb; 0x10]);
        // Zero filled up to the memory size, untouched after.
        assert_eq!(&mem[0x1010..0x1040], &[0_u8; 0x30]);
        assert_eq!(&mem[0x1040..0x1048], &[0xff; 8]);
        assert_eq!(&mem[0x20..0x1000], &vec![0_u8; 0xfe0][..]);
    }

    #[test]
    fn test_load_elf64() {
        let image = ElfBuilder::elf64(BASE + 0x100)
            .segment(BASE + 0x100, b"\x90\x90\xc3", 3)
            .build();
        let mut region = HostRegion::new(PhysAddr(BASE), 0x1000).unwrap();

        assert_eq!(load_elf(&mut region, &image).unwrap(), PhysAddr(BASE + 0x100));
        assert_eq!(&region.as_slice()[0x100..0x103], b"\x90\x90\xc3");
    }

    #[test]
    fn test_load_rejects_segment_outside_region() {
        let image = ElfBuilder::elf32(BASE as u32)
            .segment(BASE, b"good", 4)
            .segment(BASE - 0x1000, b"evil", 4)
            .build();
        let mut region = HostRegion::new(PhysAddr(BASE), 0x2000).unwrap();
        let err = load_elf(&mut region, &image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::SegmentBelowRegion(_, BASE))
        ));
        // Nothing is written when any segment is rejected.
        assert!(region.as_slice().iter().all(|&b| b == 0));

        let image = ElfBuilder::elf32(BASE as u32)
            .segment(BASE + 0x1ff0, b"tail", 0x20)
            .build();
        let err = load_elf(&mut region, &image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::OutOfRegion(_, 0x1ff0, 0x20, 0x2000))
        ));
    }

    #[test]
    fn test_load_rejects_entry_outside_region() {
        let image = ElfBuilder::elf32(0x1000).segment(BASE, b"code", 4).build();
        let mut region = HostRegion::new(PhysAddr(BASE), 0x1000).unwrap();
        let err = load_elf(&mut region, &image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::EntryOutOfRegion(0x1000))
        ));
    }
}
