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

//! Builders for the ELF, bzImage and device tree inputs used in tests.

use std::io::Write;
use std::mem::size_of;

use flate2::write::GzEncoder;
use flate2::Compression;

use util::byte_code::ByteCode;
use util::device_tree::{FdtBuilder, FdtReserveEntry};

use crate::elf::{Elf32Header, Elf32ProgHeader, Elf64Header, Elf64ProgHeader, PT_LOAD, PT_NOTE};
use crate::linux::bootparam::{RealModeKernelHeader, BOOT_HDR_START};

struct SegmentSpec {
    p_type: u32,
    paddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

/// Writes a little endian ELF image made of program headers and segment
/// bytes only.
pub struct ElfBuilder {
    class64: bool,
    entry: u64,
    segments: Vec<SegmentSpec>,
}

impl ElfBuilder {
    pub fn elf32(entry: u32) -> Self {
        ElfBuilder {
            class64: false,
            entry: u64::from(entry),
            segments: Vec::new(),
        }
    }

    pub fn elf64(entry: u64) -> Self {
        ElfBuilder {
            class64: true,
            entry,
            segments: Vec::new(),
        }
    }

    /// Add a `PT_LOAD` segment.
    pub fn segment(mut self, paddr: u64, data: &[u8], memsz: u64) -> Self {
        self.segments.push(SegmentSpec {
            p_type: PT_LOAD,
            paddr,
            data: data.to_vec(),
            memsz,
        });
        self
    }

    /// Add a `PT_NOTE` segment, which loaders skip.
    pub fn note(mut self, data: &[u8]) -> Self {
        self.segments.push(SegmentSpec {
            p_type: PT_NOTE,
            paddr: 0,
            data: data.to_vec(),
            memsz: data.len() as u64,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let (ehsize, phentsize) = if self.class64 {
            (size_of::<Elf64Header>(), size_of::<Elf64ProgHeader>())
        } else {
            (size_of::<Elf32Header>(), size_of::<Elf32ProgHeader>())
        };
        let mut ident = [0_u8; 16];
        ident[..4].copy_from_slice(b"\x7fELF");
        ident[4] = if self.class64 { 2 } else { 1 };
        ident[5] = 1;
        ident[6] = 1;

        let phnum = self.segments.len();
        let mut data_offset = (ehsize + phentsize * phnum) as u64;
        let mut image = Vec::new();

        if self.class64 {
            let hdr = Elf64Header {
                e_ident: ident,
                e_type: 2,
                e_machine: 0x3e,
                e_version: 1,
                e_entry: self.entry,
                e_phoff: ehsize as u64,
                e_ehsize: ehsize as u16,
                e_phentsize: phentsize as u16,
                e_phnum: phnum as u16,
                ..Default::default()
            };
            image.extend_from_slice(hdr.as_bytes());
            for seg in &self.segments {
                let ph = Elf64ProgHeader {
                    p_type: seg.p_type,
                    p_flags: 5,
                    p_offset: data_offset,
                    p_vaddr: seg.paddr,
                    p_paddr: seg.paddr,
                    p_filesz: seg.data.len() as u64,
                    p_memsz: seg.memsz,
                    p_align: 0x1000,
                };
                image.extend_from_slice(ph.as_bytes());
                data_offset += seg.data.len() as u64;
            }
        } else {
            let hdr = Elf32Header {
                e_ident: ident,
                e_type: 2,
                e_machine: 0x28,
                e_version: 1,
                e_entry: self.entry as u32,
                e_phoff: ehsize as u32,
                e_ehsize: ehsize as u16,
                e_phentsize: phentsize as u16,
                e_phnum: phnum as u16,
                ..Default::default()
            };
            image.extend_from_slice(hdr.as_bytes());
            for seg in &self.segments {
                let ph = Elf32ProgHeader {
                    p_type: seg.p_type,
                    p_offset: data_offset as u32,
                    p_vaddr: seg.paddr as u32,
                    p_paddr: seg.paddr as u32,
                    p_filesz: seg.data.len() as u32,
                    p_memsz: seg.memsz as u32,
                    p_flags: 5,
                    p_align: 0x1000,
                };
                image.extend_from_slice(ph.as_bytes());
                data_offset += seg.data.len() as u64;
            }
        }

        for seg in &self.segments {
            image.extend_from_slice(&seg.data);
        }
        image
    }
}

/// Gap between the protected-mode kernel start and its payload.
const PAYLOAD_SKEW: usize = 0x100;

/// Writes a bzImage around an ELF (or any other) payload.
pub struct BzImageBuilder {
    payload: Vec<u8>,
    version: u16,
    relocatable: bool,
    cmdline_size: u32,
    initrd_addr_max: u32,
    gzip: bool,
}

impl BzImageBuilder {
    pub fn new(payload: Vec<u8>) -> Self {
        BzImageBuilder {
            payload,
            version: 0x020f,
            relocatable: true,
            cmdline_size: 0x7ff,
            initrd_addr_max: 0x7fff_ffff,
            gzip: false,
        }
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn relocatable(mut self, relocatable: bool) -> Self {
        self.relocatable = relocatable;
        self
    }

    pub fn cmdline_size(mut self, cmdline_size: u32) -> Self {
        self.cmdline_size = cmdline_size;
        self
    }

    pub fn initrd_addr_max(mut self, initrd_addr_max: u32) -> Self {
        self.initrd_addr_max = initrd_addr_max;
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let payload = if self.gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&self.payload).unwrap();
            encoder.finish().unwrap()
        } else {
            self.payload.clone()
        };

        let mut hdr = RealModeKernelHeader::new();
        hdr.setup_sects = 4;
        hdr.version = self.version;
        hdr.loadflags = 1;
        hdr.relocatable_kernel = u8::from(self.relocatable);
        hdr.kernel_alignment = 0x20_0000;
        hdr.cmdline_size = self.cmdline_size;
        hdr.initrd_addr_max = self.initrd_addr_max;
        hdr.payload_offset = PAYLOAD_SKEW as u32;
        hdr.payload_length = payload.len() as u32;

        let setup_size = hdr.setup_size() as usize;
        let mut image = vec![0_u8; setup_size + PAYLOAD_SKEW];
        let hdr_start = BOOT_HDR_START as usize;
        image[hdr_start..hdr_start + size_of::<RealModeKernelHeader>()]
            .copy_from_slice(hdr.as_bytes());
        image.extend_from_slice(&payload);
        // Decompressed size trailer, as appended by the kernel build.
        image.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        image
    }
}

/// A small device tree with a memory reservation and, optionally, a
/// `chosen` node.
pub fn sample_dtb(with_chosen: bool) -> Vec<u8> {
    let mut fdt = FdtBuilder::new();
    fdt.add_mem_reserve(&[FdtReserveEntry::new(0x9ff0_0000, 0x1_0000)])
        .unwrap();
    let root = fdt.begin_node("").unwrap();
    fdt.set_property("#address-cells", &1_u32.to_be_bytes()).unwrap();
    fdt.set_property("#size-cells", &1_u32.to_be_bytes()).unwrap();
    fdt.set_property("model", b"F-Secure USB armory Mk II\0").unwrap();
    if with_chosen {
        let chosen = fdt.begin_node("chosen").unwrap();
        fdt.set_property("stdout-path", b"serial1:115200n8\0")
            .unwrap();
        fdt.end_node(chosen).unwrap();
    }
    let memory = fdt.begin_node("memory").unwrap();
    fdt.set_property("device_type", b"memory\0").unwrap();
    fdt.set_property("reg", &[0x80, 0, 0, 0, 0x20, 0, 0, 0])
        .unwrap();
    fdt.end_node(memory).unwrap();
    fdt.end_node(root).unwrap();
    fdt.finish().unwrap()
}
