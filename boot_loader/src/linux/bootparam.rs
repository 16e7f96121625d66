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

use anyhow::{bail, Result};

use crate::error::BootLoaderError;
use util::byte_code::ByteCode;

pub const E820_RAM: u32 = 1;
pub const E820_RESERVED: u32 = 2;
/// Capacity of the zero page memory map.
pub const E820_MAX: usize = 0x80;
pub const BOOT_FLAG: u16 = 0xAA55;
pub const HDRS: u32 = 0x5372_6448;
pub const UNDEFINED_ID: u8 = 0xFF;
/// Oldest boot protocol with `initrd_addr_max` and relocation support.
pub const MIN_PROTOCOL_VERSION: u16 = 0x0205;
/// First boot protocol describing the payload location.
pub const PAYLOAD_PROTOCOL_VERSION: u16 = 0x0208;
/// Offset of the setup header in both the bzImage file and the zero page.
pub const BOOT_HDR_START: u64 = 0x01F1;
pub const ZERO_PAGE_SIZE: usize = 0x1000;
pub const SCREEN_INFO_OFFSET: usize = 0x00;
pub const EFI_INFO_OFFSET: usize = 0x1C0;

pub const EFI64_LOADER_SIGNATURE: [u8; 4] = *b"EL64";
pub const EFI32_LOADER_SIGNATURE: [u8; 4] = *b"EL32";
pub const VIDEO_TYPE_EFI: u8 = 0x70;

// Structures below sourced from:
// https://www.kernel.org/doc/html/latest/x86/boot.html
// https://www.kernel.org/doc/html/latest/x86/zero-page.html
#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct RealModeKernelHeader {
    pub setup_sects: u8,
    pub root_flags: u16,
    syssize: u32,
    ram_size: u16,
    video_mode: u16,
    root_dev: u16,
    pub boot_flag: u16,
    jump: u16,
    pub header: u32,
    pub version: u16,
    realmode_swtch: u32,
    start_sys_seg: u16,
    kernel_version: u16,
    pub type_of_loader: u8,
    pub loadflags: u8,
    setup_move_size: u16,
    pub code32_start: u32,
    ramdisk_image: u32,
    ramdisk_size: u32,
    bootsect_kludge: u32,
    heap_end_ptr: u16,
    ext_loader_ver: u8,
    ext_loader_type: u8,
    cmdline_ptr: u32,
    pub initrd_addr_max: u32,
    pub kernel_alignment: u32,
    pub relocatable_kernel: u8,
    min_alignment: u8,
    xloadflags: u16,
    pub cmdline_size: u32,
    hardware_subarch: u32,
    hardware_subarch_data: u64,
    pub payload_offset: u32,
    pub payload_length: u32,
    setup_data: u64,
    pref_address: u64,
    pub init_size: u32,
    handover_offset: u32,
    kernel_info_offset: u32,
}

impl ByteCode for RealModeKernelHeader {}

impl RealModeKernelHeader {
    pub fn new() -> Self {
        RealModeKernelHeader {
            boot_flag: BOOT_FLAG,
            header: HDRS,
            type_of_loader: UNDEFINED_ID,
            ..Default::default()
        }
    }

    /// Reject images this loader cannot place: anything without a setup
    /// header, boot protocols older than 2.05 and fixed-address kernels.
    pub fn check_valid_kernel(&self) -> Result<()> {
        if self.header != HDRS || self.boot_flag != BOOT_FLAG {
            bail!(BootLoaderError::InvalidBzImage);
        }
        if self.version < MIN_PROTOCOL_VERSION {
            bail!(BootLoaderError::OldVersionKernel(self.version));
        }
        if self.relocatable_kernel == 0 {
            bail!(BootLoaderError::NotRelocatable);
        }
        Ok(())
    }

    /// Size of the real-mode setup code, i.e. the file offset of the
    /// protected-mode kernel.
    pub fn setup_size(&self) -> u64 {
        let setup_sects = match self.setup_sects {
            0 => 4,
            n => u64::from(n),
        };
        (setup_sects + 1) << 9
    }

    pub fn cmdline(&self) -> (u32, u32) {
        (self.cmdline_ptr, self.cmdline_size)
    }

    pub fn set_cmdline(&mut self, cmdline_addr: u32, cmdline_size: u32) {
        self.cmdline_ptr = cmdline_addr;
        self.cmdline_size = cmdline_size;
    }

    pub fn ramdisk(&self) -> (u32, u32) {
        (self.ramdisk_image, self.ramdisk_size)
    }

    pub fn set_ramdisk(&mut self, addr: u32, size: u32) {
        self.ramdisk_image = addr;
        self.ramdisk_size = size;
    }
}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct E820Entry {
    pub addr: u64,
    pub size: u64,
    pub type_: u32,
}

impl E820Entry {
    pub fn new(addr: u64, size: u64, type_: u32) -> E820Entry {
        E820Entry { addr, size, type_ }
    }
}

impl ByteCode for E820Entry {}

/// The `screen_info` block describing the frame buffer left behind by
/// firmware.
#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct ScreenInfo {
    pub orig_x: u8,
    pub orig_y: u8,
    pub ext_mem_k: u16,
    pub orig_video_page: u16,
    pub orig_video_mode: u8,
    pub orig_video_cols: u8,
    pub flags: u8,
    pub unused2: u8,
    pub orig_video_ega_bx: u16,
    pub unused3: u16,
    pub orig_video_lines: u8,
    pub orig_video_is_vga: u8,
    pub orig_video_points: u16,
    pub lfb_width: u16,
    pub lfb_height: u16,
    pub lfb_depth: u16,
    pub lfb_base: u32,
    pub lfb_size: u32,
    pub cl_magic: u16,
    pub cl_offset: u16,
    pub lfb_linelength: u16,
    pub red_size: u8,
    pub red_pos: u8,
    pub green_size: u8,
    pub green_pos: u8,
    pub blue_size: u8,
    pub blue_pos: u8,
    pub rsvd_size: u8,
    pub rsvd_pos: u8,
    pub vesapm_seg: u16,
    pub vesapm_off: u16,
    pub pages: u16,
    pub vesa_attributes: u16,
    pub capabilities: u32,
    pub ext_lfb_base: u32,
    pub reserved: [u8; 2],
}

impl ByteCode for ScreenInfo {}

/// The `efi_info` block handing the EFI system table and memory map over.
#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct EfiInfo {
    pub loader_signature: [u8; 4],
    pub systab: u32,
    pub memdesc_size: u32,
    pub memdesc_version: u32,
    pub memmap: u32,
    pub memmap_size: u32,
    pub systab_hi: u32,
    pub memmap_hi: u32,
}

impl ByteCode for EfiInfo {}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct BootParams {
    pub screen_info: ScreenInfo,
    apm_bios_info: [u8; 0x14],
    pad1: u32,
    tboot_addr: [u8; 0x8],
    ist_info: [u8; 0x10],
    pad2: [u8; 0x10],
    hd0_info: [u8; 0x10],
    hd1_info: [u8; 0x10],
    sys_desc_table: [u8; 0x10],
    olpc_ofw_header: [u8; 0x10],
    ext_ramdisk_image: u32,
    ext_ramdisk_size: u32,
    ext_cmd_line_ptr: u32,
    pad3: [u8; 0x74],
    edid_info: [u8; 0x80],
    pub efi_info: EfiInfo,
    alt_mem_k: u32,
    scratch: u32,
    e820_entries: u8,
    eddbuf_entries: u8,
    edd_mbr_sig_buf_entries: u8,
    kbd_status: u8,
    secure_boot: u8,
    pad4: u16,
    sentinel: u8,
    pad5: u8,
    pub kernel_header: RealModeKernelHeader, // offset: 0x1f1
    pad6: [u8; 0x24],
    edd_mbr_sig_buffer: [u8; 0x40],
    e820_table: [E820Entry; E820_MAX],
    pad8: [u8; 0x30],
    eddbuf: [u8; 0x1ec],
    pad9: [u8; 0x114],
}

impl ByteCode for BootParams {}

impl Default for BootParams {
    fn default() -> Self {
        // SAFETY: every field is plain data for which all zero bits is a
        // valid value.
        unsafe { ::std::mem::zeroed() }
    }
}

impl BootParams {
    pub fn new(kernel_header: RealModeKernelHeader) -> Self {
        BootParams {
            kernel_header,
            ..Default::default()
        }
    }

    pub fn add_e820_entry(&mut self, entry: E820Entry) -> Result<()> {
        let idx = usize::from(self.e820_entries);
        if idx >= E820_MAX {
            bail!(BootLoaderError::E820Overflow(idx + 1, E820_MAX));
        }
        self.e820_table[idx] = entry;
        self.e820_entries += 1;
        Ok(())
    }

    pub fn e820_entries(&self) -> &[E820Entry] {
        &self.e820_table[..usize::from(self.e820_entries)]
    }
}
