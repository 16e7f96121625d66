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

use address_space::{HostRegion, PhysAddr};
use block_backend::test_helper::Ext4ImageBuilder;
use block_backend::MemBlockDevice;
use boot_config::test_helper::{sha256_hex, MinisignKey};
use boot_config::ConfigError;
use boot_loader::test_helper::{sample_dtb, BzImageBuilder, ElfBuilder};
use boot_loader::BootImage;
use sealboot::{prepare, BootMedia, MemoryLayout, PlatformConfig, SealbootError};
use util::device_tree::DeviceTree;

const START: usize = 0x8000;
const BASE: u64 = 0x8000_0000;
const REGION_SIZE: u64 = 0x4_0000;
const CONFIG_PATH: &str = "/boot/sealboot.conf";
const SIGNATURE_PATH: &str = "/boot/sealboot.conf.sig";

fn key() -> MinisignKey {
    MinisignKey::new([0x42; 32], *b"sealboot")
}

fn arm_platform(public_key: &str) -> PlatformConfig {
    let mut platform = PlatformConfig::arm(BootMedia::Sd, START as u64, public_key);
    platform.memory = MemoryLayout {
        ram_start: BASE,
        ram_size: REGION_SIZE,
        kernel_offset: 0x8000,
        params_offset: 0x1000,
        initrd_offset: 0x2_0000,
        cmdline_offset: 0,
    };
    platform
}

fn region() -> HostRegion {
    HostRegion::new(PhysAddr(BASE), REGION_SIZE).unwrap()
}

fn kernel() -> Vec<u8> {
    (0..0x400_u32).map(|i| (i * 7 % 253) as u8).collect()
}

/// A boot partition behind `START` bytes of unrelated data.
fn media(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = Ext4ImageBuilder::new();
    for (path, data) in files {
        builder = builder.file(path, data);
    }
    let mut media = vec![0xa5_u8; START];
    media.extend_from_slice(&builder.build());
    media
}

type Files = Vec<(&'static str, Vec<u8>)>;

fn signed_files(conf: &str, mut files: Files) -> Files {
    let sig = key().sign(conf.as_bytes(), true, Some("timestamp:1700000000"));
    files.push((CONFIG_PATH, conf.as_bytes().to_vec()));
    files.push((SIGNATURE_PATH, sig.into_bytes()));
    files
}

fn linux_media() -> Vec<u8> {
    let dtb = sample_dtb(true);
    let conf = format!(
        "{{\"kernel\":[\"/k\",\"{}\"],\"dtb\":[\"/d\",\"{}\"],\"cmdline\":\"console=ttyS0\"}}",
        sha256_hex(&kernel()),
        sha256_hex(&dtb)
    );
    media(&signed_files(&conf, vec![("/k", kernel()), ("/d", dtb)]))
}

fn assert_untouched(region: &HostRegion) {
    assert!(region.as_slice().iter().all(|&b| b == 0));
}

#[test]
fn test_signed_linux_boot() {
    let platform = arm_platform(&key().public_key_line());
    let mut region = region();

    let image = prepare(&platform, MemBlockDevice::new(linux_media()), &mut region).unwrap();
    assert_eq!(image.entry(), Some(PhysAddr(BASE + 0x8000)));
    let handoff = image.loaded().unwrap();
    assert_eq!(handoff.params, PhysAddr(BASE + 0x1000));
    drop(image);

    let mem = region.as_slice();
    assert_eq!(&mem[0x8000..0x8400], kernel().as_slice());
    let tree = DeviceTree::from_blob(&mem[0x1000..]).unwrap();
    let chosen = tree.root.child("chosen").unwrap();
    assert_eq!(chosen.property("bootargs").unwrap(), b"console=ttyS0\0");
}

#[test]
fn test_tampered_kernel_aborts_before_write() {
    let mut media = linux_media();
    let kernel = kernel();
    let pos = media
        .windows(kernel.len())
        .position(|w| w == kernel.as_slice())
        .unwrap();
    media[pos + 0x10] ^= 0xff;

    let platform = arm_platform(&key().public_key_line());
    let mut region = region();
    let err = prepare(&platform, MemBlockDevice::new(media), &mut region)
        .err()
        .unwrap();

    assert!(matches!(
        err.downcast_ref::<SealbootError>(),
        Some(SealbootError::Config)
    ));
    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<ConfigError>(),
        Some(ConfigError::Hash("kernel"))
    )));
    assert_untouched(&region);
}

#[test]
fn test_foreign_signature_aborts() {
    let platform = arm_platform(&MinisignKey::new([0x24; 32], *b"stranger").public_key_line());
    let mut region = region();
    let err = prepare(&platform, MemBlockDevice::new(linux_media()), &mut region)
        .err()
        .unwrap();

    assert!(matches!(
        err.downcast_ref::<SealbootError>(),
        Some(SealbootError::Config)
    ));
    assert_untouched(&region);
}

#[test]
fn test_unsigned_boot_without_key() {
    let conf = "{\"kernel\":[\"/k\",\"00\"],\"dtb\":[\"/d\",\"00\"],\"cmdline\":\"quiet\"}";
    let files = vec![
        ("/k", kernel()),
        ("/d", sample_dtb(false)),
        (CONFIG_PATH, conf.as_bytes().to_vec()),
    ];
    let mut region = region();

    let device = MemBlockDevice::new(media(&files));
    let image = prepare(&arm_platform(""), device, &mut region).unwrap();
    assert_eq!(image.entry(), Some(PhysAddr(BASE + 0x8000)));
    drop(image);

    let tree = DeviceTree::from_blob(&region.as_slice()[0x1000..]).unwrap();
    let chosen = tree.root.child("chosen").unwrap();
    assert_eq!(chosen.property("bootargs").unwrap(), b"quiet\0");
}

#[test]
fn test_elf_unikernel_boot() {
    let unikernel = ElfBuilder::elf32(BASE as u32 + 0x1_0000)
        .segment(BASE + 0x1_0000, &[0x5a; 0x200], 0x400)
        .build();
    let conf = format!("{{\"unikernel\":[\"/u\",\"{}\"]}}", sha256_hex(&unikernel));
    let media = media(&signed_files(&conf, vec![("/u", unikernel)]));

    let platform = arm_platform(&key().public_key_line());
    let mut region = region();
    let image = prepare(&platform, MemBlockDevice::new(media), &mut region).unwrap();
    assert_eq!(image.entry(), Some(PhysAddr(BASE + 0x1_0000)));
    drop(image);

    let mem = region.as_slice();
    assert_eq!(&mem[0x1_0000..0x1_0200], &[0x5a; 0x200]);
    assert!(mem[0x1_0200..0x1_0400].iter().all(|&b| b == 0));
}

#[test]
fn test_zero_page_boot_without_dtb() {
    let vmlinux = ElfBuilder::elf64(0x1000)
        .segment(0x1000, &[0xcc; 0x40], 0x80)
        .build();
    let bzimage = BzImageBuilder::new(vmlinux).gzip(true).build();
    let initrd = vec![0x77_u8; 0x100];
    let conf = format!(
        "{{\"kernel\":[\"/bz\",\"{}\"],\"initrd\":[\"/i\",\"{}\"],\"cmdline\":\"console=ttyS0\"}}",
        sha256_hex(&bzimage),
        sha256_hex(&initrd)
    );
    let media = media(&signed_files(&conf, vec![("/bz", bzimage), ("/i", initrd)]));

    let base = 0x100_0000;
    let public_key = key().public_key_line();
    let mut platform = PlatformConfig::x86_64(BootMedia::Emmc, START as u64, &public_key);
    platform.memory = MemoryLayout {
        ram_start: base,
        ram_size: REGION_SIZE,
        kernel_offset: 0x1_0000,
        params_offset: 0x1000,
        initrd_offset: 0x3_0000,
        cmdline_offset: 0x2000,
    };
    let mut region = HostRegion::new(PhysAddr(base), REGION_SIZE).unwrap();

    let image = prepare(&platform, MemBlockDevice::new(media), &mut region).unwrap();
    assert_eq!(image.entry(), Some(PhysAddr(base + 0x1_1000)));
    assert_eq!(image.loaded().unwrap().params, PhysAddr(base + 0x1000));
    drop(image);

    let mem = region.as_slice();
    assert_eq!(&mem[0x1_1000..0x1_1040], &[0xcc; 0x40]);
    assert_eq!(&mem[0x2000..0x200e], b"console=ttyS0\0");
    assert_eq!(&mem[0x3_0000..0x3_0100], &[0x77; 0x100]);
}

#[test]
fn test_missing_dtb_rejected_on_arm() {
    let conf = format!("{{\"kernel\":[\"/k\",\"{}\"]}}", sha256_hex(&kernel()));
    let media = media(&signed_files(&conf, vec![("/k", kernel())]));

    let mut region = region();
    let err = prepare(
        &arm_platform(&key().public_key_line()),
        MemBlockDevice::new(media),
        &mut region,
    )
    .err()
    .unwrap();
    assert!(err.chain().any(|e| matches!(
        e.downcast_ref::<ConfigError>(),
        Some(ConfigError::ParameterSize("dtb"))
    )));
    assert_untouched(&region);
}

#[test]
fn test_bad_start_offset() {
    let mut platform = arm_platform("");
    platform.start = 0x10_0000_0000;
    let err = prepare(&platform, MemBlockDevice::new(linux_media()), region())
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<SealbootError>(),
        Some(SealbootError::Media)
    ));
}
