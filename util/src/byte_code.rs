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

use std::mem::size_of;
use std::slice::{from_raw_parts, from_raw_parts_mut};

/// A trait bound defined for plain-data types (on-disk and in-memory boot
/// structures) which are safe to view as bytes and to build from bytes.
///
/// Implementors must be `#[repr(C)]` or `#[repr(C, packed)]` and must be valid
/// for every bit pattern.
pub trait ByteCode: Default + Copy + Send + Sync {
    /// Return the contents of an object (impl trait `ByteCode`) as a slice of bytes.
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: The object is guaranteed been initialized already.
        unsafe { from_raw_parts(self as *const Self as *const u8, size_of::<Self>()) }
    }

    /// Return the contents of a mutable object (impl trait `ByteCode`) to a mutable slice of bytes.
    fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: The object is guaranteed been initialized already.
        unsafe { from_raw_parts_mut(self as *mut Self as *mut u8, size_of::<Self>()) }
    }

    /// Copy an object out of the head of `data`.
    ///
    /// Unlike a borrowed view this works for any alignment of `data`, which is
    /// what parsing untrusted images needs. Returns `None` if `data` is
    /// shorter than the object.
    fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() < size_of::<Self>() {
            return None;
        }

        let mut obj = Self::default();
        obj.as_mut_bytes()
            .copy_from_slice(&data[..size_of::<Self>()]);
        Some(obj)
    }

    /// Copy an object out of `data` starting at byte `offset`.
    fn read_at(data: &[u8], offset: u64) -> Option<Self> {
        let start = usize::try_from(offset).ok()?;
        Self::from_slice(data.get(start..)?)
    }
}

// Integer types of Rust satisfy the requirements of `trait ByteCode`
impl ByteCode for u8 {}
impl ByteCode for u16 {}
impl ByteCode for u32 {}
impl ByteCode for u64 {}

#[cfg(test)]
mod test {
    use super::*;

    #[repr(C, packed)]
    #[derive(Copy, Clone, Default)]
    struct TestHeader {
        magic: [u8; 4],
        version: u16,
        flags: u8,
    }

    impl ByteCode for TestHeader {}

    #[test]
    fn test_bytecode_plain_data() {
        let num1: u32 = 0x1234_5678;
        assert_eq!(num1.as_bytes().to_vec(), vec![0x78, 0x56, 0x34, 0x12]);

        let bytes = [0x34_u8, 0x56, 0x12, 0x05, 0xff];
        assert_eq!(u32::from_slice(&bytes).unwrap(), 0x0512_5634);

        // Short input cannot hold the object.
        let miss_bytes = [0x0_u8, 0x0, 0x12];
        assert!(u32::from_slice(&miss_bytes).is_none());
    }

    #[test]
    fn test_bytecode_unaligned_read() {
        let mut raw = vec![0xaa_u8];
        raw.extend_from_slice(b"HdrS");
        raw.extend_from_slice(&[0x05, 0x02, 0x01]);

        let hdr = TestHeader::read_at(&raw, 1).unwrap();
        assert_eq!(hdr.magic, *b"HdrS");
        let version = hdr.version;
        assert_eq!(version, 0x0205);
        assert_eq!(hdr.flags, 1);

        assert!(TestHeader::read_at(&raw, 2).is_none());
        assert!(TestHeader::read_at(&raw, u64::MAX).is_none());
    }

    #[test]
    fn test_byte_code_mut() {
        let mut hdr = TestHeader::default();
        hdr.as_mut_bytes()[4] = 0x99;
        let version = hdr.version;
        assert_eq!(version, 0x0099);
        assert_eq!(hdr.as_bytes().len(), 7);
    }
}
