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

// This module implements some operations of Rust primitive types.

/// Join the split `lo`/`hi` halves many on-disk formats use for 64-bit fields.
///
/// # Examples
///
/// ```rust
/// extern crate util;
/// use util::num_ops::combine_u64;
///
/// assert_eq!(combine_u64(0x1000, 0x2), 0x2_0000_1000);
/// ```
pub fn combine_u64(lo: u32, hi: u32) -> u64 {
    (u64::from(hi) << 32) | u64::from(lo)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn combine_u64_test() {
        assert_eq!(combine_u64(0xffff_ffff, 0), 0xffff_ffff);
        assert_eq!(combine_u64(0, 1), 0x1_0000_0000);
    }
}
