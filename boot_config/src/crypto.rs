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

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::minisign::{PublicKey, Signature};
use crate::ConfigError;

/// Authenticate `buf` against a signify/minisign signature file.
///
/// `pub_key` is the last line of the public key file, without comments.
pub fn verify(buf: &[u8], sig: &[u8], pub_key: &str) -> Result<()> {
    let text = std::str::from_utf8(sig)
        .map_err(|_| anyhow!(ConfigError::Signature("not valid utf-8".to_string())))?;
    let signature = Signature::decode(text)?;
    let key = PublicKey::decode(pub_key)?;
    key.verify(buf, &signature)
}

/// Compare the SHA-256 of `buf` with `expected`, a hex string.
///
/// Malformed hex never matches.
pub fn compare_hash(buf: &[u8], expected: &str) -> bool {
    let sum = Sha256::digest(buf);
    match hex::decode(expected) {
        Ok(hash) => bool::from(sum.as_slice().ct_eq(&hash)),
        Err(_) => false,
    }
}
