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

//! Produces signify/minisign keys and signatures the way the reference
//! signers lay them out, for exercising verification in tests.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey};
use sha2::Sha256;

use crate::minisign::{ALG_ED, ALG_ED_PREHASHED, TRUSTED_COMMENT_PREFIX};

pub struct MinisignKey {
    signing: SigningKey,
    key_id: [u8; 8],
}

impl MinisignKey {
    pub fn new(seed: [u8; 32], key_id: [u8; 8]) -> Self {
        MinisignKey {
            signing: SigningKey::from_bytes(&seed),
            key_id,
        }
    }

    /// The base64 last line of the public key file.
    pub fn public_key_line(&self) -> String {
        let mut bin = ALG_ED.to_vec();
        bin.extend_from_slice(&self.key_id);
        bin.extend_from_slice(self.signing.verifying_key().as_bytes());
        STANDARD.encode(bin)
    }

    /// Sign `message`. A `trusted_comment` produces the four line minisign
    /// layout, otherwise the two line signify layout.
    pub fn sign(&self, message: &[u8], prehashed: bool, trusted_comment: Option<&str>) -> String {
        let (algorithm, signature) = if prehashed {
            (
                ALG_ED_PREHASHED,
                self.signing.sign(Blake2b512::digest(message).as_slice()),
            )
        } else {
            (ALG_ED, self.signing.sign(message))
        };
        let sig_bytes = signature.to_bytes();

        let mut bin = algorithm.to_vec();
        bin.extend_from_slice(&self.key_id);
        bin.extend_from_slice(&sig_bytes);
        let mut text = format!(
            "untrusted comment: signature from sealboot test key\n{}\n",
            STANDARD.encode(bin)
        );

        if let Some(comment) = trusted_comment {
            let mut global = sig_bytes.to_vec();
            global.extend_from_slice(comment.as_bytes());
            let global_sig = self.signing.sign(&global);
            text.push_str(&format!(
                "{}{}\n{}\n",
                TRUSTED_COMMENT_PREFIX,
                comment,
                STANDARD.encode(global_sig.to_bytes())
            ));
        }
        text
    }
}

/// Lowercase hex SHA-256 of `data`, as written in configuration files.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
