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

//! signify / minisign detached signatures.
//!
//! Both tools share the key and signature layout; minisign adds an optional
//! trusted comment covered by a second, global signature.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};

use crate::ConfigError;

pub const ALG_ED: [u8; 2] = *b"Ed";
pub const ALG_ED_PREHASHED: [u8; 2] = *b"ED";
pub const TRUSTED_COMMENT_PREFIX: &str = "trusted comment: ";

const PUBLIC_KEY_LEN: usize = 42;
const SIGNATURE_LEN: usize = 74;
const GLOBAL_SIGNATURE_LEN: usize = 64;

fn decode_line(line: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(line.trim_end_matches(|c| c == '\r' || c == '\n'))
        .ok()
}

fn bad_signature(reason: &str) -> anyhow::Error {
    anyhow!(ConfigError::Signature(reason.to_string()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: [u8; 2],
    pub key_id: [u8; 8],
    pub key: [u8; 32],
}

impl PublicKey {
    /// Decode the base64 last line of a signify/minisign public key.
    pub fn decode(encoded: &str) -> Result<PublicKey> {
        let bin = decode_line(encoded.trim())
            .filter(|bin| bin.len() == PUBLIC_KEY_LEN)
            .ok_or_else(|| anyhow!(ConfigError::PublicKey("invalid encoded public key".to_string())))?;

        let mut key = PublicKey {
            algorithm: [0; 2],
            key_id: [0; 8],
            key: [0; 32],
        };
        key.algorithm.copy_from_slice(&bin[0..2]);
        key.key_id.copy_from_slice(&bin[2..10]);
        key.key.copy_from_slice(&bin[10..42]);
        Ok(key)
    }

    /// Check `signature` over `message`.
    ///
    /// The key id must match, the signature must verify over the message
    /// (or its BLAKE2b-512 digest for prehashed signatures), and a trusted
    /// comment, when present, must verify under the global signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        if self.algorithm != ALG_ED {
            return Err(bad_signature("incompatible signature algorithm"));
        }
        let prehashed = match signature.algorithm {
            ALG_ED => false,
            ALG_ED_PREHASHED => true,
            _ => return Err(bad_signature("unsupported signature algorithm")),
        };
        if self.key_id != signature.key_id {
            return Err(bad_signature("incompatible key identifiers"));
        }

        let vk = VerifyingKey::from_bytes(&self.key)
            .map_err(|_| anyhow!(ConfigError::PublicKey("not an ed25519 point".to_string())))?;

        let sig = Ed25519Signature::from_bytes(&signature.signature);
        let verified = if prehashed {
            vk.verify(Blake2b512::digest(message).as_slice(), &sig)
        } else {
            vk.verify(message, &sig)
        };
        verified.map_err(|_| bad_signature("invalid signature"))?;

        if !signature.trusted_comment.is_empty() {
            let comment = signature
                .trusted_comment
                .strip_prefix(TRUSTED_COMMENT_PREFIX)
                .ok_or_else(|| bad_signature("unexpected format for the trusted comment"))?;
            let mut global = signature.signature.to_vec();
            global.extend_from_slice(comment.as_bytes());
            vk.verify(
                &global,
                &Ed25519Signature::from_bytes(&signature.global_signature),
            )
            .map_err(|_| bad_signature("invalid global signature"))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Signature {
    pub untrusted_comment: String,
    pub algorithm: [u8; 2],
    pub key_id: [u8; 8],
    pub signature: [u8; 64],
    pub trusted_comment: String,
    pub global_signature: [u8; 64],
}

impl Signature {
    /// Decode a detached signature file.
    ///
    /// Line 1 is the untrusted comment and line 2 the signature. minisign
    /// files carry a trusted comment and its global signature on lines 3
    /// and 4.
    pub fn decode(text: &str) -> Result<Signature> {
        let lines: Vec<&str> = text.splitn(4, '\n').collect();
        if lines.len() < 2 {
            return Err(bad_signature("incomplete encoded signature"));
        }

        let bin = decode_line(lines[1])
            .filter(|bin| bin.len() == SIGNATURE_LEN)
            .ok_or_else(|| bad_signature("invalid encoded signature"))?;

        let mut sig = Signature {
            untrusted_comment: lines[0].trim_end_matches('\r').to_string(),
            algorithm: [0; 2],
            key_id: [0; 8],
            signature: [0; 64],
            trusted_comment: String::new(),
            global_signature: [0; 64],
        };
        sig.algorithm.copy_from_slice(&bin[0..2]);
        sig.key_id.copy_from_slice(&bin[2..10]);
        sig.signature.copy_from_slice(&bin[10..74]);

        if lines.len() == 4 {
            sig.trusted_comment = lines[2].trim_end_matches('\r').to_string();
            let global = decode_line(lines[3])
                .filter(|bin| bin.len() == GLOBAL_SIGNATURE_LEN)
                .ok_or_else(|| bad_signature("invalid encoded global signature"))?;
            sig.global_signature.copy_from_slice(&global);
        }
        Ok(sig)
    }
}
