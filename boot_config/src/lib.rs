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

//! Authenticated boot configuration.
//!
//! [`minisign`] decodes and checks signify/minisign detached signatures,
//! [`crypto`] wraps them together with artifact hash comparison, and
//! [`config`] loads the JSON descriptor plus every artifact it names.

pub mod config;
pub mod crypto;
pub mod error;
pub mod minisign;
pub mod test_helper;

pub use config::{
    load, Artifacts, BootDescriptor, Config, DtbPolicy, Ext4Source, FileSource, ImageRef,
    DEFAULT_CONFIG_PATH, DEFAULT_SIGNATURE_PATH,
};
pub use crypto::{compare_hash, verify};
pub use error::ConfigError;
