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

pub mod byte_code;
pub mod device_tree;
pub mod error;
pub mod logger;
pub mod num_ops;

pub use anyhow::Result;

pub use error::UtilError;

/// Read the program version in `Cargo.toml` and concat with git commit id.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " commit-id ",
    include_str!(concat!(env!("OUT_DIR"), "/GIT_COMMIT"))
);
