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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid public key, {0}")]
    PublicKey(String),
    #[error("invalid signature, {0}")]
    Signature(String),
    #[error("invalid signature path {0}")]
    SignaturePath(String),
    #[error("invalid configuration, {0}")]
    Parse(String),
    #[error("must specify either unikernel or kernel")]
    Exclusivity,
    #[error("invalid {0} parameter size")]
    ParameterSize(&'static str),
    #[error("invalid path {0}")]
    InvalidPath(String),
    #[error("invalid {0} hash")]
    Hash(&'static str),
}
