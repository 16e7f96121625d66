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

use std::io::{Read, Seek};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use zeroize::Zeroize;

use block_backend::{ext4, BlockDevice, Partition};

use crate::crypto::{compare_hash, verify};
use crate::ConfigError;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/boot/sealboot.conf";
/// Default configuration file signature path.
pub const DEFAULT_SIGNATURE_PATH: &str = "/boot/sealboot.conf.sig";

/// Where configuration and artifacts are read from.
pub trait FileSource {
    fn read_all(&mut self, path: &str) -> Result<Vec<u8>>;
}

impl<D: BlockDevice> FileSource for Partition<D> {
    fn read_all(&mut self, path: &str) -> Result<Vec<u8>> {
        Partition::read_all(self, path)
    }
}

/// An ext4 image behind any seekable reader.
pub struct Ext4Source<R: Read + Seek>(pub R);

impl<R: Read + Seek> FileSource for Ext4Source<R> {
    fn read_all(&mut self, path: &str) -> Result<Vec<u8>> {
        ext4::read_all(&mut self.0, path)
    }
}

/// Whether a Linux kernel must come with a device tree blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DtbPolicy {
    Required,
    Optional,
}

#[derive(Deserialize, Default)]
struct RawDescriptor {
    #[serde(default)]
    kernel: Option<Vec<String>>,
    #[serde(default)]
    dtb: Option<Vec<String>>,
    #[serde(default)]
    initrd: Option<Vec<String>>,
    #[serde(default)]
    unikernel: Option<Vec<String>>,
    #[serde(default)]
    cmdline: Option<String>,
}

/// A file reference with its expected SHA-256.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub path: String,
    pub hash: String,
}

impl ImageRef {
    fn from_pair(pair: &[String], name: &'static str) -> Result<ImageRef> {
        match pair {
            [path, hash] => Ok(ImageRef {
                path: path.clone(),
                hash: hash.clone(),
            }),
            _ => Err(anyhow!(ConfigError::ParameterSize(name))),
        }
    }
}

/// Validated contents of a configuration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootDescriptor {
    /// Linux kernel or ELF unikernel.
    pub kernel: ImageRef,
    pub dtb: Option<ImageRef>,
    pub initrd: Option<ImageRef>,
    pub cmdline: String,
    /// The kernel is an ELF unikernel.
    pub elf: bool,
}

fn non_empty(field: Option<Vec<String>>) -> Option<Vec<String>> {
    field.filter(|v| !v.is_empty())
}

impl BootDescriptor {
    pub fn parse(json: &[u8], dtb_policy: DtbPolicy) -> Result<BootDescriptor> {
        let raw: RawDescriptor = serde_json::from_slice(json)
            .map_err(|e| anyhow!(ConfigError::Parse(e.to_string())))?;
        let kernel = non_empty(raw.kernel);
        let unikernel = non_empty(raw.unikernel);
        let dtb = non_empty(raw.dtb);
        let initrd = non_empty(raw.initrd);
        let cmdline = raw.cmdline.unwrap_or_default();

        match (kernel, unikernel) {
            (Some(kernel), None) => {
                let kernel = ImageRef::from_pair(&kernel, "kernel")?;
                let dtb = match (dtb, dtb_policy) {
                    (Some(dtb), _) => Some(ImageRef::from_pair(&dtb, "dtb")?),
                    (None, DtbPolicy::Required) => {
                        return Err(anyhow!(ConfigError::ParameterSize("dtb")))
                    }
                    (None, DtbPolicy::Optional) => None,
                };
                let initrd = initrd
                    .map(|pair| ImageRef::from_pair(&pair, "initrd"))
                    .transpose()?;
                Ok(BootDescriptor {
                    kernel,
                    dtb,
                    initrd,
                    cmdline,
                    elf: false,
                })
            }
            (None, Some(unikernel)) => Ok(BootDescriptor {
                kernel: ImageRef::from_pair(&unikernel, "unikernel")?,
                dtb: None,
                initrd: None,
                cmdline,
                elf: true,
            }),
            _ => Err(anyhow!(ConfigError::Exclusivity)),
        }
    }
}

/// Verified artifact bytes.
#[derive(Default)]
pub struct Artifacts {
    pub kernel: Vec<u8>,
    pub dtb: Option<Vec<u8>>,
    pub initrd: Option<Vec<u8>>,
}

impl Zeroize for Artifacts {
    fn zeroize(&mut self) {
        self.kernel.zeroize();
        if let Some(dtb) = self.dtb.as_mut() {
            dtb.zeroize();
        }
        if let Some(initrd) = self.initrd.as_mut() {
            initrd.zeroize();
        }
        self.dtb = None;
        self.initrd = None;
    }
}

impl Artifacts {
    fn fetch<S: FileSource + ?Sized>(&mut self, source: &mut S, desc: &BootDescriptor) -> Result<()> {
        let read = |source: &mut S, image: &ImageRef| {
            source
                .read_all(&image.path)
                .with_context(|| ConfigError::InvalidPath(image.path.clone()))
        };

        self.kernel = read(source, &desc.kernel)?;
        if let Some(dtb) = &desc.dtb {
            self.dtb = Some(read(source, dtb)?);
        }
        if let Some(initrd) = &desc.initrd {
            self.initrd = Some(read(source, initrd)?);
        }
        Ok(())
    }

    fn check(&self, desc: &BootDescriptor) -> Result<()> {
        let kernel_name = if desc.elf { "unikernel" } else { "kernel" };
        let checks = [
            (Some(&self.kernel), Some(&desc.kernel), kernel_name),
            (self.dtb.as_ref(), desc.dtb.as_ref(), "dtb"),
            (self.initrd.as_ref(), desc.initrd.as_ref(), "initrd"),
        ];
        for (data, image, name) in checks {
            if let (Some(data), Some(image)) = (data, image) {
                if !compare_hash(data, &image.hash) {
                    return Err(anyhow!(ConfigError::Hash(name)));
                }
            }
        }
        Ok(())
    }
}

/// A loaded configuration together with its verified artifacts.
pub struct Config {
    json: Vec<u8>,
    descriptor: BootDescriptor,
    artifacts: Artifacts,
}

impl Config {
    /// The configuration file as read from disk.
    pub fn json(&self) -> &[u8] {
        &self.json
    }

    pub fn descriptor(&self) -> &BootDescriptor {
        &self.descriptor
    }

    pub fn kernel(&self) -> &[u8] {
        &self.artifacts.kernel
    }

    pub fn dtb(&self) -> Option<&[u8]> {
        self.artifacts.dtb.as_deref()
    }

    pub fn initrd(&self) -> Option<&[u8]> {
        self.artifacts.initrd.as_deref()
    }

    pub fn cmdline(&self) -> &str {
        &self.descriptor.cmdline
    }

    pub fn is_elf(&self) -> bool {
        self.descriptor.elf
    }

    pub fn into_artifacts(self) -> (BootDescriptor, Artifacts) {
        (self.descriptor, self.artifacts)
    }
}

/// Load and authenticate the configuration at `config_path`.
///
/// With a non-empty `pub_key` the file must carry a valid signature at
/// `sig_path` and every artifact must match its declared hash. An empty key
/// skips both checks.
pub fn load<S: FileSource + ?Sized>(
    source: &mut S,
    config_path: &str,
    sig_path: &str,
    pub_key: &str,
    dtb_policy: DtbPolicy,
) -> Result<Config> {
    info!("loading configuration at {}", config_path);

    let json = source
        .read_all(config_path)
        .with_context(|| ConfigError::InvalidPath(config_path.to_string()))?;

    let authenticated = !pub_key.is_empty();
    if authenticated {
        let sig = source
            .read_all(sig_path)
            .with_context(|| ConfigError::SignaturePath(sig_path.to_string()))?;
        verify(&json, &sig, pub_key)?;
    } else {
        warn!("no public key, skipping signature verification");
    }
    debug!("configuration: {}", String::from_utf8_lossy(&json));

    let descriptor = BootDescriptor::parse(&json, dtb_policy)?;

    let mut artifacts = Artifacts::default();
    let result = artifacts.fetch(source, &descriptor).and_then(|()| {
        if authenticated {
            artifacts.check(&descriptor)
        } else {
            Ok(())
        }
    });
    if let Err(e) = result {
        artifacts.zeroize();
        return Err(e);
    }

    Ok(Config {
        json,
        descriptor,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::test_helper::{sha256_hex, MinisignKey};

    #[derive(Default)]
    struct MapSource {
        files: HashMap<String, Vec<u8>>,
        reads: Vec<String>,
    }

    impl MapSource {
        fn with(mut self, path: &str, data: &[u8]) -> Self {
            self.files.insert(path.to_string(), data.to_vec());
            self
        }
    }

    impl FileSource for MapSource {
        fn read_all(&mut self, path: &str) -> Result<Vec<u8>> {
            self.reads.push(path.to_string());
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow!("{} not found", path))
        }
    }

    fn config_error(err: &anyhow::Error) -> Option<&ConfigError> {
        err.downcast_ref::<ConfigError>()
    }

    fn key() -> MinisignKey {
        MinisignKey::new([9; 32], *b"board-01")
    }

    fn linux_source(kernel: &[u8], dtb: &[u8], sign: bool) -> (MapSource, String) {
        let conf = format!(
            r#"{{"kernel":["/boot/zImage","{}"],"dtb":["/boot/board.dtb","{}"],"cmdline":"console=ttymxc1,115200"}}"#,
            sha256_hex(kernel),
            sha256_hex(dtb)
        );
        let key = key();
        let mut source = MapSource::default()
            .with(DEFAULT_CONFIG_PATH, conf.as_bytes())
            .with("/boot/zImage", kernel)
            .with("/boot/board.dtb", dtb);
        if sign {
            source = source.with(
                DEFAULT_SIGNATURE_PATH,
                key.sign(conf.as_bytes(), true, Some("release")).as_bytes(),
            );
        }
        (source, key.public_key_line())
    }

    #[test]
    fn test_parse_exclusivity() {
        for json in [
            r#"{"kernel":["/k","00"],"dtb":["/d","00"],"unikernel":["/u","00"]}"#,
            r#"{"cmdline":"quiet"}"#,
            r#"{"kernel":[],"unikernel":[]}"#,
        ] {
            let err = BootDescriptor::parse(json.as_bytes(), DtbPolicy::Required).unwrap_err();
            assert!(matches!(config_error(&err), Some(ConfigError::Exclusivity)));
            assert_eq!(err.to_string(), "must specify either unikernel or kernel");
        }
    }

    #[test]
    fn test_parse_parameter_sizes() {
        let cases = [
            (r#"{"kernel":["/k"],"dtb":["/d","00"]}"#, "kernel"),
            (r#"{"kernel":["/k","00","x"],"dtb":["/d","00"]}"#, "kernel"),
            (r#"{"kernel":["/k","00"]}"#, "dtb"),
            (r#"{"kernel":["/k","00"],"dtb":["/d"]}"#, "dtb"),
            (r#"{"kernel":["/k","00"],"dtb":["/d","00"],"initrd":["/i"]}"#, "initrd"),
            (r#"{"unikernel":["/u"]}"#, "unikernel"),
        ];
        for (json, field) in cases {
            let err = BootDescriptor::parse(json.as_bytes(), DtbPolicy::Required).unwrap_err();
            assert!(
                matches!(config_error(&err), Some(ConfigError::ParameterSize(f)) if *f == field),
                "{}",
                json
            );
        }
    }

    #[test]
    fn test_parse_descriptors() {
        let desc = BootDescriptor::parse(
            br#"{"unikernel":["/boot/app.elf","ab"],"cmdline":"ignored"}"#,
            DtbPolicy::Required,
        )
        .unwrap();
        assert!(desc.elf);
        assert_eq!(desc.kernel.path, "/boot/app.elf");
        assert!(desc.dtb.is_none());

        let desc = BootDescriptor::parse(
            br#"{"kernel":["/bzImage","cd"],"initrd":["/initrd","ef"],"dtb":null}"#,
            DtbPolicy::Optional,
        )
        .unwrap();
        assert!(!desc.elf);
        assert!(desc.dtb.is_none());
        assert_eq!(
            desc.initrd,
            Some(ImageRef {
                path: "/initrd".to_string(),
                hash: "ef".to_string()
            })
        );
        assert_eq!(desc.cmdline, "");

        let err = BootDescriptor::parse(b"{not json", DtbPolicy::Optional).unwrap_err();
        assert!(matches!(config_error(&err), Some(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_signed() {
        let (mut source, pub_key) = linux_source(b"kernel", b"dtb", true);
        let config = load(
            &mut source,
            DEFAULT_CONFIG_PATH,
            DEFAULT_SIGNATURE_PATH,
            &pub_key,
            DtbPolicy::Required,
        )
        .unwrap();

        assert_eq!(config.kernel(), b"kernel");
        assert_eq!(config.dtb(), Some(&b"dtb"[..]));
        assert_eq!(config.initrd(), None);
        assert_eq!(config.cmdline(), "console=ttymxc1,115200");
        assert!(!config.is_elf());
    }

    #[test]
    fn test_load_bad_signature_reads_no_artifacts() {
        let (source, pub_key) = linux_source(b"kernel", b"dtb", false);
        let mut source = source.with(DEFAULT_SIGNATURE_PATH, key().sign(b"other", false, None).as_bytes());

        let err = load(
            &mut source,
            DEFAULT_CONFIG_PATH,
            DEFAULT_SIGNATURE_PATH,
            &pub_key,
            DtbPolicy::Required,
        )
        .err()
        .unwrap();
        assert!(matches!(config_error(&err), Some(ConfigError::Signature(_))));
        assert_eq!(source.reads, vec![DEFAULT_CONFIG_PATH, DEFAULT_SIGNATURE_PATH]);
    }

    #[test]
    fn test_load_missing_signature() {
        let (mut source, pub_key) = linux_source(b"kernel", b"dtb", false);
        let err = load(
            &mut source,
            DEFAULT_CONFIG_PATH,
            DEFAULT_SIGNATURE_PATH,
            &pub_key,
            DtbPolicy::Required,
        )
        .err()
        .unwrap();
        assert!(matches!(
            config_error(&err),
            Some(ConfigError::SignaturePath(_))
        ));
    }

    #[test]
    fn test_load_hash_mismatch() {
        let (source, pub_key) = linux_source(b"kernel", b"dtb", true);
        let mut source = source.with("/boot/board.dtb", b"evil dtb");

        let err = load(
            &mut source,
            DEFAULT_CONFIG_PATH,
            DEFAULT_SIGNATURE_PATH,
            &pub_key,
            DtbPolicy::Required,
        )
        .err()
        .unwrap();
        assert!(matches!(config_error(&err), Some(ConfigError::Hash("dtb"))));
        assert_eq!(err.to_string(), "invalid dtb hash");
    }

    #[test]
    fn test_load_without_key_skips_checks() {
        let (source, _) = linux_source(b"kernel", b"dtb", false);
        let mut source = source.with("/boot/zImage", b"unverified kernel");

        let config = load(
            &mut source,
            DEFAULT_CONFIG_PATH,
            DEFAULT_SIGNATURE_PATH,
            "",
            DtbPolicy::Required,
        )
        .unwrap();
        assert_eq!(config.kernel(), b"unverified kernel");
        assert!(!source.reads.contains(&DEFAULT_SIGNATURE_PATH.to_string()));
    }

    #[test]
    fn test_load_missing_artifact() {
        let (source, _) = linux_source(b"kernel", b"dtb", false);
        let mut source = MapSource {
            files: source
                .files
                .into_iter()
                .filter(|(path, _)| path != "/boot/board.dtb")
                .collect(),
            reads: Vec::new(),
        };
        let err = load(
            &mut source,
            DEFAULT_CONFIG_PATH,
            DEFAULT_SIGNATURE_PATH,
            "",
            DtbPolicy::Required,
        )
        .err()
        .unwrap();
        assert!(matches!(
            config_error(&err),
            Some(ConfigError::InvalidPath(p)) if p == "/boot/board.dtb"
        ));
    }

    #[test]
    fn test_artifacts_zeroize() {
        let mut artifacts = Artifacts {
            kernel: vec![1; 16],
            dtb: Some(vec![2; 16]),
            initrd: None,
        };
        artifacts.zeroize();
        assert!(artifacts.kernel.is_empty());
        assert!(artifacts.dtb.is_none());
    }
}
