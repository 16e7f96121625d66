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

//! The read path of the ext4 filesystem.
//!
//! Only what is needed to pull a file out of a boot partition is implemented:
//! superblock and group descriptor parsing, inode lookup, extent trees,
//! inline data and linear directory scans. Nothing is cached, every lookup
//! starts again from the superblock.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use util::num_ops::combine_u64;

use crate::DiskError;

pub const SUPERBLOCK_OFFSET: u64 = 1024;
const SUPERBLOCK_SIZE: usize = 1024;
pub const EXT4_MAGIC: u16 = 0xEF53;
pub const ROOT_INODE: u32 = 2;

const GOOD_OLD_REV: u32 = 0;
const GOOD_OLD_INODE_SIZE: u16 = 128;
// 64 KiB blocks.
const MAX_LOG_BLOCK_SIZE: u32 = 6;

pub const INCOMPAT_FILETYPE: u32 = 0x2;
pub const INCOMPAT_RECOVER: u32 = 0x4;
pub const INCOMPAT_EXTENTS: u32 = 0x40;
pub const INCOMPAT_64BIT: u32 = 0x80;
pub const INCOMPAT_MMP: u32 = 0x100;
pub const INCOMPAT_FLEX_BG: u32 = 0x200;
pub const INCOMPAT_CSUM_SEED: u32 = 0x2000;
pub const INCOMPAT_LARGEDIR: u32 = 0x4000;
pub const INCOMPAT_INLINE_DATA: u32 = 0x8000;
const INCOMPAT_SUPPORTED: u32 = INCOMPAT_FILETYPE
    | INCOMPAT_RECOVER
    | INCOMPAT_EXTENTS
    | INCOMPAT_64BIT
    | INCOMPAT_MMP
    | INCOMPAT_FLEX_BG
    | INCOMPAT_CSUM_SEED
    | INCOMPAT_LARGEDIR
    | INCOMPAT_INLINE_DATA;

const DESC_SIZE: u64 = 32;
const DESC_SIZE_64BIT_MIN: u16 = 64;

pub const S_IFMT: u16 = 0xF000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;
pub const EXTENTS_FL: u32 = 0x0008_0000;
pub const INLINE_DATA_FL: u32 = 0x1000_0000;
pub const INODE_BLOCK_LEN: usize = 60;

pub const EXTENT_MAGIC: u16 = 0xF30A;
pub const EXTENT_HEADER_LEN: usize = 12;
pub const EXTENT_ENTRY_LEN: usize = 12;
pub const EXTENT_INIT_MAX_LEN: u16 = 32768;
const EXTENT_MAX_DEPTH: u16 = 5;

const DIRENT_HEADER_LEN: usize = 8;
// Inline directories start with the parent inode number.
const INLINE_DIR_PARENT_LEN: usize = 4;

fn corrupt(msg: String) -> anyhow::Error {
    anyhow!(DiskError::Corrupt(msg))
}

fn read_exact_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    reader
        .seek(SeekFrom::Start(offset))
        .with_context(|| format!("Failed to seek to {}", offset))?;
    let mut buf = vec![0_u8; len];
    reader
        .read_exact(&mut buf)
        .with_context(|| format!("Failed to read {} bytes at {}", len, offset))?;
    Ok(buf)
}

/// Number of bytes addressable through `reader`.
fn stream_len<R: Seek>(reader: &mut R) -> Result<u64> {
    let end = reader
        .seek(SeekFrom::End(0))
        .with_context(|| "Failed to seek to the partition end")?;
    let start = reader
        .seek(SeekFrom::Start(0))
        .with_context(|| "Failed to seek to the partition start")?;
    Ok(end.saturating_sub(start))
}

#[derive(Clone, Debug, Default)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
    pub rev_level: u32,
    pub inode_size: u16,
    pub feature_incompat: u32,
    pub desc_size: u16,
}

impl Superblock {
    pub fn from_vec(buf: &[u8]) -> Result<Superblock> {
        if buf.len() < SUPERBLOCK_SIZE {
            bail!(
                "Invalid superblock len {}, the min len {}",
                buf.len(),
                SUPERBLOCK_SIZE
            );
        }
        let mut sb = Superblock {
            inodes_count: LittleEndian::read_u32(&buf[0x0..0x4]),
            first_data_block: LittleEndian::read_u32(&buf[0x14..0x18]),
            log_block_size: LittleEndian::read_u32(&buf[0x18..0x1c]),
            blocks_per_group: LittleEndian::read_u32(&buf[0x20..0x24]),
            inodes_per_group: LittleEndian::read_u32(&buf[0x28..0x2c]),
            magic: LittleEndian::read_u16(&buf[0x38..0x3a]),
            rev_level: LittleEndian::read_u32(&buf[0x4c..0x50]),
            inode_size: LittleEndian::read_u16(&buf[0x58..0x5a]),
            feature_incompat: LittleEndian::read_u32(&buf[0x60..0x64]),
            desc_size: LittleEndian::read_u16(&buf[0xfe..0x100]),
            ..Default::default()
        };
        if sb.magic != EXT4_MAGIC {
            return Err(anyhow!(DiskError::BadMagic(sb.magic)));
        }
        if sb.rev_level == GOOD_OLD_REV {
            sb.inode_size = GOOD_OLD_INODE_SIZE;
        }
        let blocks_hi = if sb.has_incompat(INCOMPAT_64BIT) {
            LittleEndian::read_u32(&buf[0x150..0x154])
        } else {
            0
        };
        sb.blocks_count = combine_u64(LittleEndian::read_u32(&buf[0x4..0x8]), blocks_hi);
        sb.check()?;
        Ok(sb)
    }

    pub fn check(&self) -> Result<()> {
        if self.log_block_size > MAX_LOG_BLOCK_SIZE {
            return Err(corrupt(format!(
                "block size shift {}",
                self.log_block_size
            )));
        }
        if self.inodes_per_group == 0 || self.blocks_per_group == 0 {
            return Err(corrupt("empty block groups".to_string()));
        }
        if (self.inode_size as u64) < GOOD_OLD_INODE_SIZE as u64
            || self.inode_size as u64 > self.block_size()
        {
            return Err(corrupt(format!("inode size {}", self.inode_size)));
        }
        let unsupported = self.feature_incompat & !INCOMPAT_SUPPORTED;
        if unsupported != 0 {
            return Err(anyhow!(DiskError::Unsupported(format!(
                "incompat features 0x{:x}",
                unsupported
            ))));
        }
        Ok(())
    }

    /// The filesystem must fit in the `len` bytes of its partition.
    pub fn check_fits(&self, len: u64) -> Result<()> {
        match self.blocks_count.checked_mul(self.block_size()) {
            Some(size) if size <= len => Ok(()),
            _ => Err(corrupt(format!(
                "{} blocks exceed a {} byte partition",
                self.blocks_count, len
            ))),
        }
    }

    #[inline]
    pub fn has_incompat(&self, feature: u32) -> bool {
        self.feature_incompat & feature != 0
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        1024 << self.log_block_size
    }

    pub fn desc_size(&self) -> u64 {
        if self.has_incompat(INCOMPAT_64BIT) && self.desc_size >= DESC_SIZE_64BIT_MIN {
            self.desc_size as u64
        } else {
            DESC_SIZE
        }
    }

    pub fn group_count(&self) -> u64 {
        let data_blocks = self
            .blocks_count
            .saturating_sub(self.first_data_block as u64);
        data_blocks.div_ceil(self.blocks_per_group as u64)
    }

    /// Upper bound of any file size on this filesystem. Bounded by the
    /// partition length once `check_fits` has passed.
    fn size_limit(&self) -> u64 {
        self.blocks_count.saturating_mul(self.block_size())
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockGroupDescriptor {
    pub inode_table: u64,
}

impl BlockGroupDescriptor {
    pub fn from_vec(buf: &[u8], is_64bit: bool) -> Result<BlockGroupDescriptor> {
        if buf.len() < DESC_SIZE as usize {
            bail!("Invalid group descriptor len {}", buf.len());
        }
        let table_hi = if is_64bit && buf.len() >= DESC_SIZE_64BIT_MIN as usize {
            LittleEndian::read_u32(&buf[0x28..0x2c])
        } else {
            0
        };
        Ok(BlockGroupDescriptor {
            inode_table: combine_u64(LittleEndian::read_u32(&buf[0x8..0xc]), table_hi),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Inode {
    pub mode: u16,
    pub size: u64,
    pub flags: u32,
    pub block: [u8; INODE_BLOCK_LEN],
}

impl Inode {
    pub fn from_vec(buf: &[u8]) -> Result<Inode> {
        if buf.len() < GOOD_OLD_INODE_SIZE as usize {
            bail!("Invalid inode len {}", buf.len());
        }
        let mut block = [0_u8; INODE_BLOCK_LEN];
        block.copy_from_slice(&buf[0x28..0x28 + INODE_BLOCK_LEN]);
        Ok(Inode {
            mode: LittleEndian::read_u16(&buf[0x0..0x2]),
            size: combine_u64(
                LittleEndian::read_u32(&buf[0x4..0x8]),
                LittleEndian::read_u32(&buf[0x6c..0x70]),
            ),
            flags: LittleEndian::read_u32(&buf[0x20..0x24]),
            block,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_reg(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub logical: u32,
    pub len: u32,
    pub physical: u64,
    pub uninit: bool,
}

pub fn read_superblock<R: Read + Seek>(reader: &mut R) -> Result<Superblock> {
    let len = stream_len(reader)?;
    let buf = read_exact_at(reader, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)
        .with_context(|| "Failed to read superblock")?;
    let sb = Superblock::from_vec(&buf)?;
    sb.check_fits(len)?;
    Ok(sb)
}

/// Parse the descriptor of the block group holding inode `ino`.
pub fn block_group_descriptor<R: Read + Seek>(
    reader: &mut R,
    sb: &Superblock,
    ino: u32,
) -> Result<BlockGroupDescriptor> {
    if ino == 0 || ino > sb.inodes_count {
        return Err(corrupt(format!("inode number {}", ino)));
    }
    let group = ((ino - 1) / sb.inodes_per_group) as u64;
    if group >= sb.group_count() {
        return Err(corrupt(format!("block group {} of inode {}", group, ino)));
    }
    let table = (sb.first_data_block as u64 + 1) * sb.block_size();
    let offset = table + group * sb.desc_size();
    let buf = read_exact_at(reader, offset, sb.desc_size() as usize)
        .with_context(|| format!("Failed to read descriptor of block group {}", group))?;
    BlockGroupDescriptor::from_vec(&buf, sb.has_incompat(INCOMPAT_64BIT))
}

pub fn read_inode<R: Read + Seek>(reader: &mut R, ino: u32) -> Result<(Superblock, Inode)> {
    let sb = read_superblock(reader)?;
    let bgd = block_group_descriptor(reader, &sb, ino)?;
    let index = ((ino - 1) % sb.inodes_per_group) as u64;
    let offset = bgd
        .inode_table
        .checked_mul(sb.block_size())
        .and_then(|table| table.checked_add(index * sb.inode_size as u64))
        .ok_or_else(|| corrupt(format!("inode table of inode {}", ino)))?;
    let buf = read_exact_at(reader, offset, sb.inode_size as usize)
        .with_context(|| format!("Failed to read inode {}", ino))?;
    Ok((sb, Inode::from_vec(&buf)?))
}

fn collect_extents<R: Read + Seek>(
    reader: &mut R,
    sb: &Superblock,
    node: &[u8],
    expected_depth: Option<u16>,
    extents: &mut Vec<Extent>,
) -> Result<()> {
    if node.len() < EXTENT_HEADER_LEN {
        return Err(corrupt("short extent node".to_string()));
    }
    let magic = LittleEndian::read_u16(&node[0..2]);
    let entries = LittleEndian::read_u16(&node[2..4]) as usize;
    let depth = LittleEndian::read_u16(&node[6..8]);
    if magic != EXTENT_MAGIC {
        return Err(corrupt(format!("extent header magic 0x{:x}", magic)));
    }
    if depth > EXTENT_MAX_DEPTH || expected_depth.map_or(false, |d| d != depth) {
        return Err(corrupt(format!("extent tree depth {}", depth)));
    }
    if EXTENT_HEADER_LEN + entries * EXTENT_ENTRY_LEN > node.len() {
        return Err(corrupt(format!("{} extent entries overflow node", entries)));
    }

    for i in 0..entries {
        let e = &node[EXTENT_HEADER_LEN + i * EXTENT_ENTRY_LEN..][..EXTENT_ENTRY_LEN];
        if depth == 0 {
            let raw_len = LittleEndian::read_u16(&e[4..6]);
            let (uninit, len) = if raw_len > EXTENT_INIT_MAX_LEN {
                (true, raw_len - EXTENT_INIT_MAX_LEN)
            } else {
                (false, raw_len)
            };
            extents.push(Extent {
                logical: LittleEndian::read_u32(&e[0..4]),
                len: len as u32,
                physical: combine_u64(
                    LittleEndian::read_u32(&e[8..12]),
                    LittleEndian::read_u16(&e[6..8]) as u32,
                ),
                uninit,
            });
        } else {
            let leaf = combine_u64(
                LittleEndian::read_u32(&e[4..8]),
                LittleEndian::read_u16(&e[8..10]) as u32,
            );
            let offset = leaf
                .checked_mul(sb.block_size())
                .ok_or_else(|| corrupt(format!("extent index block {}", leaf)))?;
            let child = read_exact_at(reader, offset, sb.block_size() as usize)
                .with_context(|| format!("Failed to read extent block {}", leaf))?;
            collect_extents(reader, sb, &child, Some(depth - 1), extents)?;
        }
    }
    Ok(())
}

/// Read the full contents of `inode`.
///
/// Holes and uninitialized extents read as zeroes.
pub fn read_inode_data<R: Read + Seek>(
    reader: &mut R,
    sb: &Superblock,
    inode: &Inode,
) -> Result<Vec<u8>> {
    if inode.size > sb.size_limit() {
        return Err(corrupt(format!("inode size {}", inode.size)));
    }
    let size = inode.size as usize;

    if inode.flags & INLINE_DATA_FL != 0 {
        if size > INODE_BLOCK_LEN {
            return Err(anyhow!(DiskError::Unsupported(
                "inline data beyond the inode body".to_string()
            )));
        }
        return Ok(inode.block[..size].to_vec());
    }
    if inode.flags & EXTENTS_FL == 0 {
        return Err(anyhow!(DiskError::Unsupported(
            "block mapped inode".to_string()
        )));
    }

    let mut extents = Vec::new();
    collect_extents(reader, sb, &inode.block, None, &mut extents)?;

    let bs = sb.block_size();
    let mut buf = vec![0_u8; size];
    for ext in extents.iter().filter(|e| !e.uninit) {
        let file_off = ext.logical as u64 * bs;
        if file_off >= inode.size {
            continue;
        }
        let run = std::cmp::min(ext.len as u64 * bs, inode.size - file_off) as usize;
        let phys_off = ext
            .physical
            .checked_mul(bs)
            .ok_or_else(|| corrupt(format!("extent start block {}", ext.physical)))?;
        let file_off = file_off as usize;
        reader
            .seek(SeekFrom::Start(phys_off))
            .with_context(|| format!("Failed to seek to block {}", ext.physical))?;
        reader
            .read_exact(&mut buf[file_off..file_off + run])
            .with_context(|| format!("Failed to read block {}", ext.physical))?;
    }
    Ok(buf)
}

fn find_entry(data: &[u8], name: &str, filetype: bool, start: usize) -> Result<Option<u32>> {
    let mut pos = start;
    while pos + DIRENT_HEADER_LEN <= data.len() {
        let ino = LittleEndian::read_u32(&data[pos..pos + 4]);
        let rec_len = LittleEndian::read_u16(&data[pos + 4..pos + 6]) as usize;
        let name_len = if filetype {
            data[pos + 6] as usize
        } else {
            LittleEndian::read_u16(&data[pos + 6..pos + 8]) as usize
        };
        if rec_len < DIRENT_HEADER_LEN
            || pos + rec_len > data.len()
            || DIRENT_HEADER_LEN + name_len > rec_len
        {
            return Err(corrupt(format!("directory entry at {}", pos)));
        }
        let entry_name = &data[pos + DIRENT_HEADER_LEN..pos + DIRENT_HEADER_LEN + name_len];
        if ino != 0 && entry_name == name.as_bytes() {
            return Ok(Some(ino));
        }
        pos += rec_len;
    }
    Ok(None)
}

/// Look up `name` in directory inode `dir_ino`.
pub fn lookup<R: Read + Seek>(reader: &mut R, dir_ino: u32, name: &str) -> Result<Option<u32>> {
    let (sb, dir) = read_inode(reader, dir_ino)?;
    if !dir.is_dir() {
        return Err(anyhow!(DiskError::NotADirectory(format!("inode {}", dir_ino))));
    }
    let data = read_inode_data(reader, &sb, &dir)?;
    let start = if dir.flags & INLINE_DATA_FL != 0 {
        INLINE_DIR_PARENT_LEN
    } else {
        0
    };
    find_entry(&data, name, sb.has_incompat(INCOMPAT_FILETYPE), start)
}

/// Read the regular file at `path`, relative to the filesystem root.
/// A leading `/` is optional.
pub fn read_all<R: Read + Seek>(reader: &mut R, path: &str) -> Result<Vec<u8>> {
    let rel = path.strip_prefix('/').unwrap_or(path);

    let mut ino = ROOT_INODE;
    let mut walked = String::new();
    for name in rel.split('/') {
        ino = lookup(reader, ino, name)
            .map_err(|e| match e.downcast_ref::<DiskError>() {
                Some(DiskError::NotADirectory(_)) => {
                    anyhow!(DiskError::NotADirectory(format!("/{}", walked)))
                }
                _ => e,
            })?
            .ok_or_else(|| anyhow!(DiskError::NotFound(path.to_string())))?;
        if !walked.is_empty() {
            walked.push('/');
        }
        walked.push_str(name);
    }

    let (sb, file) = read_inode(reader, ino)?;
    if !file.is_reg() {
        return Err(anyhow!(DiskError::NotAFile(path.to_string())));
    }
    debug!("reading {} ({} bytes)", path, file.size);
    read_inode_data(reader, &sb, &file).with_context(|| format!("Failed to read {}", path))
}
