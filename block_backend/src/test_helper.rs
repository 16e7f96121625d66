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

//! Builds small ext4 images in memory.
//!
//! Layout, in 1 KiB blocks: boot block, superblock, group descriptor table,
//! block bitmap, inode bitmap, eight blocks of inode table, then data. There
//! is a single block group and every file uses extents unless stored inline.

use byteorder::{ByteOrder, LittleEndian};

use crate::ext4::{
    EXT4_MAGIC, EXTENTS_FL, EXTENT_ENTRY_LEN, EXTENT_HEADER_LEN, EXTENT_MAGIC, INCOMPAT_64BIT,
    INCOMPAT_EXTENTS, INCOMPAT_FILETYPE, INCOMPAT_INLINE_DATA, INLINE_DATA_FL, INODE_BLOCK_LEN,
    ROOT_INODE, S_IFDIR, S_IFREG, SUPERBLOCK_OFFSET,
};

pub const BLOCK_SIZE: usize = 1024;
pub const INODE_SIZE: usize = 256;
pub const INODES_PER_GROUP: u32 = 32;
pub const FIRST_INODE: u32 = 11;
const GDT_BLOCK: u32 = 2;
const BLOCK_BITMAP: u32 = 3;
const INODE_BITMAP: u32 = 4;
pub const INODE_TABLE_BLOCK: u32 = 5;
const FIRST_DATA_BLOCK: u32 = INODE_TABLE_BLOCK + INODES_PER_GROUP * INODE_SIZE as u32 / BLOCK_SIZE as u32;
const BLOCKS_PER_GROUP: u32 = 8192;
const DESC_SIZE_64BIT: u16 = 64;
const INODE_EXTENT_SLOTS: usize = (INODE_BLOCK_LEN - EXTENT_HEADER_LEN) / EXTENT_ENTRY_LEN;
const LEAF_EXTENT_SLOTS: usize = (BLOCK_SIZE - EXTENT_HEADER_LEN) / EXTENT_ENTRY_LEN;
const FT_REG_FILE: u8 = 1;
const FT_DIR: u8 = 2;

/// Byte offset of inode `ino` within a built image.
pub fn inode_offset(ino: u32) -> usize {
    INODE_TABLE_BLOCK as usize * BLOCK_SIZE + (ino - 1) as usize * INODE_SIZE
}

enum Content {
    Dir(Vec<Entry>),
    File(Vec<u8>),
    Inline(Vec<u8>),
}

struct Entry {
    name: String,
    content: Content,
}

#[derive(Clone, Copy)]
struct ExtentRun {
    logical: u32,
    len: u16,
    physical: u32,
}

pub struct Ext4ImageBuilder {
    root: Vec<Entry>,
    fragmented: bool,
    sixty_four_bit: bool,
}

impl Default for Ext4ImageBuilder {
    fn default() -> Self {
        Ext4ImageBuilder {
            root: Vec::new(),
            fragmented: false,
            sixty_four_bit: false,
        }
    }
}

fn insert(entries: &mut Vec<Entry>, components: &[&str], leaf: Content) {
    let (name, rest) = match components.split_first() {
        Some(split) => split,
        None => return,
    };
    if rest.is_empty() {
        entries.retain(|e| e.name != *name);
        entries.push(Entry {
            name: name.to_string(),
            content: leaf,
        });
        return;
    }

    let idx = match entries.iter().position(|e| e.name == *name) {
        Some(idx) => idx,
        None => {
            entries.push(Entry {
                name: name.to_string(),
                content: Content::Dir(Vec::new()),
            });
            entries.len() - 1
        }
    };
    if let Content::Dir(children) = &mut entries[idx].content {
        insert(children, rest, leaf);
    } else {
        panic!("{} is not a directory", name);
    }
}

impl Ext4ImageBuilder {
    pub fn new() -> Self {
        Ext4ImageBuilder::default()
    }

    /// Store every file block in its own extent, one block apart.
    pub fn fragmented(mut self, on: bool) -> Self {
        self.fragmented = on;
        self
    }

    /// Use 64-byte group descriptors.
    pub fn sixty_four_bit(mut self, on: bool) -> Self {
        self.sixty_four_bit = on;
        self
    }

    pub fn dir(self, path: &str) -> Self {
        self.add(path, Content::Dir(Vec::new()))
    }

    pub fn file(self, path: &str, data: &[u8]) -> Self {
        self.add(path, Content::File(data.to_vec()))
    }

    /// Store `data` in the inode body. It must fit in 60 bytes.
    pub fn inline_file(self, path: &str, data: &[u8]) -> Self {
        assert!(data.len() <= INODE_BLOCK_LEN);
        self.add(path, Content::Inline(data.to_vec()))
    }

    fn add(mut self, path: &str, content: Content) -> Self {
        let components: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        insert(&mut self.root, &components, content);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut img = Image {
            data: vec![0_u8; FIRST_DATA_BLOCK as usize * BLOCK_SIZE],
            next_block: FIRST_DATA_BLOCK,
            next_ino: FIRST_INODE,
            fragmented: self.fragmented,
            inline_used: false,
        };
        img.write_dir(&self.root, ROOT_INODE, ROOT_INODE);

        let blocks_count = img.next_block;
        img.data.resize(blocks_count as usize * BLOCK_SIZE, 0);

        let mut incompat = INCOMPAT_FILETYPE | INCOMPAT_EXTENTS;
        if self.sixty_four_bit {
            incompat |= INCOMPAT_64BIT;
        }
        if img.inline_used {
            incompat |= INCOMPAT_INLINE_DATA;
        }

        let sb = &mut img.data[SUPERBLOCK_OFFSET as usize..][..BLOCK_SIZE];
        LittleEndian::write_u32(&mut sb[0x0..0x4], INODES_PER_GROUP);
        LittleEndian::write_u32(&mut sb[0x4..0x8], blocks_count);
        LittleEndian::write_u32(&mut sb[0x14..0x18], 1);
        LittleEndian::write_u32(&mut sb[0x18..0x1c], 0);
        LittleEndian::write_u32(&mut sb[0x20..0x24], BLOCKS_PER_GROUP);
        LittleEndian::write_u32(&mut sb[0x28..0x2c], INODES_PER_GROUP);
        LittleEndian::write_u16(&mut sb[0x38..0x3a], EXT4_MAGIC);
        LittleEndian::write_u32(&mut sb[0x4c..0x50], 1);
        LittleEndian::write_u32(&mut sb[0x54..0x58], FIRST_INODE);
        LittleEndian::write_u16(&mut sb[0x58..0x5a], INODE_SIZE as u16);
        LittleEndian::write_u32(&mut sb[0x60..0x64], incompat);
        if self.sixty_four_bit {
            LittleEndian::write_u16(&mut sb[0xfe..0x100], DESC_SIZE_64BIT);
        }

        let gdt = &mut img.data[GDT_BLOCK as usize * BLOCK_SIZE..][..BLOCK_SIZE];
        LittleEndian::write_u32(&mut gdt[0x0..0x4], BLOCK_BITMAP);
        LittleEndian::write_u32(&mut gdt[0x4..0x8], INODE_BITMAP);
        LittleEndian::write_u32(&mut gdt[0x8..0xc], INODE_TABLE_BLOCK);

        img.data
    }
}

struct Image {
    data: Vec<u8>,
    next_block: u32,
    next_ino: u32,
    fragmented: bool,
    inline_used: bool,
}

impl Image {
    fn alloc_ino(&mut self) -> u32 {
        assert!(self.next_ino <= INODES_PER_GROUP, "too many inodes");
        self.next_ino += 1;
        self.next_ino - 1
    }

    fn write_block(&mut self, block: u32, bytes: &[u8]) {
        let start = block as usize * BLOCK_SIZE;
        if self.data.len() < start + BLOCK_SIZE {
            self.data.resize(start + BLOCK_SIZE, 0);
        }
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn write_dir(&mut self, entries: &[Entry], ino: u32, parent: u32) {
        let inos: Vec<u32> = entries.iter().map(|_| self.alloc_ino()).collect();

        let mut records: Vec<(u32, &str, u8)> = vec![(ino, ".", FT_DIR), (parent, "..", FT_DIR)];
        for (entry, child) in entries.iter().zip(&inos) {
            let ft = match entry.content {
                Content::Dir(_) => FT_DIR,
                _ => FT_REG_FILE,
            };
            records.push((*child, entry.name.as_str(), ft));
        }
        let data = pack_dirents(&records);
        self.write_extent_inode(ino, S_IFDIR | 0o755, &data);

        for (entry, child) in entries.iter().zip(inos) {
            match &entry.content {
                Content::Dir(children) => self.write_dir(children, child, ino),
                Content::File(data) => self.write_extent_inode(child, S_IFREG | 0o644, data),
                Content::Inline(data) => {
                    self.inline_used = true;
                    let mut block = [0_u8; INODE_BLOCK_LEN];
                    block[..data.len()].copy_from_slice(data);
                    self.write_inode(child, S_IFREG | 0o644, data.len() as u64, INLINE_DATA_FL, &block);
                }
            }
        }
    }

    fn write_extent_inode(&mut self, ino: u32, mode: u16, data: &[u8]) {
        let mut runs = Vec::new();
        for (i, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
            let block = self.next_block;
            self.next_block += if self.fragmented { 2 } else { 1 };
            self.write_block(block, chunk);
            match runs.last_mut() {
                Some(ExtentRun {
                    len, physical, ..
                }) if !self.fragmented && *physical + *len as u32 == block => *len += 1,
                _ => runs.push(ExtentRun {
                    logical: i as u32,
                    len: 1,
                    physical: block,
                }),
            }
        }

        let mut i_block = [0_u8; INODE_BLOCK_LEN];
        if runs.len() <= INODE_EXTENT_SLOTS {
            write_extent_node(&mut i_block, &runs, INODE_EXTENT_SLOTS, 0);
        } else {
            assert!(runs.len() <= LEAF_EXTENT_SLOTS, "file too fragmented");
            let leaf_block = self.next_block;
            self.next_block += 1;
            let mut leaf = vec![0_u8; BLOCK_SIZE];
            write_extent_node(&mut leaf, &runs, LEAF_EXTENT_SLOTS, 0);
            self.write_block(leaf_block, &leaf);

            write_extent_header(&mut i_block, 1, INODE_EXTENT_SLOTS, 1);
            let idx = &mut i_block[EXTENT_HEADER_LEN..EXTENT_HEADER_LEN + EXTENT_ENTRY_LEN];
            LittleEndian::write_u32(&mut idx[0..4], 0);
            LittleEndian::write_u32(&mut idx[4..8], leaf_block);
            LittleEndian::write_u16(&mut idx[8..10], 0);
        }
        self.write_inode(ino, mode, data.len() as u64, EXTENTS_FL, &i_block);
    }

    fn write_inode(&mut self, ino: u32, mode: u16, size: u64, flags: u32, i_block: &[u8]) {
        let raw = &mut self.data[inode_offset(ino)..][..INODE_SIZE];
        LittleEndian::write_u16(&mut raw[0x0..0x2], mode);
        LittleEndian::write_u32(&mut raw[0x4..0x8], size as u32);
        LittleEndian::write_u16(&mut raw[0x1a..0x1c], 1);
        LittleEndian::write_u32(&mut raw[0x20..0x24], flags);
        raw[0x28..0x28 + INODE_BLOCK_LEN].copy_from_slice(i_block);
        LittleEndian::write_u32(&mut raw[0x6c..0x70], (size >> 32) as u32);
        LittleEndian::write_u16(&mut raw[0x80..0x82], 32);
    }
}

fn write_extent_header(node: &mut [u8], entries: usize, max: usize, depth: u16) {
    LittleEndian::write_u16(&mut node[0..2], EXTENT_MAGIC);
    LittleEndian::write_u16(&mut node[2..4], entries as u16);
    LittleEndian::write_u16(&mut node[4..6], max as u16);
    LittleEndian::write_u16(&mut node[6..8], depth);
}

fn write_extent_node(node: &mut [u8], runs: &[ExtentRun], max: usize, depth: u16) {
    write_extent_header(node, runs.len(), max, depth);
    for (i, run) in runs.iter().enumerate() {
        let e = &mut node[EXTENT_HEADER_LEN + i * EXTENT_ENTRY_LEN..][..EXTENT_ENTRY_LEN];
        LittleEndian::write_u32(&mut e[0..4], run.logical);
        LittleEndian::write_u16(&mut e[4..6], run.len);
        LittleEndian::write_u16(&mut e[6..8], 0);
        LittleEndian::write_u32(&mut e[8..12], run.physical);
    }
}

fn pack_dirents(records: &[(u32, &str, u8)]) -> Vec<u8> {
    let mut data: Vec<u8> = Vec::new();
    let mut last: Option<usize> = None;

    for (ino, name, ft) in records {
        let rec_len = (8 + name.len() + 3) & !3;
        let used = data.len() % BLOCK_SIZE;
        if used + rec_len > BLOCK_SIZE && used != 0 {
            if let Some(pos) = last {
                stretch(&mut data, pos);
            }
        }
        let pos = data.len();
        data.resize(pos + rec_len, 0);
        LittleEndian::write_u32(&mut data[pos..pos + 4], *ino);
        LittleEndian::write_u16(&mut data[pos + 4..pos + 6], rec_len as u16);
        data[pos + 6] = name.len() as u8;
        data[pos + 7] = *ft;
        data[pos + 8..pos + 8 + name.len()].copy_from_slice(name.as_bytes());
        last = Some(pos);
    }
    if let Some(pos) = last {
        stretch(&mut data, pos);
    }
    data
}

// Extend the record at `pos` to the end of its block.
fn stretch(data: &mut Vec<u8>, pos: usize) {
    let block_end = (pos / BLOCK_SIZE + 1) * BLOCK_SIZE;
    data.resize(block_end, 0);
    LittleEndian::write_u16(&mut data[pos + 4..pos + 6], (block_end - pos) as u16);
}
