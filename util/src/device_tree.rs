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

//! Flattened device tree (DTB) support.
//!
//! [`DeviceTree::from_blob`] parses an existing blob into an owned node tree,
//! which can be edited and written back with [`DeviceTree::to_blob`]. The
//! writer side is the [`FdtBuilder`] token emitter.

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ByteOrder};

use crate::UtilError;

// Magic number in fdt header(big-endian).
const FDT_MAGIC: u32 = 0xd00dfeed;
// Fdt Header default information.
const FDT_HEADER_SIZE: usize = 40;
const FDT_VERSION: u32 = 17;
const FDT_LAST_COMP_VERSION: u32 = 16;
// Beginning token type of structure block.
const FDT_BEGIN_NODE: u32 = 0x00000001;
const FDT_END_NODE: u32 = 0x00000002;
const FDT_PROP: u32 = 0x00000003;
const FDT_NOP: u32 = 0x00000004;
const FDT_END: u32 = 0x00000009;
// Memory reservation block alignment.
const MEM_RESERVE_ALIGNMENT: usize = 8;
// Structure block alignment.
const STRUCTURE_BLOCK_ALIGNMENT: usize = 4;
// Deepest node nesting accepted from a blob.
const FDT_MAX_DEPTH: usize = 64;

/// FdtBuilder structure.
pub struct FdtBuilder {
    /// The header of flattened device tree.
    fdt_header: Vec<u8>,
    /// The memory reservation block of flattened device tree.
    /// It provides the client program with a list of areas
    /// in physical memory which are reserved.
    mem_reserve: Vec<u8>,
    /// The structure block of flattened device tree.
    /// It describes the structure and contents of the tree.
    structure_blk: Vec<u8>,
    /// The strings block of flattened device tree.
    /// It contains strings representing all the property names used in the tree.
    strings_blk: Vec<u8>,
    /// The physical ID of the system’s boot CPU.
    boot_cpuid_phys: u32,
    /// The depth of nested node.
    subnode_depth: u32,
    /// Is there a open node or not.
    begin_node: bool,
}

/// FdtReserveEntry structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FdtReserveEntry {
    /// The address of reserved memory.
    /// On 32-bit CPUs the upper 32-bits of the value are ignored.
    address: u64,
    /// The size of reserved memory.
    size: u64,
}

impl FdtReserveEntry {
    pub fn new(address: u64, size: u64) -> Self {
        FdtReserveEntry { address, size }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn check_mem_reserve_overlap(mem_reservations: &[FdtReserveEntry]) -> bool {
    if mem_reservations.len() <= 1 {
        return true;
    }

    let mut mem_reser = mem_reservations.to_vec();
    mem_reser.sort_by_key(|m| m.address);

    for i in 0..(mem_reser.len() - 1) {
        match mem_reser[i].address.checked_add(mem_reser[i].size) {
            Some(end) if end <= mem_reser[i + 1].address => {}
            _ => return false,
        }
    }
    true
}

// If there is null character in string, return false.
fn check_string_legality(s: &str) -> bool {
    !s.contains('\0')
}

impl Default for FdtBuilder {
    fn default() -> Self {
        Self {
            fdt_header: vec![0_u8; FDT_HEADER_SIZE],
            mem_reserve: Vec::new(),
            structure_blk: Vec::new(),
            strings_blk: Vec::new(),
            boot_cpuid_phys: 0,
            subnode_depth: 0,
            begin_node: false,
        }
    }
}

impl FdtBuilder {
    pub fn new() -> Self {
        FdtBuilder::default()
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.subnode_depth > 0 {
            return Err(anyhow!(UtilError::NodeUnclosed(self.subnode_depth)));
        }
        self.structure_blk
            .extend_from_slice(&FDT_END.to_be_bytes()[..]);

        // The memory reservation block is terminated by an entry whose
        // address and size are both 0.
        self.mem_reserve.extend_from_slice(&0_u64.to_be_bytes());
        self.mem_reserve.extend_from_slice(&0_u64.to_be_bytes());

        // Fill fdt header.
        let total_size = FDT_HEADER_SIZE
            + self.mem_reserve.len()
            + self.structure_blk.len()
            + self.strings_blk.len();
        let off_dt_struct = FDT_HEADER_SIZE + self.mem_reserve.len();
        let off_dt_strings = FDT_HEADER_SIZE + self.mem_reserve.len() + self.structure_blk.len();
        let off_mem_rsvmap = FDT_HEADER_SIZE;

        BigEndian::write_u32(&mut self.fdt_header[0..4], FDT_MAGIC);
        BigEndian::write_u32(&mut self.fdt_header[4..8], total_size as u32);
        BigEndian::write_u32(&mut self.fdt_header[8..12], off_dt_struct as u32);
        BigEndian::write_u32(&mut self.fdt_header[12..16], off_dt_strings as u32);
        BigEndian::write_u32(&mut self.fdt_header[16..20], off_mem_rsvmap as u32);
        BigEndian::write_u32(&mut self.fdt_header[20..24], FDT_VERSION);
        BigEndian::write_u32(&mut self.fdt_header[24..28], FDT_LAST_COMP_VERSION);
        BigEndian::write_u32(&mut self.fdt_header[28..32], self.boot_cpuid_phys);
        BigEndian::write_u32(&mut self.fdt_header[32..36], self.strings_blk.len() as u32);
        BigEndian::write_u32(
            &mut self.fdt_header[36..40],
            self.structure_blk.len() as u32,
        );

        self.fdt_header.extend_from_slice(&self.mem_reserve);
        self.fdt_header.extend_from_slice(&self.structure_blk);
        self.fdt_header.extend_from_slice(&self.strings_blk);
        Ok(self.fdt_header)
    }

    pub fn add_mem_reserve(&mut self, mem_reservations: &[FdtReserveEntry]) -> Result<()> {
        if !check_mem_reserve_overlap(mem_reservations) {
            return Err(anyhow!(UtilError::MemReserveOverlap));
        }

        for mem_reser in mem_reservations {
            self.mem_reserve
                .extend_from_slice(&mem_reser.address.to_be_bytes());
            self.mem_reserve
                .extend_from_slice(&mem_reser.size.to_be_bytes());
        }
        self.align_structure_blk(MEM_RESERVE_ALIGNMENT);

        Ok(())
    }

    pub fn begin_node(&mut self, node_name: &str) -> Result<u32> {
        if !check_string_legality(node_name) {
            return Err(anyhow!(UtilError::IllegalString(node_name.to_string())));
        }

        self.structure_blk
            .extend_from_slice(&FDT_BEGIN_NODE.to_be_bytes()[..]);
        if node_name.is_empty() {
            self.structure_blk
                .extend_from_slice(&0_u32.to_be_bytes()[..]);
        } else {
            let mut val_array = node_name.as_bytes().to_vec();
            // The node’s name string should end with null('\0').
            val_array.push(0x0_u8);
            self.structure_blk.extend_from_slice(&val_array);
        }
        self.align_structure_blk(STRUCTURE_BLOCK_ALIGNMENT);
        self.subnode_depth += 1;
        self.begin_node = true;
        Ok(self.subnode_depth)
    }

    pub fn end_node(&mut self, begin_node_depth: u32) -> Result<()> {
        if begin_node_depth != self.subnode_depth {
            return Err(anyhow!(UtilError::NodeDepthMismatch(
                begin_node_depth,
                self.subnode_depth
            )));
        }

        self.structure_blk
            .extend_from_slice(&FDT_END_NODE.to_be_bytes()[..]);
        self.subnode_depth -= 1;
        self.begin_node = false;
        Ok(())
    }

    pub fn set_boot_cpuid_phys(&mut self, boot_cpuid: u32) {
        self.boot_cpuid_phys = boot_cpuid;
    }

    pub fn set_property(&mut self, property_name: &str, property_val: &[u8]) -> Result<()> {
        if !check_string_legality(property_name) {
            return Err(anyhow!(UtilError::IllegalString(property_name.to_string())));
        }

        if !self.begin_node {
            return Err(anyhow!(UtilError::IllegelPropertyPos));
        }

        let len = property_val.len() as u32;
        let nameoff = self.strings_blk.len() as u32;
        self.structure_blk
            .extend_from_slice(&FDT_PROP.to_be_bytes()[..]);
        self.structure_blk.extend_from_slice(&len.to_be_bytes()[..]);
        self.structure_blk
            .extend_from_slice(&nameoff.to_be_bytes()[..]);
        self.structure_blk.extend_from_slice(property_val);
        self.align_structure_blk(STRUCTURE_BLOCK_ALIGNMENT);

        self.strings_blk.extend_from_slice(property_name.as_bytes());
        // These strings in strings block should end with null('\0').
        self.strings_blk.extend_from_slice("\0".as_bytes());

        Ok(())
    }

    fn align_structure_blk(&mut self, alignment: usize) {
        let remainder = self.structure_blk.len() % alignment;
        if remainder != 0 {
            self.structure_blk.extend(vec![0_u8; alignment - remainder]);
        }
    }
}

/// Trait for objects which can be emitted as a Flattened Device Tree node.
#[allow(clippy::upper_case_acronyms)]
pub trait CompileFDT {
    /// function to generate fdt node
    ///
    /// # Arguments
    ///
    /// * `fdt` - the FdtBuilder to be filled.
    fn generate_fdt_node(&self, fdt: &mut FdtBuilder) -> Result<()>;
}

/// A property of a device tree node, with its raw (big-endian) value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FdtProperty {
    pub name: String,
    pub value: Vec<u8>,
}

/// An owned device tree node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FdtNode {
    pub name: String,
    pub properties: Vec<FdtProperty>,
    pub children: Vec<FdtNode>,
}

impl FdtNode {
    pub fn new(name: &str) -> Self {
        FdtNode {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn property(&self, name: &str) -> Option<&[u8]> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_slice())
    }

    /// Set `name` to `value`, replacing an existing property of that name.
    pub fn set_property(&mut self, name: &str, value: Vec<u8>) {
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(prop) => prop.value = value,
            None => self.properties.push(FdtProperty {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn child(&self, name: &str) -> Option<&FdtNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Return the child called `name`, appending an empty one if absent.
    pub fn child_or_insert(&mut self, name: &str) -> &mut FdtNode {
        let idx = match self.children.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.children.push(FdtNode::new(name));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }
}

impl CompileFDT for FdtNode {
    fn generate_fdt_node(&self, fdt: &mut FdtBuilder) -> Result<()> {
        let node_dep = fdt.begin_node(&self.name)?;
        for prop in &self.properties {
            fdt.set_property(&prop.name, &prop.value)?;
        }
        for child in &self.children {
            child.generate_fdt_node(fdt)?;
        }
        fdt.end_node(node_dep)
    }
}

/// A parsed, editable flattened device tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceTree {
    pub root: FdtNode,
    pub mem_reserve: Vec<FdtReserveEntry>,
    pub boot_cpuid_phys: u32,
}

fn read_be_u32(blk: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    offset
        .checked_add(4)
        .and_then(|end| blk.get(offset..end))
        .map(BigEndian::read_u32)
        .ok_or_else(|| anyhow!(UtilError::FdtTruncated(what, offset as u64, blk.len() as u64)))
}

fn read_be_u64(blk: &[u8], offset: usize, what: &'static str) -> Result<u64> {
    offset
        .checked_add(8)
        .and_then(|end| blk.get(offset..end))
        .map(BigEndian::read_u64)
        .ok_or_else(|| anyhow!(UtilError::FdtTruncated(what, offset as u64, blk.len() as u64)))
}

fn sub_block<'a>(blob: &'a [u8], offset: u32, size: u32, what: &'static str) -> Result<&'a [u8]> {
    let start = offset as usize;
    start
        .checked_add(size as usize)
        .and_then(|end| blob.get(start..end))
        .ok_or_else(|| anyhow!(UtilError::FdtTruncated(what, offset as u64, blob.len() as u64)))
}

fn read_cstr(blk: &[u8], offset: usize) -> Result<&str> {
    let tail = blk
        .get(offset..)
        .ok_or_else(|| anyhow!(UtilError::FdtString(offset as u64)))?;
    let len = tail
        .iter()
        .position(|&c| c == 0)
        .ok_or_else(|| anyhow!(UtilError::FdtString(offset as u64)))?;
    std::str::from_utf8(&tail[..len]).map_err(|_| anyhow!(UtilError::FdtString(offset as u64)))
}

fn align_up(pos: usize) -> usize {
    (pos + STRUCTURE_BLOCK_ALIGNMENT - 1) & !(STRUCTURE_BLOCK_ALIGNMENT - 1)
}

impl DeviceTree {
    /// Parse a flattened device tree blob.
    ///
    /// # Errors
    ///
    /// Bad magic or version, any block reaching outside `totalsize`, an
    /// unknown structure token, or unbalanced nodes.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let magic = read_be_u32(blob, 0, "header")?;
        if magic != FDT_MAGIC {
            bail!(UtilError::FdtMagic(magic));
        }
        let total_size = read_be_u32(blob, 4, "header")?;
        let blob = blob.get(..total_size as usize).ok_or_else(|| {
            anyhow!(UtilError::FdtTruncated(
                "totalsize",
                total_size as u64,
                blob.len() as u64
            ))
        })?;
        if blob.len() < FDT_HEADER_SIZE {
            bail!(UtilError::FdtTruncated(
                "header",
                0,
                blob.len() as u64
            ));
        }

        let off_dt_struct = read_be_u32(blob, 8, "header")?;
        let off_dt_strings = read_be_u32(blob, 12, "header")?;
        let off_mem_rsvmap = read_be_u32(blob, 16, "header")?;
        let version = read_be_u32(blob, 20, "header")?;
        let boot_cpuid_phys = read_be_u32(blob, 28, "header")?;
        let size_dt_strings = read_be_u32(blob, 32, "header")?;
        let size_dt_struct = read_be_u32(blob, 36, "header")?;
        if version < FDT_LAST_COMP_VERSION {
            bail!(UtilError::FdtVersion(version));
        }

        let strings_blk = sub_block(blob, off_dt_strings, size_dt_strings, "strings block")?;
        let structure_blk = if version >= FDT_VERSION {
            sub_block(blob, off_dt_struct, size_dt_struct, "structure block")?
        } else {
            blob.get(off_dt_struct as usize..).ok_or_else(|| {
                anyhow!(UtilError::FdtTruncated(
                    "structure block",
                    off_dt_struct as u64,
                    blob.len() as u64
                ))
            })?
        };

        let mut mem_reserve = Vec::new();
        let mut pos = off_mem_rsvmap as usize;
        loop {
            let address = read_be_u64(blob, pos, "memory reservation")?;
            let size = read_be_u64(blob, pos + 8, "memory reservation")?;
            if address == 0 && size == 0 {
                break;
            }
            mem_reserve.push(FdtReserveEntry::new(address, size));
            pos += 16;
        }

        let root = Self::parse_structure(structure_blk, strings_blk)?;

        Ok(DeviceTree {
            root,
            mem_reserve,
            boot_cpuid_phys,
        })
    }

    fn parse_structure(structure_blk: &[u8], strings_blk: &[u8]) -> Result<FdtNode> {
        let mut stack: Vec<FdtNode> = Vec::new();
        let mut root: Option<FdtNode> = None;
        let mut pos = 0_usize;

        loop {
            let token_pos = pos;
            let token = read_be_u32(structure_blk, pos, "structure token")?;
            pos += 4;

            match token {
                FDT_BEGIN_NODE => {
                    if root.is_some() {
                        bail!(UtilError::FdtToken(token, token_pos as u64));
                    }
                    if stack.len() >= FDT_MAX_DEPTH {
                        bail!(UtilError::FdtTooDeep(FDT_MAX_DEPTH));
                    }
                    let name = read_cstr(structure_blk, pos)?;
                    pos = align_up(pos + name.len() + 1);
                    stack.push(FdtNode::new(name));
                }
                FDT_END_NODE => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| anyhow!(UtilError::FdtToken(token, token_pos as u64)))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                FDT_PROP => {
                    let len = read_be_u32(structure_blk, pos, "property header")? as usize;
                    let nameoff = read_be_u32(structure_blk, pos + 4, "property header")?;
                    pos += 8;
                    let value = pos
                        .checked_add(len)
                        .and_then(|end| structure_blk.get(pos..end))
                        .ok_or_else(|| {
                            anyhow!(UtilError::FdtTruncated(
                                "property value",
                                pos as u64,
                                structure_blk.len() as u64
                            ))
                        })?
                        .to_vec();
                    pos = align_up(pos + len);
                    let name = read_cstr(strings_blk, nameoff as usize)?.to_string();
                    let node = stack
                        .last_mut()
                        .ok_or_else(|| anyhow!(UtilError::FdtToken(token, token_pos as u64)))?;
                    node.properties.push(FdtProperty { name, value });
                }
                FDT_NOP => {}
                FDT_END => break,
                _ => bail!(UtilError::FdtToken(token, token_pos as u64)),
            }
        }

        if !stack.is_empty() {
            bail!(UtilError::NodeUnclosed(stack.len() as u32));
        }
        root.ok_or_else(|| anyhow!(UtilError::FdtToken(FDT_END, pos as u64)))
    }

    /// Serialize the tree back into a flattened device tree blob.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        let mut fdt = FdtBuilder::new();
        fdt.add_mem_reserve(&self.mem_reserve)?;
        fdt.set_boot_cpuid_phys(self.boot_cpuid_phys);
        self.root.generate_fdt_node(&mut fdt)?;
        fdt.finish()
    }
}
