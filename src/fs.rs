// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The filesystem engine.
//!
//! Files are flat byte vectors named by inode number; there are
//! no directories, permissions, or timestamps.  The engine owns
//! the device from `mount` to `unmount` and keeps exactly one
//! piece of volatile state: a bitmap of free data blocks.  The
//! bitmap is never written to the device.  It is derived at
//! mount time by walking the inode table and marking every block
//! a valid inode references, so a device unmounted at any point
//! between operations mounts back to a consistent view.
//!
//! Writes allocate lazily: a data block is claimed the first
//! time a logical block is actually written, and the indirect
//! block is claimed the first time the file grows past the
//! direct region.  When the data region fills mid-write, the
//! write stops short and reports how far it got; the blocks
//! already written remain part of the file.  Inode and
//! indirect-block updates are deferred to the end of the call,
//! so a long write costs at most one metadata write each rather
//! than one per data block.

use crate::disk::Disk;
use crate::layout::{
    BLOCK_SIZE, INODES_PER_BLOCK, Inode, MAGIC, MAX_FILE_SIZE,
    POINTERS_PER_BLOCK, POINTERS_PER_INODE, SuperBlock, pointer, set_pointer,
};
use crate::result::{Error, Result};
use alloc::vec;
use alloc::vec::Vec;
use bit_field::BitField;
use core::fmt;
use core::num::NonZeroU32;
use core::ops::Range;

/// In-memory map of free blocks, one bit per device block; a
/// set bit means free.  Only data-region blocks are ever marked
/// free.
struct FreeMap {
    words: Vec<u64>,
}

impl FreeMap {
    /// Creates a map with every block marked in use.
    fn new(blocks: u32) -> FreeMap {
        FreeMap {
            words: vec![0; blocks.div_ceil(64) as usize],
        }
    }

    fn mark_free(&mut self, bno: u32) {
        self.words[bno as usize / 64].set_bit(bno as usize % 64, true);
    }

    fn mark_used(&mut self, bno: u32) {
        self.words[bno as usize / 64].set_bit(bno as usize % 64, false);
    }

    fn is_free(&self, bno: u32) -> bool {
        self.words[bno as usize / 64].get_bit(bno as usize % 64)
    }

    /// Returns the first free block in `range`, if any.
    fn first_free(&self, range: Range<u32>) -> Option<u32> {
        range.into_iter().find(|&bno| self.is_free(bno))
    }

    /// Returns the total number of free blocks.
    fn free_count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// Initializes the filesystem on a device, destroying whatever
/// it held before.
///
/// One tenth of the device, rounded up, is reserved for the
/// inode table; every block outside the superblock and table is
/// zeroed.  Fails if the device cannot hold the superblock and
/// at least one other block.
pub fn format(disk: &mut impl Disk) -> Result<()> {
    let blocks = disk.block_count();
    if blocks <= 1 {
        return Err(Error::InvSuperBlock);
    }
    let inode_blocks = blocks.div_ceil(10);
    let inodes = inode_blocks
        .checked_mul(INODES_PER_BLOCK as u32)
        .ok_or(Error::InvSuperBlock)?;
    let sb = SuperBlock {
        magic: MAGIC,
        blocks,
        inode_blocks,
        inodes,
    };
    let mut buf = [0u8; BLOCK_SIZE];
    sb.encode(&mut buf);
    disk.write(0, &buf)?;
    let zero = [0u8; BLOCK_SIZE];
    for bno in 1..blocks {
        disk.write(bno, &zero)?;
    }
    Ok(())
}

/// Renders a report of the on-device structures into `w`:
/// the superblock geometry, then every valid inode with its
/// size and block pointers.  Reads the device but modifies
/// nothing, and does not require a mounted filesystem.
pub fn debug(disk: &impl Disk, w: &mut impl fmt::Write) -> Result<()> {
    let mut buf = [0u8; BLOCK_SIZE];
    disk.read(0, &mut buf)?;
    let sb = SuperBlock::decode(&buf);

    writeln!(w, "superblock:")?;
    if sb.magic != MAGIC {
        writeln!(w, "    magic number is invalid")?;
        return Ok(());
    }
    writeln!(w, "    magic number is valid")?;
    writeln!(w, "    {} blocks", sb.blocks)?;
    writeln!(w, "    {} inode blocks", sb.inode_blocks)?;
    writeln!(w, "    {} inodes", sb.inodes)?;

    let mut iblock = [0u8; BLOCK_SIZE];
    for bno in 1..=sb.inode_blocks {
        disk.read(bno, &mut buf)?;
        for slot in 0..INODES_PER_BLOCK {
            let inode = Inode::decode(&buf, slot);
            if !inode.valid {
                continue;
            }
            let inumber = (bno - 1) * INODES_PER_BLOCK as u32 + slot as u32;
            writeln!(w, "inode {inumber}:")?;
            writeln!(w, "    size: {} bytes", inode.size)?;
            write!(w, "    direct blocks:")?;
            for ptr in inode.direct.iter().flatten() {
                write!(w, " {ptr}")?;
            }
            writeln!(w)?;
            if let Some(ind) = inode.indirect {
                writeln!(w, "    indirect block: {ind}")?;
                disk.read(ind.get(), &mut iblock)?;
                write!(w, "    indirect data blocks:")?;
                for idx in 0..POINTERS_PER_BLOCK {
                    if let Some(ptr) = pointer(&iblock, idx) {
                        write!(w, " {ptr}")?;
                    }
                }
                writeln!(w)?;
            }
        }
    }
    Ok(())
}

/// A mounted filesystem.
///
/// Mounting takes ownership of the device; unmounting gives it
/// back.  All file state other than the free-block map lives on
/// the device, and every operation persists its own changes
/// before returning.
pub struct FileSystem<D> {
    disk: D,
    blocks: u32,
    inode_blocks: u32,
    inodes: u32,
    free: FreeMap,
}

impl<D: Disk> FileSystem<D> {
    /// Mounts the filesystem on `disk`, validating the
    /// superblock and rebuilding the free-block map from the
    /// inode table.
    pub fn mount(disk: D) -> Result<FileSystem<D>> {
        let mut buf = [0u8; BLOCK_SIZE];
        disk.read(0, &mut buf)?;
        let sb = SuperBlock::decode(&buf);
        if sb.magic != MAGIC {
            return Err(Error::InvMagic);
        }
        if sb.blocks <= 1
            || sb.inode_blocks > sb.blocks.div_ceil(10)
            || sb.inode_blocks as u64 * INODES_PER_BLOCK as u64
                != sb.inodes as u64
        {
            return Err(Error::InvSuperBlock);
        }

        let mut free = FreeMap::new(sb.blocks);
        for bno in 1 + sb.inode_blocks..sb.blocks {
            free.mark_free(bno);
        }

        // Claim every block a valid inode references.  A pointer
        // outside the device is corruption; it is skipped so the
        // rest of the table still mounts.
        let mut iblock = [0u8; BLOCK_SIZE];
        for bno in 1..=sb.inode_blocks {
            disk.read(bno, &mut buf)?;
            for slot in 0..INODES_PER_BLOCK {
                let inode = Inode::decode(&buf, slot);
                if !inode.valid {
                    continue;
                }
                for ptr in inode.direct.iter().flatten() {
                    if ptr.get() < sb.blocks {
                        free.mark_used(ptr.get());
                    }
                }
                if let Some(ind) = inode.indirect {
                    if ind.get() >= sb.blocks {
                        continue;
                    }
                    free.mark_used(ind.get());
                    disk.read(ind.get(), &mut iblock)?;
                    for idx in 0..POINTERS_PER_BLOCK {
                        if let Some(ptr) = pointer(&iblock, idx) {
                            if ptr.get() < sb.blocks {
                                free.mark_used(ptr.get());
                            }
                        }
                    }
                }
            }
        }

        Ok(FileSystem {
            disk,
            blocks: sb.blocks,
            inode_blocks: sb.inode_blocks,
            inodes: sb.inodes,
            free,
        })
    }

    /// Unmounts the filesystem, returning the device.
    pub fn unmount(self) -> D {
        self.disk
    }

    /// Returns the total number of blocks on the device.
    pub fn block_count(&self) -> u32 {
        self.blocks
    }

    /// Returns the number of blocks in the inode table.
    pub fn inode_blocks(&self) -> u32 {
        self.inode_blocks
    }

    /// Returns the number of inode slots in the table.
    pub fn inode_count(&self) -> u32 {
        self.inodes
    }

    /// Returns the first block of the data region.
    pub fn data_block_start(&self) -> u32 {
        1 + self.inode_blocks
    }

    /// Returns the number of unallocated data blocks.
    pub fn free_data_blocks(&self) -> u32 {
        self.free.free_count()
    }

    /// Allocates the lowest-numbered free inode slot and returns
    /// its inode number.
    pub fn create(&mut self) -> Result<u32> {
        let mut buf = [0u8; BLOCK_SIZE];
        for bno in 1..=self.inode_blocks {
            self.disk.read(bno, &mut buf)?;
            for slot in 0..INODES_PER_BLOCK {
                if Inode::decode(&buf, slot).valid {
                    continue;
                }
                let inode = Inode {
                    valid: true,
                    ..Inode::default()
                };
                inode.encode(&mut buf, slot);
                self.disk.write(bno, &buf)?;
                return Ok((bno - 1) * INODES_PER_BLOCK as u32 + slot as u32);
            }
        }
        Err(Error::NoFreeInode)
    }

    /// Destroys a file, releasing every block it references.
    /// The freed blocks keep their contents until reallocated.
    pub fn remove(&mut self, inumber: u32) -> Result<()> {
        let mut inode = self.load_inode(inumber)?;
        if !inode.valid {
            return Err(Error::InvInode);
        }
        for slot in inode.direct.iter_mut() {
            if let Some(ptr) = slot.take() {
                self.release(ptr.get());
            }
        }
        if let Some(ind) = inode.indirect.take() {
            if ind.get() < self.blocks {
                let mut iblock = [0u8; BLOCK_SIZE];
                self.disk.read(ind.get(), &mut iblock)?;
                for idx in 0..POINTERS_PER_BLOCK {
                    if let Some(ptr) = pointer(&iblock, idx) {
                        self.release(ptr.get());
                    }
                }
            }
            self.release(ind.get());
        }
        inode.valid = false;
        inode.size = 0;
        self.store_inode(inumber, &inode)
    }

    /// Returns the size in bytes of the file at `inumber`.
    pub fn stat(&self, inumber: u32) -> Result<u32> {
        let inode = self.load_inode(inumber)?;
        if !inode.valid {
            return Err(Error::InvInode);
        }
        Ok(inode.size)
    }

    /// Reads from the file at `inumber`, starting at byte
    /// `offset`, into `buf`.  Returns the number of bytes read,
    /// which is short when the file ends before `buf` is full;
    /// a read starting at or past the end of the file reads
    /// nothing.
    pub fn read(
        &self,
        inumber: u32,
        buf: &mut [u8],
        offset: u32,
    ) -> Result<usize> {
        let inode = self.load_inode(inumber)?;
        if !inode.valid {
            return Err(Error::InvInode);
        }
        // A recorded size beyond what the pointer structure can
        // address is corruption; the excess is unreadable.
        let size = (inode.size as usize).min(MAX_FILE_SIZE);
        let offset = offset as usize;
        if offset >= size {
            return Ok(0);
        }
        let length = buf.len().min(size - offset);
        if length == 0 {
            return Ok(0);
        }

        // Every block the read touches must be assigned; a file
        // with a hole under its recorded size is corrupt.
        let mut iblock = [0u8; BLOCK_SIZE];
        if (offset + length - 1) / BLOCK_SIZE >= POINTERS_PER_INODE {
            let ind = inode.indirect.ok_or(Error::NoIndirect)?;
            self.disk.read(ind.get(), &mut iblock)?;
        }

        let mut nread = 0;
        let mut data = [0u8; BLOCK_SIZE];
        while nread < length {
            let pos = offset + nread;
            let k = pos / BLOCK_SIZE;
            let bno = if k < POINTERS_PER_INODE {
                inode.direct[k]
            } else {
                pointer(&iblock, k - POINTERS_PER_INODE)
            }
            .ok_or(Error::Unassigned)?;
            self.disk.read(bno.get(), &mut data)?;
            let boff = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - boff).min(length - nread);
            buf[nread..nread + n].copy_from_slice(&data[boff..boff + n]);
            nread += n;
        }
        Ok(nread)
    }

    /// Writes `buf` into the file at `inumber`, starting at byte
    /// `offset`, allocating data blocks (and the indirect block)
    /// as the file grows.  `offset` may not exceed the current
    /// file size.  Returns the number of bytes written, which is
    /// short when the data region fills or the file reaches its
    /// maximum size; running out of space is not an error.
    pub fn write(
        &mut self,
        inumber: u32,
        buf: &[u8],
        offset: u32,
    ) -> Result<usize> {
        let mut inode = self.load_inode(inumber)?;
        if !inode.valid {
            return Err(Error::InvInode);
        }
        let offset = offset as usize;
        if offset > inode.size as usize {
            return Err(Error::Offset);
        }
        let length = buf.len().min(MAX_FILE_SIZE.saturating_sub(offset));

        let mut inode_dirty = false;
        let mut iblock = [0u8; BLOCK_SIZE];
        let mut iblock_loaded = false;
        let mut iblock_dirty = false;
        let mut written = 0;
        let mut data = [0u8; BLOCK_SIZE];

        while written < length {
            let pos = offset + written;
            let k = pos / BLOCK_SIZE;
            let bno = if k < POINTERS_PER_INODE {
                match inode.direct[k] {
                    Some(ptr) => ptr,
                    None => {
                        let Some(ptr) = self.allocate_block()? else {
                            break;
                        };
                        inode.direct[k] = Some(ptr);
                        inode_dirty = true;
                        ptr
                    }
                }
            } else {
                if inode.indirect.is_none() {
                    let Some(ptr) = self.allocate_block()? else {
                        break;
                    };
                    inode.indirect = Some(ptr);
                    inode_dirty = true;
                    // The allocator zeroed the block on the
                    // device, so the pointer array starts out
                    // all unassigned.
                    iblock.fill(0);
                    iblock_loaded = true;
                }
                if !iblock_loaded {
                    if let Some(ind) = inode.indirect {
                        self.disk.read(ind.get(), &mut iblock)?;
                    }
                    iblock_loaded = true;
                }
                let idx = k - POINTERS_PER_INODE;
                match pointer(&iblock, idx) {
                    Some(ptr) => ptr,
                    None => {
                        let Some(ptr) = self.allocate_block()? else {
                            break;
                        };
                        set_pointer(&mut iblock, idx, Some(ptr));
                        iblock_dirty = true;
                        ptr
                    }
                }
            };

            let boff = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - boff).min(length - written);
            if n < BLOCK_SIZE {
                self.disk.read(bno.get(), &mut data)?;
            }
            data[boff..boff + n].copy_from_slice(&buf[written..written + n]);
            self.disk.write(bno.get(), &data)?;
            written += n;
        }

        let new_size = (inode.size as usize).max(offset + written) as u32;
        if new_size != inode.size {
            inode.size = new_size;
            inode_dirty = true;
        }
        if inode_dirty {
            self.store_inode(inumber, &inode)?;
        }
        if iblock_dirty {
            if let Some(ind) = inode.indirect {
                self.disk.write(ind.get(), &iblock)?;
            }
        }
        Ok(written)
    }

    /// Loads the inode record for `inumber` from the table.
    fn load_inode(&self, inumber: u32) -> Result<Inode> {
        if inumber >= self.inodes {
            return Err(Error::InodeRange);
        }
        let (bno, slot) = Inode::location(inumber);
        let mut buf = [0u8; BLOCK_SIZE];
        self.disk.read(bno, &mut buf)?;
        Ok(Inode::decode(&buf, slot))
    }

    /// Writes the inode record for `inumber` back to the table.
    fn store_inode(&mut self, inumber: u32, inode: &Inode) -> Result<()> {
        let (bno, slot) = Inode::location(inumber);
        let mut buf = [0u8; BLOCK_SIZE];
        self.disk.read(bno, &mut buf)?;
        inode.encode(&mut buf, slot);
        self.disk.write(bno, &buf)
    }

    /// Claims the first free data block and zeroes it on the
    /// device.  Returns `None` when the data region is full.
    fn allocate_block(&mut self) -> Result<Option<NonZeroU32>> {
        let Some(bno) = self.free.first_free(self.data_block_start()..self.blocks)
        else {
            return Ok(None);
        };
        self.free.mark_used(bno);
        self.disk.write(bno, &[0u8; BLOCK_SIZE])?;
        // The data region starts past the superblock, so an
        // allocated block number is never zero.
        Ok(NonZeroU32::new(bno))
    }

    /// Returns a block to the free map.  Out-of-device block
    /// numbers are corruption in the record being torn down and
    /// are ignored.
    fn release(&mut self, bno: u32) {
        if bno < self.blocks {
            self.free.mark_free(bno);
        }
    }
}
