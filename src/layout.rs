// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-disk format.
//!
//! The filesystem occupies a device of fixed-size blocks:
//!
//! ```text
//! +------------+----------------------+---------------------------+
//! | superblock | inode table          | data region               |
//! | block 0    | blocks 1 ..= itab    | blocks 1+itab .. total    |
//! +------------+----------------------+---------------------------+
//! ```
//!
//! The superblock records the geometry; the inode table holds
//! fixed-size inode records; everything after it is data.  A data
//! block is either raw file contents or an indirect block (an
//! array of block numbers) — nothing in the block itself says
//! which, its role is determined solely by how it is referenced.
//!
//! All on-disk integers are little-endian `u32`s.  Block number
//! zero is the superblock and can never be the target of a file
//! pointer, so a zero pointer universally means "unassigned";
//! in memory that rule is carried by `Option<NonZeroU32>`.
//!
//! Rather than overlaying structs on raw storage, this module
//! decodes and encodes records explicitly, word by word, from a
//! single block-sized buffer.

use core::num::NonZeroU32;
use static_assertions::const_assert;

/// The size of a filesystem block, in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Magic number identifying the filesystem in the superblock.
pub const MAGIC: u32 = 0xf0f0_3410;

/// Number of inode records in each inode-table block.
pub const INODES_PER_BLOCK: usize = 128;

/// Number of direct block pointers held inline in an inode.
pub const POINTERS_PER_INODE: usize = 5;

/// Number of block pointers in an indirect block.
pub const POINTERS_PER_BLOCK: usize = 1024;

/// Size of an encoded inode record, in bytes.
pub const INODE_SIZE: usize = 32;

/// The largest file the pointer structure can address: the
/// direct pointers plus one fully-populated indirect block.
pub const MAX_FILE_SIZE: usize =
    BLOCK_SIZE * (POINTERS_PER_INODE + POINTERS_PER_BLOCK);

const_assert!(INODE_SIZE * INODES_PER_BLOCK == BLOCK_SIZE);
const_assert!(POINTERS_PER_BLOCK * size_of::<u32>() == BLOCK_SIZE);
const_assert!(INODE_SIZE == (3 + POINTERS_PER_INODE) * size_of::<u32>());

/// One device block's worth of bytes.
pub type Block = [u8; BLOCK_SIZE];

/// Reads the little-endian `u32` at byte offset `off`.
fn get_u32(b: &Block, off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

/// Writes `val` as a little-endian `u32` at byte offset `off`.
fn put_u32(b: &mut Block, off: usize, val: u32) {
    b[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

/// The superblock, block 0 of the device.
///
/// `inodes` is redundant with `inode_blocks` (there are
/// [`INODES_PER_BLOCK`] inodes per table block); mount rejects a
/// superblock where the two disagree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SuperBlock {
    pub magic: u32,
    pub blocks: u32,
    pub inode_blocks: u32,
    pub inodes: u32,
}

impl SuperBlock {
    /// Decodes the superblock from a block buffer.
    pub fn decode(b: &Block) -> SuperBlock {
        SuperBlock {
            magic: get_u32(b, 0),
            blocks: get_u32(b, 4),
            inode_blocks: get_u32(b, 8),
            inodes: get_u32(b, 12),
        }
    }

    /// Encodes the superblock into a block buffer.  The bytes
    /// beyond the four geometry words are reserved and zeroed.
    pub fn encode(&self, b: &mut Block) {
        b.fill(0);
        put_u32(b, 0, self.magic);
        put_u32(b, 4, self.blocks);
        put_u32(b, 8, self.inode_blocks);
        put_u32(b, 12, self.inodes);
    }
}

/// An inode record: one file, described by its length in bytes
/// and the data blocks backing it.
///
/// The first [`POINTERS_PER_INODE`] blocks of a file are
/// addressed directly; the remainder through a single indirect
/// block allocated from the data region.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Inode {
    pub valid: bool,
    pub size: u32,
    pub direct: [Option<NonZeroU32>; POINTERS_PER_INODE],
    pub indirect: Option<NonZeroU32>,
}

impl Inode {
    /// Decodes the `slot`th inode record in an inode-table block.
    pub fn decode(b: &Block, slot: usize) -> Inode {
        assert!(slot < INODES_PER_BLOCK);
        let base = slot * INODE_SIZE;
        let mut direct = [None; POINTERS_PER_INODE];
        for (k, d) in direct.iter_mut().enumerate() {
            *d = NonZeroU32::new(get_u32(b, base + 8 + 4 * k));
        }
        Inode {
            valid: get_u32(b, base) != 0,
            size: get_u32(b, base + 4),
            direct,
            indirect: NonZeroU32::new(get_u32(b, base + 8 + 4 * POINTERS_PER_INODE)),
        }
    }

    /// Encodes this inode into the `slot`th record of an
    /// inode-table block, leaving the other records untouched.
    pub fn encode(&self, b: &mut Block, slot: usize) {
        assert!(slot < INODES_PER_BLOCK);
        let base = slot * INODE_SIZE;
        put_u32(b, base, self.valid as u32);
        put_u32(b, base + 4, self.size);
        for (k, d) in self.direct.iter().enumerate() {
            put_u32(b, base + 8 + 4 * k, d.map_or(0, NonZeroU32::get));
        }
        put_u32(
            b,
            base + 8 + 4 * POINTERS_PER_INODE,
            self.indirect.map_or(0, NonZeroU32::get),
        );
    }

    /// Returns the (device block, slot) coordinates of an inode
    /// number within the inode table.
    pub fn location(inumber: u32) -> (u32, usize) {
        let per = INODES_PER_BLOCK as u32;
        (1 + inumber / per, (inumber % per) as usize)
    }
}

/// Reads entry `idx` of a block viewed as an indirect pointer
/// array.
pub fn pointer(b: &Block, idx: usize) -> Option<NonZeroU32> {
    assert!(idx < POINTERS_PER_BLOCK);
    NonZeroU32::new(get_u32(b, 4 * idx))
}

/// Writes entry `idx` of a block viewed as an indirect pointer
/// array.
pub fn set_pointer(b: &mut Block, idx: usize, ptr: Option<NonZeroU32>) {
    assert!(idx < POINTERS_PER_BLOCK);
    put_u32(b, 4 * idx, ptr.map_or(0, NonZeroU32::get));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bno(n: u32) -> Option<NonZeroU32> {
        NonZeroU32::new(n)
    }

    #[test]
    fn superblock_byte_layout() {
        let sb = SuperBlock {
            magic: MAGIC,
            blocks: 100,
            inode_blocks: 10,
            inodes: 1280,
        };
        let mut b = [0xaau8; BLOCK_SIZE];
        sb.encode(&mut b);
        assert_eq!(&b[..4], &[0x10, 0x34, 0xf0, 0xf0]);
        assert_eq!(&b[4..8], &[100, 0, 0, 0]);
        assert_eq!(&b[8..12], &[10, 0, 0, 0]);
        assert_eq!(&b[12..16], &[0, 5, 0, 0]);
        assert!(b[16..].iter().all(|&x| x == 0));
        assert_eq!(SuperBlock::decode(&b), sb);
    }

    #[test]
    fn inode_byte_layout() {
        let inode = Inode {
            valid: true,
            size: 24576,
            direct: [bno(11), bno(12), bno(13), bno(14), bno(15)],
            indirect: bno(16),
        };
        let mut b = [0u8; BLOCK_SIZE];
        inode.encode(&mut b, 3);
        // Record 3 spans bytes 96..128: valid, size, five direct
        // pointers, indirect pointer.
        assert_eq!(get_u32(&b, 96), 1);
        assert_eq!(get_u32(&b, 100), 24576);
        assert_eq!(get_u32(&b, 104), 11);
        assert_eq!(get_u32(&b, 120), 15);
        assert_eq!(get_u32(&b, 124), 16);
        assert!(b[..96].iter().all(|&x| x == 0));
        assert!(b[128..].iter().all(|&x| x == 0));
        assert_eq!(Inode::decode(&b, 3), inode);
        assert_eq!(Inode::decode(&b, 2), Inode::default());
    }

    #[test]
    fn inode_location() {
        assert_eq!(Inode::location(0), (1, 0));
        assert_eq!(Inode::location(127), (1, 127));
        assert_eq!(Inode::location(128), (2, 0));
        assert_eq!(Inode::location(1279), (10, 127));
    }

    #[test]
    fn pointer_entries() {
        let mut b = [0u8; BLOCK_SIZE];
        set_pointer(&mut b, 0, bno(17));
        set_pointer(&mut b, 1023, bno(99));
        assert_eq!(pointer(&b, 0), bno(17));
        assert_eq!(pointer(&b, 1), None);
        assert_eq!(pointer(&b, 1023), bno(99));
        assert_eq!(&b[4092..], &[99, 0, 0, 0]);
        set_pointer(&mut b, 0, None);
        assert_eq!(pointer(&b, 0), None);
    }
}
