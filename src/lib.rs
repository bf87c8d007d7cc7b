// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simple block-structured filesystem.
//!
//! This crate implements a small Unix-style filesystem of the
//! classic inode design [RitTho74] over any fixed-geometry
//! block device: a superblock, a table of fixed-size inodes,
//! and a data region addressed through direct and
//! single-indirect block pointers.  Files are named by inode
//! number; there is no directory layer, and no journaling or
//! crash consistency.  Free-block state lives only in memory
//! and is reconstructed from the inode table on every mount.
//!
//! The [`Disk`] trait is the boundary to the backing store;
//! [`MemDisk`] is a memory-backed device suitable for tests and
//! ramdisk use.  [`format`] initializes a device, [`debug`]
//! renders a report of its structures, and [`FileSystem`] is
//! the mounted engine.
//!
//! References:
//!
//! [RitTho74] Dennis M Ritchie and Ken Thompson. 1974. ``The
//! UNIX Time-Sharing System''. Communications of the ACM 17, 7
//! (July 1974), 365-375. https://doi.org/10.1145/361011.361061

#![cfg_attr(not(any(test, clippy)), no_std)]
#![forbid(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod disk;
pub mod fs;
pub mod layout;
pub mod result;

pub use disk::{Disk, MemDisk};
pub use fs::{FileSystem, debug, format};
pub use result::{Error, Result};
