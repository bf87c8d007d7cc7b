// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Various errors
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Error {
    BlockRange,
    InvMagic,
    InvSuperBlock,
    InodeRange,
    InvInode,
    NoFreeInode,
    NoIndirect,
    Unassigned,
    Offset,
    Report,
}

impl Error {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockRange => "Block number out of device range",
            Self::InvMagic => "Bad magic number in superblock",
            Self::InvSuperBlock => "Inconsistent superblock geometry",
            Self::InodeRange => "Inode number out of range",
            Self::InvInode => "Inode is not valid",
            Self::NoFreeInode => "Inode table is full",
            Self::NoIndirect => {
                "File extends past the direct region but has no indirect block"
            }
            Self::Unassigned => "Unassigned block pointer inside a file",
            Self::Offset => "Write offset beyond end of file",
            Self::Report => "Error writing report",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> core::result::Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Error {
        Error::Report
    }
}

pub type Result<T> = core::result::Result<T, Error>;
