//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mboxstore.
//
// Mboxstore is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mboxstore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mboxstore. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;

bitflags! {
    /// Per-message flags, as persisted in the `X-Mozilla-Status` (low 16
    /// bits) and `X-Mozilla-Status2` (high 16 bits) headers.
    #[derive(Default)]
    pub struct MessageFlags: u32 {
        const READ = 0x0000_0001;
        const REPLIED = 0x0000_0002;
        const MARKED = 0x0000_0004;
        const EXPUNGED = 0x0000_0008;
        const HAS_RE = 0x0000_0010;
        /// Only meaningful in memory; never written to disk.
        const ELIDED = 0x0000_0020;
        const FEED_MSG = 0x0000_0040;
        /// Tracked by the index rather than the mailbox.
        const OFFLINE = 0x0000_0080;
        const WATCHED = 0x0000_0100;
        const SENDER_AUTHED = 0x0000_0200;
        const PARTIAL = 0x0000_0400;
        const QUEUED = 0x0000_0800;
        const FORWARDED = 0x0000_1000;
        const PRIORITIES = 0x0000_E000;
        const NEW = 0x0001_0000;
        const IGNORED = 0x0004_0000;
        const IMAP_DELETED = 0x0020_0000;
        const MDN_REPORT_NEEDED = 0x0040_0000;
        const MDN_REPORT_SENT = 0x0080_0000;
        const TEMPLATE = 0x0100_0000;
        const LABELS = 0x0E00_0000;
        const ATTACHMENT = 0x1000_0000;

        const RUNTIME_ONLY = Self::ELIDED.bits;
    }
}

impl MessageFlags {
    /// The flags with everything that must not reach the disk removed.
    pub fn persistent(self) -> Self {
        self - MessageFlags::RUNTIME_ONLY - MessageFlags::OFFLINE
    }

    /// Apply a set/clear of `mask` the way a flag change request does.
    pub fn changed(self, mask: MessageFlags, set: bool) -> Self {
        let base = self.persistent();
        if set {
            base | mask
        } else {
            base - mask
        }
    }
}

/// Identifies a message within a folder: the byte offset of its envelope
/// line.
///
/// Tokens are exchanged with the index as decimal strings.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
pub struct StoreToken(pub u64);

impl StoreToken {
    pub fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoreToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::BadStoreToken);
        }

        s.parse::<u64>()
            .map(StoreToken)
            .map_err(|_| Error::BadStoreToken)
    }
}

/// Stable handle of a folder within a store's folder tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FolderId(pub usize);

/// A message as known to the index: where it is and what flags it has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRef {
    pub token: StoreToken,
    pub flags: MessageFlags,
}

/// The cached facts the index keeps about a folder file, used to decide
/// whether the index is still in sync with the mailbox without rescanning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStamp {
    pub folder_size: u64,
    /// Modification time of the mailbox, in seconds since the UNIX epoch.
    pub folder_date: u32,
    /// Cleared to force a rebuild regardless of size and date.
    pub valid: bool,
}
