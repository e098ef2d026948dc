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

//! Facts about whole folders: summary validity, size, and free space.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;

use log::warn;

use super::Store;
use crate::model::{FolderId, SummaryStamp};
use crate::support::error::Error;

/// mbox files are kept below this size when large files are disallowed,
/// leaving some headroom below 4GiB for tools that use 32-bit offsets.
const MAX_SMALL_MBOX_SIZE: u64 = 0xFFC0_0000;

impl Store {
    /// The current size and modification time of the mbox of `folder`.
    pub fn summary_stamp(
        &self,
        folder: FolderId,
    ) -> Result<SummaryStamp, Error> {
        let md = match fs::metadata(self.mbox_path(folder)?) {
            Ok(md) => md,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Err(Error::NxFolder)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(SummaryStamp {
            folder_size: md.len(),
            folder_date: md.mtime() as u32,
            valid: true,
        })
    }

    /// Determine whether the index summary described by `stamp` still
    /// matches the mbox of `folder`.
    ///
    /// The sizes must match exactly. The modification times may differ by
    /// up to the configured leeway. An empty summary of an empty mbox is
    /// always valid. A missing mbox is treated as empty.
    pub fn is_summary_file_valid(
        &self,
        folder: FolderId,
        stamp: &SummaryStamp,
    ) -> Result<bool, Error> {
        if !stamp.valid {
            return Ok(false);
        }

        let actual = match self.summary_stamp(folder) {
            Ok(actual) => actual,
            Err(Error::NxFolder) => SummaryStamp::default(),
            Err(e) => return Err(e),
        };

        if actual.folder_size != stamp.folder_size {
            return Ok(false);
        }
        if 0 == actual.folder_size {
            return Ok(true);
        }

        let leeway = self.config.timestamp_leeway_secs;
        if 0 == leeway {
            Ok(actual.folder_date == stamp.folder_date)
        } else {
            let delta =
                (i64::from(actual.folder_date) - i64::from(stamp.folder_date))
                    .abs();
            Ok(delta <= i64::from(leeway))
        }
    }

    /// Mark `stamp` as matching (if `valid`) or not matching the current
    /// state of the mbox of `folder`.
    ///
    /// Fails with `NxFolder` if the mbox does not exist.
    pub fn set_summary_file_valid(
        &self,
        folder: FolderId,
        stamp: &mut SummaryStamp,
        valid: bool,
    ) -> Result<(), Error> {
        let actual = self.summary_stamp(folder)?;
        if valid {
            *stamp = actual;
        } else {
            stamp.valid = false;
        }
        Ok(())
    }

    /// The size of the mbox of `folder`, or 0 for the root or a folder
    /// whose mbox does not exist.
    pub fn estimate_folder_size(&self, folder: FolderId) -> Result<u64, Error> {
        if self.folders().get(folder)?.parent.is_none() {
            return Ok(0);
        }

        match self.summary_stamp(folder) {
            Ok(stamp) => Ok(stamp.folder_size),
            Err(Error::NxFolder) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Check whether `requested` more bytes can be appended to `folder`.
    ///
    /// Fails with `FileTooBig` if large mbox files are disallowed and the
    /// mbox would grow past the limit, or with `NoSpace` if the file system
    /// does not have the room.
    pub fn has_space_available(
        &self,
        folder: FolderId,
        requested: u64,
    ) -> Result<(), Error> {
        let path = self.mbox_path(folder)?;

        if !self.config.allow_mbox_over_4gb {
            let size = self.estimate_folder_size(folder)?;
            if size.saturating_add(requested) >= MAX_SMALL_MBOX_SIZE {
                warn!(
                    "{} Appending {} bytes to '{}' ({} bytes) would exceed \
                     the mbox size limit",
                    self.log_prefix,
                    requested,
                    path.display(),
                    size
                );
                return Err(Error::FileTooBig);
            }
        }

        let dir = path.parent().unwrap_or(&self.root);
        let stat = nix::sys::statvfs::statvfs(dir)?;
        let available = u64::from(stat.blocks_available())
            .saturating_mul(u64::from(stat.fragment_size()));
        if available < requested {
            warn!(
                "{} Only {} bytes free for '{}', need {}",
                self.log_prefix,
                available,
                path.display(),
                requested
            );
            return Err(Error::NoSpace);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::test_prelude::*;
    use super::*;

    #[test]
    fn summary_validity() {
        let setup = set_up();
        let store = &setup.store;
        let folder = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        append(store, folder, b"Subject: x\r\n\r\n");

        let stamp = store.summary_stamp(folder).unwrap();
        assert!(stamp.valid);
        assert!(stamp.folder_size > 0);
        assert!(store.is_summary_file_valid(folder, &stamp).unwrap());

        let mut near = stamp;
        near.folder_date += 30;
        assert!(store.is_summary_file_valid(folder, &near).unwrap());
        near.folder_date = stamp.folder_date - 60;
        assert!(store.is_summary_file_valid(folder, &near).unwrap());

        let mut far = stamp;
        far.folder_date += 61;
        assert!(!store.is_summary_file_valid(folder, &far).unwrap());

        let mut resized = stamp;
        resized.folder_size += 1;
        assert!(!store.is_summary_file_valid(folder, &resized).unwrap());

        let mut invalid = stamp;
        store
            .set_summary_file_valid(folder, &mut invalid, false)
            .unwrap();
        assert!(!invalid.valid);
        assert!(!store.is_summary_file_valid(folder, &invalid).unwrap());
        store
            .set_summary_file_valid(folder, &mut invalid, true)
            .unwrap();
        assert_eq!(stamp, invalid);
    }

    #[test]
    fn exact_timestamps_without_leeway() {
        let setup = set_up_with(StoreConfig {
            timestamp_leeway_secs: 0,
            ..StoreConfig::default()
        });
        let store = &setup.store;
        let folder = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        append(store, folder, b"Subject: x\r\n\r\n");

        let stamp = store.summary_stamp(folder).unwrap();
        assert!(store.is_summary_file_valid(folder, &stamp).unwrap());
        let mut off = stamp;
        off.folder_date += 1;
        assert!(!store.is_summary_file_valid(folder, &off).unwrap());
    }

    #[test]
    fn empty_and_missing_mboxes() {
        let setup = set_up();
        let store = &setup.store;
        let folder = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();

        let empty = SummaryStamp {
            folder_size: 0,
            folder_date: 12345,
            valid: true,
        };
        assert!(store.is_summary_file_valid(folder, &empty).unwrap());
        assert_eq!(0, store.estimate_folder_size(folder).unwrap());
        assert_eq!(0, store.estimate_folder_size(FolderTree::ROOT).unwrap());

        std::fs::remove_file(store.mbox_path(folder).unwrap()).unwrap();
        assert!(store.is_summary_file_valid(folder, &empty).unwrap());
        assert_eq!(0, store.estimate_folder_size(folder).unwrap());
        let mut stamp = empty;
        assert_matches!(
            Err(Error::NxFolder),
            store.set_summary_file_valid(folder, &mut stamp, true)
        );
        assert_matches!(Err(Error::NxFolder), store.summary_stamp(folder));
    }

    #[test]
    fn size_estimate_tracks_appends() {
        let setup = set_up();
        let store = &setup.store;
        let folder = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        append(store, folder, b"Subject: x\r\n\r\n");
        let len = std::fs::metadata(store.mbox_path(folder).unwrap())
            .unwrap()
            .len();
        assert_eq!(len, store.estimate_folder_size(folder).unwrap());
    }

    #[test]
    fn space_checks() {
        let setup = set_up();
        let store = &setup.store;
        let folder = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();

        store.has_space_available(folder, 1024).unwrap();
        assert_matches!(
            Err(Error::NoSpace),
            store.has_space_available(folder, u64::MAX)
        );
        assert_matches!(
            Err(Error::RootFolder),
            store.has_space_available(FolderTree::ROOT, 1)
        );

        let setup = set_up_with(StoreConfig {
            allow_mbox_over_4gb: false,
            ..StoreConfig::default()
        });
        let store = &setup.store;
        let folder = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        store.has_space_available(folder, 1024).unwrap();
        assert_matches!(
            Err(Error::FileTooBig),
            store.has_space_available(folder, MAX_SMALL_MBOX_SIZE)
        );
    }
}
