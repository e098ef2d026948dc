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

//! The message store.
//!
//! A store is a directory tree in which every folder is a single mbox file.
//! Child folders of a folder `F` live in the directory `F.sbd` next to it,
//! and the index keeps a summary file `F.msf` beside each mbox, which the
//! store moves and deletes along with the folder but never reads.
//!
//! Messages are identified by _store tokens_, which are simply the byte
//! offset of their envelope line within the mbox. Tokens are stable until
//! the folder is compacted, at which point the compactor hands the index a
//! map from old tokens to new ones.
//!
//! All mutation of an mbox goes through one of three paths:
//!
//! - Appending, via `get_new_msg_output_stream()`. At most one message per
//!   folder may be in flight; see `outstanding`.
//!
//! - In-place rewrites of the fixed-width status headers by
//!   `change_flags()` and `change_keywords()`. These never change the length
//!   of the file, so they are safe to perform alongside an append.
//!
//! - Compaction, which builds a new file and renames it over the old one
//!   while holding the folder exclusively.
//!
//! Nothing here takes OS-level file locks. The store assumes it is the only
//! process touching the directory tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use log::info;

use crate::model::FolderId;
use crate::support::error::Error;
use crate::support::file_ops;
use crate::support::log_prefix::LogPrefix;
use crate::support::store_config::StoreConfig;
use crate::support::threading::TaskQueue;

pub mod compact;
mod folders;
pub mod folder_tree;
mod messages;
pub mod outstanding;
pub mod scan;
mod summary;

pub use self::compact::{CompactListener, CompactSummary, Retention};
pub use self::folder_tree::FolderTree;
pub use self::messages::NewMessage;
pub use self::scan::{ScanListener, ScanSummary, ScannedMessage};

pub struct Store {
    root: PathBuf,
    config: StoreConfig,
    tree: RwLock<FolderTree>,
    outstanding: Arc<outstanding::OutstandingTable>,
    tasks: TaskQueue,
    missing_eol_repairs: AtomicU64,
    log_prefix: LogPrefix,
}

impl Store {
    /// Open the store rooted at `root`, creating the directory if needed,
    /// and discover the full folder hierarchy within it.
    pub fn open(root: PathBuf, config: StoreConfig) -> Result<Self, Error> {
        file_ops::ensure_dir(&root)?;

        let log_prefix = LogPrefix::new(root.display().to_string());
        let store = Store {
            tasks: TaskQueue::new(config.background_queue_limit),
            root,
            config,
            tree: RwLock::new(FolderTree::new()),
            outstanding: Arc::new(outstanding::OutstandingTable::new()),
            missing_eol_repairs: AtomicU64::new(0),
            log_prefix,
        };

        let found = store.discover_subfolders(FolderTree::ROOT, true)?;
        info!(
            "{} Opened store with {} folders",
            store.log_prefix,
            found.len()
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    /// Read access to the folder hierarchy.
    ///
    /// The guard must not be held across calls that modify folders.
    pub fn folders(&self) -> RwLockReadGuard<'_, FolderTree> {
        self.tree.read().unwrap()
    }

    /// Resolve a `/`-separated folder path.
    pub fn lookup(&self, full_name: &str) -> Result<FolderId, Error> {
        self.folders().lookup(full_name).ok_or(Error::NxFolder)
    }

    /// The number of times an append found the mbox not ending with a line
    /// ending and had to add one.
    ///
    /// Any non-zero value means something other than this store wrote to a
    /// folder, or a write was torn.
    pub fn missing_eol_repairs(&self) -> u64 {
        self.missing_eol_repairs.load(Ordering::Relaxed)
    }

    /// The path of the mbox file backing `folder`.
    pub fn mbox_path(&self, folder: FolderId) -> Result<PathBuf, Error> {
        self.folders().mbox_path(&self.root, folder)
    }

    fn folder_log_prefix(&self, task: &str, folder: FolderId) -> LogPrefix {
        let prefix = self.log_prefix.deep_clone();
        prefix.set_task(task);
        if let Ok(name) = self.folders().full_name(folder) {
            prefix.set_folder(&name);
        }
        prefix
    }
}

/// Open an existing mbox file for reading, mapping its absence to
/// `NxFolder`.
fn open_existing(path: &Path) -> Result<fs::File, Error> {
    use crate::support::file_ops::ErrorTransforms;
    fs::File::open(path).on_not_found(Error::NxFolder)
}

#[cfg(test)]
mod test_prelude {
    pub use std::io::{Read, Write};

    pub use chrono::prelude::*;

    pub use tempfile::TempDir;

    pub use super::*;
    pub use crate::mbox::envelope::Envelope;
    pub use crate::model::{MessageFlags, MessageRef, StoreToken};

    pub struct Setup {
        pub root: TempDir,
        pub store: Store,
    }

    pub fn set_up() -> Setup {
        set_up_with(StoreConfig::default())
    }

    pub fn set_up_with(config: StoreConfig) -> Setup {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let store = Store::open(root.path().to_owned(), config).unwrap();
        Setup { root, store }
    }

    /// Append a message with a fixed envelope and return its token.
    pub fn append(store: &Store, folder: FolderId, data: &[u8]) -> StoreToken {
        let mut msg = store.get_new_msg_output_stream(folder).unwrap();
        msg.set_envelope(Envelope::new(
            "sender@example.com",
            Some(Utc.ymd(2020, 7, 4).and_hms(13, 45, 56)),
        ))
        .unwrap();
        msg.write_all(data).unwrap();
        store.finish_new_message(msg).unwrap()
    }

    pub fn read(
        store: &Store,
        folder: FolderId,
        token: StoreToken,
    ) -> Vec<u8> {
        let mut stream = store
            .get_msg_input_stream(folder, &token.to_string(), None)
            .unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        data
    }
}
