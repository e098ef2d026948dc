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

//! Tracking of which folders currently have a message being written or a
//! compaction running.
//!
//! A folder has at most one slot. Opening a second writer forcibly rolls back
//! the first one, since leaving it in place would interleave two messages;
//! the loser's later writes then fail with `StreamClosed`. A compaction
//! cannot share its folder with anything.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::mbox::output::MboxMsgOutputStream;
use crate::model::FolderId;
use crate::support::error::Error;

pub type SharedStream = Arc<Mutex<MboxMsgOutputStream<fs::File>>>;

enum Slot {
    Writing { id: u64, stream: SharedStream },
    Compacting,
}

#[derive(Default)]
pub struct OutstandingTable {
    slots: Mutex<HashMap<FolderId, Slot>>,
    next_id: AtomicU64,
}

impl OutstandingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new writer for `folder`.
    ///
    /// Any existing writer is rolled back first. `open` is invoked with the
    /// table locked, after that rollback, so the stream it creates starts
    /// where the previous writer did.
    ///
    /// Returns the slot id, which is needed to release the slot later, along
    /// with the stream itself.
    pub fn install_writer(
        &self,
        folder: FolderId,
        open: impl FnOnce() -> Result<MboxMsgOutputStream<fs::File>, Error>,
    ) -> Result<(u64, SharedStream), Error> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&folder) {
            None => (),
            Some(&Slot::Compacting) => return Err(Error::FolderBusy),
            Some(&Slot::Writing { ref stream, .. }) => {
                error!(
                    "Folder {:?} already has a message being written; \
                     forcing it to roll back",
                    folder
                );
                if let Err(e) = stream.lock().unwrap().close() {
                    warn!("Rolling back previous writer failed: {}", e);
                }
            }
        }

        let stream = Arc::new(Mutex::new(open()?));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            folder,
            Slot::Writing {
                id,
                stream: Arc::clone(&stream),
            },
        );
        Ok((id, stream))
    }

    /// Release the slot of `folder` if it still belongs to writer `id`.
    ///
    /// Returns whether anything was released.
    pub fn release_writer(&self, folder: FolderId, id: u64) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&folder) {
            Some(&Slot::Writing { id: current, .. }) if current == id => {
                slots.remove(&folder);
                true
            }
            _ => false,
        }
    }

    /// Claim `folder` for a compaction.
    ///
    /// Fails with `FolderBusy` if a writer or another compaction holds the
    /// folder. The claim is released when the guard is dropped.
    pub fn claim_compaction(
        self: &Arc<Self>,
        folder: FolderId,
    ) -> Result<CompactionGuard, Error> {
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(&folder) {
            return Err(Error::FolderBusy);
        }

        slots.insert(folder, Slot::Compacting);
        Ok(CompactionGuard {
            table: Arc::clone(self),
            folder,
        })
    }

    /// Whether any of `folders` has a writer or compaction in progress.
    pub fn any_busy(&self, folders: &[FolderId]) -> bool {
        let slots = self.slots.lock().unwrap();
        folders.iter().any(|f| slots.contains_key(f))
    }

    pub fn is_compacting(&self, folder: FolderId) -> bool {
        matches!(
            self.slots.lock().unwrap().get(&folder),
            Some(&Slot::Compacting)
        )
    }
}

/// Holds a folder's slot for the duration of a compaction.
pub struct CompactionGuard {
    table: Arc<OutstandingTable>,
    folder: FolderId,
}

impl Drop for CompactionGuard {
    fn drop(&mut self) {
        let mut slots = self.table.slots.lock().unwrap();
        if let Some(&Slot::Compacting) = slots.get(&self.folder) {
            slots.remove(&self.folder);
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;
    use crate::mbox::output::StreamState;

    fn open_at_end(file: &fs::File) -> MboxMsgOutputStream<fs::File> {
        let mut file = file.try_clone().unwrap();
        file.seek(SeekFrom::End(0)).unwrap();
        MboxMsgOutputStream::new(file).unwrap()
    }

    #[test]
    fn second_writer_rolls_back_first() {
        crate::init_test_log();

        let mut file = tempfile::tempfile().unwrap();
        let table = OutstandingTable::new();
        let folder = FolderId(1);

        let (first_id, first) =
            table.install_writer(folder, || Ok(open_at_end(&file))).unwrap();
        first.lock().unwrap().write_all(b"partial").unwrap();

        let (second_id, second) =
            table.install_writer(folder, || Ok(open_at_end(&file))).unwrap();
        assert_eq!(StreamState::Closed, first.lock().unwrap().state());
        assert_eq!(0, second.lock().unwrap().start_pos());
        assert_matches!(
            Err(Error::StreamClosed),
            first.lock().unwrap().write_data(b"more")
        );

        second.lock().unwrap().write_all(b"whole\n").unwrap();
        second.lock().unwrap().finish().unwrap();

        assert!(!table.release_writer(folder, first_id));
        assert!(table.any_busy(&[folder]));
        assert!(table.release_writer(folder, second_id));
        assert!(!table.any_busy(&[folder]));

        let mut content = String::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut content).unwrap();
        assert!(content.starts_with("From "));
        assert!(content.ends_with("\nwhole\n\r\n"));
        assert!(!content.contains("partial"));
    }

    #[test]
    fn compaction_excludes_writers() {
        let file = tempfile::tempfile().unwrap();
        let table = Arc::new(OutstandingTable::new());
        let folder = FolderId(1);

        let guard = table.claim_compaction(folder).unwrap();
        assert!(table.is_compacting(folder));
        assert_matches!(
            Some(Error::FolderBusy),
            table.install_writer(folder, || Ok(open_at_end(&file))).err()
        );
        assert_matches!(
            Some(Error::FolderBusy),
            table.claim_compaction(folder).err()
        );
        drop(guard);
        assert!(!table.is_compacting(folder));

        let (id, _stream) =
            table.install_writer(folder, || Ok(open_at_end(&file))).unwrap();
        assert_matches!(
            Some(Error::FolderBusy),
            table.claim_compaction(folder).err()
        );
        assert!(table.release_writer(folder, id));
        table.claim_compaction(folder).unwrap();
    }
}
