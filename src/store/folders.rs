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

//! Creation, discovery, and rearrangement of folders.

use std::fs;
use std::io;
use std::path::Path;

use log::{error, info, warn};

use super::folder_tree::{with_suffix, FolderTree};
use super::Store;
use crate::model::FolderId;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms};
use crate::support::safe_name::{
    folder_file_name, SUBFOLDER_DIR_SUFFIX, SUMMARY_FILE_SUFFIX,
};

impl Store {
    /// Register folders found on disk beneath `parent`.
    ///
    /// Every regular file in the parent's subfolder directory is taken to be
    /// an mbox, except for summary files and hidden files. Folders already
    /// known are left as they are. If `deep`, subfolder directories of all
    /// children are searched too.
    ///
    /// Returns the ids of the newly registered folders.
    pub fn discover_subfolders(
        &self,
        parent: FolderId,
        deep: bool,
    ) -> Result<Vec<FolderId>, Error> {
        let mut tree = self.tree.write().unwrap();
        let mut found = Vec::new();
        discover_into(&mut tree, &self.root, parent, deep, &mut found)?;
        Ok(found)
    }

    /// Create a new, empty folder named `name` under `parent`.
    pub fn create_folder(
        &self,
        parent: FolderId,
        name: &str,
    ) -> Result<FolderId, Error> {
        if name.is_empty() {
            return Err(Error::UnsafeName);
        }

        let mut tree = self.tree.write().unwrap();
        let id = tree.insert(parent, name, &folder_file_name(name))?;

        let result = (|| -> Result<(), Error> {
            if FolderTree::ROOT != parent {
                file_ops::ensure_dir(tree.subfolder_dir(&self.root, parent)?)?;
            }

            let path = tree.mbox_path(&self.root, id)?;
            file_ops::create_new_file(&path).on_exists(Error::FolderExists)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!(
                    "{} Created folder '{}'",
                    self.log_prefix,
                    tree.full_name(id)?
                );
                Ok(id)
            }
            Err(e) => {
                tree.remove_subtree(id)?;
                Err(e)
            }
        }
    }

    /// Delete `folder` and all its descendants, along with their summary
    /// files.
    pub fn delete_folder(&self, folder: FolderId) -> Result<(), Error> {
        let mut tree = self.tree.write().unwrap();
        let subtree = tree.subtree(folder)?;
        if FolderTree::ROOT == folder {
            return Err(Error::RootFolder);
        }
        if self.outstanding.any_busy(&subtree) {
            return Err(Error::FolderBusy);
        }

        let name = tree.full_name(folder)?;
        file_ops::remove_any(&tree.subfolder_dir(&self.root, folder)?)?;
        file_ops::remove_any(&tree.summary_path(&self.root, folder)?)?;
        file_ops::remove_any(&tree.mbox_path(&self.root, folder)?)?;
        tree.remove_subtree(folder)?;

        info!("{} Deleted folder '{}'", self.log_prefix, name);
        Ok(())
    }

    /// Give `folder` a new name within the same parent.
    pub fn rename_folder(
        &self,
        folder: FolderId,
        new_name: &str,
    ) -> Result<(), Error> {
        if new_name.is_empty() {
            return Err(Error::UnsafeName);
        }

        let mut tree = self.tree.write().unwrap();
        let subtree = tree.subtree(folder)?;
        if self.outstanding.any_busy(&subtree) {
            return Err(Error::FolderBusy);
        }

        let old_name = tree.get(folder)?.name.clone();
        let old_file_name = tree.get(folder)?.file_name.clone();
        let old_mbox = tree.mbox_path(&self.root, folder)?;
        let new_file_name = folder_file_name(new_name);

        tree.rename(folder, new_name, &new_file_name)?;
        let new_mbox = tree.mbox_path(&self.root, folder)?;

        let result = (|| -> Result<(), Error> {
            if new_file_name != old_file_name && new_mbox.exists() {
                return Err(Error::FolderExists);
            }

            fs::rename(&old_mbox, &new_mbox)?;
            for suffix in &[SUMMARY_FILE_SUFFIX, SUBFOLDER_DIR_SUFFIX] {
                file_ops::rename_if_exists(
                    &with_suffix(old_mbox.clone(), suffix),
                    &with_suffix(new_mbox.clone(), suffix),
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!(
                    "{} Renamed folder '{}' to '{}'",
                    self.log_prefix, old_name, new_name
                );
                Ok(())
            }
            Err(e) => {
                tree.rename(folder, &old_name, &old_file_name)?;
                Err(e)
            }
        }
    }

    /// Copy `src` and all its descendants to be a child of `dst_parent`.
    ///
    /// The copy is named `new_name`, or the same as `src` if `None`. If
    /// `is_move`, the source is deleted once the copy is complete. If
    /// anything goes wrong, the partially built destination is removed and
    /// the source is left untouched.
    pub fn copy_folder(
        &self,
        src: FolderId,
        dst_parent: FolderId,
        new_name: Option<&str>,
        is_move: bool,
    ) -> Result<FolderId, Error> {
        let mut tree = self.tree.write().unwrap();
        let src_node = tree.get(src)?.clone();
        if src_node.parent.is_none() {
            return Err(Error::RootFolder);
        }
        if tree.is_within(dst_parent, src) {
            return Err(Error::FolderIntoItself);
        }

        let name = new_name.unwrap_or(&src_node.name).to_owned();
        if name.is_empty() {
            return Err(Error::UnsafeName);
        }

        let src_subtree = tree.subtree(src)?;
        if is_move && self.outstanding.any_busy(&src_subtree) {
            return Err(Error::FolderBusy);
        }

        let dst = graft_copy(&mut tree, src, dst_parent, &name)?;
        let src_mbox = tree.mbox_path(&self.root, src)?;
        let dst_mbox = tree.mbox_path(&self.root, dst)?;

        let result = (|| -> Result<(), Error> {
            if FolderTree::ROOT != dst_parent {
                file_ops::ensure_dir(
                    tree.subfolder_dir(&self.root, dst_parent)?,
                )?;
            }

            if dst_mbox.exists() {
                return Err(Error::FolderExists);
            }

            copy_file_or_create(&src_mbox, &dst_mbox)?;
            for suffix in &[SUMMARY_FILE_SUFFIX, SUBFOLDER_DIR_SUFFIX] {
                let from = with_suffix(src_mbox.clone(), suffix);
                if fs::symlink_metadata(&from).is_ok() {
                    file_ops::copy_tree(
                        &from,
                        &with_suffix(dst_mbox.clone(), suffix),
                    )?;
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            error!(
                "{} Copying folder '{}' failed, removing partial copy: {}",
                self.log_prefix, src_node.name, e
            );
            // Only remove what this call created; a pre-existing destination
            // file is what made it fail
            if !matches!(e, Error::FolderExists) {
                for suffix in &["", SUMMARY_FILE_SUFFIX, SUBFOLDER_DIR_SUFFIX] {
                    let path = with_suffix(dst_mbox.clone(), suffix);
                    if let Err(e) = file_ops::remove_any(&path) {
                        warn!(
                            "{} Failed to remove '{}': {}",
                            self.log_prefix,
                            path.display(),
                            e
                        );
                    }
                }
            }
            tree.remove_subtree(dst)?;
            return Err(e);
        }

        if is_move {
            file_ops::remove_any(&tree.subfolder_dir(&self.root, src)?)?;
            file_ops::remove_any(&tree.summary_path(&self.root, src)?)?;
            file_ops::remove_any(&src_mbox)?;
            tree.remove_subtree(src)?;
        }

        info!(
            "{} {} folder '{}' to '{}'",
            self.log_prefix,
            if is_move { "Moved" } else { "Copied" },
            src_node.name,
            tree.full_name(dst)?
        );
        Ok(dst)
    }
}

fn discover_into(
    tree: &mut FolderTree,
    root: &Path,
    parent: FolderId,
    deep: bool,
    found: &mut Vec<FolderId>,
) -> Result<(), Error> {
    let dir = tree.subfolder_dir(root, parent)?;
    let mut entries = match fs::read_dir(&dir) {
        Ok(it) => it.collect::<Result<Vec<_>, _>>()?,
        Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(n) => {
                warn!("Ignoring non-UTF-8 file name {:?}", n);
                continue;
            }
        };

        if file_name.starts_with('.')
            || file_name.ends_with(SUMMARY_FILE_SUFFIX)
            || file_name.ends_with(SUBFOLDER_DIR_SUFFIX)
            || !entry.file_type()?.is_file()
        {
            continue;
        }

        let existing = tree.children(parent)?.iter().copied().find(|&c| {
            tree.get(c).map_or(false, |n| n.file_name == file_name)
        });
        let child = match existing {
            Some(child) => child,
            None => {
                let child = tree.insert(parent, &file_name, &file_name)?;
                found.push(child);
                child
            }
        };

        if deep {
            discover_into(tree, root, child, deep, found)?;
        }
    }

    Ok(())
}

/// Insert a copy of the subtree at `src` as a child of `dst_parent` named
/// `name`, returning the id of the copy.
fn graft_copy(
    tree: &mut FolderTree,
    src: FolderId,
    dst_parent: FolderId,
    name: &str,
) -> Result<FolderId, Error> {
    let file_name = if tree.get(src)?.name == name {
        tree.get(src)?.file_name.clone()
    } else {
        folder_file_name(name)
    };

    let dst = tree.insert(dst_parent, name, &file_name)?;
    let children = tree.children(src)?.to_vec();
    for child in children {
        let child_name = tree.get(child)?.name.clone();
        if let Err(e) = graft_copy(tree, child, dst, &child_name) {
            tree.remove_subtree(dst)?;
            return Err(e);
        }
    }

    Ok(dst)
}

fn copy_file_or_create(src: &Path, dst: &Path) -> Result<(), Error> {
    match fs::metadata(src) {
        // fs::copy carries the permissions over as well
        Ok(_) => {
            fs::copy(src, dst)?;
        }
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            file_ops::create_new_file(dst)?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::PermissionsExt;

    use super::super::test_prelude::*;
    use super::*;

    #[test]
    fn create_and_rediscover() {
        let setup = set_up();
        let store = &setup.store;
        let root = setup.root.path();

        let inbox = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        let work = store.create_folder(inbox, "Work").unwrap();
        let odd = store.create_folder(FolderTree::ROOT, ".hidden").unwrap();

        assert!(root.join("Inbox").is_file());
        assert!(root.join("Inbox.sbd/Work").is_file());
        assert_eq!(
            0o600,
            fs::metadata(root.join("Inbox")).unwrap().permissions().mode()
                & 0o777
        );
        let odd_file = store.folders().get(odd).unwrap().file_name.clone();
        assert_ne!(".hidden", odd_file);
        assert!(root.join(&odd_file).is_file());
        assert_eq!(
            root.join("Inbox.sbd/Work"),
            store.mbox_path(work).unwrap()
        );

        // Things discovery must ignore
        fs::write(root.join("Inbox.msf"), b"summary").unwrap();
        fs::write(root.join(".dotfile"), b"").unwrap();
        fs::create_dir(root.join("Orphan.sbd")).unwrap();
        fs::write(root.join("Orphan.sbd/Lost"), b"").unwrap();

        let reopened =
            Store::open(root.to_owned(), StoreConfig::default()).unwrap();
        let tree = reopened.folders();
        let mut top = tree
            .children(FolderTree::ROOT)
            .unwrap()
            .iter()
            .map(|&c| tree.get(c).unwrap().name.clone())
            .collect::<Vec<_>>();
        top.sort();
        let mut expected = vec!["Inbox".to_owned(), odd_file];
        expected.sort();
        assert_eq!(expected, top);
        assert!(tree.lookup("Inbox/Work").is_some());

        // Discovering again finds nothing new
        drop(tree);
        assert!(reopened
            .discover_subfolders(FolderTree::ROOT, true)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn create_conflicts() {
        let setup = set_up();
        let store = &setup.store;

        store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        assert_matches!(
            Err(Error::FolderExists),
            store.create_folder(FolderTree::ROOT, "Inbox")
        );
        assert_matches!(
            Err(Error::UnsafeName),
            store.create_folder(FolderTree::ROOT, "")
        );

        // Present on disk but not registered
        fs::write(setup.root.path().join("Stray"), b"").unwrap();
        assert_matches!(
            Err(Error::FolderExists),
            store.create_folder(FolderTree::ROOT, "Stray")
        );
        assert_eq!(None, store.folders().lookup("Stray"));
        assert_matches!(
            Err(Error::NxFolder),
            store.create_folder(FolderId(999), "x")
        );
    }

    #[test]
    fn delete_removes_everything() {
        let setup = set_up();
        let store = &setup.store;
        let root = setup.root.path();

        let inbox = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        let work = store.create_folder(inbox, "Work").unwrap();
        fs::write(root.join("Inbox.msf"), b"summary").unwrap();

        let writer = store.get_new_msg_output_stream(work).unwrap();
        assert_matches!(Err(Error::FolderBusy), store.delete_folder(inbox));
        drop(writer);

        store.delete_folder(inbox).unwrap();
        assert!(!root.join("Inbox").exists());
        assert!(!root.join("Inbox.msf").exists());
        assert!(!root.join("Inbox.sbd").exists());
        assert!(!store.folders().contains(work));
        assert_matches!(Err(Error::NxFolder), store.delete_folder(inbox));
        assert_matches!(
            Err(Error::RootFolder),
            store.delete_folder(FolderTree::ROOT)
        );
    }

    #[test]
    fn rename_moves_companions() {
        let setup = set_up();
        let store = &setup.store;
        let root = setup.root.path();

        let inbox = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        let work = store.create_folder(inbox, "Work").unwrap();
        let token = append(store, work, b"Subject: x\r\n\r\nbody\r\n");
        fs::write(root.join("Inbox.msf"), b"summary").unwrap();
        store.create_folder(FolderTree::ROOT, "Taken").unwrap();

        assert_matches!(
            Err(Error::FolderExists),
            store.rename_folder(inbox, "Taken")
        );
        assert!(root.join("Inbox").is_file());

        store.rename_folder(inbox, "Mail").unwrap();
        assert!(!root.join("Inbox").exists());
        assert!(root.join("Mail").is_file());
        assert!(root.join("Mail.msf").is_file());
        assert!(root.join("Mail.sbd/Work").is_file());
        assert_eq!(Some(work), store.folders().lookup("Mail/Work"));
        assert_eq!(
            b"Subject: x\r\n\r\nbody\r\n".to_vec(),
            read(store, work, token)
        );

        assert_matches!(
            Err(Error::RootFolder),
            store.rename_folder(FolderTree::ROOT, "x")
        );
    }

    #[test]
    fn copy_and_move() {
        let setup = set_up();
        let store = &setup.store;
        let root = setup.root.path();

        let inbox = store.create_folder(FolderTree::ROOT, "Inbox").unwrap();
        let work = store.create_folder(inbox, "Work").unwrap();
        let archive =
            store.create_folder(FolderTree::ROOT, "Archive").unwrap();
        let token = append(store, work, b"Subject: x\r\n\r\nbody\r\n");

        assert_matches!(
            Err(Error::FolderIntoItself),
            store.copy_folder(inbox, work, None, false)
        );
        assert_matches!(
            Err(Error::FolderIntoItself),
            store.copy_folder(inbox, inbox, None, false)
        );

        let copy = store.copy_folder(inbox, archive, None, false).unwrap();
        assert!(root.join("Inbox.sbd/Work").is_file());
        assert!(root.join("Archive.sbd/Inbox.sbd/Work").is_file());
        let copied_work = store.folders().lookup("Archive/Inbox/Work").unwrap();
        assert_eq!(
            b"Subject: x\r\n\r\nbody\r\n".to_vec(),
            read(store, copied_work, token)
        );
        assert!(store.folders().is_within(copied_work, copy));

        // Copying onto an existing name fails without touching it
        assert_matches!(
            Err(Error::FolderExists),
            store.copy_folder(inbox, archive, None, false)
        );
        assert!(root.join("Archive.sbd/Inbox").is_file());

        let moved = store
            .copy_folder(work, archive, Some("Job"), true)
            .unwrap();
        assert!(!root.join("Inbox.sbd/Work").exists());
        assert!(!store.folders().contains(work));
        assert_eq!(Some(moved), store.folders().lookup("Archive/Job"));
        assert_eq!(
            b"Subject: x\r\n\r\nbody\r\n".to_vec(),
            read(store, moved, token)
        );
    }
}
