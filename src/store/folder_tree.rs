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

//! The in-memory folder hierarchy.
//!
//! Folders live in an arena and refer to each other by `FolderId`, so the
//! parent/child relation needs no shared ownership. Ids are never reused
//! within one tree; a removed folder's id simply stops resolving.
//!
//! On disk, the root folder is the store directory itself. A child of the
//! root lives at `<root>/<file_name>`; a child of any other folder `F` lives
//! at `<path(F)>.sbd/<file_name>`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::model::FolderId;
use crate::support::error::Error;
use crate::support::safe_name::{SUBFOLDER_DIR_SUFFIX, SUMMARY_FILE_SUFFIX};

#[derive(Clone, Debug)]
pub struct FolderNode {
    /// The display name of the folder.
    pub name: String,
    /// The name of the mbox file within the parent's subfolder directory.
    pub file_name: String,
    pub parent: Option<FolderId>,
    pub children: Vec<FolderId>,
}

#[derive(Clone, Debug)]
pub struct FolderTree {
    nodes: Vec<Option<FolderNode>>,
}

impl Default for FolderTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderTree {
    pub const ROOT: FolderId = FolderId(0);

    pub fn new() -> Self {
        FolderTree {
            nodes: vec![Some(FolderNode {
                name: String::new(),
                file_name: String::new(),
                parent: None,
                children: Vec::new(),
            })],
        }
    }

    pub fn get(&self, id: FolderId) -> Result<&FolderNode, Error> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::NxFolder)
    }

    fn get_mut(&mut self, id: FolderId) -> Result<&mut FolderNode, Error> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::NxFolder)
    }

    pub fn contains(&self, id: FolderId) -> bool {
        self.get(id).is_ok()
    }

    pub fn children(&self, id: FolderId) -> Result<&[FolderId], Error> {
        self.get(id).map(|node| &node.children[..])
    }

    /// Find the child of `parent` with display name `name`.
    pub fn find_child(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        let node = self.get(parent).ok()?;
        node.children
            .iter()
            .copied()
            .find(|&child| self.get(child).map_or(false, |c| c.name == name))
    }

    /// Resolve a `/`-separated path of display names from the root.
    pub fn lookup(&self, full_name: &str) -> Option<FolderId> {
        full_name
            .split('/')
            .filter(|part| !part.is_empty())
            .try_fold(Self::ROOT, |id, part| self.find_child(id, part))
    }

    /// The `/`-separated display path of `id`; empty for the root.
    pub fn full_name(&self, id: FolderId) -> Result<String, Error> {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = self.get(c)?;
            if node.parent.is_some() {
                parts.push(&node.name[..]);
            }
            cursor = node.parent;
        }

        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Add a new child under `parent`.
    ///
    /// Fails with `FolderExists` if `parent` already has a child with the same
    /// display name or file name.
    pub fn insert(
        &mut self,
        parent: FolderId,
        name: &str,
        file_name: &str,
    ) -> Result<FolderId, Error> {
        {
            let siblings = self.children(parent)?;
            for &sibling in siblings {
                let sibling = self.get(sibling)?;
                if sibling.name == name || sibling.file_name == file_name {
                    return Err(Error::FolderExists);
                }
            }
        }

        let id = FolderId(self.nodes.len());
        self.nodes.push(Some(FolderNode {
            name: name.to_owned(),
            file_name: file_name.to_owned(),
            parent: Some(parent),
            children: Vec::new(),
        }));
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Remove `id` and all its descendants, returning the removed ids.
    pub fn remove_subtree(
        &mut self,
        id: FolderId,
    ) -> Result<Vec<FolderId>, Error> {
        let parent = self.get(id)?.parent.ok_or(Error::RootFolder)?;
        let removed = self.subtree(id)?;
        self.get_mut(parent)?.children.retain(|&c| c != id);
        for &r in &removed {
            self.nodes[r.0] = None;
        }
        Ok(removed)
    }

    /// Change the names of `id`.
    pub fn rename(
        &mut self,
        id: FolderId,
        name: &str,
        file_name: &str,
    ) -> Result<(), Error> {
        let parent = self.get(id)?.parent.ok_or(Error::RootFolder)?;
        for &sibling in self.children(parent)? {
            if sibling == id {
                continue;
            }

            let sibling = self.get(sibling)?;
            if sibling.name == name || sibling.file_name == file_name {
                return Err(Error::FolderExists);
            }
        }

        let node = self.get_mut(id)?;
        node.name = name.to_owned();
        node.file_name = file_name.to_owned();
        Ok(())
    }

    /// `id` and all its descendants, parents before children.
    pub fn subtree(&self, id: FolderId) -> Result<Vec<FolderId>, Error> {
        let mut out = vec![id];
        let mut ix = 0;
        while ix < out.len() {
            out.extend_from_slice(self.children(out[ix])?);
            ix += 1;
        }
        Ok(out)
    }

    /// Whether `id` is `ancestor` or somewhere beneath it.
    pub fn is_within(&self, id: FolderId, ancestor: FolderId) -> bool {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            if c == ancestor {
                return true;
            }
            cursor = self.get(c).ok().and_then(|n| n.parent);
        }
        false
    }

    /// The path of the mbox file of `id`.
    ///
    /// Fails with `RootFolder` for the root, which has no mbox file.
    pub fn mbox_path(
        &self,
        root: &Path,
        id: FolderId,
    ) -> Result<PathBuf, Error> {
        let node = self.get(id)?;
        let parent = node.parent.ok_or(Error::RootFolder)?;
        Ok(self.subfolder_dir(root, parent)?.join(&node.file_name))
    }

    /// The directory holding the mbox files of the children of `id`.
    pub fn subfolder_dir(
        &self,
        root: &Path,
        id: FolderId,
    ) -> Result<PathBuf, Error> {
        if self.get(id)?.parent.is_none() {
            Ok(root.to_owned())
        } else {
            Ok(with_suffix(self.mbox_path(root, id)?, SUBFOLDER_DIR_SUFFIX))
        }
    }

    /// The path of the summary file the index keeps beside the mbox of `id`.
    pub fn summary_path(
        &self,
        root: &Path,
        id: FolderId,
    ) -> Result<PathBuf, Error> {
        Ok(with_suffix(self.mbox_path(root, id)?, SUMMARY_FILE_SUFFIX))
    }
}

/// Append `suffix` to the final component of `path`.
pub fn with_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path);
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paths_follow_hierarchy() {
        let mut tree = FolderTree::new();
        let inbox = tree.insert(FolderTree::ROOT, "Inbox", "Inbox").unwrap();
        let work = tree.insert(inbox, "Work", "Work").unwrap();
        let root = Path::new("/mail");

        assert_eq!(
            PathBuf::from("/mail/Inbox"),
            tree.mbox_path(root, inbox).unwrap()
        );
        assert_eq!(
            PathBuf::from("/mail/Inbox.sbd/Work"),
            tree.mbox_path(root, work).unwrap()
        );
        assert_eq!(
            PathBuf::from("/mail/Inbox.sbd/Work.sbd"),
            tree.subfolder_dir(root, work).unwrap()
        );
        assert_eq!(
            PathBuf::from("/mail/Inbox.sbd/Work.msf"),
            tree.summary_path(root, work).unwrap()
        );
        assert_eq!(
            PathBuf::from("/mail"),
            tree.subfolder_dir(root, FolderTree::ROOT).unwrap()
        );
        assert_matches!(
            Err(Error::RootFolder),
            tree.mbox_path(root, FolderTree::ROOT)
        );

        assert_eq!("Inbox/Work", tree.full_name(work).unwrap());
        assert_eq!(Some(work), tree.lookup("Inbox/Work"));
        assert_eq!(Some(FolderTree::ROOT), tree.lookup(""));
        assert_eq!(None, tree.lookup("Inbox/Play"));
    }

    #[test]
    fn duplicates_rejected() {
        let mut tree = FolderTree::new();
        tree.insert(FolderTree::ROOT, "a", "a").unwrap();
        assert_matches!(
            Err(Error::FolderExists),
            tree.insert(FolderTree::ROOT, "a", "b")
        );
        assert_matches!(
            Err(Error::FolderExists),
            tree.insert(FolderTree::ROOT, "b", "a")
        );
    }

    #[test]
    fn subtree_removal() {
        let mut tree = FolderTree::new();
        let a = tree.insert(FolderTree::ROOT, "a", "a").unwrap();
        let b = tree.insert(a, "b", "b").unwrap();
        let c = tree.insert(b, "c", "c").unwrap();
        let d = tree.insert(FolderTree::ROOT, "d", "d").unwrap();

        assert!(tree.is_within(c, a));
        assert!(!tree.is_within(a, c));
        assert!(!tree.is_within(d, a));

        assert_eq!(vec![a, b, c], tree.remove_subtree(a).unwrap());
        assert!(!tree.contains(b));
        assert_eq!(&[d], tree.children(FolderTree::ROOT).unwrap());
        assert_matches!(
            Err(Error::RootFolder),
            tree.remove_subtree(FolderTree::ROOT)
        );

        // Ids are not reused
        let e = tree.insert(FolderTree::ROOT, "a", "a").unwrap();
        assert_ne!(a, e);
    }

    #[test]
    fn rename_checks_siblings() {
        let mut tree = FolderTree::new();
        let a = tree.insert(FolderTree::ROOT, "a", "a").unwrap();
        tree.insert(FolderTree::ROOT, "b", "b").unwrap();
        assert_matches!(Err(Error::FolderExists), tree.rename(a, "b", "b"));
        tree.rename(a, "a", "a").unwrap();
        tree.rename(a, "z", "z").unwrap();
        assert_eq!(Some(a), tree.lookup("z"));
    }
}
