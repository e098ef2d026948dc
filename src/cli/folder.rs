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


use super::main::{CopySubcommand, FolderArg, RenameSubcommand};
use crate::model::FolderId;
use crate::store::{FolderTree, Store};
use crate::support::error::Error;

/// Split `path` into the id of its parent folder and its last component.
fn split_parent<'a>(
    store: &Store,
    path: &'a str,
) -> Result<(FolderId, &'a str), Error> {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(ix) => Ok((store.lookup(&path[..ix])?, &path[ix + 1..])),
        None => Ok((FolderTree::ROOT, path)),
    }
}

pub(super) fn list(store: &Store) -> Result<(), Error> {
    let tree = store.folders();
    for id in tree.subtree(FolderTree::ROOT)? {
        if FolderTree::ROOT == id {
            continue;
        }

        let size = match tree.mbox_path(store.root(), id) {
            Ok(path) => path.metadata().map(|md| md.len()).unwrap_or(0),
            Err(_) => 0,
        };
        println!("{}\t{}", tree.full_name(id)?, size);
    }
    Ok(())
}

pub(super) fn create(store: &Store, cmd: FolderArg) -> Result<(), Error> {
    let (parent, name) = split_parent(store, &cmd.folder)?;
    store.create_folder(parent, name)?;
    Ok(())
}

pub(super) fn delete(store: &Store, cmd: FolderArg) -> Result<(), Error> {
    store.delete_folder(store.lookup(&cmd.folder)?)
}

pub(super) fn rename(
    store: &Store,
    cmd: RenameSubcommand,
) -> Result<(), Error> {
    if cmd.new_name.contains('/') {
        return Err(Error::UnsafeName);
    }

    store.rename_folder(store.lookup(&cmd.folder)?, &cmd.new_name)
}

pub(super) fn copy(store: &Store, cmd: CopySubcommand) -> Result<(), Error> {
    let src = store.lookup(&cmd.folder)?;
    let dst_parent = store.lookup(&cmd.dest_parent)?;
    let copy = store.copy_folder(
        src,
        dst_parent,
        cmd.name.as_deref(),
        cmd.is_move,
    )?;
    println!("{}", store.folders().full_name(copy)?);
    Ok(())
}
