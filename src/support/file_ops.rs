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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::support::error::Error;

/// Mode for newly created mbox files.
pub const MBOX_FILE_MODE: u32 = 0o600;
/// Mode for newly created `.sbd` directories.
pub const SBD_DIR_MODE: u32 = 0o700;

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Create an empty file at `path`, failing if anything already exists there.
pub fn create_new_file(path: impl AsRef<Path>) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(MBOX_FILE_MODE)
        .open(path)
}

/// Open `path` for reading and writing, creating it if it does not exist.
pub fn open_read_write(path: impl AsRef<Path>) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(MBOX_FILE_MODE)
        .open(path)
}

/// Create `path` as a directory if it does not already exist.
pub fn ensure_dir(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    fs::create_dir(path).ignore_already_exists()?;
    if !path.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists but is not a directory", path.display()),
        ));
    }
    chmod(path, SBD_DIR_MODE)
}

/// Recursively copy `src` to `dst`.
///
/// Directories are recreated; regular files are copied. Anything else is
/// skipped. `dst` must not exist yet.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let md = fs::symlink_metadata(src)?;
    if md.is_dir() {
        fs::create_dir(dst)?;
        chmod(dst, SBD_DIR_MODE)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else if md.is_file() {
        if dst.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            ));
        }
        fs::copy(src, dst)?;
    }

    Ok(())
}

/// Remove whatever is at `path`, whether a file or a directory tree.
///
/// Nothing existing at `path` is not an error.
pub fn remove_any(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Rename `src` to `dst` if `src` exists.
///
/// Returns whether anything was renamed.
pub fn rename_if_exists(src: &Path, dst: &Path) -> io::Result<bool> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(true),
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(false),
        Err(e) => Err(e),
    }
}

pub trait ReadUninterruptibly: Read {
    fn read_uninterruptibly(&mut self, dst: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read> ReadUninterruptibly for R {
    /// Read bytes into `dst` until `dst` is full or EOF is reached.
    ///
    /// `Interrupted` errors are ignored and retried. Other errors are
    /// propagated.
    fn read_uninterruptibly(
        &mut self,
        mut dst: &mut [u8],
    ) -> io::Result<usize> {
        let mut total = 0;
        while !dst.is_empty() {
            match self.read(dst) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    dst = &mut dst[n..];
                }
                Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }
}

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    fn on_exists(self, error: Error) -> Self::Coerced;
    fn on_not_found(self, error: Error) -> Self::Coerced;
}

impl<R, E: Into<Error>> ErrorTransforms for Result<R, E> {
    type Coerced = Result<R, Error>;

    fn on_exists(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::AlreadyExists == e.kind() => {
                Err(error)
            }
            Err(Error::Nix(nix::Error::Sys(nix::errno::Errno::EEXIST))) => {
                Err(error)
            }
            s => s,
        }
    }

    fn on_not_found(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                Err(error)
            }
            Err(Error::Nix(nix::Error::Sys(nix::errno::Errno::ENOENT))) => {
                Err(error)
            }
            s => s,
        }
    }
}
